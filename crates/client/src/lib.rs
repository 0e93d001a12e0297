//! The Client Driver (C8): the opposite side of the relay from
//! [`fileferry_server`](../fileferry_server/index.html). Reads a local
//! file, emits `start` plus sequential `chunk` frames over a WebSocket
//! connection, honors pause/resume, and reconciles server-reported offset
//! mismatches.

mod driver;
mod error;
mod pumps;

pub use driver::{ClientDriver, DEFAULT_CHUNK_SIZE};
pub use error::ClientError;
