//! Wire protocol types for the file transfer relay.
//!
//! The channel carries JSON text frames in both directions. Client-to-server
//! frames are discriminated by an `action` field, server-to-client frames by
//! an `event` field — both modeled as closed, internally-tagged enums so an
//! unrecognized discriminator is rejected at parse time rather than falling
//! through to a handler's default case.

pub mod error;
pub mod wire;

pub use error::ProtocolError;
pub use wire::{ClientAction, ServerEvent};
