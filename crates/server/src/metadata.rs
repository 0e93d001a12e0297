//! The file-metadata store: an external collaborator, out of scope per
//! §1 — addressed only through this trait. The core never depends on a
//! particular backing store; it just needs somewhere to record a `db_id`
//! and a status string, best-effort.

/// Errors from the metadata store. Every call site treats these as
/// non-fatal: a transient metadata-store outage must not block a
/// resumable transfer.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
}

/// Opaque insert/update-by-id metadata store.
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    /// Inserts a record for a newly created session, returning its `db_id`.
    async fn insert(&self, file_id: &str, user_id: &str, status: &str) -> Result<String, MetadataError>;

    /// Updates the status of an existing record.
    async fn update_status(&self, db_id: &str, status: &str) -> Result<(), MetadataError>;
}

/// No-op metadata store: every call succeeds without persisting anything.
/// The shipped default, since the metadata store's actual schema is out
/// of scope for this crate.
pub struct NullMetadataStore;

#[async_trait::async_trait]
impl MetadataStore for NullMetadataStore {
    async fn insert(&self, _file_id: &str, _user_id: &str, _status: &str) -> Result<String, MetadataError> {
        Ok(String::new())
    }

    async fn update_status(&self, _db_id: &str, _status: &str) -> Result<(), MetadataError> {
        Ok(())
    }
}
