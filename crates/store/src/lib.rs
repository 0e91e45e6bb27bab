//! weathervane-store: durable per-station records.
//!
//! Each weather station maps to one [`Record`]: the verbatim JSON body it
//! last reported plus write metadata (Lamport value, wall time, global
//! update sequence, origin address). Records persist as one JSON document
//! per station, committed by an atomic temp-write-and-rename, and are
//! recovered from disk at startup.

pub mod bootstrap;
pub mod record;
pub mod store;

pub use bootstrap::{recover, Recovered};
pub use record::{ExpiryPolicy, Record, RecordGuard, RecordMeta};
pub use store::RecordStore;

/// Errors from persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Current wall time in milliseconds since the Unix epoch.
pub fn now_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
