//! One station's durable entry.
//!
//! The record's in-memory fields and its on-disk file move together: the
//! temp-file write and the rename over the committed file both happen while
//! the exclusive lock is held, so readers never observe a half-applied
//! merge and a racing writer cannot interleave between write and commit.

use crate::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::path::{Path, PathBuf};
use tokio::sync::{RwLock, RwLockWriteGuard};

/// Thresholds deciding when a record is stale.
///
/// A record expires when its age exceeds `max_age_ms` OR when more than
/// `max_update_lag` admitted writes have happened fleet-wide since it was
/// last written. The second arm evicts stations that fall silent while the
/// rest of the fleet keeps reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub max_age_ms: u64,
    pub max_update_lag: u64,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            max_age_ms: 30_000,
            max_update_lag: 20,
        }
    }
}

/// Write metadata, as persisted inside the `meta` object on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Lamport value of the write that installed the current body.
    pub lamport: u64,
    /// Aggregator wall clock (epoch ms) at persist time.
    #[serde(rename = "lastUpdated")]
    pub last_updated: u64,
    /// Global update sequence assigned when the write was admitted.
    #[serde(rename = "updateCount")]
    pub update_count: u64,
    /// Peer IP of the connection that wrote this record.
    pub host: String,
    /// Peer TCP port of that connection.
    pub port: u16,
}

/// Guarded state: metadata plus the verbatim body text.
#[derive(Debug, Default)]
struct RecordState {
    meta: RecordMeta,
    body: Option<String>,
}

impl RecordState {
    fn is_expired(&self, now_ms: u64, current_seq: u64, policy: &ExpiryPolicy) -> bool {
        now_ms.saturating_sub(self.meta.last_updated) > policy.max_age_ms
            || current_seq.saturating_sub(self.meta.update_count) > policy.max_update_lag
    }
}

/// The document committed to `<id>.json`.
#[derive(Serialize)]
struct PersistDoc<'a> {
    meta: &'a RecordMeta,
    body: &'a RawValue,
}

#[derive(Deserialize)]
struct LoadedDoc {
    meta: RecordMeta,
    body: Box<RawValue>,
}

/// One station's entry: verbatim body + metadata behind a reader/writer
/// lock, backed by `<id>.json` on disk.
#[derive(Debug)]
pub struct Record {
    station_id: String,
    path: PathBuf,
    temp_path: PathBuf,
    state: RwLock<RecordState>,
}

impl Record {
    /// Create a blank record for `station_id` persisted under `data_dir`.
    /// A blank record has Lamport 0 and reads as expired until merged.
    pub fn new(data_dir: &Path, station_id: &str) -> Self {
        Self {
            station_id: station_id.to_string(),
            path: data_dir.join(format!("{station_id}.json")),
            temp_path: data_dir.join(format!("{station_id}-temp.json")),
            state: RwLock::new(RecordState::default()),
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    /// Last-writer-wins merge keyed on the Lamport value.
    ///
    /// Installs `body` only when `lamport` strictly exceeds the stored
    /// value (equality is a no-op). The document is committed to disk
    /// before memory is touched; if the temp write or the rename fails the
    /// merge logs and returns without any effect. Returns whether the
    /// write was installed.
    pub async fn merge(
        &self,
        body: &str,
        lamport: u64,
        now_ms: u64,
        seq: u64,
        host: &str,
        port: u16,
    ) -> bool {
        let mut state = self.state.write().await;
        if lamport <= state.meta.lamport {
            tracing::debug!(
                station = %self.station_id,
                incoming = lamport,
                stored = state.meta.lamport,
                "merge skipped, Lamport not newer"
            );
            return false;
        }

        let meta = RecordMeta {
            lamport,
            last_updated: now_ms,
            update_count: seq,
            host: host.to_string(),
            port,
        };

        if let Err(e) = self.commit_to_disk(&meta, body) {
            tracing::warn!(station = %self.station_id, error = %e, "persist failed, keeping previous state");
            return false;
        }

        state.meta = meta;
        state.body = Some(body.to_string());
        true
    }

    /// Write the full document to the temp file, then rename it over the
    /// committed file. Consumers only ever read the committed path, so the
    /// file is always a complete document.
    fn commit_to_disk(&self, meta: &RecordMeta, body: &str) -> Result<(), StoreError> {
        let raw = RawValue::from_string(body.to_string())?;
        let doc = PersistDoc { meta, body: &raw };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        std::fs::write(&self.temp_path, bytes)?;
        std::fs::rename(&self.temp_path, &self.path)?;
        Ok(())
    }

    /// Load the committed file into memory.
    ///
    /// On any I/O or parse failure the record stays blank; recovery logs
    /// and moves on rather than failing the caller. A crash between temp
    /// write and rename loses only that in-flight write.
    pub async fn load(&self) {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(station = %self.station_id, error = %e, "failed to read record file");
                return;
            }
        };

        let doc: LoadedDoc = match serde_json::from_str(&text) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(station = %self.station_id, error = %e, "failed to parse record file");
                return;
            }
        };

        let mut state = self.state.write().await;
        state.meta = doc.meta;
        state.body = Some(doc.body.get().to_string());
    }

    /// The body text, if this record is live under `policy`.
    pub async fn body_if_fresh(
        &self,
        now_ms: u64,
        current_seq: u64,
        policy: &ExpiryPolicy,
    ) -> Option<String> {
        let state = self.state.read().await;
        if state.is_expired(now_ms, current_seq, policy) {
            return None;
        }
        state.body.clone()
    }

    /// Whether the record is expired under `policy` (shared lock).
    pub async fn is_expired(&self, now_ms: u64, current_seq: u64, policy: &ExpiryPolicy) -> bool {
        self.state.read().await.is_expired(now_ms, current_seq, policy)
    }

    /// Snapshot of the write metadata (shared lock).
    pub async fn meta(&self) -> RecordMeta {
        self.state.read().await.meta.clone()
    }

    /// Take the exclusive lock for destruction. The caller must hold the
    /// returned guard across both the file delete and the store-binding
    /// removal; `RecordStore::remove_if_expired` and
    /// `RecordStore::remove_if_owned_by` do exactly that.
    pub async fn lock_exclusive(&self) -> RecordGuard<'_> {
        RecordGuard {
            record: self,
            state: self.state.write().await,
        }
    }

    /// Remove the committed file if present. A leftover temp file is not a
    /// fatal condition; the next write overwrites it.
    fn delete_file(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(station = %self.station_id, error = %e, "failed to delete record file");
            }
        }
    }
}

/// Exclusive hold on a record's state, used by the two destruction arms.
/// While the guard is alive no merge can run, so the expiry/ownership
/// check, the file delete, and the store-binding removal see one
/// consistent record.
pub struct RecordGuard<'a> {
    record: &'a Record,
    state: RwLockWriteGuard<'a, RecordState>,
}

impl RecordGuard<'_> {
    /// Whether the record is expired under `policy`.
    pub fn is_expired(&self, now_ms: u64, current_seq: u64, policy: &ExpiryPolicy) -> bool {
        self.state.is_expired(now_ms, current_seq, policy)
    }

    /// Whether `(host, port)` is still the record's last writer.
    pub fn is_owned_by(&self, host: &str, port: u16) -> bool {
        self.state.meta.host == host && self.state.meta.port == port
    }

    /// Remove the committed file if present.
    pub fn delete_file(&self) {
        self.record.delete_file();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
