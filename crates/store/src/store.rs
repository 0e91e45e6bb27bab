//! Concurrent map from station id to record.

use crate::record::{ExpiryPolicy, Record};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-wide mapping `station id -> Arc<Record>`.
///
/// Insertion and conditional removal happen under the map's write lock;
/// lookups and snapshots under the read lock. Each record carries its own
/// reader/writer lock, so map operations never wait on record I/O.
#[derive(Debug)]
pub struct RecordStore {
    data_dir: PathBuf,
    records: RwLock<HashMap<String, Arc<Record>>>,
}

impl RecordStore {
    /// Create an empty store persisting under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    /// Return the record for `id`, inserting a blank one if absent.
    ///
    /// The boolean reports whether this caller created the entry; racing
    /// first-writers for the same id see exactly one `true` between them.
    pub async fn get_or_create(&self, id: &str) -> (Arc<Record>, bool) {
        // Fast path: already present.
        if let Some(record) = self.records.read().await.get(id) {
            return (record.clone(), false);
        }

        let mut records = self.records.write().await;
        match records.get(id) {
            Some(record) => (record.clone(), false),
            None => {
                let record = Arc::new(Record::new(&self.data_dir, id));
                records.insert(id.to_string(), record.clone());
                (record, true)
            }
        }
    }

    /// Insert a record recovered from disk. Bootstrap runs before the
    /// acceptor, so there is nothing to race with.
    pub async fn insert_loaded(&self, id: &str, record: Arc<Record>) {
        self.records.write().await.insert(id.to_string(), record);
    }

    /// Lookup without creation.
    pub async fn get(&self, id: &str) -> Option<Arc<Record>> {
        self.records.read().await.get(id).cloned()
    }

    /// Remove the binding for `id` only if it is still `record` itself.
    ///
    /// Identity (not content) comparison: a cleaner holding a stale handle
    /// must not erase a record that was re-created in the meantime.
    pub async fn remove_if_same(&self, id: &str, record: &Arc<Record>) -> bool {
        let mut records = self.records.write().await;
        remove_binding_if_same(&mut records, id, record)
    }

    /// Expiry arm: when `record` is expired under `policy`, delete its file
    /// and drop its map binding. The record's exclusive lock is held across
    /// the check, the delete, and the removal, so a concurrent merge cannot
    /// land in between and vanish from the index; the file is only deleted
    /// while the binding is still this record's. Returns whether the record
    /// was removed.
    pub async fn remove_if_expired(
        &self,
        id: &str,
        record: &Arc<Record>,
        now_ms: u64,
        current_seq: u64,
        policy: &ExpiryPolicy,
    ) -> bool {
        let guard = record.lock_exclusive().await;
        if !guard.is_expired(now_ms, current_seq, policy) {
            return false;
        }

        let mut records = self.records.write().await;
        if !remove_binding_if_same(&mut records, id, record) {
            return false;
        }
        guard.delete_file();
        true
    }

    /// Disconnect arm: when `(host, port)` is still the record's last
    /// writer, delete its file and drop its map binding, under the same
    /// locking discipline as [`RecordStore::remove_if_expired`]. A mismatch
    /// means a later writer owns the record and it survives. Returns
    /// whether the record was removed.
    pub async fn remove_if_owned_by(
        &self,
        id: &str,
        record: &Arc<Record>,
        host: &str,
        port: u16,
    ) -> bool {
        let guard = record.lock_exclusive().await;
        if !guard.is_owned_by(host, port) {
            return false;
        }

        let mut records = self.records.write().await;
        if !remove_binding_if_same(&mut records, id, record) {
            return false;
        }
        guard.delete_file();
        true
    }

    /// Point-in-time listing of all entries. Entries inserted or removed
    /// concurrently may be missed or linger; callers re-check per record.
    pub async fn snapshot(&self) -> Vec<(String, Arc<Record>)> {
        self.records
            .read()
            .await
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// Drop the binding for `id` only when it still points at `record`.
fn remove_binding_if_same(
    records: &mut HashMap<String, Arc<Record>>,
    id: &str,
    record: &Arc<Record>,
) -> bool {
    match records.get(id) {
        Some(current) if Arc::ptr_eq(current, record) => {
            records.remove(id);
            true
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const POLICY: ExpiryPolicy = ExpiryPolicy {
        max_age_ms: 30_000,
        max_update_lag: 20,
    };

    async fn merge_from(record: &Arc<Record>, id: &str, lamport: u64, host: &str, port: u16) {
        let body = format!(r#"{{"id":"{id}"}}"#);
        assert!(record.merge(&body, lamport, 1_000, lamport, host, port).await);
    }

    #[tokio::test]
    async fn test_get_or_create_reports_creation() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());

        let (first, created) = store.get_or_create("S1").await;
        assert!(created);

        let (second, created) = store.get_or_create("S1").await;
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_creation_single_winner() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::new(dir.path()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.get_or_create("S1").await.1 },
            ));
        }

        let mut creators = 0;
        for h in handles {
            if h.await.unwrap() {
                creators += 1;
            }
        }
        assert_eq!(creators, 1, "exactly one task may create the record");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_absent() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        assert!(store.get("nothing").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_if_same_identity_guard() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());

        let (original, _) = store.get_or_create("S1").await;

        // Simulate a cleaner racing a re-creation: drop the binding and
        // insert a new record under the same id.
        assert!(store.remove_if_same("S1", &original).await);
        let (replacement, created) = store.get_or_create("S1").await;
        assert!(created);

        // The stale handle must not remove the replacement.
        assert!(!store.remove_if_same("S1", &original).await);
        assert!(store.get("S1").await.is_some());

        assert!(store.remove_if_same("S1", &replacement).await);
        assert!(store.get("S1").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_if_owned_by_requires_matching_origin() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());

        let (record, _) = store.get_or_create("S1").await;
        merge_from(&record, "S1", 1, "10.0.0.1", 4000).await;
        let path = dir.path().join("S1.json");

        // Wrong port, then wrong host: a later writer owns the record.
        assert!(!store.remove_if_owned_by("S1", &record, "10.0.0.1", 4001).await);
        assert!(!store.remove_if_owned_by("S1", &record, "10.0.0.2", 4000).await);
        assert!(store.get("S1").await.is_some());
        assert!(path.exists());

        // Exact origin: file and binding both go.
        assert!(store.remove_if_owned_by("S1", &record, "10.0.0.1", 4000).await);
        assert!(store.get("S1").await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_if_expired() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());

        let (record, _) = store.get_or_create("S1").await;
        merge_from(&record, "S1", 1, "h", 1).await;
        let path = dir.path().join("S1.json");

        // Fresh: untouched.
        assert!(!store.remove_if_expired("S1", &record, 1_000, 1, &POLICY).await);
        assert!(path.exists());

        // Aged out: file and binding both go.
        assert!(
            store
                .remove_if_expired("S1", &record, 1_000 + 31_000, 1, &POLICY)
                .await
        );
        assert!(store.get("S1").await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_removal_arms_spare_recreated_records() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());

        // A record written by one feeder, then dropped and re-created
        // under the same id (same file path on disk).
        let (stale, _) = store.get_or_create("S1").await;
        merge_from(&stale, "S1", 1, "10.0.0.1", 4000).await;
        assert!(store.remove_if_same("S1", &stale).await);

        let (current, created) = store.get_or_create("S1").await;
        assert!(created);
        merge_from(&current, "S1", 2, "10.0.0.1", 4000).await;
        let path = dir.path().join("S1.json");

        // A cleaner still holding the stale handle matches on origin but
        // must not touch the re-created binding or its file.
        assert!(!store.remove_if_owned_by("S1", &stale, "10.0.0.1", 4000).await);
        assert!(
            !store
                .remove_if_expired("S1", &stale, 1_000 + 31_000, 1, &POLICY)
                .await
        );
        assert!(store.get("S1").await.is_some());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_snapshot_lists_entries() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        store.get_or_create("S1").await;
        store.get_or_create("S2").await;
        store.get_or_create("S3").await;

        let mut ids: Vec<String> = store.snapshot().await.into_iter().map(|(id, _)| id).collect();
        ids.sort();
        assert_eq!(ids, vec!["S1", "S2", "S3"]);
    }
}
