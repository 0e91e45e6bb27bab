//! Startup recovery: rebuild the in-memory index from persisted records.

use crate::record::Record;
use crate::store::RecordStore;
use crate::StoreError;
use std::path::Path;
use std::sync::Arc;

/// What recovery found on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovered {
    /// Number of station files loaded.
    pub stations: usize,
    /// Highest Lamport value across loaded records.
    pub max_lamport: u64,
    /// Highest global update sequence across loaded records.
    pub max_update_count: u64,
}

/// Scan `data_dir` for committed station files and load them into `store`.
///
/// Files named `<id>.json` are loaded under `<id>`; `*-temp.json` staging
/// files are skipped: a crash between temp write and rename loses only
/// that in-flight write. Returns the per-file maxima so the caller can
/// restore the process clock and update counter.
pub async fn recover(data_dir: &Path, store: &RecordStore) -> Result<Recovered, StoreError> {
    let mut recovered = Recovered::default();

    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };

        if name.ends_with("-temp.json") {
            continue;
        }
        let Some(station_id) = name.strip_suffix(".json") else {
            continue;
        };
        if station_id.is_empty() {
            continue;
        }

        let record = Arc::new(Record::new(data_dir, station_id));
        record.load().await;
        let meta = record.meta().await;

        store.insert_loaded(station_id, record).await;
        recovered.stations += 1;
        recovered.max_lamport = recovered.max_lamport.max(meta.lamport);
        recovered.max_update_count = recovered.max_update_count.max(meta.update_count);

        tracing::info!(
            station = station_id,
            lamport = meta.lamport,
            update_count = meta.update_count,
            "loaded persisted record"
        );
    }

    Ok(recovered)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExpiryPolicy;
    use tempfile::TempDir;

    async fn persist(dir: &Path, id: &str, lamport: u64, seq: u64) {
        let record = Record::new(dir, id);
        let body = format!(r#"{{"id":"{id}"}}"#);
        assert!(record.merge(&body, lamport, 1_000, seq, "h", 1).await);
    }

    #[tokio::test]
    async fn test_recover_empty_dir() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let recovered = recover(dir.path(), &store).await.unwrap();
        assert_eq!(recovered, Recovered::default());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_recover_restores_records_and_maxima() {
        let dir = TempDir::new().unwrap();
        persist(dir.path(), "S1", 5, 10).await;
        persist(dir.path(), "S2", 9, 3).await;

        let store = RecordStore::new(dir.path());
        let recovered = recover(dir.path(), &store).await.unwrap();

        assert_eq!(recovered.stations, 2);
        assert_eq!(recovered.max_lamport, 9);
        assert_eq!(recovered.max_update_count, 10);

        let s1 = store.get("S1").await.unwrap();
        assert_eq!(s1.meta().await.lamport, 5);
        let s2 = store.get("S2").await.unwrap();
        assert_eq!(s2.meta().await.update_count, 3);
    }

    #[tokio::test]
    async fn test_recover_ignores_temp_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        persist(dir.path(), "S1", 2, 2).await;
        std::fs::write(dir.path().join("S9-temp.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let store = RecordStore::new(dir.path());
        let recovered = recover(dir.path(), &store).await.unwrap();
        assert_eq!(recovered.stations, 1);
        assert!(store.get("S9").await.is_none());
        assert!(store.get("S9-temp").await.is_none());
    }

    #[tokio::test]
    async fn test_recover_tolerates_corrupt_file() {
        let dir = TempDir::new().unwrap();
        persist(dir.path(), "good", 4, 4).await;
        std::fs::write(dir.path().join("torn.json"), b"{\"meta\": {").unwrap();

        let store = RecordStore::new(dir.path());
        let recovered = recover(dir.path(), &store).await.unwrap();

        // The torn file loads blank but recovery continues.
        assert_eq!(recovered.stations, 2);
        assert_eq!(recovered.max_lamport, 4);
        let torn = store.get("torn").await.unwrap();
        assert!(torn.is_expired(crate::now_epoch_ms(), 0, &ExpiryPolicy::default()).await);
    }

    #[tokio::test]
    async fn test_recovered_body_served() {
        let dir = TempDir::new().unwrap();
        persist(dir.path(), "S1", 3, 1).await;

        let store = RecordStore::new(dir.path());
        recover(dir.path(), &store).await.unwrap();

        let record = store.get("S1").await.unwrap();
        let policy = ExpiryPolicy::default();
        // Fresh relative to its own persist time.
        let body = record.body_if_fresh(1_000, 1, &policy).await.unwrap();
        assert!(body.contains("S1"));
    }
}
