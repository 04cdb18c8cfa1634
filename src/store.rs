//! Server record persistence
//!
//! The rest of the crate talks to storage through [`ServerStore`], keyed by
//! record id. [`MemoryStore`] keeps records in id order; [`JsonFileStore`]
//! adds load and save of a JSON array on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::ranker::RankedServer;
use crate::record::ServerRecord;

// ============================================================================
// Store Trait
// ============================================================================

pub trait ServerStore {
    /// All records, ordered by id
    fn list(&self) -> Vec<ServerRecord>;

    fn get(&self, id: &str) -> Option<&ServerRecord>;

    /// Inserts or replaces by id. Returns `true` when the id was new.
    fn upsert(&mut self, record: ServerRecord) -> bool;

    fn delete(&mut self, id: &str) -> Option<ServerRecord>;

    fn len(&self) -> usize {
        self.list().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks a record up by id, falling back to an exact display-name match
    fn find(&self, id_or_name: &str) -> Option<ServerRecord> {
        self.get(id_or_name)
            .cloned()
            .or_else(|| self.list().into_iter().find(|r| r.name == id_or_name))
    }
}

// ============================================================================
// Memory Store
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStore {
    records: BTreeMap<String, ServerRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = ServerRecord>) -> Self {
        let records = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self { records }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerRecord> {
        self.records.values()
    }
}

impl ServerStore for MemoryStore {
    fn list(&self) -> Vec<ServerRecord> {
        self.records.values().cloned().collect()
    }

    fn get(&self, id: &str) -> Option<&ServerRecord> {
        self.records.get(id)
    }

    fn upsert(&mut self, record: ServerRecord) -> bool {
        self.records.insert(record.id.clone(), record).is_none()
    }

    fn delete(&mut self, id: &str) -> Option<ServerRecord> {
        self.records.remove(id)
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

// ============================================================================
// JSON File Store
// ============================================================================

/// Records persisted as a pretty-printed JSON array
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: MemoryStore,
}

impl JsonFileStore {
    /// Loads the store; a missing file yields an empty store
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let records: Vec<ServerRecord> = serde_json::from_str(&content).with_context(
                    || format!("Failed to parse server store: {}", path.display()),
                )?;
                debug!("Loaded {} records from {}", records.len(), path.display());
                MemoryStore::from_records(records)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No server store at {}, starting empty", path.display());
                MemoryStore::new()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read server store: {}", path.display()));
            }
        };

        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes every record back to disk, creating parent directories
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create store directory: {}", parent.display())
            })?;
        }

        let records: Vec<&ServerRecord> = self.records.iter().collect();
        let content =
            serde_json::to_string_pretty(&records).context("Failed to serialize server store")?;

        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write server store: {}", self.path.display()))?;

        debug!("Saved {} records to {}", records.len(), self.path.display());
        Ok(())
    }
}

impl ServerStore for JsonFileStore {
    fn list(&self) -> Vec<ServerRecord> {
        self.records.list()
    }

    fn get(&self, id: &str) -> Option<&ServerRecord> {
        self.records.get(id)
    }

    fn upsert(&mut self, record: ServerRecord) -> bool {
        self.records.upsert(record)
    }

    fn delete(&mut self, id: &str) -> Option<ServerRecord> {
        self.records.delete(id)
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

// ============================================================================
// Ranking Results
// ============================================================================

/// Writes measured latencies into stored records. Returns how many records
/// were updated; results for ids no longer stored are skipped.
pub fn apply_latencies<S: ServerStore + ?Sized>(store: &mut S, ranked: &[RankedServer]) -> usize {
    let mut updated = 0;
    for entry in ranked {
        if let Some(existing) = store.get(&entry.record.id) {
            let mut record = existing.clone();
            record.latency = Some(entry.latency);
            store.upsert(record);
            updated += 1;
        }
    }
    debug!("Applied {} latency results", updated);
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Latency;
    use crate::record::{ProtocolSettings, TrojanParams};

    fn record(name: &str, host: &str) -> ServerRecord {
        ServerRecord::new(
            name,
            host,
            443,
            ProtocolSettings::Trojan(TrojanParams::new("secret")),
        )
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("waypoint-store-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_memory_store_crud() {
        let mut store = MemoryStore::new();
        let a = record("A", "a.example.com");
        let id = a.id.clone();

        assert!(store.upsert(a.clone()));
        assert!(!store.upsert(a.clone().with_favorite(true)));
        assert_eq!(store.len(), 1);
        assert!(store.get(&id).unwrap().favorite);

        assert_eq!(store.find("A").map(|r| r.id), Some(id.clone()));
        assert!(store.find("missing").is_none());

        assert!(store.delete(&id).is_some());
        assert!(store.is_empty());
        assert!(store.delete(&id).is_none());
    }

    #[test]
    fn test_apply_latencies() {
        let a = record("A", "a.example.com");
        let b = record("B", "b.example.com");
        let gone = record("Gone", "gone.example.com");
        let mut store = MemoryStore::from_records([a.clone(), b.clone()]);

        let ranked = vec![
            RankedServer {
                record: a.clone(),
                latency: Latency::Millis(12),
            },
            RankedServer {
                record: gone,
                latency: Latency::Millis(1),
            },
            RankedServer {
                record: b.clone(),
                latency: Latency::Failed,
            },
        ];

        assert_eq!(apply_latencies(&mut store, &ranked), 2);
        assert_eq!(store.get(&a.id).unwrap().latency, Some(Latency::Millis(12)));
        assert_eq!(store.get(&b.id).unwrap().latency, Some(Latency::Failed));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_json_store_missing_file_is_empty() {
        let store = JsonFileStore::open(temp_path("missing/servers.json"))
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_json_store_save_and_reload() {
        let path = temp_path("reload/servers.json");
        let _ = tokio::fs::remove_file(&path).await;

        let mut store = JsonFileStore::open(&path).await.unwrap();
        let a = record("A", "a.example.com").with_favorite(true);
        store.upsert(a.clone());
        store.upsert(record("B", "b.example.com"));
        store.save().await.unwrap();

        let reloaded = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(&a.id), Some(&a));

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_json_store_rejects_corrupt_file() {
        let path = temp_path("corrupt/servers.json");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "not json").await.unwrap();

        let err = JsonFileStore::open(&path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse server store"));

        let _ = tokio::fs::remove_file(&path).await;
    }
}
