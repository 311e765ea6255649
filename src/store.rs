//! Durable document snapshots, one JSON file per document id.
//!
//! Writes go through a temp file and an atomic rename so concurrent readers
//! never observe a torn snapshot. Corrupt or empty snapshots are reported as
//! absent; the caller creates a fresh record rather than guessing content.

use crate::document::{Document, PersistedDocument, Presence};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid document id: {0}")]
    InvalidId(String),
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Filesystem-backed snapshot store rooted at one directory.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        // Ids are uuids in practice; refuse anything that could escape the
        // store directory.
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    /// Read the snapshot for `id`. `Ok(None)` means no usable record exists:
    /// missing, empty, or unparsable files all land here.
    pub async fn load(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let path = self.snapshot_path(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            warn!(doc_id = %id, "empty snapshot, treating as absent");
            return Ok(None);
        }
        match serde_json::from_slice::<PersistedDocument>(&bytes) {
            Ok(persisted) => Ok(Some(persisted.into_document())),
            Err(e) => {
                warn!(doc_id = %id, error = %e, "corrupt snapshot, treating as absent");
                Ok(None)
            }
        }
    }

    /// Write a snapshot atomically: temp file, flush to disk, rename over the
    /// final path. A failed write removes the temp file best-effort.
    pub async fn save(
        &self,
        doc: &Document,
        active_users: HashMap<String, Presence>,
    ) -> Result<(), StoreError> {
        let path = self.snapshot_path(&doc.id)?;
        let tmp_path = self.dir.join(format!("{}.json.tmp", doc.id));

        let persisted = PersistedDocument::from_document(doc, active_users);
        let json = serde_json::to_vec_pretty(&persisted)?;

        let result = write_and_rename(&tmp_path, &path, &json).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        result?;

        debug!(doc_id = %doc.id, version = doc.version, "snapshot saved");
        Ok(())
    }

    /// Allocate an id, build an empty document, and persist it.
    pub async fn create(&self, title: &str, user_id: &str) -> Result<Document, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let doc = Document::new(&id, title, user_id);
        self.save(&doc, HashMap::new()).await?;
        Ok(doc)
    }
}

async fn write_and_rename(
    tmp_path: &Path,
    path: &Path,
    bytes: &[u8],
) -> Result<(), std::io::Error> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp_path, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (SnapshotStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let (store, _dir) = temp_store().await;

        let mut doc = store.create("Notes", "alice").await.unwrap();
        doc.content = "hello".to_string();
        doc.version = 3;
        doc.metadata.refresh_counts(&doc.content);
        store.save(&doc, HashMap::new()).await.unwrap();

        let loaded = store.load(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, "hello");
        assert_eq!(loaded.version, 3);
        assert_eq!(loaded.title, "Notes");
        assert_eq!(loaded.metadata.created_by, "alice");
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let (store, _dir) = temp_store().await;
        assert!(store.load("no-such-doc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_absent() {
        let (store, dir) = temp_store().await;
        tokio::fs::write(dir.path().join("broken.json"), b"{not json")
            .await
            .unwrap();
        assert!(store.load("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_snapshot_is_absent() {
        let (store, dir) = temp_store().await;
        tokio::fs::write(dir.path().join("empty.json"), b"")
            .await
            .unwrap();
        assert!(store.load("empty").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file() {
        let (store, dir) = temp_store().await;
        let doc = store.create("t", "u").await.unwrap();
        let tmp = dir.path().join(format!("{}.json.tmp", doc.id));
        assert!(!tmp.exists());
        assert!(dir.path().join(format!("{}.json", doc.id)).exists());
    }

    #[tokio::test]
    async fn rejects_path_traversal_ids() {
        let (store, _dir) = temp_store().await;
        assert!(matches!(
            store.load("../../etc/passwd").await,
            Err(StoreError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn presence_is_not_restored_on_load() {
        let (store, _dir) = temp_store().await;
        let doc = store.create("t", "u").await.unwrap();

        let mut users = HashMap::new();
        users.insert(
            "sess-1".to_string(),
            crate::document::Presence::new(&crate::document::UserInfo::default(), 1),
        );
        store.save(&doc, users).await.unwrap();

        // The Document view carries no presence; it lives only in the engine.
        let loaded = store.load(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, doc.id);
    }
}
