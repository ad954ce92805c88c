//! Durable queue of training samples awaiting curation.
//!
//! The in-memory list is what readers see; `queue.json` in the queue
//! directory only exists so the list survives restarts. Every append
//! rewrites the whole file (via a temp file and a rename) while holding the
//! list lock, so there is a single writer and the list only changes once the
//! file does. Images live next to it as `<id>.png`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;
use uuid::Uuid;

use crate::web::error::QueueError;
use crate::{sys_error, sys_info};

const QUEUE_FILE: &str = "queue.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingQueueItem {
    pub id: Uuid,
    pub class: String,
}

pub type SharedTrainingQueue = Arc<TrainingQueueStore>;

pub struct TrainingQueueStore {
    dir: PathBuf,
    items: TokioMutex<Vec<TrainingQueueItem>>,
}

impl TrainingQueueStore {
    /// Load the queue from `dir`, creating the directory and an empty
    /// `queue.json` if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(QUEUE_FILE);

        let items = if path.exists() {
            let raw = std::fs::read(&path)?;
            serde_json::from_slice(&raw).map_err(|source| QueueError::Corrupt {
                path: path.display().to_string(),
                source,
            })?
        } else {
            let empty = Vec::new();
            std::fs::write(&path, encode(&empty)?)?;
            empty
        };

        sys_info!(
            "[QUEUE] Loaded {} training item(s) from {}",
            items.len(),
            path.display()
        );
        Ok(Self {
            dir,
            items: TokioMutex::new(items),
        })
    }

    /// Queue a new sample under a fresh id.
    pub async fn append(&self, class: &str) -> Result<TrainingQueueItem, QueueError> {
        let item = TrainingQueueItem {
            id: Uuid::new_v4(),
            class: class.to_string(),
        };

        let mut items = self.items.lock().await;
        items.push(item.clone());
        if let Err(e) = persist(&self.queue_file(), &items).await {
            items.pop();
            sys_error!("[QUEUE] Failed to persist training queue: {e}");
            return Err(e);
        }
        sys_info!("[QUEUE] Queued {} as {:?}", item.id, item.class);
        Ok(item)
    }

    pub async fn list(&self) -> Vec<TrainingQueueItem> {
        self.items.lock().await.clone()
    }

    pub async fn get(&self, id: &Uuid) -> Option<TrainingQueueItem> {
        self.items
            .lock()
            .await
            .iter()
            .find(|item| item.id == *id)
            .cloned()
    }

    /// Where the image for `id` is (or would be) stored.
    pub fn image_path(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.png"))
    }

    pub fn queue_file(&self) -> PathBuf {
        self.dir.join(QUEUE_FILE)
    }
}

fn encode(items: &[TrainingQueueItem]) -> Result<Vec<u8>, QueueError> {
    serde_json::to_vec_pretty(items).map_err(QueueError::Serialize)
}

async fn persist(path: &Path, items: &[TrainingQueueItem]) -> Result<(), QueueError> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, encode(items)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("xray-queue-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_open_initializes_empty_queue() {
        let dir = temp_dir();
        let store = TrainingQueueStore::open(&dir).unwrap();
        assert!(store.list().await.is_empty());
        let raw = std::fs::read_to_string(store.queue_file()).unwrap();
        let parsed: Vec<TrainingQueueItem> = serde_json::from_str(&raw).unwrap();
        assert!(parsed.is_empty());
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_append_is_visible_and_survives_restart() {
        let dir = temp_dir();
        let store = TrainingQueueStore::open(&dir).unwrap();

        let covid = store.append("COVID-19").await.unwrap();
        let healthy = store.append("NO FINDING").await.unwrap();
        assert_ne!(covid.id, healthy.id);
        assert_eq!(store.list().await, vec![covid.clone(), healthy.clone()]);
        assert_eq!(store.get(&covid.id).await, Some(covid.clone()));

        drop(store);
        let reloaded = TrainingQueueStore::open(&dir).unwrap();
        assert_eq!(reloaded.list().await, vec![covid, healthy]);
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_persisted_format_is_id_and_class() {
        let dir = temp_dir();
        let store = TrainingQueueStore::open(&dir).unwrap();
        let item = store.append("COVID-19").await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.queue_file()).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!([{ "id": item.id.to_string(), "class": "COVID-19" }])
        );
        assert_eq!(store.image_path(&item.id), dir.join(format!("{}.png", item.id)));
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_unknown_id_is_none() {
        let dir = temp_dir();
        let store = TrainingQueueStore::open(&dir).unwrap();
        assert!(store.get(&Uuid::new_v4()).await.is_none());
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_failed_persist_is_not_committed() {
        let dir = temp_dir();
        let store = TrainingQueueStore::open(&dir).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(store.append("COVID-19").await.is_err());
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_persisted() {
        let dir = temp_dir();
        let store = Arc::new(TrainingQueueStore::open(&dir).unwrap());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.append(&format!("class-{i}")).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let reloaded = TrainingQueueStore::open(&dir).unwrap();
        assert_eq!(reloaded.list().await.len(), 16);
        assert_eq!(reloaded.list().await, store.list().await);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(QUEUE_FILE), b"{not json").unwrap();
        assert!(matches!(
            TrainingQueueStore::open(&dir),
            Err(QueueError::Corrupt { .. })
        ));
        std::fs::remove_dir_all(dir).ok();
    }
}
