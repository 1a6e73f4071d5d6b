use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::links::{LinkStore, StoreError, NOTIFICATIONS_KEY, NOTIFICATIONS_TREE};

/// bounded FIFO of link-regeneration notices surfaced through
/// `GET /api/notifications`. Oldest entries fall off once the cap is hit —
/// this is a dashboard feed, not an audit log.
pub const NOTIFICATION_CAP: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub link_id: String,
    pub reason: String,
    pub issued_at_unix: u64,
}

/// the third persisted record (§6): written after every push so a restart
/// doesn't lose the feed, sharing the same encrypted-at-rest store as
/// `links`/`nftLinks` rather than a store of its own.
pub struct NotificationLog {
    entries: RwLock<VecDeque<Notification>>,
    store: Arc<LinkStore>,
}

impl NotificationLog {
    pub fn open(store: Arc<LinkStore>) -> Result<Self, StoreError> {
        let entries = store
            .load_blob::<Vec<Notification>>(NOTIFICATIONS_TREE, NOTIFICATIONS_KEY)?
            .unwrap_or_default();

        Ok(Self {
            entries: RwLock::new(entries.into()),
            store,
        })
    }

    pub async fn push(&self, link_id: String, reason: String, issued_at_unix: u64) {
        let mut entries = self.entries.write().await;
        if entries.len() == NOTIFICATION_CAP {
            entries.pop_front();
        }
        entries.push_back(Notification {
            link_id,
            reason,
            issued_at_unix,
        });

        let snapshot: Vec<Notification> = entries.iter().cloned().collect();
        drop(entries);
        if let Err(e) = self.store.save_blob(NOTIFICATIONS_TREE, NOTIFICATIONS_KEY, &snapshot) {
            log::warn!("failed to persist notification log: {e}");
        }
    }

    pub async fn recent(&self) -> Vec<Notification> {
        self.entries.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Arc<LinkStore> {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LinkStore::open(dir.path(), &[9u8; 32]).expect("store opens");
        std::mem::forget(dir); // keep the directory around for the life of the test process
        Arc::new(store)
    }

    #[tokio::test]
    async fn drops_oldest_past_capacity() {
        let log = NotificationLog::open(test_store()).unwrap();
        for i in 0..NOTIFICATION_CAP + 5 {
            log.push(format!("link-{i}"), "regenerated".to_string(), i as u64).await;
        }

        let recent = log.recent().await;
        assert_eq!(recent.len(), NOTIFICATION_CAP);
        assert_eq!(recent.first().unwrap().link_id, "link-5");
        assert_eq!(recent.last().unwrap().link_id, format!("link-{}", NOTIFICATION_CAP + 4));
    }

    #[tokio::test]
    async fn reopening_the_store_restores_the_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = Arc::new(LinkStore::open(dir.path(), &[9u8; 32]).expect("store opens"));
            let log = NotificationLog::open(store).unwrap();
            log.push("L1".to_string(), "regenerated:expired".to_string(), 1).await;
        }

        let reopened = Arc::new(LinkStore::open(dir.path(), &[9u8; 32]).expect("store reopens"));
        let log = NotificationLog::open(reopened).unwrap();
        let recent = log.recent().await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].link_id, "L1");
    }
}
