//! Persistent state on cnidarium: tracked items, fetch cursors, retained
//! items and the seen-identity set. Everything a run changes lands in one
//! [`RunCommit`], applied as a single delta.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{IdentityKey, RetainedItem, TrackedItem};

// Key prefixes (no trailing slashes, cnidarium convention)
const TRACKED_PREFIX: &str = "tracked";
const CURSOR_PREFIX: &str = "cursor";
const ITEM_PREFIX: &str = "item";
const SEEN_PREFIX: &str = "seen";

fn tracked_key(id: &str) -> String {
    format!("{}/{}", TRACKED_PREFIX, id)
}
fn cursor_key(id: &str, source: &str) -> String {
    format!("{}/{}/{}", CURSOR_PREFIX, id, source)
}
fn item_key(id: &str, identity: &IdentityKey) -> String {
    format!("{}/{}/{}", ITEM_PREFIX, id, identity.digest())
}
fn seen_key(id: &str, identity: &IdentityKey) -> String {
    format!("{}/{}/{}", SEEN_PREFIX, id, identity.digest())
}

/// Everything one successful run persists.
#[derive(Debug, Clone)]
pub struct RunCommit {
    pub tracked: TrackedItem,
    /// Staged cursor advances; applied as `max(stored, staged)`.
    pub cursors: BTreeMap<String, DateTime<Utc>>,
    /// Newly accepted items with their placements.
    pub items: Vec<RetainedItem>,
    /// Identities classified as duplicates.
    pub seen: Vec<IdentityKey>,
}

impl RunCommit {
    pub fn new(tracked: TrackedItem) -> Self {
        Self {
            tracked,
            cursors: BTreeMap::new(),
            items: Vec::new(),
            seen: Vec::new(),
        }
    }
}

pub struct ContextStore {
    storage: Storage,
    /// Serializes snapshot → delta → commit.
    commit_lock: Mutex<()>,
}

impl ContextStore {
    pub async fn open(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let prefixes = vec![
            TRACKED_PREFIX.to_string(),
            CURSOR_PREFIX.to_string(),
            ITEM_PREFIX.to_string(),
            SEEN_PREFIX.to_string(),
        ];
        let storage = Storage::load(state_dir.to_path_buf(), prefixes)
            .await
            .map_err(Error::storage)?;
        Ok(Self {
            storage,
            commit_lock: Mutex::new(()),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let snapshot = self.storage.latest_snapshot();
        let bytes = snapshot.get_raw(key).await.map_err(Error::storage)?;
        bytes.map(|b| serde_json::from_slice(&b)).transpose().map_err(Error::from)
    }

    /// Decode every value under `prefix`; undecodable entries are logged and skipped.
    async fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        let snapshot = self.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(prefix);
        let mut out = Vec::new();
        while let Some(entry) = stream.next().await {
            let (key, value) = entry.map_err(Error::storage)?;
            match serde_json::from_slice(&value) {
                Ok(decoded) => out.push((key, decoded)),
                Err(e) => warn!(%key, error = %e, "skipping undecodable record"),
            }
        }
        Ok(out)
    }

    pub async fn tracked(&self, id: &str) -> Result<Option<TrackedItem>> {
        self.get_json(&tracked_key(id)).await
    }

    /// All tracked items, ordered by id.
    pub async fn list_tracked(&self) -> Result<Vec<TrackedItem>> {
        let mut items: Vec<TrackedItem> = self
            .scan(&format!("{}/", TRACKED_PREFIX))
            .await?
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    pub async fn cursor(&self, id: &str, source: &str) -> Result<Option<DateTime<Utc>>> {
        self.get_json(&cursor_key(id, source)).await
    }

    /// Committed cursors of one tracked item, by source name.
    pub async fn cursors(&self, id: &str) -> Result<BTreeMap<String, DateTime<Utc>>> {
        let prefix = format!("{}/{}/", CURSOR_PREFIX, id);
        Ok(self
            .scan::<DateTime<Utc>>(&prefix)
            .await?
            .into_iter()
            .filter_map(|(key, ts)| key.strip_prefix(&prefix).map(|s| (s.to_string(), ts)))
            .collect())
    }

    /// Retained items of one tracked item, in storage order.
    pub async fn retained(&self, id: &str) -> Result<Vec<RetainedItem>> {
        Ok(self
            .scan(&format!("{}/{}/", ITEM_PREFIX, id))
            .await?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    /// Identities recorded as duplicates for one tracked item.
    pub async fn seen(&self, id: &str) -> Result<HashSet<IdentityKey>> {
        Ok(self
            .scan(&format!("{}/{}/", SEEN_PREFIX, id))
            .await?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    /// Apply a run's changes atomically. Cursors never move backwards.
    pub async fn commit(&self, batch: &RunCommit) -> Result<()> {
        let _guard = self.commit_lock.lock().await;
        let snapshot = self.storage.latest_snapshot();
        let id = &batch.tracked.id;

        let mut cursor_writes = Vec::with_capacity(batch.cursors.len());
        for (source, staged) in &batch.cursors {
            let key = cursor_key(id, source);
            let stored: Option<DateTime<Utc>> = snapshot
                .get_raw(&key)
                .await
                .map_err(Error::storage)?
                .map(|b| serde_json::from_slice(&b))
                .transpose()?;
            let value = stored.map_or(*staged, |s| s.max(*staged));
            cursor_writes.push((key, serde_json::to_vec(&value)?));
        }

        let mut delta = StateDelta::new(snapshot);
        delta.put_raw(tracked_key(id), serde_json::to_vec(&batch.tracked)?);
        for (key, value) in cursor_writes {
            delta.put_raw(key, value);
        }
        for retained in &batch.items {
            delta.put_raw(
                item_key(id, &retained.item.identity()),
                serde_json::to_vec(retained)?,
            );
        }
        for identity in &batch.seen {
            delta.put_raw(seen_key(id, identity), serde_json::to_vec(identity)?);
        }

        self.storage.commit(delta).await.map_err(Error::storage)?;
        debug!(
            item = %id,
            cursors = batch.cursors.len(),
            items = batch.items.len(),
            seen = batch.seen.len(),
            "run committed"
        );
        Ok(())
    }

    /// Drop a tracked item and everything recorded for it.
    pub async fn forget(&self, id: &str) -> Result<bool> {
        let _guard = self.commit_lock.lock().await;
        let snapshot = self.storage.latest_snapshot();
        if snapshot
            .get_raw(&tracked_key(id))
            .await
            .map_err(Error::storage)?
            .is_none()
        {
            return Ok(false);
        }

        let mut keys = vec![tracked_key(id)];
        for prefix in [CURSOR_PREFIX, ITEM_PREFIX, SEEN_PREFIX] {
            let mut stream = snapshot.prefix_raw(&format!("{}/{}/", prefix, id));
            while let Some(entry) = stream.next().await {
                let (key, _) = entry.map_err(Error::storage)?;
                keys.push(key);
            }
        }

        let mut delta = StateDelta::new(snapshot);
        for key in keys {
            delta.delete(key);
        }
        self.storage.commit(delta).await.map_err(Error::storage)?;
        debug!(item = %id, "tracked item forgotten");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{item, ts};
    use crate::types::{ItemKind, Placement};

    async fn open() -> (tempfile::TempDir, ContextStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    fn retained(source: &str, kind: ItemKind, id: &str, at: i64) -> RetainedItem {
        let item = item(source, kind, id, "title", "body", at);
        let anchor = item.identity();
        RetainedItem {
            item,
            hop: 1,
            placement: Placement {
                topic: kind.default_topic().to_string(),
                anchor,
            },
            parent: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_commit_and_read_back() {
        let (_dir, store) = open().await;
        let tracked = TrackedItem::new("T-1", "jira", vec![], ts(0));
        let mut batch = RunCommit::new(tracked.clone());
        batch.cursors.insert("slack".into(), ts(50));
        batch.items.push(retained("slack", ItemKind::Message, "C1:1", 50));
        batch.seen.push(IdentityKey::new("github", ItemKind::Review, "9"));
        store.commit(&batch).await.unwrap();

        assert_eq!(store.tracked("T-1").await.unwrap(), Some(tracked));
        assert_eq!(store.cursor("T-1", "slack").await.unwrap(), Some(ts(50)));
        assert_eq!(store.cursor("T-1", "jira").await.unwrap(), None);
        assert_eq!(store.retained("T-1").await.unwrap().len(), 1);
        assert!(store
            .seen("T-1")
            .await
            .unwrap()
            .contains(&IdentityKey::new("github", ItemKind::Review, "9")));
        assert_eq!(store.list_tracked().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cursor_never_moves_backwards() {
        let (_dir, store) = open().await;
        let tracked = TrackedItem::new("T-1", "jira", vec![], ts(0));
        let mut batch = RunCommit::new(tracked.clone());
        batch.cursors.insert("slack".into(), ts(100));
        store.commit(&batch).await.unwrap();

        let mut batch = RunCommit::new(tracked);
        batch.cursors.insert("slack".into(), ts(40));
        store.commit(&batch).await.unwrap();
        assert_eq!(store.cursor("T-1", "slack").await.unwrap(), Some(ts(100)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_items_scoped_per_tracked_item() {
        let (_dir, store) = open().await;
        for id in ["T-1", "T-10"] {
            let mut batch = RunCommit::new(TrackedItem::new(id, "jira", vec![], ts(0)));
            batch.items.push(retained("jira", ItemKind::Ticket, id, 1));
            batch.cursors.insert("jira".into(), ts(1));
            store.commit(&batch).await.unwrap();
        }
        assert_eq!(store.retained("T-1").await.unwrap().len(), 1);
        assert_eq!(store.cursors("T-1").await.unwrap().len(), 1);

        assert!(store.forget("T-1").await.unwrap());
        assert!(store.tracked("T-1").await.unwrap().is_none());
        assert!(store.retained("T-1").await.unwrap().is_empty());
        assert_eq!(store.retained("T-10").await.unwrap().len(), 1);
        assert!(!store.forget("T-1").await.unwrap());
    }
}
