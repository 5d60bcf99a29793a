//! Local workout store
//!
//! One sled tree per WebID, values as JSON. The current collection is
//! mirrored in a watch channel so `all_as_stream` observers see every
//! committed write.

use crate::error::{Error, Result};
use crate::workout::{sort_for_display, WorkoutRecord};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};

const DEFAULT_TREE: &str = "workouts";

/// Persistent collection of workout records
#[async_trait]
pub trait WorkoutStore: Send + Sync {
    /// Live collection, newest first; yields the current value immediately
    fn all_as_stream(&self) -> BoxStream<'static, Vec<WorkoutRecord>>;

    /// Current collection, newest first
    async fn all(&self) -> Result<Vec<WorkoutRecord>>;

    /// Point lookup by identity
    async fn get(&self, id: &str) -> Result<Option<WorkoutRecord>>;

    /// Insert or replace a record
    async fn insert(&self, record: &WorkoutRecord) -> Result<()>;

    /// Replace an existing record; fails with [`Error::NotFound`] otherwise
    async fn update(&self, record: &WorkoutRecord) -> Result<()>;

    /// Remove a record; unknown ids are ignored
    async fn delete(&self, id: &str) -> Result<()>;

    /// Remove every record
    async fn reset_all(&self) -> Result<()>;

    /// Replace the whole collection atomically
    async fn overwrite_all(&self, records: &[WorkoutRecord]) -> Result<()>;

    /// Select the collection belonging to `web_id`
    async fn switch_web_id(&self, web_id: &str) -> Result<()>;
}

/// [`WorkoutStore`] backed by sled
pub struct SledWorkoutStore {
    db: sled::Db,
    tree: RwLock<sled::Tree>,
    state: Arc<watch::Sender<Vec<WorkoutRecord>>>,
    write_lock: Mutex<()>,
}

impl SledWorkoutStore {
    /// Open or create the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Throwaway store, deleted on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    /// Use an already-open database
    pub fn from_db(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree(DEFAULT_TREE)?;
        let records = load_tree(&tree)?;
        let (state, _) = watch::channel(records);
        Ok(Self {
            db,
            tree: RwLock::new(tree),
            state: Arc::new(state),
            write_lock: Mutex::new(()),
        })
    }

    fn publish(&self, tree: &sled::Tree) -> Result<()> {
        let records = load_tree(tree)?;
        self.state.send_replace(records);
        Ok(())
    }
}

fn tree_name(web_id: &str) -> String {
    if web_id.is_empty() {
        DEFAULT_TREE.to_string()
    } else {
        format!("{}/{}", DEFAULT_TREE, web_id)
    }
}

fn load_tree(tree: &sled::Tree) -> Result<Vec<WorkoutRecord>> {
    let mut records = Vec::new();
    for entry in tree.iter() {
        let (key, value) = entry?;
        match serde_json::from_slice::<WorkoutRecord>(&value) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(
                key = %String::from_utf8_lossy(&key),
                error = %e,
                "Skipping unreadable workout"
            ),
        }
    }
    sort_for_display(&mut records);
    Ok(records)
}

#[async_trait]
impl WorkoutStore for SledWorkoutStore {
    fn all_as_stream(&self) -> BoxStream<'static, Vec<WorkoutRecord>> {
        let mut rx = self.state.subscribe();
        async_stream::stream! {
            loop {
                let records = rx.borrow_and_update().clone();
                yield records;
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
        .boxed()
    }

    async fn all(&self) -> Result<Vec<WorkoutRecord>> {
        Ok(self.state.borrow().clone())
    }

    async fn get(&self, id: &str) -> Result<Option<WorkoutRecord>> {
        let tree = self.tree.read().await;
        match tree.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, record: &WorkoutRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let tree = self.tree.read().await;

        tree.insert(record.id.as_bytes(), serde_json::to_vec(record)?)?;
        tree.flush_async().await?;
        self.publish(&tree)
    }

    async fn update(&self, record: &WorkoutRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let tree = self.tree.read().await;

        if !tree.contains_key(record.id.as_bytes())? {
            return Err(Error::NotFound(record.id.clone()));
        }
        tree.insert(record.id.as_bytes(), serde_json::to_vec(record)?)?;
        tree.flush_async().await?;
        self.publish(&tree)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let tree = self.tree.read().await;

        tree.remove(id.as_bytes())?;
        tree.flush_async().await?;
        self.publish(&tree)
    }

    async fn reset_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let tree = self.tree.read().await;

        tree.clear()?;
        tree.flush_async().await?;
        self.publish(&tree)
    }

    async fn overwrite_all(&self, records: &[WorkoutRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let tree = self.tree.read().await;

        let mut batch = sled::Batch::default();
        for key in tree.iter().keys() {
            batch.remove(key?);
        }
        for record in records {
            batch.insert(record.id.as_bytes(), serde_json::to_vec(record)?);
        }
        tree.apply_batch(batch)?;
        tree.flush_async().await?;

        tracing::debug!(count = records.len(), "Overwrote local workouts");
        self.publish(&tree)
    }

    async fn switch_web_id(&self, web_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let next = self.db.open_tree(tree_name(web_id))?;
        self.publish(&next)?;
        *self.tree.write().await = next;
        Ok(())
    }
}
