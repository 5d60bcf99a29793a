//! Remote workout document on the Pod
//!
//! The last fetched or pushed collection is kept by a small actor task so a
//! fetch and an update never interleave on the snapshot. Reads fall back to
//! that snapshot whenever the Pod cannot be reached.

use crate::error::{Error, Result};
use crate::rdf::{serialize_workouts, RdfDocument};
use crate::solid::pod::PodClient;
use crate::sync::media::MediaSource;
use crate::workout::{MediaReference, WorkoutRecord};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

const CACHE_QUEUE_CAPACITY: usize = 16;

enum CacheCommand {
    Get(oneshot::Sender<Vec<WorkoutRecord>>),
    Set(Vec<WorkoutRecord>, oneshot::Sender<()>),
}

/// Handle to the snapshot actor
#[derive(Clone)]
pub struct SnapshotCache {
    sender: mpsc::Sender<CacheCommand>,
}

impl SnapshotCache {
    /// Spawn the owning task; it exits when the last handle is dropped
    ///
    /// Fails with [`Error::Config`] when called outside a Tokio runtime.
    pub fn spawn() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::config(format!("snapshot cache needs a Tokio runtime: {}", e)))?;
        let (sender, mut receiver) = mpsc::channel(CACHE_QUEUE_CAPACITY);

        runtime.spawn(async move {
            let mut latest: Vec<WorkoutRecord> = Vec::new();
            while let Some(command) = receiver.recv().await {
                match command {
                    CacheCommand::Get(reply) => {
                        let _ = reply.send(latest.clone());
                    }
                    CacheCommand::Set(records, reply) => {
                        latest = records;
                        let _ = reply.send(());
                    }
                }
            }
        });

        Ok(Self { sender })
    }

    /// Current snapshot; empty if the actor is gone
    pub async fn get(&self) -> Vec<WorkoutRecord> {
        let (reply, rx) = oneshot::channel();
        if self.sender.send(CacheCommand::Get(reply)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Replace the snapshot
    pub async fn set(&self, records: Vec<WorkoutRecord>) {
        let (reply, rx) = oneshot::channel();
        if self.sender.send(CacheCommand::Set(records, reply)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Reads and writes the application's workout document
pub struct RemoteDataSource {
    pod: Arc<PodClient>,
    media: Arc<dyn MediaSource>,
    cache: SnapshotCache,
}

impl RemoteDataSource {
    /// Create a data source over `pod`, reading local media through `media`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(pod: Arc<PodClient>, media: Arc<dyn MediaSource>) -> Result<Self> {
        Ok(Self {
            pod,
            media,
            cache: SnapshotCache::spawn()?,
        })
    }

    /// The Pod client
    pub fn pod(&self) -> &Arc<PodClient> {
        &self.pod
    }

    /// Whether the stored session can be used for Pod requests right now
    ///
    /// Applies the same expiry skew as every other validity check.
    pub fn remote_accessible(&self) -> bool {
        self.pod.session().is_valid()
    }

    /// Storage root of the signed-in user
    pub async fn storage_root(&self) -> Result<String> {
        let web_id = self.pod.session().store().snapshot().web_id;
        if web_id.is_empty() {
            return Err(Error::not_authenticated("no web id"));
        }
        self.pod.storage_root(&web_id).await
    }

    /// URL of the workout document
    pub async fn resource_url(&self) -> Result<String> {
        let root = self.storage_root().await?;
        let app_path = &self.pod.session().config().app_path;
        Ok(format!("{}{}", root, app_path.trim_start_matches('/')))
    }

    /// Fetch the remote collection
    ///
    /// Never fails: when the Pod is inaccessible, answers with an error
    /// status, or cannot be parsed, the last snapshot is returned instead.
    pub async fn fetch_remote_item_list(&self) -> Vec<WorkoutRecord> {
        if !self.remote_accessible() {
            tracing::debug!("Remote not accessible, serving cached workouts");
            return self.cache.get().await;
        }

        match self.try_fetch().await {
            Ok(Some(records)) => {
                tracing::debug!(count = records.len(), "Fetched remote workouts");
                self.cache.set(records.clone()).await;
                records
            }
            Ok(None) => self.cache.get().await,
            Err(e) => {
                tracing::warn!(error = %e, "Remote fetch failed, serving cached workouts");
                self.cache.get().await
            }
        }
    }

    async fn try_fetch(&self) -> Result<Option<Vec<WorkoutRecord>>> {
        let url = self.resource_url().await?;
        let response = self.pod.get_turtle(&url).await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, url = %url, "Remote fetch returned error status");
            return Ok(None);
        }

        let body = response.bytes().await?;
        let namespace = &self.pod.session().config().namespace;
        let records = RdfDocument::parse_turtle(&body, &url)?.workouts(namespace)?;
        Ok(Some(records))
    }

    /// Replace the remote collection with `records`
    ///
    /// The snapshot is always updated. The PUT replaces the whole document,
    /// so records missing from `records` are deleted remotely; a failed PUT
    /// is returned to the caller.
    pub async fn update_remote_item_list(&self, records: &[WorkoutRecord]) -> Result<()> {
        self.cache.set(records.to_vec()).await;

        if !self.remote_accessible() {
            tracing::debug!("Remote not accessible, skipping push");
            return Ok(());
        }

        let url = self.resource_url().await?;
        let namespace = &self.pod.session().config().namespace;
        let body = serialize_workouts(records, &url, namespace)?;
        self.pod.put_turtle(&url, body).await?;

        tracing::info!(count = records.len(), "Pushed workouts to Pod");
        Ok(())
    }

    /// Upload local media and point the record at the uploaded copy
    ///
    /// Records without a local handle are returned unchanged.
    pub async fn ensure_remote_media(&self, record: WorkoutRecord) -> Result<WorkoutRecord> {
        let handle = match record.media() {
            MediaReference::LocalHandle(handle) => Some(handle.to_string()),
            _ => None,
        };
        let Some(handle) = handle else {
            return Ok(record);
        };

        let blob = self.media.read(&handle).await?;
        let images_path = directory(&self.pod.session().config().images_path);
        let container = format!("{}{}", self.storage_root().await?, images_path);
        self.pod.ensure_container(&container).await?;

        let file_name = format!("{}.{}", media_base_name(&record.id), blob.extension());
        let target = format!("{}{}", container, file_name);
        self.pod.put_bytes(&target, blob.bytes, &blob.mime).await?;
        tracing::info!(id = %record.id, target = %target, "Uploaded workout media");

        Ok(WorkoutRecord {
            media_uri: format!("{}{}", images_path, file_name),
            ..record
        })
    }
}

/// Relative directory path without a leading and with a trailing `/`
fn directory(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Identity fragment used as the uploaded file's base name
fn media_base_name(id: &str) -> String {
    let fragment = id.rsplit_once('#').map_or(id, |(_, fragment)| fragment);
    if fragment.trim().is_empty() {
        Uuid::new_v4().to_string()
    } else {
        fragment.to_string()
    }
}
