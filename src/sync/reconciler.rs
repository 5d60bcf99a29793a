//! Local/remote reconciliation
//!
//! Local writes always complete first. The Pod is then brought in line with
//! a full-replace push; push failures never roll back the local write and
//! are reported through [`SyncEvent`].

use crate::error::{Error, Result};
use crate::solid::dpop::build_proof;
use crate::solid::pod::PodClient;
use crate::sync::local::WorkoutStore;
use crate::sync::media::MediaSource;
use crate::sync::remote::RemoteDataSource;
use crate::types::DedupToken;
use crate::workout::{sort_for_display, MediaReference, WorkoutRecord};
use futures::stream::BoxStream;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

const MEDIA_ACCEPT: &str = "image/*, */*;q=0.1";

/// Outcome of the most recent sync, for UI observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Nothing has synced yet
    Idle,
    /// The Pod now holds `count` records
    Synced {
        /// Records pushed
        count: usize,
    },
    /// A push to the Pod failed
    Failed {
        /// Human-readable error
        error: String,
        /// Distinguishes repeated failures so each is reported once
        token: DedupToken,
    },
}

/// Fetch request for a remote image, with DPoP headers attached
#[derive(Debug, Clone)]
pub struct MediaRequest {
    /// Absolute image URL
    pub url: String,
    /// `Authorization`, `DPoP` and `Accept`
    pub headers: HeaderMap,
}

/// Combine remote and local collections
///
/// One record per identity; on collision the remote copy wins because it
/// comes first.
pub fn merge(remote: Vec<WorkoutRecord>, local: Vec<WorkoutRecord>) -> Vec<WorkoutRecord> {
    let mut seen = HashSet::new();
    remote
        .into_iter()
        .chain(local)
        .filter(|record| seen.insert(record.id.clone()))
        .collect()
}

/// Absolute URL for a media reference, given the storage root
pub fn resolve_media_url(storage_root: Option<&str>, media_uri: &str) -> Option<String> {
    let media_uri = media_uri.trim();
    if media_uri.is_empty() {
        return None;
    }
    if media_uri.to_ascii_lowercase().starts_with("http") {
        return Some(media_uri.to_string());
    }

    let root = storage_root?;
    let separator = if root.ends_with('/') { "" } else { "/" };
    Some(format!(
        "{}{}{}",
        root,
        separator,
        media_uri.trim_start_matches('/')
    ))
}

/// Keeps the local store and the Pod document in step
pub struct SyncEngine {
    remote: RemoteDataSource,
    local: Arc<dyn WorkoutStore>,
    events: watch::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Create an engine over a Pod client, local store and media source
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        pod: Arc<PodClient>,
        local: Arc<dyn WorkoutStore>,
        media: Arc<dyn MediaSource>,
    ) -> Result<Self> {
        let (events, _) = watch::channel(SyncEvent::Idle);
        Ok(Self {
            remote: RemoteDataSource::new(pod, media)?,
            local,
            events,
        })
    }

    /// Remote data source
    pub fn remote(&self) -> &RemoteDataSource {
        &self.remote
    }

    /// Local store
    pub fn local(&self) -> &Arc<dyn WorkoutStore> {
        &self.local
    }

    /// Observe sync outcomes
    pub fn events(&self) -> watch::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Live local collection, newest first
    pub fn workouts(&self) -> BoxStream<'static, Vec<WorkoutRecord>> {
        self.local.all_as_stream()
    }

    /// Merge remote and local data for the signed-in identity
    ///
    /// Selects the identity's local collection, merges in the remote
    /// document, overwrites the local store with the result and pushes it
    /// back when the Pod is reachable. Returns the merged collection, newest
    /// first.
    pub async fn on_identity_changed(&self) -> Result<Vec<WorkoutRecord>> {
        let web_id = self.remote.pod().session().store().snapshot().web_id;
        if let Err(e) = self.local.switch_web_id(&web_id).await {
            tracing::warn!(error = %e, "Cannot select local collection, resetting");
            self.local.reset_all().await?;
        }

        let remote = if self.remote.remote_accessible() {
            self.remote.fetch_remote_item_list().await
        } else {
            Vec::new()
        };
        let local = self.local.all().await?;
        let remote_count = remote.len();
        let local_count = local.len();

        let mut merged = merge(remote, local);
        self.local.overwrite_all(&merged).await?;
        tracing::info!(
            remote = remote_count,
            local = local_count,
            merged = merged.len(),
            "Merged workouts"
        );

        if self.remote.remote_accessible() {
            let pushed = self.sanitize(merged).await;
            let result = self.remote.update_remote_item_list(&pushed).await;
            self.report(&result, pushed.len());
            merged = pushed;
        }

        sort_for_display(&mut merged);
        Ok(merged)
    }

    /// Save a new record locally, upload its media, then push
    pub async fn insert(&self, record: WorkoutRecord) -> Result<WorkoutRecord> {
        self.local.insert(&record).await?;
        let prepared = self.prepare_media(record).await;
        self.push_in_background().await;
        Ok(prepared)
    }

    /// Save changes to an existing record, upload its media, then push
    pub async fn update(&self, record: WorkoutRecord) -> Result<WorkoutRecord> {
        if record.id.trim().is_empty() {
            return Err(Error::InvalidInput("update called with blank id".into()));
        }
        self.local.update(&record).await?;
        let prepared = self.prepare_media(record).await;
        self.push_in_background().await;
        Ok(prepared)
    }

    /// Remove a record locally and push the remaining collection
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.local.delete(id).await?;
        let remaining = self.local.all().await?;
        let result = self.remote.update_remote_item_list(&remaining).await;
        if self.remote.remote_accessible() {
            self.report(&result, remaining.len());
        }
        if let Err(e) = result {
            tracing::warn!(id = %id, error = %e, "Delete not pushed to Pod");
        }
        Ok(())
    }

    /// Push the whole local collection to the Pod
    ///
    /// Uploads pending media first. Returns the number of records pushed,
    /// or zero when the Pod is not accessible.
    pub async fn push_local(&self) -> Result<usize> {
        if !self.remote.remote_accessible() {
            return Ok(0);
        }
        let latest = self.local.all().await?;
        let sanitized = self.sanitize(latest).await;

        let result = self.remote.update_remote_item_list(&sanitized).await;
        self.report(&result, sanitized.len());
        result.map(|_| sanitized.len())
    }

    /// Find a record locally, falling back to a fresh merge with the Pod
    pub async fn load_by_id(&self, id: &str) -> Result<Option<WorkoutRecord>> {
        if let Some(record) = self.local.get(id).await? {
            return Ok(Some(record));
        }
        if !self.remote.remote_accessible() {
            return Ok(None);
        }

        let remote = self.remote.fetch_remote_item_list().await;
        let local = self.local.all().await?;
        Ok(merge(remote, local).into_iter().find(|record| record.id == id))
    }

    /// Absolute URL of a record's media, if it can be resolved
    pub async fn resolve_media_url(&self, media_uri: &str) -> Option<String> {
        let root = self.cached_storage_root().await;
        resolve_media_url(root.as_deref(), media_uri)
    }

    /// Authorized request for fetching a remote image
    ///
    /// `None` for blank references and media that has not been uploaded.
    pub async fn authorized_media_request(&self, media_uri: &str) -> Result<Option<MediaRequest>> {
        match MediaReference::classify(media_uri) {
            MediaReference::Blank | MediaReference::LocalHandle(_) => return Ok(None),
            MediaReference::Remote(_) | MediaReference::PodRelative(_) => {}
        }

        let root = match self.cached_storage_root().await {
            Some(root) => Some(root),
            None => self.remote.storage_root().await.ok(),
        };
        let Some(url) = resolve_media_url(root.as_deref(), media_uri) else {
            return Ok(None);
        };

        let credentials = self.remote.pod().session().ensure_fresh().await?;
        let proof = build_proof(
            "GET",
            &url,
            &credentials.signer,
            Some(&credentials.access_token),
        )?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("DPoP {}", credentials.access_token))?,
        );
        headers.insert("dpop", header_value(&proof)?);
        headers.insert(ACCEPT, HeaderValue::from_static(MEDIA_ACCEPT));

        Ok(Some(MediaRequest { url, headers }))
    }

    async fn cached_storage_root(&self) -> Option<String> {
        let web_id = self.remote.pod().session().store().snapshot().web_id;
        self.remote.pod().cached_storage_root(&web_id).await
    }

    /// Upload media for one record, keeping the old reference on failure
    async fn prepare_media(&self, record: WorkoutRecord) -> WorkoutRecord {
        if !record.media().is_local() || !self.remote.remote_accessible() {
            return record;
        }

        let original = record.media_uri.clone();
        match self.remote.ensure_remote_media(record.clone()).await {
            Ok(prepared) => {
                if prepared.media_uri != original {
                    if let Err(e) = self.local.update(&prepared).await {
                        tracing::warn!(id = %prepared.id, error = %e, "Cannot store uploaded media reference");
                    }
                }
                prepared
            }
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "Media upload failed, will retry on next sync");
                record
            }
        }
    }

    async fn sanitize(&self, records: Vec<WorkoutRecord>) -> Vec<WorkoutRecord> {
        let mut sanitized = Vec::with_capacity(records.len());
        for record in records {
            sanitized.push(self.prepare_media(record).await);
        }
        sanitized
    }

    async fn push_in_background(&self) {
        if let Err(e) = self.push_local().await {
            tracing::warn!(error = %e, "Push to Pod failed, local copy kept");
        }
    }

    fn report(&self, result: &Result<()>, count: usize) {
        let event = match result {
            Ok(()) => SyncEvent::Synced { count },
            Err(e) => SyncEvent::Failed {
                error: e.to_string(),
                token: DedupToken::new(),
            },
        };
        self.events.send_replace(event);
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::InvalidInput(format!("invalid header value: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str) -> WorkoutRecord {
        let mut record = WorkoutRecord::new(name, 1);
        record.id = id.to_string();
        record
    }

    #[test]
    fn test_merge_remote_wins() {
        let remote = vec![record("a", "remote a"), record("b", "remote b")];
        let local = vec![record("b", "local b"), record("c", "local c")];

        let merged = merge(remote, local);
        let names: Vec<_> = merged.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["remote a", "remote b", "local c"]);
    }

    #[test]
    fn test_merge_dedups_within_one_side() {
        let merged = merge(vec![], vec![record("a", "first"), record("a", "second")]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "first");
    }

    #[test]
    fn test_resolve_media_url() {
        assert_eq!(resolve_media_url(Some("https://pod/"), "  "), None);
        assert_eq!(
            resolve_media_url(None, "https://cdn.example/a.png").as_deref(),
            Some("https://cdn.example/a.png")
        );
        assert_eq!(
            resolve_media_url(Some("https://pod/"), "/Images/a.png").as_deref(),
            Some("https://pod/Images/a.png")
        );
        assert_eq!(
            resolve_media_url(Some("https://pod"), "Images/a.png").as_deref(),
            Some("https://pod/Images/a.png")
        );
        assert_eq!(resolve_media_url(None, "Images/a.png"), None);
    }

    #[test]
    fn test_failed_events_are_distinct() {
        let a = SyncEvent::Failed {
            error: "boom".into(),
            token: DedupToken::new(),
        };
        let b = SyncEvent::Failed {
            error: "boom".into(),
            token: DedupToken::new(),
        };
        assert_ne!(a, b);
    }
}
