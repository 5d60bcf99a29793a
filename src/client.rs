//! Top-level handle wiring the session, Pod client and sync engine together

use crate::config::SolidFitConfig;
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::http::build_client;
use crate::solid::auth::SolidSession;
use crate::solid::pod::PodClient;
use crate::solid::scheduler::RefreshScheduler;
use crate::sync::local::{SledWorkoutStore, WorkoutStore};
use crate::sync::media::MediaSource;
use crate::sync::reconciler::SyncEngine;
use std::sync::Arc;

/// Everything an application needs after startup
pub struct SolidFit {
    session: Arc<SolidSession>,
    pod: Arc<PodClient>,
    sync: Arc<SyncEngine>,
    scheduler: Option<RefreshScheduler>,
}

impl SolidFit {
    /// Open the databases under `config.data_dir`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(config: SolidFitConfig, media: Arc<dyn MediaSource>) -> Result<Self> {
        let credentials = CredentialStore::open(config.credentials_path())?;
        let workouts = Arc::new(SledWorkoutStore::open(config.workouts_path())?);
        Self::with_stores(config, credentials, workouts, media)
    }

    /// Build from already-open stores
    ///
    /// Fails with [`crate::Error::Config`] outside a Tokio runtime.
    pub fn with_stores(
        config: SolidFitConfig,
        credentials: CredentialStore,
        workouts: Arc<dyn WorkoutStore>,
        media: Arc<dyn MediaSource>,
    ) -> Result<Self> {
        let http = build_client(&config)?;
        let session = Arc::new(SolidSession::new(config, http, credentials));
        let pod = Arc::new(PodClient::new(session.clone()));
        let sync = Arc::new(SyncEngine::new(pod.clone(), workouts, media)?);

        tracing::info!(state = ?session.state(), "SolidFit core ready");
        Ok(Self {
            session,
            pod,
            sync,
            scheduler: None,
        })
    }

    /// Authentication session
    pub fn session(&self) -> &Arc<SolidSession> {
        &self.session
    }

    /// Authenticated Pod client
    pub fn pod(&self) -> &Arc<PodClient> {
        &self.pod
    }

    /// Sync engine
    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    /// Start proactive token refresh; does nothing if already running
    pub fn start_refresh(&mut self) {
        if self.scheduler.is_none() {
            self.scheduler = Some(RefreshScheduler::start(self.session.clone()));
        }
    }

    /// Stop proactive token refresh
    pub async fn stop_refresh(&mut self) -> Result<()> {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop().await?;
        }
        Ok(())
    }

    /// Sign out and forget every stored credential
    pub async fn sign_out(&mut self) -> Result<()> {
        self.stop_refresh().await?;
        self.session.sign_out().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solid::auth::AuthState;
    use crate::sync::media::MemoryMediaSource;

    #[tokio::test]
    async fn test_open_fresh_install() {
        let dir = tempfile::tempdir().unwrap();
        let config = SolidFitConfig::default().with_data_dir(dir.path());

        let mut app = SolidFit::open(config, Arc::new(MemoryMediaSource::new())).unwrap();
        assert_eq!(app.session().state(), AuthState::Unauthenticated);
        assert!(!app.sync().remote().remote_accessible());

        app.start_refresh();
        app.start_refresh();
        app.stop_refresh().await.unwrap();
    }

    #[test]
    fn test_with_stores_outside_runtime_is_error() {
        let result = SolidFit::with_stores(
            SolidFitConfig::default(),
            CredentialStore::temporary().unwrap(),
            Arc::new(SledWorkoutStore::temporary().unwrap()),
            Arc::new(MemoryMediaSource::new()),
        );
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }
}
