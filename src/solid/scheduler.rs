//! Proactive token refresh
//!
//! A background task sleeps until `expiry - now - skew` and then refreshes.
//! It re-arms whenever the stored credentials change, so a refresh that
//! happened elsewhere moves the deadline instead of stacking a second timer.

use crate::credentials::CredentialRecord;
use crate::error::{Error, Result};
use crate::solid::auth::SolidSession;
use crate::types::now_millis;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// Handle to the background refresh task
pub struct RefreshScheduler {
    shutdown_tx: watch::Sender<bool>,
    task_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl RefreshScheduler {
    /// Spawn the refresh loop for `session`
    pub fn start(session: Arc<SolidSession>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut credentials_rx = session.store().subscribe();
        let skew = session.config().expiry_skew();

        let handle = tokio::spawn(async move {
            // Expiry we already fired for; stay idle until it changes.
            let mut fired_for: Option<i64> = None;

            loop {
                let record = credentials_rx.borrow_and_update().clone();
                let wait = refresh_delay(&record, now_millis(), skew)
                    .filter(|_| fired_for != Some(record.token_expires_at));
                if let Some(delay) = wait {
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "Refresh scheduled");
                }

                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    changed = credentials_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep_for(wait) => {
                        fired_for = Some(record.token_expires_at);
                        if let Err(e) = session.refresh().await {
                            tracing::warn!(error = %e, "Scheduled token refresh failed");
                        }
                    }
                }
            }
            tracing::debug!("Refresh scheduler stopped");
        });

        Self {
            shutdown_tx,
            task_handle: RwLock::new(Some(handle)),
        }
    }

    /// Stop the loop and wait for it to exit
    pub async fn stop(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        let mut task_handle = self.task_handle.write().await;
        if let Some(handle) = task_handle.take() {
            handle
                .await
                .map_err(|e| Error::config(format!("Failed to stop refresh scheduler: {}", e)))?;
        }
        Ok(())
    }
}

/// How long to wait before refreshing, or `None` if there is nothing to refresh
pub fn refresh_delay(record: &CredentialRecord, now_ms: i64, skew: Duration) -> Option<Duration> {
    if record.refresh_token.is_empty() || record.token_expires_at == 0 {
        return None;
    }
    let due = record.token_expires_at - now_ms - skew.as_millis() as i64;
    Some(Duration::from_millis(due.max(0) as u64))
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}
