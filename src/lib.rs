//! # SolidFit Sync
//!
//! Authentication and data-synchronization core for a workout tracker that
//! keeps its data in the user's Solid Pod.
//!
//! ## Features
//!
//! - **Solid-OIDC login**: WebID discovery, dynamic client registration and
//!   the authorization-code flow with PKCE
//! - **DPoP everywhere**: every token and resource request carries a fresh
//!   proof bound to method, URL and access token
//! - **Token lifecycle**: durable credentials, proactive and reactive refresh
//!   with a single refresh in flight, forced logout when refresh fails
//! - **Offline-first sync**: local writes land first; the Pod document is
//!   merged (remote wins) and replaced as a whole; media is uploaded on demand
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use solidfit_sync::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> solidfit_sync::Result<()> {
//!     let config = SolidFitConfig::load(None)?;
//!     init_tracing(config.log_format)?;
//!
//!     let app = SolidFit::open(config, Arc::new(FsMediaSource))?;
//!
//!     // Hand the URL to the system browser.
//!     let request = app.session().begin_login("https://alice.example/profile/card#me").await?;
//!     println!("open {}", request.url);
//!
//!     // Later, when the platform delivers the redirect:
//!     let redirect = "app://www.solid-oidc.com/callback?code=...";
//!     app.session().complete_login(redirect, Some(&request.state)).await?;
//!
//!     let workouts = app.sync().on_identity_changed().await?;
//!     println!("{} workouts", workouts.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod rdf;
pub mod solid;
pub mod sync;
pub mod tracing_ext;
pub mod types;
pub mod workout;

// Re-exports for convenience
pub use client::SolidFit;
pub use config::{SolidFitConfig, TlsPolicy};
pub use credentials::{CredentialField, CredentialRecord, CredentialStore};
pub use error::{Error, ErrorCategory, Result};
pub use solid::{AuthState, ContainerOutcome, DPoPKey, PodClient, RefreshScheduler, SolidSession};
pub use sync::{SledWorkoutStore, SyncEngine, SyncEvent, WorkoutStore};
pub use types::DedupToken;
pub use workout::{MediaReference, WorkoutRecord};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::client::SolidFit;
    pub use crate::config::SolidFitConfig;
    pub use crate::error::{Error, Result};
    pub use crate::solid::{AuthState, SolidSession};
    pub use crate::sync::{FsMediaSource, MediaSource, SyncEngine, SyncEvent, WorkoutStore};
    pub use crate::tracing_ext::init_tracing;
    pub use crate::workout::WorkoutRecord;
}
