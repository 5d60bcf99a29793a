//! Configuration for the SolidFit sync core

use crate::error::Result;
use crate::tracing_ext::LogFormat;
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default redirect URI registered with identity providers
pub const DEFAULT_REDIRECT_URI: &str = "app://www.solid-oidc.com/callback";

/// Default vocabulary for workout literals
pub const DEFAULT_NAMESPACE: &str = "http://www.w3.org/2024/ci/core#";

/// Certificate validation policy for the shared HTTP client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Validate certificates normally
    #[default]
    Strict,
    /// Accept self-signed and otherwise invalid certificates.
    ///
    /// Development Pod servers only. Never ship this.
    AcceptInvalidCerts,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolidFitConfig {
    /// Client name sent during dynamic registration
    pub app_name: String,
    /// Redirect URI the platform routes back to the app
    pub redirect_uri: String,
    /// Resource path of the workout document, relative to the storage root
    pub app_path: String,
    /// Container path for uploaded media, relative to the storage root
    pub images_path: String,
    /// Namespace for workout predicates
    pub namespace: String,
    /// Margin subtracted from token expiry when judging validity
    pub expiry_skew_ms: u64,
    /// HTTP request timeout in seconds
    pub http_timeout_secs: u64,
    /// Certificate validation policy
    pub tls_policy: TlsPolicy,
    /// Directory holding the credential and workout databases
    pub data_dir: PathBuf,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for SolidFitConfig {
    fn default() -> Self {
        Self {
            app_name: "SolidFit".to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            app_path: "AndroidApplication/SolidFit".to_string(),
            images_path: "AndroidApplication/Images/SolidFit/".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            expiry_skew_ms: 60_000,
            http_timeout_secs: 30,
            tls_policy: TlsPolicy::Strict,
            data_dir: PathBuf::from("solidfit-data"),
            log_format: LogFormat::Pretty,
        }
    }
}

impl SolidFitConfig {
    /// Load configuration from defaults, an optional file and `SOLIDFIT_*` env vars
    ///
    /// Later sources override earlier ones. A `.env` file in the working
    /// directory is loaded first when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("SOLIDFIT").try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Set the redirect URI
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    /// Set the data directory
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Set the TLS policy
    pub fn with_tls_policy(mut self, tls_policy: TlsPolicy) -> Self {
        self.tls_policy = tls_policy;
        self
    }

    /// Set the expiry skew
    pub fn with_expiry_skew(mut self, skew: Duration) -> Self {
        self.expiry_skew_ms = skew.as_millis() as u64;
        self
    }

    /// Expiry skew as a duration
    pub fn expiry_skew(&self) -> Duration {
        Duration::from_millis(self.expiry_skew_ms)
    }

    /// HTTP timeout as a duration
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Path of the credential database
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials")
    }

    /// Path of the workout database
    pub fn workouts_path(&self) -> PathBuf {
        self.data_dir.join("workouts")
    }
}
