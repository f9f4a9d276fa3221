//! Project options, service endpoints and gateway tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logger::{LogError, LogLevel};

pub const FIRESTORE_API_HOST: &str = "https://firestore.googleapis.com";
pub const STORAGE_API_HOST: &str = "https://firebasestorage.googleapis.com";
pub const IDENTITY_TOOLKIT_HOST: &str = "https://identitytoolkit.googleapis.com";
pub const DEFAULT_DATABASE_ID: &str = "(default)";

/// The web configuration snippet of a Firebase project.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirebaseOptions {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub auth_domain: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub storage_bucket: Option<String>,
    #[serde(default)]
    pub database_id: Option<String>,
}

impl FirebaseOptions {
    /// Parses the JSON object printed by the Firebase console.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Reads `FIREBASE_API_KEY`, `FIREBASE_PROJECT_ID`, `FIREBASE_STORAGE_BUCKET`,
    /// `FIREBASE_AUTH_DOMAIN` and `FIREBASE_DATABASE_ID`.
    pub fn from_env() -> Self {
        Self {
            api_key: env_value("FIREBASE_API_KEY"),
            auth_domain: env_value("FIREBASE_AUTH_DOMAIN"),
            project_id: env_value("FIREBASE_PROJECT_ID"),
            storage_bucket: env_value("FIREBASE_STORAGE_BUCKET"),
            database_id: env_value("FIREBASE_DATABASE_ID"),
        }
    }

    pub fn database_id(&self) -> &str {
        self.database_id.as_deref().unwrap_or(DEFAULT_DATABASE_ID)
    }
}

/// Base URLs of the three REST services.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub firestore: String,
    pub storage: String,
    pub identity_toolkit: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            firestore: FIRESTORE_API_HOST.to_string(),
            storage: STORAGE_API_HOST.to_string(),
            identity_toolkit: IDENTITY_TOOLKIT_HOST.to_string(),
        }
    }
}

impl Endpoints {
    /// Production hosts, replaced by any emulator host exported in the environment.
    pub fn from_env() -> Self {
        let mut endpoints = Self::default();
        if let Some(host) = env_value("FIRESTORE_EMULATOR_HOST") {
            endpoints.firestore = emulator_url(&host);
        }
        if let Some(host) = env_value("FIREBASE_STORAGE_EMULATOR_HOST") {
            endpoints.storage = emulator_url(&host);
        }
        if let Some(host) = env_value("FIREBASE_AUTH_EMULATOR_HOST") {
            endpoints.identity_toolkit = format!("{}/identitytoolkit.googleapis.com", emulator_url(&host));
        }
        endpoints
    }

    /// Points every service at the same host, as used by a local emulator suite or a mock server.
    pub fn all(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            firestore: base_url.clone(),
            storage: base_url.clone(),
            identity_toolkit: base_url,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GatewaySettings {
    pub log_level: LogLevel,
    pub listen_poll_interval: Duration,
    pub default_max_upload_size: u64,
    pub request_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            listen_poll_interval: Duration::from_secs(1),
            default_max_upload_size: 1_000_000,
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl GatewaySettings {
    /// Applies `log_level` to every live logger and to loggers created afterwards.
    pub fn apply_log_level(&self) -> Result<(), LogError> {
        crate::logger::set_log_level(self.log_level)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn emulator_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host.trim_end_matches('/'))
    }
}
