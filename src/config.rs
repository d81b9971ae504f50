// src/config.rs

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, RrhhError};

pub const DEFAULT_API_BASE_URL: &str = "https://localhost:7121/api";
pub const DEFAULT_STATE_FILE: &str = "./rrhh_state.json";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const ENV_PREFIX: &str = "RRHH_";

/// Client settings, read from `RRHH_*` environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    // The development backend runs on a self-signed localhost certificate.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            state_file: default_state_file(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            accept_invalid_certs: false,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let config: ClientConfig = envy::prefixed(ENV_PREFIX)
            .from_env()
            .map_err(|e| RrhhError::Config(format!("Failed to read {ENV_PREFIX}* variables: {e}")))?;
        config.validate()?;
        debug!("Loaded client configuration: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api_base_url)?;
        if self.poll_interval_secs == 0 {
            return Err(RrhhError::Config(
                "poll interval must be at least one second".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(RrhhError::Config(
                "request timeout must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
