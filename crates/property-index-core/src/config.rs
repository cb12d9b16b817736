use serde::{Deserialize, Serialize};

use crate::fetch::DEFAULT_MAX_ATTEMPTS;
use crate::IndexError;

pub const DEFAULT_GATEWAY_URL: &str = "https://ipfs.io";
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

/// Runtime knobs for one indexer run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexerConfig {
    pub max_fetch_attempts: u32,
    pub gateway_url: String,
    pub fetch_timeout_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_fetch_attempts: DEFAULT_MAX_ATTEMPTS,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
        }
    }
}

impl IndexerConfig {
    /// # Errors
    /// Returns [`IndexError::Configuration`] when any knob is out of range.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.max_fetch_attempts == 0 {
            return Err(IndexError::Configuration(
                "max_fetch_attempts MUST be >= 1".to_string(),
            ));
        }

        if self.fetch_timeout_ms == 0 {
            return Err(IndexError::Configuration(
                "fetch_timeout_ms MUST be >= 1".to_string(),
            ));
        }

        let gateway = self.gateway_url.trim();
        let has_host = gateway
            .strip_prefix("https://")
            .or_else(|| gateway.strip_prefix("http://"))
            .is_some_and(|rest| !rest.trim_matches('/').is_empty());
        if !has_host {
            return Err(IndexError::Configuration(format!(
                "gateway_url MUST be an http(s) URL, got {:?}",
                self.gateway_url
            )));
        }

        Ok(())
    }

    /// Gateway base URL without trailing slashes.
    #[must_use]
    pub fn gateway_base(&self) -> &str {
        self.gateway_url.trim().trim_end_matches('/')
    }
}
