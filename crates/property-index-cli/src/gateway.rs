use std::io::Read;
use std::time::Duration;

use property_index_core::{ContentFetcher, FetchError};

/// Upper bound on a single gateway response body.
pub const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

/// Fetches content through an HTTP gateway as `GET {gateway}/ipfs/{cid}`.
///
/// The agent's timeout is the only time bound on an attempt; retries are
/// left to [`property_index_core::fetch_with_retry`].
pub struct GatewayFetcher {
    agent: ureq::Agent,
    base_url: String,
    max_body_bytes: u64,
}

impl GatewayFetcher {
    #[must_use]
    pub fn new(base_url: &str, timeout_ms: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_body_bytes: MAX_BODY_BYTES,
        }
    }

    /// Bodies longer than `max_body_bytes` fail the attempt instead of being cut short.
    #[must_use]
    pub fn with_max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    #[must_use]
    pub fn content_url(&self, cid: &str) -> String {
        format!("{}/ipfs/{cid}", self.base_url)
    }
}

impl ContentFetcher for GatewayFetcher {
    fn fetch(&self, cid: &str) -> Result<Vec<u8>, FetchError> {
        match self.agent.get(&self.content_url(cid)).call() {
            Ok(response) => {
                let mut body = Vec::new();
                response
                    .into_reader()
                    .take(self.max_body_bytes.saturating_add(1))
                    .read_to_end(&mut body)
                    .map_err(|err| FetchError::Transport {
                        cid: cid.to_string(),
                        reason: format!("failed to read response body: {err}"),
                    })?;
                if body.len() as u64 > self.max_body_bytes {
                    return Err(FetchError::Transport {
                        cid: cid.to_string(),
                        reason: format!(
                            "response body exceeds {} bytes",
                            self.max_body_bytes
                        ),
                    });
                }
                Ok(body)
            }
            Err(ureq::Error::Status(404, _)) => Err(FetchError::NotFound {
                cid: cid.to_string(),
            }),
            Err(ureq::Error::Status(status, _)) => Err(FetchError::Status {
                cid: cid.to_string(),
                status,
            }),
            Err(ureq::Error::Transport(err)) => Err(FetchError::Transport {
                cid: cid.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}
