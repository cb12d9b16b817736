use tracing::{error, info, warn};

/// Attempt budget used for every content fetch unless configured otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Failure of a single fetch attempt.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum FetchError {
    #[error("content not found for {cid}")]
    NotFound { cid: String },
    #[error("gateway returned status {status} for {cid}")]
    Status { cid: String, status: u16 },
    #[error("transport failure for {cid}: {reason}")]
    Transport { cid: String, reason: String },
}

/// Client side of the content-addressed network.
pub trait ContentFetcher {
    #[allow(clippy::missing_errors_doc)]
    fn fetch(&self, cid: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches `cid`, retrying sequentially up to `max_attempts` times.
///
/// There is no delay between attempts; pacing is left to the transport.
/// Returns `None` only once every attempt has failed.
pub fn fetch_with_retry(
    fetcher: &dyn ContentFetcher,
    cid: &str,
    max_attempts: u32,
) -> Option<Vec<u8>> {
    for attempt in 1..=max_attempts {
        info!(cid, attempt, max_attempts, "content fetch attempt");
        match fetcher.fetch(cid) {
            Ok(bytes) => {
                info!(cid, attempt, len = bytes.len(), "content fetch succeeded");
                return Some(bytes);
            }
            Err(err) => {
                warn!(cid, attempt, error = %err, "content fetch attempt failed");
            }
        }
    }

    error!(cid, max_attempts, "content fetch failed after all attempts");
    None
}
