//! Three-hop jurisdiction lookup.
//!
//! ```text
//! CID(root hash) --relationships.property_seed["/"]--> seed
//! seed           --to["/"]------------------------->  target
//! target         --county_jurisdiction------------->  jurisdiction
//! ```
//!
//! Every hop is fail-fast: the first fetch, parse or field failure aborts the
//! whole lookup. Retries only happen inside each individual fetch.

use std::fmt::{Display, Formatter};

use serde_json::Value;
use tracing::{info, warn};

use crate::cid::derive_content_id;
use crate::fetch::{fetch_with_retry, ContentFetcher};

const PROPERTY_SEED_PATH: &[&str] = &["relationships", "property_seed", "/"];
const SEED_TARGET_PATH: &[&str] = &["to", "/"];
const JURISDICTION_PATH: &[&str] = &["county_jurisdiction"];

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Hop {
    Property,
    Seed,
    Target,
}

impl Hop {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Property => "property",
            Self::Seed => "property_seed",
            Self::Target => "target",
        }
    }

    fn path(self) -> &'static [&'static str] {
        match self {
            Self::Property => PROPERTY_SEED_PATH,
            Self::Seed => SEED_TARGET_PATH,
            Self::Target => JURISDICTION_PATH,
        }
    }
}

impl Display for Hop {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ResolutionError {
    #[error("{hop} hop: fetch failed for {cid}")]
    FetchFailed { hop: Hop, cid: String },
    #[error("{hop} hop: document {cid} is not valid JSON: {reason}")]
    ParseFailed { hop: Hop, cid: String, reason: String },
    #[error("{hop} hop: document {cid} has no field {field}")]
    FieldMissing { hop: Hop, cid: String, field: String },
    #[error("{hop} hop: document {cid} has null field {field}")]
    FieldNull { hop: Hop, cid: String, field: String },
    #[error("{hop} hop: document {cid} field {field} is not a string")]
    FieldNotText { hop: Hop, cid: String, field: String },
}

impl ResolutionError {
    #[must_use]
    pub fn hop(&self) -> Hop {
        match self {
            Self::FetchFailed { hop, .. }
            | Self::ParseFailed { hop, .. }
            | Self::FieldMissing { hop, .. }
            | Self::FieldNull { hop, .. }
            | Self::FieldNotText { hop, .. } => *hop,
        }
    }
}

pub struct LinkResolver<'a> {
    fetcher: &'a dyn ContentFetcher,
    max_attempts: u32,
}

impl<'a> LinkResolver<'a> {
    #[must_use]
    pub fn new(fetcher: &'a dyn ContentFetcher, max_attempts: u32) -> Self {
        Self {
            fetcher,
            max_attempts,
        }
    }

    /// Recovers the jurisdiction linked from a property's root document.
    ///
    /// # Errors
    /// Returns the first [`ResolutionError`] met along the three hops; no
    /// later hop is attempted after a failure.
    pub fn resolve_jurisdiction(&self, root_hash: &[u8; 32]) -> Result<String, ResolutionError> {
        let root_hex = crate::to_hex_prefixed(root_hash);
        let property_cid = derive_content_id(root_hash);
        info!(root_hash = %root_hex, cid = %property_cid, "starting jurisdiction resolution");

        let seed_cid = self.follow(Hop::Property, &property_cid)?;
        info!(root_hash = %root_hex, seed_cid = %seed_cid, "found property_seed link");

        let target_cid = self.follow(Hop::Seed, &seed_cid)?;
        info!(seed_cid = %seed_cid, target_cid = %target_cid, "found seed target link");

        let jurisdiction = self.follow(Hop::Target, &target_cid)?;
        info!(
            root_hash = %root_hex,
            jurisdiction = %jurisdiction,
            "jurisdiction resolved"
        );
        Ok(jurisdiction)
    }

    fn follow(&self, hop: Hop, cid: &str) -> Result<String, ResolutionError> {
        let result = self
            .fetch_document(hop, cid)
            .and_then(|document| extract_text(hop, cid, &document));
        if let Err(err) = &result {
            warn!(hop = %hop, cid, error = %err, "jurisdiction resolution hop failed");
        }
        result
    }

    fn fetch_document(&self, hop: Hop, cid: &str) -> Result<Value, ResolutionError> {
        let Some(bytes) = fetch_with_retry(self.fetcher, cid, self.max_attempts) else {
            return Err(ResolutionError::FetchFailed {
                hop,
                cid: cid.to_string(),
            });
        };

        serde_json::from_slice(&bytes).map_err(|err| ResolutionError::ParseFailed {
            hop,
            cid: cid.to_string(),
            reason: err.to_string(),
        })
    }
}

fn extract_text(hop: Hop, cid: &str, document: &Value) -> Result<String, ResolutionError> {
    let path = hop.path();
    let mut current = document;

    for (depth, segment) in path.iter().enumerate() {
        let field = path[..=depth].join(".");
        current = match current.get(*segment) {
            None => {
                return Err(ResolutionError::FieldMissing {
                    hop,
                    cid: cid.to_string(),
                    field,
                })
            }
            Some(Value::Null) => {
                return Err(ResolutionError::FieldNull {
                    hop,
                    cid: cid.to_string(),
                    field,
                })
            }
            Some(value) => value,
        };
    }

    match current {
        Value::String(text) => Ok(text.clone()),
        _ => Err(ResolutionError::FieldNotText {
            hop,
            cid: cid.to_string(),
            field: path.join("."),
        }),
    }
}
