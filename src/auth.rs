//! API key authentication
//!
//! Callers present their key in `X-API-Key`. With no keys configured,
//! authentication is disabled and every caller shares the empty identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Header carrying the caller's key
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing X-API-Key header")]
    MissingKey,

    #[error("Invalid API key")]
    InvalidKey,
}

/// Quota-partitioning key of a caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    /// Shared identity used when authentication is disabled
    pub fn anonymous() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }

    /// Short digest prefix safe to put in logs
    pub fn fingerprint(&self) -> String {
        if self.is_anonymous() {
            return "anonymous".to_string();
        }
        fingerprint(&self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}

/// Hex prefix of the SHA-256 digest of `value`, for logging values that may
/// carry credentials
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(&digest[..4])
}

/// Validates keys against the configured set.
///
/// Only SHA-256 digests of the configured keys are retained.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyAuthenticator {
    digests: HashSet<[u8; 32]>,
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

impl ApiKeyAuthenticator {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let digests = keys
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| digest(&k))
            .collect();
        Self { digests }
    }

    /// Parse a comma separated key list
    pub fn from_csv(keys: &str) -> Self {
        Self::new(keys.split(','))
    }

    pub fn is_enabled(&self) -> bool {
        !self.digests.is_empty()
    }

    /// Resolve the caller's identity from the presented key
    pub fn authenticate(&self, presented: Option<&str>) -> Result<Identity, AuthError> {
        if !self.is_enabled() {
            return Ok(Identity::anonymous());
        }

        let key = presented
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(AuthError::MissingKey)?;

        if self.digests.contains(&digest(key)) {
            Ok(Identity(key.to_string()))
        } else {
            Err(AuthError::InvalidKey)
        }
    }
}
