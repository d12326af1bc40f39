//! Content identity derivation
//!
//! The image name and model id are both derived from a deterministic SHA-256
//! truncation over a caller-supplied seed plus the model name, so re-running
//! the pipeline with identical inputs targets the same image.

use sha2::{Digest, Sha256};

/// Prefix of every derived image name.
pub const IMAGE_NAME_PREFIX: &str = "converted-model-";

/// Number of hex characters kept from the digest.
pub const ID_LENGTH: usize = 10;

/// Lowercase-hex SHA-256 of the UTF-8 seed, truncated to `length` characters.
pub fn hashed_string(seed: &str, length: usize) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(length);
    hash
}

/// Opaque hash seed for identity derivation.
///
/// The composition of the seed is a caller decision; [`HashSeed::default_flow`]
/// reproduces the stock composition of credential id, credential secret,
/// platform and model type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashSeed(String);

impl HashSeed {
    pub fn new(seed: impl Into<String>) -> Self {
        Self(seed.into())
    }

    /// Stock seed composition used by the default pipeline flow.
    pub fn default_flow(access_key: &str, secret_key: &str, platform: &str, model_type: &str) -> Self {
        Self(format!("{access_key}{secret_key}{platform}{model_type}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Deterministic id/name pair for a packaged model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentIdentity {
    /// Container image name, `converted-model-<hash>`
    pub image_name: String,
    /// Model id, the bare truncated hash
    pub model_id: String,
}

impl ContentIdentity {
    /// Derive the identity from a seed and the model name.
    pub fn derive(seed: &HashSeed, model_name: &str) -> Self {
        let hash = hashed_string(&format!("{}{}", seed.as_str(), model_name), ID_LENGTH);
        Self {
            image_name: format!("{IMAGE_NAME_PREFIX}{hash}"),
            model_id: hash,
        }
    }
}
