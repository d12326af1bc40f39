//! Consumed external service interfaces
//!
//! Object storage and the container registry are collaborators: this crate
//! consumes them through the traits below and never implements their
//! protocols. A [`Connector`] hands out authenticated client handles; the
//! verification stage turns those handles into pipeline assets.

use thiserror::Error;

/// Default region when none is detected from the environment.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Errors surfaced by the storage and registry collaborators.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("repository already exists: {0}")]
    RepositoryExists(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Static credential pair for client construction.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Object storage, read-only from this crate's point of view.
pub trait ObjectStore: std::fmt::Debug {
    /// Names of the buckets visible to the authenticated identity.
    fn list_buckets(&self) -> Result<Vec<String>, CloudError>;

    /// Full contents of one object.
    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, CloudError>;
}

/// Container image registry.
pub trait ImageRegistry: std::fmt::Debug {
    /// Create a repository. Implementations return
    /// [`CloudError::RepositoryExists`] when the name is taken; callers treat
    /// that as success.
    fn create_repository(&self, name: &str) -> Result<(), CloudError>;

    /// Names of all repositories in the registry.
    fn describe_repositories(&self) -> Result<Vec<String>, CloudError>;

    /// Tags present on images in the given repository.
    fn list_tagged_images(&self, repository: &str) -> Result<Vec<String>, CloudError>;
}

/// Factory for authenticated client handles.
///
/// Construction and authentication internals live behind this trait; the
/// pipeline only decides *when* a client is built and with which region.
pub trait Connector {
    /// Region detected from the execution environment, if any.
    fn current_region(&self) -> Option<String>;

    fn object_store(
        &self,
        credentials: &Credentials,
        region: &str,
    ) -> Result<Box<dyn ObjectStore>, CloudError>;

    fn image_registry(&self, region: &str) -> Result<Box<dyn ImageRegistry>, CloudError>;
}

/// Resolve the region to use: the detected one, or the fixed default.
pub fn effective_region(detected: Option<String>) -> String {
    detected.unwrap_or_else(|| DEFAULT_REGION.to_string())
}

/// Registry coordinates for one publish run.
#[derive(Debug, Clone)]
pub struct RegistryCoords {
    /// Registry host, e.g. `123456789.dkr.ecr.us-east-1.amazonaws.com`
    pub uri: String,
    /// Repository name prefix, e.g. `models`
    pub repo_prefix: String,
}

impl RegistryCoords {
    pub fn new(uri: impl Into<String>, repo_prefix: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            repo_prefix: repo_prefix.into(),
        }
    }

    /// Repository name for a given image, `<prefix>/<image>`.
    pub fn repository_for(&self, image_name: &str) -> String {
        format!("{}/{}", self.repo_prefix, image_name)
    }

    /// Full destination reference handed to the image builder.
    pub fn destination(&self, repository: &str, tag: &str) -> String {
        format!("{}/{}:{}", self.uri, repository, tag)
    }

    /// Browsable manifest URL for a pushed image.
    pub fn manifest_url(&self, repository: &str, tag: &str) -> String {
        format!("https://{}/v2/{}/manifests/{}", self.uri, repository, tag)
    }
}
