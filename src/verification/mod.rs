//! Asset verification
//!
//! A verifier reaches one external system, confirms the expected resource is
//! really there, and on success hands back a typed asset (a client handle, an
//! extracted directory, a resolved URL) for later stages to consume. Failure
//! is a structured reason, never mutable instance state, so repeated calls
//! can never observe a stale prior outcome.
//!
//! Verifiers are order-dependent: the archive verifiers consume the storage
//! client produced by the storage verifier. The pipeline enforces that order.

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::archive::{is_gzip, ArchiveError, ArchiveWorkspace, ARCHIVE_SUFFIX};
use crate::cloud::{effective_region, CloudError, Connector, Credentials, ImageRegistry, ObjectStore};
use crate::importer::{base_url, ImporterClient, ImporterError};
use crate::params::{ParamKey, ParameterSet};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("required parameter {name} has no value")]
    MissingParameter { name: &'static str },

    #[error("storage is reachable but bucket '{bucket}' is not visible under this identity")]
    BucketNotVisible { bucket: String },

    #[error("cannot access object storage: {0}")]
    StoreUnavailable(#[source] CloudError),

    #[error("the {label} archive '{name}' must end in {ARCHIVE_SUFFIX} and be a file")]
    WrongArchiveName { label: &'static str, name: String },

    #[error("the {label} archive '{name}' is not in gzip format")]
    NotGzip { label: &'static str, name: String },

    #[error("downloading the {label} archive failed: {source}")]
    DownloadFailed {
        label: &'static str,
        #[source]
        source: ArchiveError,
    },

    #[error("extracting the {label} archive failed: {source}")]
    ExtractionFailed {
        label: &'static str,
        #[source]
        source: ArchiveError,
    },

    #[error("cannot access the image registry: {0}")]
    RegistryUnavailable(#[source] CloudError),

    #[error("repository '{name}' was not found in the registry")]
    RepositoryMissing { name: String },

    #[error("directory '{path}' does not exist or is not a directory")]
    NotADirectory { path: String },

    #[error("platform '{platform}' with model type '{model_type}' is not supported")]
    UnsupportedModelType { platform: String, model_type: String },

    #[error(transparent)]
    Importer(#[from] ImporterError),

    #[error("{verifier} verifier requires the {needs} asset, which was not produced")]
    MissingDependency {
        verifier: &'static str,
        needs: &'static str,
    },
}

fn require<'p>(params: &'p ParameterSet, key: ParamKey) -> Result<&'p str, VerifyError> {
    params.get(key).ok_or(VerifyError::MissingParameter {
        name: key.env_name(),
    })
}

/// Logical identity of the two input archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveLabel {
    Params,
    Resources,
}

impl ArchiveLabel {
    pub fn name(&self) -> &'static str {
        match self {
            ArchiveLabel::Params => "PARAMS",
            ArchiveLabel::Resources => "RESOURCES",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ArchiveLabel::Params => "parameters",
            ArchiveLabel::Resources => "resources",
        }
    }

    fn path_key(&self) -> ParamKey {
        match self {
            ArchiveLabel::Params => ParamKey::ParametersPath,
            ArchiveLabel::Resources => ParamKey::ResourcesPath,
        }
    }
}

/// Authenticates to object storage and confirms the target bucket is visible.
/// Asset: the authenticated client handle.
pub struct StorageVerifier<'a> {
    connector: &'a dyn Connector,
}

impl<'a> StorageVerifier<'a> {
    pub fn new(connector: &'a dyn Connector) -> Self {
        Self { connector }
    }

    pub fn verify(&self, params: &ParameterSet) -> Result<Box<dyn ObjectStore>, VerifyError> {
        let credentials = Credentials {
            access_key_id: require(params, ParamKey::AccessKeyId)?.to_string(),
            secret_access_key: require(params, ParamKey::SecretAccessKey)?.to_string(),
        };
        let bucket = require(params, ParamKey::Bucket)?;

        let region = effective_region(self.connector.current_region());
        let store = self
            .connector
            .object_store(&credentials, &region)
            .map_err(VerifyError::StoreUnavailable)?;

        let buckets = store.list_buckets().map_err(VerifyError::StoreUnavailable)?;
        if buckets.iter().any(|b| b == bucket) {
            info!(bucket, "object storage access verified");
            Ok(store)
        } else {
            Err(VerifyError::BucketNotVisible {
                bucket: bucket.to_string(),
            })
        }
    }
}

/// Fetches one input archive through the storage asset, checks it really is a
/// gzip tarball, and extracts it. Asset: the extraction directory.
pub struct ArchiveVerifier<'a> {
    label: ArchiveLabel,
    store: &'a dyn ObjectStore,
    workspace: &'a ArchiveWorkspace,
}

impl<'a> ArchiveVerifier<'a> {
    pub fn new(label: ArchiveLabel, store: &'a dyn ObjectStore, workspace: &'a ArchiveWorkspace) -> Self {
        Self {
            label,
            store,
            workspace,
        }
    }

    pub fn verify(&self, params: &ParameterSet) -> Result<PathBuf, VerifyError> {
        let label = self.label.description();
        let bucket = require(params, ParamKey::Bucket)?;
        let key = require(params, self.label.path_key())?;

        let archive = self
            .workspace
            .download(self.store, bucket, key)
            .map_err(|source| VerifyError::DownloadFailed { label, source })?;

        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !name.ends_with(ARCHIVE_SUFFIX) || !archive.is_file() {
            return Err(VerifyError::WrongArchiveName { label, name });
        }

        let gzipped = is_gzip(&archive).map_err(|e| VerifyError::ExtractionFailed {
            label,
            source: ArchiveError::Io(e),
        })?;
        if !gzipped {
            return Err(VerifyError::NotGzip { label, name });
        }

        let extracted = self
            .workspace
            .extract(&archive, self.label.name())
            .map_err(|source| VerifyError::ExtractionFailed { label, source })?;
        info!(archive = %archive.display(), label, "archive verified and extracted");
        Ok(extracted)
    }
}

/// Builds a registry client for the current region and confirms the
/// configured repository exists. Asset: the client handle.
///
/// A missing repository is a verification failure; creating it belongs to the
/// publish stage, not here.
pub struct RegistryVerifier<'a> {
    connector: &'a dyn Connector,
}

impl<'a> RegistryVerifier<'a> {
    pub fn new(connector: &'a dyn Connector) -> Self {
        Self { connector }
    }

    pub fn verify(&self, params: &ParameterSet) -> Result<Box<dyn ImageRegistry>, VerifyError> {
        let repo = require(params, ParamKey::RegistryRepo)?;

        let region = effective_region(self.connector.current_region());
        let registry = self
            .connector
            .image_registry(&region)
            .map_err(VerifyError::RegistryUnavailable)?;

        let repos = registry
            .describe_repositories()
            .map_err(VerifyError::RegistryUnavailable)?;
        if repos.iter().any(|r| r == repo) {
            info!(repository = repo, "registry access verified");
            Ok(registry)
        } else {
            Err(VerifyError::RepositoryMissing {
                name: repo.to_string(),
            })
        }
    }
}

/// Confirms the configured base resource directory exists. Asset: its path.
pub struct ModelDirVerifier;

impl ModelDirVerifier {
    pub fn verify(&self, params: &ParameterSet) -> Result<PathBuf, VerifyError> {
        let dir = PathBuf::from(require(params, ParamKey::ModelDir)?);
        if dir.is_dir() {
            info!(dir = %dir.display(), "model resource directory verified");
            Ok(dir)
        } else {
            Err(VerifyError::NotADirectory {
                path: dir.display().to_string(),
            })
        }
    }
}

/// Catalog lookup: resolves `<base>/<platform>/<model_type>` and confirms it
/// is a directory. Asset: the resolved boilerplate path.
pub struct ModelTypeVerifier;

impl ModelTypeVerifier {
    pub fn verify(&self, params: &ParameterSet) -> Result<PathBuf, VerifyError> {
        let base = require(params, ParamKey::ModelDir)?;
        let platform = require(params, ParamKey::Platform)?;
        let model_type = require(params, ParamKey::ModelType)?;

        let path = PathBuf::from(base).join(platform).join(model_type);
        if path.is_dir() {
            info!(path = %path.display(), "supported model type verified");
            Ok(path)
        } else {
            Err(VerifyError::UnsupportedModelType {
                platform: platform.to_string(),
                model_type: model_type.to_string(),
            })
        }
    }
}

/// Resolves the importer base URL and probes its status endpoint.
/// Asset: the base URL, without the probe path.
pub struct ImporterVerifier;

impl ImporterVerifier {
    pub fn verify(&self, params: &ParameterSet) -> Result<String, VerifyError> {
        let host = require(params, ParamKey::ImporterHost)?;
        let base = base_url(host, params.get(ParamKey::ImporterPort));

        let client = ImporterClient::new(base.clone());
        client.probe_status()?;
        Ok(base)
    }
}

/// Probe the integrations that need no host-supplied clients: the base and
/// model-type directories and the importer endpoint. Failures are collected,
/// never short-circuited, so an operator sees the full list.
///
/// Storage, registry and archive verification need live client handles owned
/// by the host service and run only inside a full pipeline pass.
pub fn check_local_integrations(params: &ParameterSet) -> Vec<VerifyError> {
    let mut failures = Vec::new();
    if let Err(e) = ModelDirVerifier.verify(params) {
        failures.push(e);
    }
    if let Err(e) = ModelTypeVerifier.verify(params) {
        failures.push(e);
    }
    if let Err(e) = ImporterVerifier.verify(params) {
        failures.push(e);
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{http_stub, targz_bytes, MemoryRegistry, MemoryStore, StaticConnector};
    use std::fs;
    use tempfile::TempDir;

    fn storage_params() -> ParameterSet {
        ParameterSet::new()
            .with(ParamKey::AccessKeyId, "AKIA")
            .with(ParamKey::SecretAccessKey, "secret")
            .with(ParamKey::Bucket, "models")
            .with(ParamKey::ParametersPath, "in/params.tar.gz")
            .with(ParamKey::ResourcesPath, "in/resources.tar.gz")
    }

    #[test]
    fn storage_verifier_produces_client_for_visible_bucket() {
        let mut store = MemoryStore::new();
        store.add_bucket("models");
        let connector = StaticConnector::new(store, MemoryRegistry::new());

        let asset = StorageVerifier::new(&connector).verify(&storage_params()).unwrap();
        assert!(asset.list_buckets().unwrap().contains(&"models".to_string()));
    }

    #[test]
    fn storage_verifier_rejects_invisible_bucket() {
        let mut store = MemoryStore::new();
        store.add_bucket("other-bucket");
        let connector = StaticConnector::new(store, MemoryRegistry::new());

        let err = StorageVerifier::new(&connector).verify(&storage_params()).unwrap_err();
        assert!(matches!(err, VerifyError::BucketNotVisible { .. }));
    }

    #[test]
    fn archive_verifier_extracts_valid_archive() {
        let mut store = MemoryStore::new();
        store.put_object(
            "models",
            "in/params.tar.gz",
            targz_bytes(&[("weights.bin", "wwww")]),
        );

        let run = TempDir::new().unwrap();
        let workspace = ArchiveWorkspace::new(run.path()).unwrap();
        let verifier = ArchiveVerifier::new(ArchiveLabel::Params, &store, &workspace);

        let extracted = verifier.verify(&storage_params()).unwrap();
        assert!(extracted.ends_with("PARAMS"));
        assert!(extracted.join("weights.bin").is_file());
    }

    #[test]
    fn archive_verifier_rejects_wrong_suffix() {
        let mut store = MemoryStore::new();
        store.put_object("models", "in/params.zip", targz_bytes(&[("w", "w")]));

        let run = TempDir::new().unwrap();
        let workspace = ArchiveWorkspace::new(run.path()).unwrap();
        let verifier = ArchiveVerifier::new(ArchiveLabel::Params, &store, &workspace);

        let params = storage_params().with(ParamKey::ParametersPath, "in/params.zip");
        let err = verifier.verify(&params).unwrap_err();
        assert!(matches!(err, VerifyError::WrongArchiveName { .. }));
    }

    #[test]
    fn archive_verifier_rejects_fake_gzip() {
        // Correct suffix, but the content is plain text.
        let mut store = MemoryStore::new();
        store.put_object("models", "in/params.tar.gz", b"not gzip at all".to_vec());

        let run = TempDir::new().unwrap();
        let workspace = ArchiveWorkspace::new(run.path()).unwrap();
        let verifier = ArchiveVerifier::new(ArchiveLabel::Params, &store, &workspace);

        let err = verifier.verify(&storage_params()).unwrap_err();
        assert!(matches!(err, VerifyError::NotGzip { .. }));
    }

    #[test]
    fn archive_verifier_reports_download_failure() {
        let store = MemoryStore::new();
        let run = TempDir::new().unwrap();
        let workspace = ArchiveWorkspace::new(run.path()).unwrap();
        let verifier = ArchiveVerifier::new(ArchiveLabel::Resources, &store, &workspace);

        let err = verifier.verify(&storage_params()).unwrap_err();
        assert!(matches!(err, VerifyError::DownloadFailed { .. }));
    }

    #[test]
    fn registry_verifier_requires_existing_repository() {
        let registry = MemoryRegistry::new();
        let connector = StaticConnector::new(MemoryStore::new(), registry);
        let params = ParameterSet::new().with(ParamKey::RegistryRepo, "models");

        let err = RegistryVerifier::new(&connector).verify(&params).unwrap_err();
        assert!(matches!(err, VerifyError::RepositoryMissing { .. }));
    }

    #[test]
    fn registry_verifier_passes_when_repository_exists() {
        let registry = MemoryRegistry::new();
        registry.create_repository("models").unwrap();
        let connector = StaticConnector::new(MemoryStore::new(), registry);
        let params = ParameterSet::new().with(ParamKey::RegistryRepo, "models");

        let asset = RegistryVerifier::new(&connector).verify(&params).unwrap();
        assert!(asset.describe_repositories().unwrap().contains(&"models".to_string()));
    }

    #[test]
    fn model_dir_verifier_checks_directory() {
        let dir = TempDir::new().unwrap();
        let params = ParameterSet::new().with(ParamKey::ModelDir, dir.path().to_string_lossy());
        ModelDirVerifier.verify(&params).unwrap();

        let params = ParameterSet::new().with(ParamKey::ModelDir, "/nonexistent/base");
        let err = ModelDirVerifier.verify(&params).unwrap_err();
        assert!(matches!(err, VerifyError::NotADirectory { .. }));
    }

    #[test]
    fn model_type_verifier_is_the_catalog_lookup() {
        let base = TempDir::new().unwrap();
        fs::create_dir_all(base.path().join("sagemaker/object-detection")).unwrap();

        let params = ParameterSet::new()
            .with(ParamKey::ModelDir, base.path().to_string_lossy())
            .with(ParamKey::Platform, "sagemaker")
            .with(ParamKey::ModelType, "object-detection");
        let path = ModelTypeVerifier.verify(&params).unwrap();
        assert!(path.ends_with("sagemaker/object-detection"));

        let params = ParameterSet::new()
            .with(ParamKey::ModelDir, base.path().to_string_lossy())
            .with(ParamKey::Platform, "sagemaker")
            .with(ParamKey::ModelType, "unknown-type");
        let err = ModelTypeVerifier.verify(&params).unwrap_err();
        assert!(matches!(err, VerifyError::UnsupportedModelType { .. }));
    }

    #[test]
    fn importer_verifier_returns_base_url_asset() {
        let server = http_stub("Importer server working fine");
        let host_port = server.host_port();
        let params = ParameterSet::new()
            .with(ParamKey::ImporterHost, host_port.0.clone())
            .with(ParamKey::ImporterPort, host_port.1.clone());

        let base = ImporterVerifier.verify(&params).unwrap();
        assert_eq!(base, format!("http://{}:{}/", host_port.0, host_port.1));
    }

    #[test]
    fn importer_verifier_fails_without_marker() {
        let server = http_stub("hello");
        let host_port = server.host_port();
        let params = ParameterSet::new()
            .with(ParamKey::ImporterHost, host_port.0)
            .with(ParamKey::ImporterPort, host_port.1);

        let err = ImporterVerifier.verify(&params).unwrap_err();
        assert!(matches!(err, VerifyError::Importer(ImporterError::MarkerMissing { .. })));
    }

    #[test]
    fn missing_parameter_is_its_own_failure() {
        let err = ModelTypeVerifier.verify(&ParameterSet::new()).unwrap_err();
        assert!(matches!(err, VerifyError::MissingParameter { .. }));
    }

    #[test]
    fn local_integration_check_passes_on_healthy_setup() {
        let base = TempDir::new().unwrap();
        fs::create_dir_all(base.path().join("sagemaker/object-detection")).unwrap();
        let server = http_stub("Importer server working fine");
        let host_port = server.host_port();

        let params = ParameterSet::new()
            .with(ParamKey::ModelDir, base.path().to_string_lossy())
            .with(ParamKey::Platform, "sagemaker")
            .with(ParamKey::ModelType, "object-detection")
            .with(ParamKey::ImporterHost, host_port.0)
            .with(ParamKey::ImporterPort, host_port.1);

        assert!(check_local_integrations(&params).is_empty());
    }

    #[test]
    fn local_integration_check_collects_every_failure() {
        let server = http_stub("no marker here");
        let host_port = server.host_port();

        let params = ParameterSet::new()
            .with(ParamKey::ModelDir, "/nonexistent/base")
            .with(ParamKey::Platform, "sagemaker")
            .with(ParamKey::ModelType, "object-detection")
            .with(ParamKey::ImporterHost, host_port.0)
            .with(ParamKey::ImporterPort, host_port.1);

        let failures = check_local_integrations(&params);
        // Directory, catalog and importer problems are all reported at once.
        assert_eq!(failures.len(), 3);
        assert!(matches!(failures[0], VerifyError::NotADirectory { .. }));
        assert!(matches!(failures[1], VerifyError::UnsupportedModelType { .. }));
        assert!(matches!(failures[2], VerifyError::Importer(_)));
    }
}
