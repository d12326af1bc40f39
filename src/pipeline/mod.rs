//! Pipeline orchestration
//!
//! Owns the ordered validator and verifier sets, assembles the on-disk
//! build context from verified assets, computes content identity and drives
//! the publish and notification stages. One [`Pipeline`] instance owns one
//! private working directory created at construction and never reused; all
//! downloaded, extracted and assembled state lives under it and is abandoned
//! (not deleted) when the run ends.
//!
//! Stages run in a fixed linear order with no branching back:
//! `Constructed -> Validated -> Verified -> Assembled -> Published -> Notified`,
//! with `Failed` reachable from any state. No stage retries; failure halts
//! the run and the error log tells the caller why.

mod response;

pub use response::{ClientError, ClientErrorLog, ErrorCode, OperationResponse, SuccessInfo};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::archive::{compress_dir, ArchiveWorkspace};
use crate::builder::{BuildMonitor, BuildOutcome, ImageBuilder};
use crate::cloud::{CloudError, Connector, ImageRegistry, ObjectStore, RegistryCoords};
use crate::config::AppConfig;
use crate::envreset::EnvironmentReset;
use crate::fsutil::copy_tree;
use crate::identity::{ContentIdentity, HashSeed};
use crate::importer::{ImporterClient, ImporterError};
use crate::params::{ParamKey, ParameterSet};
use crate::validation::{validate_all, ValidatorKind};
use crate::verification::{
    ArchiveLabel, ArchiveVerifier, ImporterVerifier, ModelDirVerifier, ModelTypeVerifier,
    RegistryVerifier, StorageVerifier, VerifyError,
};

/// File name of the build-context tarball handed to the image builder.
const CONTEXT_ARCHIVE: &str = "context.tar.gz";

/// File name of the final importer-facing bundle.
const BUNDLE_ARCHIVE: &str = "model_to_import.tar.gz";

/// Version used when the model descriptor does not carry one.
const DEFAULT_MODEL_VERSION: &str = "0.0.1";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("archive processing failed: {0}")]
    Processing(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("importer notification failed: {0}")]
    Notification(#[from] ImporterError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Linear run state; `Failed` is terminal and reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Constructed,
    Validated,
    Verified,
    Assembled,
    Published,
    Notified,
    Failed,
}

/// Typed assets produced by a successful verification stage.
pub struct VerifiedAssets {
    pub store: Box<dyn ObjectStore>,
    pub params_dir: PathBuf,
    pub resources_dir: PathBuf,
    pub registry: Box<dyn ImageRegistry>,
    pub model_dir: PathBuf,
    pub model_type_dir: PathBuf,
    pub importer_base: String,
}

/// Model metadata descriptor read from the resources archive.
#[derive(Debug, Deserialize)]
struct ModelDescriptor {
    name: String,
    version: Option<String>,
}

/// Generated asset descriptor written into the importer-facing bundle.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescriptor {
    pub id: String,
    pub last_version: String,
    pub docker_repository: DockerRepository,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DockerRepository {
    pub host: String,
    pub name: String,
    pub prefix: String,
}

/// One packaging-and-publish run.
pub struct Pipeline {
    registry: RegistryCoords,
    config: AppConfig,
    run_dir: PathBuf,
    workspace: ArchiveWorkspace,
    errors: ClientErrorLog,
    state: PipelineState,
    identity: Option<ContentIdentity>,
    model_name: Option<String>,
    model_version: Option<String>,
    build_root: Option<PathBuf>,
    registry_url: Option<String>,
}

impl Pipeline {
    /// Create a run with a fresh private working directory under the
    /// configured working dir. The directory is deliberately kept on disk
    /// after the run; cleanup belongs to the deployment.
    pub fn new(registry: RegistryCoords, config: AppConfig) -> Result<Self, PipelineError> {
        let working_dir = PathBuf::from(&config.working_dir);
        fs::create_dir_all(&working_dir)?;
        // The run directory outlives this value on purpose; the tree is
        // abandoned, not deleted, when the run ends.
        let run_dir = tempfile::Builder::new()
            .prefix("packager-")
            .tempdir_in(&working_dir)?
            .keep();
        let workspace = ArchiveWorkspace::new(&run_dir)?;

        Ok(Self {
            registry,
            config,
            run_dir,
            workspace,
            errors: ClientErrorLog::new(),
            state: PipelineState::Constructed,
            identity: None,
            model_name: None,
            model_version: None,
            build_root: None,
            registry_url: None,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn errors(&self) -> &ClientErrorLog {
        &self.errors
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn identity(&self) -> Option<&ContentIdentity> {
        self.identity.as_ref()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model_name.as_deref()
    }

    pub fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    pub fn registry_url(&self) -> Option<&str> {
        self.registry_url.as_deref()
    }

    /// Run every validator, then every verifier, aggregating all failures in
    /// each stage before deciding. Neither stage short-circuits on the first
    /// failure: the caller needs the complete list.
    pub fn validate_and_verify(
        &mut self,
        params: &ParameterSet,
        connector: &dyn Connector,
    ) -> Result<VerifiedAssets, PipelineError> {
        if let Err(failures) = validate_all(ValidatorKind::standard_set(), params) {
            let mut message = String::from("validation errors for this run:");
            for failure in &failures {
                error!(%failure, "validation failed");
                message.push_str("\n    ");
                message.push_str(failure.message());
            }
            self.errors.record(ErrorCode::BadRequest, message.clone());
            self.state = PipelineState::Failed;
            return Err(PipelineError::Validation(message));
        }
        info!("all validation rules passed");
        self.state = PipelineState::Validated;

        let mut failures: Vec<VerifyError> = Vec::new();

        let store = StorageVerifier::new(connector)
            .verify(params)
            .map_err(|e| failures.push(e))
            .ok();

        let params_dir = match &store {
            Some(store) => ArchiveVerifier::new(ArchiveLabel::Params, store.as_ref(), &self.workspace)
                .verify(params)
                .map_err(|e| failures.push(e))
                .ok(),
            None => {
                failures.push(VerifyError::MissingDependency {
                    verifier: "parameters-archive",
                    needs: "storage client",
                });
                None
            }
        };

        let resources_dir = match &store {
            Some(store) => {
                ArchiveVerifier::new(ArchiveLabel::Resources, store.as_ref(), &self.workspace)
                    .verify(params)
                    .map_err(|e| failures.push(e))
                    .ok()
            }
            None => {
                failures.push(VerifyError::MissingDependency {
                    verifier: "resources-archive",
                    needs: "storage client",
                });
                None
            }
        };

        let registry = RegistryVerifier::new(connector)
            .verify(params)
            .map_err(|e| failures.push(e))
            .ok();
        let model_dir = ModelDirVerifier
            .verify(params)
            .map_err(|e| failures.push(e))
            .ok();
        let model_type_dir = ModelTypeVerifier
            .verify(params)
            .map_err(|e| failures.push(e))
            .ok();
        let importer_base = ImporterVerifier
            .verify(params)
            .map_err(|e| failures.push(e))
            .ok();

        if !failures.is_empty() {
            let mut message = String::from("verification errors for this run:");
            for failure in &failures {
                error!(%failure, "verification failed");
                message.push_str("\n    ");
                message.push_str(&failure.to_string());
            }
            self.errors.record(ErrorCode::Forbidden, message.clone());
            self.state = PipelineState::Failed;
            return Err(PipelineError::Verification(message));
        }

        // Every option is Some when no failure was recorded above.
        match (
            store,
            params_dir,
            resources_dir,
            registry,
            model_dir,
            model_type_dir,
            importer_base,
        ) {
            (
                Some(store),
                Some(params_dir),
                Some(resources_dir),
                Some(registry),
                Some(model_dir),
                Some(model_type_dir),
                Some(importer_base),
            ) => {
                info!("all asset verifications passed");
                self.state = PipelineState::Verified;
                Ok(VerifiedAssets {
                    store,
                    params_dir,
                    resources_dir,
                    registry,
                    model_dir,
                    model_type_dir,
                    importer_base,
                })
            }
            _ => {
                let message = "verification produced an incomplete asset set".to_string();
                self.errors.record(ErrorCode::Forbidden, message.clone());
                self.state = PipelineState::Failed;
                Err(PipelineError::Verification(message))
            }
        }
    }

    /// Assemble the build context and the importer-facing bundle from the
    /// verified archive directories, compute the content identity and return
    /// the bundle bytes.
    ///
    /// Any I/O failure in the sequence yields no artifact: the error is
    /// recorded and the partial working state is abandoned.
    pub fn process_model_archives(
        &mut self,
        params_dir: &Path,
        resources_dir: &Path,
        model_type_dir: &Path,
        seed: &HashSeed,
    ) -> Result<Vec<u8>, PipelineError> {
        match self.assemble(params_dir, resources_dir, model_type_dir, seed) {
            Ok(bundle) => {
                self.state = PipelineState::Assembled;
                info!(run_dir = %self.run_dir.display(), "model bundle assembled");
                Ok(bundle)
            }
            Err(e) => {
                let message =
                    format!("error while processing the model archives and directories: {e}");
                self.errors.record(ErrorCode::Unavailable, message.clone());
                self.state = PipelineState::Failed;
                error!(%message, "archive processing failed");
                Err(PipelineError::Processing(message))
            }
        }
    }

    fn assemble(
        &mut self,
        params_dir: &Path,
        resources_dir: &Path,
        model_type_dir: &Path,
        seed: &HashSeed,
    ) -> io::Result<Vec<u8>> {
        let cfg = &self.config;

        // Container build root: the boilerplate tree minus the
        // importer-facing subtree.
        let build_root = self.run_dir.join("model_dir");
        copy_tree(model_type_dir, &build_root, Some(&cfg.importer_res_dir))?;

        // Importer-facing bundle skeleton.
        let asset_dir = self.run_dir.join("assets");
        let bundle_model_dir = asset_dir
            .join(&cfg.importer_res_dir)
            .join(&cfg.importer_root_dir)
            .join(&cfg.importer_model_dir);
        copy_tree(&model_type_dir.join(&cfg.importer_res_dir), &bundle_model_dir, None)?;

        // The boilerplate carries a placeholder descriptor; a real one is
        // generated below.
        fs::remove_file(bundle_model_dir.join(&cfg.model_config_name))?;

        let descriptor_path = resources_dir.join(&cfg.model_descriptor_name);
        let descriptor: ModelDescriptor = serde_yaml::from_str(&fs::read_to_string(&descriptor_path)?)
            .map_err(|e| io::Error::other(format!("invalid model descriptor: {e}")))?;
        let model_version = descriptor
            .version
            .unwrap_or_else(|| DEFAULT_MODEL_VERSION.to_string());
        info!(name = %descriptor.name, version = %model_version, "model metadata retrieved");

        // Weights go both into the versioned importer directory and the
        // container build root.
        let weights_src = resources_dir.join(&cfg.model_weights_name);
        let version_dir = bundle_model_dir.join(&model_version);
        fs::create_dir_all(&version_dir)?;
        fs::copy(&weights_src, version_dir.join(&cfg.model_weights_name))?;
        fs::copy(&weights_src, build_root.join(&cfg.model_weights_name))?;

        // Stray descriptor copies must not leak into the other-resources
        // artifact tree.
        for entry in fs::read_dir(resources_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.contains(&cfg.model_descriptor_name) {
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(file = %name, error = %e, "could not remove stray descriptor");
                }
            }
        }

        let script_dir = build_root.join(&cfg.model_script_dir);
        copy_tree(params_dir, &script_dir.join(&cfg.params_dir_name), None)?;
        copy_tree(resources_dir, &script_dir.join(&cfg.other_res_dir_name), None)?;

        let identity = ContentIdentity::derive(seed, &descriptor.name);
        let asset_descriptor = AssetDescriptor {
            id: identity.model_id.clone(),
            last_version: model_version.clone(),
            docker_repository: DockerRepository {
                host: self.registry.uri.clone(),
                name: identity.image_name.clone(),
                prefix: self.registry.repo_prefix.clone(),
            },
        };
        let yaml = serde_yaml::to_string(&asset_descriptor)
            .map_err(|e| io::Error::other(format!("cannot render asset descriptor: {e}")))?;
        fs::write(bundle_model_dir.join(&cfg.model_config_name), yaml)?;

        self.identity = Some(identity);
        self.model_name = Some(descriptor.name);
        self.model_version = Some(model_version);
        self.build_root = Some(build_root);

        let bundle_root = asset_dir.join(&cfg.importer_res_dir);
        compress_dir(&bundle_root, &asset_dir.join(BUNDLE_ARCHIVE))
            .map_err(|e| io::Error::other(e.to_string()))
    }

    /// Publish the assembled build context: ensure the repository exists,
    /// archive the context, run the external builder under the bounded-wait
    /// monitor and confirm the tag landed in the registry.
    ///
    /// Whatever the outcome of the build itself, the environment reset runs
    /// afterwards; a reset failure is fatal to the export result.
    pub fn export_image(
        &mut self,
        registry: &dyn ImageRegistry,
        builder: &ImageBuilder,
        reset: &dyn EnvironmentReset,
    ) -> Result<(), PipelineError> {
        let (identity, version, build_root) =
            match (&self.identity, &self.model_version, &self.build_root) {
                (Some(i), Some(v), Some(b)) => (i.clone(), v.clone(), b.clone()),
                _ => {
                    let message = "export requested before the build context was assembled";
                    self.state = PipelineState::Failed;
                    return Err(PipelineError::Publish(message.to_string()));
                }
            };

        let repository = self.registry.repository_for(&identity.image_name);

        // Repository creation is idempotent: an existing repository is fine.
        match registry.create_repository(&repository) {
            Ok(()) => info!(%repository, "repository created"),
            Err(CloudError::RepositoryExists(_)) => {
                info!(%repository, registry = %self.registry.uri, "repository already exists")
            }
            Err(e) => {
                let message = format!("there was a problem creating repository '{repository}': {e}");
                self.errors.record(ErrorCode::BadRequest, message.clone());
                self.state = PipelineState::Failed;
                return Err(PipelineError::Publish(message));
            }
        }

        let context_path = self.run_dir.join(CONTEXT_ARCHIVE);
        if let Err(e) = compress_dir(&build_root, &context_path) {
            let message = format!("archiving the build context at {} failed: {e}", build_root.display());
            self.errors.record(ErrorCode::BadRequest, message.clone());
            self.state = PipelineState::Failed;
            return Err(PipelineError::Publish(message));
        }

        reset.snapshot();

        let destination = self.registry.destination(&repository, &version);
        let mut exported = match builder.build(&context_path, &destination) {
            Ok(BuildOutcome::Succeeded) => {
                match registry.list_tagged_images(&repository) {
                    Ok(tags) if tags.iter().any(|t| t == &version) => {
                        let url = self.registry.manifest_url(&repository, &version);
                        info!(%repository, %url, "image pushed and tag confirmed");
                        self.registry_url = Some(url);
                        true
                    }
                    Ok(_) => {
                        let message = format!(
                            "builder reported success but tag '{version}' is not present in '{repository}'"
                        );
                        self.errors.record(ErrorCode::Internal, message);
                        false
                    }
                    Err(e) => {
                        let message = format!("could not confirm pushed tag in '{repository}': {e}");
                        self.errors.record(ErrorCode::Internal, message);
                        false
                    }
                }
            }
            Ok(BuildOutcome::TimedOut) => {
                let message = format!(
                    "image build exceeded the allowed wait of {:?}; abandoning it",
                    builder.monitor().timeout
                );
                self.errors.record(ErrorCode::Internal, message);
                false
            }
            Ok(BuildOutcome::Failed(code)) => {
                let message = format!("image builder exited with code {code}");
                self.errors.record(ErrorCode::Internal, message);
                false
            }
            Err(e) => {
                let message = format!("error executing the image builder: {e}");
                self.errors.record(ErrorCode::Internal, message);
                false
            }
        };

        if let Err(e) = reset.reset() {
            let message = format!("build environment reset failed: {e}");
            self.errors.record(ErrorCode::Internal, message);
            exported = false;
        }

        if exported {
            self.state = PipelineState::Published;
            Ok(())
        } else {
            self.state = PipelineState::Failed;
            Err(PipelineError::Publish(format!(
                "image '{}' was not published to '{repository}'",
                identity.image_name
            )))
        }
    }

    /// POST the packaged bundle to the importer and interpret its response.
    pub fn notify_importer(
        &mut self,
        importer_base: &str,
        bundle: Vec<u8>,
    ) -> Result<(), PipelineError> {
        let Some(identity) = self.identity.clone() else {
            self.state = PipelineState::Failed;
            return Err(PipelineError::Publish(
                "notification requested before identity was computed".to_string(),
            ));
        };

        let client = ImporterClient::new(importer_base);
        match client.import(&identity.model_id, bundle) {
            Ok(()) => {
                self.state = PipelineState::Notified;
                info!(model_id = %identity.model_id, "importer accepted the packaged model");
                Ok(())
            }
            Err(e) => {
                let code = match &e {
                    ImporterError::ZeroImported => ErrorCode::ImportFailed,
                    _ => ErrorCode::Unavailable,
                };
                self.errors.record(code, e.to_string());
                self.state = PipelineState::Failed;
                Err(PipelineError::Notification(e))
            }
        }
    }

    /// Builder for the external image program, monitored with the settings
    /// file's minute-denominated wait interval and timeout.
    pub fn configured_builder(&self) -> ImageBuilder {
        ImageBuilder::new(BuildMonitor::from_minutes(
            self.config.builder_wait_minutes,
            self.config.builder_timeout_minutes,
        ))
    }

    /// Drive a full run with the builder taken from the settings file.
    ///
    /// This is the default-flow entry point for host services; [`execute`]
    /// remains available when the caller owns the builder configuration.
    ///
    /// [`execute`]: Pipeline::execute
    pub fn run(
        &mut self,
        params: &ParameterSet,
        connector: &dyn Connector,
        reset: &dyn EnvironmentReset,
    ) -> OperationResponse {
        let builder = self.configured_builder();
        self.execute(params, connector, &builder, reset)
    }

    /// Drive the whole run end to end and aggregate the outcome.
    pub fn execute(
        &mut self,
        params: &ParameterSet,
        connector: &dyn Connector,
        builder: &ImageBuilder,
        reset: &dyn EnvironmentReset,
    ) -> OperationResponse {
        let result = self.run_stages(params, connector, builder, reset);
        let success = match result {
            Ok(()) => self.success_info(),
            Err(e) => {
                error!(error = %e, "pipeline run failed");
                None
            }
        };
        OperationResponse::from_log(&self.errors, success)
    }

    fn run_stages(
        &mut self,
        params: &ParameterSet,
        connector: &dyn Connector,
        builder: &ImageBuilder,
        reset: &dyn EnvironmentReset,
    ) -> Result<(), PipelineError> {
        let assets = self.validate_and_verify(params, connector)?;

        let seed = HashSeed::default_flow(
            params.get(ParamKey::AccessKeyId).unwrap_or_default(),
            params.get(ParamKey::SecretAccessKey).unwrap_or_default(),
            params.get(ParamKey::Platform).unwrap_or_default(),
            params.get(ParamKey::ModelType).unwrap_or_default(),
        );
        let bundle = self.process_model_archives(
            &assets.params_dir,
            &assets.resources_dir,
            &assets.model_type_dir,
            &seed,
        )?;

        self.export_image(assets.registry.as_ref(), builder, reset)?;
        self.notify_importer(&assets.importer_base, bundle)?;
        info!("packaging workflow executed end to end");
        Ok(())
    }

    fn success_info(&self) -> Option<SuccessInfo> {
        let identity = self.identity.as_ref()?;
        Some(SuccessInfo {
            model_id: identity.model_id.clone(),
            image_name: identity.image_name.clone(),
            model_version: self.model_version.clone()?,
            registry_url: self.registry_url.clone(),
        })
    }
}
