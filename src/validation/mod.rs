//! Presence-only parameter validation
//!
//! Validators gate the pipeline before any I/O happens: each variant checks
//! that a fixed, non-overlapping subset of the parameter key space is
//! present. Values are not inspected beyond presence; semantic checks belong
//! to the verification stage. A missing mandatory key is an operator-facing
//! precondition failure, not a recoverable business error.

use std::fmt;

use thiserror::Error;
use tracing::info;

use crate::params::{ParamKey, ParameterSet};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{kind} validation failed: {message}")]
    MissingParameter { kind: ValidatorKind, message: String },
}

impl ValidationError {
    pub fn message(&self) -> &str {
        match self {
            ValidationError::MissingParameter { message, .. } => message,
        }
    }
}

/// The fixed validator variants, dispatched through one `validate` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidatorKind {
    Credentials,
    Registry,
    StorageInputs,
    ModelDirectory,
    ModelType,
    Importer,
}

impl fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidatorKind::Credentials => "credentials",
            ValidatorKind::Registry => "registry",
            ValidatorKind::StorageInputs => "storage-inputs",
            ValidatorKind::ModelDirectory => "model-directory",
            ValidatorKind::ModelType => "model-type",
            ValidatorKind::Importer => "importer",
        };
        f.write_str(name)
    }
}

impl ValidatorKind {
    /// The default validator ordering for a full pipeline run.
    pub fn standard_set() -> &'static [ValidatorKind] {
        &[
            ValidatorKind::Credentials,
            ValidatorKind::Registry,
            ValidatorKind::StorageInputs,
            ValidatorKind::ModelDirectory,
            ValidatorKind::ModelType,
            ValidatorKind::Importer,
        ]
    }

    /// Check the parameter subset this variant owns.
    ///
    /// Returns a human-readable pass message, or a precondition error naming
    /// the missing aspect.
    pub fn validate(&self, params: &ParameterSet) -> Result<String, ValidationError> {
        let result = match self {
            ValidatorKind::Credentials => self.require_all(
                params,
                &[ParamKey::AccessKeyId, ParamKey::SecretAccessKey],
                "storage credentials were not provided",
                "storage access keys are present",
            ),
            ValidatorKind::Registry => self.require_all(
                params,
                &[ParamKey::RegistryUrl, ParamKey::RegistryRepo, ParamKey::RegistryUser],
                "registry URL, repository and user must all be set",
                "all required registry settings are present",
            ),
            ValidatorKind::StorageInputs => self.require_all(
                params,
                &[ParamKey::Bucket, ParamKey::ResourcesPath, ParamKey::ParametersPath],
                "bucket, resources path and parameters path must all be set",
                "all storage input locations are present",
            ),
            ValidatorKind::ModelDirectory => self.require_all(
                params,
                &[ParamKey::ModelDir],
                "the base model resource directory is not set",
                "base model resource directory is set",
            ),
            ValidatorKind::ModelType => self.require_all(
                params,
                &[ParamKey::Platform, ParamKey::ModelType],
                "platform and model type parameters were not provided",
                "platform and model type are set",
            ),
            ValidatorKind::Importer => self.require_all(
                params,
                &[ParamKey::ImporterHost],
                "the importer host setting is missing",
                "importer host is set",
            ),
        };

        if let Ok(message) = &result {
            info!(validator = %self, message, "validation passed");
        }
        result
    }

    fn require_all(
        &self,
        params: &ParameterSet,
        keys: &[ParamKey],
        failure: &str,
        success: &str,
    ) -> Result<String, ValidationError> {
        let missing: Vec<String> = keys
            .iter()
            .filter(|k| !params.contains(**k))
            .map(|k| k.env_name().to_string())
            .collect();

        if missing.is_empty() {
            Ok(success.to_string())
        } else {
            Err(ValidationError::MissingParameter {
                kind: *self,
                message: format!("{failure} (missing: {})", missing.join(", ")),
            })
        }
    }
}

/// Run every validator in order, collecting all failures before deciding.
///
/// The caller needs the full list of problems, so this never short-circuits
/// on the first failure.
pub fn validate_all(
    kinds: &[ValidatorKind],
    params: &ParameterSet,
) -> Result<(), Vec<ValidationError>> {
    let mut failures = Vec::new();
    for kind in kinds {
        if let Err(e) = kind.validate(params) {
            failures.push(e);
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}
