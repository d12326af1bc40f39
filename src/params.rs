//! Named parameter key space for the packaging pipeline
//!
//! Every caller-supplied input travels through a [`ParameterSet`]: a mapping
//! from a fixed enumerated key space to string values. Keys are either
//! mandatory or optional; an unset mandatory key is a hard precondition
//! failure surfaced by the validation stage.

use std::collections::BTreeMap;
use std::fmt;

/// The fixed set of named inputs the pipeline consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamKey {
    /// Object-storage / registry credential id
    AccessKeyId,
    /// Object-storage / registry credential secret
    SecretAccessKey,
    /// Container registry URL (host)
    RegistryUrl,
    /// Repository name prefix inside the registry
    RegistryRepo,
    /// User the registry client authenticates as
    RegistryUser,
    /// Base directory holding per-platform boilerplate trees
    ModelDir,
    /// Storage key of the parameters (weights) archive
    ParametersPath,
    /// Storage key of the resources archive
    ResourcesPath,
    /// Storage bucket holding both archives
    Bucket,
    /// Importer service host
    ImporterHost,
    /// Importer service port (optional)
    ImporterPort,
    /// Source platform selector (e.g. "sagemaker")
    Platform,
    /// Model type selector within the platform
    ModelType,
}

impl ParamKey {
    /// Environment variable carrying this key's value.
    pub fn env_name(&self) -> &'static str {
        match self {
            ParamKey::AccessKeyId => "AWS_ACCESS_KEY_ID",
            ParamKey::SecretAccessKey => "AWS_SECRET_ACCESS_KEY",
            ParamKey::RegistryUrl => "MP_REGISTRY_URL",
            ParamKey::RegistryRepo => "MP_REGISTRY_REPO",
            ParamKey::RegistryUser => "MP_REGISTRY_USER",
            ParamKey::ModelDir => "MP_MODEL_DIR",
            ParamKey::ParametersPath => "MP_PARAMS_PATH",
            ParamKey::ResourcesPath => "MP_RESOURCES_PATH",
            ParamKey::Bucket => "MP_BUCKET",
            ParamKey::ImporterHost => "MP_IMPORTER_HOST",
            ParamKey::ImporterPort => "MP_IMPORTER_PORT",
            ParamKey::Platform => "MP_PLATFORM",
            ParamKey::ModelType => "MP_MODEL_TYPE",
        }
    }

    /// Whether a value for this key must be present before a run may start.
    pub fn is_mandatory(&self) -> bool {
        matches!(
            self,
            ParamKey::AccessKeyId
                | ParamKey::SecretAccessKey
                | ParamKey::RegistryUrl
                | ParamKey::RegistryRepo
                | ParamKey::RegistryUser
                | ParamKey::ImporterHost
        )
    }

    /// All keys, in declaration order.
    pub fn all() -> &'static [ParamKey] {
        &[
            ParamKey::AccessKeyId,
            ParamKey::SecretAccessKey,
            ParamKey::RegistryUrl,
            ParamKey::RegistryRepo,
            ParamKey::RegistryUser,
            ParamKey::ModelDir,
            ParamKey::ParametersPath,
            ParamKey::ResourcesPath,
            ParamKey::Bucket,
            ParamKey::ImporterHost,
            ParamKey::ImporterPort,
            ParamKey::Platform,
            ParamKey::ModelType,
        ]
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.env_name())
    }
}

/// String values keyed by [`ParamKey`].
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    values: BTreeMap<ParamKey, String>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate from the process environment, skipping unset variables.
    pub fn from_env() -> Self {
        let mut set = Self::new();
        for key in ParamKey::all() {
            if let Ok(value) = std::env::var(key.env_name()) {
                set.insert(*key, value);
            }
        }
        set
    }

    pub fn insert(&mut self, key: ParamKey, value: impl Into<String>) -> &mut Self {
        self.values.insert(key, value.into());
        self
    }

    pub fn with(mut self, key: ParamKey, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: ParamKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    pub fn contains(&self, key: ParamKey) -> bool {
        self.values.contains_key(&key)
    }

    /// Mandatory keys with no value in this set, in declaration order.
    pub fn missing_mandatory(&self) -> Vec<ParamKey> {
        ParamKey::all()
            .iter()
            .copied()
            .filter(|k| k.is_mandatory() && !self.contains(*k))
            .collect()
    }
}
