//! Application settings file
//!
//! The settings YAML is loaded once at startup and handed to the pipeline as
//! an opaque struct; the core only reads named fields and never re-parses the
//! file. Field names mirror the keys of the deployed settings file.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading the settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read settings file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse settings file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Structured application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    /// Settings file release date, informational only
    #[serde(default)]
    pub released: Option<NaiveDate>,

    /// Settings file version, informational only
    #[serde(default)]
    pub version: Option<String>,

    /// Base directory holding the per-platform boilerplate trees
    pub resource_dir: String,

    /// Directory under which each run creates its private workspace
    pub working_dir: String,

    /// Name of the importer-facing resource subtree inside a boilerplate tree
    pub importer_res_dir: String,

    /// Root directory name inside the importer-facing bundle
    pub importer_root_dir: String,

    /// Model directory name inside the importer-facing bundle
    pub importer_model_dir: String,

    /// Directory inside the container build root receiving model artifacts
    pub model_script_dir: String,

    /// Poll interval for the image builder subprocess, in minutes
    pub builder_wait_minutes: u64,

    /// Ceiling on accumulated builder wait time, in minutes
    pub builder_timeout_minutes: u64,

    /// File name of the generated asset descriptor
    pub model_config_name: String,

    /// File name of the model metadata descriptor inside the resources archive
    pub model_descriptor_name: String,

    /// File name of the model weights file inside the resources archive
    pub model_weights_name: String,

    /// Subdirectory name receiving the parameters-archive contents
    pub params_dir_name: String,

    /// Subdirectory name receiving the other-resources contents
    pub other_res_dir_name: String,
}

impl AppConfig {
    /// Load settings from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
