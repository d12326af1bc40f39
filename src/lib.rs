//! Model Packager - model packaging and publish pipeline
//!
//! This crate packages trained ML model artifacts into a container image,
//! publishes the image to a container registry through an external builder
//! subprocess, and notifies a downstream importer service of the newly
//! packaged model.

pub mod archive;
pub mod builder;
pub mod cloud;
pub mod config;
pub mod envreset;
pub mod fsutil;
pub mod identity;
pub mod importer;
pub mod mock;
pub mod params;
pub mod pipeline;
pub mod validation;
pub mod verification;

pub use builder::{BuildMonitor, BuildOutcome, ImageBuilder};
pub use cloud::{Connector, RegistryCoords};
pub use config::AppConfig;
pub use identity::{ContentIdentity, HashSeed};
pub use params::{ParamKey, ParameterSet};
pub use pipeline::{OperationResponse, Pipeline, PipelineState};
