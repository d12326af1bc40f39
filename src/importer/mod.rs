//! Importer service collaborator
//!
//! The downstream importer exposes two endpoints: a status probe whose body
//! must contain a fixed success marker, and an import endpoint accepting the
//! packaged bundle as a gzip body. A well-formed import response can still
//! signal a business-level failure through the literal zero-imported marker.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::info;

/// Substring the status probe must find in the response body. The trailing
/// space is part of the marker the importer emits.
pub const STATUS_MARKER: &str = "Importer server working ";

/// Literal body marker meaning the importer accepted the call but imported
/// nothing.
pub const ZERO_IMPORTED_MARKER: &str = "Models imported: 0";

#[derive(Debug, Error)]
pub enum ImporterError {
    #[error("importer request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("importer status probe at {url} did not return the expected marker")]
    MarkerMissing { url: String },

    #[error("importer reported zero models imported")]
    ZeroImported,
}

/// Resolve the importer base URL from host and optional port.
///
/// The returned base always ends in `/` and never includes the probe path.
pub fn base_url(host: &str, port: Option<&str>) -> String {
    match port {
        Some(port) => format!("http://{host}:{port}/"),
        None => format!("http://{host}/"),
    }
}

/// Blocking HTTP client for the importer service.
#[derive(Debug, Clone)]
pub struct ImporterClient {
    http: Client,
    base: String,
}

impl ImporterClient {
    /// Create a client for an already-resolved base URL.
    pub fn new(base: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base: base.into(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Probe `<base>status` and require the success marker in the body.
    pub fn probe_status(&self) -> Result<(), ImporterError> {
        let url = format!("{}status", self.base);
        let body = self
            .http
            .get(&url)
            .send()
            .and_then(|r| r.text())
            .map_err(|source| ImporterError::Transport {
                url: url.clone(),
                source,
            })?;

        if body.contains(STATUS_MARKER) {
            info!(url, "importer is up and accepting connections");
            Ok(())
        } else {
            Err(ImporterError::MarkerMissing { url })
        }
    }

    /// POST the packaged bundle to the import endpoint.
    ///
    /// A 200-style response whose body contains the zero-imported marker is a
    /// failure: the transport worked but no model was imported.
    pub fn import(&self, model_id: &str, bundle: Vec<u8>) -> Result<(), ImporterError> {
        let url = format!("{}import?m={}&skip-containers=false", self.base, model_id);
        info!(url, "calling model importer");
        let body = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/gzip")
            .body(bundle)
            .send()
            .and_then(|r| r.text())
            .map_err(|source| ImporterError::Transport {
                url: url.clone(),
                source,
            })?;

        if body.contains(ZERO_IMPORTED_MARKER) {
            Err(ImporterError::ZeroImported)
        } else {
            info!(url, "model importer accepted the bundle");
            Ok(())
        }
    }
}
