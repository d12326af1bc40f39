//! In-memory collaborators for tests and local development
//!
//! These fakes implement the consumed external interfaces without any
//! network: an object store backed by maps, a registry whose state is shared
//! across clones, a no-op environment reset, a one-response HTTP stub and a
//! helper producing real tar.gz bytes for seeding the store.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::thread;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::cloud::{CloudError, Connector, Credentials, ImageRegistry, ObjectStore};
use crate::envreset::{EnvironmentReset, ResetError};

/// Object store backed by in-memory maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    buckets: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bucket(&mut self, name: &str) -> &mut Self {
        self.buckets.entry(name.to_string()).or_default();
        self
    }

    pub fn put_object(&mut self, bucket: &str, key: &str, bytes: Vec<u8>) -> &mut Self {
        self.buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), bytes);
        self
    }
}

impl ObjectStore for MemoryStore {
    fn list_buckets(&self) -> Result<Vec<String>, CloudError> {
        Ok(self.buckets.keys().cloned().collect())
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, CloudError> {
        self.buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned()
            .ok_or_else(|| CloudError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    repositories: BTreeSet<String>,
    images: BTreeMap<String, Vec<String>>,
}

/// Image registry whose state is shared across clones, so a test can keep a
/// handle while the pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tag as pushed, simulating a successful image push.
    pub fn tag_image(&self, repository: &str, tag: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .images
            .entry(repository.to_string())
            .or_default()
            .push(tag.to_string());
    }

    pub fn has_repository(&self, name: &str) -> bool {
        self.state.lock().unwrap().repositories.contains(name)
    }
}

impl ImageRegistry for MemoryRegistry {
    fn create_repository(&self, name: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        if !state.repositories.insert(name.to_string()) {
            return Err(CloudError::RepositoryExists(name.to_string()));
        }
        Ok(())
    }

    fn describe_repositories(&self) -> Result<Vec<String>, CloudError> {
        Ok(self.state.lock().unwrap().repositories.iter().cloned().collect())
    }

    fn list_tagged_images(&self, repository: &str) -> Result<Vec<String>, CloudError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .images
            .get(repository)
            .cloned()
            .unwrap_or_default())
    }
}

/// Connector handing out clones of pre-seeded fakes.
#[derive(Debug, Clone)]
pub struct StaticConnector {
    store: MemoryStore,
    registry: MemoryRegistry,
    region: Option<String>,
}

impl StaticConnector {
    pub fn new(store: MemoryStore, registry: MemoryRegistry) -> Self {
        Self {
            store,
            registry,
            region: None,
        }
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }
}

impl Connector for StaticConnector {
    fn current_region(&self) -> Option<String> {
        self.region.clone()
    }

    fn object_store(
        &self,
        _credentials: &Credentials,
        _region: &str,
    ) -> Result<Box<dyn ObjectStore>, CloudError> {
        Ok(Box::new(self.store.clone()))
    }

    fn image_registry(&self, _region: &str) -> Result<Box<dyn ImageRegistry>, CloudError> {
        Ok(Box::new(self.registry.clone()))
    }
}

/// Environment reset that records invocations and touches nothing.
#[derive(Debug, Clone, Default)]
pub struct NoopReset {
    resets: Arc<Mutex<u32>>,
    fail: bool,
}

impl NoopReset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every reset fail, for exercising the fatal-reset path.
    pub fn failing() -> Self {
        Self {
            resets: Arc::default(),
            fail: true,
        }
    }

    pub fn reset_count(&self) -> u32 {
        *self.resets.lock().unwrap()
    }
}

impl EnvironmentReset for NoopReset {
    fn snapshot(&self) {}

    fn reset(&self) -> Result<(), ResetError> {
        *self.resets.lock().unwrap() += 1;
        if self.fail {
            Err(ResetError::Copy {
                dir: "etc".to_string(),
                source: std::io::Error::other("simulated copy failure"),
            })
        } else {
            Ok(())
        }
    }
}

/// Build real tar.gz bytes holding the given `(path, content)` entries at the
/// archive root.
pub fn targz_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in files {
        let bytes = content.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_path(name).unwrap();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, bytes).unwrap();
    }
    let encoder = builder.into_inner().unwrap();
    encoder.finish().unwrap()
}

/// Handle to a one-body HTTP stub server.
#[derive(Debug)]
pub struct HttpStub {
    addr: SocketAddr,
}

impl HttpStub {
    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Host and port as separate strings, for parameter-set wiring.
    pub fn host_port(&self) -> (String, String) {
        (self.addr.ip().to_string(), self.addr.port().to_string())
    }
}

/// Start a local HTTP server answering every request with `200 OK` and the
/// given body. The accept loop runs on a background thread for the rest of
/// the process lifetime; intended for tests only.
pub fn http_stub(body: &str) -> HttpStub {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub listener");
    let addr = listener.local_addr().expect("stub local addr");
    let body = body.to_string();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let body = body.clone();
            thread::spawn(move || {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                // Read headers, then exactly Content-Length body bytes.
                let header_end = loop {
                    match stream.read(&mut chunk) {
                        Ok(0) => return,
                        Ok(n) => {
                            buf.extend_from_slice(&chunk[..n]);
                            if let Some(pos) = find_header_end(&buf) {
                                break pos;
                            }
                        }
                        Err(_) => return,
                    }
                };
                let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let content_length = headers
                    .lines()
                    .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(str::trim).map(String::from))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                let mut remaining = content_length.saturating_sub(buf.len() - header_end);
                while remaining > 0 {
                    match stream.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => remaining = remaining.saturating_sub(n),
                    }
                }

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            });
        }
    });

    HttpStub { addr }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}
