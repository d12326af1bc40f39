//! Archive download, extraction and creation
//!
//! One [`ArchiveWorkspace`] lives inside a run's private working directory
//! and holds every downloaded and extracted archive for that run. Creation
//! of the build-context tarball and the final importer bundle goes through
//! [`compress_dir`], which roots the archive at the directory's own name so
//! the consumer unpacks a single well-known top-level entry.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::cloud::{CloudError, ObjectStore};

/// Gzip stream magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Expected suffix of every input archive.
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("download of {bucket}/{key} failed: {source}")]
    Download {
        bucket: String,
        key: String,
        #[source]
        source: CloudError,
    },

    #[error("extraction of {name} failed: {source}")]
    Extract {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("archiving {dir} failed: {source}")]
    Create {
        dir: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Per-run holding area for downloaded and extracted archives.
#[derive(Debug)]
pub struct ArchiveWorkspace {
    archive_dir: PathBuf,
}

impl ArchiveWorkspace {
    /// Create the holding area under the run's working directory.
    pub fn new(run_dir: &Path) -> io::Result<Self> {
        let archive_dir = run_dir.join("archives");
        fs::create_dir_all(&archive_dir)?;
        Ok(Self { archive_dir })
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Download one object into the holding area, named after the last
    /// segment of its key.
    pub fn download(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        key: &str,
    ) -> Result<PathBuf, ArchiveError> {
        let bytes = store
            .get_object(bucket, key)
            .map_err(|source| ArchiveError::Download {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source,
            })?;

        let file_name = key.rsplit('/').next().unwrap_or(key);
        let target = self.archive_dir.join(file_name);
        fs::write(&target, bytes)?;
        Ok(target)
    }

    /// Extract a tar.gz archive into a per-logical-name subdirectory and
    /// return the extraction root.
    pub fn extract(&self, archive: &Path, dest_name: &str) -> Result<PathBuf, ArchiveError> {
        let dest = self.archive_dir.join(dest_name);
        let wrap = |source| ArchiveError::Extract {
            name: archive.display().to_string(),
            source,
        };

        fs::create_dir_all(&dest).map_err(wrap)?;
        let file = File::open(archive).map_err(wrap)?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        tar.unpack(&dest).map_err(wrap)?;
        Ok(dest)
    }
}

/// True when the file starts with the gzip magic bytes.
pub fn is_gzip(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Compress a directory tree into a tar.gz at `dest`, rooted at the
/// directory's own name, and return the archive bytes.
pub fn compress_dir(dir: &Path, dest: &Path) -> Result<Vec<u8>, ArchiveError> {
    let wrap = |source| ArchiveError::Create {
        dir: dir.display().to_string(),
        source,
    };

    let root_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| wrap(io::Error::other("directory has no name")))?;

    let file = File::create(dest).map_err(wrap)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(&root_name, dir).map_err(wrap)?;
    let encoder = builder.into_inner().map_err(wrap)?;
    let mut file = encoder.finish().map_err(wrap)?;
    file.flush().map_err(wrap)?;

    fs::read(dest).map_err(wrap)
}
