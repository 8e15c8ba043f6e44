/// Remote object store adapter.
///
/// The remote side of synchronization is a single blob (the store file) under
/// one key. [`ObjectStore`] is the seam the sync engine talks to; the S3
/// backend speaks the S3-compatible REST API and the filesystem backend uses
/// a directory as the bucket.
mod fs;
mod retry;
mod s3;
mod sigv4;

use std::io::Write;
use std::path::Path;

use tempfile::{NamedTempFile, TempPath};
use thiserror::Error;
use time::OffsetDateTime;

use crate::fingerprint::Fingerprint;

pub use fs::FsObjectStore;
pub use retry::retry_with_backoff;
pub use s3::{S3ObjectStore, S3ObjectStoreBuilder};

/// Errors raised by remote object store backends.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The store could not be reached (connection refused, DNS, timeout).
    #[error("remote store unavailable: {0}")]
    Unavailable(#[source] reqwest::Error),

    /// The store answered with an unexpected HTTP status.
    #[error("remote store returned HTTP {status}")]
    Http { status: u16 },

    /// Credentials were rejected or the request signature did not match.
    #[error("remote store rejected the credentials (HTTP {status})")]
    Auth { status: u16 },

    /// No object exists under the key.
    #[error("remote object not found: {key}")]
    NotFound { key: String },

    /// Local filesystem failures while staging transfers.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint or bucket configuration cannot form a request.
    #[error("invalid remote configuration: {0}")]
    InvalidConfig(String),
}

impl RemoteError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Unavailable(_) => true,
            RemoteError::Http { status } => (500..600).contains(status),
            RemoteError::Auth { .. }
            | RemoteError::NotFound { .. }
            | RemoteError::Io(_)
            | RemoteError::InvalidConfig(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// A single-key blob store holding the remote copy of the store file.
///
/// Implementors provide the raw transfers (`upload`, `fetch_into`) and the
/// metadata lookups; downloads to paths are built on `fetch_into` so a failed
/// transfer never truncates an existing file.
pub trait ObjectStore: Send + Sync {
    /// The object key this store reads and writes.
    fn key(&self) -> &str;

    /// Uploads the file at `local_path`, overwriting the remote object.
    fn upload(&self, local_path: &Path) -> RemoteResult<()>;

    /// Streams the remote object into `writer`, returning the byte count.
    fn fetch_into(&self, writer: &mut dyn Write) -> RemoteResult<u64>;

    /// Whether the remote object exists.
    fn exists(&self) -> RemoteResult<bool>;

    /// Last modification time of the remote object, `None` when absent.
    fn last_modified(&self) -> RemoteResult<Option<OffsetDateTime>>;

    /// Downloads the remote object over `local_path`.
    ///
    /// The bytes land in a sibling temporary file that is renamed over the
    /// target once the transfer completed.
    fn download(&self, local_path: &Path) -> RemoteResult<()> {
        let dir = match local_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = NamedTempFile::new_in(dir)?;
        self.fetch_into(staged.as_file_mut())?;
        staged.as_file().sync_all()?;
        staged
            .persist(local_path)
            .map_err(|e| RemoteError::Io(e.error))?;
        Ok(())
    }

    /// Downloads the remote object to a fresh temporary file.
    ///
    /// The file is removed when the returned path is dropped.
    fn download_to_temp(&self) -> RemoteResult<TempPath> {
        let mut staged = NamedTempFile::new()?;
        self.fetch_into(staged.as_file_mut())?;
        staged.as_file().sync_all()?;
        Ok(staged.into_temp_path())
    }

    /// Fingerprint of the remote object, `None` when it does not exist.
    ///
    /// The default downloads the object and hashes it.
    fn remote_fingerprint(&self) -> RemoteResult<Option<Fingerprint>> {
        match self.download_to_temp() {
            Ok(path) => Ok(Some(Fingerprint::of_file(&path)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Releases backend resources. Failures are reported, never fatal.
    fn close(&self) -> RemoteResult<()> {
        Ok(())
    }
}

impl<T: ObjectStore + ?Sized> ObjectStore for Box<T> {
    fn key(&self) -> &str {
        (**self).key()
    }

    fn upload(&self, local_path: &Path) -> RemoteResult<()> {
        (**self).upload(local_path)
    }

    fn fetch_into(&self, writer: &mut dyn Write) -> RemoteResult<u64> {
        (**self).fetch_into(writer)
    }

    fn exists(&self) -> RemoteResult<bool> {
        (**self).exists()
    }

    fn last_modified(&self) -> RemoteResult<Option<OffsetDateTime>> {
        (**self).last_modified()
    }

    fn download(&self, local_path: &Path) -> RemoteResult<()> {
        (**self).download(local_path)
    }

    fn download_to_temp(&self) -> RemoteResult<TempPath> {
        (**self).download_to_temp()
    }

    fn remote_fingerprint(&self) -> RemoteResult<Option<Fingerprint>> {
        (**self).remote_fingerprint()
    }

    fn close(&self) -> RemoteResult<()> {
        (**self).close()
    }
}
