use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::{ObjectStore, RemoteError, RemoteResult};
use crate::fingerprint::Fingerprint;

/// An object store backed by a local directory.
///
/// The directory plays the bucket and the key is a relative path inside it.
/// Used for `file://` endpoints, shared folders and tests.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    key: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            key: key.into(),
        }
    }

    /// Path of the object inside the root directory.
    pub fn object_path(&self) -> PathBuf {
        self.root.join(&self.key)
    }

    fn not_found(&self) -> RemoteError {
        RemoteError::NotFound {
            key: self.key.clone(),
        }
    }
}

impl ObjectStore for FsObjectStore {
    fn key(&self) -> &str {
        &self.key
    }

    fn upload(&self, local_path: &Path) -> RemoteResult<()> {
        let target = self.object_path();
        let dir = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        // Stage next to the target so the rename stays on one filesystem.
        let mut staged = NamedTempFile::new_in(dir)?;
        let bytes = io::copy(&mut File::open(local_path)?, staged.as_file_mut())?;
        staged.as_file().sync_all()?;
        staged
            .persist(&target)
            .map_err(|e| RemoteError::Io(e.error))?;

        info!(path = %target.display(), bytes, "uploaded store file");
        Ok(())
    }

    fn fetch_into(&self, writer: &mut dyn Write) -> RemoteResult<u64> {
        let mut file = match File::open(self.object_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(self.not_found()),
            Err(e) => return Err(e.into()),
        };
        let bytes = io::copy(&mut file, writer)?;
        debug!(key = %self.key, bytes, "downloaded store file");
        Ok(bytes)
    }

    fn exists(&self) -> RemoteResult<bool> {
        Ok(self.object_path().is_file())
    }

    fn last_modified(&self) -> RemoteResult<Option<OffsetDateTime>> {
        match fs::metadata(self.object_path()) {
            Ok(metadata) => Ok(Some(OffsetDateTime::from(metadata.modified()?))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remote_fingerprint(&self) -> RemoteResult<Option<Fingerprint>> {
        match Fingerprint::of_file(self.object_path()) {
            Ok(fingerprint) => Ok(Some(fingerprint)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
