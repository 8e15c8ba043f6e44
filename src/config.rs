//! Process configuration read from the environment.
//!
//! Every setting is read once at start-up into a [`Config`] that is passed to
//! the constructors that need it. A `.env` file in the working directory is
//! honoured through `dotenvy`.

use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::remote::{FsObjectStore, ObjectStore, RemoteResult, S3ObjectStoreBuilder};

pub const ACCESS_KEY_ID: &str = "OSS_ACCESS_KEY_ID";
pub const ACCESS_KEY_SECRET: &str = "OSS_ACCESS_KEY_SECRET";
pub const BUCKET_NAME: &str = "OSS_BUCKET_NAME";
pub const ENDPOINT: &str = "OSS_ENDPOINT";
pub const LOCAL_DB_PATH: &str = "LOCAL_DB_PATH";
pub const REGION: &str = "OSS_REGION";
pub const OBJECT_KEY: &str = "NOTESYNC_OBJECT_KEY";
pub const PATH_STYLE: &str = "NOTESYNC_PATH_STYLE";

const REQUIRED: [&str; 5] = [
    ACCESS_KEY_ID,
    ACCESS_KEY_SECRET,
    BUCKET_NAME,
    ENDPOINT,
    LOCAL_DB_PATH,
];

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_OBJECT_KEY: &str = "notes.db";
const FILE_SCHEME: &str = "file://";

/// Configuration errors, reported before any work starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// One or more required variables are unset or empty.
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    /// A variable is set to a value that cannot be used.
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

/// Object store credentials and the location of the local store file.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub bucket: String,
    /// HTTP(S) endpoint of the S3-compatible service, or `file://<dir>` to
    /// use a local directory as the bucket.
    pub endpoint: String,
    pub local_db_path: PathBuf,
    pub region: String,
    pub object_key: String,
    pub path_style: bool,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env file");
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// Empty values count as unset. When required variables are missing the
    /// error lists all of them, in a fixed order.
    ///
    /// # Examples
    ///
    /// ```
    /// use notesync::config::{Config, ConfigError};
    ///
    /// let err = Config::from_lookup(|_| None).unwrap_err();
    /// assert!(matches!(err, ConfigError::Missing(names) if names.len() == 5));
    /// ```
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let missing: Vec<&'static str> = REQUIRED
            .iter()
            .copied()
            .filter(|name| get(*name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(vec![name]));

        let path_style = match get(PATH_STYLE) {
            None => false,
            Some(value) => parse_flag(&value).ok_or(ConfigError::Invalid {
                name: PATH_STYLE,
                value,
            })?,
        };

        Ok(Self {
            access_key_id: required(ACCESS_KEY_ID)?,
            access_key_secret: required(ACCESS_KEY_SECRET)?,
            bucket: required(BUCKET_NAME)?,
            endpoint: required(ENDPOINT)?,
            local_db_path: PathBuf::from(required(LOCAL_DB_PATH)?),
            region: get(REGION).unwrap_or_else(|| DEFAULT_REGION.to_string()),
            object_key: get(OBJECT_KEY).unwrap_or_else(|| DEFAULT_OBJECT_KEY.to_string()),
            path_style,
        })
    }

    /// Creates the object store this configuration points at.
    ///
    /// `file://<dir>` endpoints use `<dir>/<bucket>` as a directory-backed
    /// store; anything else is treated as an S3-compatible service.
    pub fn build_object_store(&self) -> RemoteResult<Box<dyn ObjectStore>> {
        if let Some(root) = self.endpoint.strip_prefix(FILE_SCHEME) {
            let root = PathBuf::from(root).join(&self.bucket);
            debug!(root = %root.display(), "using directory object store");
            return Ok(Box::new(FsObjectStore::new(root, self.object_key.clone())));
        }

        let store = S3ObjectStoreBuilder::new()
            .endpoint(self.endpoint.clone())
            .bucket(self.bucket.clone())
            .key(self.object_key.clone())
            .region(self.region.clone())
            .credentials(self.access_key_id.clone(), self.access_key_secret.clone())
            .path_style(self.path_style)
            .build()?;
        debug!(url = %store.object_url(), "using S3 object store");
        Ok(Box::new(store))
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("local_db_path", &self.local_db_path)
            .field("region", &self.region)
            .field("object_key", &self.object_key)
            .field("path_style", &self.path_style)
            .finish()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
