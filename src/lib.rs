pub mod config;
pub mod db;
pub mod fingerprint;
pub mod models;
pub mod remote;
pub mod store;
pub mod sync;
pub mod utils;

pub use config::{Config, ConfigError};
pub use db::{Database, StorageError, StorageResult};
pub use fingerprint::Fingerprint;
pub use models::{
    Keyword, KeywordId, NewNote, Note, NoteId, NoteRef, NoteSummary, NoteUpdate, SearchHit,
};
pub use remote::{FsObjectStore, ObjectStore, RemoteError, S3ObjectStore};
pub use store::NoteStore;
pub use sync::{MergeReport, SyncEngine, SyncError, SyncEvent, SyncOutcome, SyncState};
