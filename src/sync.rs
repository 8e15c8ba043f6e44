//! Synchronization of the local store file with its remote copy.
//!
//! A sync compares fingerprints and stops there when they match. Otherwise
//! the remote copy is fetched into a temporary file, merged into a staging
//! copy of the local file, the staging file is uploaded, and only then does
//! it replace the local file. Any failure before that final rename leaves
//! the local file exactly as it was.
mod merge;
pub mod worker;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::db::{Database, StorageError, StorageResult};
use crate::fingerprint::Fingerprint;
use crate::remote::{ObjectStore, RemoteError};
use crate::store::NoteStore;

pub use merge::{MergeReport, merge};

/// Where a sync currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Comparing,
    /// Fingerprints matched; nothing was transferred.
    NoOpDone,
    Fetching,
    Merging,
    Uploading,
    Reopening,
    Done,
    Error,
}

impl SyncState {
    /// Whether a sync is between start and finish.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            SyncState::Comparing
                | SyncState::Fetching
                | SyncState::Merging
                | SyncState::Uploading
                | SyncState::Reopening
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Comparing => "comparing",
            SyncState::NoOpDone => "up to date",
            SyncState::Fetching => "fetching",
            SyncState::Merging => "merging",
            SyncState::Uploading => "uploading",
            SyncState::Reopening => "reopening",
            SyncState::Done => "done",
            SyncState::Error => "error",
        };
        f.write_str(name)
    }
}

/// The step a failed sync was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Compare,
    Fetch,
    Merge,
    Upload,
    Reopen,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Compare => "comparing fingerprints",
            SyncStage::Fetch => "fetching the remote copy",
            SyncStage::Merge => "merging",
            SyncStage::Upload => "uploading",
            SyncStage::Reopen => "reopening the local store",
        };
        f.write_str(name)
    }
}

/// The underlying failure of a sync stage.
#[derive(Debug, Error)]
pub enum SyncCause {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Errors returned by [`SyncEngine`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// A stage failed.
    #[error("sync failed while {stage}: {source}")]
    Stage {
        stage: SyncStage,
        #[source]
        source: SyncCause,
    },

    /// Another sync is already running on this engine.
    #[error("a sync is already in progress")]
    Busy,
}

impl SyncError {
    /// The stage that failed, `None` for [`SyncError::Busy`].
    pub fn stage(&self) -> Option<SyncStage> {
        match self {
            SyncError::Stage { stage, .. } => Some(*stage),
            SyncError::Busy => None,
        }
    }

    /// Whether the local store file is guaranteed to be unchanged.
    ///
    /// Only a failure while reopening can happen after the local file was
    /// replaced.
    pub fn local_untouched(&self) -> bool {
        self.stage() != Some(SyncStage::Reopen)
    }
}

trait StageExt<T> {
    fn stage(self, stage: SyncStage) -> Result<T, SyncError>;
}

impl<T, E: Into<SyncCause>> StageExt<T> for Result<T, E> {
    fn stage(self, stage: SyncStage) -> Result<T, SyncError> {
        self.map_err(|e| SyncError::Stage {
            stage,
            source: e.into(),
        })
    }
}

/// What a successful sync did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Local and remote fingerprints matched.
    UpToDate { fingerprint: Fingerprint },
    /// No remote copy existed; the local file was uploaded.
    Published { fingerprint: Fingerprint },
    /// The remote copy was merged in and the result uploaded.
    Merged {
        report: MergeReport,
        fingerprint: Fingerprint,
    },
}

impl SyncOutcome {
    /// Fingerprint shared by the local file and the remote object afterwards.
    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            SyncOutcome::UpToDate { fingerprint }
            | SyncOutcome::Published { fingerprint }
            | SyncOutcome::Merged { fingerprint, .. } => *fingerprint,
        }
    }
}

/// Progress reported while a sync runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Fingerprints matched; the sync finished without transfers.
    NotNeeded,
    InProgress(SyncState),
    Succeeded(SyncOutcome),
    Failed { stage: SyncStage, reason: String },
}

/// What start-up reconciliation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupAction {
    /// The local file was missing and the remote copy was downloaded.
    Downloaded,
    /// The remote copy was missing and the local file was uploaded.
    Uploaded,
    /// The remote copy was newer and a full sync ran.
    Synced(SyncOutcome),
    /// The local file is at least as new as the remote copy.
    UpToDate,
}

/// Runs syncs of a local store against one remote object.
///
/// At most one sync runs per engine; a concurrent request fails with
/// [`SyncError::Busy`].
pub struct SyncEngine<S: ObjectStore> {
    remote: S,
    busy: AtomicBool,
    state: Mutex<SyncState>,
}

/// Holds the engine's busy flag for the duration of a sync.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: ObjectStore> SyncEngine<S> {
    pub fn new(remote: S) -> Self {
        Self {
            remote,
            busy: AtomicBool::new(false),
            state: Mutex::new(SyncState::Idle),
        }
    }

    pub fn remote(&self) -> &S {
        &self.remote
    }

    /// State of the current or most recent sync.
    pub fn state(&self) -> SyncState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(SyncState::Error)
    }

    /// Synchronizes `store` with the remote copy.
    pub fn sync(&self, store: &mut NoteStore) -> Result<SyncOutcome, SyncError> {
        self.sync_with_progress(store, |_| {})
    }

    /// Synchronizes `store`, reporting each transition to `on_event`.
    pub fn sync_with_progress(
        &self,
        store: &mut NoteStore,
        mut on_event: impl FnMut(SyncEvent),
    ) -> Result<SyncOutcome, SyncError> {
        let _guard = BusyGuard::acquire(&self.busy).ok_or(SyncError::Busy)?;
        self.run(store, &mut on_event)
    }

    /// Reconciles the local file at `local_path` with the remote copy at
    /// start-up and returns the opened store.
    ///
    /// A missing local file is downloaded, a missing remote copy is
    /// uploaded, and a remote copy modified after the local file is merged
    /// in with a full sync. The remote copy never simply overwrites an
    /// existing local file.
    pub fn reconcile_on_startup(
        &self,
        local_path: &Path,
    ) -> Result<(NoteStore, StartupAction), SyncError> {
        let _guard = BusyGuard::acquire(&self.busy).ok_or(SyncError::Busy)?;

        if !local_path.exists() {
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent)
                    .map_err(StorageError::from)
                    .stage(SyncStage::Fetch)?;
            }
            if self.remote.exists().stage(SyncStage::Compare)? {
                self.remote.download(local_path).stage(SyncStage::Fetch)?;
                let store = NoteStore::open(local_path).stage(SyncStage::Reopen)?;
                info!(path = %local_path.display(), notes = store.count_notes(), "downloaded remote store");
                return Ok((store, StartupAction::Downloaded));
            }
            let store = NoteStore::open(local_path).stage(SyncStage::Compare)?;
            self.remote.upload(local_path).stage(SyncStage::Upload)?;
            info!(path = %local_path.display(), "published new local store");
            return Ok((store, StartupAction::Uploaded));
        }

        // Opening may upgrade a legacy file and bump its mtime.
        let local_modified = modified_time(local_path).stage(SyncStage::Compare)?;
        let mut store = NoteStore::open(local_path).stage(SyncStage::Compare)?;
        let Some(remote_modified) = self.remote.last_modified().stage(SyncStage::Compare)? else {
            self.remote.upload(local_path).stage(SyncStage::Upload)?;
            info!(path = %local_path.display(), "remote copy missing, uploaded local store");
            return Ok((store, StartupAction::Uploaded));
        };

        if remote_modified > local_modified {
            info!(%remote_modified, %local_modified, "remote copy is newer, syncing");
            let outcome = self.run(&mut store, &mut |_| {})?;
            return Ok((store, StartupAction::Synced(outcome)));
        }

        info!("local store is up to date");
        Ok((store, StartupAction::UpToDate))
    }

    /// Runs a final best-effort sync and releases the store and the remote.
    ///
    /// Failures are logged, never returned.
    pub fn shutdown(&self, mut store: NoteStore) -> Option<SyncOutcome> {
        let outcome = match self.sync(&mut store) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, "final sync failed");
                None
            }
        };
        if let Err(e) = store.close() {
            warn!(error = %e, "failed to close local store");
        }
        if let Err(e) = self.remote.close() {
            warn!(error = %e, "failed to close object store");
        }
        outcome
    }

    fn enter(&self, state: SyncState, on_event: &mut dyn FnMut(SyncEvent)) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
        if state.is_running() {
            info!(%state, "sync progress");
            on_event(SyncEvent::InProgress(state));
        }
    }

    fn run(
        &self,
        store: &mut NoteStore,
        on_event: &mut dyn FnMut(SyncEvent),
    ) -> Result<SyncOutcome, SyncError> {
        let result = self.run_stages(store, on_event);
        match &result {
            Ok(SyncOutcome::UpToDate { fingerprint }) => {
                self.enter(SyncState::NoOpDone, on_event);
                info!(%fingerprint, "local and remote copies match");
                on_event(SyncEvent::NotNeeded);
            }
            Ok(outcome) => {
                self.enter(SyncState::Done, on_event);
                info!(?outcome, "sync finished");
                on_event(SyncEvent::Succeeded(outcome.clone()));
            }
            Err(e) => {
                self.enter(SyncState::Error, on_event);
                warn!(error = %e, local_untouched = e.local_untouched(), "sync failed");
                if let Some(stage) = e.stage() {
                    on_event(SyncEvent::Failed {
                        stage,
                        reason: e.to_string(),
                    });
                }
            }
        }
        result
    }

    fn run_stages(
        &self,
        store: &mut NoteStore,
        on_event: &mut dyn FnMut(SyncEvent),
    ) -> Result<SyncOutcome, SyncError> {
        self.enter(SyncState::Comparing, on_event);
        let local = store.fingerprint().stage(SyncStage::Compare)?;
        let local_path = store
            .path()
            .ok_or(StorageError::NotFileBacked)
            .stage(SyncStage::Compare)?
            .to_path_buf();
        let remote = self.remote.remote_fingerprint().stage(SyncStage::Compare)?;

        match remote {
            Some(remote) if remote == local => {
                return Ok(SyncOutcome::UpToDate { fingerprint: local });
            }
            None => {
                self.enter(SyncState::Uploading, on_event);
                self.remote.upload(&local_path).stage(SyncStage::Upload)?;
                return Ok(SyncOutcome::Published { fingerprint: local });
            }
            Some(remote) => info!(%local, %remote, "fingerprints differ"),
        }

        self.enter(SyncState::Fetching, on_event);
        let remote_copy = self.remote.download_to_temp().stage(SyncStage::Fetch)?;

        self.enter(SyncState::Merging, on_event);
        let (staging, report) = stage_merge(&local_path, &remote_copy).stage(SyncStage::Merge)?;

        self.enter(SyncState::Uploading, on_event);
        self.remote.upload(staging.path()).stage(SyncStage::Upload)?;

        self.enter(SyncState::Reopening, on_event);
        store.replace_file(staging).stage(SyncStage::Reopen)?;
        let fingerprint = store.fingerprint().stage(SyncStage::Reopen)?;

        Ok(SyncOutcome::Merged {
            report,
            fingerprint,
        })
    }
}

/// Copies the local file to a staging file beside it and merges the remote
/// copy into the staging file.
fn stage_merge(local_path: &Path, remote_copy: &Path) -> StorageResult<(NamedTempFile, MergeReport)> {
    let dir = staging_dir(local_path);
    let staging = NamedTempFile::new_in(&dir)?;
    fs::copy(local_path, staging.path())?;

    // Bring the remote copy up to the current schema before reading it.
    Database::open(remote_copy)?.close()?;
    let remote = NoteStore::open_read_only(remote_copy)?;
    let staged = NoteStore::open(staging.path())?;

    let report = merge(&staged, &remote)?;
    staged.close()?;
    remote.close()?;
    Ok((staging, report))
}

fn staging_dir(local_path: &Path) -> PathBuf {
    match local_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn modified_time(path: &Path) -> StorageResult<OffsetDateTime> {
    Ok(OffsetDateTime::from(fs::metadata(path)?.modified()?))
}

#[cfg(test)]
#[path = "sync/tests.rs"]
mod tests;
