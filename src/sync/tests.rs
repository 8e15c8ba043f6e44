use super::*;
use crate::models::NewNote;
use crate::remote::{FsObjectStore, RemoteResult};
use rusqlite::Connection;
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::{Duration, SystemTime};
use tempfile::{TempDir, TempPath, tempdir};

/// Directory-backed remote that counts transfers and can refuse uploads.
struct CountingStore {
    inner: FsObjectStore,
    uploads: AtomicUsize,
    fetches: AtomicUsize,
    fail_uploads: AtomicBool,
}

impl CountingStore {
    fn new(root: &Path) -> Self {
        Self {
            inner: FsObjectStore::new(root, "notes.db"),
            uploads: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            fail_uploads: AtomicBool::new(false),
        }
    }

    fn transfers(&self) -> usize {
        self.uploads.load(Ordering::SeqCst) + self.fetches.load(Ordering::SeqCst)
    }
}

impl ObjectStore for CountingStore {
    fn key(&self) -> &str {
        self.inner.key()
    }

    fn upload(&self, local_path: &Path) -> RemoteResult<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(RemoteError::Http { status: 503 });
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.inner.upload(local_path)
    }

    fn fetch_into(&self, writer: &mut dyn Write) -> RemoteResult<u64> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_into(writer)
    }

    fn exists(&self) -> RemoteResult<bool> {
        self.inner.exists()
    }

    fn last_modified(&self) -> RemoteResult<Option<OffsetDateTime>> {
        self.inner.last_modified()
    }

    fn download_to_temp(&self) -> RemoteResult<TempPath> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.download_to_temp()
    }

    fn remote_fingerprint(&self) -> RemoteResult<Option<Fingerprint>> {
        self.inner.remote_fingerprint()
    }
}

struct Fixture {
    _local_dir: TempDir,
    bucket: TempDir,
    local_path: PathBuf,
    engine: SyncEngine<CountingStore>,
}

impl Fixture {
    fn new() -> Self {
        let local_dir = tempdir().unwrap();
        let bucket = tempdir().unwrap();
        let local_path = local_dir.path().join("notes.db");
        let engine = SyncEngine::new(CountingStore::new(bucket.path()));
        Self {
            _local_dir: local_dir,
            bucket,
            local_path,
            engine,
        }
    }

    fn remote_path(&self) -> PathBuf {
        self.bucket.path().join("notes.db")
    }

    /// Writes a store file straight into the bucket.
    fn seed_remote(&self, notes: &[NewNote]) {
        let store = NoteStore::open(self.remote_path()).unwrap();
        for note in notes {
            store.add_note(note).unwrap();
        }
        store.close().unwrap();
    }

    fn open_local(&self, notes: &[NewNote]) -> NoteStore {
        let store = NoteStore::open(&self.local_path).unwrap();
        for note in notes {
            store.add_note(note).unwrap();
        }
        store
    }

    fn remote(&self) -> &CountingStore {
        self.engine.remote()
    }
}

fn set_mtime(path: &Path, time: SystemTime) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

/// Writes a store file in the first on-disk format: no metadata columns and a
/// join table without a pair index, here holding a duplicated row.
fn write_legacy_store(path: &Path, title: &str, keyword: &str) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, title VARCHAR(200), content TEXT,
                             url VARCHAR(500), domain VARCHAR(100));
         CREATE TABLE keywords (id INTEGER PRIMARY KEY, word VARCHAR(50) UNIQUE);
         CREATE TABLE note_keyword (note_id INTEGER, keyword_id INTEGER);",
    )
    .unwrap();
    conn.execute("INSERT INTO notes (id, title, content) VALUES (1, ?1, 'body')", [title])
        .unwrap();
    conn.execute("INSERT INTO keywords (id, word) VALUES (1, ?1)", [keyword])
        .unwrap();
    conn.execute_batch(
        "INSERT INTO note_keyword VALUES (1, 1);
         INSERT INTO note_keyword VALUES (1, 1);",
    )
    .unwrap();
    conn.close().unwrap();
}

fn keyword_set(store: &NoteStore, title: &str) -> HashSet<String> {
    let id = store.get_note_id_by_title(title).unwrap();
    store.get_keywords_for_note(id).into_iter().collect()
}

// --- sync ---

#[test]
fn matching_fingerprints_make_no_transfers() {
    let fx = Fixture::new();
    let mut store = fx.open_local(&[NewNote::new("a", "b").keywords(["k"])]);
    fs::copy(&fx.local_path, fx.remote_path()).unwrap();
    let before = fs::read(&fx.local_path).unwrap();

    let outcome = fx.engine.sync(&mut store).unwrap();

    assert!(matches!(outcome, SyncOutcome::UpToDate { .. }));
    assert_eq!(fx.remote().transfers(), 0);
    assert_eq!(fs::read(&fx.local_path).unwrap(), before);
    assert_eq!(fx.engine.state(), SyncState::NoOpDone);
}

#[test]
fn missing_remote_publishes_local_store() {
    let fx = Fixture::new();
    let mut store = fx.open_local(&[NewNote::new("a", "b")]);

    let outcome = fx.engine.sync(&mut store).unwrap();

    assert!(matches!(outcome, SyncOutcome::Published { .. }));
    assert_eq!(fx.remote().uploads.load(Ordering::SeqCst), 1);
    assert_eq!(fs::read(fx.remote_path()).unwrap(), fs::read(&fx.local_path).unwrap());
}

#[test]
fn differing_stores_are_merged_and_published() {
    let fx = Fixture::new();
    fx.seed_remote(&[
        NewNote::new("Shared", "same").url("https://s").keywords(["a", "r"]),
        NewNote::new("Remote only", "x").keywords(["remote"]),
    ]);
    let mut store = fx.open_local(&[
        NewNote::new("Shared", "same").url("https://s").keywords(["a", "l"]),
        NewNote::new("Local only", "y"),
    ]);

    let outcome = fx.engine.sync(&mut store).unwrap();

    let SyncOutcome::Merged { report, fingerprint } = outcome else {
        panic!("expected a merge, got {outcome:?}");
    };
    assert_eq!(report.notes_inserted, 1);
    assert_eq!(report.notes_matched, 1);
    assert_eq!(report.keywords_attached, 2);
    assert_eq!(report.conflicts, 0);

    assert_eq!(store.count_notes(), 3);
    assert_eq!(
        keyword_set(&store, "Shared"),
        HashSet::from(["a".to_string(), "l".to_string(), "r".to_string()])
    );
    assert!(store.get_note_id_by_title("Local only").is_some());

    assert_eq!(store.fingerprint().unwrap(), fingerprint);
    assert_eq!(fx.remote().remote_fingerprint().unwrap(), Some(fingerprint));
    assert_eq!(fx.engine.state(), SyncState::Done);
}

#[test]
fn legacy_remote_copy_is_upgraded_before_merging() {
    let fx = Fixture::new();
    write_legacy_store(&fx.remote_path(), "Legacy", "old");
    let mut store = fx.open_local(&[NewNote::new("Local", "l")]);

    let outcome = fx.engine.sync(&mut store).unwrap();

    let SyncOutcome::Merged { report, .. } = outcome else {
        panic!("expected a merge, got {outcome:?}");
    };
    assert_eq!(report.notes_inserted, 1);
    assert_eq!(report.keywords_attached, 1);
    assert_eq!(keyword_set(&store, "Legacy"), HashSet::from(["old".to_string()]));
    assert_eq!(store.count_notes(), 2);
}

#[test]
fn second_sync_after_merge_is_a_noop() {
    let fx = Fixture::new();
    fx.seed_remote(&[NewNote::new("Remote", "r")]);
    let mut store = fx.open_local(&[NewNote::new("Local", "l")]);

    fx.engine.sync(&mut store).unwrap();
    let transfers = fx.remote().transfers();
    let outcome = fx.engine.sync(&mut store).unwrap();

    assert!(matches!(outcome, SyncOutcome::UpToDate { .. }));
    assert_eq!(fx.remote().transfers(), transfers);
}

#[test]
fn failed_upload_leaves_local_file_untouched() {
    let fx = Fixture::new();
    fx.seed_remote(&[NewNote::new("Remote", "r")]);
    let mut store = fx.open_local(&[NewNote::new("Local", "l")]);
    let before = fs::read(&fx.local_path).unwrap();
    fx.remote().fail_uploads.store(true, Ordering::SeqCst);

    let err = fx.engine.sync(&mut store).unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::Upload));
    assert!(err.local_untouched());
    assert_eq!(fs::read(&fx.local_path).unwrap(), before);
    assert_eq!(store.count_notes(), 1);
    assert_eq!(fx.engine.state(), SyncState::Error);

    let leftovers: Vec<_> = fs::read_dir(fx.local_path.parent().unwrap())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 1, "staging file should be removed: {leftovers:?}");
}

#[test]
fn corrupt_remote_copy_fails_in_merge_without_touching_local() {
    let fx = Fixture::new();
    fs::write(fx.remote_path(), b"definitely not sqlite").unwrap();
    let mut store = fx.open_local(&[NewNote::new("Local", "l")]);
    let before = fs::read(&fx.local_path).unwrap();

    let err = fx.engine.sync(&mut store).unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::Merge));
    assert!(err.local_untouched());
    assert_eq!(fs::read(&fx.local_path).unwrap(), before);
    assert_eq!(fx.remote().uploads.load(Ordering::SeqCst), 0);
}

#[test]
fn in_memory_store_cannot_sync() {
    let fx = Fixture::new();
    let mut store = NoteStore::in_memory().unwrap();

    let err = fx.engine.sync(&mut store).unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::Compare));
    assert!(matches!(
        err,
        SyncError::Stage {
            source: SyncCause::Storage(StorageError::NotFileBacked),
            ..
        }
    ));
}

#[test]
fn concurrent_sync_is_rejected() {
    let fx = Fixture::new();
    let mut store = fx.open_local(&[NewNote::new("a", "b")]);

    {
        let _running = BusyGuard::acquire(&fx.engine.busy).unwrap();
        assert!(matches!(fx.engine.sync(&mut store), Err(SyncError::Busy)));
        assert!(BusyGuard::acquire(&fx.engine.busy).is_none());
    }

    assert!(fx.engine.sync(&mut store).is_ok());
}

#[test]
fn progress_events_follow_the_state_machine() {
    let fx = Fixture::new();
    fx.seed_remote(&[NewNote::new("Remote", "r")]);
    let mut store = fx.open_local(&[NewNote::new("Local", "l")]);
    let mut events = Vec::new();

    fx.engine
        .sync_with_progress(&mut store, |event| events.push(event))
        .unwrap();

    let states: Vec<SyncState> = events
        .iter()
        .filter_map(|event| match event {
            SyncEvent::InProgress(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            SyncState::Comparing,
            SyncState::Fetching,
            SyncState::Merging,
            SyncState::Uploading,
            SyncState::Reopening,
        ]
    );
    assert!(matches!(events.last(), Some(SyncEvent::Succeeded(_))));
}

#[test]
fn noop_sync_reports_not_needed() {
    let fx = Fixture::new();
    let mut store = fx.open_local(&[]);
    fs::copy(&fx.local_path, fx.remote_path()).unwrap();
    let mut events = Vec::new();

    fx.engine
        .sync_with_progress(&mut store, |event| events.push(event))
        .unwrap();

    assert_eq!(
        events,
        vec![SyncEvent::InProgress(SyncState::Comparing), SyncEvent::NotNeeded]
    );
}

#[test]
fn failure_event_names_the_stage() {
    let fx = Fixture::new();
    let mut store = fx.open_local(&[]);
    fx.remote().fail_uploads.store(true, Ordering::SeqCst);
    let mut events = Vec::new();

    let _ = fx
        .engine
        .sync_with_progress(&mut store, |event| events.push(event));

    assert!(matches!(
        events.last(),
        Some(SyncEvent::Failed {
            stage: SyncStage::Upload,
            ..
        })
    ));
}

#[test]
fn only_reopen_failures_may_touch_local() {
    let storage = || SyncCause::Storage(StorageError::NotFileBacked);
    for stage in [
        SyncStage::Compare,
        SyncStage::Fetch,
        SyncStage::Merge,
        SyncStage::Upload,
    ] {
        let err = SyncError::Stage {
            stage,
            source: storage(),
        };
        assert!(err.local_untouched(), "{stage}");
    }
    let reopen = SyncError::Stage {
        stage: SyncStage::Reopen,
        source: storage(),
    };
    assert!(!reopen.local_untouched());
    assert!(SyncError::Busy.local_untouched());
}

// --- start-up reconciliation ---

#[test]
fn startup_downloads_when_local_missing() {
    let fx = Fixture::new();
    fx.seed_remote(&[NewNote::new("From cloud", "c").keywords(["cloud"])]);

    let (store, action) = fx.engine.reconcile_on_startup(&fx.local_path).unwrap();

    assert_eq!(action, StartupAction::Downloaded);
    assert_eq!(store.count_notes(), 1);
    assert_eq!(store.get_all_keywords(), vec!["cloud"]);
}

#[test]
fn startup_creates_and_uploads_when_both_missing() {
    let fx = Fixture::new();

    let (store, action) = fx.engine.reconcile_on_startup(&fx.local_path).unwrap();

    assert_eq!(action, StartupAction::Uploaded);
    assert_eq!(store.count_notes(), 0);
    assert!(fx.remote_path().exists());
}

#[test]
fn startup_uploads_when_remote_missing() {
    let fx = Fixture::new();
    fx.open_local(&[NewNote::new("Local", "l")]).close().unwrap();

    let (_store, action) = fx.engine.reconcile_on_startup(&fx.local_path).unwrap();

    assert_eq!(action, StartupAction::Uploaded);
    assert_eq!(fs::read(fx.remote_path()).unwrap(), fs::read(&fx.local_path).unwrap());
}

#[test]
fn startup_merges_newer_remote_instead_of_overwriting() {
    let fx = Fixture::new();
    fx.open_local(&[NewNote::new("Local", "l")]).close().unwrap();
    fx.seed_remote(&[NewNote::new("Remote", "r")]);
    let now = SystemTime::now();
    set_mtime(&fx.local_path, now - Duration::from_secs(3600));
    set_mtime(&fx.remote_path(), now);

    let (store, action) = fx.engine.reconcile_on_startup(&fx.local_path).unwrap();

    assert!(matches!(
        action,
        StartupAction::Synced(SyncOutcome::Merged { .. })
    ));
    assert!(store.get_note_id_by_title("Local").is_some());
    assert!(store.get_note_id_by_title("Remote").is_some());
}

#[test]
fn startup_compares_mtime_from_before_the_legacy_upgrade() {
    let fx = Fixture::new();
    write_legacy_store(&fx.local_path, "Local", "l");
    fx.seed_remote(&[NewNote::new("Remote", "r")]);
    let now = SystemTime::now();
    set_mtime(&fx.local_path, now - Duration::from_secs(3600));
    set_mtime(&fx.remote_path(), now - Duration::from_secs(60));

    let (store, action) = fx.engine.reconcile_on_startup(&fx.local_path).unwrap();

    assert!(matches!(
        action,
        StartupAction::Synced(SyncOutcome::Merged { .. })
    ));
    assert!(store.get_note_id_by_title("Local").is_some());
    assert!(store.get_note_id_by_title("Remote").is_some());
}

#[test]
fn startup_keeps_newer_local_without_transfers() {
    let fx = Fixture::new();
    fx.seed_remote(&[NewNote::new("Remote", "r")]);
    fx.open_local(&[NewNote::new("Local", "l")]).close().unwrap();
    let now = SystemTime::now();
    set_mtime(&fx.remote_path(), now - Duration::from_secs(3600));
    set_mtime(&fx.local_path, now);

    let (store, action) = fx.engine.reconcile_on_startup(&fx.local_path).unwrap();

    assert_eq!(action, StartupAction::UpToDate);
    assert_eq!(fx.remote().transfers(), 0);
    assert!(store.get_note_id_by_title("Remote").is_none());
}

// --- shutdown / worker ---

#[test]
fn shutdown_publishes_pending_changes() {
    let fx = Fixture::new();
    let store = fx.open_local(&[NewNote::new("Unsynced", "u")]);

    let outcome = fx.engine.shutdown(store);

    assert!(matches!(outcome, Some(SyncOutcome::Published { .. })));
    assert_eq!(fs::read(fx.remote_path()).unwrap(), fs::read(&fx.local_path).unwrap());
}

#[test]
fn shutdown_swallows_sync_failures() {
    let fx = Fixture::new();
    let store = fx.open_local(&[NewNote::new("Unsynced", "u")]);
    fx.remote().fail_uploads.store(true, Ordering::SeqCst);

    assert_eq!(fx.engine.shutdown(store), None);
}

#[test]
fn worker_streams_events_and_returns_store() {
    let fx = Fixture::new();
    fx.seed_remote(&[NewNote::new("Remote", "r")]);
    let store = fx.open_local(&[NewNote::new("Local", "l")]);
    let Fixture {
        _local_dir,
        bucket,
        local_path,
        engine,
    } = fx;
    let engine = Arc::new(engine);

    let (events, handle) = worker::spawn_sync(engine.clone(), store);
    let received: Vec<SyncEvent> = events.iter().collect();
    let (store, result) = handle.join().unwrap();

    assert!(matches!(result, Ok(SyncOutcome::Merged { .. })));
    assert_eq!(received.first(), Some(&SyncEvent::InProgress(SyncState::Comparing)));
    assert!(matches!(received.last(), Some(SyncEvent::Succeeded(_))));
    assert_eq!(store.count_notes(), 2);
    assert_eq!(store.path(), Some(local_path.as_path()));
    assert_eq!(engine.state(), SyncState::Done);
    drop(bucket);
}
