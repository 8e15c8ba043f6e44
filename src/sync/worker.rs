//! Background sync on a worker thread.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::{SyncEngine, SyncError, SyncEvent, SyncOutcome};
use crate::remote::ObjectStore;
use crate::store::NoteStore;

/// Result of a background sync: the store handed back plus the outcome.
pub type SyncJoin = JoinHandle<(NoteStore, Result<SyncOutcome, SyncError>)>;

/// Runs a sync of `store` on a new thread.
///
/// The store moves into the worker for the duration of the sync, so nothing
/// else can write to it meanwhile. Progress events arrive on the returned
/// receiver, which disconnects when the sync finishes; joining the handle
/// returns the store.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use notesync::NoteStore;
/// use notesync::remote::FsObjectStore;
/// use notesync::sync::{SyncEngine, worker};
///
/// # fn main() -> anyhow::Result<()> {
/// let engine = Arc::new(SyncEngine::new(FsObjectStore::new("/srv/bucket", "notes.db")));
/// let store = NoteStore::open("/home/me/notes.db")?;
///
/// let (events, handle) = worker::spawn_sync(engine, store);
/// for event in events {
///     println!("{event:?}");
/// }
/// let (_store, outcome) = handle.join().expect("sync thread panicked");
/// outcome?;
/// # Ok(())
/// # }
/// ```
pub fn spawn_sync<S>(engine: Arc<SyncEngine<S>>, mut store: NoteStore) -> (Receiver<SyncEvent>, SyncJoin)
where
    S: ObjectStore + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let result = engine.sync_with_progress(&mut store, |event| {
            // A dropped receiver only means nobody is listening.
            if tx.send(event).is_err() {
                debug!("sync progress receiver dropped");
            }
        });
        (store, result)
    });
    (rx, handle)
}
