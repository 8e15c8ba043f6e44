use serde::Serialize;
use tracing::{debug, warn};

use crate::db::StorageResult;
use crate::store::{NoteRow, NoteStore, attach_keyword, find_by_natural_key, insert_note, load_note};

/// Counts of what a merge changed in the local store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Remote notes with no local counterpart, copied in.
    pub notes_inserted: usize,
    /// Remote notes matched to an existing local note.
    pub notes_matched: usize,
    /// Keyword associations added, on inserted and matched notes alike.
    pub keywords_attached: usize,
    /// Matched notes whose content differs; the local content was kept.
    pub conflicts: usize,
}

impl MergeReport {
    /// Whether the merge left the local store unchanged.
    pub fn is_noop(&self) -> bool {
        self.notes_inserted == 0 && self.keywords_attached == 0
    }
}

/// Merges every note of `remote` into `local`.
///
/// The merge is additive and deterministic. Remote notes are visited in id
/// order and matched to local notes by natural key (title plus url, or title
/// plus file path when the url is absent). Unmatched notes are inserted with
/// all their fields and keywords; matched notes gain the remote keywords they
/// lack while their local fields are kept. Nothing is ever deleted.
///
/// All writes happen in one transaction on `local`; on error nothing is
/// applied.
pub fn merge(local: &NoteStore, remote: &NoteStore) -> StorageResult<MergeReport> {
    let remote_notes = remote.try_all_notes()?;
    let tx = local.conn()?.unchecked_transaction()?;
    let mut report = MergeReport::default();

    for note in &remote_notes {
        let existing = find_by_natural_key(
            &tx,
            &note.title,
            note.url.as_deref(),
            note.file_path.as_deref(),
        )?;

        let target = match existing {
            Some(id) => {
                report.notes_matched += 1;
                if let Some(local_note) = load_note(&tx, id)?
                    && local_note.content != note.content
                {
                    warn!(
                        note_id = %id,
                        title = %note.title,
                        "remote note differs from local copy, keeping local content"
                    );
                    report.conflicts += 1;
                }
                id
            }
            None => {
                report.notes_inserted += 1;
                insert_note(&tx, &NoteRow::from(note))?
            }
        };

        for word in &note.keywords {
            if attach_keyword(&tx, target, word)? {
                report.keywords_attached += 1;
            }
        }
    }

    tx.commit()?;
    debug!(?report, remote_notes = remote_notes.len(), "merged remote store");
    Ok(report)
}
