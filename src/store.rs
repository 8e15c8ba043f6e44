use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, ToSql, params};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::db::{Database, StorageError, StorageResult};
use crate::fingerprint::Fingerprint;
use crate::models::{
    Keyword, KeywordId, NewNote, Note, NoteId, NoteRef, NoteSummary, NoteUpdate, SearchHit,
    content_preview,
};

/// Local storage engine for notes and keywords.
///
/// NoteStore owns a [`Database`] and is the single writer of the store file.
/// Read operations and `delete_note`/`update_note` log storage failures and
/// report them as `None`, an empty list or `false`; `add_note` rolls back and
/// returns the error.
///
/// # Examples
///
/// ```
/// use notesync::{NewNote, NoteStore};
///
/// # fn main() -> anyhow::Result<()> {
/// let store = NoteStore::in_memory()?;
/// let id = store.add_note(&NewNote::new("Ownership", "Each value has an owner").keywords(["rust"]))?;
///
/// let note = store.get_note_by_id(id).expect("note should exist");
/// assert_eq!(note.keywords, vec!["rust"]);
/// # Ok(())
/// # }
/// ```
pub struct NoteStore {
    /// `None` once a reopen failed; every later call reports
    /// [`StorageError::Closed`].
    db: Option<Database>,
}

impl NoteStore {
    /// Wraps an already opened database.
    pub fn new(db: Database) -> Self {
        Self { db: Some(db) }
    }

    /// Opens (or creates) the store file at `path`.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Opens an existing store file for reading only.
    pub fn open_read_only(path: impl AsRef<Path>) -> StorageResult<Self> {
        Ok(Self::new(Database::open_read_only(path)?))
    }

    /// Opens a throwaway in-memory store.
    pub fn in_memory() -> StorageResult<Self> {
        Ok(Self::new(Database::in_memory()?))
    }

    /// Returns the underlying database, or `None` after a failed reopen.
    pub fn database(&self) -> Option<&Database> {
        self.db.as_ref()
    }

    /// Returns the store file path, or `None` for in-memory and closed stores.
    pub fn path(&self) -> Option<&Path> {
        self.db.as_ref().and_then(Database::path)
    }

    /// Inserts a note and attaches its keywords in one transaction.
    ///
    /// Keywords are looked up by exact text and created when missing;
    /// repeated keywords in the input are attached once. On any failure the
    /// whole call is rolled back.
    pub fn add_note(&self, note: &NewNote) -> StorageResult<NoteId> {
        let result: StorageResult<NoteId> = (|| {
            let tx = self.conn()?.unchecked_transaction()?;
            let id = insert_note(&tx, &NoteRow::from(note))?;
            for word in &note.keywords {
                attach_keyword(&tx, id, word)?;
            }
            tx.commit()?;
            Ok(id)
        })();

        match &result {
            Ok(id) => debug!(note_id = %id, keywords = note.keywords.len(), "added note"),
            Err(e) => warn!(title = %note.title, error = %e, "add_note rolled back"),
        }
        result
    }

    /// Returns the note with its keywords, or `None` when it does not exist.
    pub fn get_note_by_id(&self, id: NoteId) -> Option<Note> {
        recover(
            "get_note_by_id",
            self.conn().and_then(|conn| load_note(conn, id)),
        )
    }

    /// Returns every note carrying exactly the keyword `word`.
    pub fn get_notes_by_keyword(&self, word: &str) -> Vec<Note> {
        recover("get_notes_by_keyword", self.try_notes_by_keyword(word))
    }

    /// Case-insensitive substring search over titles, contents and keywords.
    ///
    /// Each matching note appears once, whichever fields matched.
    pub fn search_notes(&self, term: &str) -> Vec<SearchHit> {
        recover("search_notes", self.try_search_notes(term))
    }

    /// Deletes a note, its associations and any keyword left without notes.
    ///
    /// Returns `false` when the note does not exist or the delete failed; a
    /// failed delete leaves the store unchanged.
    pub fn delete_note(&self, id: NoteId) -> bool {
        recover("delete_note", self.try_delete_note(id))
    }

    /// Applies a partial update to a note's scalar fields.
    ///
    /// Returns `false` for an unknown id or a storage failure.
    pub fn update_note(&self, id: NoteId, update: &NoteUpdate) -> bool {
        recover("update_note", self.try_update_note(id, update))
    }

    /// Returns the lowest id among notes titled exactly `title`.
    pub fn get_note_id_by_title(&self, title: &str) -> Option<NoteId> {
        let result: StorageResult<Option<NoteId>> = (|| {
            let id = self
                .conn()?
                .query_row(
                    "SELECT id FROM notes WHERE title = ?1 ORDER BY id LIMIT 1",
                    [title],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok(id.map(NoteId::new))
        })();
        recover("get_note_id_by_title", result)
    }

    /// Lists every note with its keywords, read from a single snapshot.
    pub fn get_all_notes_with_keywords(&self) -> Vec<NoteSummary> {
        recover(
            "get_all_notes_with_keywords",
            self.try_all_notes_with_keywords(),
        )
    }

    /// Lists the distinct keyword texts.
    pub fn get_all_keywords(&self) -> Vec<String> {
        let result: StorageResult<Vec<String>> = (|| {
            let mut stmt = self.conn()?.prepare("SELECT word FROM keywords ORDER BY id")?;
            let words = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(words)
        })();
        recover("get_all_keywords", result)
    }

    /// Looks up a keyword by its exact text.
    pub fn get_keyword(&self, word: &str) -> Option<Keyword> {
        let result = self
            .conn()
            .and_then(|conn| find_keyword(conn, word))
            .map(|id| id.map(|id| Keyword::new(id, word)));
        recover("get_keyword", result)
    }

    /// Attaches one keyword to an existing note.
    ///
    /// Returns `true` when a new association was created, `false` when the
    /// note does not exist or already carries the keyword.
    pub fn add_keyword_to_note(&self, id: NoteId, word: &str) -> bool {
        let result: StorageResult<bool> = (|| {
            let tx = self.conn()?.unchecked_transaction()?;
            if !note_exists(&tx, id)? {
                return Ok(false);
            }
            let attached = attach_keyword(&tx, id, word)?;
            tx.commit()?;
            Ok(attached)
        })();
        recover("add_keyword_to_note", result)
    }

    /// Detaches one keyword from a note, dropping the keyword if it is now
    /// orphaned.
    ///
    /// Returns `false` when the note did not carry the keyword.
    pub fn remove_keyword_from_note(&self, id: NoteId, word: &str) -> bool {
        let result: StorageResult<bool> = (|| {
            let tx = self.conn()?.unchecked_transaction()?;
            let Some(keyword_id) = find_keyword(&tx, word)? else {
                return Ok(false);
            };
            let removed = tx.execute(
                "DELETE FROM note_keyword WHERE note_id = ?1 AND keyword_id = ?2",
                params![id.get(), keyword_id.get()],
            )?;
            if removed == 0 {
                return Ok(false);
            }
            remove_orphan_keywords(&tx, &[keyword_id])?;
            tx.commit()?;
            Ok(true)
        })();
        recover("remove_keyword_from_note", result)
    }

    /// Returns the keyword texts attached to a note.
    pub fn get_keywords_for_note(&self, id: NoteId) -> Vec<String> {
        recover(
            "get_keywords_for_note",
            self.conn().and_then(|conn| note_keywords(conn, id)),
        )
    }

    /// Groups notes under each keyword, keyed by keyword text.
    pub fn get_keyword_index(&self) -> BTreeMap<String, Vec<NoteRef>> {
        recover("get_keyword_index", self.try_keyword_index())
    }

    /// Returns the number of notes in the store.
    pub fn count_notes(&self) -> usize {
        let result: StorageResult<usize> = (|| {
            let count = self
                .conn()?
                .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get::<_, i64>(0))?;
            Ok(count as usize)
        })();
        recover("count_notes", result)
    }

    /// Fingerprints the store file as it is on disk.
    pub fn fingerprint(&self) -> StorageResult<Fingerprint> {
        let path = self.live()?.path().ok_or(StorageError::NotFileBacked)?;
        Ok(Fingerprint::of_file(path)?)
    }

    /// Reopens the store file, discarding cached state.
    ///
    /// The new handle is opened before the old one is released. If the file
    /// cannot be opened the store is closed and later calls fail with
    /// [`StorageError::Closed`].
    pub fn reopen(&mut self) -> StorageResult<()> {
        let path = self.file_path()?;
        self.open_in_place(&path)
    }

    /// Replaces the store file with `replacement` and reopens it.
    ///
    /// On a failed rename the current handle stays open on the original
    /// file. A renamed file that cannot be opened closes the store, as in
    /// [`NoteStore::reopen`].
    pub(crate) fn replace_file(&mut self, replacement: NamedTempFile) -> StorageResult<()> {
        let path = self.file_path()?;
        replacement
            .persist(&path)
            .map_err(|e| StorageError::Io(e.error))?;
        self.open_in_place(&path)
    }

    /// Releases the underlying file handle.
    pub fn close(self) -> StorageResult<()> {
        match self.db {
            Some(db) => db.close(),
            None => Ok(()),
        }
    }

    pub(crate) fn conn(&self) -> StorageResult<&Connection> {
        Ok(self.live()?.connection())
    }

    fn live(&self) -> StorageResult<&Database> {
        self.db.as_ref().ok_or(StorageError::Closed)
    }

    fn file_path(&self) -> StorageResult<PathBuf> {
        Ok(self
            .live()?
            .path()
            .ok_or(StorageError::NotFileBacked)?
            .to_path_buf())
    }

    /// Opens `path` and installs it as the live handle, closing the previous
    /// one. On failure the store ends up closed.
    fn open_in_place(&mut self, path: &Path) -> StorageResult<()> {
        let opened = Database::open(path);
        if let Some(old) = self.db.take()
            && let Err(e) = old.close()
        {
            warn!(error = %e, "failed to close previous store handle");
        }
        match opened {
            Ok(fresh) => {
                self.db = Some(fresh);
                Ok(())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "store file cannot be reopened, store closed");
                Err(e)
            }
        }
    }

    /// Loads every note with its keywords, in id order.
    pub(crate) fn try_all_notes(&self) -> StorageResult<Vec<Note>> {
        let tx = self.conn()?.unchecked_transaction()?;
        let ids = {
            let mut stmt = tx.prepare("SELECT id FROM notes ORDER BY id")?;
            stmt.query_map([], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?
        };
        let mut notes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(note) = load_note(&tx, NoteId::new(id))? {
                notes.push(note);
            }
        }
        Ok(notes)
    }

    fn try_notes_by_keyword(&self, word: &str) -> StorageResult<Vec<Note>> {
        let tx = self.conn()?.unchecked_transaction()?;
        let ids = {
            let mut stmt = tx.prepare(
                "SELECT n.id
                 FROM notes n
                 JOIN note_keyword nk ON nk.note_id = n.id
                 JOIN keywords k ON k.id = nk.keyword_id
                 WHERE k.word = ?1
                 ORDER BY n.id",
            )?;
            stmt.query_map([word], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?
        };
        let mut notes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(note) = load_note(&tx, NoteId::new(id))? {
                notes.push(note);
            }
        }
        Ok(notes)
    }

    fn try_search_notes(&self, term: &str) -> StorageResult<Vec<SearchHit>> {
        // Matching happens here rather than in SQL: LIKE only folds ASCII case.
        let needle = term.to_lowercase();
        let matches = |text: &str| text.to_lowercase().contains(&needle);

        let tx = self.conn()?.unchecked_transaction()?;
        let mut keywords = keyword_map(&tx)?;
        let mut stmt = tx.prepare("SELECT id, title, content, url FROM notes ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, title, content, url) = row?;
            let note_keywords = keywords.remove(&id).unwrap_or_default();
            if matches(&title) || matches(&content) || note_keywords.iter().any(|k| matches(k)) {
                hits.push(SearchHit {
                    id: NoteId::new(id),
                    title,
                    url,
                    keywords: note_keywords,
                    content_preview: content_preview(&content),
                });
            }
        }
        Ok(hits)
    }

    fn try_delete_note(&self, id: NoteId) -> StorageResult<bool> {
        let tx = self.conn()?.unchecked_transaction()?;
        let keyword_ids = note_keyword_ids(&tx, id)?;

        tx.execute("DELETE FROM note_keyword WHERE note_id = ?1", [id.get()])?;
        let deleted = tx.execute("DELETE FROM notes WHERE id = ?1", [id.get()])?;
        if deleted == 0 {
            return Ok(false);
        }

        let orphans = remove_orphan_keywords(&tx, &keyword_ids)?;
        tx.commit()?;
        debug!(note_id = %id, orphans, "deleted note");
        Ok(true)
    }

    fn try_update_note(&self, id: NoteId, update: &NoteUpdate) -> StorageResult<bool> {
        let columns = update.columns();
        if columns.is_empty() {
            return note_exists(self.conn()?, id);
        }

        let assignments: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, (name, _))| format!("{} = ?{}", name, i + 1))
            .collect();
        let sql = format!(
            "UPDATE notes SET {} WHERE id = ?{}",
            assignments.join(", "),
            columns.len() + 1
        );

        let note_id = id.get();
        let mut values: Vec<&dyn ToSql> = columns.iter().map(|(_, v)| v as &dyn ToSql).collect();
        values.push(&note_id);

        let changed = self
            .conn()?
            .execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(changed > 0)
    }

    fn try_all_notes_with_keywords(&self) -> StorageResult<Vec<NoteSummary>> {
        let tx = self.conn()?.unchecked_transaction()?;
        let mut keywords = keyword_map(&tx)?;
        let mut stmt = tx.prepare("SELECT id, title, author FROM notes ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, title, author) = row?;
            summaries.push(NoteSummary {
                id: NoteId::new(id),
                title,
                author,
                keywords: keywords.remove(&id).unwrap_or_default(),
            });
        }
        Ok(summaries)
    }

    fn try_keyword_index(&self) -> StorageResult<BTreeMap<String, Vec<NoteRef>>> {
        let mut stmt = self.conn()?.prepare(
            "SELECT k.word, n.id, n.title, n.url, n.domain
             FROM keywords k
             JOIN note_keyword nk ON nk.keyword_id = k.id
             JOIN notes n ON n.id = nk.note_id
             ORDER BY k.word, n.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                NoteRef {
                    id: NoteId::new(row.get(1)?),
                    title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    url: row.get(3)?,
                    domain: row.get(4)?,
                },
            ))
        })?;

        let mut index: BTreeMap<String, Vec<NoteRef>> = BTreeMap::new();
        for row in rows {
            let (word, note) = row?;
            index.entry(word).or_default().push(note);
        }
        Ok(index)
    }
}

/// Logs a storage failure and substitutes the type's empty value.
fn recover<T: Default>(operation: &str, result: StorageResult<T>) -> T {
    result.unwrap_or_else(|e| {
        warn!(operation, error = %e, "storage operation failed");
        T::default()
    })
}

/// Scalar columns of a note row, borrowed from whichever record supplies them.
pub(crate) struct NoteRow<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub url: Option<&'a str>,
    pub domain: Option<&'a str>,
    pub author: Option<&'a str>,
    pub creation_date: Option<&'a str>,
    pub file_path: Option<&'a str>,
    pub ai_prompt: Option<&'a str>,
    pub ai_response: Option<&'a str>,
}

impl<'a> From<&'a NewNote> for NoteRow<'a> {
    fn from(note: &'a NewNote) -> Self {
        Self {
            title: &note.title,
            content: &note.content,
            url: note.url.as_deref(),
            domain: note.domain.as_deref(),
            author: note.author.as_deref(),
            creation_date: note.creation_date.as_deref(),
            file_path: note.file_path.as_deref(),
            ai_prompt: None,
            ai_response: None,
        }
    }
}

impl<'a> From<&'a Note> for NoteRow<'a> {
    fn from(note: &'a Note) -> Self {
        Self {
            title: &note.title,
            content: &note.content,
            url: note.url.as_deref(),
            domain: note.domain.as_deref(),
            author: note.author.as_deref(),
            creation_date: note.creation_date.as_deref(),
            file_path: note.file_path.as_deref(),
            ai_prompt: note.ai_prompt.as_deref(),
            ai_response: note.ai_response.as_deref(),
        }
    }
}

pub(crate) fn insert_note(conn: &Connection, row: &NoteRow<'_>) -> StorageResult<NoteId> {
    conn.execute(
        "INSERT INTO notes
         (title, content, url, domain, author, creation_date, file_path, ai_prompt, ai_response)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            row.title,
            row.content,
            row.url,
            row.domain,
            row.author,
            row.creation_date,
            row.file_path,
            row.ai_prompt,
            row.ai_response,
        ],
    )?;
    Ok(NoteId::new(conn.last_insert_rowid()))
}

fn find_keyword(conn: &Connection, word: &str) -> StorageResult<Option<KeywordId>> {
    let id = conn
        .query_row("SELECT id FROM keywords WHERE word = ?1", [word], |row| {
            row.get::<_, i64>(0)
        })
        .optional()?;
    Ok(id.map(KeywordId::new))
}

/// Returns the id of keyword `word`, creating it when missing.
pub(crate) fn get_or_create_keyword(conn: &Connection, word: &str) -> StorageResult<KeywordId> {
    if let Some(id) = find_keyword(conn, word)? {
        return Ok(id);
    }
    conn.execute("INSERT INTO keywords (word) VALUES (?1)", [word])?;
    Ok(KeywordId::new(conn.last_insert_rowid()))
}

/// Links `word` to a note; returns `true` when the association is new.
pub(crate) fn attach_keyword(conn: &Connection, note: NoteId, word: &str) -> StorageResult<bool> {
    let keyword = get_or_create_keyword(conn, word)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO note_keyword (note_id, keyword_id) VALUES (?1, ?2)",
        params![note.get(), keyword.get()],
    )?;
    Ok(inserted > 0)
}

/// Deletes each candidate keyword that no longer has any association.
///
/// Only the given candidates are checked, each through the keyword_id index.
fn remove_orphan_keywords(conn: &Connection, candidates: &[KeywordId]) -> StorageResult<usize> {
    let mut removed = 0;
    for keyword in candidates {
        removed += conn.execute(
            "DELETE FROM keywords
             WHERE id = ?1
               AND NOT EXISTS (SELECT 1 FROM note_keyword WHERE keyword_id = ?1)",
            [keyword.get()],
        )?;
    }
    Ok(removed)
}

fn note_exists(conn: &Connection, id: NoteId) -> StorageResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM notes WHERE id = ?1)",
        [id.get()],
        |row| row.get(0),
    )?)
}

fn note_keyword_ids(conn: &Connection, id: NoteId) -> StorageResult<Vec<KeywordId>> {
    let mut stmt = conn.prepare("SELECT keyword_id FROM note_keyword WHERE note_id = ?1")?;
    let ids = stmt
        .query_map([id.get()], |row| row.get::<_, i64>(0))?
        .map(|r| r.map(KeywordId::new))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub(crate) fn note_keywords(conn: &Connection, id: NoteId) -> StorageResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT k.word
         FROM note_keyword nk
         JOIN keywords k ON k.id = nk.keyword_id
         WHERE nk.note_id = ?1
         ORDER BY nk.rowid",
    )?;
    let words = stmt
        .query_map([id.get()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(words)
}

/// Maps note id to its keyword texts for every note in the store.
fn keyword_map(conn: &Connection) -> StorageResult<HashMap<i64, Vec<String>>> {
    let mut stmt = conn.prepare(
        "SELECT nk.note_id, k.word
         FROM note_keyword nk
         JOIN keywords k ON k.id = nk.keyword_id
         ORDER BY nk.rowid",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

    let mut map: HashMap<i64, Vec<String>> = HashMap::new();
    for row in rows {
        let (note_id, word) = row?;
        map.entry(note_id).or_default().push(word);
    }
    Ok(map)
}

pub(crate) fn load_note(conn: &Connection, id: NoteId) -> StorageResult<Option<Note>> {
    let row = conn
        .query_row(
            "SELECT id, title, content, url, domain, author, creation_date, file_path,
                    ai_prompt, ai_response
             FROM notes WHERE id = ?1",
            [id.get()],
            |row| {
                Ok(Note {
                    id: NoteId::new(row.get(0)?),
                    title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    url: row.get(3)?,
                    domain: row.get(4)?,
                    author: row.get(5)?,
                    creation_date: row.get(6)?,
                    file_path: row.get(7)?,
                    ai_prompt: row.get(8)?,
                    ai_response: row.get(9)?,
                    keywords: Vec::new(),
                })
            },
        )
        .optional()?;

    match row {
        Some(mut note) => {
            note.keywords = note_keywords(conn, id)?;
            Ok(Some(note))
        }
        None => Ok(None),
    }
}

/// Finds a note by natural key: title plus url, or title plus file path
/// when `url` is absent.
pub(crate) fn find_by_natural_key(
    conn: &Connection,
    title: &str,
    url: Option<&str>,
    file_path: Option<&str>,
) -> StorageResult<Option<NoteId>> {
    let id = match (url, file_path) {
        (Some(url), _) => conn
            .query_row(
                "SELECT id FROM notes WHERE title = ?1 AND url = ?2 ORDER BY id LIMIT 1",
                params![title, url],
                |row| row.get::<_, i64>(0),
            )
            .optional()?,
        (None, Some(file_path)) => conn
            .query_row(
                "SELECT id FROM notes
                 WHERE title = ?1 AND url IS NULL AND file_path = ?2
                 ORDER BY id LIMIT 1",
                params![title, file_path],
                |row| row.get::<_, i64>(0),
            )
            .optional()?,
        (None, None) => conn
            .query_row(
                "SELECT id FROM notes
                 WHERE title = ?1 AND url IS NULL AND file_path IS NULL
                 ORDER BY id LIMIT 1",
                [title],
                |row| row.get::<_, i64>(0),
            )
            .optional()?,
    };
    Ok(id.map(NoteId::new))
}
