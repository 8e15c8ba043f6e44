/// Base schema for the notes store.
///
/// Table names match the files written by earlier versions of the tool, so an
/// existing `notes.db` opens without conversion. Uses IF NOT EXISTS for
/// idempotent execution.
pub const INITIAL_SCHEMA: &str = r#"
-- Notes table: one captured document per row
CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    url TEXT,
    domain TEXT
);

-- Keywords table: unique, case-sensitive keyword texts
CREATE TABLE IF NOT EXISTS keywords (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    word TEXT NOT NULL UNIQUE
);

-- Junction table: links notes to keywords (many-to-many)
CREATE TABLE IF NOT EXISTS note_keyword (
    note_id INTEGER NOT NULL,
    keyword_id INTEGER NOT NULL,
    PRIMARY KEY (note_id, keyword_id),
    FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE,
    FOREIGN KEY (keyword_id) REFERENCES keywords(id) ON DELETE CASCADE
);
"#;

/// Column additions for files created before the metadata fields existed.
///
/// One statement per line; "duplicate column" failures are expected on
/// up-to-date files and ignored by the caller.
pub const MIGRATIONS: &str = r#"
ALTER TABLE notes ADD COLUMN author TEXT
ALTER TABLE notes ADD COLUMN creation_date TEXT
ALTER TABLE notes ADD COLUMN file_path TEXT
ALTER TABLE notes ADD COLUMN ai_prompt TEXT
ALTER TABLE notes ADD COLUMN ai_response TEXT
"#;

/// Removes duplicate association rows left by files whose join table had no
/// primary key. Must run before [`INDEXES`] creates the unique pair index.
pub const DEDUPLICATE_ASSOCIATIONS: &str = r#"
DELETE FROM note_keyword
WHERE rowid NOT IN (
    SELECT MIN(rowid) FROM note_keyword GROUP BY note_id, keyword_id
);
"#;

/// Lookup indexes.
pub const INDEXES: &str = r#"
-- Enforces one association per pair on legacy tables too
CREATE UNIQUE INDEX IF NOT EXISTS idx_note_keyword_pair ON note_keyword(note_id, keyword_id);

-- Orphan checks and keyword joins
CREATE INDEX IF NOT EXISTS idx_note_keyword_keyword ON note_keyword(keyword_id);

-- Title lookup and merge natural key
CREATE INDEX IF NOT EXISTS idx_notes_title ON notes(title);
"#;
