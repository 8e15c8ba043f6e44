mod ids;
mod keyword;
mod note;
mod note_update;
mod views;

pub use ids::{KeywordId, NoteId};
pub use keyword::Keyword;
pub use note::{NewNote, Note};
pub use note_update::NoteUpdate;
pub(crate) use note_update::ColumnValue;
pub use views::{NoteRef, NoteSummary, PREVIEW_CHARS, SearchHit, content_preview};
