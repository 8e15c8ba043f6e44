use serde::{Deserialize, Serialize};

use super::NoteId;

/// Number of characters of content carried by a search hit.
pub const PREVIEW_CHARS: usize = 200;

/// One row of a substring search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: NoteId,
    pub title: String,
    pub url: Option<String>,
    pub keywords: Vec<String>,
    /// First [`PREVIEW_CHARS`] characters of the note content.
    pub content_preview: String,
}

/// A note as listed in the overview: enough to render a tree row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteSummary {
    pub id: NoteId,
    pub title: String,
    pub author: Option<String>,
    pub keywords: Vec<String>,
}

/// A note reference grouped under a keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRef {
    pub id: NoteId,
    pub title: String,
    pub url: Option<String>,
    pub domain: Option<String>,
}

/// Truncates `content` to at most [`PREVIEW_CHARS`] characters.
///
/// Counts `char`s so multi-byte text is never split inside a code point.
pub fn content_preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((byte_index, _)) => content[..byte_index].to_string(),
        None => content.to_string(),
    }
}
