use serde::{Deserialize, Serialize};

use super::NoteId;

/// A captured document with its keywords.
///
/// Notes are the primary unit of knowledge capture. The scalar fields come
/// from the scraper or PDF extractor; `ai_prompt` and `ai_response` are filled
/// in later and stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier assigned by the store.
    pub id: NoteId,
    pub title: String,
    /// Full extracted text.
    pub content: String,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub author: Option<String>,
    /// Creation date as reported by the source, ISO-8601-like text.
    pub creation_date: Option<String>,
    /// Set when the note was captured from a local file.
    pub file_path: Option<String>,
    pub ai_prompt: Option<String>,
    pub ai_response: Option<String>,
    /// Keyword texts, in storage order.
    pub keywords: Vec<String>,
}

impl Note {
    /// Returns the second half of the natural key: the url, or the file path
    /// when the note has no url.
    pub fn locator(&self) -> Option<&str> {
        self.url.as_deref().or(self.file_path.as_deref())
    }
}

/// A record handed to the store by a capture collaborator.
///
/// # Examples
///
/// ```
/// use notesync::NewNote;
///
/// let note = NewNote::new("Rust ownership", "Ownership is...")
///     .url("https://doc.rust-lang.org/book/ch04-01-what-is-ownership.html")
///     .domain("doc.rust-lang.org")
///     .keywords(["rust", "memory"]);
///
/// assert_eq!(note.title, "Rust ownership");
/// assert_eq!(note.keywords, vec!["rust", "memory"]);
/// assert!(note.file_path.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub author: Option<String>,
    pub creation_date: Option<String>,
    pub file_path: Option<String>,
    pub keywords: Vec<String>,
}

impl NewNote {
    /// Creates a record with the two required fields.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn creation_date(mut self, creation_date: impl Into<String>) -> Self {
        self.creation_date = Some(creation_date.into());
        self
    }

    pub fn file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    /// Replaces the keyword list.
    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}
