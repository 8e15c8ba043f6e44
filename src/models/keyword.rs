use serde::{Deserialize, Serialize};

use super::KeywordId;

/// A tag attached to one or more notes.
///
/// `word` is unique across the store and compared case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Keyword {
    id: KeywordId,
    word: String,
}

impl Keyword {
    /// Creates a keyword value.
    ///
    /// # Examples
    ///
    /// ```
    /// use notesync::{Keyword, KeywordId};
    ///
    /// let keyword = Keyword::new(KeywordId::new(1), "rust");
    /// assert_eq!(keyword.id(), KeywordId::new(1));
    /// assert_eq!(keyword.word(), "rust");
    /// ```
    pub fn new(id: KeywordId, word: impl Into<String>) -> Self {
        Self {
            id,
            word: word.into(),
        }
    }

    pub fn id(&self) -> KeywordId {
        self.id
    }

    pub fn word(&self) -> &str {
        &self.word
    }
}
