use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// The SQLite rowid.
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

row_id! {
    /// Row id of a note, assigned by the store and never reused.
    NoteId
}

row_id! {
    /// Row id of a keyword.
    ///
    /// Keyword ids live in their own sequence; a `KeywordId` never names a note.
    KeywordId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_id_serializes_as_raw_integer() {
        let id = NoteId::new(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");

        let deserialized: NoteId = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, id);
    }

    #[test]
    fn keyword_id_displays_raw_integer() {
        assert_eq!(KeywordId::new(7).to_string(), "7");
    }

    #[test]
    fn ids_are_not_interchangeable() {
        // Would not compile:
        // let note_id: NoteId = KeywordId::new(1);
        let note_id = NoteId::new(1);
        let keyword_id = KeywordId::new(1);

        assert_eq!(note_id.get(), keyword_id.get());
    }
}
