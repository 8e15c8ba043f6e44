/// A partial update of a note's scalar fields.
///
/// Each member is `None` when the field is left alone. Nullable columns use
/// `Some(None)` to clear the stored value. Keyword associations are never
/// touched by an update.
///
/// # Examples
///
/// ```
/// use notesync::NoteUpdate;
///
/// let update = NoteUpdate::new()
///     .ai_prompt("Summarise this article")
///     .ai_response("It is about ownership.");
///
/// assert!(!update.is_empty());
/// assert_eq!(update.title, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub url: Option<Option<String>>,
    pub domain: Option<Option<String>>,
    pub author: Option<Option<String>>,
    pub creation_date: Option<Option<String>>,
    pub file_path: Option<Option<String>>,
    pub ai_prompt: Option<Option<String>>,
    pub ai_response: Option<Option<String>>,
}

/// A bound value for one column of an UPDATE statement.
pub(crate) type ColumnValue<'a> = (&'static str, Option<&'a str>);

impl NoteUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn url(mut self, url: Option<impl Into<String>>) -> Self {
        self.url = Some(url.map(Into::into));
        self
    }

    pub fn domain(mut self, domain: Option<impl Into<String>>) -> Self {
        self.domain = Some(domain.map(Into::into));
        self
    }

    pub fn author(mut self, author: Option<impl Into<String>>) -> Self {
        self.author = Some(author.map(Into::into));
        self
    }

    pub fn creation_date(mut self, creation_date: Option<impl Into<String>>) -> Self {
        self.creation_date = Some(creation_date.map(Into::into));
        self
    }

    pub fn file_path(mut self, file_path: Option<impl Into<String>>) -> Self {
        self.file_path = Some(file_path.map(Into::into));
        self
    }

    pub fn ai_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.ai_prompt = Some(Some(prompt.into()));
        self
    }

    pub fn ai_response(mut self, response: impl Into<String>) -> Self {
        self.ai_response = Some(Some(response.into()));
        self
    }

    /// Returns true when no field is set.
    pub fn is_empty(&self) -> bool {
        self.columns().is_empty()
    }

    /// Lists the columns to write, in a fixed order.
    ///
    /// Column names come from this list only, never from caller input.
    pub(crate) fn columns(&self) -> Vec<ColumnValue<'_>> {
        let mut columns = Vec::new();
        if let Some(title) = &self.title {
            columns.push(("title", Some(title.as_str())));
        }
        if let Some(content) = &self.content {
            columns.push(("content", Some(content.as_str())));
        }
        let nullable = [
            ("url", &self.url),
            ("domain", &self.domain),
            ("author", &self.author),
            ("creation_date", &self.creation_date),
            ("file_path", &self.file_path),
            ("ai_prompt", &self.ai_prompt),
            ("ai_response", &self.ai_response),
        ];
        for (name, value) in nullable {
            if let Some(value) = value {
                columns.push((name, value.as_deref()));
            }
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_update_is_empty() {
        assert!(NoteUpdate::default().is_empty());
    }

    #[test]
    fn columns_follow_fixed_order() {
        let update = NoteUpdate::new()
            .ai_response("answer")
            .title("New title")
            .url(None::<String>);

        let names: Vec<&str> = update.columns().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["title", "url", "ai_response"]);
    }

    #[test]
    fn clearing_a_nullable_field_binds_null() {
        let update = NoteUpdate::new().author(None::<&str>);

        assert_eq!(update.columns(), vec![("author", None)]);
    }
}
