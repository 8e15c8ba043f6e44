use anyhow::Result;
use notesync::utils::parse_keywords;
use notesync::{NewNote, NoteStore, NoteUpdate};

/// Helper that mimics what the capture side does: parse the keyword input
/// and store the note.
fn capture(store: &NoteStore, title: &str, url: &str, keywords: &str) -> Result<i64> {
    let note = NewNote::new(title, format!("Body of {title}"))
        .url(url)
        .domain("example.com")
        .keywords(parse_keywords(keywords));
    Ok(store.add_note(&note)?.get())
}

#[test]
fn test_captured_notes_are_searchable() -> Result<()> {
    // Arrange
    let store = NoteStore::in_memory()?;
    capture(&store, "Rust ownership", "https://a.example.com", "rust，memory")?;
    capture(&store, "SQLite WAL", "https://b.example.com", "sqlite")?;

    // Act
    let by_keyword = store.search_notes("MEMORY");
    let by_title = store.search_notes("wal");

    // Assert
    assert_eq!(by_keyword.len(), 1);
    assert_eq!(by_keyword[0].title, "Rust ownership");
    assert_eq!(by_title.len(), 1);
    assert_eq!(by_title[0].keywords, vec!["sqlite"]);
    Ok(())
}

#[test]
fn test_keyword_lifecycle_follows_notes() -> Result<()> {
    // Arrange
    let store = NoteStore::in_memory()?;
    let first = capture(&store, "One", "https://1.example.com", "shared, only-one")?;
    let second = capture(&store, "Two", "https://2.example.com", "shared")?;

    // Act: deleting the first note orphans only its private keyword
    assert!(store.delete_note(notesync::NoteId::new(first)));

    // Assert
    assert_eq!(store.get_all_keywords(), vec!["shared"]);
    let index = store.get_keyword_index();
    assert_eq!(index["shared"].len(), 1);
    assert_eq!(index["shared"][0].id.get(), second);
    Ok(())
}

#[test]
fn test_updates_survive_reopen() -> Result<()> {
    // Arrange
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("notes.db");
    let id = {
        let store = NoteStore::open(&path)?;
        let id = store.add_note(&NewNote::new("Draft", "v1").keywords(["wip"]))?;
        let update = NoteUpdate::new()
            .content("v2")
            .ai_prompt("Summarise")
            .ai_response("A draft");
        assert!(store.update_note(id, &update));
        store.close()?;
        id
    };

    // Act
    let store = NoteStore::open(&path)?;
    let note = store.get_note_by_id(id).expect("note should survive reopen");

    // Assert
    assert_eq!(note.title, "Draft");
    assert_eq!(note.content, "v2");
    assert_eq!(note.ai_response.as_deref(), Some("A draft"));
    assert_eq!(note.keywords, vec!["wip"]);
    Ok(())
}

#[test]
fn test_listing_reports_every_note_once() -> Result<()> {
    // Arrange
    let store = NoteStore::in_memory()?;
    for i in 0..5 {
        capture(&store, &format!("Note {i}"), &format!("https://{i}.example.com"), "a,b")?;
    }

    // Act
    let notes = store.get_all_notes_with_keywords();

    // Assert
    assert_eq!(notes.len(), 5);
    assert_eq!(store.count_notes(), 5);
    assert!(notes.iter().all(|n| n.keywords == vec!["a", "b"]));
    Ok(())
}
