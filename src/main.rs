use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use notesync::sync::{StartupAction, worker};
use notesync::utils::{ensure_database_directory, parse_keywords, resolve_database_path};
use notesync::{
    Config, ConfigError, NewNote, NoteId, NoteStore, NoteUpdate, SyncEngine, SyncEvent,
    SyncOutcome,
};

/// notesync - local-first notes with a synchronized cloud copy
#[derive(Parser)]
#[command(name = "notesync")]
#[command(about = "Capture notes locally and keep one copy synchronized in object storage")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Add a new note
    Add(AddCommand),
    /// Show one note with all its fields
    Show(ShowCommand),
    /// Case-insensitive search over titles, contents and keywords
    Search(SearchCommand),
    /// List every note with its keywords
    List(OutputFormat),
    /// List keywords, optionally with the notes under each
    Keywords(KeywordsCommand),
    /// List the notes carrying a keyword
    ByKeyword(ByKeywordCommand),
    /// Attach keywords to a note
    Tag(TagCommand),
    /// Detach a keyword from a note
    Untag(UntagCommand),
    /// Change fields of a note
    Update(UpdateCommand),
    /// Delete a note
    Delete(DeleteCommand),
    /// Reconcile the local store with the cloud copy at start-up
    Init,
    /// Synchronize the local store with the cloud copy
    Sync(OutputFormat),
}

#[derive(Args)]
struct OutputFormat {
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

/// Add a new note
#[derive(Args)]
struct AddCommand {
    /// Title of the note
    #[arg(value_name = "TITLE")]
    title: String,

    /// Body text of the note
    #[arg(short, long, default_value = "")]
    content: String,

    /// Comma-separated keywords (`,` or `，`)
    #[arg(short, long, value_name = "KEYWORDS")]
    keywords: Option<String>,

    #[arg(long)]
    url: Option<String>,

    #[arg(long)]
    domain: Option<String>,

    #[arg(long)]
    author: Option<String>,

    /// Creation date of the source, e.g. 2024-03-01T10:00:00
    #[arg(long, value_name = "DATE")]
    date: Option<String>,

    /// Local file the note was extracted from
    #[arg(long, value_name = "PATH")]
    file_path: Option<String>,
}

#[derive(Args)]
struct ShowCommand {
    id: i64,

    #[command(flatten)]
    format: OutputFormat,
}

#[derive(Args)]
struct SearchCommand {
    term: String,

    #[command(flatten)]
    format: OutputFormat,
}

#[derive(Args)]
struct KeywordsCommand {
    /// Group notes under each keyword
    #[arg(long)]
    index: bool,

    #[command(flatten)]
    format: OutputFormat,
}

#[derive(Args)]
struct ByKeywordCommand {
    keyword: String,

    #[command(flatten)]
    format: OutputFormat,
}

#[derive(Args)]
struct TagCommand {
    id: i64,

    /// Comma-separated keywords (`,` or `，`)
    keywords: String,
}

#[derive(Args)]
struct UntagCommand {
    id: i64,
    keyword: String,
}

#[derive(Args)]
struct UpdateCommand {
    id: i64,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    content: Option<String>,

    #[arg(long)]
    url: Option<String>,

    #[arg(long)]
    author: Option<String>,

    #[arg(long)]
    ai_prompt: Option<String>,

    #[arg(long)]
    ai_response: Option<String>,
}

#[derive(Args)]
struct DeleteCommand {
    id: i64,
}

/// Errors caused by the command line input rather than the system.
#[derive(Debug, Error)]
enum CliError {
    #[error("Note title cannot be empty")]
    EmptyTitle,

    #[error("Note {0} not found")]
    NoteNotFound(NoteId),

    #[error("No fields to update")]
    NothingToUpdate,

    #[error("No keywords given")]
    NoKeywords,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut out = io::stdout().lock();

    let result = match &cli.command {
        Commands::Init => handle_init(&mut out),
        Commands::Sync(format) => handle_sync(format, &mut out),
        command => open_local_store().and_then(|store| run_local(command, &store, &mut out)),
    };

    if let Err(e) = result {
        // Determine exit code based on error type
        let exit_code = if is_user_error(&e) { 1 } else { 2 };
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code);
    }
}

/// Determines if an error is a user error (vs internal error).
///
/// User errors are bad input and missing configuration. Internal errors
/// include database, network and I/O failures.
fn is_user_error(error: &anyhow::Error) -> bool {
    error
        .chain()
        .any(|cause| cause.is::<CliError>() || cause.is::<ConfigError>())
}

/// Opens the local store for commands that do not touch the remote.
fn open_local_store() -> Result<NoteStore> {
    let db_path = resolve_database_path()?;
    ensure_database_directory(&db_path)?;
    NoteStore::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))
}

/// Runs a store-only command against `store`.
fn run_local(command: &Commands, store: &NoteStore, out: &mut dyn Write) -> Result<()> {
    match command {
        Commands::Add(cmd) => execute_add(cmd, store, out),
        Commands::Show(cmd) => execute_show(cmd, store, out),
        Commands::Search(cmd) => execute_search(cmd, store, out),
        Commands::List(format) => execute_list(format, store, out),
        Commands::Keywords(cmd) => execute_keywords(cmd, store, out),
        Commands::ByKeyword(cmd) => execute_by_keyword(cmd, store, out),
        Commands::Tag(cmd) => execute_tag(cmd, store, out),
        Commands::Untag(cmd) => execute_untag(cmd, store, out),
        Commands::Update(cmd) => execute_update(cmd, store, out),
        Commands::Delete(cmd) => execute_delete(cmd, store, out),
        Commands::Init | Commands::Sync(_) => unreachable!("remote commands are dispatched in main"),
    }
}

fn execute_add(cmd: &AddCommand, store: &NoteStore, out: &mut dyn Write) -> Result<()> {
    if cmd.title.trim().is_empty() {
        return Err(CliError::EmptyTitle.into());
    }

    let keywords = cmd.keywords.as_deref().map(parse_keywords).unwrap_or_default();
    let mut note = NewNote::new(cmd.title.trim(), cmd.content.as_str()).keywords(keywords.iter());
    note.url = cmd.url.clone();
    note.domain = cmd.domain.clone();
    note.author = cmd.author.clone();
    note.creation_date = cmd.date.clone();
    note.file_path = cmd.file_path.clone();

    let id = store.add_note(&note).context("Failed to add note")?;

    write!(out, "Note created (id: {id})")?;
    if !keywords.is_empty() {
        write!(out, " with keywords: {}", keywords.join(", "))?;
    }
    writeln!(out)?;
    Ok(())
}

fn execute_show(cmd: &ShowCommand, store: &NoteStore, out: &mut dyn Write) -> Result<()> {
    let id = NoteId::new(cmd.id);
    let note = store.get_note_by_id(id).ok_or(CliError::NoteNotFound(id))?;

    if cmd.format.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&note)?)?;
        return Ok(());
    }

    writeln!(out, "[{}] {}", note.id, note.title)?;
    let fields = [
        ("url", &note.url),
        ("domain", &note.domain),
        ("author", &note.author),
        ("date", &note.creation_date),
        ("file", &note.file_path),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            writeln!(out, "{label}: {value}")?;
        }
    }
    if !note.keywords.is_empty() {
        writeln!(out, "keywords: {}", note.keywords.join(", "))?;
    }
    writeln!(out)?;
    writeln!(out, "{}", note.content)?;
    if let (Some(prompt), Some(response)) = (&note.ai_prompt, &note.ai_response) {
        writeln!(out)?;
        writeln!(out, "Q: {prompt}")?;
        writeln!(out, "A: {response}")?;
    }
    Ok(())
}

fn execute_search(cmd: &SearchCommand, store: &NoteStore, out: &mut dyn Write) -> Result<()> {
    let hits = store.search_notes(&cmd.term);

    if cmd.format.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&hits)?)?;
        return Ok(());
    }

    if hits.is_empty() {
        writeln!(out, "No notes match \"{}\"", cmd.term)?;
        return Ok(());
    }
    for hit in &hits {
        writeln!(out, "[{}] {}", hit.id, hit.title)?;
        if let Some(url) = &hit.url {
            writeln!(out, "    {url}")?;
        }
        if !hit.keywords.is_empty() {
            writeln!(out, "    keywords: {}", hit.keywords.join(", "))?;
        }
        writeln!(out, "    {}", hit.content_preview.replace('\n', " "))?;
    }
    Ok(())
}

fn execute_list(format: &OutputFormat, store: &NoteStore, out: &mut dyn Write) -> Result<()> {
    let notes = store.get_all_notes_with_keywords();

    if format.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&notes)?)?;
        return Ok(());
    }

    for note in &notes {
        write!(out, "[{}] {}", note.id, note.title)?;
        if let Some(author) = &note.author {
            write!(out, " ({author})")?;
        }
        if !note.keywords.is_empty() {
            write!(out, " - {}", note.keywords.join(", "))?;
        }
        writeln!(out)?;
    }
    writeln!(out, "{} note(s)", notes.len())?;
    Ok(())
}

fn execute_keywords(cmd: &KeywordsCommand, store: &NoteStore, out: &mut dyn Write) -> Result<()> {
    if !cmd.index {
        let keywords = store.get_all_keywords();
        if cmd.format.json {
            writeln!(out, "{}", serde_json::to_string_pretty(&keywords)?)?;
        } else {
            for keyword in keywords {
                writeln!(out, "{keyword}")?;
            }
        }
        return Ok(());
    }

    let index = store.get_keyword_index();
    if cmd.format.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&index)?)?;
        return Ok(());
    }
    for (keyword, notes) in &index {
        writeln!(out, "{keyword}")?;
        for note in notes {
            writeln!(out, "    [{}] {}", note.id, note.title)?;
        }
    }
    Ok(())
}

fn execute_by_keyword(cmd: &ByKeywordCommand, store: &NoteStore, out: &mut dyn Write) -> Result<()> {
    let notes = store.get_notes_by_keyword(&cmd.keyword);

    if cmd.format.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&notes)?)?;
        return Ok(());
    }
    if store.get_keyword(&cmd.keyword).is_none() {
        writeln!(out, "No keyword \"{}\"", cmd.keyword)?;
        return Ok(());
    }
    for note in &notes {
        writeln!(out, "[{}] {}", note.id, note.title)?;
    }
    Ok(())
}

fn execute_tag(cmd: &TagCommand, store: &NoteStore, out: &mut dyn Write) -> Result<()> {
    let id = NoteId::new(cmd.id);
    let keywords = parse_keywords(&cmd.keywords);
    if keywords.is_empty() {
        return Err(CliError::NoKeywords.into());
    }
    if store.get_note_by_id(id).is_none() {
        return Err(CliError::NoteNotFound(id).into());
    }

    let added: Vec<&str> = keywords
        .iter()
        .filter(|word| store.add_keyword_to_note(id, word))
        .map(String::as_str)
        .collect();
    writeln!(out, "Added {} keyword(s) to note {id}", added.len())?;
    Ok(())
}

fn execute_untag(cmd: &UntagCommand, store: &NoteStore, out: &mut dyn Write) -> Result<()> {
    let id = NoteId::new(cmd.id);
    let keyword = cmd.keyword.trim();

    if store.remove_keyword_from_note(id, keyword) {
        writeln!(out, "Removed \"{keyword}\" from note {id}")?;
    } else {
        writeln!(out, "Note {id} does not carry \"{keyword}\"")?;
    }
    Ok(())
}

fn execute_update(cmd: &UpdateCommand, store: &NoteStore, out: &mut dyn Write) -> Result<()> {
    let id = NoteId::new(cmd.id);
    let mut update = NoteUpdate::new();
    if let Some(title) = &cmd.title {
        update = update.title(title.as_str());
    }
    if let Some(content) = &cmd.content {
        update = update.content(content.as_str());
    }
    if let Some(url) = &cmd.url {
        update = update.url(Some(url.as_str()));
    }
    if let Some(author) = &cmd.author {
        update = update.author(Some(author.as_str()));
    }
    if let Some(prompt) = &cmd.ai_prompt {
        update = update.ai_prompt(prompt.as_str());
    }
    if let Some(response) = &cmd.ai_response {
        update = update.ai_response(response.as_str());
    }
    if update.is_empty() {
        return Err(CliError::NothingToUpdate.into());
    }

    if !store.update_note(id, &update) {
        return Err(CliError::NoteNotFound(id).into());
    }
    writeln!(out, "Note {id} updated")?;
    Ok(())
}

fn execute_delete(cmd: &DeleteCommand, store: &NoteStore, out: &mut dyn Write) -> Result<()> {
    let id = NoteId::new(cmd.id);
    if !store.delete_note(id) {
        return Err(CliError::NoteNotFound(id).into());
    }
    writeln!(out, "Note {id} deleted")?;
    Ok(())
}

/// Handles the init command: start-up reconciliation against the remote.
fn handle_init(out: &mut dyn Write) -> Result<()> {
    let config = Config::from_env()?;
    let engine = SyncEngine::new(config.build_object_store().context("Failed to set up object store")?);
    ensure_database_directory(&config.local_db_path)?;

    let (store, action) = engine
        .reconcile_on_startup(&config.local_db_path)
        .context("Start-up reconciliation failed")?;

    let message = match &action {
        StartupAction::Downloaded => "Downloaded the cloud copy".to_string(),
        StartupAction::Uploaded => "Uploaded the local store".to_string(),
        StartupAction::Synced(outcome) => describe_outcome(outcome),
        StartupAction::UpToDate => "Local store is up to date".to_string(),
    };
    writeln!(out, "{message} ({} notes)", store.count_notes())?;
    store.close().context("Failed to close database")?;
    Ok(())
}

/// Handles the sync command, running the sync on a worker thread and
/// printing progress as it arrives.
fn handle_sync(format: &OutputFormat, out: &mut dyn Write) -> Result<()> {
    let config = Config::from_env()?;
    let engine = Arc::new(SyncEngine::new(
        config.build_object_store().context("Failed to set up object store")?,
    ));
    let store = open_store_at(&config.local_db_path)?;

    let (events, handle) = worker::spawn_sync(engine, store);
    for event in events {
        if let SyncEvent::InProgress(state) = event
            && !format.json
        {
            writeln!(out, "{state}...")?;
        }
    }
    let (store, result) = handle
        .join()
        .map_err(|_| anyhow::anyhow!("sync worker panicked"))?;
    let outcome = result.context("Sync failed")?;
    store.close().context("Failed to close database")?;

    if format.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&outcome)?)?;
    } else {
        writeln!(out, "{}", describe_outcome(&outcome))?;
    }
    Ok(())
}

fn open_store_at(path: &Path) -> Result<NoteStore> {
    ensure_database_directory(path)?;
    NoteStore::open(path).with_context(|| format!("Failed to open database at {}", path.display()))
}

fn describe_outcome(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::UpToDate { .. } => "Already in sync".to_string(),
        SyncOutcome::Published { .. } => "Published the local store".to_string(),
        SyncOutcome::Merged { report, .. } => format!(
            "Merged: {} new note(s), {} matched, {} keyword(s) attached, {} conflict(s)",
            report.notes_inserted, report.notes_matched, report.keywords_attached, report.conflicts
        ),
    }
}
