//! One-shot command-line workflow.
//!
//! Every invocation starts the engine, downloads the remote list, applies a
//! single [`TaskCommand`], then closes so the change is uploaded before the
//! process exits.

use chrono::{DateTime, NaiveDate, NaiveTime};
use taskftp_proto::{Task, TaskId, TaskList};

use crate::config::TaskCommand;
use crate::sync::{SyncConfig, SyncError, SyncEvent, SyncEvents, TaskSync, WorkerState};
use crate::transport::RemoteConnector;

/// Date format accepted by `--due` and used for display.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors reported by the `taskftp` binary.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A remote or local-file failure reported by the worker.
    #[error("{0}")]
    Remote(String),

    #[error("invalid due date '{0}' (expected YYYY-MM-DD or 'none')")]
    InvalidDue(String),

    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("the sync worker stopped before the task list was loaded")]
    WorkerGone,
}

/// Run one command against the remote list and return the text to print.
///
/// # Errors
///
/// Any [`SyncEvent::Error`] seen before the list is loaded or while
/// closing, an unknown task id, or a malformed `--due` value.
pub async fn execute<C: RemoteConnector>(
    config: SyncConfig,
    connector: C,
    command: TaskCommand,
) -> Result<String, CliError> {
    // Validate before touching the remote side.
    if let TaskCommand::Edit { due: Some(due), .. } = &command {
        parse_due(due)?;
    }

    let (sync, mut events) = TaskSync::start(config, connector);
    sync.load()?;
    // Dropping `sync` on error stops the worker without rewriting the local
    // file from an unloaded collection.
    wait_loaded(&mut events).await?;

    let output = apply(&sync, command)?;

    sync.close()?;
    let state = sync.closed().await;
    tracing::debug!(?state, "sync finished");

    let errors: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event {
            SyncEvent::Error(message) => Some(message),
            _ => None,
        })
        .collect();
    if !errors.is_empty() {
        return Err(CliError::Remote(errors.join("; ")));
    }
    if state == WorkerState::Failed {
        return Err(CliError::WorkerGone);
    }
    Ok(output)
}

async fn wait_loaded(events: &mut SyncEvents) -> Result<TaskList, CliError> {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::TasksLoaded(tasks) => return Ok(tasks),
            SyncEvent::Error(message) => return Err(CliError::Remote(message)),
            _ => {}
        }
    }
    Err(CliError::WorkerGone)
}

fn apply(sync: &TaskSync, command: TaskCommand) -> Result<String, CliError> {
    match command {
        TaskCommand::List { json: true } => Ok(serde_json::to_string_pretty(&sync.tasks())?),
        TaskCommand::List { json: false } => Ok(render(&sync.tasks())),
        TaskCommand::Add { title } => Ok(sync.add(title)?.to_string()),
        TaskCommand::Done { id } => set_done(sync, &id, true),
        TaskCommand::Reopen { id } => set_done(sync, &id, false),
        TaskCommand::Remove { id } => {
            let removed = sync.remove(&TaskId::new(id))?;
            Ok(format!("removed {}", removed.title))
        }
        TaskCommand::Edit {
            id,
            title,
            comment,
            due,
        } => {
            let mut task = find(sync, &id)?;
            if let Some(title) = title {
                task.title = title;
            }
            if let Some(comment) = comment {
                task.comment = comment;
            }
            if let Some(due) = due {
                task.due = parse_due(&due)?;
            }
            sync.update(task.clone())?;
            Ok(render_task(&task))
        }
    }
}

fn set_done(sync: &TaskSync, id: &str, done: bool) -> Result<String, CliError> {
    let mut task = find(sync, id)?;
    task.done = done;
    sync.update(task.clone())?;
    Ok(render_task(&task))
}

fn find(sync: &TaskSync, id: &str) -> Result<Task, CliError> {
    let id = TaskId::new(id);
    sync.get(&id)
        .ok_or_else(|| CliError::Sync(SyncError::NotFound(id)))
}

/// Parse a `--due` value into Unix seconds at UTC midnight.
///
/// # Errors
///
/// [`CliError::InvalidDue`] unless the value is `none` or `YYYY-MM-DD`.
pub fn parse_due(value: &str) -> Result<Option<i64>, CliError> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let date = NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| CliError::InvalidDue(value.to_string()))?;
    Ok(Some(date.and_time(NaiveTime::MIN).and_utc().timestamp()))
}

/// Format a due timestamp as a UTC date.
#[must_use]
pub fn format_due(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0).map_or_else(
        || secs.to_string(),
        |at| at.date_naive().format(DATE_FORMAT).to_string(),
    )
}

fn render_task(task: &Task) -> String {
    let mark = if task.done { 'x' } else { ' ' };
    let mut line = format!("[{mark}] {}  {}", task.id, task.title);
    if let Some(due) = task.due {
        line.push_str(&format!("  (due {})", format_due(due)));
    }
    for comment_line in task.comment.lines() {
        line.push_str("\n      ");
        line.push_str(comment_line);
    }
    line
}

/// Human-readable listing, one task per line (comments indented below).
#[must_use]
pub fn render(tasks: &TaskList) -> String {
    if tasks.is_empty() {
        return "no tasks".to_string();
    }
    tasks.iter().map(render_task).collect::<Vec<_>>().join("\n")
}
