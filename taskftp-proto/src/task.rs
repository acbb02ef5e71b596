//! Task model for `TaskFtp`.
//!
//! A [`TaskList`] is keyed by [`TaskId`]. Ids are generated client-side and
//! never derived from task content, so editing a title never changes identity.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, globally unique task identifier.
///
/// Locally created ids are UUID v7 values rendered as 32 hex digits. Ids read
/// from a remote file are kept verbatim, whatever their shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generates a fresh time-ordered identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// Wraps an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A single entry of the task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Immutable identity.
    pub id: TaskId,
    /// Short description shown in lists.
    pub title: String,
    /// Whether the task has been completed.
    pub done: bool,
    /// Due date as Unix seconds, `None` when the task has no due date.
    pub due: Option<i64>,
    /// Free-form notes, possibly spanning several lines.
    pub comment: String,
}

impl Task {
    /// Creates an open task with no due date and an empty comment.
    pub fn new(id: TaskId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            done: false,
            due: None,
            comment: String::new(),
        }
    }
}

/// The full task collection, ordered by id.
///
/// Ordering is only there to make serialization deterministic; callers
/// should not read meaning into it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskList {
    tasks: BTreeMap<TaskId, Task>,
}

impl TaskList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a task, replacing any entry with the same id.
    ///
    /// Returns the replaced task, if there was one.
    pub fn insert(&mut self, task: Task) -> Option<Task> {
        self.tasks.insert(task.id.clone(), task)
    }

    /// Removes a task by id.
    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        self.tasks.remove(id)
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Looks up a task by id for in-place modification.
    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// Returns `true` if a task with this id exists.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if the list holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Iterates over the tasks in id order.
    pub fn iter(&self) -> btree_map::Values<'_, TaskId, Task> {
        self.tasks.values()
    }

    /// Iterates over the ids in order.
    pub fn ids(&self) -> btree_map::Keys<'_, TaskId, Task> {
        self.tasks.keys()
    }
}

impl FromIterator<Task> for TaskList {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        Self {
            tasks: iter.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a TaskList {
    type Item = &'a Task;
    type IntoIter = btree_map::Values<'a, TaskId, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.values()
    }
}
