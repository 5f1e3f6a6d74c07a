//! Task data model: the shape loaded from a note store entry's front matter,
//! and the richer `ResolvedTask` the dependency resolver produces from it.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::priority::Priority;

/// Declared lifecycle status of a task, as written in its front matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    Pending,
    Active,
    InProgress,
    Blocked,
    Cancelled,
    Completed,
    Validated,
    Superseded,
    Archived,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self).unwrap_or_default();
        write!(f, "{}", s.as_str().unwrap_or("unknown"))
    }
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Validated | Self::Superseded | Self::Archived
        )
    }
}

/// One task entry, as loaded from the note store's indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub path: String,
    pub title: String,
    #[serde(default)]
    pub priority: Priority,
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub workdir: String,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub target_workdir: Option<String>,
    #[serde(default)]
    pub direct_prompt: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub feature_id: Option<String>,
    #[serde(default)]
    pub feature_priority: Option<Priority>,
    #[serde(default)]
    pub feature_depends_on: Vec<String>,
    #[serde(default)]
    pub created_at: i64,
}

/// Why a task was classified `blocked`/`blocked_by_parent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    CircularDependency,
    ParentBlocked,
    DependencyBlocked,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircularDependency => write!(f, "circular_dependency"),
            Self::ParentBlocked => write!(f, "parent_blocked"),
            Self::DependencyBlocked => write!(f, "dependency_blocked"),
        }
    }
}

/// The outcome of the dependency resolver's classification rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Ready,
    Waiting,
    WaitingOnParent,
    Blocked,
    BlockedByParent,
    NotPending,
}

/// A `Task` enriched with the resolver's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTask {
    #[serde(flatten)]
    pub task: Task,
    pub resolved_deps: Vec<String>,
    pub unresolved_deps: Vec<String>,
    /// Immediate parent first, root last. May end in a dangling id if a
    /// parent pointer in the chain does not resolve.
    pub parent_chain: Vec<String>,
    pub classification: Classification,
    pub blocked_by: Vec<String>,
    pub blocked_by_reason: Option<BlockReason>,
    pub waiting_on: Vec<String>,
    pub in_cycle: bool,
    pub resolved_workdir: Option<PathBuf>,
}

impl ResolvedTask {
    pub fn is_ready(&self) -> bool {
        self.classification == Classification::Ready
    }
}

/// Aggregate counts produced alongside a resolution pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverStats {
    pub total: usize,
    pub ready: usize,
    pub waiting: usize,
    pub blocked: usize,
    pub not_pending: usize,
}

/// Output of a full resolution pass over one project's tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyResult {
    pub tasks: Vec<ResolvedTask>,
    pub cycles: Vec<Vec<String>>,
    pub stats: ResolverStats,
}

impl DependencyResult {
    pub fn ready_sorted(&self) -> Vec<&ResolvedTask> {
        let mut ready: Vec<&ResolvedTask> = self.tasks.iter().filter(|t| t.is_ready()).collect();
        ready.sort_by(|a, b| a.task.priority.cmp(&b.task.priority).then(a.task.created_at.cmp(&b.task.created_at)));
        ready
    }

    pub fn by_id(&self, id: &str) -> Option<&ResolvedTask> {
        self.tasks.iter().find(|t| t.task.id == id)
    }
}

/// `id -> Task` and `title -> id` lookup built once per resolution pass.
pub struct TaskIndex<'a> {
    pub by_id: HashMap<&'a str, &'a Task>,
    pub by_title: HashMap<&'a str, &'a str>,
}

impl<'a> TaskIndex<'a> {
    pub fn build(tasks: &'a [Task]) -> Self {
        let mut by_id = HashMap::new();
        let mut by_title = HashMap::new();
        for task in tasks {
            by_id.insert(task.id.as_str(), task);
            // Last writer wins on duplicate titles, matching the source's
            // unenforced-uniqueness assumption (§9 open questions).
            by_title.insert(task.title.as_str(), task.id.as_str());
        }
        Self { by_id, by_title }
    }

    /// Resolve a reference to a task id. Does not handle cross-project
    /// `project:id` references; those are stripped by the service layer
    /// before the resolver ever sees them.
    pub fn resolve(&self, reference: &str) -> Option<&'a str> {
        if let Some(task) = self.by_id.get(reference) {
            return Some(task.id.as_str());
        }
        self.by_title.get(reference).copied()
    }
}
