//! Task service: lists projects, loads task metadata from the note store's
//! external indexer, and resolves the on-disk directory a task should
//! execute in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::Task;
use crate::worktree::sanitize_branch;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("indexer binary unavailable: {0}")]
    IndexerUnavailable(String),

    #[error("indexer output was not valid JSON: {0}")]
    IndexerOutputInvalid(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Raw front-matter record as emitted by the indexer's JSON-list query,
/// before it is filtered to one project and converted into [`Task`].
#[derive(Debug, Deserialize)]
struct IndexerEntry {
    #[serde(flatten)]
    task: Task,
}

/// Lists projects, loads tasks, and resolves execution workdirs.
///
/// Indexing happens once, at construction, and is cached for the process
/// lifetime — the supervisor re-invokes [`TaskService::refresh`] on its own
/// schedule rather than the service re-querying per call.
pub struct TaskService {
    brain_dir: PathBuf,
    indexer_command: String,
    default_workdir: PathBuf,
    cache: HashMap<String, Vec<Task>>,
}

impl TaskService {
    pub fn new(brain_dir: impl Into<PathBuf>, indexer_command: impl Into<String>, default_workdir: impl Into<PathBuf>) -> Self {
        Self {
            brain_dir: brain_dir.into(),
            indexer_command: indexer_command.into(),
            default_workdir: default_workdir.into(),
            cache: HashMap::new(),
        }
    }

    fn projects_dir(&self) -> PathBuf {
        self.brain_dir.join("projects")
    }

    /// Any subdirectory of `<brainDir>/projects` containing a `task/`
    /// subdirectory is a project. Sorted lexicographically.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let dir = self.projects_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut projects = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() && path.join("task").is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    projects.push(name.to_string());
                }
            }
        }
        projects.sort();
        debug!(count = projects.len(), "TaskService::list_projects: found projects");
        Ok(projects)
    }

    /// Load (and cache) tasks for `project`, invoking the indexer subprocess
    /// on first access.
    pub async fn tasks(&mut self, project: &str) -> Result<&[Task]> {
        if !self.cache.contains_key(project) {
            let tasks = self.load_from_indexer(project).await?;
            self.cache.insert(project.to_string(), tasks);
        }
        Ok(self.cache.get(project).map(Vec::as_slice).unwrap_or_default())
    }

    /// Force a re-query against the indexer for `project`.
    pub async fn refresh(&mut self, project: &str) -> Result<()> {
        let tasks = self.load_from_indexer(project).await?;
        self.cache.insert(project.to_string(), tasks);
        Ok(())
    }

    /// Write a task's status back through the indexer. The runner is the
    /// indexer's only writer for lifecycle transitions (`in_progress`,
    /// `blocked`, ...); content edits remain the note store's own concern.
    pub async fn set_status(&self, project: &str, task_id: &str, status: crate::domain::TaskStatus) -> Result<()> {
        let project_dir = self.projects_dir().join(project).join("task");
        let output = Command::new(&self.indexer_command)
            .args(["set-status", "--dir"])
            .arg(&project_dir)
            .args(["--id", task_id, "--status", &status.to_string()])
            .output()
            .await
            .map_err(|e| ServiceError::IndexerUnavailable(e.to_string()))?;
        if !output.status.success() {
            return Err(ServiceError::IndexerUnavailable(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        debug!(%project, %task_id, %status, "TaskService::set_status: updated");
        Ok(())
    }

    async fn load_from_indexer(&self, project: &str) -> Result<Vec<Task>> {
        debug!(%project, "TaskService::load_from_indexer: called");
        let project_dir = self.projects_dir().join(project).join("task");

        let output = Command::new(&self.indexer_command)
            .args(["list", "--format", "json", "--dir"])
            .arg(&project_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ServiceError::IndexerUnavailable(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ServiceError::IndexerUnavailable(stderr.to_string()));
        }

        let stdout = output.stdout;
        if stdout.is_empty() {
            debug!(%project, "TaskService::load_from_indexer: empty output, no tasks");
            return Ok(Vec::new());
        }

        let entries: Vec<IndexerEntry> = serde_json::from_slice(&stdout).map_err(|e| ServiceError::IndexerOutputInvalid(e.to_string()))?;

        let project_prefix = format!("projects/{project}/task/");
        let tasks: Vec<Task> = entries
            .into_iter()
            .map(|e| e.task)
            .filter(|t| t.path.starts_with(&project_prefix))
            .collect();

        info!(%project, count = tasks.len(), "TaskService::load_from_indexer: loaded tasks");
        Ok(tasks)
    }

    /// Resolve the directory a task should run in, first existing wins:
    /// `target_workdir` → derived worktree → `HOME/<workdir>` → configured default.
    pub fn resolve_workdir(&self, home: &Path, task: &Task) -> PathBuf {
        if let Some(target) = &task.target_workdir {
            let path = PathBuf::from(target);
            if path.exists() {
                return path;
            }
        }

        let main_repo = home.join(&task.workdir);
        if let Some(branch) = &task.git_branch {
            let worktree = main_repo.join(".worktrees").join(sanitize_branch(branch));
            if worktree.exists() {
                return worktree;
            }
        }

        if main_repo.exists() {
            return main_repo;
        }

        self.default_workdir.clone()
    }

    /// Normalize a raw dependency reference: strip a trailing `.md`, strip a
    /// `projects/<project>/task/` prefix, and split off a `project:` prefix
    /// if present.
    pub fn normalize_reference(reference: &str) -> (Option<&str>, String) {
        let (project, rest) = match reference.split_once(':') {
            Some((p, r)) => (Some(p), r),
            None => (None, reference),
        };
        let rest = rest.strip_suffix(".md").unwrap_or(rest);
        let rest = rest
            .rsplit_once("/task/")
            .map(|(_, tail)| tail)
            .unwrap_or(rest)
            .trim_start_matches('/');
        (project, rest.to_string())
    }

    /// Up to 3 nearest-match suggestions for an unresolved reference, by
    /// substring or case-insensitive title match.
    pub fn suggest(reference: &str, tasks: &[Task]) -> Vec<String> {
        let needle = reference.to_lowercase();
        let mut matches: Vec<String> = tasks
            .iter()
            .filter(|t| t.title.to_lowercase().contains(&needle) || t.id.to_lowercase() == needle)
            .map(|t| t.title.clone())
            .collect();
        matches.truncate(3);
        if matches.is_empty() {
            warn!(%reference, "TaskService::suggest: no nearest matches found");
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TaskStatus};

    fn task(id: &str, title: &str) -> Task {
        Task {
            id: id.to_string(),
            path: format!("projects/demo/task/{id}.md"),
            title: title.to_string(),
            priority: Priority::Medium,
            status: TaskStatus::Pending,
            depends_on: vec![],
            parent_id: None,
            workdir: "demo".to_string(),
            git_branch: None,
            target_workdir: None,
            direct_prompt: None,
            agent: None,
            model: None,
            feature_id: None,
            feature_priority: None,
            feature_depends_on: vec![],
            created_at: 0,
        }
    }

    #[test]
    fn list_projects_finds_directories_with_task_subdir() {
        let dir = tempfile::tempdir().unwrap();
        let projects = dir.path().join("projects");
        std::fs::create_dir_all(projects.join("alpha/task")).unwrap();
        std::fs::create_dir_all(projects.join("beta/task")).unwrap();
        std::fs::create_dir_all(projects.join("gamma")).unwrap(); // no task/ dir

        let service = TaskService::new(dir.path(), "brain-index", "/tmp");
        let found = service.list_projects().unwrap();
        assert_eq!(found, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn normalize_reference_strips_extension_and_path_prefix() {
        assert_eq!(
            TaskService::normalize_reference("projects/demo/task/abc12345.md"),
            (None, "abc12345".to_string())
        );
    }

    #[test]
    fn normalize_reference_splits_project_prefix() {
        assert_eq!(
            TaskService::normalize_reference("other:abc12345"),
            (Some("other"), "abc12345".to_string())
        );
    }

    #[test]
    fn resolve_workdir_prefers_target_workdir_when_present() {
        let home = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let mut t = task("t1", "Task One");
        t.target_workdir = Some(target.path().to_string_lossy().to_string());

        let service = TaskService::new(".", "brain-index", "/tmp/default");
        assert_eq!(service.resolve_workdir(home.path(), &t), target.path());
    }

    #[test]
    fn resolve_workdir_falls_back_to_default_when_nothing_exists() {
        let home = tempfile::tempdir().unwrap();
        let t = task("t1", "Task One");

        let service = TaskService::new(".", "brain-index", "/tmp/default");
        assert_eq!(service.resolve_workdir(home.path(), &t), PathBuf::from("/tmp/default"));
    }

    #[test]
    fn suggest_matches_by_substring_case_insensitively() {
        let tasks = vec![task("t1", "Add OAuth support"), task("t2", "Fix login bug")];
        let suggestions = TaskService::suggest("oauth", &tasks);
        assert_eq!(suggestions, vec!["Add OAuth support".to_string()]);
    }
}
