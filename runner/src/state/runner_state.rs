//! `RunnerState`: the per-project snapshot persisted to
//! `<stateDir>/runner-<project>.json`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::liveness::is_pid_alive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStatus {
    Idle,
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningTaskEntry {
    pub task_id: String,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pane_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub spawned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateStats {
    pub total_spawned: u64,
    pub total_completed: u64,
    pub total_blocked: u64,
    pub consecutive_spawn_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerState {
    pub project: String,
    pub status: RunnerStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub running_tasks: Vec<RunningTaskEntry>,
    pub stats: StateStats,
}

impl RunnerState {
    pub fn new(project: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project: project.into(),
            status: RunnerStatus::Idle,
            started_at: now,
            updated_at: now,
            running_tasks: Vec::new(),
            stats: StateStats::default(),
        }
    }

    /// Read the persisted state for `project`, or `None` if no prior state
    /// exists or it could not be read — a read failure is "no prior state,"
    /// never a hard error, per the storage-errors taxonomy.
    pub fn load(state_dir: &Path, project: &str) -> Option<Self> {
        let path = state_file_path(state_dir, project);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(?path, error = %e, "RunnerState::load: failed to parse, treating as no prior state");
                None
            }
        }
    }

    /// Write this state atomically (write-temp-then-rename) so concurrent
    /// readers never observe a partial write.
    pub fn save(&mut self, state_dir: &Path) -> Result<()> {
        self.updated_at = Utc::now();
        fs::create_dir_all(state_dir).context("creating state directory")?;
        let path = state_file_path(state_dir, &self.project);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self).context("serializing runner state")?;
        fs::write(&tmp_path, json).context("writing temp state file")?;
        fs::rename(&tmp_path, &path).context("renaming temp state file into place")?;
        debug!(?path, "RunnerState::save: wrote state");
        Ok(())
    }

    /// Remove dead entries from `running_tasks`, returning the ones that
    /// were removed for the caller to reconcile against persisted task
    /// status (completed vs. still-in_progress-resumable).
    pub fn sweep_dead_children(&mut self) -> Vec<RunningTaskEntry> {
        let (alive, dead): (Vec<_>, Vec<_>) = self.running_tasks.drain(..).partition(|e| is_pid_alive(e.pid));
        self.running_tasks = alive;
        dead
    }

    pub fn is_running_task(&self, task_id: &str) -> bool {
        self.running_tasks.iter().any(|e| e.task_id == task_id)
    }
}

pub fn state_file_path(state_dir: &Path, project: &str) -> PathBuf {
    state_dir.join(format!("runner-{project}.json"))
}

fn pid_file_path(state_dir: &Path, project: &str) -> PathBuf {
    state_dir.join(format!("runner-{project}.pid"))
}

/// Record this process as the supervisor for `project`.
pub fn write_supervisor_pid(state_dir: &Path, project: &str) -> Result<()> {
    fs::create_dir_all(state_dir).context("creating state directory")?;
    fs::write(pid_file_path(state_dir, project), std::process::id().to_string())
        .context("writing supervisor pid file")
}

pub fn remove_supervisor_pid(state_dir: &Path, project: &str) {
    let _ = fs::remove_file(pid_file_path(state_dir, project));
}

/// Fleet-wide stale-state sweep: delete any `runner-*.json` state file
/// whose most recently recorded PID (the supervisor's own, tracked via the
/// sibling `.pid` file) is no longer alive.
pub fn stale_state_sweep(state_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !state_dir.exists() {
        return Ok(removed);
    }
    for entry in fs::read_dir(state_dir).context("reading state directory")? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if !name.starts_with("runner-") || !name.ends_with(".pid") {
            continue;
        }
        let pid: Option<u32> = fs::read_to_string(&path).ok().and_then(|s| s.trim().parse().ok());
        let alive = pid.map(is_pid_alive).unwrap_or(false);
        if !alive {
            let json_path = path.with_extension("json");
            let _ = fs::remove_file(&path);
            let _ = fs::remove_file(&json_path);
            debug!(?path, "stale_state_sweep: removed state for dead supervisor");
            removed.push(path);
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let mut state = RunnerState::new("demo");
        state.status = RunnerStatus::Running;
        state.save(dir.path()).unwrap();

        let loaded = RunnerState::load(dir.path(), "demo").unwrap();
        assert_eq!(loaded.project, "demo");
        assert_eq!(loaded.status, RunnerStatus::Running);
    }

    #[test]
    fn load_missing_file_returns_none() {
        let dir = tempdir().unwrap();
        assert!(RunnerState::load(dir.path(), "ghost").is_none());
    }

    #[test]
    fn sweep_dead_children_removes_unreachable_pids() {
        let mut state = RunnerState::new("demo");
        state.running_tasks.push(RunningTaskEntry {
            task_id: "t1".into(),
            pid: std::process::id(),
            pane_id: None,
            window_name: None,
            port: None,
            spawned_at: Utc::now(),
        });
        state.running_tasks.push(RunningTaskEntry {
            task_id: "t2".into(),
            pid: u32::MAX / 2,
            pane_id: None,
            window_name: None,
            port: None,
            spawned_at: Utc::now(),
        });

        let dead = state.sweep_dead_children();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].task_id, "t2");
        assert!(state.is_running_task("t1"));
        assert!(!state.is_running_task("t2"));
    }
}
