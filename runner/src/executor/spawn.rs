//! Subprocess spawning: prompt construction and the three spawn modes
//! (background, TUI window, dashboard pane).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::Task;
use crate::prompts::{PromptContext, PromptKind, PromptLoader};

use super::multiplexer::Multiplexer;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("prompt rendering failed: {0}")]
    PromptRender(String),

    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("multiplexer error: {0}")]
    Multiplexer(#[from] super::multiplexer::MultiplexerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The result of a successful spawn, in the shape the supervisor folds into
/// a `RunningTaskEntry`.
#[derive(Debug, Clone)]
pub struct SpawnHandle {
    pub pid: u32,
    pub pane_id: Option<String>,
    pub window_name: Option<String>,
    pub port: Option<u16>,
}

/// Per-task scratch files the executor writes and later cleans up.
struct TaskPaths {
    prompt_file: PathBuf,
    script_file: PathBuf,
    log_file: PathBuf,
}

/// Builds prompts and spawns the assistant subprocess for a ready task.
pub struct Executor {
    scratch_dir: PathBuf,
    default_agent: String,
    default_model: String,
    multiplexer: Arc<dyn Multiplexer>,
}

impl Executor {
    pub fn new(scratch_dir: impl Into<PathBuf>, default_agent: impl Into<String>, default_model: impl Into<String>, multiplexer: Arc<dyn Multiplexer>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            default_agent: default_agent.into(),
            default_model: default_model.into(),
            multiplexer,
        }
    }

    fn paths(&self, task_id: &str) -> TaskPaths {
        TaskPaths {
            prompt_file: self.scratch_dir.join(format!("{task_id}.prompt.txt")),
            script_file: self.scratch_dir.join(format!("{task_id}.run.sh")),
            log_file: self.scratch_dir.join(format!("{task_id}.log")),
        }
    }

    fn effective_agent(&self, task: &Task) -> String {
        task.agent.clone().unwrap_or_else(|| self.default_agent.clone())
    }

    fn effective_model(&self, task: &Task) -> String {
        task.model.clone().unwrap_or_else(|| self.default_model.clone())
    }

    /// `direct_prompt` wins verbatim; otherwise render the fresh-start or
    /// resume template through the workdir's prompt loader.
    fn build_prompt(&self, task: &Task, workdir: &Path, resuming: bool) -> Result<String, ExecutorError> {
        if let Some(direct) = &task.direct_prompt {
            return Ok(direct.clone());
        }
        let loader = PromptLoader::new(workdir);
        let kind = if resuming { PromptKind::Resume } else { PromptKind::Fresh };
        let ctx = PromptContext {
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            task_path: task.path.clone(),
            project: task.workdir.clone(),
            workdir: workdir.to_string_lossy().to_string(),
        };
        loader.render(kind, &ctx).map_err(|e| ExecutorError::PromptRender(e.to_string()))
    }

    async fn write_prompt(&self, task_id: &str, prompt: &str) -> Result<PathBuf, ExecutorError> {
        fs::create_dir_all(&self.scratch_dir).await?;
        let path = self.paths(task_id).prompt_file;
        fs::write(&path, prompt).await?;
        Ok(path)
    }

    /// Single subprocess, output redirected to an append-only log. Returns
    /// the child PID; completion is observed by exit code.
    pub async fn spawn_background(&self, task: &Task, workdir: &Path, resuming: bool) -> Result<SpawnHandle, ExecutorError> {
        debug!(task_id = %task.id, ?workdir, resuming, "Executor::spawn_background: called");
        let prompt = self.build_prompt(task, workdir, resuming)?;
        self.write_prompt(&task.id, &prompt).await?;

        let log_path = self.paths(&task.id).log_file;
        let log_file = std::fs::OpenOptions::new().create(true).append(true).open(&log_path)?;
        let log_file_err = log_file.try_clone()?;

        let child = Command::new(self.effective_agent(task))
            .args(["-p", &prompt, "--model", &self.effective_model(task)])
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .spawn()
            .map_err(|e| ExecutorError::SpawnFailed(e.to_string()))?;

        let pid = child.id().ok_or_else(|| ExecutorError::SpawnFailed("child exited before pid observed".into()))?;
        info!(task_id = %task.id, pid, "Executor::spawn_background: spawned");

        // The supervisor tracks liveness by PID polling, not by holding this
        // handle; reap it in the background so it doesn't become a zombie.
        let mut child = child;
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(SpawnHandle {
            pid,
            pane_id: None,
            window_name: None,
            port: None,
        })
    }

    async fn write_wrapper_script(&self, task_id: &str, workdir: &Path, agent: &str, prompt_file: &Path) -> Result<PathBuf, ExecutorError> {
        let script = format!(
            "#!/bin/sh\ncd {} && exec {} -p \"$(cat {})\"\n",
            shell_quote(&workdir.to_string_lossy()),
            shell_quote(agent),
            shell_quote(&prompt_file.to_string_lossy()),
        );
        let path = self.paths(task_id).script_file;
        fs::write(&path, script).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path).await?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms).await?;
        }
        Ok(path)
    }

    /// Opens a new multiplexer window running the assistant interactively.
    /// PID and port discovery are best-effort; their absence never fails
    /// the spawn.
    pub async fn spawn_tui(&self, task: &Task, workdir: &Path, resuming: bool) -> Result<SpawnHandle, ExecutorError> {
        debug!(task_id = %task.id, ?workdir, resuming, "Executor::spawn_tui: called");
        let prompt = self.build_prompt(task, workdir, resuming)?;
        let prompt_file = self.write_prompt(&task.id, &prompt).await?;
        let script = self.write_wrapper_script(&task.id, workdir, &self.effective_agent(task), &prompt_file).await?;

        let window_name = format!("task-{}", task.id);
        self.multiplexer.new_window(&window_name, &script).await?;

        tokio::time::sleep(Duration::from_millis(500)).await;
        let pid = discover_pid_by_script(&script).await;
        let port = match pid {
            Some(pid) => discover_port(pid).await,
            None => None,
        };

        info!(task_id = %task.id, %window_name, ?pid, ?port, "Executor::spawn_tui: window opened");
        Ok(SpawnHandle {
            pid: pid.unwrap_or(0),
            pane_id: None,
            window_name: Some(window_name),
            port,
        })
    }

    /// Splits an existing pane, retrying the split with exponential
    /// backoff, and verifies the pane target exists first.
    pub async fn spawn_dashboard(&self, task: &Task, workdir: &Path, target_pane: &str, resuming: bool) -> Result<SpawnHandle, ExecutorError> {
        debug!(task_id = %task.id, ?workdir, %target_pane, resuming, "Executor::spawn_dashboard: called");

        let deadline = Duration::from_secs(3);
        let poll_interval = Duration::from_millis(200);
        let mut waited = Duration::ZERO;
        while !self.multiplexer.list_panes().await.iter().any(|p| p == target_pane) {
            if waited >= deadline {
                return Err(ExecutorError::SpawnFailed(format!("target pane {target_pane} did not appear")));
            }
            tokio::time::sleep(poll_interval).await;
            waited += poll_interval;
        }

        let prompt = self.build_prompt(task, workdir, resuming)?;
        let prompt_file = self.write_prompt(&task.id, &prompt).await?;
        let script = self.write_wrapper_script(&task.id, workdir, &self.effective_agent(task), &prompt_file).await?;

        let mut attempt = 0;
        let pane_id = loop {
            match self.multiplexer.split_pane(target_pane, &script).await {
                Ok(id) if id.starts_with('%') => break id,
                Ok(id) => return Err(ExecutorError::SpawnFailed(format!("unexpected pane id shape: {id}"))),
                Err(e) if attempt < 3 => {
                    attempt += 1;
                    let backoff = Duration::from_millis(200 * 2u64.pow(attempt));
                    warn!(task_id = %task.id, attempt, ?backoff, error = %e, "Executor::spawn_dashboard: split failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let title: String = task.title.chars().take(40).collect();
        self.multiplexer.set_title(&pane_id, &title).await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        let pid = discover_pid_by_script(&script).await;
        let port = match pid {
            Some(pid) => discover_port(pid).await,
            None => None,
        };

        info!(task_id = %task.id, %pane_id, ?pid, ?port, "Executor::spawn_dashboard: pane created");
        Ok(SpawnHandle {
            pid: pid.unwrap_or(0),
            pane_id: Some(pane_id),
            window_name: None,
            port,
        })
    }

    /// A clone of the injected multiplexer handle, for callers (the
    /// supervisor's termination path) that need to close a pane outside of
    /// a spawn call.
    pub fn multiplexer_handle(&self) -> Arc<dyn Multiplexer> {
        Arc::clone(&self.multiplexer)
    }

    /// Close a TUI/dashboard task's pane or window, if it has one.
    /// Best-effort: a failure here is logged by the caller, not surfaced.
    pub async fn kill_pane(&self, pane_id: &str) -> Result<(), ExecutorError> {
        self.multiplexer.kill_pane(pane_id).await.map_err(Into::into)
    }

    /// Deletes a completed task's prompt file, wrapper script, and log.
    /// Best-effort: failures are logged, never surfaced.
    pub async fn cleanup(&self, task_id: &str) {
        let paths = self.paths(task_id);
        for path in [&paths.prompt_file, &paths.script_file, &paths.log_file] {
            if let Err(e) = fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(task_id, ?path, error = %e, "Executor::cleanup: failed to remove scratch file");
                }
            }
        }
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Best-effort: look up the PID of the process whose command line
/// references `script`, via `pgrep -f`.
async fn discover_pid_by_script(script: &Path) -> Option<u32> {
    let output = Command::new("pgrep").arg("-f").arg(script).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).lines().next()?.trim().parse().ok()
}

/// Best-effort: the first TCP listening port owned by `pid`, via `lsof`.
async fn discover_port(pid: u32) -> Option<u16> {
    let output = Command::new("lsof").args(["-p", &pid.to_string(), "-iTCP", "-sTCP:LISTEN", "-P", "-n"]).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines().skip(1) {
        if let Some(addr) = line.split_whitespace().nth(8) {
            if let Some((_, port)) = addr.rsplit_once(':') {
                if let Ok(port) = port.parse() {
                    return Some(port);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TaskStatus};
    use crate::executor::multiplexer::fake::FakeMultiplexer;

    fn task() -> Task {
        Task {
            id: "t1".into(),
            path: "projects/demo/task/t1.md".into(),
            title: "Add widget".into(),
            priority: Priority::Medium,
            status: TaskStatus::Pending,
            depends_on: vec![],
            parent_id: None,
            workdir: "demo".into(),
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

    #[tokio::test]
    async fn spawn_dashboard_fails_fast_when_pane_never_appears() {
        let scratch = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();
        let executor = Executor::new(scratch.path(), "claude", "claude-sonnet-4-20250514", Arc::new(FakeMultiplexer::default()));

        let result = executor.spawn_dashboard(&task(), workdir.path(), "%does-not-exist", false).await;
        assert!(matches!(result, Err(ExecutorError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn spawn_dashboard_succeeds_against_known_pane() {
        let scratch = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();
        let executor = Executor::new(scratch.path(), "claude", "claude-sonnet-4-20250514", Arc::new(FakeMultiplexer::default()));

        let handle = executor.spawn_dashboard(&task(), workdir.path(), "%0", false).await.unwrap();
        assert!(handle.pane_id.unwrap().starts_with('%'));
    }

    #[tokio::test]
    async fn direct_prompt_bypasses_template() {
        let scratch = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();
        let executor = Executor::new(scratch.path(), "claude", "claude-sonnet-4-20250514", Arc::new(FakeMultiplexer::default()));

        let mut t = task();
        t.direct_prompt = Some("do the thing verbatim".into());
        let prompt = executor.build_prompt(&t, workdir.path(), false).unwrap();
        assert_eq!(prompt, "do the thing verbatim");
    }

    #[tokio::test]
    async fn cleanup_is_best_effort_on_missing_files() {
        let scratch = tempfile::tempdir().unwrap();
        let executor = Executor::new(scratch.path(), "claude", "claude-sonnet-4-20250514", Arc::new(FakeMultiplexer::default()));
        executor.cleanup("nonexistent-task").await;
    }
}
