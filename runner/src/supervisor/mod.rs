//! Runner supervisor: the per-project poll loop that spawns ready tasks,
//! tracks their liveness, persists state, and recovers after a crash.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::{Task, TaskStatus};
use crate::executor::{Executor, ExecutorError};
use crate::resolver;
use crate::service::{ServiceError, TaskService};
use crate::state::{RunnerState, RunnerStatus, RunningTaskEntry, is_pid_alive, kill_pid, terminate_pid};
use crate::worktree::{WorktreeError, WorktreeManager};

/// Grace window between SIGTERM and SIGKILL for an individual cancelled
/// task, per the store's cancellation contract.
const CANCEL_KILL_GRACE: Duration = Duration::from_secs(5);

/// Grace window between SIGTERM and SIGKILL for all tracked children on
/// supervisor shutdown.
const SHUTDOWN_KILL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("state persistence failed: {0}")]
    State(String),
}

/// How newly-spawned tasks attach to a terminal, chosen once per supervisor
/// run from the `start` command's `--tui` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpawnMode {
    /// One subprocess per task, output to a log file. The default.
    #[default]
    Background,
    /// Interactive: opens its own tmux window, unless this process is
    /// itself already running inside a tmux pane (`$TMUX_PANE` set), in
    /// which case new tasks split that pane instead of opening a window.
    Tui,
}

pub struct SupervisorConfig {
    pub project: String,
    pub home_dir: PathBuf,
    pub state_dir: PathBuf,
    pub max_concurrent: usize,
    pub poll_interval: Duration,
    pub max_spawn_failures: u32,
    pub spawn_mode: SpawnMode,
}

/// Poll every 100ms until every entry's pid is dead or `grace` elapses,
/// then SIGKILL whatever is still alive.
async fn wait_then_kill(entries: &[RunningTaskEntry], grace: Duration) {
    let mut waited = Duration::ZERO;
    while waited < grace && entries.iter().any(|e| is_pid_alive(e.pid)) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += Duration::from_millis(100);
    }
    for entry in entries {
        if is_pid_alive(entry.pid) {
            warn!(task_id = %entry.task_id, pid = entry.pid, "wait_then_kill: did not exit gracefully, sending SIGKILL");
            kill_pid(entry.pid);
        }
    }
}

/// Owns one project's {idle, running, paused, stopped} state machine.
pub struct Supervisor {
    config: SupervisorConfig,
    service: TaskService,
    executor: Executor,
    worktree: WorktreeManager,
    state: RunnerState,
    /// Task ids a SIGTERM has already been sent for, so a cancelled task
    /// still present on the next few ticks doesn't get re-signalled.
    cancelling: HashSet<String>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, service: TaskService, executor: Executor, worktree: WorktreeManager) -> Self {
        let state = RunnerState::load(&config.state_dir, &config.project).unwrap_or_else(|| RunnerState::new(&config.project));
        Self {
            config,
            service,
            executor,
            worktree,
            state,
            cancelling: HashSet::new(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    pub fn status(&self) -> RunnerStatus {
        self.state.status
    }

    pub fn start(&mut self) -> Result<(), SupervisorError> {
        self.state.status = RunnerStatus::Running;
        self.persist()
    }

    pub fn pause(&mut self) -> Result<(), SupervisorError> {
        info!(project = %self.config.project, "Supervisor::pause: inhibiting new spawns, leaving running children alone");
        self.state.status = RunnerStatus::Paused;
        self.persist()
    }

    pub fn resume(&mut self) -> Result<(), SupervisorError> {
        self.state.status = RunnerStatus::Running;
        self.persist()
    }

    /// Flips to `stopped` and terminates every tracked child: SIGTERM to
    /// all of them, wait up to 10s, SIGKILL whatever is still alive.
    pub async fn stop(&mut self) -> Result<(), SupervisorError> {
        self.state.status = RunnerStatus::Stopped;

        for entry in &self.state.running_tasks {
            if let Some(pane_id) = &entry.pane_id {
                if let Err(e) = self.executor.kill_pane(pane_id).await {
                    warn!(task_id = %entry.task_id, pane_id, error = %e, "Supervisor::stop: kill_pane failed");
                }
            }
            terminate_pid(entry.pid);
        }
        wait_then_kill(&self.state.running_tasks, SHUTDOWN_KILL_GRACE).await;
        self.state.running_tasks.clear();

        self.persist()
    }

    fn persist(&mut self) -> Result<(), SupervisorError> {
        self.state.save(&self.config.state_dir).map_err(|e| SupervisorError::State(e.to_string()))
    }

    /// Crash recovery: for each `running_tasks` entry whose PID is dead,
    /// consult the persisted task status. Still `in_progress` → respawn with
    /// the resume prompt; terminal → drop the entry.
    pub async fn recover(&mut self) -> Result<(), SupervisorError> {
        debug!(project = %self.config.project, "Supervisor::recover: called");
        let dead = self.state.sweep_dead_children();
        if dead.is_empty() {
            return Ok(());
        }

        let tasks = self.service.tasks(&self.config.project).await?.to_vec();
        for entry in dead {
            let Some(task) = tasks.iter().find(|t| t.id == entry.task_id) else {
                warn!(task_id = %entry.task_id, "Supervisor::recover: dead entry references unknown task, dropping");
                continue;
            };
            if task.status.is_terminal() {
                info!(task_id = %entry.task_id, "Supervisor::recover: task reached a terminal status, dropping entry");
                continue;
            }
            if task.status == TaskStatus::InProgress {
                info!(task_id = %entry.task_id, "Supervisor::recover: respawning with resume prompt");
                if let Err(e) = self.spawn(task, true).await {
                    warn!(task_id = %entry.task_id, error = %e, "Supervisor::recover: resume spawn failed");
                }
            }
        }
        self.persist()
    }

    /// One iteration of the poll loop: classify, reconcile liveness,
    /// derive pause, fill slots up to `max_concurrent`.
    pub async fn tick(&mut self) -> Result<(), SupervisorError> {
        if self.state.status != RunnerStatus::Running {
            return Ok(());
        }

        let tasks = match self.service.tasks(&self.config.project).await {
            Ok(tasks) => tasks.to_vec(),
            Err(ServiceError::IndexerUnavailable(e)) => {
                warn!(project = %self.config.project, error = %e, "Supervisor::tick: indexer unavailable, retrying next tick");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(root) = tasks.iter().find(|t| t.title == self.config.project && t.depends_on.is_empty()) {
            if root.status == TaskStatus::Blocked {
                info!(project = %self.config.project, "Supervisor::tick: project-root task is blocked, pausing");
                self.state.status = RunnerStatus::Paused;
                return self.persist();
            }
        }

        for entry in self.state.sweep_dead_children() {
            let task = tasks.iter().find(|t| t.id == entry.task_id);
            match task.map(|t| t.status) {
                Some(TaskStatus::InProgress) => {
                    debug!(task_id = %entry.task_id, "Supervisor::tick: child died mid-task, eligible for resume next tick");
                }
                _ => {
                    self.state.stats.total_completed += 1;
                }
            }
            self.cancelling.remove(&entry.task_id);
        }

        self.cancel_newly_cancelled(&tasks);

        let result = resolver::resolve(&tasks);
        while self.state.running_tasks.len() < self.config.max_concurrent {
            let next = result
                .ready_sorted()
                .into_iter()
                .find(|t| !self.state.is_running_task(&t.task.id))
                .cloned();
            let Some(resolved) = next else { break };
            if let Err(e) = self.spawn(&resolved.task, false).await {
                warn!(task_id = %resolved.task.id, error = %e, "Supervisor::tick: spawn failed");
            }
        }

        self.persist()
    }

    /// A running task whose store status just flipped to `cancelled` gets
    /// SIGTERM immediately; the SIGKILL-after-5s follow-up runs detached so
    /// it doesn't block this tick from spawning other ready tasks.
    fn cancel_newly_cancelled(&mut self, tasks: &[Task]) {
        for entry in &self.state.running_tasks {
            if self.cancelling.contains(&entry.task_id) {
                continue;
            }
            let Some(task) = tasks.iter().find(|t| t.id == entry.task_id) else { continue };
            if task.status != TaskStatus::Cancelled {
                continue;
            }

            info!(task_id = %entry.task_id, pid = entry.pid, "Supervisor::tick: task cancelled, terminating child");
            self.cancelling.insert(entry.task_id.clone());
            terminate_pid(entry.pid);

            let pid = entry.pid;
            let pane_id = entry.pane_id.clone();
            let multiplexer = self.executor.multiplexer_handle();
            tokio::spawn(async move {
                if let Some(pane_id) = &pane_id {
                    let _ = multiplexer.kill_pane(pane_id).await;
                }
                tokio::time::sleep(CANCEL_KILL_GRACE).await;
                if is_pid_alive(pid) {
                    kill_pid(pid);
                }
            });
        }
    }

    /// Dispatches to the spawn mode this run was started with. Tui mode
    /// splits the enclosing tmux pane when one is detected (`$TMUX_PANE`),
    /// since a task spawned from inside an existing pane has somewhere to
    /// split into rather than needing a brand new window.
    async fn spawn_via_mode(&self, task: &Task, workdir: &std::path::Path, resuming: bool) -> Result<crate::executor::SpawnHandle, ExecutorError> {
        match self.config.spawn_mode {
            SpawnMode::Background => self.executor.spawn_background(task, workdir, resuming).await,
            SpawnMode::Tui => match std::env::var("TMUX_PANE") {
                Ok(pane) => self.executor.spawn_dashboard(task, workdir, &pane, resuming).await,
                Err(_) => self.executor.spawn_tui(task, workdir, resuming).await,
            },
        }
    }

    async fn spawn(&mut self, task: &Task, resuming: bool) -> Result<(), SupervisorError> {
        debug!(task_id = %task.id, resuming, "Supervisor::spawn: called");

        if let Err(e) = self.service.set_status(&self.config.project, &task.id, TaskStatus::InProgress).await {
            warn!(task_id = %task.id, error = %e, "Supervisor::spawn: failed to mark in_progress before spawn");
        }

        let workdir = self.service.resolve_workdir(&self.config.home_dir, task);
        let workdir = match &task.git_branch {
            Some(branch) => match self.worktree.ensure(branch).await {
                Ok(Some(path)) => path,
                Ok(None) => workdir,
                Err(e) => {
                    self.mark_blocked(task, &format!("worktree setup failed: {e}")).await;
                    return Err(e.into());
                }
            },
            None => workdir,
        };

        match self.spawn_via_mode(task, &workdir, resuming).await {
            Ok(handle) => {
                self.state.running_tasks.push(RunningTaskEntry {
                    task_id: task.id.clone(),
                    pid: handle.pid,
                    pane_id: handle.pane_id,
                    window_name: handle.window_name,
                    port: handle.port,
                    spawned_at: Utc::now(),
                });
                self.state.stats.total_spawned += 1;
                self.state.stats.consecutive_spawn_failures = 0;
                info!(task_id = %task.id, pid = handle.pid, "Supervisor::spawn: spawned");
                Ok(())
            }
            Err(e) => {
                self.state.stats.consecutive_spawn_failures += 1;
                if self.state.stats.consecutive_spawn_failures >= self.config.max_spawn_failures {
                    self.mark_blocked(task, &e.to_string()).await;
                }
                Err(e.into())
            }
        }
    }

    async fn mark_blocked(&self, task: &Task, reason: &str) {
        warn!(task_id = %task.id, reason, "Supervisor::mark_blocked: marking task blocked after spawn failure");
        if let Err(e) = self.service.set_status(&self.config.project, &task.id, TaskStatus::Blocked).await {
            warn!(task_id = %task.id, error = %e, "Supervisor::mark_blocked: failed to persist blocked status");
        }
    }

    pub fn running_count(&self) -> usize {
        self.state.running_tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::multiplexer::fake::FakeMultiplexer;
    use crate::worktree::WorktreeConfig;
    use std::sync::Arc;

    fn supervisor(state_dir: &std::path::Path, home_dir: &std::path::Path) -> Supervisor {
        let config = SupervisorConfig {
            project: "demo".into(),
            home_dir: home_dir.to_path_buf(),
            state_dir: state_dir.to_path_buf(),
            max_concurrent: 2,
            poll_interval: Duration::from_secs(15),
            max_spawn_failures: 1,
            spawn_mode: SpawnMode::default(),
        };
        let service = TaskService::new(home_dir, "brain-index-not-installed", home_dir);
        let executor = Executor::new(state_dir.join("scratch"), "claude", "claude-sonnet-4-20250514", Arc::new(FakeMultiplexer::default()));
        let worktree = WorktreeManager::new(WorktreeConfig {
            repo_root: home_dir.to_path_buf(),
            ..Default::default()
        });
        Supervisor::new(config, service, executor, worktree)
    }

    #[tokio::test]
    async fn start_pause_resume_stop_persist_status() {
        let state_dir = tempfile::tempdir().unwrap();
        let home_dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(state_dir.path(), home_dir.path());

        sup.start().unwrap();
        assert_eq!(sup.status(), RunnerStatus::Running);

        sup.pause().unwrap();
        assert_eq!(sup.status(), RunnerStatus::Paused);

        sup.resume().unwrap();
        assert_eq!(sup.status(), RunnerStatus::Running);

        sup.stop().await.unwrap();
        assert_eq!(sup.status(), RunnerStatus::Stopped);

        let reloaded = RunnerState::load(state_dir.path(), "demo").unwrap();
        assert_eq!(reloaded.status, RunnerStatus::Stopped);
    }

    #[tokio::test]
    async fn stop_with_no_running_tasks_returns_immediately() {
        let state_dir = tempfile::tempdir().unwrap();
        let home_dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(state_dir.path(), home_dir.path());
        sup.start().unwrap();
        sup.stop().await.unwrap();
        assert!(sup.state.running_tasks.is_empty());
    }

    #[tokio::test]
    async fn tick_is_a_noop_when_not_running() {
        let state_dir = tempfile::tempdir().unwrap();
        let home_dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(state_dir.path(), home_dir.path());

        // Status defaults to Idle; tick must not touch the indexer at all.
        sup.tick().await.unwrap();
        assert_eq!(sup.running_count(), 0);
    }

    fn task_with_status(id: &str, status: TaskStatus) -> Task {
        Task {
            id: id.into(),
            path: format!("projects/demo/task/{id}.md"),
            title: id.into(),
            priority: crate::domain::Priority::Medium,
            status,
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
    async fn cancel_newly_cancelled_signals_once_per_task() {
        let state_dir = tempfile::tempdir().unwrap();
        let home_dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(state_dir.path(), home_dir.path());
        sup.state.running_tasks.push(RunningTaskEntry {
            task_id: "t1".into(),
            pid: u32::MAX / 2, // already dead, so terminate_pid is a harmless no-op
            pane_id: None,
            window_name: None,
            port: None,
            spawned_at: Utc::now(),
        });

        let tasks = vec![task_with_status("t1", TaskStatus::Cancelled)];
        sup.cancel_newly_cancelled(&tasks);
        assert!(sup.cancelling.contains("t1"));

        // A second pass over the same still-cancelled task must not panic
        // or double-insert; the dedup set is what prevents a re-signal.
        sup.cancel_newly_cancelled(&tasks);
        assert_eq!(sup.cancelling.len(), 1);
    }
}
