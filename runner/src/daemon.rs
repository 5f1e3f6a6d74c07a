//! Detached supervisor process management: spawning a project's supervisor
//! loop out of the CLI's process group, and stopping it gracefully.
//!
//! Unlike a single global daemon, the runner has one background process per
//! project; the PID file it reads and removes is the same
//! `<stateDir>/runner-<project>.pid` the supervisor itself writes on start
//! via [`crate::state::write_supervisor_pid`].

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use eyre::{Context, Result};
use tracing::{debug, info, warn};

use crate::state::{is_pid_alive, kill_pid, remove_supervisor_pid, terminate_pid};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn pid_file_path(state_dir: &Path, project: &str) -> PathBuf {
    state_dir.join(format!("runner-{project}.pid"))
}

pub fn read_supervisor_pid(state_dir: &Path, project: &str) -> Option<u32> {
    std::fs::read_to_string(pid_file_path(state_dir, project)).ok()?.trim().parse().ok()
}

pub fn is_supervisor_running(state_dir: &Path, project: &str) -> bool {
    read_supervisor_pid(state_dir, project).is_some_and(is_pid_alive)
}

/// Spawn `run-supervisor <project>` detached from the current process, with
/// stdio redirected to `/dev/null`. The child is responsible for
/// registering its own PID once its poll loop starts.
pub fn start_detached(state_dir: &Path, project: &str) -> Result<u32> {
    if is_supervisor_running(state_dir, project) {
        return Err(eyre::eyre!("a supervisor is already running for project \"{project}\""));
    }

    let exe = std::env::current_exe().context("resolving current executable")?;
    debug!(?exe, project, "daemon::start_detached: spawning");

    let child = Command::new(&exe)
        .arg("run-supervisor")
        .arg(project)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("spawning detached supervisor process")?;

    let pid = child.id();
    info!(project, pid, "daemon::start_detached: spawned");
    Ok(pid)
}

/// SIGTERM, wait up to 5s polling every 100ms, SIGKILL if still alive.
pub fn stop(state_dir: &Path, project: &str) -> Result<()> {
    let Some(pid) = read_supervisor_pid(state_dir, project) else {
        return Err(eyre::eyre!("no running supervisor recorded for project \"{project}\""));
    };
    info!(project, pid, "daemon::stop: sending termination signal");

    #[cfg(unix)]
    terminate_pid(pid);
    #[cfg(windows)]
    {
        Command::new("taskkill").args(["/PID", &pid.to_string(), "/F"]).output().context("killing process")?;
    }

    let mut attempts = 0;
    while is_pid_alive(pid) && attempts < 50 {
        std::thread::sleep(Duration::from_millis(100));
        attempts += 1;
    }

    if is_pid_alive(pid) {
        warn!(project, pid, "daemon::stop: did not exit gracefully, sending SIGKILL");
        #[cfg(unix)]
        kill_pid(pid);
    }

    remove_supervisor_pid(state_dir, project);
    info!(project, pid, "daemon::stop: stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_supervisor_pid_none_when_no_file() {
        let dir = tempdir().unwrap();
        assert_eq!(read_supervisor_pid(dir.path(), "demo"), None);
    }

    #[test]
    fn is_supervisor_running_false_for_dead_pid() {
        let dir = tempdir().unwrap();
        std::fs::write(pid_file_path(dir.path(), "demo"), (u32::MAX / 2).to_string()).unwrap();
        assert!(!is_supervisor_running(dir.path(), "demo"));
    }

    #[test]
    fn stop_errors_when_no_pid_file() {
        let dir = tempdir().unwrap();
        assert!(stop(dir.path(), "ghost").is_err());
    }
}
