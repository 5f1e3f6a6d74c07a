//! Terminal multiplexer abstraction.
//!
//! The executor's TUI and dashboard spawn modes drive a terminal
//! multiplexer (tmux in practice) to open a window or split a pane for the
//! assistant subprocess. Routed through a trait so the executor's spawn
//! logic is unit-testable with a fake multiplexer.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum MultiplexerError {
    #[error("multiplexer command failed: {0}")]
    CommandFailed(String),

    #[error("pane {0} did not appear within the poll window")]
    PaneNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Open a new window running `script_path`, titled `name`.
    async fn new_window(&self, name: &str, script_path: &std::path::Path) -> Result<(), MultiplexerError>;

    /// Split `target_pane`, running `script_path` in the new pane. Returns
    /// the new pane id (expected to start with `%`).
    async fn split_pane(&self, target_pane: &str, script_path: &std::path::Path) -> Result<String, MultiplexerError>;

    /// All currently live pane ids.
    async fn list_panes(&self) -> Vec<String>;

    async fn set_title(&self, pane_id: &str, title: &str);

    /// Kill `pane_id`, closing its window if it was the last pane in it.
    async fn kill_pane(&self, pane_id: &str) -> Result<(), MultiplexerError>;
}

pub struct TmuxMultiplexer;

#[async_trait]
impl Multiplexer for TmuxMultiplexer {
    async fn new_window(&self, name: &str, script_path: &std::path::Path) -> Result<(), MultiplexerError> {
        let output = Command::new("tmux")
            .args(["new-window", "-n", name, "--"])
            .arg(script_path)
            .output()
            .await?;
        if !output.status.success() {
            return Err(MultiplexerError::CommandFailed(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        debug!(%name, ?script_path, "TmuxMultiplexer::new_window: opened");
        Ok(())
    }

    async fn split_pane(&self, target_pane: &str, script_path: &std::path::Path) -> Result<String, MultiplexerError> {
        let output = Command::new("tmux")
            .args(["split-window", "-t", target_pane, "-P", "-F", "#{pane_id}", "--"])
            .arg(script_path)
            .output()
            .await?;
        if !output.status.success() {
            return Err(MultiplexerError::CommandFailed(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        let pane_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(%target_pane, %pane_id, "TmuxMultiplexer::split_pane: created");
        Ok(pane_id)
    }

    async fn list_panes(&self) -> Vec<String> {
        let output = Command::new("tmux")
            .args(["list-panes", "-a", "-F", "#{pane_id}"])
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout).lines().map(|l| l.trim().to_string()).collect(),
            _ => Vec::new(),
        }
    }

    async fn set_title(&self, pane_id: &str, title: &str) {
        let _ = Command::new("tmux").args(["select-pane", "-t", pane_id, "-T", title]).output().await;
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<(), MultiplexerError> {
        let output = Command::new("tmux").args(["kill-pane", "-t", pane_id]).output().await?;
        if !output.status.success() {
            return Err(MultiplexerError::CommandFailed(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        debug!(%pane_id, "TmuxMultiplexer::kill_pane: killed");
        Ok(())
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// In-memory fake used by executor tests: always "succeeds", records
    /// what was asked of it.
    #[derive(Default)]
    pub struct FakeMultiplexer {
        pub panes: Mutex<Vec<String>>,
        pub next_pane_id: Mutex<usize>,
    }

    #[async_trait]
    impl Multiplexer for FakeMultiplexer {
        async fn new_window(&self, _name: &str, _script_path: &std::path::Path) -> Result<(), MultiplexerError> {
            Ok(())
        }

        async fn split_pane(&self, _target_pane: &str, _script_path: &std::path::Path) -> Result<String, MultiplexerError> {
            let mut next = self.next_pane_id.lock().unwrap();
            *next += 1;
            let pane_id = format!("%{next}");
            self.panes.lock().unwrap().push(pane_id.clone());
            Ok(pane_id)
        }

        async fn list_panes(&self) -> Vec<String> {
            let mut panes = self.panes.lock().unwrap().clone();
            panes.push("%0".to_string());
            panes
        }

        async fn set_title(&self, _pane_id: &str, _title: &str) {}

        async fn kill_pane(&self, pane_id: &str) -> Result<(), MultiplexerError> {
            self.panes.lock().unwrap().retain(|p| p != pane_id);
            Ok(())
        }
    }
}
