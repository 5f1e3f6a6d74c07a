//! Worktree manager: materializes a git worktree for a task's branch,
//! creating it from the repository's default branch when the branch is new,
//! then runs a setup agent pass inside it before handing the path back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::prompts::{PromptContext, PromptKind, PromptLoader};

#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("git command failed: {0}")]
    GitError(String),

    #[error("failed to create worktree: {0}")]
    CreateFailed(String),

    #[error("setup agent timed out after {0}s")]
    SetupTimeout(u64),

    #[error("setup agent reported failure: {0}")]
    SetupFailed(String),

    #[error("setup agent produced no sentinel output")]
    SetupIndeterminate,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the worktree manager.
#[derive(Debug, Clone)]
pub struct WorktreeConfig {
    /// Root of the main repository a branch's worktree is derived from.
    pub repo_root: PathBuf,

    /// Subdirectory of `repo_root` that holds worktrees (default `.worktrees`).
    pub worktree_subdir: String,

    /// Seconds to allow the setup agent to run before treating it as failed.
    pub setup_timeout_secs: u64,

    /// Command used to invoke the AI assistant for the setup pass.
    pub agent_command: String,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            worktree_subdir: ".worktrees".to_string(),
            setup_timeout_secs: 120,
            agent_command: "claude".to_string(),
        }
    }
}

/// Replace `/` with `-`, then drop anything outside `[A-Za-z0-9_-]`.
pub fn sanitize_branch(branch: &str) -> String {
    branch
        .replace('/', "-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

pub struct WorktreeManager {
    config: WorktreeConfig,
}

impl WorktreeManager {
    pub fn new(config: WorktreeConfig) -> Self {
        debug!(?config, "WorktreeManager::new: called");
        Self { config }
    }

    fn worktrees_dir(&self) -> PathBuf {
        self.config.repo_root.join(&self.config.worktree_subdir)
    }

    /// Resolve the worktree path for `branch`, materializing and setting one
    /// up if it doesn't exist yet. Returns `Ok(None)` when `branch` is
    /// already the main repo's checked-out branch, in which case the caller
    /// should operate on `repo_root` directly.
    pub async fn ensure(&self, branch: &str) -> Result<Option<PathBuf>, WorktreeError> {
        debug!(%branch, "WorktreeManager::ensure: called");

        if self.checked_out_branch().await? == Some(branch.to_string()) {
            debug!(%branch, "WorktreeManager::ensure: branch is already checked out in main repo");
            return Ok(None);
        }

        if let Some(path) = self.find_existing_worktree(branch).await? {
            debug!(%branch, ?path, "WorktreeManager::ensure: found existing worktree");
            return Ok(Some(path));
        }

        let path = self.create(branch).await?;
        self.run_setup(&path).await?;
        Ok(Some(path))
    }

    async fn checked_out_branch(&self) -> Result<Option<String>, WorktreeError> {
        let output = Command::new("git")
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(&self.config.repo_root)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;
        if !output.status.success() {
            return Ok(None);
        }
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!name.is_empty() && name != "HEAD").then_some(name))
    }

    /// Parse `git worktree list --porcelain` for a worktree checked out on
    /// `branch`, returning its path if one already exists.
    async fn find_existing_worktree(&self, branch: &str) -> Result<Option<PathBuf>, WorktreeError> {
        let output = Command::new("git")
            .args(["worktree", "list", "--porcelain"])
            .current_dir(&self.config.repo_root)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorktreeError::GitError(stderr.to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let target_ref = format!("refs/heads/{branch}");
        let mut current_path: Option<PathBuf> = None;
        for line in stdout.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                current_path = Some(PathBuf::from(path));
            } else if let Some(branch_ref) = line.strip_prefix("branch ") {
                if branch_ref == target_ref {
                    return Ok(current_path);
                }
            }
        }
        Ok(None)
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool, WorktreeError> {
        let output = Command::new("git")
            .args(["rev-parse", "--verify", &format!("refs/heads/{branch}")])
            .current_dir(&self.config.repo_root)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;
        Ok(output.status.success())
    }

    /// Resolve the repository's default branch via `origin/HEAD`, falling
    /// back to `main` then `master`.
    async fn default_branch(&self) -> Result<String, WorktreeError> {
        let output = Command::new("git")
            .args(["symbolic-ref", "refs/remotes/origin/HEAD"])
            .current_dir(&self.config.repo_root)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;
        if output.status.success() {
            let full = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if let Some(name) = full.strip_prefix("refs/remotes/origin/") {
                return Ok(name.to_string());
            }
        }
        if self.branch_exists("main").await? {
            return Ok("main".to_string());
        }
        Ok("master".to_string())
    }

    async fn ensure_gitignored(&self) -> Result<(), WorktreeError> {
        let gitignore_path = self.config.repo_root.join(".gitignore");
        let entry = format!("{}/", self.config.worktree_subdir);
        let existing = tokio::fs::read_to_string(&gitignore_path).await.unwrap_or_default();
        if existing.lines().any(|l| l.trim() == entry || l.trim() == self.config.worktree_subdir) {
            return Ok(());
        }
        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&entry);
        updated.push('\n');
        tokio::fs::write(&gitignore_path, updated).await?;
        debug!("WorktreeManager::ensure_gitignored: added worktree subdir to .gitignore");
        Ok(())
    }

    async fn create(&self, branch: &str) -> Result<PathBuf, WorktreeError> {
        debug!(%branch, "WorktreeManager::create: called");
        self.ensure_gitignored().await?;

        let sanitized = sanitize_branch(branch);
        let path = self.worktrees_dir().join(&sanitized);
        tokio::fs::create_dir_all(self.worktrees_dir()).await?;

        let args: Vec<String> = if self.branch_exists(branch).await? {
            vec![
                "worktree".to_string(),
                "add".to_string(),
                path.to_string_lossy().to_string(),
                branch.to_string(),
            ]
        } else {
            let base = self.default_branch().await?;
            vec![
                "worktree".to_string(),
                "add".to_string(),
                path.to_string_lossy().to_string(),
                "-b".to_string(),
                branch.to_string(),
                base,
            ]
        };

        let output = Command::new("git")
            .args(&args)
            .current_dir(&self.config.repo_root)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorktreeError::CreateFailed(stderr.to_string()));
        }

        info!(%branch, ?path, "WorktreeManager::create: worktree created");
        Ok(path)
    }

    /// Spawn the setup agent inside a freshly created worktree and interpret
    /// its `SETUP_SUCCESS` / `SETUP_FAILED: <reason>` sentinel.
    async fn run_setup(&self, worktree: &Path) -> Result<(), WorktreeError> {
        let loader = PromptLoader::new(worktree);
        let ctx = PromptContext {
            workdir: worktree.to_string_lossy().to_string(),
            ..Default::default()
        };
        let prompt = loader
            .render(PromptKind::Setup, &ctx)
            .map_err(|e| WorktreeError::SetupFailed(e.to_string()))?;

        let timeout = Duration::from_secs(self.config.setup_timeout_secs);
        let child = Command::new(&self.config.agent_command)
            .arg("-p")
            .arg(&prompt)
            .current_dir(worktree)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(WorktreeError::GitError(e.to_string())),
            Err(_) => {
                warn!(?worktree, "WorktreeManager::run_setup: timed out");
                return Err(WorktreeError::SetupTimeout(self.config.setup_timeout_secs));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("SETUP_SUCCESS") {
            info!(?worktree, "WorktreeManager::run_setup: setup succeeded");
            return Ok(());
        }
        if let Some(idx) = stdout.find("SETUP_FAILED:") {
            let reason = stdout[idx + "SETUP_FAILED:".len()..].trim().to_string();
            return Err(WorktreeError::SetupFailed(reason));
        }
        if !output.status.success() {
            return Err(WorktreeError::SetupFailed(format!(
                "setup agent exited with {}",
                output.status
            )));
        }
        Err(WorktreeError::SetupIndeterminate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_git_repo(dir: &Path) {
        Command::new("git").args(["init", "-b", "main"]).current_dir(dir).output().await.unwrap();
        Command::new("git")
            .args(["config", "user.email", "test@test.com"])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
        Command::new("git").args(["config", "user.name", "Test"]).current_dir(dir).output().await.unwrap();
        Command::new("git")
            .args(["commit", "--allow-empty", "-m", "initial"])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
    }

    #[test]
    fn sanitize_branch_replaces_slashes_and_strips_specials() {
        assert_eq!(sanitize_branch("feature/add widget!"), "feature-addwidget");
    }

    #[tokio::test]
    async fn checked_out_branch_short_circuits() {
        let repo = tempdir().unwrap();
        setup_git_repo(repo.path()).await;

        let manager = WorktreeManager::new(WorktreeConfig {
            repo_root: repo.path().to_path_buf(),
            ..Default::default()
        });

        assert_eq!(manager.checked_out_branch().await.unwrap(), Some("main".to_string()));
    }

    #[tokio::test]
    async fn creates_new_branch_from_default_when_branch_is_new() {
        let repo = tempdir().unwrap();
        setup_git_repo(repo.path()).await;

        let manager = WorktreeManager::new(WorktreeConfig {
            repo_root: repo.path().to_path_buf(),
            ..Default::default()
        });

        let path = manager.create("feature/widget").await.unwrap();
        assert!(path.exists());
        assert_eq!(path, repo.path().join(".worktrees").join("feature-widget"));

        let gitignore = tokio::fs::read_to_string(repo.path().join(".gitignore")).await.unwrap();
        assert!(gitignore.contains(".worktrees/"));
    }

    #[tokio::test]
    async fn find_existing_worktree_locates_prior_checkout() {
        let repo = tempdir().unwrap();
        setup_git_repo(repo.path()).await;

        let manager = WorktreeManager::new(WorktreeConfig {
            repo_root: repo.path().to_path_buf(),
            ..Default::default()
        });

        let created = manager.create("feature/widget").await.unwrap();
        let found = manager.find_existing_worktree("feature/widget").await.unwrap();
        assert_eq!(found, Some(created));
    }
}
