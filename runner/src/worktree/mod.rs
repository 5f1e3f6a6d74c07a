//! Git worktree management.
//!
//! Each non-default-branch task executes in its own git worktree under
//! `<mainRepo>/.worktrees/<sanitized-branch>`, materialized on demand and
//! left in place once created — the runner never deletes worktrees.

mod manager;

pub use manager::{WorktreeConfig, WorktreeError, WorktreeManager, sanitize_branch};
