//! Runner — a multi-project task runner and dependency scheduler.
//!
//! Discovers task entries under a per-project directory, resolves their
//! inter-task dependencies and parent/child hierarchy, classifies each
//! task's readiness, and — as a long-running per-project supervisor —
//! launches an external AI coding assistant subprocess per ready task
//! inside a git worktree, tracking liveness and recovering from restarts.
//!
//! # Modules
//!
//! - [`resolver`] - pure dependency resolution and readiness classification
//! - [`service`] - project listing, task loading, workdir resolution
//! - [`worktree`] - git worktree lifecycle
//! - [`executor`] - prompt rendering and subprocess spawning
//! - [`supervisor`] - the per-project poll loop
//! - [`oauth`] - the OAuth 2.1 PKCE authorization server
//! - [`http`] - task query endpoints, section extraction, MCP transport
//! - [`state`] - persisted runner state and liveness checks
//! - [`config`] - layered configuration
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod executor;
pub mod http;
pub mod oauth;
pub mod prompts;
pub mod resolver;
pub mod service;
pub mod state;
pub mod supervisor;
pub mod worktree;

pub use config::Config;
pub use domain::{BlockReason, Classification, DependencyResult, ResolvedTask, ResolverStats, Task, TaskStatus};
pub use executor::{Executor, ExecutorError, Multiplexer, SpawnHandle, TmuxMultiplexer};
pub use oauth::{OAuthError, OAuthStore, SharedOAuthStore};
pub use service::{ServiceError, TaskService};
pub use state::{RunnerState, RunnerStatus, RunningTaskEntry, is_pid_alive, stale_state_sweep};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorError};
pub use worktree::{WorktreeConfig, WorktreeError, WorktreeManager};
