//! Executor: prompt construction and subprocess spawning for ready tasks.
//!
//! Three spawn modes — background, TUI window, dashboard pane — share
//! prompt construction and differ only in how the subprocess is attached to
//! a terminal. The [`Multiplexer`] trait keeps the dashboard/TUI modes
//! testable without a real tmux.

pub mod multiplexer;
mod spawn;

pub use multiplexer::{Multiplexer, TmuxMultiplexer};
pub use spawn::{Executor, ExecutorError, SpawnHandle};
