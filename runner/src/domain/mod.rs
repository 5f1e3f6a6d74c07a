//! Core data types shared across the resolver, service, and supervisor.

pub mod id;
pub mod priority;
pub mod task;

pub use id::{generate_task_id, slugify};
pub use priority::Priority;
pub use task::{
    BlockReason, Classification, DependencyResult, ResolvedTask, ResolverStats, Task, TaskIndex, TaskStatus,
};
