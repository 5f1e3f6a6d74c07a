//! Prompt template system.
//!
//! Loads and renders `.hbs` prompt templates used to brief the AI assistant
//! subprocess before each spawn.
//!
//! Template loading chain:
//! 1. `<worktree>/.brain/prompts/{name}.hbs` (user override)
//! 2. Embedded fallback compiled into the binary

pub mod embedded;
mod loader;

pub use loader::{PromptContext, PromptKind, PromptLoader};
