//! Prompt loader.
//!
//! Loads a named template from a user override directory, falling back to
//! the embedded default, and renders it with Handlebars.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// Which brief to give the assistant subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Fresh,
    Resume,
    Setup,
}

impl PromptKind {
    fn template_name(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Resume => "resume",
            Self::Setup => "setup",
        }
    }
}

/// Variables available to the `fresh`/`resume`/`setup` templates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptContext {
    pub task_id: String,
    pub task_title: String,
    pub task_path: String,
    pub project: String,
    pub workdir: String,
}

/// Loads and renders prompt templates, preferring a project's own overrides.
pub struct PromptLoader {
    hbs: Handlebars<'static>,
    override_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// `worktree` is searched for a `.brain/prompts/` override directory.
    pub fn new(worktree: impl AsRef<Path>) -> Self {
        let dir = worktree.as_ref().join(".brain/prompts");
        let override_dir = dir.exists().then_some(dir);
        debug!(?override_dir, "PromptLoader::new: resolved override directory");
        Self {
            hbs: Handlebars::new(),
            override_dir,
        }
    }

    /// A loader backed only by the embedded defaults, for tests.
    pub fn embedded_only() -> Self {
        Self {
            hbs: Handlebars::new(),
            override_dir: None,
        }
    }

    fn load_template(&self, name: &str) -> Result<String> {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(format!("{name}.hbs"));
            if path.exists() {
                debug!(?path, "PromptLoader::load_template: using override");
                return std::fs::read_to_string(&path).map_err(|e| eyre!("reading {}: {e}", path.display()));
            }
        }
        embedded::get_embedded(name)
            .map(str::to_string)
            .ok_or_else(|| eyre!("unknown prompt template: {name}"))
    }

    /// Render the template for `kind` with `ctx`.
    pub fn render(&self, kind: PromptKind, ctx: &PromptContext) -> Result<String> {
        let template = self.load_template(kind.template_name())?;
        self.hbs
            .render_template(&template, ctx)
            .map_err(|e| eyre!("rendering {}: {e}", kind.template_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PromptContext {
        PromptContext {
            task_id: "abc12345".into(),
            task_title: "Add widget".into(),
            task_path: "projects/demo/task/abc12345.md".into(),
            project: "demo".into(),
            workdir: "/home/user/demo".into(),
        }
    }

    #[test]
    fn renders_fresh_template() {
        let loader = PromptLoader::embedded_only();
        let out = loader.render(PromptKind::Fresh, &ctx()).unwrap();
        assert!(out.contains("Add widget"));
        assert!(out.contains("abc12345"));
    }

    #[test]
    fn renders_resume_template() {
        let loader = PromptLoader::embedded_only();
        let out = loader.render(PromptKind::Resume, &ctx()).unwrap();
        assert!(out.contains("resuming"));
    }

    #[test]
    fn override_directory_takes_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".brain/prompts")).unwrap();
        std::fs::write(tmp.path().join(".brain/prompts/fresh.hbs"), "CUSTOM {{task_title}}").unwrap();

        let loader = PromptLoader::new(tmp.path());
        let out = loader.render(PromptKind::Fresh, &ctx()).unwrap();
        assert_eq!(out, "CUSTOM Add widget");
    }
}
