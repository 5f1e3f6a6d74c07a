//! Embedded prompt templates, compiled into the binary from `prompts/*.hbs`.

use tracing::debug;

pub const FRESH: &str = include_str!("../../prompts/fresh.hbs");
pub const RESUME: &str = include_str!("../../prompts/resume.hbs");
pub const SETUP: &str = include_str!("../../prompts/setup.hbs");

pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "fresh" => Some(FRESH),
        "resume" => Some(RESUME),
        "setup" => Some(SETUP),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_resolve() {
        assert!(get_embedded("fresh").is_some());
        assert!(get_embedded("resume").is_some());
        assert!(get_embedded("setup").is_some());
    }

    #[test]
    fn unknown_name_is_none() {
        assert!(get_embedded("nonexistent").is_none());
    }
}
