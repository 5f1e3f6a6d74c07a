//! Task ID generation and shape validation.
//!
//! Task IDs take one of two forms: an 8-character alphanumeric id assigned
//! by the note store, or a `<13-digit-epoch-ms>-<slug>` id generated here
//! when the runner creates a task on the store's behalf (e.g. a setup-retry
//! marker).

/// Generate a fresh `<epoch-ms>-<slug>` task id.
pub fn generate_task_id(title: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    format!("{millis}-{}", slugify(title))
}

/// Slugify a title for use in an id: lowercase, apostrophes stripped,
/// everything else collapsed to single hyphens.
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Shape-check a task id: either 8 alphanumeric characters, or a run of
/// digits (13+ for epoch-ms) followed by `-` and a non-empty slug.
pub fn is_well_formed(id: &str) -> bool {
    if id.len() == 8 && id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return true;
    }
    if let Some((epoch, slug)) = id.split_once('-') {
        return !epoch.is_empty() && epoch.chars().all(|c| c.is_ascii_digit()) && !slug.is_empty();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_strips_apostrophes_and_collapses_punctuation() {
        assert_eq!(slugify("Don't Fear the Reaper!"), "dont-fear-the-reaper");
    }

    #[test]
    fn generated_id_has_epoch_slug_shape() {
        let id = generate_task_id("Add OAuth support");
        assert!(is_well_formed(&id));
        assert!(id.ends_with("add-oauth-support"));
    }

    #[test]
    fn eight_char_alphanumeric_is_well_formed() {
        assert!(is_well_formed("ab12cd34"));
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("not-an-epoch-id"));
        assert!(!is_well_formed("ab12cd")); // too short, no separator
    }
}
