//! Markdown H2/H3 section extraction for the entry-sections endpoints.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub title: String,
    pub level: u8,
    pub line: usize,
}

fn header(line: &str) -> Option<(u8, &str)> {
    let trimmed = line.trim_start();
    if let Some(title) = trimmed.strip_prefix("### ") {
        Some((3, title.trim()))
    } else if let Some(title) = trimmed.strip_prefix("## ") {
        Some((2, title.trim()))
    } else {
        None
    }
}

/// All H2/H3 headers in document order, with 1-based line numbers.
pub fn list_sections(content: &str) -> Vec<Section> {
    content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| header(line).map(|(level, title)| Section { title: title.to_string(), level, line: i + 1 }))
        .collect()
}

/// The body of the first section matching `title` (case-insensitive). When
/// `include_subsections` is false, the body stops at the very next header
/// of any level; when true, it stops only at the next header whose level is
/// at or above the matched section's own level.
pub fn extract_section(content: &str, title: &str, include_subsections: bool) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let sections = list_sections(content);
    let idx = sections.iter().position(|s| s.title.eq_ignore_ascii_case(title))?;
    let target = &sections[idx];

    let end = sections[idx + 1..]
        .iter()
        .find(|s| if include_subsections { s.level <= target.level } else { true })
        .map(|s| s.line - 1)
        .unwrap_or(lines.len());

    Some(lines[target.line..end].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Title\n\nIntro text.\n\n## Background\n\nSome background.\n\n### Detail\n\nNested detail.\n\n## Plan\n\nThe plan body.\n";

    #[test]
    fn list_sections_finds_h2_and_h3_with_line_numbers() {
        let sections = list_sections(DOC);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0], Section { title: "Background".into(), level: 2, line: 5 });
        assert_eq!(sections[1].title, "Detail");
        assert_eq!(sections[1].level, 3);
    }

    #[test]
    fn extract_section_excludes_subsections_by_default() {
        let body = extract_section(DOC, "background", false).unwrap();
        assert!(body.contains("Some background."));
        assert!(!body.contains("Nested detail."));
    }

    #[test]
    fn extract_section_includes_subsections_when_requested() {
        let body = extract_section(DOC, "background", true).unwrap();
        assert!(body.contains("Nested detail."));
        assert!(!body.contains("The plan body."));
    }

    #[test]
    fn extract_section_matches_case_insensitively() {
        assert!(extract_section(DOC, "PLAN", false).unwrap().contains("The plan body."));
    }

    #[test]
    fn extract_section_returns_none_for_unknown_title() {
        assert!(extract_section(DOC, "Nonexistent", false).is_none());
    }
}
