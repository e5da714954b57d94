//! Markdown codec for spec-tool feature documents.
//!
//! # Markdown Grammar
//!
//! - The first H1 line is the feature title: `# Feature: Title` (the
//!   `Feature:` prefix is optional)
//! - H2 lines open sections (case-insensitive):
//!   - Outcomes, Acceptance Criteria (alias Acceptance), Constraints,
//!     User Stories (alias Stories)
//! - Section items are bullets (`- `, `* `, `1. `); checkboxes are stripped
//! - Under User Stories, `### KEY: Title` starts a story. Its bullets are
//!   acceptance criteria and a `Tags: a, b` line lists its tags
//! - Unknown sections and free text are ignored
//!
//! The feature key never appears in the document; it comes from the file
//! name.

use crate::model::{Feature, Story};
use std::fmt::Write as _;

/// Section types recognized in the markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    /// Before any H2
    Preamble,
    Outcomes,
    Acceptance,
    Constraints,
    Stories,
    Unknown,
}

impl Section {
    fn from_header(header: &str) -> Self {
        let normalized = header.trim().trim_end_matches(':').to_lowercase();
        match normalized.as_str() {
            "outcomes" | "outcome" => Self::Outcomes,
            "acceptance criteria" | "acceptance" => Self::Acceptance,
            "constraints" => Self::Constraints,
            "user stories" | "stories" => Self::Stories,
            _ => Self::Unknown,
        }
    }
}

/// Strip a bullet marker and an optional checkbox.
fn bullet_text(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let rest = if let Some(rest) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .or_else(|| trimmed.strip_prefix("+ "))
    {
        rest
    } else {
        let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        trimmed[digits..].strip_prefix(". ")?
    };

    let rest = rest.trim_start();
    let rest = ["[ ] ", "[x] ", "[X] "]
        .iter()
        .find_map(|mark| rest.strip_prefix(mark))
        .unwrap_or(rest);
    let text = rest.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn parse_tags(line: &str) -> Option<Vec<String>> {
    let trimmed = line.trim();
    let (label, rest) = trimmed.split_once(':')?;
    if !label.trim().eq_ignore_ascii_case("tags") {
        return None;
    }
    Some(
        rest.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

fn parse_story_header(header: &str) -> Story {
    match header.split_once(':') {
        Some((key, title)) => Story::new(key.trim(), title.trim()),
        None => Story::new(header.trim(), ""),
    }
}

/// Parse markdown content into a feature with the given key.
#[must_use]
pub fn parse_feature(key: &str, content: &str) -> Feature {
    let mut feature = Feature::new(key, "");
    let mut section = Section::Preamble;
    let mut seen_title = false;

    for line in content.lines() {
        if let Some(title) = line.strip_prefix("# ") {
            if !seen_title {
                let title = title.trim();
                let title = title
                    .get(..8)
                    .filter(|p| p.eq_ignore_ascii_case("feature:"))
                    .map_or(title, |_| title[8..].trim());
                feature.title = title.to_string();
                seen_title = true;
            }
            continue;
        }

        if let Some(header) = line.strip_prefix("## ") {
            section = Section::from_header(header);
            continue;
        }

        if let Some(header) = line.strip_prefix("### ") {
            if section == Section::Stories {
                feature.stories.push(parse_story_header(header));
            }
            continue;
        }

        match section {
            Section::Outcomes => feature.outcomes.extend(bullet_text(line)),
            Section::Acceptance => feature.acceptance.extend(bullet_text(line)),
            Section::Constraints => feature.constraints.extend(bullet_text(line)),
            Section::Stories => {
                if let Some(story) = feature.stories.last_mut() {
                    if let Some(tags) = parse_tags(line) {
                        story.tags.extend(tags);
                    } else if let Some(text) = bullet_text(line) {
                        story.acceptance.push(text);
                    }
                }
            }
            Section::Preamble | Section::Unknown => {}
        }
    }

    feature
}

/// One bullet line per item. Line breaks and runs of whitespace collapse to
/// a single space; blank items are dropped.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_items(out: &mut String, items: &[String]) {
    for item in items.iter().map(|i| single_line(i)).filter(|i| !i.is_empty()) {
        let _ = writeln!(out, "- {item}");
    }
}

fn push_list(out: &mut String, heading: &str, items: &[String]) {
    if items.iter().all(|i| i.trim().is_empty()) {
        return;
    }
    let _ = writeln!(out, "\n## {heading}\n");
    push_items(out, items);
}

/// True when rendering then parsing `feature` gives back the same
/// spec-tool view, i.e. markdown can hold all of its text.
#[must_use]
pub fn round_trips(feature: &Feature) -> bool {
    parse_feature(&feature.key, &render_feature(feature)).external_view() == feature.external_view()
}

/// Render a feature as markdown. Empty sections are omitted.
#[must_use]
pub fn render_feature(feature: &Feature) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Feature: {}", single_line(&feature.title));

    push_list(&mut out, "Outcomes", &feature.outcomes);
    push_list(&mut out, "Acceptance Criteria", &feature.acceptance);
    push_list(&mut out, "Constraints", &feature.constraints);

    if !feature.stories.is_empty() {
        out.push_str("\n## User Stories\n");
        for story in &feature.stories {
            let key = single_line(&story.key);
            let title = single_line(&story.title);
            if title.is_empty() {
                let _ = writeln!(out, "\n### {key}");
            } else {
                let _ = writeln!(out, "\n### {key}: {title}");
            }
            if !story.tags.is_empty() {
                let tags: Vec<&str> = story.tags.iter().map(String::as_str).collect();
                let _ = writeln!(out, "\nTags: {}", tags.join(", "));
            }
            if story.acceptance.iter().any(|i| !i.trim().is_empty()) {
                out.push('\n');
                push_items(&mut out, &story.acceptance);
            }
        }
    }

    out
}
