//! Backlog document parsing.
//!
//! Pure: reads text, returns items. The state document is never consulted.
//!
//! The document needs a `## Current items` header; the section runs until a
//! `## Done` header or the end of the text. Inside it, item lines look like
//! `12a. Free text [tag] **no-auto-start** blocked-by: 7`. Any other line
//! is prose and is skipped.

use crate::error::{Error, Result};
use crate::model::{BacklogItem, SkipReason};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

struct Patterns {
    current_header: Regex,
    done_header: Regex,
    item_line: Regex,
    queue_tag: Regex,
    no_auto_start: Regex,
    no_auto_merge: Regex,
    blocked_by: Regex,
}

static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| Patterns {
    current_header: Regex::new(r"(?i)^##\s+Current items\s*$").expect("static regex"),
    done_header: Regex::new(r"(?i)^##\s+Done\s*$").expect("static regex"),
    item_line: Regex::new(r"(?i)^([0-9]+[a-z0-9]*)\.\s+(.*)$").expect("static regex"),
    queue_tag: Regex::new(r"\[([A-Za-z]+)\]").expect("static regex"),
    no_auto_start: Regex::new(r"(?i)\*\*no-auto-start\*\*").expect("static regex"),
    no_auto_merge: Regex::new(r"(?i)\*\*no-auto-merge\*\*").expect("static regex"),
    blocked_by: Regex::new(r"(?i)\bblocked-by\s*:").expect("static regex"),
});

/// Items parsed from a backlog file on disk.
#[derive(Debug, Clone)]
pub struct ParsedBacklog {
    /// Absolute path of the parsed document.
    pub file: PathBuf,
    pub items: Vec<BacklogItem>,
}

/// Parse `document`, computing eligibility against `eligible_queue`.
pub fn parse(document: &str, eligible_queue: &str) -> Result<Vec<BacklogItem>> {
    let p = &*PATTERNS;
    let eligible_queue = eligible_queue.to_lowercase();
    let lines: Vec<&str> = document.lines().collect();

    let start = lines
        .iter()
        .position(|l| p.current_header.is_match(l.trim()))
        .map(|i| i + 1)
        .ok_or(Error::SectionNotFound { backlog_file: None })?;
    let end = lines[start..]
        .iter()
        .position(|l| p.done_header.is_match(l.trim()))
        .map_or(lines.len(), |i| start + i);

    let items = lines[start..end]
        .iter()
        .enumerate()
        .filter_map(|(offset, raw)| {
            let line = raw.trim();
            if line.is_empty() {
                return None;
            }
            let item_id = p.item_line.captures(line)?.get(1)?.as_str().to_string();
            Some(classify(p, item_id, line, start + offset + 1, &eligible_queue))
        })
        .collect();

    Ok(items)
}

/// Read and parse a backlog file.
pub async fn parse_file(path: &Path, eligible_queue: &str) -> Result<ParsedBacklog> {
    let file = std::path::absolute(path)?;
    let text = tokio::fs::read_to_string(&file).await?;
    let items = parse(&text, eligible_queue).map_err(|e| match e {
        Error::SectionNotFound { .. } => Error::SectionNotFound {
            backlog_file: Some(file.clone()),
        },
        other => other,
    })?;
    Ok(ParsedBacklog { file, items })
}

fn classify(
    p: &Patterns,
    item_id: String,
    line: &str,
    line_number: usize,
    eligible_queue: &str,
) -> BacklogItem {
    let queue_tag = p
        .queue_tag
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase());
    let no_auto_start = p.no_auto_start.is_match(line);
    let no_auto_merge = p.no_auto_merge.is_match(line);
    let blocked_by = p.blocked_by.is_match(line);

    let mut skip_reasons = Vec::new();
    if queue_tag.as_deref() != Some(eligible_queue) {
        skip_reasons.push(SkipReason::NotInQueue);
    }
    if no_auto_start {
        skip_reasons.push(SkipReason::NoAutoStart);
    }
    if blocked_by {
        skip_reasons.push(SkipReason::BlockedBy);
    }

    BacklogItem {
        item_id,
        queue_tag,
        work_line: line.to_string(),
        line_number,
        no_auto_start,
        no_auto_merge,
        blocked_by,
        eligible: skip_reasons.is_empty(),
        skip_reasons,
    }
}
