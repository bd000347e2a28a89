use crate::models::work_item::{ReleaseCounts, WorkItemRow};
use once_cell::sync::Lazy;
use regex::Regex;

static SCORE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]+)/([0-9]+)$").expect("score pattern is a valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Pbi,
    Bug,
    Other,
}

/// Case-insensitive type bucket. PBI wins over Bug when both match.
pub fn classify_type(wi_type: &str) -> ItemKind {
    let lower = wi_type.to_lowercase();
    if lower.contains("pbi") || lower.contains("product backlog") {
        ItemKind::Pbi
    } else if lower.contains("bug") {
        ItemKind::Bug
    } else {
        ItemKind::Other
    }
}

/// "N/N" with identical ASCII digit strings. "04/4" is not full.
pub fn is_full_score(score: Option<&str>) -> bool {
    let Some(score) = score else {
        return false;
    };
    SCORE_PATTERN
        .captures(score)
        .map(|caps| caps[1] == caps[2])
        .unwrap_or(false)
}

pub fn is_incomplete(row: &WorkItemRow) -> bool {
    row.missing
        .as_deref()
        .map(|m| !m.trim().is_empty())
        .unwrap_or(false)
}

pub fn percent_of(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (part as f64 / total as f64 * 100.0).round() as u32
}

pub fn compute_counts(rows: &[WorkItemRow]) -> ReleaseCounts {
    let mut counts = ReleaseCounts {
        total: rows.len(),
        ..ReleaseCounts::default()
    };

    for row in rows {
        match classify_type(&row.wi_type) {
            ItemKind::Pbi => counts.pbi_count += 1,
            ItemKind::Bug => counts.bug_count += 1,
            ItemKind::Other => {}
        }

        if is_full_score(row.score.as_deref()) {
            counts.full_score_count += 1;
        }
    }

    counts.full_score_percent = percent_of(counts.full_score_count, counts.total);
    counts
}
