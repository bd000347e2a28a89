use crate::analysis::readiness::{classify_type, is_incomplete, ItemKind};
use crate::models::work_item::WorkItemRow;
use indexmap::IndexMap;
use serde::Serialize;

/// Keywords (module and subsystem names) used to bucket rows into themes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeVocabulary {
    keywords: Vec<String>,
}

impl ThemeVocabulary {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl Default for ThemeVocabulary {
    fn default() -> Self {
        Self::new(default_theme_keywords())
    }
}

pub fn default_theme_keywords() -> Vec<String> {
    [
        "SearchElse",
        "Historical Data",
        "FTP",
        "inmsg",
        "FarPoint",
        "ESL",
        "Load",
        "Unload",
        "Device",
        "Page",
        "API",
        "Performance",
        "Security",
        "UI",
        "Database",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// LLM-facing projection of a row. Absent fields are omitted, never `""`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedRow {
    pub id: i64,
    #[serde(rename = "type")]
    pub wi_type: String,
    pub title: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qa_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_evidence: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityStats {
    pub critical: usize,
    pub high: usize,
}

impl SeverityStats {
    pub fn summary(&self) -> String {
        if self.critical > 0 || self.high > 0 {
            format!("Critical: {}, High: {}", self.critical, self.high)
        } else {
            "None".to_string()
        }
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

fn contains_any(haystack: &str, keywords: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    keywords
        .iter()
        .filter(|kw| !kw.is_empty())
        .any(|kw| haystack.contains(&kw.to_lowercase()))
}

pub fn enhance_rows(rows: &[WorkItemRow]) -> Vec<EnhancedRow> {
    rows.iter()
        .map(|row| EnhancedRow {
            id: row.wi_id,
            wi_type: row.wi_type.clone(),
            title: row.title.clone(),
            state: row.state.clone(),
            severity: present(&row.severity),
            tags: present(&row.tags),
            score: present(&row.score),
            missing: present(&row.missing),
            acceptance_criteria: present(&row.acceptance_criteria),
            description: present(&row.description),
            dev_notes: present(&row.dev_notes),
            qa_notes: present(&row.qa_notes),
            review_evidence: present(&row.review_evidence),
        })
        .collect()
}

/// Bugs flagged by severity, a severity keyword in the title, or open gaps.
/// The type gate comes first: non-bugs are never hot.
pub fn identify_hot_items(rows: &[WorkItemRow], severity_keywords: &[String]) -> Vec<i64> {
    rows.iter()
        .filter(|row| row.wi_type.to_lowercase().contains("bug"))
        .filter(|row| {
            let severity_hit = row
                .severity
                .as_deref()
                .map(|s| contains_any(s, severity_keywords))
                .unwrap_or(false);

            severity_hit || contains_any(&row.title, severity_keywords) || is_incomplete(row)
        })
        .map(|row| row.wi_id)
        .collect()
}

/// Theme -> row IDs, in vocabulary order. Themes without matches are left out.
pub fn group_by_themes(rows: &[WorkItemRow], vocabulary: &ThemeVocabulary) -> IndexMap<String, Vec<i64>> {
    let search_texts: Vec<(i64, String)> = rows
        .iter()
        .map(|row| {
            let text = format!("{} {}", row.title, row.tags.as_deref().unwrap_or(""));
            (row.wi_id, text.to_lowercase())
        })
        .collect();

    let mut themes = IndexMap::new();
    for theme in vocabulary.keywords() {
        let needle = theme.to_lowercase();
        if needle.is_empty() {
            continue;
        }
        let ids: Vec<i64> = search_texts
            .iter()
            .filter(|(_, text)| text.contains(&needle))
            .map(|(id, _)| *id)
            .collect();
        if !ids.is_empty() {
            themes.insert(theme.clone(), ids);
        }
    }

    themes
}

pub fn severity_stats(rows: &[WorkItemRow]) -> SeverityStats {
    let mut stats = SeverityStats::default();

    for severity in rows.iter().filter_map(|row| row.severity.as_deref()) {
        let lower = severity.to_lowercase();
        if lower.contains("critical") || severity.starts_with('1') {
            stats.critical += 1;
        }
        if lower.contains("high") || severity.starts_with('2') {
            stats.high += 1;
        }
    }

    stats
}

/// Bugs and PBIs split, used by the readiness section of the prompt.
pub fn kind_breakdown(rows: &[WorkItemRow]) -> (usize, usize) {
    rows.iter().fold((0, 0), |(pbis, bugs), row| match classify_type(&row.wi_type) {
        ItemKind::Pbi => (pbis + 1, bugs),
        ItemKind::Bug => (pbis, bugs + 1),
        ItemKind::Other => (pbis, bugs),
    })
}
