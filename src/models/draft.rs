use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_HIGHLIGHTS: u8 = 6;
pub const MAX_HIGHLIGHTS_LIMIT: u8 = 10;

/// Validated approval-request narrative returned by the draft generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftOutput {
    pub purpose: String,
    pub highlights: Vec<String>,
    pub primary_risk: String,
    pub blast_radius: String,
    pub build_readiness: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftOptions {
    pub max_highlights: u8,
    pub severity_keywords: Vec<String>,
}

impl Default for DraftOptions {
    fn default() -> Self {
        Self {
            max_highlights: DEFAULT_MAX_HIGHLIGHTS,
            severity_keywords: default_severity_keywords(),
        }
    }
}

pub fn default_severity_keywords() -> Vec<String> {
    vec!["High".to_string(), "Critical".to_string()]
}
