use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// One work item's state within one release, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemRow {
    pub release_id: String,
    pub wi_id: i64,
    pub wi_type: String, // "Bug" | "PBI" | "Product Backlog Item" | ...
    pub title: String,
    pub state: String,
    pub severity: Option<String>, // e.g. "1 - Critical", "2 - High"
    pub tags: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub description: Option<String>,
    pub dev_notes: Option<String>,
    pub qa_notes: Option<String>,
    pub score: Option<String>, // usually "N/M"
    pub missing: Option<String>,
    pub review_evidence: Option<String>,
    pub created_at: Option<String>,
}

impl WorkItemRow {
    pub fn new(release_id: &str, wi_id: i64, wi_type: &str, title: &str, state: &str) -> Self {
        Self {
            release_id: release_id.to_string(),
            wi_id,
            wi_type: wi_type.to_string(),
            title: title.to_string(),
            state: state.to_string(),
            severity: None,
            tags: None,
            acceptance_criteria: None,
            description: None,
            dev_notes: None,
            qa_notes: None,
            score: None,
            missing: None,
            review_evidence: None,
            created_at: None,
        }
    }
}

/// Inbound record shape sent by the collection agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRecord {
    pub release_id: String,
    #[serde(deserialize_with = "integral_id")]
    pub id: i64,
    #[serde(rename = "type")]
    pub wi_type: String,
    pub title: String,
    pub state: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default, rename = "acceptanceCriteria")]
    pub acceptance_criteria: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "devNotes")]
    pub dev_notes: Option<String>,
    #[serde(default, rename = "qaNotes")]
    pub qa_notes: Option<String>,
    #[serde(default)]
    pub score: Option<String>,
    #[serde(default)]
    pub missing: Option<String>,
    #[serde(default, rename = "reviewEvidence")]
    pub review_evidence: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Float(f64),
}

// Largest float that still holds every integer exactly.
const MAX_EXACT_FLOAT_ID: f64 = 9_007_199_254_740_991.0;

/// Accepts `3` and `3.0`; rejects fractional and non-numeric ids.
fn integral_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match RawId::deserialize(deserializer).map_err(|_| D::Error::custom("id: expected an integer"))? {
        RawId::Int(id) => Ok(id),
        RawId::Float(id) if id.fract() == 0.0 && id.abs() <= MAX_EXACT_FLOAT_ID => Ok(id as i64),
        RawId::Float(id) => Err(D::Error::custom(format!("id: expected an integer, got {id}"))),
    }
}

impl From<IngestRecord> for WorkItemRow {
    fn from(record: IngestRecord) -> Self {
        Self {
            release_id: record.release_id,
            wi_id: record.id,
            wi_type: record.wi_type,
            title: record.title,
            state: record.state,
            severity: record.severity,
            tags: record.tags,
            acceptance_criteria: record.acceptance_criteria,
            description: record.description,
            dev_notes: record.dev_notes,
            qa_notes: record.qa_notes,
            score: record.score,
            missing: record.missing,
            review_evidence: record.review_evidence,
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseCounts {
    pub total: usize,
    pub pbi_count: usize,
    pub bug_count: usize,
    pub full_score_count: usize,
    pub full_score_percent: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseView {
    pub release_id: String,
    pub counts: ReleaseCounts,
    pub rows: Vec<WorkItemRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub ok: bool,
    pub release_id: String,
    pub inserted: usize,
}
