use crate::commands::db::{get_db_connection, replace_release_rows};
use crate::error::ReadinessError;
use crate::models::work_item::{IngestReceipt, IngestRecord, WorkItemRow};
use indexmap::IndexSet;
use serde_json::Value;
use std::path::Path;

pub const MAX_BATCH_SIZE: usize = 5000;

/// Shape checks for one inbound record, beyond what deserialization enforces.
fn check_record(index: usize, record: &IngestRecord) -> Vec<String> {
    let mut issues = Vec::new();
    if record.release_id.trim().is_empty() {
        issues.push(format!("[{index}].release_id: must not be empty"));
    }
    if record.id <= 0 {
        issues.push(format!("[{index}].id: must be a positive integer, got {}", record.id));
    }
    if record.wi_type.trim().is_empty() {
        issues.push(format!("[{index}].type: must not be empty"));
    }
    issues
}

/// Validates the raw payload and maps it to storage rows. Nothing is written.
pub fn parse_ingest_payload(payload: &Value) -> Result<(String, Vec<WorkItemRow>), ReadinessError> {
    let items = payload
        .as_array()
        .ok_or_else(|| ReadinessError::invalid_payload("Payload must be a JSON array of work items"))?;

    if items.is_empty() {
        return Err(ReadinessError::invalid_payload("Empty payload"));
    }
    if items.len() > MAX_BATCH_SIZE {
        return Err(ReadinessError::invalid_payload(format!(
            "Payload holds {} records, the limit is {MAX_BATCH_SIZE}",
            items.len()
        )));
    }

    let mut issues = Vec::new();
    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match serde_json::from_value::<IngestRecord>(item.clone()) {
            Ok(record) => {
                issues.extend(check_record(index, &record));
                records.push(record);
            }
            Err(e) => issues.push(format!("[{index}]: {e}")),
        }
    }

    if !issues.is_empty() {
        return Err(ReadinessError::InvalidPayload {
            message: "Invalid payload".to_string(),
            issues,
        });
    }

    let release_ids: IndexSet<&str> = records.iter().map(|r| r.release_id.as_str()).collect();
    if release_ids.len() > 1 {
        return Err(ReadinessError::InvalidPayload {
            message: "All rows must share the same release_id".to_string(),
            issues: release_ids.iter().map(|id| format!("found: {id}")).collect(),
        });
    }

    let release_id = records[0].release_id.clone();
    let rows = records.into_iter().map(WorkItemRow::from).collect();
    Ok((release_id, rows))
}

pub async fn ingest_release(db_path: &Path, payload: Value) -> Result<IngestReceipt, ReadinessError> {
    let (release_id, rows) = parse_ingest_payload(&payload)?;

    let mut conn = get_db_connection(db_path)?;
    let inserted = replace_release_rows(&mut conn, &release_id, &rows)?;

    Ok(IngestReceipt {
        ok: true,
        release_id,
        inserted,
    })
}
