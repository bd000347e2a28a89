use crate::ai::client::{OpenAiClient, TextGenerator};
use crate::ai::draft::DraftGenerator;
use crate::ai::rate_limit::{RateLimiter, SystemClock, RATE_LIMIT_WINDOW};
use crate::commands::db::{get_db_connection, get_release_rows, SqliteWindowStore};
use crate::commands::settings::EffectiveSettings;
use crate::error::ReadinessError;
use crate::models::draft::{DraftOptions, DraftOutput, MAX_HIGHLIGHTS_LIMIT};
use crate::models::work_item::WorkItemRow;
use serde_json::Value;
use std::sync::Arc;

/// Merges caller options over the configured defaults.
pub fn parse_draft_options(options: Option<&Value>, settings: &EffectiveSettings) -> Result<DraftOptions, ReadinessError> {
    let mut parsed = DraftOptions {
        max_highlights: settings.max_highlights,
        ..DraftOptions::default()
    };
    if !settings.severity_keywords.is_empty() {
        parsed.severity_keywords = settings.severity_keywords.clone();
    }

    let Some(options) = options.filter(|v| !v.is_null()) else {
        return Ok(parsed);
    };
    let object = options
        .as_object()
        .ok_or_else(|| ReadinessError::invalid_payload("Draft options must be a JSON object"))?;

    let mut issues = Vec::new();

    match object.get("maxHighlights") {
        None | Some(Value::Null) => {}
        Some(value) => match value.as_u64() {
            Some(n) if (1..=u64::from(MAX_HIGHLIGHTS_LIMIT)).contains(&n) => parsed.max_highlights = n as u8,
            _ => issues.push(format!(
                "maxHighlights: expected an integer between 1 and {MAX_HIGHLIGHTS_LIMIT}, got {value}"
            )),
        },
    }

    match object.get("severityKeywords") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            let keywords: Option<Vec<String>> = items
                .iter()
                .map(|item| item.as_str().map(|s| s.trim().to_string()))
                .collect();
            match keywords {
                Some(keywords) => {
                    parsed.severity_keywords = keywords.into_iter().filter(|k| !k.is_empty()).collect();
                }
                None => issues.push("severityKeywords: every entry must be a string".to_string()),
            }
        }
        Some(_) => issues.push("severityKeywords: expected an array of strings".to_string()),
    }

    if !issues.is_empty() {
        return Err(ReadinessError::InvalidPayload {
            message: "Invalid draft options".to_string(),
            issues,
        });
    }

    Ok(parsed)
}

fn load_rows(settings: &EffectiveSettings, release_id: &str) -> Result<Vec<WorkItemRow>, ReadinessError> {
    let conn = get_db_connection(&settings.database_path)?;
    let rows = get_release_rows(&conn, release_id)?;
    if rows.is_empty() {
        return Err(ReadinessError::EmptyInput {
            release_id: release_id.to_string(),
        });
    }
    Ok(rows)
}

async fn generate(
    settings: &EffectiveSettings,
    generator: &dyn TextGenerator,
    limiter: &RateLimiter,
    release_id: &str,
    rows: &[WorkItemRow],
    options: &DraftOptions,
) -> Result<DraftOutput, ReadinessError> {
    let vocabulary = settings.theme_vocabulary();
    DraftGenerator::new(generator, limiter, &vocabulary)
        .with_sampling(settings.temperature, settings.max_tokens)
        .draft(release_id, rows, options)
        .await
}

/// Drafts with a caller-supplied generator and gate.
pub async fn draft_with_generator(
    settings: &EffectiveSettings,
    generator: &dyn TextGenerator,
    limiter: &RateLimiter,
    release_id: &str,
    options: &DraftOptions,
) -> Result<DraftOutput, ReadinessError> {
    let rows = load_rows(settings, release_id)?;
    generate(settings, generator, limiter, release_id, &rows, options).await
}

/// Gate backed by the data directory's database, shared by every process
/// using the same data directory.
pub fn shared_limiter(settings: &EffectiveSettings) -> RateLimiter {
    RateLimiter::with_store(
        RATE_LIMIT_WINDOW,
        Arc::new(SystemClock),
        Arc::new(SqliteWindowStore::new(&settings.database_path)),
    )
}

/// Generates the approval-request draft for a stored release through the
/// configured provider and the shared rate limiter.
pub async fn draft_approval(
    settings: &EffectiveSettings,
    release_id: &str,
    options: Option<Value>,
) -> Result<DraftOutput, ReadinessError> {
    let options = parse_draft_options(options.as_ref(), settings)?;

    // No rows is reported ahead of a missing credential.
    let rows = load_rows(settings, release_id)?;
    let client = OpenAiClient::new(settings.api_key.as_deref(), &settings.model, &settings.endpoint)?;

    let limiter = shared_limiter(settings);

    generate(settings, &client, &limiter, release_id, &rows, &options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::settings::load_effective_settings_with_key;
    use serde_json::json;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, key: Option<&str>) -> EffectiveSettings {
        load_effective_settings_with_key(dir.path(), key.map(str::to_string)).expect("settings")
    }

    #[test]
    fn options_default_to_configured_values() {
        let dir = TempDir::new().expect("temp dir");
        let settings = settings(&dir, None);

        let options = parse_draft_options(None, &settings).expect("defaults");
        assert_eq!(options.max_highlights, settings.max_highlights);
        assert_eq!(options.severity_keywords, settings.severity_keywords);
    }

    #[test]
    fn options_override_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let settings = settings(&dir, None);

        let options = parse_draft_options(
            Some(&json!({"maxHighlights": 3, "severityKeywords": [" Blocker ", ""]})),
            &settings,
        )
        .expect("options");

        assert_eq!(options.max_highlights, 3);
        assert_eq!(options.severity_keywords, vec!["Blocker".to_string()]);
    }

    #[test]
    fn out_of_range_options_are_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let settings = settings(&dir, None);

        for bad in [
            json!({"maxHighlights": 0}),
            json!({"maxHighlights": 11}),
            json!({"maxHighlights": "six"}),
            json!({"severityKeywords": "High"}),
            json!({"severityKeywords": ["High", 2]}),
            json!(["High"]),
        ] {
            let err = parse_draft_options(Some(&bad), &settings).expect_err("invalid options");
            assert!(matches!(err, ReadinessError::InvalidPayload { .. }), "{bad}");
        }
    }

    #[tokio::test]
    async fn empty_release_is_reported_before_missing_credential() {
        let dir = TempDir::new().expect("temp dir");
        let settings = settings(&dir, None);

        let err = draft_approval(&settings, "R404", None).await.expect_err("no rows");
        assert!(matches!(err, ReadinessError::EmptyInput { ref release_id } if release_id == "R404"));
    }
}
