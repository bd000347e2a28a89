use crate::ai::client::{CompletionRequest, TextGenerator, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::ai::rate_limit::RateLimiter;
use crate::analysis::enrichment::ThemeVocabulary;
use crate::analysis::prompt::{build_prompt, STRICT_JSON_DIRECTIVE};
use crate::error::ReadinessError;
use crate::models::draft::{DraftOptions, DraftOutput, MAX_HIGHLIGHTS_LIMIT};
use crate::models::work_item::WorkItemRow;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub const MAX_ATTEMPTS: u32 = 2;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:json)?\s*(\{[\s\S]*\})\s*```").expect("fence pattern is a valid regex")
});

/// Inner `{...}` of a ```json (or bare ```) fence, else the trimmed text.
pub fn extract_json_text(content: &str) -> &str {
    FENCED_JSON
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| content.trim())
}

fn required_text(object: &serde_json::Map<String, Value>, field: &str) -> Result<String, ReadinessError> {
    match object.get(field) {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.clone()),
        Some(Value::String(_)) => Err(ReadinessError::UpstreamParse(format!("`{field}` is empty"))),
        Some(_) => Err(ReadinessError::UpstreamParse(format!("`{field}` must be a string"))),
        None => Err(ReadinessError::UpstreamParse(format!("`{field}` is missing"))),
    }
}

/// Checks an untrusted value against the draft contract.
pub fn validate_draft(value: &Value) -> Result<DraftOutput, ReadinessError> {
    let object = value
        .as_object()
        .ok_or_else(|| ReadinessError::UpstreamParse("expected a JSON object".to_string()))?;

    let highlights = match object.get("highlights") {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(ReadinessError::UpstreamParse("`highlights` must be an array".to_string())),
        None => return Err(ReadinessError::UpstreamParse("`highlights` is missing".to_string())),
    };
    if highlights.is_empty() || highlights.len() > usize::from(MAX_HIGHLIGHTS_LIMIT) {
        return Err(ReadinessError::UpstreamParse(format!(
            "`highlights` must hold 1-{MAX_HIGHLIGHTS_LIMIT} entries, got {}",
            highlights.len()
        )));
    }
    let highlights = highlights
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::String(text) if !text.trim().is_empty() => Ok(text.clone()),
            _ => Err(ReadinessError::UpstreamParse(format!(
                "`highlights[{index}]` must be a non-empty string"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DraftOutput {
        purpose: required_text(object, "purpose")?,
        highlights,
        primary_risk: required_text(object, "primaryRisk")?,
        blast_radius: required_text(object, "blastRadius")?,
        build_readiness: required_text(object, "buildReadiness")?,
    })
}

pub fn parse_draft(content: &str) -> Result<DraftOutput, ReadinessError> {
    let json_text = extract_json_text(content);
    let value: Value = serde_json::from_str(json_text)
        .map_err(|e| ReadinessError::UpstreamParse(format!("invalid JSON: {e}")))?;
    validate_draft(&value)
}

/// Drives one draft: rate gate, request, parse, validate, and at most one
/// stricter retry.
pub struct DraftGenerator<'a> {
    generator: &'a dyn TextGenerator,
    limiter: &'a RateLimiter,
    vocabulary: &'a ThemeVocabulary,
    temperature: f64,
    max_tokens: u32,
}

impl<'a> DraftGenerator<'a> {
    pub fn new(generator: &'a dyn TextGenerator, limiter: &'a RateLimiter, vocabulary: &'a ThemeVocabulary) -> Self {
        Self {
            generator,
            limiter,
            vocabulary,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub async fn draft(
        &self,
        release_id: &str,
        rows: &[WorkItemRow],
        options: &DraftOptions,
    ) -> Result<DraftOutput, ReadinessError> {
        if rows.is_empty() {
            return Err(ReadinessError::EmptyInput {
                release_id: release_id.to_string(),
            });
        }

        self.limiter.try_acquire()?;

        let prompt = build_prompt(release_id, rows, options, self.vocabulary);
        let mut request = CompletionRequest {
            system: prompt.system,
            user: prompt.user,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            log::info!(
                "release {release_id}: draft attempt {attempt}/{MAX_ATTEMPTS} ({} rows)",
                rows.len()
            );

            let content = self.generator.complete(&request).await?;

            match parse_draft(&content) {
                Ok(draft) => return Ok(draft),
                Err(ReadinessError::UpstreamParse(cause)) if attempt >= MAX_ATTEMPTS => {
                    log::error!("release {release_id}: draft failed after {attempt} attempts: {cause}");
                    return Err(ReadinessError::DraftGenerationFailed { attempts: attempt, cause });
                }
                Err(ReadinessError::UpstreamParse(cause)) => {
                    log::warn!("release {release_id}: attempt {attempt} unusable ({cause}), retrying with stricter prompt");
                    request.user.push_str(STRICT_JSON_DIRECTIVE);
                }
                Err(other) => return Err(other),
            }
        }
    }
}
