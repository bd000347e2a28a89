use crate::ai::client::{DEFAULT_ENDPOINT, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use crate::analysis::enrichment::{default_theme_keywords, ThemeVocabulary};
use crate::error::ReadinessError;
use crate::models::draft::{default_severity_keywords, DEFAULT_MAX_HIGHLIGHTS};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_SCHEMA_VERSION: i64 = 2;
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DATA_DIR_ENV: &str = "BUILD_READINESS_DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "data";

/// Typed settings consumed by the commands. The credential comes from the
/// environment only and is never written to disk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveSettings {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub max_highlights: u8,
    pub severity_keywords: Vec<String>,
    pub theme_keywords: Vec<String>,
}

impl EffectiveSettings {
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }

    pub fn theme_vocabulary(&self) -> ThemeVocabulary {
        ThemeVocabulary::new(self.theme_keywords.clone())
    }
}

pub async fn get_settings(data_dir: &Path) -> Result<Value, ReadinessError> {
    load_settings_from_disk(data_dir)
}

pub async fn save_settings(data_dir: &Path, settings: Value) -> Result<Value, ReadinessError> {
    save_settings_to_disk(data_dir, settings)
}

pub fn resolve_data_dir(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

pub fn load_effective_settings(data_dir: &Path) -> Result<EffectiveSettings, ReadinessError> {
    let api_key = std::env::var(API_KEY_ENV).ok();
    load_effective_settings_with_key(data_dir, api_key)
}

pub fn load_effective_settings_with_key(
    data_dir: &Path,
    api_key: Option<String>,
) -> Result<EffectiveSettings, ReadinessError> {
    let settings = load_settings_from_disk(data_dir)?;

    Ok(EffectiveSettings {
        data_dir: data_dir.to_path_buf(),
        database_path: crate::commands::db::db_path(data_dir),
        api_key: api_key.filter(|key| !key.trim().is_empty()),
        model: string_or(&settings, "model", DEFAULT_MODEL),
        endpoint: string_or(&settings, "endpoint", DEFAULT_ENDPOINT),
        temperature: settings
            .get("temperature")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_TEMPERATURE),
        max_tokens: settings
            .get("maxTokens")
            .and_then(Value::as_u64)
            .unwrap_or(u64::from(DEFAULT_MAX_TOKENS)) as u32,
        max_highlights: settings
            .get("maxHighlights")
            .and_then(Value::as_u64)
            .unwrap_or(u64::from(DEFAULT_MAX_HIGHLIGHTS)) as u8,
        severity_keywords: string_list(&settings, "severityKeywords"),
        theme_keywords: string_list(&settings, "themeKeywords"),
    })
}

fn string_or(settings: &Value, key: &str, default: &str) -> String {
    settings
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn string_list(settings: &Value, key: &str) -> Vec<String> {
    settings
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Reads `settings.json`, fills and upgrades it, and writes the result back
/// when anything changed. A missing or unreadable file yields the defaults.
pub fn load_settings_from_disk(data_dir: &Path) -> Result<Value, ReadinessError> {
    let path = settings_path(data_dir);
    let stored = read_settings_file(&path)?;

    let settings = migrate_settings(stored.clone().unwrap_or_default());
    if stored.as_ref() != Some(&settings) {
        write_settings_file(data_dir, &settings)?;
    }

    Ok(Value::Object(settings))
}

/// Overwrites the top-level keys present in `partial` and persists the result.
pub fn save_settings_to_disk(data_dir: &Path, partial: Value) -> Result<Value, ReadinessError> {
    let Value::Object(partial) = partial else {
        return Err(ReadinessError::invalid_payload("Settings must be a JSON object"));
    };

    let mut settings = read_settings_file(&settings_path(data_dir))?
        .map(migrate_settings)
        .unwrap_or_else(default_settings);
    settings.extend(partial);

    let settings = migrate_settings(settings);
    write_settings_file(data_dir, &settings)?;
    log::info!("settings saved to {}", settings_path(data_dir).display());
    Ok(Value::Object(settings))
}

fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

fn read_settings_file(path: &Path) -> Result<Option<Map<String, Value>>, ReadinessError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| ReadinessError::Configuration(format!("Failed to read {}: {e}", path.display())))?;

    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        _ => {
            log::warn!("{} is not a JSON object, using defaults", path.display());
            Ok(None)
        }
    }
}

fn write_settings_file(data_dir: &Path, settings: &Map<String, Value>) -> Result<(), ReadinessError> {
    fs::create_dir_all(data_dir)
        .map_err(|e| ReadinessError::Configuration(format!("Failed to create {}: {e}", data_dir.display())))?;
    let raw = serde_json::to_string_pretty(settings)
        .map_err(|e| ReadinessError::Configuration(format!("Failed to serialize settings: {e}")))?;
    fs::write(settings_path(data_dir), raw)
        .map_err(|e| ReadinessError::Configuration(format!("Failed to write settings.json: {e}")))
}

fn migrate_settings(mut settings: Map<String, Value>) -> Map<String, Value> {
    let version = settings
        .get("schema_version")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    if version < 2 {
        // V1 stored a single comma-separated "severityKeywords" string.
        split_comma_list(&mut settings, "severityKeywords");
    }

    for (key, default) in default_settings() {
        settings.entry(key).or_insert(default);
    }

    sanitize_settings(&mut settings);
    // Credentials belong in the environment.
    settings.remove("apiKey");
    settings.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    settings
}

fn default_settings() -> Map<String, Value> {
    let mut defaults = Map::new();
    defaults.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    defaults.insert("model".to_string(), json!(DEFAULT_MODEL));
    defaults.insert("endpoint".to_string(), json!(DEFAULT_ENDPOINT));
    defaults.insert("temperature".to_string(), json!(DEFAULT_TEMPERATURE));
    defaults.insert("maxTokens".to_string(), json!(DEFAULT_MAX_TOKENS));
    defaults.insert("maxHighlights".to_string(), json!(DEFAULT_MAX_HIGHLIGHTS));
    defaults.insert("severityKeywords".to_string(), json!(default_severity_keywords()));
    defaults.insert("themeKeywords".to_string(), json!(default_theme_keywords()));
    defaults
}

fn split_comma_list(obj: &mut Map<String, Value>, key: &str) {
    if let Some(Value::String(raw)) = obj.get(key).cloned() {
        let items: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        obj.insert(key.to_string(), json!(items));
    }
}

fn sanitize_settings(obj: &mut Map<String, Value>) {
    // Clamp numerics.
    clamp_u64(obj, "maxHighlights", 1, 10, u64::from(DEFAULT_MAX_HIGHLIGHTS));
    clamp_u64(obj, "maxTokens", 64, 8000, u64::from(DEFAULT_MAX_TOKENS));
    clamp_f64(obj, "temperature", 0.0, 2.0, DEFAULT_TEMPERATURE);

    // Strings with defaults.
    ensure_non_empty_str(obj, "model", DEFAULT_MODEL);
    ensure_non_empty_str(obj, "endpoint", DEFAULT_ENDPOINT);

    // Keyword lists: strings only, trimmed, deduplicated.
    normalize_string_list(obj, "severityKeywords", default_severity_keywords());
    normalize_string_list(obj, "themeKeywords", default_theme_keywords());
}

fn clamp_u64(map: &mut Map<String, Value>, key: &str, min: u64, max: u64, default: u64) {
    let raw = map.get(key).and_then(Value::as_u64).unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn clamp_f64(map: &mut Map<String, Value>, key: &str, min: f64, max: f64, default: f64) {
    let raw = map
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn ensure_non_empty_str(map: &mut Map<String, Value>, key: &str, default: &str) {
    let value = map
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string();
    map.insert(key.to_string(), json!(value));
}

fn normalize_string_list(map: &mut Map<String, Value>, key: &str, default: Vec<String>) {
    let Some(items) = map.get(key).and_then(Value::as_array) else {
        map.insert(key.to_string(), json!(default));
        return;
    };

    let mut cleaned: Vec<String> = Vec::with_capacity(items.len());
    for item in items.iter().filter_map(Value::as_str).map(str::trim) {
        if !item.is_empty() && !cleaned.iter().any(|existing| existing.eq_ignore_ascii_case(item)) {
            cleaned.push(item.to_string());
        }
    }
    map.insert(key.to_string(), json!(cleaned));
}
