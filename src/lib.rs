pub mod ai;
pub mod analysis;
pub mod commands;
pub mod error;
pub mod models;

use clap::{Parser, Subcommand};
use commands::{
    draft::draft_approval,
    ingest::ingest_release,
    release::get_release,
    settings::{load_effective_settings, resolve_data_dir, save_settings},
};
use error::ReadinessError;
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "build-readiness")]
#[command(about = "Per-release work-item snapshots and drafted approval requests")]
#[command(version)]
struct Cli {
    /// Directory holding settings.json and the database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace a release snapshot from a JSON array of work items
    Ingest {
        /// JSON file, or `-` for stdin
        file: String,
    },
    /// Show the stored rows and counts of a release
    Release { release_id: String },
    /// Draft the approval request for a release
    Draft {
        release_id: String,
        #[arg(long)]
        max_highlights: Option<u8>,
        /// Repeatable; replaces the configured severity keywords
        #[arg(long = "severity-keyword")]
        severity_keywords: Vec<String>,
    },
    /// Show effective settings, optionally merging a partial JSON object first
    Settings {
        #[arg(long)]
        set: Option<String>,
    },
}

fn read_payload(file: &str) -> Result<Value, ReadinessError> {
    let raw = if file == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| ReadinessError::invalid_payload(format!("Failed to read stdin: {e}")))?;
        buf
    } else {
        std::fs::read_to_string(file)
            .map_err(|e| ReadinessError::invalid_payload(format!("Failed to read {file}: {e}")))?
    };
    serde_json::from_str(&raw).map_err(|e| ReadinessError::invalid_payload(format!("Malformed JSON: {e}")))
}

fn draft_options_json(max_highlights: Option<u8>, severity_keywords: Vec<String>) -> Option<Value> {
    if max_highlights.is_none() && severity_keywords.is_empty() {
        return None;
    }
    let mut options = serde_json::Map::new();
    if let Some(n) = max_highlights {
        options.insert("maxHighlights".to_string(), json!(n));
    }
    if !severity_keywords.is_empty() {
        options.insert("severityKeywords".to_string(), json!(severity_keywords));
    }
    Some(Value::Object(options))
}

fn to_output<T: Serialize>(value: &T) -> Result<String, ReadinessError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ReadinessError::Configuration(format!("Failed to serialize output: {e}")))
}

async fn dispatch(cli: Cli) -> Result<String, ReadinessError> {
    let data_dir = resolve_data_dir(cli.data_dir.as_deref());

    match cli.command {
        Commands::Ingest { file } => {
            let payload = read_payload(&file)?;
            let settings = load_effective_settings(&data_dir)?;
            to_output(&ingest_release(&settings.database_path, payload).await?)
        }
        Commands::Release { release_id } => {
            let settings = load_effective_settings(&data_dir)?;
            to_output(&get_release(&settings.database_path, &release_id).await?)
        }
        Commands::Draft {
            release_id,
            max_highlights,
            severity_keywords,
        } => {
            let settings = load_effective_settings(&data_dir)?;
            let options = draft_options_json(max_highlights, severity_keywords);
            to_output(&draft_approval(&settings, &release_id, options).await?)
        }
        Commands::Settings { set } => {
            if let Some(raw) = set {
                let partial: Value = serde_json::from_str(&raw)
                    .map_err(|e| ReadinessError::invalid_payload(format!("Malformed settings JSON: {e}")))?;
                save_settings(&data_dir, partial).await?;
            }
            let settings = load_effective_settings(&data_dir)?;
            to_output(&json!({
                "settings": settings,
                "hasApiKey": settings.has_api_key(),
            }))
        }
    }
}

pub fn run() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(dispatch(cli)) {
        Ok(output) => println!("{output}"),
        Err(err) => {
            if err.is_client_error() {
                log::warn!("{err}");
            } else {
                log::error!("{err}");
            }
            let rendered = serde_json::to_string(&err).unwrap_or_else(|_| json!({ "message": err.to_string() }).to_string());
            eprintln!("{rendered}");
            std::process::exit(1);
        }
    }
}
