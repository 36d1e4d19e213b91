//! moodscope-cli: command-line client for the Moodscope HTTP API
//!
//! # Subcommands
//! - `analyze --text <T>` / `analyze --image <PATH>`  submit one analysis
//! - `history [--json]`                                show recent analyses
//! - `clear`                                           delete all analyses
//! - `status`                                          show server health

use std::path::{Path, PathBuf};

use clap::{ArgGroup, Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "moodscope-cli",
    version,
    about = "Moodscope sentiment and emotion analysis client"
)]
struct Cli {
    /// Moodscope HTTP server URL (overrides MOODSCOPE_HTTP_URL env var)
    #[arg(long, env = "MOODSCOPE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Analyze a piece of text or a face image
    #[command(group(ArgGroup::new("input").required(true).multiple(true).args(["text", "image"])))]
    Analyze {
        /// Text to analyze
        #[arg(long)]
        text: Option<String>,

        /// Face image to analyze (png, jpg, jpeg, bmp, tiff); wins over --text
        #[arg(long)]
        image: Option<PathBuf>,

        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },

    /// Show the most recent analyses, newest first
    History {
        /// Output the history as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Delete every stored analysis
    Clear,

    /// Show Moodscope server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

/// One row of `GET /history`.
#[derive(Debug, Deserialize)]
pub struct HistoryEntry {
    pub text: String,
    pub date: String,
    #[serde(default)]
    pub sentiment: Value,
    #[serde(default)]
    pub emotion: Value,
}

// ============================================================================
// Formatting
// ============================================================================

/// Render a sentiment value the way people read it: the `label` of an
/// object, a bare string as-is, anything else as compact JSON.
pub fn sentiment_label(sentiment: &Value) -> String {
    match sentiment {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("label").and_then(Value::as_str) {
            Some(label) => label.to_string(),
            None if map.is_empty() => "-".to_string(),
            None => sentiment.to_string(),
        },
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// The top-scoring emotion of a `{label: score}` map, if any.
pub fn top_emotion(emotion: &Value) -> Option<(String, f64)> {
    emotion
        .as_object()?
        .iter()
        .filter_map(|(label, score)| score.as_f64().map(|s| (label.clone(), s)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// One human-readable history line.
pub fn format_history_entry(entry: &HistoryEntry) -> String {
    let text: String = entry.text.chars().take(60).collect();
    let emotion = match top_emotion(&entry.emotion) {
        Some((label, score)) => format!("{} ({:.2})", label, score),
        None => match &entry.emotion {
            Value::String(s) => s.clone(),
            _ => "-".to_string(),
        },
    };
    format!(
        "{}  {:<9} {:<20} {}",
        entry.date,
        sentiment_label(&entry.sentiment),
        emotion,
        text
    )
}

/// Summary of an `/analyze` result object.
pub fn format_result(result: &Value) -> String {
    let mut lines = vec![format!("Sentiment: {}", sentiment_label(&result["sentiment"]))];
    match top_emotion(&result["emotion"]) {
        Some((label, score)) => lines.push(format!("Emotion:   {} ({:.2})", label, score)),
        None => lines.push(format!("Emotion:   {}", result["emotion"])),
    }
    lines.join("\n")
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

/// Exit with the server's `error` message (or the raw body) on a non-2xx reply.
fn check_response(resp: reqwest::blocking::Response) -> reqwest::blocking::Response {
    if resp.status().is_success() {
        return resp;
    }
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or(body);
    eprintln!("moodscope-cli: server returned {}: {}", status, message);
    std::process::exit(1);
}

/// Submit text or an image to POST /analyze.
fn do_analyze(
    server: &str,
    text: Option<&str>,
    image: Option<&Path>,
    json_output: bool,
) -> anyhow::Result<()> {
    let client = client(300)?;
    let url = format!("{}/analyze", server);

    let mut form = reqwest::blocking::multipart::Form::new();
    if let Some(text) = text {
        form = form.text("text", text.to_string());
    }
    if let Some(path) = image {
        form = match form.file("image", path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("moodscope-cli: cannot read {}: {}", path.display(), e);
                std::process::exit(1);
            }
        };
    }

    let resp = match client.post(&url).multipart(form).send() {
        Ok(r) => check_response(r),
        Err(e) => {
            eprintln!("moodscope-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let body: Value = resp.json()?;
    let result = &body["result"];

    if json_output {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!("{}", format_result(result));
    }

    Ok(())
}

/// Print GET /history.
fn do_history(server: &str, json_output: bool) -> anyhow::Result<()> {
    let client = client(30)?;
    let url = format!("{}/history", server);

    let resp = match client.get(&url).send() {
        Ok(r) => check_response(r),
        Err(e) => {
            eprintln!("moodscope-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if json_output {
        let body: Value = resp.json()?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let entries: Vec<HistoryEntry> = resp.json()?;
    if entries.is_empty() {
        eprintln!("No analyses yet.");
        return Ok(());
    }
    for entry in &entries {
        println!("{}", format_history_entry(entry));
    }

    Ok(())
}

/// POST /clear_history.
fn do_clear(server: &str) -> anyhow::Result<()> {
    let client = client(30)?;
    let url = format!("{}/clear_history", server);

    match client.post(&url).send() {
        Ok(r) => {
            check_response(r);
            println!("History cleared.");
        }
        Err(e) => {
            eprintln!("moodscope-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = client(10)?;
    let url = format!("{}/health", server);

    match client.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: Value = r.json().unwrap_or_default();
            println!("Moodscope server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:          {}", body["version"].as_str().unwrap_or("?"));
            println!("SQLite:           {}", body["sqlite"].as_str().unwrap_or("?"));
            println!("Analyses:         {}", body["analyses"].as_i64().unwrap_or(0));
        }
        Ok(r) => {
            eprintln!("moodscope-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("moodscope-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Analyze { text, image, json } => {
            do_analyze(&server, text.as_deref(), image.as_deref(), json)
        }
        Commands::History { json } => do_history(&server, json),
        Commands::Clear => do_clear(&server),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("moodscope-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
