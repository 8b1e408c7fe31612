use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde_json::{json, Value as JsonValue};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::ServerConfig;
use crate::server::{self, Dispatcher};

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Options shared by every command that reads a dataset
#[derive(Args, Debug, Clone)]
pub struct DatasetArgs {
    /// Dataset identifier returned by `upload`
    pub dataset_id: String,

    /// Sheet to read (defaults to the first sheet)
    #[arg(short, long)]
    pub sheet: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl DatasetArgs {
    fn params(&self) -> JsonValue {
        json!({ "dataset_id": self.dataset_id, "sheet_name": self.sheet })
    }
}

#[derive(Args)]
pub struct ServeCommand {
    /// Address to listen on (overrides the configured one)
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Serve requests on stdin/stdout instead of TCP
    #[arg(long)]
    pub stdio: bool,
}

impl ServeCommand {
    pub async fn execute(self, config: ServerConfig) -> Result<()> {
        let dispatcher = Arc::new(Dispatcher::new(&config));

        if self.stdio {
            server::serve_stdio(dispatcher).await
        } else {
            server::serve_tcp(dispatcher, &config.listen).await
        }
    }
}

#[derive(Args)]
pub struct UploadCommand {
    /// Spreadsheet or CSV file to upload
    pub file: PathBuf,

    /// Name to record instead of the file's own name
    #[arg(long)]
    pub filename: Option<String>,
}

impl UploadCommand {
    pub async fn execute(self, config: ServerConfig) -> Result<()> {
        let bytes = std::fs::read(&self.file)
            .with_context(|| format!("Failed to read {}", self.file.display()))?;
        let filename = match self.filename {
            Some(name) => name,
            None => self
                .file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| anyhow!("{} has no file name", self.file.display()))?,
        };

        let dispatcher = Dispatcher::new(&config);
        let dataset_id = dispatcher.store().upload(&bytes, &filename)?;
        info!("📥 Uploaded {} as {}", filename, dataset_id);
        println!("{}", dataset_id);
        Ok(())
    }
}

#[derive(Args)]
pub struct ListCommand {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl ListCommand {
    pub async fn execute(self, config: ServerConfig) -> Result<()> {
        let records = Dispatcher::new(&config).store().list_metadata();

        match self.format {
            OutputFormat::Table => {
                if records.is_empty() {
                    println!("No datasets found in {}", config.data_dir.display());
                    return Ok(());
                }
                println!("📂 {} dataset(s):", records.len());
                for record in records {
                    let uploaded = record
                        .uploaded_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("  {}  {}  {}", record.id, uploaded, record.filename);
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct DescribeCommand {
    #[command(flatten)]
    pub dataset: DatasetArgs,
}

impl DescribeCommand {
    pub async fn execute(self, config: ServerConfig) -> Result<()> {
        run_method(&config, "describe", self.dataset.params(), self.dataset.format).await
    }
}

#[derive(Args)]
pub struct ProportionCommand {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Filter selecting the numerator rows, e.g. "sex == 'F' and smoker"
    #[arg(long)]
    pub numerator: String,

    /// Filter selecting the denominator rows
    #[arg(long, default_value = "True")]
    pub denominator: String,
}

impl ProportionCommand {
    pub async fn execute(self, config: ServerConfig) -> Result<()> {
        let mut params = self.dataset.params();
        params["numerator_filter"] = json!(self.numerator);
        params["denominator_filter"] = json!(self.denominator);
        run_method(&config, "proportion", params, self.dataset.format).await
    }
}

#[derive(Args)]
pub struct OddsRatioCommand {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    #[arg(long)]
    pub exposure_col: String,

    #[arg(long)]
    pub outcome_col: String,

    /// Value marking exposed rows (numbers and true/false are parsed)
    #[arg(long)]
    pub exposure_val: String,

    /// Value marking rows with the outcome
    #[arg(long)]
    pub outcome_val: String,
}

impl OddsRatioCommand {
    pub async fn execute(self, config: ServerConfig) -> Result<()> {
        let mut params = self.dataset.params();
        params["exposure_col"] = json!(self.exposure_col);
        params["outcome_col"] = json!(self.outcome_col);
        params["exposure_val"] = parse_cli_value(&self.exposure_val);
        params["outcome_val"] = parse_cli_value(&self.outcome_val);
        run_method(&config, "odds_ratio_rr", params, self.dataset.format).await
    }
}

#[derive(Args)]
pub struct ChiSquareCommand {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Column whose labels form the table rows
    #[arg(long)]
    pub col1: String,

    /// Column whose labels form the table columns
    #[arg(long)]
    pub col2: String,

    /// Disable Yates' continuity correction
    #[arg(long)]
    pub no_correction: bool,
}

impl ChiSquareCommand {
    pub async fn execute(self, config: ServerConfig) -> Result<()> {
        let mut params = self.dataset.params();
        params["col1"] = json!(self.col1);
        params["col2"] = json!(self.col2);
        params["correction"] = json!(!self.no_correction);
        run_method(&config, "chi_square", params, self.dataset.format).await
    }
}

#[derive(Args)]
pub struct TTestCommand {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    #[arg(long)]
    pub group_col: String,

    #[arg(long)]
    pub value_col: String,

    #[arg(long)]
    pub group1: String,

    #[arg(long)]
    pub group2: String,
}

impl TTestCommand {
    pub async fn execute(self, config: ServerConfig) -> Result<()> {
        let mut params = self.dataset.params();
        params["group_col"] = json!(self.group_col);
        params["value_col"] = json!(self.value_col);
        params["group1"] = parse_cli_value(&self.group1);
        params["group2"] = parse_cli_value(&self.group2);
        run_method(&config, "ttest", params, self.dataset.format).await
    }
}

#[derive(Args)]
pub struct PlotCommand {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Chart kind: hist or scatter
    #[arg(short, long, default_value = "hist")]
    pub kind: String,

    #[arg(short, long)]
    pub x: Option<String>,

    #[arg(short, long)]
    pub y: Option<String>,

    #[arg(long)]
    pub bins: Option<usize>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,
}

impl PlotCommand {
    pub async fn execute(self, config: ServerConfig) -> Result<()> {
        let mut params = self.dataset.params();
        params["kind"] = json!(self.kind);
        params["x"] = json!(self.x);
        params["y"] = json!(self.y);
        params["options"] = json!({ "bins": self.bins, "width": self.width, "height": self.height });
        run_method(&config, "plot", params, self.dataset.format).await
    }
}

#[derive(Args)]
pub struct DebugInfoCommand {
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl DebugInfoCommand {
    pub async fn execute(self, config: ServerConfig) -> Result<()> {
        run_method(&config, "debug_info", JsonValue::Null, self.format).await
    }
}

#[derive(Args)]
pub struct SheetsCommand {
    #[command(flatten)]
    pub dataset: DatasetArgs,
}

impl SheetsCommand {
    pub async fn execute(self, config: ServerConfig) -> Result<()> {
        run_method(&config, "list_sheets", self.dataset.params(), self.dataset.format).await
    }
}

/// Run one dispatcher method locally and print its result.
///
/// Error payloads are printed like any result and then turned into a failing
/// exit status.
async fn run_method(config: &ServerConfig, method: &str, params: JsonValue, format: OutputFormat) -> Result<()> {
    let dispatcher = Dispatcher::new(config);
    let method_name = method.to_string();
    let result = tokio::task::spawn_blocking(move || dispatcher.call(&method_name, params))
        .await
        .context("Worker thread panicked")?
        .map_err(|e| anyhow!("{} (code {})", e.message, e.code))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Table => print!("{}", render_table(&result)),
    }

    match result.get("error").and_then(JsonValue::as_str) {
        Some(message) => Err(anyhow!("{} failed: {}", method, message)),
        None => Ok(()),
    }
}

/// Interpret a command-line value as JSON when it parses as a scalar,
/// otherwise as a plain string ("1" is a number, "yes" is text)
pub fn parse_cli_value(raw: &str) -> JsonValue {
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(value @ (JsonValue::Number(_) | JsonValue::Bool(_) | JsonValue::String(_))) => value,
        _ => match raw {
            "True" => JsonValue::Bool(true),
            "False" => JsonValue::Bool(false),
            _ => JsonValue::String(raw.to_string()),
        },
    }
}

/// Indented `key: value` rendering for terminal output
pub fn render_table(value: &JsonValue) -> String {
    let mut output = String::new();
    render_into(&mut output, value, 0);
    output
}

fn render_into(output: &mut String, value: &JsonValue, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        JsonValue::Object(map) => {
            for (key, inner) in map {
                if is_scalar(inner) {
                    output.push_str(&format!("{}{}: {}\n", indent, key, scalar(inner)));
                } else {
                    output.push_str(&format!("{}{}:\n", indent, key));
                    render_into(output, inner, depth + 1);
                }
            }
        }
        JsonValue::Array(items) if items.iter().all(is_scalar) => {
            let joined: Vec<String> = items.iter().map(scalar).collect();
            output.push_str(&format!("{}[{}]\n", indent, joined.join(", ")));
        }
        JsonValue::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                output.push_str(&format!("{}- [{}]\n", indent, i));
                render_into(output, item, depth + 1);
            }
        }
        other => output.push_str(&format!("{}{}\n", indent, scalar(other))),
    }
}

fn is_scalar(value: &JsonValue) -> bool {
    !matches!(value, JsonValue::Object(_) | JsonValue::Array(_))
}

fn scalar(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{:.6}", f),
            _ => n.to_string(),
        },
        JsonValue::Null => "null".to_string(),
        other => other.to_string(),
    }
}
