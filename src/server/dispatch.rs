use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use crate::config::{PlotDefaults, ServerConfig};
use crate::error::{StatsError, StatsResult};
use crate::monitoring::Timer;
use crate::plotting::{self, PlotKind, PlotOptions};
use crate::reader::{SheetReader, Table};
use crate::search::Suggester;
use crate::stats;
use crate::storage::DatasetStore;

/// JSON-RPC style envelope failure: the request itself could not be served
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeError {
    pub code: i64,
    pub message: String,
}

impl EnvelopeError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: Self::PARSE_ERROR,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        let hint = crate::search::did_you_mean(method, Dispatcher::METHODS.iter().copied());
        Self {
            code: Self::METHOD_NOT_FOUND,
            message: format!("unknown method '{}'{}", method, hint),
        }
    }

    pub fn invalid_params(method: &str, reason: impl std::fmt::Display) -> Self {
        Self {
            code: Self::INVALID_PARAMS,
            message: format!("invalid params for '{}': {}", method, reason),
        }
    }
}

/// Operation failure returned inside a successful envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub error: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_datasets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    file_bytes: String,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct DatasetParams {
    dataset_id: String,
    #[serde(default)]
    sheet_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProportionParams {
    #[serde(flatten)]
    dataset: DatasetParams,
    numerator_filter: String,
    denominator_filter: String,
}

#[derive(Debug, Deserialize)]
struct OddsRatioParams {
    #[serde(flatten)]
    dataset: DatasetParams,
    exposure_col: String,
    outcome_col: String,
    exposure_val: JsonValue,
    outcome_val: JsonValue,
}

#[derive(Debug, Deserialize)]
struct ChiSquareParams {
    #[serde(flatten)]
    dataset: DatasetParams,
    col1: String,
    col2: String,
    #[serde(default = "default_correction")]
    correction: bool,
}

fn default_correction() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct TTestParams {
    #[serde(flatten)]
    dataset: DatasetParams,
    group_col: String,
    value_col: String,
    group1: JsonValue,
    group2: JsonValue,
}

#[derive(Debug, Deserialize)]
struct PlotParams {
    #[serde(flatten)]
    dataset: DatasetParams,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
    #[serde(default)]
    options: Option<PlotOptions>,
}

impl DatasetParams {
    /// Empty or absent sheet names both mean "first sheet"
    fn sheet(&self) -> Option<&str> {
        self.sheet_name.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Routes named operations to the statistics routines.
///
/// Every routine failure becomes an [`ErrorPayload`]; only requests that
/// cannot be decoded at all produce an [`EnvelopeError`].
pub struct Dispatcher {
    reader: SheetReader,
    plot_defaults: PlotDefaults,
}

impl Dispatcher {
    pub const METHODS: [&'static str; 11] = [
        "upload",
        "list_datasets",
        "describe",
        "proportion",
        "odds_ratio_rr",
        "chi_square",
        "ttest",
        "plot",
        "debug_info",
        "list_sheets",
        "upload_excel",
    ];

    pub fn new(config: &ServerConfig) -> Self {
        Self {
            reader: SheetReader::new(DatasetStore::new(config)),
            plot_defaults: config.plot,
        }
    }

    pub fn store(&self) -> &DatasetStore {
        self.reader.store()
    }

    /// Execute `method` with JSON `params`
    pub fn call(&self, method: &str, params: JsonValue) -> Result<JsonValue, EnvelopeError> {
        let _timer = Timer::new(format!("request:{}", method));
        debug!("Dispatching {} with params {}", method, params);

        let params = if params.is_null() { json!({}) } else { params };

        match method {
            "upload" | "upload_excel" => {
                let p: UploadParams = decode(method, params)?;
                Ok(self.respond("Error uploading file", None, || {
                    let bytes = STANDARD
                        .decode(p.file_bytes.trim())
                        .map_err(|e| StatsError::bad_input(format!("file_bytes is not valid base64: {}", e)))?;
                    self.store().upload(&bytes, &p.filename)
                }))
            }
            "list_datasets" => Ok(to_json(&self.store().list_metadata())),
            "debug_info" => Ok(self.respond("Error collecting debug info", None, || self.store().debug_info())),
            "list_sheets" => {
                let p: DatasetParams = decode(method, params)?;
                Ok(self.respond("Error listing sheets", Some(&p.dataset_id), || {
                    Ok(json!({ "sheets": self.reader.sheet_names(&p.dataset_id)? }))
                }))
            }
            "describe" => {
                let p: DatasetParams = decode(method, params)?;
                Ok(self.respond("Error describing dataset", Some(&p.dataset_id), || {
                    stats::describe(&self.table(&p)?)
                }))
            }
            "proportion" => {
                let p: ProportionParams = decode(method, params)?;
                Ok(self.respond("Error computing proportion", Some(&p.dataset.dataset_id), || {
                    stats::proportion(&self.table(&p.dataset)?, &p.numerator_filter, &p.denominator_filter)
                }))
            }
            "odds_ratio_rr" => {
                let p: OddsRatioParams = decode(method, params)?;
                Ok(self.respond("Error computing OR/RR", Some(&p.dataset.dataset_id), || {
                    stats::odds_risk_ratio(
                        &self.table(&p.dataset)?,
                        &p.exposure_col,
                        &p.outcome_col,
                        &p.exposure_val,
                        &p.outcome_val,
                    )
                }))
            }
            "chi_square" => {
                let p: ChiSquareParams = decode(method, params)?;
                Ok(self.respond("Error in chi-square test", Some(&p.dataset.dataset_id), || {
                    stats::chi_square(&self.table(&p.dataset)?, &p.col1, &p.col2, p.correction)
                }))
            }
            "ttest" => {
                let p: TTestParams = decode(method, params)?;
                Ok(self.respond("Error in t-test", Some(&p.dataset.dataset_id), || {
                    stats::ttest(&self.table(&p.dataset)?, &p.group_col, &p.value_col, &p.group1, &p.group2)
                }))
            }
            "plot" => {
                let p: PlotParams = decode(method, params)?;
                Ok(self.respond("Error creating plot", Some(&p.dataset.dataset_id), || self.plot(&p)))
            }
            other => Err(EnvelopeError::method_not_found(other)),
        }
    }

    fn table(&self, params: &DatasetParams) -> StatsResult<Table> {
        self.reader.read(&params.dataset_id, params.sheet())
    }

    fn plot(&self, p: &PlotParams) -> StatsResult<plotting::PlotResult> {
        let kind = match p.kind.as_deref() {
            Some(kind) => kind.parse::<PlotKind>()?,
            None => PlotKind::default(),
        };
        let settings = p
            .options
            .clone()
            .unwrap_or_default()
            .resolve(&self.plot_defaults)?;
        let table = self.table(&p.dataset)?;
        plotting::plot_table(
            &table,
            self.store(),
            &p.dataset.dataset_id,
            kind,
            p.x.as_deref(),
            p.y.as_deref(),
            &settings,
        )
    }

    /// Serialize a routine's result, or turn its failure into an error payload
    fn respond<T, F>(&self, context: &str, dataset_id: Option<&str>, operation: F) -> JsonValue
    where
        T: Serialize,
        F: FnOnce() -> StatsResult<T>,
    {
        match operation() {
            Ok(value) => to_json(&value),
            Err(e) => to_json(&self.error_payload(context, dataset_id, &e)),
        }
    }

    fn error_payload(&self, context: &str, dataset_id: Option<&str>, error: &StatsError) -> ErrorPayload {
        warn!("{}: {}", context, error);

        if !error.is_not_found() {
            return ErrorPayload {
                error: format!("{}: {}", context, error),
                kind: error.kind().to_string(),
                available_datasets: None,
                hint: None,
            };
        }

        let available = self.store().dataset_ids();
        let closest = dataset_id
            .and_then(|id| Suggester::new().closest(id, available.iter().map(String::as_str)));
        let hint = match closest {
            Some(best) => format!("Did you mean '{}'? Known dataset IDs: {:?}", best, available),
            None => format!("Try using one of these dataset IDs: {:?}", available),
        };

        ErrorPayload {
            error: format!("{}: {}", context, error),
            kind: error.kind().to_string(),
            available_datasets: Some(available),
            hint: Some(hint),
        }
    }
}

fn decode<T: DeserializeOwned>(method: &str, params: JsonValue) -> Result<T, EnvelopeError> {
    serde_json::from_value(params).map_err(|e| EnvelopeError::invalid_params(method, e))
}

fn to_json<T: Serialize>(value: &T) -> JsonValue {
    serde_json::to_value(value)
        .unwrap_or_else(|e| json!({ "error": format!("failed to encode result: {}", e), "kind": "parse_failure" }))
}
