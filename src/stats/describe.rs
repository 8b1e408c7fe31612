use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::StatsResult;
use crate::reader::Table;

/// Summary of one column.
///
/// Numeric columns fill the moment/quantile fields, everything else fills
/// `unique`/`top`/`freq`; fields that do not apply serialize as `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ColumnSummary {
    pub count: usize,
    pub unique: Option<usize>,
    pub top: Option<String>,
    pub freq: Option<usize>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    #[serde(rename = "25%")]
    pub p25: Option<f64>,
    #[serde(rename = "50%")]
    pub p50: Option<f64>,
    #[serde(rename = "75%")]
    pub p75: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeResult {
    pub basic: BTreeMap<String, ColumnSummary>,
    pub missing: BTreeMap<String, usize>,
    /// `[rows, columns]`
    pub shape: (usize, usize),
    pub dtypes: BTreeMap<String, String>,
    /// Column names in table order
    pub columns: Vec<String>,
}

/// Describe every column of the table
pub fn describe(table: &Table) -> StatsResult<DescribeResult> {
    let mut basic = BTreeMap::new();
    let mut missing = BTreeMap::new();
    let mut dtypes = BTreeMap::new();
    let columns = table.column_names();

    for name in &columns {
        let series = table.column(name)?;
        missing.insert(name.clone(), series.null_count());
        dtypes.insert(name.clone(), series.dtype().to_string());

        let summary = if series.dtype().is_numeric() {
            let values: Vec<f64> = table.numeric_values(name)?.into_iter().flatten().collect();
            numeric_summary(&values)
        } else {
            let labels: Vec<String> = table.labels(name)?.into_iter().flatten().collect();
            categorical_summary(&labels)
        };
        basic.insert(name.clone(), summary);
    }

    Ok(DescribeResult {
        basic,
        missing,
        shape: (table.height(), table.width()),
        dtypes,
        columns,
    })
}

/// Count, mean, sample std, min, quartiles and max of non-missing values
pub fn numeric_summary(values: &[f64]) -> ColumnSummary {
    let count = values.len();
    if count == 0 {
        return ColumnSummary::default();
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mean = values.iter().sum::<f64>() / count as f64;
    let std = (count > 1).then(|| sample_variance(values, mean).sqrt());

    ColumnSummary {
        count,
        mean: Some(mean),
        std,
        min: sorted.first().copied(),
        p25: Some(quantile(&sorted, 0.25)),
        p50: Some(quantile(&sorted, 0.50)),
        p75: Some(quantile(&sorted, 0.75)),
        max: sorted.last().copied(),
        ..ColumnSummary::default()
    }
}

/// Count, distinct values, most frequent value and its frequency
pub fn categorical_summary(labels: &[String]) -> ColumnSummary {
    if labels.is_empty() {
        return ColumnSummary {
            unique: Some(0),
            ..ColumnSummary::default()
        };
    }

    // label -> (count, first position) so ties go to the earliest label
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (pos, label) in labels.iter().enumerate() {
        counts.entry(label.as_str()).or_insert((0, pos)).0 += 1;
    }

    let (top, (freq, _)) = counts
        .iter()
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then_with(|| b.1 .1.cmp(&a.1 .1)))
        .map(|(label, stats)| (label.to_string(), *stats))
        .unwrap_or_default();

    ColumnSummary {
        count: labels.len(),
        unique: Some(counts.len()),
        top: Some(top),
        freq: Some(freq),
        ..ColumnSummary::default()
    }
}

/// Sample variance (ddof = 1); callers guarantee at least two values
pub fn sample_variance(values: &[f64], mean: f64) -> f64 {
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    sum_sq / (values.len() as f64 - 1.0)
}

/// Linear-interpolation quantile of sorted, non-empty data
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}
