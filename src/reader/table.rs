use polars::prelude::*;
use serde_json::Value as JsonValue;

use crate::error::{StatsError, StatsResult};
use crate::search::did_you_mean;

/// In-memory table produced by the sheet reader.
///
/// Thin wrapper over a polars `DataFrame` that reports missing columns with
/// the list of available ones, which every statistics routine relies on.
#[derive(Debug, Clone)]
pub struct Table {
    frame: DataFrame,
    sheet: Option<String>,
}

impl Table {
    pub fn new(frame: DataFrame, sheet: Option<String>) -> Self {
        Self { frame, sheet }
    }

    pub fn empty(sheet: Option<String>) -> Self {
        Self::new(DataFrame::empty(), sheet)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Sheet the table was read from, `None` for delimited files
    pub fn sheet(&self) -> Option<&str> {
        self.sheet.as_deref()
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn width(&self) -> usize {
        self.frame.width()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.get_column_index(name).is_some()
    }

    /// Error for a column that is not in the table
    pub fn missing_column(&self, name: &str) -> StatsError {
        let available = self.column_names();
        let hint = did_you_mean(name, available.iter().map(String::as_str));
        StatsError::bad_input(format!(
            "column '{}' not found{}; available columns: [{}]",
            name,
            hint,
            available.join(", ")
        ))
    }

    pub fn column(&self, name: &str) -> StatsResult<&Series> {
        self.frame.column(name).map_err(|_| self.missing_column(name))
    }

    /// Column values as `f64`, `None` for missing cells.
    ///
    /// Fails for non-numeric columns rather than silently producing nulls.
    pub fn numeric_values(&self, name: &str) -> StatsResult<Vec<Option<f64>>> {
        let series = self.column(name)?;
        if !series.dtype().is_numeric() {
            return Err(StatsError::bad_input(format!(
                "column '{}' is not numeric (type {})",
                name,
                series.dtype()
            )));
        }
        let casted = series
            .cast(&DataType::Float64)
            .map_err(|e| StatsError::bad_input(format!("column '{}': {}", name, e)))?;
        let values = casted
            .f64()
            .map_err(|e| StatsError::bad_input(format!("column '{}': {}", name, e)))?;
        Ok(values.into_iter().collect())
    }

    /// Column values rendered as text labels, `None` for missing cells
    pub fn labels(&self, name: &str) -> StatsResult<Vec<Option<String>>> {
        let series = self.column(name)?;
        let casted = series
            .cast(&DataType::String)
            .map_err(|e| StatsError::bad_input(format!("column '{}': {}", name, e)))?;
        let values = casted
            .str()
            .map_err(|e| StatsError::bad_input(format!("column '{}': {}", name, e)))?;
        Ok(values
            .into_iter()
            .map(|value| value.map(str::to_string))
            .collect())
    }

    /// Row mask of `column == value`. Missing cells never match.
    ///
    /// Numbers compare numerically against numeric columns and booleans
    /// against boolean columns; everything else compares as text, so a
    /// label of `"1"` still selects the integer 1.
    pub fn equals_mask(&self, name: &str, value: &JsonValue) -> StatsResult<Vec<bool>> {
        let series = self.column(name)?;

        if series.dtype().is_numeric() {
            if let Some(target) = json_as_f64(value) {
                return Ok(self
                    .numeric_values(name)?
                    .into_iter()
                    .map(|cell| cell == Some(target))
                    .collect());
            }
        }

        if matches!(series.dtype(), DataType::Boolean) {
            if let Some(target) = json_as_bool(value) {
                let values = series
                    .bool()
                    .map_err(|e| StatsError::bad_input(format!("column '{}': {}", name, e)))?;
                return Ok(values.into_iter().map(|cell| cell == Some(target)).collect());
            }
        }

        let target = json_as_label(value);
        Ok(self
            .labels(name)?
            .into_iter()
            .map(|cell| cell.as_deref() == Some(target.as_str()))
            .collect())
    }
}

fn json_as_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn json_as_bool(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn json_as_label(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Small mixed-type table used across the statistics tests
    pub(crate) fn sample_table() -> Table {
        let frame = DataFrame::new(vec![
            Series::new("age", &[Some(34i64), Some(51), None, Some(28)]),
            Series::new("sex", &[Some("F"), Some("M"), Some("F"), None]),
            Series::new("smoker", &[Some(true), Some(false), Some(true), Some(false)]),
            Series::new("weight", &[Some(61.5f64), None, Some(70.25), Some(80.0)]),
        ])
        .unwrap();
        Table::new(frame, Some("Sheet1".to_string()))
    }

    #[test]
    fn test_missing_column_lists_available() {
        let table = sample_table();
        let err = table.column("agee").unwrap_err();
        let message = err.to_string();
        assert_eq!(err.kind(), "bad_input");
        assert!(message.contains("'agee'"));
        assert!(message.contains("age, sex, smoker, weight"));
        assert!(message.contains("did you mean 'age'"));
    }

    #[test]
    fn test_numeric_values() {
        let table = sample_table();
        assert_eq!(
            table.numeric_values("age").unwrap(),
            vec![Some(34.0), Some(51.0), None, Some(28.0)]
        );
        assert_eq!(table.numeric_values("sex").unwrap_err().kind(), "bad_input");
    }

    #[test]
    fn test_equals_mask_by_type() {
        let table = sample_table();
        assert_eq!(
            table.equals_mask("age", &json!(51)).unwrap(),
            vec![false, true, false, false]
        );
        assert_eq!(
            table.equals_mask("age", &json!("34")).unwrap(),
            vec![true, false, false, false]
        );
        assert_eq!(
            table.equals_mask("sex", &json!("F")).unwrap(),
            vec![true, false, true, false]
        );
        assert_eq!(
            table.equals_mask("smoker", &json!(1)).unwrap(),
            vec![true, false, true, false]
        );
    }

    #[test]
    fn test_labels_keep_missing() {
        let table = sample_table();
        assert_eq!(
            table.labels("sex").unwrap(),
            vec![Some("F".to_string()), Some("M".to_string()), Some("F".to_string()), None]
        );
    }
}
