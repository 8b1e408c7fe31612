use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::collections::{BTreeMap, HashMap};

use crate::error::{StatsError, StatsResult};
use crate::reader::Table;

/// Joint frequencies of two categorical columns
#[derive(Debug, Clone, PartialEq)]
pub struct ContingencyTable {
    pub row_labels: Vec<String>,
    pub column_labels: Vec<String>,
    /// `counts[row][column]`
    pub counts: Vec<Vec<u64>>,
}

impl ContingencyTable {
    /// Cross-tabulate `row_col` against `column_col`, dropping rows where
    /// either value is missing
    pub fn crosstab(table: &Table, row_col: &str, column_col: &str) -> StatsResult<Self> {
        let rows = table.labels(row_col)?;
        let columns = table.labels(column_col)?;

        let pairs: Vec<(String, String)> = rows
            .into_iter()
            .zip(columns)
            .filter_map(|(r, c)| Some((r?, c?)))
            .collect();

        if pairs.is_empty() {
            return Err(StatsError::bad_input(format!(
                "no rows with values in both '{}' and '{}'",
                row_col, column_col
            )));
        }

        let row_labels = sorted_labels(pairs.iter().map(|(r, _)| r.as_str()));
        let column_labels = sorted_labels(pairs.iter().map(|(_, c)| c.as_str()));

        let row_index: HashMap<&str, usize> =
            row_labels.iter().enumerate().map(|(i, l)| (l.as_str(), i)).collect();
        let column_index: HashMap<&str, usize> =
            column_labels.iter().enumerate().map(|(i, l)| (l.as_str(), i)).collect();

        let mut counts = vec![vec![0u64; column_labels.len()]; row_labels.len()];
        for (r, c) in &pairs {
            counts[row_index[r.as_str()]][column_index[c.as_str()]] += 1;
        }

        Ok(Self {
            row_labels,
            column_labels,
            counts,
        })
    }

    /// `{column label: {row label: count}}`
    pub fn to_nested_map(&self) -> BTreeMap<String, BTreeMap<String, u64>> {
        self.column_labels
            .iter()
            .enumerate()
            .map(|(j, column)| {
                let inner = self
                    .row_labels
                    .iter()
                    .enumerate()
                    .map(|(i, row)| (row.clone(), self.counts[i][j]))
                    .collect();
                (column.clone(), inner)
            })
            .collect()
    }
}

/// Distinct labels, numerically ordered when every label is a number
fn sorted_labels<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut distinct: Vec<String> = labels.map(str::to_string).collect();
    distinct.sort();
    distinct.dedup();

    let numeric: Option<Vec<f64>> = distinct.iter().map(|l| l.parse::<f64>().ok()).collect();
    if let Some(values) = numeric {
        let mut paired: Vec<(f64, String)> = values.into_iter().zip(distinct).collect();
        paired.sort_by(|a, b| a.0.total_cmp(&b.0));
        return paired.into_iter().map(|(_, label)| label).collect();
    }
    distinct
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChiSquareResult {
    pub chi2: f64,
    pub pvalue: f64,
    pub dof: usize,
    /// Expected frequencies under independence, rows follow `row_labels`
    pub expected: Vec<Vec<f64>>,
    pub table: BTreeMap<String, BTreeMap<String, u64>>,
    pub row_labels: Vec<String>,
    pub column_labels: Vec<String>,
}

/// Chi-square test of independence on a contingency table.
///
/// With `correction`, Yates' continuity correction is applied when the test
/// has one degree of freedom: each observed count moves up to 0.5 towards
/// its expected value.
pub fn chi2_contingency(observed: &ContingencyTable, correction: bool) -> StatsResult<ChiSquareResult> {
    let counts = &observed.counts;
    let n_rows = counts.len();
    let n_cols = observed.column_labels.len();

    let row_sums: Vec<f64> = counts.iter().map(|row| row.iter().sum::<u64>() as f64).collect();
    let col_sums: Vec<f64> = (0..n_cols)
        .map(|j| counts.iter().map(|row| row[j]).sum::<u64>() as f64)
        .collect();
    let total: f64 = row_sums.iter().sum();

    if total <= 0.0 {
        return Err(StatsError::bad_input("contingency table is empty"));
    }

    let expected: Vec<Vec<f64>> = row_sums
        .iter()
        .map(|r| col_sums.iter().map(|c| r * c / total).collect())
        .collect();

    let dof = (n_rows.saturating_sub(1)) * (n_cols.saturating_sub(1));

    let (chi2, pvalue) = if dof == 0 {
        (0.0, 1.0)
    } else {
        let yates = correction && dof == 1;
        let mut stat = 0.0;
        for i in 0..n_rows {
            for j in 0..n_cols {
                let e = expected[i][j];
                if e <= 0.0 {
                    continue;
                }
                let mut o = counts[i][j] as f64;
                if yates {
                    let diff = e - o;
                    o += diff.signum() * diff.abs().min(0.5);
                }
                stat += (o - e).powi(2) / e;
            }
        }
        (stat, chi2_sf(stat, dof as f64)?)
    };

    Ok(ChiSquareResult {
        chi2,
        pvalue,
        dof,
        expected,
        table: observed.to_nested_map(),
        row_labels: observed.row_labels.clone(),
        column_labels: observed.column_labels.clone(),
    })
}

/// Upper tail probability of the chi-squared distribution
fn chi2_sf(stat: f64, dof: f64) -> StatsResult<f64> {
    let dist = ChiSquared::new(dof)
        .map_err(|e| StatsError::bad_input(format!("invalid degrees of freedom {}: {}", dof, e)))?;
    Ok(dist.sf(stat).clamp(0.0, 1.0))
}

/// Cross-tabulate two columns and test them for independence
pub fn chi_square(table: &Table, col1: &str, col2: &str, correction: bool) -> StatsResult<ChiSquareResult> {
    let observed = ContingencyTable::crosstab(table, col1, col2)?;
    chi2_contingency(&observed, correction)
}
