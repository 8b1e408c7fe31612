use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use statrs::distribution::{ContinuousCDF, StudentsT};

use super::describe::sample_variance;
use crate::error::{StatsError, StatsResult};
use crate::reader::Table;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TTestResult {
    /// `None` when both groups have zero variance
    pub t_stat: Option<f64>,
    pub pvalue: Option<f64>,
    pub mean1: f64,
    pub mean2: f64,
    pub n1: usize,
    pub n2: usize,
    /// Welch-Satterthwaite degrees of freedom
    pub df: Option<f64>,
}

/// Two-sample t-test without the equal-variance assumption
pub fn welch_ttest(group1: &[f64], group2: &[f64]) -> StatsResult<TTestResult> {
    let (n1, n2) = (group1.len(), group2.len());
    let mean1 = group1.iter().sum::<f64>() / n1 as f64;
    let mean2 = group2.iter().sum::<f64>() / n2 as f64;

    let se1 = sample_variance(group1, mean1) / n1 as f64;
    let se2 = sample_variance(group2, mean2) / n2 as f64;
    let se_sq = se1 + se2;

    if se_sq <= 0.0 || !se_sq.is_finite() {
        return Ok(TTestResult {
            t_stat: None,
            pvalue: None,
            mean1,
            mean2,
            n1,
            n2,
            df: None,
        });
    }

    let t = (mean1 - mean2) / se_sq.sqrt();
    let df = se_sq.powi(2) / (se1.powi(2) / (n1 as f64 - 1.0) + se2.powi(2) / (n2 as f64 - 1.0));

    let dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|e| StatsError::bad_input(format!("invalid degrees of freedom {}: {}", df, e)))?;
    let pvalue = (2.0 * dist.sf(t.abs())).clamp(0.0, 1.0);

    Ok(TTestResult {
        t_stat: Some(t),
        pvalue: Some(pvalue),
        mean1,
        mean2,
        n1,
        n2,
        df: Some(df),
    })
}

/// Compare `value_col` between the rows where `group_col` equals `group1`
/// and the rows where it equals `group2`. Missing values are dropped per
/// group.
pub fn ttest(
    table: &Table,
    group_col: &str,
    value_col: &str,
    group1: &JsonValue,
    group2: &JsonValue,
) -> StatsResult<TTestResult> {
    let values = table.numeric_values(value_col)?;
    let first = select(&values, &table.equals_mask(group_col, group1)?);
    let second = select(&values, &table.equals_mask(group_col, group2)?);

    for (label, group) in [(group1, &first), (group2, &second)] {
        if group.len() < 2 {
            return Err(StatsError::bad_input(format!(
                "group {}={} has {} non-missing value(s) in '{}', need at least 2",
                group_col,
                label,
                group.len(),
                value_col
            )));
        }
    }

    welch_ttest(&first, &second)
}

fn select(values: &[Option<f64>], mask: &[bool]) -> Vec<f64> {
    values
        .iter()
        .zip(mask)
        .filter_map(|(value, keep)| if *keep { *value } else { None })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use serde_json::json;

    fn arm_table(control: &[Option<f64>], treated: &[Option<f64>]) -> Table {
        let mut arm = Vec::new();
        let mut score = Vec::new();
        for value in control {
            arm.push("control");
            score.push(*value);
        }
        for value in treated {
            arm.push("treated");
            score.push(*value);
        }
        let frame = DataFrame::new(vec![Series::new("arm", arm), Series::new("score", score)]).unwrap();
        Table::new(frame, None)
    }

    #[test]
    fn test_identical_groups() {
        let values: Vec<Option<f64>> = (1..=10).map(|v| Some(v as f64)).collect();
        let table = arm_table(&values, &values);
        let result = ttest(&table, "arm", "score", &json!("control"), &json!("treated")).unwrap();
        assert!(result.pvalue.unwrap() > 0.05);
        assert!(result.t_stat.unwrap().abs() < 1e-12);
        assert_eq!(result.mean1, result.mean2);
        assert_eq!((result.n1, result.n2), (10, 10));
    }

    #[test]
    fn test_separated_groups() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [6.0, 7.0, 8.0, 9.0, 10.0];
        let result = welch_ttest(&a, &b).unwrap();
        assert!((result.t_stat.unwrap() + 5.0).abs() < 1e-12);
        assert!((result.df.unwrap() - 8.0).abs() < 1e-12);
        let p = result.pvalue.unwrap();
        assert!(p > 0.0005 && p < 0.002, "p = {}", p);
    }

    #[test]
    fn test_far_apart_groups_keep_positive_pvalue() {
        let a: Vec<f64> = (0..50).map(|i| (i % 5) as f64).collect();
        let b: Vec<f64> = a.iter().map(|v| v + 100.0).collect();
        let result = welch_ttest(&a, &b).unwrap();
        let p = result.pvalue.unwrap();
        assert!(p > 0.0 && p < 1e-30, "p = {:e}", p);
    }

    #[test]
    fn test_unequal_variances_use_welch_df() {
        let a = [10.0, 11.0, 9.0, 10.5, 9.5];
        let b = [2.0, 30.0, 14.0, 7.0, 22.0, 18.0, 1.0];
        let result = welch_ttest(&a, &b).unwrap();
        let df = result.df.unwrap();
        // pooled df would be 10; Welch shrinks it towards the noisier group
        assert!(df < 10.0 && df > 5.0, "df = {}", df);
    }

    #[test]
    fn test_missing_values_are_dropped() {
        let table = arm_table(
            &[Some(1.0), None, Some(3.0)],
            &[Some(2.0), Some(4.0), None, Some(6.0)],
        );
        let result = ttest(&table, "arm", "score", &json!("control"), &json!("treated")).unwrap();
        assert_eq!((result.n1, result.n2), (2, 3));
        assert_eq!(result.mean1, 2.0);
        assert_eq!(result.mean2, 4.0);
    }

    #[test]
    fn test_small_group_is_bad_input() {
        let table = arm_table(&[Some(1.0), None], &[Some(2.0), Some(4.0)]);
        let err = ttest(&table, "arm", "score", &json!("control"), &json!("treated")).unwrap_err();
        assert_eq!(err.kind(), "bad_input");
        assert!(err.to_string().contains("control"));

        let err = ttest(&table, "arm", "score", &json!("control"), &json!("placebo")).unwrap_err();
        assert_eq!(err.kind(), "bad_input");
    }

    #[test]
    fn test_constant_groups_give_null_statistic() {
        let result = welch_ttest(&[3.0, 3.0], &[3.0, 3.0, 3.0]).unwrap();
        assert_eq!(result.t_stat, None);
        assert_eq!(result.pvalue, None);
        assert_eq!(result.mean1, 3.0);
    }

    #[test]
    fn test_non_numeric_value_column() {
        let table = arm_table(&[Some(1.0), Some(2.0)], &[Some(2.0), Some(4.0)]);
        let err = ttest(&table, "score", "arm", &json!(1), &json!(2)).unwrap_err();
        assert_eq!(err.kind(), "bad_input");
        assert!(err.to_string().contains("not numeric"));
    }
}
