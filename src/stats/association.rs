use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::StatsResult;
use crate::reader::Table;

/// 2x2 exposure/outcome table with its odds ratio and risk ratio.
///
/// ```text
///              outcome   no outcome
/// exposed         a          b
/// unexposed       c          d
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssociationResult {
    pub a: u64,
    pub b: u64,
    pub c: u64,
    pub d: u64,
    pub odds_ratio: Option<f64>,
    pub risk_ratio: Option<f64>,
    pub risk_exposed: Option<f64>,
    pub risk_unexposed: Option<f64>,
}

impl AssociationResult {
    pub fn from_counts(a: u64, b: u64, c: u64, d: u64) -> Self {
        let odds_ratio = (b * c > 0).then(|| (a * d) as f64 / (b * c) as f64);

        let risk_exposed = (a + b > 0).then(|| a as f64 / (a + b) as f64);
        let risk_unexposed = (c + d > 0).then(|| c as f64 / (c + d) as f64);
        let risk_ratio = match (risk_exposed, risk_unexposed) {
            (Some(exposed), Some(unexposed)) if unexposed > 0.0 => Some(exposed / unexposed),
            _ => None,
        };

        Self {
            a,
            b,
            c,
            d,
            odds_ratio,
            risk_ratio,
            risk_exposed,
            risk_unexposed,
        }
    }
}

/// Tabulate exposure against outcome.
///
/// A row is exposed when `exposure_col == exposure_val`; every other row,
/// including rows with a missing exposure, counts as unexposed. Outcome is
/// split the same way.
pub fn odds_risk_ratio(
    table: &Table,
    exposure_col: &str,
    outcome_col: &str,
    exposure_val: &JsonValue,
    outcome_val: &JsonValue,
) -> StatsResult<AssociationResult> {
    let exposed = table.equals_mask(exposure_col, exposure_val)?;
    let outcome = table.equals_mask(outcome_col, outcome_val)?;

    let (mut a, mut b, mut c, mut d) = (0u64, 0u64, 0u64, 0u64);
    for (is_exposed, has_outcome) in exposed.into_iter().zip(outcome) {
        match (is_exposed, has_outcome) {
            (true, true) => a += 1,
            (true, false) => b += 1,
            (false, true) => c += 1,
            (false, false) => d += 1,
        }
    }

    Ok(AssociationResult::from_counts(a, b, c, d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use serde_json::json;

    fn cohort_table() -> Table {
        let mut exposure = Vec::new();
        let mut outcome = Vec::new();
        for (e, o, n) in [(1i64, 1i64, 10), (1, 0, 5), (0, 1, 2), (0, 0, 20)] {
            for _ in 0..n {
                exposure.push(e);
                outcome.push(o);
            }
        }
        let frame = DataFrame::new(vec![
            Series::new("exposed", exposure),
            Series::new("outcome", outcome),
        ])
        .unwrap();
        Table::new(frame, None)
    }

    #[test]
    fn test_reference_cohort() {
        let result = odds_risk_ratio(&cohort_table(), "exposed", "outcome", &json!(1), &json!(1)).unwrap();
        assert_eq!((result.a, result.b, result.c, result.d), (10, 5, 2, 20));
        assert!((result.odds_ratio.unwrap() - 20.0).abs() < 1e-12);
        let expected_rr = (10.0 / 15.0) / (2.0 / 22.0);
        assert!((result.risk_ratio.unwrap() - expected_rr).abs() < 1e-12);
        assert!((result.risk_ratio.unwrap() - 7.333).abs() < 1e-3);
    }

    #[test]
    fn test_zero_cells_give_null_ratios() {
        let no_b = AssociationResult::from_counts(4, 0, 3, 5);
        assert_eq!(no_b.odds_ratio, None);
        assert!(no_b.risk_ratio.is_some());

        let no_c = AssociationResult::from_counts(4, 2, 0, 5);
        assert_eq!(no_c.odds_ratio, None);
        assert_eq!(no_c.risk_unexposed, Some(0.0));
        assert_eq!(no_c.risk_ratio, None);

        let nobody_exposed = AssociationResult::from_counts(0, 0, 3, 5);
        assert_eq!(nobody_exposed.risk_exposed, None);
        assert_eq!(nobody_exposed.risk_ratio, None);
    }

    #[test]
    fn test_missing_values_count_as_unexposed() {
        let frame = DataFrame::new(vec![
            Series::new("smoker", &[Some("yes"), None, Some("no"), Some("yes")]),
            Series::new("case", &[Some(true), Some(true), Some(false), None]),
        ])
        .unwrap();
        let table = Table::new(frame, None);

        let result = odds_risk_ratio(&table, "smoker", "case", &json!("yes"), &json!(true)).unwrap();
        assert_eq!((result.a, result.b, result.c, result.d), (1, 1, 1, 1));
    }

    #[test]
    fn test_unknown_column() {
        let err = odds_risk_ratio(&cohort_table(), "exposure", "outcome", &json!(1), &json!(1))
            .unwrap_err();
        assert_eq!(err.kind(), "bad_input");
        assert!(err.to_string().contains("'exposure'"));
    }
}
