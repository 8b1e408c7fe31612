use serde::{Deserialize, Serialize};

use super::filter::count_matching;
use crate::error::StatsResult;
use crate::reader::Table;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProportionResult {
    pub numerator: usize,
    pub denominator: usize,
    /// `None` when the denominator filter matches no rows
    pub proportion: Option<f64>,
}

/// Ratio of rows matching `numerator_filter` to rows matching `denominator_filter`
pub fn proportion(
    table: &Table,
    numerator_filter: &str,
    denominator_filter: &str,
) -> StatsResult<ProportionResult> {
    let numerator = count_matching(table, numerator_filter)?;
    let denominator = count_matching(table, denominator_filter)?;

    Ok(ProportionResult {
        numerator,
        denominator,
        proportion: (denominator > 0).then(|| numerator as f64 / denominator as f64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::table::tests::sample_table;

    #[test]
    fn test_proportion() {
        let result = proportion(&sample_table(), "sex == 'F' and smoker", "sex == 'F'").unwrap();
        assert_eq!(result.numerator, 2);
        assert_eq!(result.denominator, 2);
        assert_eq!(result.proportion, Some(1.0));
    }

    #[test]
    fn test_zero_denominator_gives_null() {
        let result = proportion(&sample_table(), "age > 30", "age > 1000").unwrap();
        assert_eq!(result.numerator, 2);
        assert_eq!(result.denominator, 0);
        assert_eq!(result.proportion, None);

        let json = serde_json::to_value(&result).unwrap();
        assert!(json["proportion"].is_null());
    }

    #[test]
    fn test_bad_filter_is_reported() {
        let err = proportion(&sample_table(), "age >", "True").unwrap_err();
        assert_eq!(err.kind(), "bad_input");
        assert!(err.to_string().contains("age >"));
    }
}
