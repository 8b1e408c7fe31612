use fuzzy_matcher::{skim::SkimMatcherV2, FuzzyMatcher};
use tracing::debug;

/// Fuzzy lookup used to turn "not found" errors into suggestions.
///
/// Candidates are dataset identifiers or column names; the best scoring
/// candidate is offered back to the caller as a hint.
pub struct Suggester {
    fuzzy_matcher: SkimMatcherV2,
}

impl Default for Suggester {
    fn default() -> Self {
        Self::new()
    }
}

impl Suggester {
    pub fn new() -> Self {
        Self {
            fuzzy_matcher: SkimMatcherV2::default().ignore_case(),
        }
    }

    /// Rank candidates by fuzzy score against `query`, best first
    pub fn ranked<'a, I>(&self, query: &str, candidates: I, limit: usize) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut scored: Vec<(i64, &str)> = candidates
            .into_iter()
            .filter_map(|candidate| {
                self.score(candidate, query).map(|score| (score, candidate))
            })
            .collect();

        // Highest score first, ties broken alphabetically for stable output
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.truncate(limit);

        debug!("Fuzzy ranking for '{}': {:?}", query, scored);
        scored.into_iter().map(|(_, c)| c.to_string()).collect()
    }

    /// Best single candidate, if any scores at all
    pub fn closest<'a, I>(&self, query: &str, candidates: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.ranked(query, candidates, 1).into_iter().next()
    }

    /// Score in both directions so a truncated query ("sex") and a
    /// misspelled longer one ("patient_sexx") can both find "sex".
    fn score(&self, candidate: &str, query: &str) -> Option<i64> {
        let forward = self.fuzzy_matcher.fuzzy_match(candidate, query);
        let backward = self.fuzzy_matcher.fuzzy_match(query, candidate);
        match (forward, backward) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// "did you mean" suffix for error messages, empty when nothing is close
pub fn did_you_mean<'a, I>(query: &str, candidates: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    match Suggester::new().closest(query, candidates) {
        Some(best) => format!(" (did you mean '{}'?)", best),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closest_column() {
        let suggester = Suggester::new();
        let columns = ["age", "sex", "exposure", "outcome"];
        assert_eq!(suggester.closest("expo", columns), Some("exposure".to_string()));
        assert_eq!(suggester.closest("Outcome", columns), Some("outcome".to_string()));
    }

    #[test]
    fn test_no_candidates() {
        let suggester = Suggester::new();
        assert_eq!(suggester.closest("age", std::iter::empty()), None);
        assert_eq!(did_you_mean("zzz", ["age"]), "");
    }

    #[test]
    fn test_ranked_limit() {
        let suggester = Suggester::new();
        let ids = ["a1b2", "a1b3", "ffff"];
        let ranked = suggester.ranked("a1b", ids, 2);
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|id| id.starts_with("a1b")));
    }
}
