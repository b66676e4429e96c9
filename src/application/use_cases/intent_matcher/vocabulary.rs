//! Synonym tables for comparators, aggregates, sort directions and counts.
//!
//! Each table is the single source for both the regex alternations used by templates and
//! the lookup that turns a matched phrase into its typed value.

use crate::domain::operation::{Aggregate, Comparator, SortDirection};
use once_cell::sync::Lazy;

/// Phrase → comparator
pub const COMPARATOR_SYNONYMS: [(&str, Comparator); 29] = [
    ("not equal to", Comparator::Ne),
    ("is not", Comparator::Ne),
    ("!=", Comparator::Ne),
    ("<>", Comparator::Ne),
    ("greater than or equal to", Comparator::Ge),
    ("at least", Comparator::Ge),
    (">=", Comparator::Ge),
    ("less than or equal to", Comparator::Le),
    ("at most", Comparator::Le),
    ("<=", Comparator::Le),
    ("greater than", Comparator::Gt),
    ("more than", Comparator::Gt),
    ("above", Comparator::Gt),
    ("over", Comparator::Gt),
    (">", Comparator::Gt),
    ("less than", Comparator::Lt),
    ("below", Comparator::Lt),
    ("under", Comparator::Lt),
    ("<", Comparator::Lt),
    ("equal to", Comparator::Eq),
    ("equals", Comparator::Eq),
    ("==", Comparator::Eq),
    ("=", Comparator::Eq),
    ("is", Comparator::Eq),
    ("contains", Comparator::Contains),
    ("containing", Comparator::Contains),
    ("includes", Comparator::Contains),
    ("including", Comparator::Contains),
    ("like", Comparator::Contains),
];

/// Phrase → aggregate function
pub const AGGREGATE_SYNONYMS: [(&str, Aggregate); 14] = [
    ("sum", Aggregate::Sum),
    ("total", Aggregate::Sum),
    ("mean", Aggregate::Mean),
    ("average", Aggregate::Mean),
    ("avg", Aggregate::Mean),
    ("count", Aggregate::Count),
    ("number of", Aggregate::Count),
    ("how many", Aggregate::Count),
    ("min", Aggregate::Min),
    ("minimum", Aggregate::Min),
    ("lowest", Aggregate::Min),
    ("max", Aggregate::Max),
    ("maximum", Aggregate::Max),
    ("highest", Aggregate::Max),
];

const DIRECTION_SYNONYMS: [(&str, SortDirection); 10] = [
    ("asc", SortDirection::Asc),
    ("ascending", SortDirection::Asc),
    ("low to high", SortDirection::Asc),
    ("lowest first", SortDirection::Asc),
    ("smallest first", SortDirection::Asc),
    ("desc", SortDirection::Desc),
    ("descending", SortDirection::Desc),
    ("high to low", SortDirection::Desc),
    ("highest first", SortDirection::Desc),
    ("largest first", SortDirection::Desc),
];

const NUMBER_WORDS: [(&str, usize); 12] = [
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("twenty", 20),
    ("fifty", 50),
];

/// Regex alternation of every comparator phrase, longest first
pub static COMPARATOR_PATTERN: Lazy<String> =
    Lazy::new(|| alternation(COMPARATOR_SYNONYMS.iter().map(|(p, _)| *p)));

/// Regex alternation of every aggregate phrase, longest first
pub static AGGREGATE_PATTERN: Lazy<String> =
    Lazy::new(|| alternation(AGGREGATE_SYNONYMS.iter().map(|(p, _)| *p)));

pub static DIRECTION_PATTERN: Lazy<String> =
    Lazy::new(|| alternation(DIRECTION_SYNONYMS.iter().map(|(p, _)| *p)));

/// Digits or a spelled-out count
pub static COUNT_PATTERN: Lazy<String> = Lazy::new(|| {
    format!(
        r"\d+|{}",
        alternation(NUMBER_WORDS.iter().map(|(p, _)| *p))
    )
});

fn alternation<'a>(phrases: impl Iterator<Item = &'a str>) -> String {
    let mut phrases: Vec<&str> = phrases.collect();
    phrases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    phrases
        .iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|")
}

pub fn parse_comparator(phrase: &str) -> Option<Comparator> {
    let phrase = phrase.trim();
    COMPARATOR_SYNONYMS
        .iter()
        .find(|(p, _)| *p == phrase)
        .map(|(_, c)| *c)
}

pub fn parse_aggregate(phrase: &str) -> Option<Aggregate> {
    let phrase = phrase.trim();
    AGGREGATE_SYNONYMS
        .iter()
        .find(|(p, _)| *p == phrase)
        .map(|(_, a)| *a)
}

pub fn parse_direction(phrase: &str) -> Option<SortDirection> {
    let phrase = phrase.trim();
    DIRECTION_SYNONYMS
        .iter()
        .find(|(p, _)| *p == phrase)
        .map(|(_, d)| *d)
}

/// Largest row count a query may ask for
pub const MAX_COUNT: usize = 1_000_000;

pub fn parse_count(phrase: &str) -> Option<usize> {
    let phrase = phrase.trim();
    phrase
        .parse::<usize>()
        .ok()
        .or_else(|| {
            NUMBER_WORDS
                .iter()
                .find(|(p, _)| *p == phrase)
                .map(|(_, n)| *n)
        })
        .filter(|n| *n <= MAX_COUNT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparator_synonyms() {
        assert_eq!(parse_comparator("greater than"), Some(Comparator::Gt));
        assert_eq!(parse_comparator("<>"), Some(Comparator::Ne));
        assert_eq!(parse_comparator("includes"), Some(Comparator::Contains));
        assert_eq!(parse_comparator("roughly"), None);
    }

    #[test]
    fn test_alternation_prefers_longer_phrases() {
        let pattern = COMPARATOR_PATTERN.as_str();
        let is_not = pattern.find("is not").unwrap();
        let is = pattern.find("|is|").unwrap();
        assert!(is_not < is);
        assert!(pattern.ends_with("|>"));
    }

    #[test]
    fn test_counts_and_aggregates() {
        assert_eq!(parse_count("5"), Some(5));
        assert_eq!(parse_count("ten"), Some(10));
        assert_eq!(parse_count("many"), None);
        assert_eq!(parse_count("18446744073709551615"), None);
        assert_eq!(parse_count("1000001"), None);
        assert_eq!(parse_aggregate("average"), Some(Aggregate::Mean));
        assert_eq!(parse_aggregate("number of"), Some(Aggregate::Count));
        assert_eq!(parse_direction("high to low"), Some(SortDirection::Desc));
    }
}
