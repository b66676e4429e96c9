//! Column Resolver for slot filling
//!
//! Maps a phrase taken from the user's query ("products", "net revenue", "region") onto a
//! column of the active dataset profile. Matching is case-insensitive and tried in order:
//! exact name → alias (token containment, plural/singular, business synonyms) → fuzzy
//! (substring ratio or small edit distance). A resolved column must also have a kind that the
//! slot accepts.

use crate::domain::error::{AppError, Result};
use crate::domain::parse_result::ConfidenceBucket;
use crate::domain::profile::{ColumnKind, ColumnProfile, SchemaProfile};

/// Common filler that never names a column
const FILLER_WORDS: [&str; 10] = [
    "the", "a", "an", "each", "every", "all", "column", "field", "value", "values",
];

/// Business vocabulary that users reach for instead of the column's own name
const TOKEN_SYNONYMS: [(&str, &[&str]); 9] = [
    ("sales", &["revenue", "amount", "sale"]),
    ("revenue", &["sales", "income", "amount"]),
    ("income", &["revenue"]),
    ("units", &["quantity", "qty", "unit"]),
    ("quantity", &["units", "qty", "unit"]),
    ("price", &["cost", "amount"]),
    ("customer", &["client", "buyer"]),
    ("area", &["region", "territory"]),
    ("category", &["segment", "type"]),
];

/// Name hints for picking a default metric among several numeric columns
const METRIC_HINTS: [&str; 8] = [
    "revenue", "sales", "amount", "total", "price", "units", "quantity", "value",
];

/// How a slot was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// Phrase equals the column name
    Exact,
    /// Phrase tokens identify exactly one column
    Alias,
    /// Partial, synonym-based or edit-distance match
    Fuzzy,
    /// Slot omitted; the only compatible column was used
    Default,
    /// Slot omitted; a column was picked among several
    Guessed,
}

impl MatchType {
    pub fn confidence(&self) -> ConfidenceBucket {
        match self {
            MatchType::Exact | MatchType::Alias | MatchType::Default => ConfidenceBucket::High,
            MatchType::Fuzzy | MatchType::Guessed => ConfidenceBucket::Medium,
        }
    }
}

/// Column types a slot accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    /// Grouping or pivot axis: categorical, temporal or identifier
    Dimension,
    /// Aggregated value: numeric
    Metric,
    /// Time axis: temporal
    Time,
    /// Filters and sorts: any column
    Any,
}

impl SlotType {
    pub fn accepts(&self, kind: ColumnKind) -> bool {
        match self {
            SlotType::Dimension => kind.is_dimension(),
            SlotType::Metric => kind == ColumnKind::Numeric,
            SlotType::Time => kind == ColumnKind::Temporal,
            SlotType::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMatch {
    pub column: String,
    pub kind: ColumnKind,
    pub match_type: MatchType,
}

impl ColumnMatch {
    fn new(profile: &ColumnProfile, match_type: MatchType) -> Self {
        Self {
            column: profile.name.clone(),
            kind: profile.kind,
            match_type,
        }
    }
}

/// Resolves slot phrases against one dataset profile
pub struct ColumnResolver<'a> {
    profile: &'a SchemaProfile,
}

impl<'a> ColumnResolver<'a> {
    pub fn new(profile: &'a SchemaProfile) -> Self {
        Self { profile }
    }

    /// Resolve a phrase to a column compatible with the slot
    pub fn resolve(&self, phrase: &str, slot: SlotType) -> Result<ColumnMatch> {
        let tokens = phrase_tokens(phrase);
        if tokens.is_empty() {
            return Err(AppError::UnresolvableColumn(phrase.trim().to_string()));
        }

        let candidates: Vec<&ColumnProfile> = self
            .profile
            .columns
            .iter()
            .filter(|c| slot.accepts(c.kind))
            .collect();

        self.try_exact(&tokens, &candidates)
            .or_else(|| self.try_alias(&tokens, &candidates))
            .or_else(|| self.try_synonyms(&tokens, &candidates))
            .or_else(|| self.try_fuzzy(&tokens, &candidates))
            .ok_or_else(|| AppError::UnresolvableColumn(phrase.trim().to_string()))
    }

    /// Whether the phrase names any column at all, regardless of slot type
    pub fn mentions_column(&self, phrase: &str) -> bool {
        self.resolve(phrase, SlotType::Any).is_ok()
    }

    fn try_exact(&self, tokens: &[String], candidates: &[&ColumnProfile]) -> Option<ColumnMatch> {
        let phrase = tokens.join("_");
        candidates
            .iter()
            .find(|c| {
                let name = normalize_name(&c.name);
                name == phrase || singular_tokens(&name) == singular_tokens(&phrase)
            })
            .map(|c| ColumnMatch::new(c, MatchType::Exact))
    }

    /// Every phrase token is a token of the column name (or the reverse); unique wins as Alias,
    /// several hits resolve to the shortest name as Fuzzy.
    fn try_alias(&self, tokens: &[String], candidates: &[&ColumnProfile]) -> Option<ColumnMatch> {
        let phrase = singular_set(tokens);
        let mut hits: Vec<&ColumnProfile> = candidates
            .iter()
            .copied()
            .filter(|c| {
                let column = singular_set(&name_tokens(&c.name));
                phrase.iter().all(|t| column.contains(t)) || column.iter().all(|t| phrase.contains(t))
            })
            .collect();

        match hits.len() {
            0 => None,
            1 => Some(ColumnMatch::new(hits[0], MatchType::Alias)),
            _ => {
                hits.sort_by_key(|c| name_tokens(&c.name).len());
                Some(ColumnMatch::new(hits[0], MatchType::Fuzzy))
            }
        }
    }

    fn try_synonyms(&self, tokens: &[String], candidates: &[&ColumnProfile]) -> Option<ColumnMatch> {
        for token in tokens {
            let singular = singularize(token);
            let Some((_, synonyms)) = TOKEN_SYNONYMS
                .iter()
                .find(|(word, _)| *word == token.as_str() || singularize(word) == singular)
            else {
                continue;
            };

            for candidate in candidates {
                let column = singular_set(&name_tokens(&candidate.name));
                if synonyms.iter().any(|s| column.contains(&singularize(s))) {
                    return Some(ColumnMatch::new(candidate, MatchType::Fuzzy));
                }
            }
        }
        None
    }

    fn try_fuzzy(&self, tokens: &[String], candidates: &[&ColumnProfile]) -> Option<ColumnMatch> {
        let phrase: String = tokens.concat();
        let mut best: Option<(&ColumnProfile, f32)> = None;

        for candidate in candidates.iter().copied() {
            let name: String = name_tokens(&candidate.name).concat();
            let mut score = 0.0f32;

            if name.contains(&phrase) {
                score = phrase.len() as f32 / name.len() as f32;
            } else if phrase.contains(&name) {
                score = name.len() as f32 / phrase.len() as f32;
            }

            if phrase.len() >= 4 {
                let closest = std::iter::once(name.clone())
                    .chain(name_tokens(&candidate.name))
                    .map(|target| edit_distance(&phrase, &target))
                    .min()
                    .unwrap_or(usize::MAX);
                if closest <= 2 {
                    score = score.max(1.0 - closest as f32 / phrase.len() as f32);
                }
            }

            if score >= 0.3 && best.as_ref().map_or(true, |(_, s)| *s < score) {
                best = Some((candidate, score));
            }
        }

        best.map(|(c, _)| ColumnMatch::new(c, MatchType::Fuzzy))
    }

    /// Metric used when the query does not name one
    pub fn default_metric(&self) -> Option<ColumnMatch> {
        let numeric: Vec<&ColumnProfile> = self.profile.columns_of_kind(ColumnKind::Numeric).collect();
        match numeric.len() {
            0 => None,
            1 => Some(ColumnMatch::new(numeric[0], MatchType::Default)),
            _ => {
                let hinted = METRIC_HINTS.iter().find_map(|hint| {
                    numeric
                        .iter()
                        .find(|c| name_tokens(&c.name).iter().any(|t| t == hint))
                });
                let chosen = hinted.copied().unwrap_or(numeric[0]);
                Some(ColumnMatch::new(chosen, MatchType::Guessed))
            }
        }
    }

    /// Time axis, preferring a column named after the requested grain
    pub fn default_time(&self, grain_word: Option<&str>) -> Option<ColumnMatch> {
        let temporal: Vec<&ColumnProfile> =
            self.profile.columns_of_kind(ColumnKind::Temporal).collect();
        if temporal.is_empty() {
            return None;
        }

        if let Some(word) = grain_word {
            if let Some(named) = temporal
                .iter()
                .find(|c| singular_set(&name_tokens(&c.name)).contains(&singularize(word)))
            {
                return Some(ColumnMatch::new(named, MatchType::Default));
            }
        }

        if temporal.len() == 1 {
            return Some(ColumnMatch::new(temporal[0], MatchType::Default));
        }

        let chosen = temporal
            .iter()
            .find(|c| c.holds_dates)
            .copied()
            .unwrap_or(temporal[0]);
        Some(ColumnMatch::new(chosen, MatchType::Guessed))
    }

    /// Grouping dimension when the query does not name one
    pub fn default_dimension(&self) -> Option<ColumnMatch> {
        let categorical: Vec<&ColumnProfile> =
            self.profile.columns_of_kind(ColumnKind::Categorical).collect();
        match categorical.len() {
            0 => None,
            1 => Some(ColumnMatch::new(categorical[0], MatchType::Default)),
            _ => Some(ColumnMatch::new(categorical[0], MatchType::Guessed)),
        }
    }
}

/// Lowercase, non-alphanumerics collapsed to single underscores
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Readable form of a column name: `net_revenue` → `Net Revenue`
pub fn display_name(name: &str) -> String {
    normalize_name(name)
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn name_tokens(name: &str) -> Vec<String> {
    normalize_name(name)
        .split('_')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn phrase_tokens(phrase: &str) -> Vec<String> {
    name_tokens(phrase)
        .into_iter()
        .filter(|t| !FILLER_WORDS.contains(&t.as_str()))
        .collect()
}

fn singular_set(tokens: &[String]) -> Vec<String> {
    tokens.iter().map(|t| singularize(t)).collect()
}

fn singular_tokens(name: &str) -> Vec<String> {
    singular_set(&name_tokens(name))
}

pub(crate) fn singularize(word: &str) -> String {
    if word.len() > 4 && word.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.iter().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            current[j + 1] = (previous[j] + cost)
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        previous = current;
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, kind: ColumnKind) -> ColumnProfile {
        ColumnProfile {
            name: name.to_string(),
            kind,
            distinct_count: 0,
            null_count: 0,
            sample_values: vec![],
            min_value: None,
            max_value: None,
            holds_dates: false,
        }
    }

    fn sales_profile() -> SchemaProfile {
        SchemaProfile {
            fingerprint: "f".to_string(),
            row_count: 0,
            columns: vec![
                column("quarter", ColumnKind::Temporal),
                column("Region", ColumnKind::Categorical),
                column("product_name", ColumnKind::Categorical),
                column("product_category", ColumnKind::Categorical),
                column("net_revenue", ColumnKind::Numeric),
                column("units_sold", ColumnKind::Numeric),
            ],
        }
    }

    #[test]
    fn test_exact_is_case_insensitive() {
        let profile = sales_profile();
        let resolver = ColumnResolver::new(&profile);
        let m = resolver.resolve("region", SlotType::Dimension).unwrap();
        assert_eq!(m.column, "Region");
        assert_eq!(m.match_type, MatchType::Exact);

        let m = resolver.resolve("Net Revenue", SlotType::Metric).unwrap();
        assert_eq!(m.column, "net_revenue");
        assert_eq!(m.match_type, MatchType::Exact);
    }

    #[test]
    fn test_non_ascii_names_fold_case() {
        let profile = SchemaProfile {
            fingerprint: "f".to_string(),
            row_count: 0,
            columns: vec![
                column("Région", ColumnKind::Categorical),
                column("units", ColumnKind::Numeric),
            ],
        };
        let m = ColumnResolver::new(&profile)
            .resolve("RÉGION", SlotType::Dimension)
            .unwrap();
        assert_eq!(m.column, "Région");
        assert_eq!(m.match_type, MatchType::Exact);
        assert_eq!(normalize_name("Ümsatz Gesamt"), "ümsatz_gesamt");
    }

    #[test]
    fn test_plural_alias() {
        let profile = sales_profile();
        let resolver = ColumnResolver::new(&profile);
        let m = resolver.resolve("regions", SlotType::Dimension).unwrap();
        assert_eq!(m.column, "Region");

        let m = resolver.resolve("revenue", SlotType::Metric).unwrap();
        assert_eq!(m.column, "net_revenue");
        assert_eq!(m.match_type, MatchType::Alias);
    }

    #[test]
    fn test_ambiguous_alias_is_fuzzy() {
        let profile = sales_profile();
        let resolver = ColumnResolver::new(&profile);
        let m = resolver.resolve("products", SlotType::Dimension).unwrap();
        assert!(m.column.starts_with("product_"));
        assert_eq!(m.match_type, MatchType::Fuzzy);
    }

    #[test]
    fn test_slot_type_filters_kinds() {
        let profile = sales_profile();
        let resolver = ColumnResolver::new(&profile);
        assert!(matches!(
            resolver.resolve("region", SlotType::Metric),
            Err(AppError::UnresolvableColumn(_))
        ));
    }

    #[test]
    fn test_synonyms_and_typos() {
        let profile = sales_profile();
        let resolver = ColumnResolver::new(&profile);
        assert_eq!(
            resolver.resolve("sales", SlotType::Metric).unwrap().column,
            "net_revenue"
        );
        assert_eq!(
            resolver.resolve("regoin", SlotType::Dimension).unwrap().column,
            "Region"
        );
    }

    #[test]
    fn test_unknown_phrase() {
        let profile = sales_profile();
        let resolver = ColumnResolver::new(&profile);
        assert_eq!(
            resolver.resolve("weather", SlotType::Any),
            Err(AppError::UnresolvableColumn("weather".to_string()))
        );
    }

    #[test]
    fn test_defaults() {
        let profile = sales_profile();
        let resolver = ColumnResolver::new(&profile);
        let metric = resolver.default_metric().unwrap();
        assert_eq!(metric.column, "net_revenue");
        assert_eq!(metric.match_type, MatchType::Guessed);

        let time = resolver.default_time(Some("quarter")).unwrap();
        assert_eq!(time.column, "quarter");
        assert_eq!(time.match_type, MatchType::Default);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("net_revenue"), "Net Revenue");
        assert_eq!(display_name("Product Name"), "Product Name");
    }
}
