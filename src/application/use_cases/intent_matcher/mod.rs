//! Rule-Based Intent Matcher
//!
//! Maps a query onto the template registry:
//! - Normalize the query and peel off trailing clause modifiers (where / sorted by / limit)
//! - Try every template in priority order; each builder fills its slots through the column resolver
//! - Append the modifier steps, validate against the profile, and keep every full match
//!
//! Confidence starts at the template's base bucket and only goes down: a fuzzy slot or a
//! guessed default caps it at Medium.

pub mod clauses;
pub mod templates;
pub mod vocabulary;

use self::clauses::{split_modifiers, Condition, Modifier, NormalizedQuery, QueryText, SortPhrase};
use self::templates::{TemplateId, REGISTRY};
use super::column_resolver::{singularize, ColumnMatch, ColumnResolver, SlotType};
use crate::domain::error::{AppError, Result};
use crate::domain::operation::{
    Comparator, FilterStep, GroupKey, SortDirection, SortKey, SortStep, Step, StructuredOperation,
};
use crate::domain::parse_result::{Candidate, CandidateSource, ConfidenceBucket};
use crate::domain::pipeline_config::PipelineConfig;
use crate::domain::profile::{ColumnKind, SchemaProfile};
use crate::domain::value::{parse_number, TimeGrain, Value};
use tracing::debug;

/// A template whose pattern matched but whose slots could not be filled
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// None when a clause modifier failed
    pub template: Option<TemplateId>,
    pub error: AppError,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub candidates: Vec<Candidate>,
    pub rejections: Vec<Rejection>,
}

impl MatchOutcome {
    /// Exactly one distinct operation matched at High confidence
    pub fn is_confident(&self) -> bool {
        let mut high: Vec<&StructuredOperation> = Vec::new();
        for candidate in &self.candidates {
            if candidate.confidence == ConfidenceBucket::High
                && !high.contains(&&candidate.operation)
            {
                high.push(&candidate.operation);
            }
        }
        high.len() == 1
    }

    /// No full match, or only vague ones
    pub fn needs_fallback(&self) -> bool {
        self.candidates
            .iter()
            .all(|c| c.confidence == ConfidenceBucket::Low)
    }

    /// The most telling rejection; unresolvable columns first
    pub fn issue(&self) -> Option<&AppError> {
        self.rejections
            .iter()
            .map(|r| &r.error)
            .find(|e| matches!(e, AppError::UnresolvableColumn(_)))
            .or_else(|| self.rejections.first().map(|r| &r.error))
    }
}

pub struct IntentMatcher {
    default_top_n: usize,
    preview_rows: usize,
}

impl IntentMatcher {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            default_top_n: config.default_top_n.max(1),
            preview_rows: config.preview_rows.max(1),
        }
    }

    pub fn match_query(&self, query: &str, profile: &SchemaProfile) -> MatchOutcome {
        let normalized = NormalizedQuery::new(query);
        let mut outcome = MatchOutcome::default();
        if normalized.is_empty() {
            return outcome;
        }

        let (core, modifiers) = split_modifiers(normalized.text());

        // Modifier slots are shared by every template.
        let mut modifier_filler = self.filler(profile, ConfidenceBucket::High);
        let extra = match modifier_filler.modifier_steps(&modifiers) {
            Ok(extra) => extra,
            Err(error) => {
                debug!(query = %normalized.as_str(), error = %error, "Clause modifier rejected");
                outcome.rejections.push(Rejection {
                    template: None,
                    error,
                });
                return outcome;
            }
        };
        let modifier_confidence = modifier_filler.confidence;

        if core.is_empty() {
            if let Some(operation) = extra.clone().into_operation() {
                self.accept(
                    &mut outcome,
                    operation,
                    modifier_confidence,
                    REGISTRY.len() + 1,
                    None,
                    profile,
                );
            }
            return outcome;
        }

        for template in REGISTRY.iter() {
            let Some(captures) = template.captures(core) else {
                continue;
            };

            let mut filler = self.filler(profile, template.base);
            let built = (template.build)(&captures, core, &mut filler)
                .map(|operation| self.compose(operation, &extra));

            match built {
                Ok(operation) => {
                    let confidence = filler.confidence.min(modifier_confidence);
                    self.accept(
                        &mut outcome,
                        operation,
                        confidence,
                        template.priority,
                        Some(template.id),
                        profile,
                    );
                }
                Err(error) => {
                    debug!(template = %template.id, error = %error, "Template rejected");
                    outcome.rejections.push(Rejection {
                        template: Some(template.id),
                        error,
                    });
                }
            }
        }

        debug!(
            query = %normalized.as_str(),
            candidates = outcome.candidates.len(),
            rejections = outcome.rejections.len(),
            "Intent matching finished"
        );
        outcome
    }

    fn filler<'a>(&self, profile: &'a SchemaProfile, base: ConfidenceBucket) -> SlotFiller<'a> {
        SlotFiller {
            resolver: ColumnResolver::new(profile),
            profile,
            confidence: base,
            default_top_n: self.default_top_n,
            preview_rows: self.preview_rows,
        }
    }

    fn accept(
        &self,
        outcome: &mut MatchOutcome,
        operation: StructuredOperation,
        confidence: ConfidenceBucket,
        priority: usize,
        template: Option<TemplateId>,
        profile: &SchemaProfile,
    ) {
        match operation.validate_against(profile) {
            Ok(()) => outcome.candidates.push(Candidate {
                operation,
                confidence,
                priority,
                source: CandidateSource::Rule,
                template: Some(
                    template
                        .map(|t| t.as_str().to_string())
                        .unwrap_or_else(|| "clauses".to_string()),
                ),
            }),
            Err(error) => outcome.rejections.push(Rejection { template, error }),
        }
    }

    /// Append modifier steps to a template's operation. A preview followed by clauses becomes
    /// the clauses alone.
    fn compose(&self, mut operation: StructuredOperation, extra: &ModifierSteps) -> StructuredOperation {
        if extra.is_empty() {
            return operation;
        }

        if let Some(rows) = operation.preview_rows() {
            if extra.filters.is_empty() && extra.sort.is_none() {
                let rows = extra.limit.unwrap_or(rows);
                return StructuredOperation::preview(rows);
            }
            let explicit = (rows != self.preview_rows).then_some(rows);
            let mut steps: Vec<Step> = extra.filters.iter().cloned().map(Step::Filter).collect();
            if let Some(sort) = &extra.sort {
                steps.push(Step::Sort(sort.clone()));
            }
            return StructuredOperation {
                steps,
                limit: extra.limit.or(explicit),
            };
        }

        operation
            .steps
            .extend(extra.filters.iter().cloned().map(Step::Filter));
        if let Some(sort) = &extra.sort {
            operation.steps.retain(|s| !matches!(s, Step::Sort(_)));
            operation.steps.push(Step::Sort(sort.clone()));
        }
        if extra.limit.is_some() {
            operation.limit = extra.limit;
        }
        operation
    }
}

/// Steps contributed by clause modifiers
#[derive(Debug, Clone, Default)]
pub struct ModifierSteps {
    pub filters: Vec<FilterStep>,
    pub sort: Option<SortStep>,
    pub limit: Option<usize>,
}

impl ModifierSteps {
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.sort.is_none() && self.limit.is_none()
    }

    /// An operation made only of modifiers; a bare limit reads as a preview
    fn into_operation(self) -> Option<StructuredOperation> {
        if self.is_empty() {
            return None;
        }
        if self.filters.is_empty() && self.sort.is_none() {
            return self.limit.map(StructuredOperation::preview);
        }
        let mut steps: Vec<Step> = self.filters.into_iter().map(Step::Filter).collect();
        if let Some(sort) = self.sort {
            steps.push(Step::Sort(sort));
        }
        Some(StructuredOperation {
            steps,
            limit: self.limit,
        })
    }
}

/// Resolves template slots against the profile and tracks the resulting confidence
pub struct SlotFiller<'a> {
    resolver: ColumnResolver<'a>,
    profile: &'a SchemaProfile,
    pub confidence: ConfidenceBucket,
    pub default_top_n: usize,
    pub preview_rows: usize,
}

impl<'a> SlotFiller<'a> {
    /// Lower the confidence to at most `bucket`
    pub fn cap(&mut self, bucket: ConfidenceBucket) {
        self.confidence = self.confidence.min(bucket);
    }

    fn note(&mut self, found: &ColumnMatch) {
        self.cap(found.match_type.confidence());
    }

    pub fn column(&mut self, phrase: &str, slot: SlotType) -> Result<ColumnMatch> {
        let found = self.resolver.resolve(phrase, slot)?;
        self.note(&found);
        Ok(found)
    }

    pub fn mentions_column(&self, phrase: &str) -> bool {
        self.resolver.mentions_column(phrase)
    }

    /// Named metric, or the default numeric column
    pub fn metric(&mut self, phrase: Option<&str>) -> Result<ColumnMatch> {
        match phrase {
            Some(phrase) => self.column(phrase, SlotType::Metric),
            None => {
                let found = self
                    .resolver
                    .default_metric()
                    .ok_or_else(|| AppError::UnresolvableColumn("metric".to_string()))?;
                self.note(&found);
                Ok(found)
            }
        }
    }

    pub fn dimension(&mut self, phrase: Option<&str>) -> Result<ColumnMatch> {
        match phrase {
            Some(phrase) => self.column(phrase, SlotType::Dimension),
            None => {
                let found = self
                    .resolver
                    .default_dimension()
                    .ok_or_else(|| AppError::UnresolvableColumn("dimension".to_string()))?;
                self.note(&found);
                Ok(found)
            }
        }
    }

    pub fn holds_dates(&self, column: &str) -> bool {
        self.profile
            .column(column)
            .map(|c| c.holds_dates)
            .unwrap_or(false)
    }

    /// Temporal column, preferring one named after the grain word
    pub fn time_column(&mut self, grain_word: Option<&str>) -> Result<ColumnMatch> {
        let time = self
            .resolver
            .default_time(grain_word)
            .ok_or_else(|| AppError::UnresolvableColumn(grain_word.unwrap_or("time").to_string()))?;
        self.note(&time);
        Ok(time)
    }

    /// The time axis as a group key; date columns are bucketed by month
    pub fn time_key(&mut self) -> Result<GroupKey> {
        let time = self.time_column(None)?;
        let grain = self.holds_dates(&time.column).then_some(TimeGrain::Month);
        Ok(GroupKey {
            column: time.column,
            grain,
        })
    }

    /// Group key for a phrase; grain words ("month", "quarterly") bucket the time column
    pub fn group_key(&mut self, phrase: &str) -> Result<GroupKey> {
        let words = phrase.trim();
        if let Some(grain) = TimeGrain::parse(words) {
            if let Some(time) = self.resolver.default_time(Some(words)) {
                self.note(&time);
                let grain = self.holds_dates(&time.column).then_some(grain);
                return Ok(GroupKey {
                    column: time.column,
                    grain,
                });
            }
        }

        let found = self.column(words, SlotType::Dimension)?;
        Ok(GroupKey::plain(found.column))
    }

    /// Filter step for a parsed condition, with the value coerced to the column kind
    pub fn filter(&mut self, condition: &Condition<'_>) -> Result<FilterStep> {
        let found = self.column(condition.column, SlotType::Any)?;
        let raw = condition.value.trim();

        let value = match (found.kind, condition.comparator) {
            (_, Comparator::Contains) => Value::Text(raw.to_string()),
            (ColumnKind::Numeric, _) => match parse_number(raw) {
                Some(n) => Value::Number(n),
                None => {
                    return Err(AppError::TypeMismatch(format!(
                        "'{}' is not a number for column '{}'",
                        raw, found.column
                    )))
                }
            },
            (ColumnKind::Temporal, _) => Value::infer(raw),
            _ => Value::Text(raw.to_string()),
        };

        Ok(FilterStep {
            column: found.column,
            comparator: condition.comparator,
            value,
            grain: None,
        })
    }

    /// Filter for "this quarter" / "last month" against the latest period in the profile.
    /// Returns None, and caps confidence, when the window cannot be expressed.
    pub fn window(&mut self, qualifier: &str, grain_word: &str) -> Option<FilterStep> {
        let Some(grain) = TimeGrain::parse(grain_word) else {
            self.cap(ConfidenceBucket::Medium);
            return None;
        };
        let Some(time) = self.resolver.default_time(Some(grain_word)) else {
            self.cap(ConfidenceBucket::Medium);
            return None;
        };
        self.note(&time);

        let latest = self
            .profile
            .column(&time.column)
            .and_then(|c| c.max_value.clone());
        let previous = matches!(qualifier, "last" | "previous");

        let step = match latest {
            Some(Value::Date(date)) => {
                let target = if previous { grain.previous(date) } else { Some(date) };
                target.map(|d| FilterStep {
                    column: time.column.clone(),
                    comparator: Comparator::Eq,
                    value: Value::Text(grain.label(d)),
                    grain: Some(grain),
                })
            }
            Some(label) if !previous => {
                let named = time
                    .column
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .any(|t| singularize(t) == grain.as_str());
                if named {
                    Some(FilterStep {
                        column: time.column.clone(),
                        comparator: Comparator::Eq,
                        value: label,
                        grain: None,
                    })
                } else {
                    self.cap(ConfidenceBucket::Medium);
                    Some(FilterStep {
                        column: time.column.clone(),
                        comparator: Comparator::Eq,
                        value: grain.bucket(&label),
                        grain: Some(grain),
                    })
                }
            }
            _ => None,
        };

        if step.is_none() {
            self.cap(ConfidenceBucket::Medium);
        }
        step
    }

    pub fn sort_key(&mut self, phrase: &SortPhrase<'_>, default: SortDirection) -> Result<SortKey> {
        let found = self.column(phrase.column, SlotType::Any)?;
        Ok(SortKey {
            column: found.column,
            direction: phrase.direction.unwrap_or(default),
        })
    }

    fn modifier_steps(&mut self, modifiers: &[Modifier<'_>]) -> Result<ModifierSteps> {
        let mut steps = ModifierSteps::default();
        for modifier in modifiers {
            match modifier {
                Modifier::Where(conditions) => {
                    for condition in conditions {
                        steps.filters.push(self.filter(condition)?);
                    }
                }
                Modifier::OrderBy(phrases) => {
                    let keys = phrases
                        .iter()
                        .map(|p| self.sort_key(p, SortDirection::Asc))
                        .collect::<Result<Vec<_>>>()?;
                    steps.sort = Some(SortStep { keys });
                }
                Modifier::Limit(n) => steps.limit = Some(*n),
            }
        }
        Ok(steps)
    }
}

/// Convenience for builders: the lowercased text of a capture group
pub(crate) fn group<'q>(captures: &regex::Captures<'q>, name: &str) -> Option<&'q str> {
    captures
        .name(name)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
}

/// Same as `group`, as an aligned query slice
pub(crate) fn group_text<'q>(
    captures: &regex::Captures<'q>,
    core: QueryText<'q>,
    name: &str,
) -> Option<QueryText<'q>> {
    captures
        .name(name)
        .map(|m| core.capture(m).trim())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::Aggregate;
    use crate::domain::profile::ColumnProfile;

    fn column(name: &str, kind: ColumnKind, max: Option<Value>, holds_dates: bool) -> ColumnProfile {
        ColumnProfile {
            name: name.to_string(),
            kind,
            distinct_count: 4,
            null_count: 0,
            sample_values: vec![],
            min_value: None,
            max_value: max,
            holds_dates,
        }
    }

    fn sales_profile() -> SchemaProfile {
        SchemaProfile {
            fingerprint: "fp".to_string(),
            row_count: 40,
            columns: vec![
                column("product_name", ColumnKind::Categorical, None, false),
                column(
                    "quarter",
                    ColumnKind::Temporal,
                    Some(Value::Text("2024-Q4".to_string())),
                    false,
                ),
                column("net_revenue", ColumnKind::Numeric, None, false),
            ],
        }
    }

    fn matcher() -> IntentMatcher {
        IntentMatcher::new(&PipelineConfig::default())
    }

    fn only_candidate(outcome: &MatchOutcome) -> &Candidate {
        assert_eq!(outcome.candidates.len(), 1, "{:?}", outcome.candidates);
        &outcome.candidates[0]
    }

    #[test]
    fn test_top_n_this_quarter_is_confident() {
        let profile = sales_profile();
        let outcome = matcher().match_query("Top 5 products this quarter", &profile);
        assert!(outcome.is_confident());

        let candidate = only_candidate(&outcome);
        assert_eq!(candidate.confidence, ConfidenceBucket::High);
        assert_eq!(candidate.template.as_deref(), Some("top_n"));

        let op = &candidate.operation;
        let filter = op.filters().next().unwrap();
        assert_eq!(filter.column, "quarter");
        assert_eq!(filter.value, Value::Text("2024-Q4".to_string()));

        let group = op.group_aggregate().unwrap();
        assert_eq!(group.group_by, vec![GroupKey::plain("product_name")]);
        assert_eq!(group.metric, "net_revenue");
        assert_eq!(group.aggregate, Aggregate::Sum);

        let sort = op.sort().unwrap();
        assert_eq!(sort.keys[0].column, "sum_net_revenue");
        assert_eq!(sort.keys[0].direction, SortDirection::Desc);
        assert_eq!(op.limit, Some(5));
    }

    #[test]
    fn test_gibberish_matches_nothing() {
        let profile = sales_profile();
        let outcome = matcher().match_query("asdkjasd", &profile);
        assert!(outcome.candidates.is_empty());
        assert!(outcome.needs_fallback());
    }

    #[test]
    fn test_unknown_filter_column_is_rejected() {
        let profile = sales_profile();
        let outcome = matcher().match_query("region = North", &profile);
        assert!(outcome.candidates.is_empty());
        assert_eq!(
            outcome.issue(),
            Some(&AppError::UnresolvableColumn("region".to_string()))
        );
    }

    #[test]
    fn test_filter_keeps_value_casing() {
        let profile = sales_profile();
        let outcome = matcher().match_query("product name is Widget", &profile);
        let candidate = only_candidate(&outcome);
        let filter = candidate.operation.filters().next().unwrap();
        assert_eq!(filter.column, "product_name");
        assert_eq!(filter.value, Value::Text("Widget".to_string()));
    }

    #[test]
    fn test_numeric_filter_needs_number() {
        let profile = sales_profile();
        let outcome = matcher().match_query("revenue over time", &profile);
        assert!(outcome
            .rejections
            .iter()
            .any(|r| matches!(r.error, AppError::TypeMismatch(_))));
    }

    #[test]
    fn test_modifiers_compose_with_template() {
        let profile = sales_profile();
        let outcome = matcher().match_query(
            "revenue by product sorted by revenue desc where quarter = 2024-Q3 limit 2",
            &profile,
        );
        let candidate = only_candidate(&outcome);
        let op = &candidate.operation;
        assert!(op.group_aggregate().is_some());
        assert_eq!(op.filters().count(), 1);
        assert_eq!(op.sort().unwrap().keys[0].column, "net_revenue");
        assert_eq!(op.limit, Some(2));
    }

    #[test]
    fn test_clause_only_query() {
        let profile = sales_profile();
        let outcome = matcher().match_query("order by revenue desc limit 3", &profile);
        let candidate = only_candidate(&outcome);
        assert_eq!(candidate.operation.sort().unwrap().keys[0].direction, SortDirection::Desc);
        assert_eq!(candidate.operation.limit, Some(3));
    }

    #[test]
    fn test_preview_with_clauses_drops_preview() {
        let profile = sales_profile();
        let outcome = matcher().match_query("show all data where revenue > 100", &profile);
        let candidate = only_candidate(&outcome);
        assert!(candidate.operation.preview_rows().is_none());
        assert_eq!(candidate.operation.filters().count(), 1);
    }

    #[test]
    fn test_vague_query_is_low() {
        let profile = sales_profile();
        let outcome = matcher().match_query("performance", &profile);
        assert!(!outcome.candidates.is_empty());
        assert!(outcome.needs_fallback());
    }
}
