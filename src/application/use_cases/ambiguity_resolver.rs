//! Ambiguity Resolver / Suggestion Generator
//!
//! Ranks candidate operations and turns them into a `ParseResult`:
//! - Order by confidence (desc), template priority (asc), then operation kind name
//! - Drop structural duplicates
//! - A sole High primary stands alone; otherwise fill the alternatives with ranked candidates
//!   and, when short, with harmless synthesized variants of the primary
//! - No candidates at all yields a preview primary

use super::column_resolver::ColumnResolver;
use super::explanation::operation_title;
use crate::domain::error::AppError;
use crate::domain::operation::{
    Aggregate, GroupAggregateStep, GroupKey, Step, StructuredOperation,
};
use crate::domain::parse_result::{
    Candidate, CandidateSource, ConfidenceBucket, ParseResult, Suggestion,
};
use crate::domain::pipeline_config::PipelineConfig;
use crate::domain::profile::SchemaProfile;
use std::cmp::Ordering;
use tracing::debug;

/// Preview sizes offered as alternatives to another preview
const PREVIEW_SIZES: [usize; 2] = [10, 500];

pub struct AmbiguityResolver {
    preview_rows: usize,
    max_alternatives: usize,
}

impl AmbiguityResolver {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            preview_rows: config.preview_rows.max(1),
            max_alternatives: config.max_alternatives(),
        }
    }

    pub fn resolve(
        &self,
        query: &str,
        profile: &SchemaProfile,
        candidates: Vec<Candidate>,
        issue: Option<AppError>,
    ) -> ParseResult {
        let mut ranked = rank(candidates);
        if ranked.is_empty() {
            ranked.push(Candidate {
                operation: StructuredOperation::preview(self.preview_rows),
                confidence: ConfidenceBucket::Low,
                priority: usize::MAX,
                source: CandidateSource::Fallback,
                template: None,
            });
        }

        let primary = ranked.remove(0);
        let high_count = ranked
            .iter()
            .filter(|c| c.confidence == ConfidenceBucket::High)
            .count();

        let mut alternatives: Vec<Candidate> = Vec::new();
        let sole_high = primary.confidence == ConfidenceBucket::High && high_count == 0;

        if !sole_high {
            alternatives.extend(ranked.into_iter().take(self.max_alternatives));

            if primary.confidence < ConfidenceBucket::High {
                for variant in self.variants(&primary.operation, profile) {
                    if alternatives.len() >= self.max_alternatives {
                        break;
                    }
                    let duplicate = variant == primary.operation
                        || alternatives.iter().any(|a| a.operation == variant);
                    if duplicate || variant.validate_against(profile).is_err() {
                        continue;
                    }
                    alternatives.push(Candidate {
                        operation: variant,
                        confidence: ConfidenceBucket::Low,
                        priority: usize::MAX,
                        source: CandidateSource::Synthesized,
                        template: None,
                    });
                }
            }
        }

        debug!(
            primary = %primary.operation.kind(),
            confidence = %primary.confidence,
            alternatives = alternatives.len(),
            "Resolved suggestions"
        );

        ParseResult {
            query: query.to_string(),
            dataset_fingerprint: profile.fingerprint.clone(),
            primary: suggestion(primary, 0),
            alternatives: alternatives
                .into_iter()
                .enumerate()
                .map(|(i, c)| suggestion(c, i + 1))
                .collect(),
            issue,
        }
    }

    /// Harmless variations of an operation, most relevant first
    fn variants(&self, operation: &StructuredOperation, profile: &SchemaProfile) -> Vec<StructuredOperation> {
        let mut variants = Vec::new();

        if let Some(rows) = operation.preview_rows() {
            variants.extend(
                PREVIEW_SIZES
                    .iter()
                    .filter(|size| **size != rows)
                    .map(|size| StructuredOperation::preview(*size)),
            );
            variants.extend(overview(profile));
            return variants;
        }

        if operation.sort().is_some() {
            let mut flipped = operation.clone();
            for step in &mut flipped.steps {
                if let Step::Sort(sort) = step {
                    for key in &mut sort.keys {
                        key.direction = key.direction.flipped();
                    }
                }
            }
            variants.push(flipped);
        }

        if let Some(doubled) = operation.limit.and_then(|limit| limit.checked_mul(2)) {
            variants.push(operation.clone().with_limit(Some(doubled)));
        }

        if operation.group_aggregate().is_some() || operation.pivot().is_some() {
            variants.push(with_aggregate(operation, alternate_aggregate(operation)));
        }

        if let Some(pivot) = operation.pivot() {
            let mut swapped = pivot.clone();
            std::mem::swap(&mut swapped.rows, &mut swapped.columns);
            let mut operation = operation.clone();
            for step in &mut operation.steps {
                if let Step::Pivot(p) = step {
                    *p = swapped.clone();
                }
            }
            variants.push(operation);
        }

        variants.push(StructuredOperation::preview(self.preview_rows));
        variants
    }
}

/// Stable ranking followed by structural deduplication
fn rank(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| a.priority.cmp(&b.priority))
            .then_with(|| compare_kind(&a.operation, &b.operation))
    });

    let mut unique: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.iter().any(|u| u.operation == candidate.operation) {
            unique.push(candidate);
        }
    }
    unique
}

fn compare_kind(a: &StructuredOperation, b: &StructuredOperation) -> Ordering {
    a.kind().as_str().cmp(b.kind().as_str())
}

fn suggestion(candidate: Candidate, rank: usize) -> Suggestion {
    Suggestion {
        label: operation_title(&candidate.operation),
        rank,
        confidence: candidate.confidence,
        score: candidate.confidence.score(),
        source: candidate.source,
        operation: candidate.operation,
    }
}

fn alternate_aggregate(operation: &StructuredOperation) -> Aggregate {
    let current = operation
        .group_aggregate()
        .map(|g| g.aggregate)
        .or_else(|| operation.pivot().map(|p| p.aggregate));
    match current {
        Some(Aggregate::Sum) => Aggregate::Mean,
        _ => Aggregate::Sum,
    }
}

fn with_aggregate(operation: &StructuredOperation, aggregate: Aggregate) -> StructuredOperation {
    let mut changed = operation.clone();
    let mut renamed: Option<(String, String)> = None;

    for step in &mut changed.steps {
        match step {
            Step::GroupAggregate(group) => {
                let before = group.output_column();
                group.aggregate = aggregate;
                renamed = Some((before, group.output_column()));
            }
            Step::Pivot(pivot) => pivot.aggregate = aggregate,
            _ => {}
        }
    }

    // Keep sort keys pointing at the renamed aggregate column
    if let Some((before, after)) = renamed {
        for step in &mut changed.steps {
            if let Step::Sort(sort) = step {
                for key in &mut sort.keys {
                    if key.column == before {
                        key.column = after.clone();
                    }
                }
            }
        }
    }
    changed
}

/// Schema-derived overview: the default metric totalled by the default dimension
fn overview(profile: &SchemaProfile) -> Option<StructuredOperation> {
    let resolver = ColumnResolver::new(profile);
    let dimension = resolver.default_dimension()?;
    let (metric, aggregate) = match resolver.default_metric() {
        Some(metric) => (metric.column, Aggregate::Sum),
        None => (dimension.column.clone(), Aggregate::Count),
    };
    Some(StructuredOperation::single(Step::GroupAggregate(
        GroupAggregateStep {
            group_by: vec![GroupKey::plain(dimension.column)],
            metric,
            aggregate,
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::{PivotStep, SortDirection, SortKey, SortStep};
    use crate::domain::profile::{ColumnKind, ColumnProfile};

    fn profile() -> SchemaProfile {
        let column = |name: &str, kind| ColumnProfile {
            name: name.to_string(),
            kind,
            distinct_count: 3,
            null_count: 0,
            sample_values: vec![],
            min_value: None,
            max_value: None,
            holds_dates: false,
        };
        SchemaProfile {
            fingerprint: "fp".to_string(),
            row_count: 12,
            columns: vec![
                column("month", ColumnKind::Temporal),
                column("region", ColumnKind::Categorical),
                column("revenue", ColumnKind::Numeric),
            ],
        }
    }

    fn resolver() -> AmbiguityResolver {
        AmbiguityResolver::new(&PipelineConfig::default())
    }

    fn candidate(operation: StructuredOperation, confidence: ConfidenceBucket, priority: usize) -> Candidate {
        Candidate {
            operation,
            confidence,
            priority,
            source: CandidateSource::Rule,
            template: None,
        }
    }

    fn by_region(aggregate: Aggregate) -> StructuredOperation {
        StructuredOperation::single(Step::GroupAggregate(GroupAggregateStep {
            group_by: vec![GroupKey::plain("region")],
            metric: "revenue".to_string(),
            aggregate,
        }))
    }

    fn seasonality() -> StructuredOperation {
        StructuredOperation::single(Step::Pivot(PivotStep {
            rows: GroupKey::plain("month"),
            columns: GroupKey::plain("region"),
            values: "revenue".to_string(),
            aggregate: Aggregate::Sum,
        }))
    }

    #[test]
    fn test_empty_input_yields_preview() {
        let result = resolver().resolve("asdkjasd", &profile(), vec![], None);
        assert_eq!(result.primary.operation, StructuredOperation::preview(100));
        assert_eq!(result.primary.source, CandidateSource::Fallback);
        assert_eq!(result.primary.label, "Data Overview");
        assert!(result.issue.is_none());
        assert_eq!(result.alternatives.len(), 2);
    }

    #[test]
    fn test_sole_high_primary_has_no_alternatives() {
        let result = resolver().resolve(
            "revenue by region",
            &profile(),
            vec![
                candidate(by_region(Aggregate::Sum), ConfidenceBucket::High, 5),
                candidate(by_region(Aggregate::Mean), ConfidenceBucket::Medium, 9),
            ],
            None,
        );
        assert!(result.is_confident());
        assert!(result.alternatives.is_empty());
    }

    #[test]
    fn test_ranking_and_dedup() {
        let result = resolver().resolve(
            "q",
            &profile(),
            vec![
                candidate(by_region(Aggregate::Sum), ConfidenceBucket::Low, 9),
                candidate(seasonality(), ConfidenceBucket::Medium, 3),
                candidate(by_region(Aggregate::Sum), ConfidenceBucket::Low, 5),
            ],
            None,
        );
        assert_eq!(result.primary.operation, seasonality());
        assert_eq!(result.primary.rank, 0);
        assert_eq!(result.alternatives[0].operation, by_region(Aggregate::Sum));
        assert_eq!(result.alternatives[0].rank, 1);

        let all: Vec<&StructuredOperation> = result.suggestions().map(|s| &s.operation).collect();
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_synthesizes_variants_for_medium_primary() {
        let result = resolver().resolve(
            "seasonality by region",
            &profile(),
            vec![candidate(seasonality(), ConfidenceBucket::Medium, 3)],
            None,
        );
        assert_eq!(result.alternatives.len(), 2);
        assert!(result
            .alternatives
            .iter()
            .all(|a| a.source == CandidateSource::Synthesized && a.confidence == ConfidenceBucket::Low));
        assert!(result.alternatives.iter().any(|a| a.operation.pivot().map(|p| p.aggregate) == Some(Aggregate::Mean)));
    }

    #[test]
    fn test_aggregate_variant_renames_sort_key() {
        let operation = StructuredOperation {
            steps: vec![
                by_region(Aggregate::Sum).steps[0].clone(),
                Step::Sort(SortStep {
                    keys: vec![SortKey {
                        column: "sum_revenue".to_string(),
                        direction: SortDirection::Desc,
                    }],
                }),
            ],
            limit: Some(5),
        };
        let changed = with_aggregate(&operation, Aggregate::Mean);
        assert_eq!(changed.sort().unwrap().keys[0].column, "mean_revenue");
        assert!(changed.validate_against(&profile()).is_ok());
    }

    #[test]
    fn test_huge_limit_skips_doubled_variant() {
        let operation = by_region(Aggregate::Sum).with_limit(Some(usize::MAX));
        let result = resolver().resolve(
            "top many regions",
            &profile(),
            vec![candidate(operation.clone(), ConfidenceBucket::Medium, 2)],
            None,
        );
        assert_eq!(result.primary.operation, operation);
        assert!(!result.alternatives.is_empty());
        assert!(result
            .alternatives
            .iter()
            .all(|a| matches!(a.operation.limit, None | Some(usize::MAX))));
    }

    #[test]
    fn test_issue_is_carried() {
        let issue = AppError::UnresolvableColumn("region".to_string());
        let result = resolver().resolve("region = North", &profile(), vec![], Some(issue.clone()));
        assert_eq!(result.issue, Some(issue));
        assert!(result.primary.operation.preview_rows().is_some());
    }
}
