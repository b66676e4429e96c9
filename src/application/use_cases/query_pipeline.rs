//! Query Pipeline
//!
//! Orchestrates one query end to end against a session:
//! - profile the active dataset (cached per fingerprint)
//! - rule matching, then the fallback parser under a time bound when matching is inconclusive
//! - ranking into a `ParseResult`
//! - execution of a chosen operation, explanation, history append
//!
//! Recoverable errors never fail a query. Type and operation errors come back as a message next
//! to the safe preview; a stale operation triggers a fresh parse against the current dataset.

use super::ambiguity_resolver::AmbiguityResolver;
use super::intent_matcher::templates::REGISTRY;
use super::intent_matcher::IntentMatcher;
use super::operation_executor::OperationExecutor;
use super::profile_cache::{ProfileCache, ProfileCacheStats};
use super::schema_profiler::SchemaProfiler;
use super::semantic_parser::SemanticParser;
use super::session::Session;
use crate::domain::dataset::{Dataset, DatasetInput};
use crate::domain::error::{AppError, Result};
use crate::domain::execution::ExecutionResult;
use crate::domain::history::SessionHistory;
use crate::domain::operation::StructuredOperation;
use crate::domain::parse_result::{Candidate, CandidateSource, ConfidenceBucket, ParseResult};
use crate::domain::pipeline_config::PipelineConfig;
use crate::domain::profile::SchemaProfile;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// What happened to a chosen operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Executed {
        result: ExecutionResult,
    },
    /// The operation could not run; the preview is shown instead
    Degraded {
        message: String,
        result: ExecutionResult,
    },
    /// The operation targeted an older dataset; here is a fresh parse
    Reparsed {
        message: String,
        parse: ParseResult,
    },
}

impl ExecutionOutcome {
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            ExecutionOutcome::Executed { result } | ExecutionOutcome::Degraded { result, .. } => {
                Some(result)
            }
            ExecutionOutcome::Reparsed { .. } => None,
        }
    }
}

/// Parse plus, for confident parses, the executed primary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    pub parse: ParseResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,
}

pub struct QueryPipeline {
    config: PipelineConfig,
    profiler: SchemaProfiler,
    cache: Mutex<ProfileCache>,
    matcher: IntentMatcher,
    resolver: AmbiguityResolver,
    executor: OperationExecutor,
    parser: Option<Arc<dyn SemanticParser>>,
}

impl QueryPipeline {
    pub fn new(config: PipelineConfig, parser: Option<Arc<dyn SemanticParser>>) -> Self {
        Self {
            profiler: SchemaProfiler::new(config.profiler.clone()),
            cache: Mutex::new(ProfileCache::new(config.profile_cache_size)),
            matcher: IntentMatcher::new(&config),
            resolver: AmbiguityResolver::new(&config),
            executor: OperationExecutor::new(),
            parser,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Profile a dataset, reusing the cached profile for a known fingerprint
    pub fn profile(&self, dataset: &Dataset) -> Result<Arc<SchemaProfile>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|e| AppError::Internal(format!("Profile cache lock poisoned: {}", e)))?;

        if let Some(profile) = cache.get(dataset.fingerprint()) {
            debug!(fingerprint = %dataset.fingerprint(), "Profile cache hit");
            return Ok(profile);
        }

        let profile = Arc::new(self.profiler.profile(dataset));
        cache.put(profile.clone());
        Ok(profile)
    }

    pub fn cache_stats(&self) -> Result<ProfileCacheStats> {
        self.cache
            .lock()
            .map(|cache| cache.stats())
            .map_err(|e| AppError::Internal(format!("Profile cache lock poisoned: {}", e)))
    }

    /// Replace the session's dataset
    pub fn load_dataset(&self, session: &mut Session, input: DatasetInput) -> Result<Arc<SchemaProfile>> {
        let dataset = Dataset::from_input(input)?;
        let profile = self.profile(&dataset)?;

        info!(
            session = %session.id(),
            rows = dataset.row_count(),
            columns = profile.columns.len(),
            fingerprint = %profile.fingerprint,
            "Dataset loaded"
        );

        session.replace_dataset(Arc::new(dataset), profile.clone());
        Ok(profile)
    }

    /// Turn free text into ranked suggestions for the session's dataset
    pub async fn parse(&self, session: &Session, query: &str) -> Result<ParseResult> {
        let (_, profile) = session.active()?;
        let start = Instant::now();

        let outcome = self.matcher.match_query(query, &profile);
        let mut issue = outcome.issue().cloned();
        let mut candidates = outcome.candidates.clone();

        if outcome.needs_fallback() {
            match self.fallback(query, &profile).await {
                Ok(Some(operation)) => candidates.push(Candidate {
                    operation,
                    confidence: ConfidenceBucket::Medium,
                    priority: REGISTRY.len() + 2,
                    source: CandidateSource::Model,
                    template: None,
                }),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Fallback parser produced no match");
                    if issue.is_none() && e.is_recoverable() {
                        issue = Some(e);
                    }
                }
            }
        }

        let result = self.resolver.resolve(query, &profile, candidates, issue);

        info!(
            session = %session.id(),
            primary = %result.primary.label,
            confidence = %result.confidence(),
            alternatives = result.alternatives.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query parsed"
        );
        Ok(result)
    }

    /// Fallback parse bounded by `fallback_timeout_ms`; `None` when no parser is configured
    async fn fallback(&self, query: &str, profile: &SchemaProfile) -> Result<Option<StructuredOperation>> {
        let Some(parser) = &self.parser else {
            return Ok(None);
        };

        let bound = self.config.fallback_timeout_ms;
        match timeout(Duration::from_millis(bound), parser.parse(query, profile)).await {
            Ok(Ok(operation)) => {
                operation.validate_against(profile).map_err(|e| match e {
                    AppError::StaleOperation(message) => AppError::InvalidOperation(message),
                    other => other,
                })?;
                Ok(Some(operation))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::ParseTimeout(bound)),
        }
    }

    /// Execute an operation against the session's dataset and append it to history.
    ///
    /// `fingerprint` is the dataset fingerprint the operation was parsed against, if known.
    pub fn execute(
        &self,
        session: &mut Session,
        query: &str,
        operation: &StructuredOperation,
        fingerprint: Option<&str>,
    ) -> Result<ExecutionResult> {
        let (dataset, profile) = session.active()?;

        if let Some(fingerprint) = fingerprint {
            if fingerprint != profile.fingerprint {
                return Err(AppError::StaleOperation(
                    "the dataset changed since this query was parsed".to_string(),
                ));
            }
        }
        operation.validate_against(&profile)?;

        let result = self.executor.execute(operation, &dataset, &profile)?;
        let entry = session.history_mut().append(
            query,
            operation.clone(),
            result.summary.clone(),
            result.explanation.clone(),
        );
        debug!(sequence = entry.sequence, "History entry appended");

        Ok(result)
    }

    /// Execute with the recovery policy applied
    pub async fn run(
        &self,
        session: &mut Session,
        query: &str,
        operation: &StructuredOperation,
        fingerprint: Option<&str>,
    ) -> Result<ExecutionOutcome> {
        match self.execute(session, query, operation, fingerprint) {
            Ok(result) => Ok(ExecutionOutcome::Executed { result }),
            Err(e @ (AppError::TypeMismatch(_) | AppError::InvalidOperation(_))) => {
                warn!(error = %e, "Operation failed; showing preview");
                let preview = StructuredOperation::preview(self.config.preview_rows);
                let result = self.execute(session, query, &preview, None)?;
                Ok(ExecutionOutcome::Degraded {
                    message: e.to_string(),
                    result,
                })
            }
            Err(e @ AppError::StaleOperation(_)) => {
                info!(error = %e, "Stale operation; re-parsing");
                let parse = self.parse(session, query).await?;
                Ok(ExecutionOutcome::Reparsed {
                    message: e.to_string(),
                    parse,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Parse a query and run the primary when the parse is confident
    pub async fn ask(&self, session: &mut Session, query: &str) -> Result<QueryAnswer> {
        let parse = self.parse(session, query).await?;
        if !parse.is_confident() {
            return Ok(QueryAnswer {
                parse,
                outcome: None,
            });
        }

        let outcome = self
            .run(
                session,
                query,
                &parse.primary.operation,
                Some(&parse.dataset_fingerprint),
            )
            .await?;
        Ok(QueryAnswer {
            parse,
            outcome: Some(outcome),
        })
    }

    /// Run the suggestion with the given rank from an earlier parse
    pub async fn choose(&self, session: &mut Session, parse: &ParseResult, rank: usize) -> Result<ExecutionOutcome> {
        let suggestion = parse
            .choice(rank)
            .ok_or_else(|| AppError::NotFound(format!("No suggestion with rank {}", rank)))?;
        self.run(
            session,
            &parse.query,
            &suggestion.operation,
            Some(&parse.dataset_fingerprint),
        )
        .await
    }

    pub fn export_history(&self, session: &Session) -> Result<String> {
        session.history().to_json()
    }

    /// Replace the session history with a saved one after checking every operation against
    /// the current dataset
    pub fn load_history(&self, session: &mut Session, json: &str) -> Result<usize> {
        let history = SessionHistory::from_json(json)?;
        let (_, profile) = session.active()?;

        for entry in &history.entries {
            entry.operation.validate_against(&profile).map_err(|e| {
                warn!(sequence = entry.sequence, error = %e, "Rejected saved history");
                match e {
                    AppError::StaleOperation(message) => AppError::StaleOperation(format!(
                        "history entry {} ('{}'): {}",
                        entry.sequence, entry.query, message
                    )),
                    other => other,
                }
            })?;
        }

        let count = history.len();
        session.set_history(history);
        info!(session = %session.id(), entries = count, "History loaded");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::intent_matcher::vocabulary::MAX_COUNT;
    use crate::domain::execution::ChartHint;
    use crate::domain::profile::ColumnKind;
    use crate::domain::value::Value;
    use async_trait::async_trait;

    struct StaticParser(StructuredOperation);

    #[async_trait]
    impl SemanticParser for StaticParser {
        async fn parse(&self, _query: &str, _profile: &SchemaProfile) -> Result<StructuredOperation> {
            Ok(self.0.clone())
        }
    }

    struct SlowParser;

    #[async_trait]
    impl SemanticParser for SlowParser {
        async fn parse(&self, _query: &str, _profile: &SchemaProfile) -> Result<StructuredOperation> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(StructuredOperation::preview(1))
        }
    }

    fn input(columns: &[&str], rows: &[&[&str]]) -> DatasetInput {
        DatasetInput {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| Value::Text(c.to_string())).collect())
                .collect(),
            declared_kinds: Default::default(),
        }
    }

    fn sales() -> DatasetInput {
        input(
            &["product_name", "quarter", "net_revenue"],
            &[
                &["Widget", "2024-Q3", "900"],
                &["Widget", "2024-Q4", "250"],
                &["Gadget", "2024-Q4", "300"],
                &["Gizmo", "2024-Q4", "40"],
                &["Doohickey", "2024-Q4", "50"],
                &["Sprocket", "2024-Q4", "120"],
                &["Flange", "2024-Q4", "80"],
                &["Bracket", "2024-Q4", "10"],
                &["Gadget", "2024-Q3", "500"],
            ],
        )
    }

    fn session_with(pipeline: &QueryPipeline, data: DatasetInput) -> Session {
        let mut session = Session::new();
        pipeline.load_dataset(&mut session, data).unwrap();
        session
    }

    fn pipeline() -> QueryPipeline {
        QueryPipeline::new(PipelineConfig::default(), None)
    }

    #[tokio::test]
    async fn test_top_five_products_this_quarter() {
        let pipeline = pipeline();
        let mut session = session_with(&pipeline, sales());

        let answer = pipeline.ask(&mut session, "top 5 products this quarter").await.unwrap();
        assert!(answer.parse.is_confident());
        assert!(answer.parse.alternatives.is_empty());

        let Some(ExecutionOutcome::Executed { result }) = answer.outcome else {
            panic!("expected an executed result");
        };
        assert_eq!(result.table.row_count(), 5);
        let revenue: Vec<f64> = result
            .table
            .column_values("sum_net_revenue")
            .unwrap()
            .iter()
            .filter_map(|v| v.as_number())
            .collect();
        assert_eq!(revenue, vec![300.0, 250.0, 120.0, 80.0, 50.0]);
        assert_eq!(result.chart_hint, ChartHint::Bar);
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn test_gibberish_yields_preview_without_error() {
        let pipeline = pipeline();
        let session = session_with(&pipeline, sales());

        let parse = pipeline.parse(&session, "asdkjasd").await.unwrap();
        assert_eq!(parse.primary.operation, StructuredOperation::preview(100));
        assert_eq!(parse.primary.source, CandidateSource::Fallback);
        assert!(parse.issue.is_none());
    }

    #[tokio::test]
    async fn test_missing_column_degrades_to_preview() {
        let pipeline = pipeline();
        let session = session_with(&pipeline, sales());

        let parse = pipeline.parse(&session, "region = North").await.unwrap();
        assert!(matches!(parse.issue, Some(AppError::UnresolvableColumn(_))));
        assert!(parse.primary.operation.preview_rows().is_some());
    }

    #[tokio::test]
    async fn test_model_candidate_used_when_rules_fail() {
        let operation = StructuredOperation::single(crate::domain::operation::Step::Sort(
            crate::domain::operation::SortStep {
                keys: vec![crate::domain::operation::SortKey {
                    column: "net_revenue".to_string(),
                    direction: crate::domain::operation::SortDirection::Desc,
                }],
            },
        ));
        let pipeline = QueryPipeline::new(
            PipelineConfig::default(),
            Some(Arc::new(StaticParser(operation.clone()))),
        );
        let session = session_with(&pipeline, sales());

        let parse = pipeline.parse(&session, "biggest earners first please").await.unwrap();
        assert_eq!(parse.primary.operation, operation);
        assert_eq!(parse.primary.source, CandidateSource::Model);
        assert_eq!(parse.primary.confidence, ConfidenceBucket::Medium);
    }

    #[tokio::test]
    async fn test_fallback_timeout_is_no_match() {
        let config = PipelineConfig {
            fallback_timeout_ms: 20,
            ..PipelineConfig::default()
        };
        let pipeline = QueryPipeline::new(config, Some(Arc::new(SlowParser)));
        let session = session_with(&pipeline, sales());

        let parse = pipeline.parse(&session, "asdkjasd").await.unwrap();
        assert_eq!(parse.primary.source, CandidateSource::Fallback);
        assert_eq!(parse.issue, Some(AppError::ParseTimeout(20)));
    }

    #[tokio::test]
    async fn test_dataset_swap_makes_parse_stale() {
        let pipeline = pipeline();
        let mut session = session_with(&pipeline, sales());
        let parse = pipeline.parse(&session, "sort by net revenue desc").await.unwrap();

        pipeline
            .load_dataset(&mut session, input(&["city", "units"], &[&["Oslo", "3"]]))
            .unwrap();
        assert_eq!(session.generation(), 2);

        let direct = pipeline.execute(
            &mut session,
            &parse.query,
            &parse.primary.operation,
            Some(&parse.dataset_fingerprint),
        );
        assert!(matches!(direct, Err(AppError::StaleOperation(_))));

        let outcome = pipeline.choose(&mut session, &parse, 0).await.unwrap();
        let ExecutionOutcome::Reparsed { parse: fresh, .. } = outcome else {
            panic!("expected a re-parse");
        };
        assert_ne!(fresh.dataset_fingerprint, parse.dataset_fingerprint);
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_type_mismatch_degrades_to_preview() {
        let pipeline = pipeline();
        let mut session = session_with(&pipeline, sales());
        let operation = StructuredOperation::single(crate::domain::operation::Step::Filter(
            crate::domain::operation::FilterStep {
                column: "net_revenue".to_string(),
                comparator: crate::domain::operation::Comparator::Gt,
                value: Value::Text("plenty".to_string()),
                grain: None,
            },
        ));

        let outcome = pipeline.run(&mut session, "revenue over plenty", &operation, None).await.unwrap();
        let ExecutionOutcome::Degraded { message, result } = outcome else {
            panic!("expected a degraded outcome");
        };
        assert!(message.starts_with("Type mismatch"));
        assert_eq!(result.table.row_count(), 9);
    }

    fn catalog() -> DatasetInput {
        input(
            &["product_name", "units", "net_revenue"],
            &[
                &["Widget", "3", "900"],
                &["Gadget", "7", "300"],
                &["Widget", "1", "250"],
            ],
        )
    }

    #[tokio::test]
    async fn test_huge_top_n_parses_without_overflow() {
        let pipeline = pipeline();
        let session = session_with(&pipeline, catalog());

        for query in [
            "top 18446744073709551615 products by revnue",
            "top 1000000 products by revnue",
        ] {
            let parse = pipeline.parse(&session, query).await.unwrap();
            assert!(parse
                .suggestions()
                .all(|s| s.operation.limit.map_or(true, |n| n <= 2 * MAX_COUNT)));
        }
    }

    #[tokio::test]
    async fn test_declared_kinds_change_the_profile() {
        let pipeline = pipeline();
        let mut declared = catalog();
        declared
            .declared_kinds
            .insert("units".to_string(), ColumnKind::Categorical);

        let mut session = session_with(&pipeline, declared);
        let first = session.profile().unwrap().column("units").unwrap().kind;
        assert_eq!(first, ColumnKind::Categorical);

        let profile = pipeline.load_dataset(&mut session, catalog()).unwrap();
        assert_eq!(profile.column("units").unwrap().kind, ColumnKind::Numeric);
        assert_eq!(pipeline.cache_stats().unwrap().total_entries, 2);
    }

    #[tokio::test]
    async fn test_sort_outside_grouped_output_degrades() {
        use crate::domain::operation::{
            Aggregate, GroupAggregateStep, GroupKey, SortDirection, SortKey, SortStep, Step,
        };

        let pipeline = pipeline();
        let mut session = session_with(&pipeline, catalog());
        let fingerprint = session.profile().unwrap().fingerprint.clone();
        let operation = StructuredOperation {
            steps: vec![
                Step::GroupAggregate(GroupAggregateStep {
                    group_by: vec![GroupKey::plain("product_name")],
                    metric: "net_revenue".to_string(),
                    aggregate: Aggregate::Sum,
                }),
                Step::Sort(SortStep {
                    keys: vec![SortKey {
                        column: "units".to_string(),
                        direction: SortDirection::Desc,
                    }],
                }),
            ],
            limit: None,
        };

        let outcome = pipeline
            .run(&mut session, "revenue by product sorted by units", &operation, Some(&fingerprint))
            .await
            .unwrap();
        let ExecutionOutcome::Degraded { message, result } = outcome else {
            panic!("expected a degraded outcome");
        };
        assert!(message.starts_with("Invalid operation"));
        assert_eq!(result.table.row_count(), 3);
    }

    #[tokio::test]
    async fn test_history_round_trip_is_byte_identical() {
        let pipeline = pipeline();
        let mut session = session_with(&pipeline, sales());
        pipeline.ask(&mut session, "top 5 products this quarter").await.unwrap();
        let parse = pipeline.parse(&session, "show all data").await.unwrap();
        pipeline.choose(&mut session, &parse, 0).await.unwrap();

        let saved = pipeline.export_history(&session).unwrap();
        let mut restored = session_with(&pipeline, sales());
        assert_eq!(pipeline.load_history(&mut restored, &saved).unwrap(), 2);
        assert_eq!(pipeline.export_history(&restored).unwrap(), saved);

        let mut other = session_with(&pipeline, input(&["city", "units"], &[&["Oslo", "3"]]));
        assert!(matches!(
            pipeline.load_history(&mut other, &saved),
            Err(AppError::StaleOperation(_))
        ));
        assert!(other.history().is_empty());
    }

    #[tokio::test]
    async fn test_profiles_are_cached_by_fingerprint() {
        let pipeline = pipeline();
        session_with(&pipeline, sales());
        session_with(&pipeline, sales());
        let stats = pipeline.cache_stats().unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.hits, 1);
    }
}
