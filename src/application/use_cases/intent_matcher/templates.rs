//! Template registry.
//!
//! Each entry pairs a pattern over the normalized core phrase with a builder that fills the
//! template's slots. Entries are tried in registry order; the position is the template's
//! priority for tie-breaking. Adding a template is one `entry(...)` line plus its builder.

use super::clauses::{parse_conditions, parse_sort_phrases, QueryText};
use super::vocabulary::{
    parse_aggregate, parse_count, AGGREGATE_PATTERN, COMPARATOR_PATTERN, COUNT_PATTERN,
};
use super::{group, group_text, SlotFiller};
use crate::application::use_cases::column_resolver::{normalize_name, singularize, SlotType};
use crate::domain::error::{AppError, Result};
use crate::domain::operation::{
    Aggregate, Comparator, FilterStep, GroupAggregateStep, GroupKey, PivotStep, SortDirection,
    SortKey, SortStep, Step, StructuredOperation,
};
use crate::domain::parse_result::ConfidenceBucket;
use crate::domain::value::{TimeGrain, Value};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::fmt;

const GRAIN_PATTERN: &str = "day|week|month|quarter|year";

/// Phrases that name the whole table rather than a column
const DATA_WORDS: [&str; 7] = ["data", "rows", "records", "everything", "all", "results", "all data"];

/// Group phrases that stand for the time axis
const TIME_WORDS: [&str; 4] = ["time", "date", "period", "periods"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    Preview,
    TopN,
    Seasonality,
    Pivot,
    AggregateBy,
    Filter,
    Sort,
    YearFilter,
    Performance,
}

impl TemplateId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::Preview => "preview",
            TemplateId::TopN => "top_n",
            TemplateId::Seasonality => "seasonality",
            TemplateId::Pivot => "pivot",
            TemplateId::AggregateBy => "aggregate_by",
            TemplateId::Filter => "filter",
            TemplateId::Sort => "sort",
            TemplateId::YearFilter => "year_filter",
            TemplateId::Performance => "performance",
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub type Builder = for<'q, 'a> fn(
    &Captures<'q>,
    QueryText<'q>,
    &mut SlotFiller<'a>,
) -> Result<StructuredOperation>;

pub struct Template {
    pub id: TemplateId,
    /// Registry position, starting at 1; lower wins ties
    pub priority: usize,
    /// Confidence when every slot resolves cleanly
    pub base: ConfidenceBucket,
    pattern: Regex,
    pub build: Builder,
}

impl Template {
    pub fn captures<'q>(&self, core: QueryText<'q>) -> Option<Captures<'q>> {
        self.pattern.captures(core.lower)
    }
}

pub static REGISTRY: Lazy<Vec<Template>> = Lazy::new(|| {
    vec![
        entry(TemplateId::Preview, ConfidenceBucket::High, PREVIEW, build_preview),
        entry(TemplateId::TopN, ConfidenceBucket::High, TOP_N, build_top_n),
        entry(TemplateId::Seasonality, ConfidenceBucket::Medium, SEASONALITY, build_seasonality),
        entry(TemplateId::Pivot, ConfidenceBucket::High, PIVOT, build_pivot),
        entry(TemplateId::AggregateBy, ConfidenceBucket::High, AGGREGATE_BY, build_aggregate_by),
        entry(TemplateId::Filter, ConfidenceBucket::High, FILTER, build_filter),
        entry(TemplateId::Sort, ConfidenceBucket::High, SORT, build_sort),
        entry(TemplateId::YearFilter, ConfidenceBucket::High, YEAR_FILTER, build_year_filter),
        entry(TemplateId::Performance, ConfidenceBucket::Low, PERFORMANCE, build_performance),
    ]
    .into_iter()
    .enumerate()
    .map(|(index, mut template)| {
        template.priority = index + 1;
        template
    })
    .collect()
});

fn entry(id: TemplateId, base: ConfidenceBucket, pattern: &str, build: Builder) -> Template {
    let source = pattern
        .replace("{agg}", AGGREGATE_PATTERN.as_str())
        .replace("{count}", COUNT_PATTERN.as_str())
        .replace("{cmp}", COMPARATOR_PATTERN.as_str())
        .replace("{grain}", GRAIN_PATTERN);
    Template {
        id,
        priority: 0,
        base,
        pattern: Regex::new(&source).unwrap(),
        build,
    }
}

// ============================================================
// PATTERNS
// ============================================================

const PREVIEW: &str = r"^(?:(?:show|display|view|list|preview|see|give)\s+)?(?:me\s+)?(?:(?:all|the|whole|raw|entire)\s+)*(?:(?:first|top)\s+(?P<n>{count})\s+)?(?:data|dataset|table|rows|records|entries|lines|everything)$|^(?:preview|show|(?:data\s+)?overview)$";

const TOP_N: &str = r"^(?:(?:show|list|give|find|what are)\s+(?:me\s+)?)?(?:the\s+)?(?P<dir>top|bottom|best|worst|highest|lowest|largest|smallest)\s+(?:(?P<n>{count})\s+)?(?P<dim>.+?)(?:\s+(?:by|in terms of|on)\s+(?P<metric>.+?))?(?:\s+(?:in\s+|for\s+|during\s+|of\s+)?(?P<when>this|current|latest|last|previous)\s+(?P<grain>{grain}))?$";

const SEASONALITY: &str = r"^(?:(?:show|display|find|analyze|analyse)\s+(?:me\s+)?)?(?:the\s+)?(?:seasonality|seasonal\s+(?:patterns?|trends?)|seasonal)(?:\s+(?:of|for|in)\s+(?P<metric>.+?))?(?:\s+(?:by|per|across|for each)\s+(?P<dim>.+?))?$";

const PIVOT: &str = r"^(?:pivot|crosstab|cross tab|cross-tab|cross tabulate)(?:\s+(?:(?P<agg>{agg})\s+(?:of\s+)?)?(?P<metric>.+?))?\s+by\s+(?P<rows>.+?)\s+(?:and|vs|versus|against|across|x)\s+(?P<cols>.+)$";

const AGGREGATE_BY: &str = r"^(?:(?:show|what is|what's|what are|give|calculate|compute|get|list)\s+(?:me\s+)?)?(?:the\s+)?(?:(?P<agg>{agg})\s+(?:of\s+)?)?(?P<metric>.+?)\s+(?:by|per|for each|grouped by|broken down by|across)\s+(?P<dim>.+)$";

const FILTER: &str = r"^(?:(?:show|list|find|get|display|filter|select)\s+(?:me\s+)?)?(?:(?:all\s+)?(?:the\s+)?(?:rows|records|data|entries|items)\s+)?(?:(?:with|whose|when)\s+)?(?P<cond>.+?(?:\s*(?:>=|<=|!=|<>|==|=|>|<)\s*|\s+(?:is\s+)?(?:{cmp})\s+).+)$";

const SORT: &str = r"^(?P<verb>sort|order|rank|arrange)(?:\s+(?:the\s+)?(?:data|rows|table|records|results))?\s+by\s+(?P<keys>.+)$";

const YEAR_FILTER: &str = r"^(?:(?:show|list|get|display)\s+(?:me\s+)?)?(?:(?P<subject>.+?)\s+)?(?:in|during|for|from)\s+(?:the\s+)?(?:year\s+)?(?P<year>(?:19|20)\d{2})$";

const PERFORMANCE: &str = r"^(?:(?:show|display|give|analyze|analyse)\s+(?:me\s+)?)?(?:the\s+)?(?:overall\s+)?(?P<topic>performance|trends?|trend analysis|breakdown|summary|analysis|insights?)(?:\s+(?:of|for|in)\s+(?P<metric>.+?))?(?:\s+(?:by|per|across|over)\s+(?P<dim>.+?))?$";

// ============================================================
// BUILDERS
// ============================================================

fn build_preview<'q, 'a>(
    caps: &Captures<'q>,
    _core: QueryText<'q>,
    filler: &mut SlotFiller<'a>,
) -> Result<StructuredOperation> {
    let rows = group(caps, "n")
        .and_then(parse_count)
        .filter(|n| *n > 0)
        .unwrap_or(filler.preview_rows);
    Ok(StructuredOperation::preview(rows))
}

fn build_top_n<'q, 'a>(
    caps: &Captures<'q>,
    _core: QueryText<'q>,
    filler: &mut SlotFiller<'a>,
) -> Result<StructuredOperation> {
    let direction = match group(caps, "dir") {
        Some("bottom" | "worst" | "lowest" | "smallest") => SortDirection::Asc,
        _ => SortDirection::Desc,
    };
    let n = group(caps, "n")
        .and_then(parse_count)
        .filter(|n| *n > 0)
        .unwrap_or(filler.default_top_n);

    let dim_phrase = group(caps, "dim")
        .ok_or_else(|| AppError::UnresolvableColumn("dimension".to_string()))?;
    let key = filler.group_key(dim_phrase)?;
    let metric = filler.metric(group(caps, "metric"))?;

    let mut steps = Vec::new();
    if let (Some(when), Some(grain)) = (group(caps, "when"), group(caps, "grain")) {
        if let Some(window) = filler.window(when, grain) {
            steps.push(Step::Filter(window));
        }
    }

    let aggregate = GroupAggregateStep {
        group_by: vec![key],
        metric: metric.column,
        aggregate: Aggregate::Sum,
    };
    let sort = SortStep {
        keys: vec![SortKey {
            column: aggregate.output_column(),
            direction,
        }],
    };
    steps.push(Step::GroupAggregate(aggregate));
    steps.push(Step::Sort(sort));

    Ok(StructuredOperation {
        steps,
        limit: Some(n),
    })
}

fn build_seasonality<'q, 'a>(
    caps: &Captures<'q>,
    _core: QueryText<'q>,
    filler: &mut SlotFiller<'a>,
) -> Result<StructuredOperation> {
    let time = filler.time_key()?;
    let metric = filler.metric(group(caps, "metric"))?;

    if let Some(dim) = group(caps, "dim") {
        let columns = filler.group_key(dim)?;
        if columns.column != time.column {
            return Ok(StructuredOperation::single(Step::Pivot(PivotStep {
                rows: time,
                columns,
                values: metric.column,
                aggregate: Aggregate::Sum,
            })));
        }
    }

    Ok(time_series(time, metric.column, Aggregate::Sum))
}

fn build_pivot<'q, 'a>(
    caps: &Captures<'q>,
    _core: QueryText<'q>,
    filler: &mut SlotFiller<'a>,
) -> Result<StructuredOperation> {
    let rows = filler.group_key(group(caps, "rows").unwrap_or_default())?;
    let columns = filler.group_key(group(caps, "cols").unwrap_or_default())?;
    let metric = filler.metric(group(caps, "metric"))?;
    let aggregate = group(caps, "agg")
        .and_then(parse_aggregate)
        .unwrap_or(Aggregate::Sum);

    Ok(StructuredOperation::single(Step::Pivot(PivotStep {
        rows,
        columns,
        values: metric.column,
        aggregate,
    })))
}

fn build_aggregate_by<'q, 'a>(
    caps: &Captures<'q>,
    core: QueryText<'q>,
    filler: &mut SlotFiller<'a>,
) -> Result<StructuredOperation> {
    let mut aggregate = group(caps, "agg").and_then(parse_aggregate);
    let mut metric_phrase = group(caps, "metric");

    // "count by region": the aggregate word stands alone
    if aggregate.is_none() {
        if let Some(found) = metric_phrase.and_then(parse_aggregate) {
            aggregate = Some(found);
            metric_phrase = None;
        }
    }

    let keys = group_text(caps, core, "dim")
        .map(|dim| dim.split_list())
        .unwrap_or_default();
    let group_by = keys
        .iter()
        .map(|key| filler.group_key(key.lower))
        .collect::<Result<Vec<_>>>()?;
    let first_key = group_by
        .first()
        .map(|k| k.column.clone())
        .ok_or_else(|| AppError::UnresolvableColumn("dimension".to_string()))?;

    let aggregate = aggregate.unwrap_or(Aggregate::Sum);
    let metric = if aggregate == Aggregate::Count {
        match metric_phrase {
            Some(phrase) => match filler.column(phrase, SlotType::Any) {
                Ok(found) => found.column,
                Err(_) => {
                    filler.cap(ConfidenceBucket::Medium);
                    first_key
                }
            },
            None => first_key,
        }
    } else {
        filler.metric(metric_phrase)?.column
    };

    Ok(StructuredOperation::single(Step::GroupAggregate(
        GroupAggregateStep {
            group_by,
            metric,
            aggregate,
        },
    )))
}

fn build_filter<'q, 'a>(
    caps: &Captures<'q>,
    core: QueryText<'q>,
    filler: &mut SlotFiller<'a>,
) -> Result<StructuredOperation> {
    let text = group_text(caps, core, "cond")
        .ok_or_else(|| AppError::InvalidOperation("filter has no condition".to_string()))?;
    let conditions = parse_conditions(text).ok_or_else(|| {
        AppError::InvalidOperation(format!("cannot read a condition in '{}'", text.lower))
    })?;

    let steps = conditions
        .iter()
        .map(|condition| filler.filter(condition).map(Step::Filter))
        .collect::<Result<Vec<_>>>()?;

    Ok(StructuredOperation { steps, limit: None })
}

fn build_sort<'q, 'a>(
    caps: &Captures<'q>,
    core: QueryText<'q>,
    filler: &mut SlotFiller<'a>,
) -> Result<StructuredOperation> {
    let default = match group(caps, "verb") {
        Some("rank") => SortDirection::Desc,
        _ => SortDirection::Asc,
    };
    let phrases = group_text(caps, core, "keys")
        .map(parse_sort_phrases)
        .unwrap_or_default();
    if phrases.is_empty() {
        return Err(AppError::InvalidOperation("sort has no keys".to_string()));
    }

    let keys = phrases
        .iter()
        .map(|phrase| filler.sort_key(phrase, default))
        .collect::<Result<Vec<_>>>()?;

    Ok(StructuredOperation::single(Step::Sort(SortStep { keys })))
}

fn build_year_filter<'q, 'a>(
    caps: &Captures<'q>,
    _core: QueryText<'q>,
    filler: &mut SlotFiller<'a>,
) -> Result<StructuredOperation> {
    let year: i32 = group(caps, "year")
        .and_then(|y| y.parse().ok())
        .ok_or_else(|| AppError::InvalidOperation("missing year".to_string()))?;

    let time = filler.time_column(Some("year"))?;
    let named_year = normalize_name(&time.column)
        .split('_')
        .any(|t| singularize(t) == "year");

    let step = if named_year {
        FilterStep {
            column: time.column,
            comparator: Comparator::Eq,
            value: Value::Number(year as f64),
            grain: None,
        }
    } else if filler.holds_dates(&time.column) {
        FilterStep {
            column: time.column,
            comparator: Comparator::Eq,
            value: Value::Text(year.to_string()),
            grain: Some(TimeGrain::Year),
        }
    } else {
        filler.cap(ConfidenceBucket::Medium);
        FilterStep {
            column: time.column,
            comparator: Comparator::Contains,
            value: Value::Text(year.to_string()),
            grain: None,
        }
    };

    if let Some(subject) = group(caps, "subject") {
        if !DATA_WORDS.contains(&subject) && !filler.mentions_column(subject) {
            filler.cap(ConfidenceBucket::Medium);
        }
    }

    Ok(StructuredOperation::single(Step::Filter(step)))
}

fn build_performance<'q, 'a>(
    caps: &Captures<'q>,
    _core: QueryText<'q>,
    filler: &mut SlotFiller<'a>,
) -> Result<StructuredOperation> {
    let topic = group(caps, "topic").unwrap_or("performance");
    let metric = filler.metric(group(caps, "metric"))?;

    let key = match group(caps, "dim") {
        Some(dim) if TIME_WORDS.contains(&dim) => filler.time_key()?,
        Some(dim) => filler.group_key(dim)?,
        None if topic.starts_with("trend") => filler.time_key()?,
        None => GroupKey::plain(filler.dimension(None)?.column),
    };

    if topic.starts_with("trend") || key.grain.is_some() {
        return Ok(time_series(key, metric.column, Aggregate::Sum));
    }

    Ok(StructuredOperation::single(Step::GroupAggregate(
        GroupAggregateStep {
            group_by: vec![key],
            metric: metric.column,
            aggregate: Aggregate::Sum,
        },
    )))
}

/// Aggregate over a time key, in chronological order
fn time_series(key: GroupKey, metric: String, aggregate: Aggregate) -> StructuredOperation {
    let sort = SortStep {
        keys: vec![SortKey {
            column: key.output_name(),
            direction: SortDirection::Asc,
        }],
    };
    StructuredOperation {
        steps: vec![
            Step::GroupAggregate(GroupAggregateStep {
                group_by: vec![key],
                metric,
                aggregate,
            }),
            Step::Sort(sort),
        ],
        limit: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::intent_matcher::clauses::NormalizedQuery;

    fn matching(query: &str) -> Vec<TemplateId> {
        let normalized = NormalizedQuery::new(query);
        REGISTRY
            .iter()
            .filter(|t| t.captures(normalized.text()).is_some())
            .map(|t| t.id)
            .collect()
    }

    #[test]
    fn test_registry_order_is_priority() {
        let priorities: Vec<usize> = REGISTRY.iter().map(|t| t.priority).collect();
        assert_eq!(priorities, (1..=9).collect::<Vec<_>>());
        assert_eq!(REGISTRY[0].id, TemplateId::Preview);
        assert_eq!(REGISTRY[8].id, TemplateId::Performance);
    }

    #[test]
    fn test_patterns_route_queries() {
        assert_eq!(matching("show all data"), vec![TemplateId::Preview]);
        assert_eq!(matching("first 20 rows"), vec![TemplateId::Preview]);
        assert!(matching("top 5 products this quarter").contains(&TemplateId::TopN));
        assert!(matching("show seasonality by region").contains(&TemplateId::Seasonality));
        assert!(matching("pivot revenue by quarter and region").contains(&TemplateId::Pivot));
        assert!(matching("average price by segment").contains(&TemplateId::AggregateBy));
        assert_eq!(matching("units >= 10"), vec![TemplateId::Filter]);
        assert!(matching("sort by revenue desc").contains(&TemplateId::Sort));
        assert_eq!(matching("sales in 2023"), vec![TemplateId::YearFilter]);
        assert_eq!(matching("trends"), vec![TemplateId::Performance]);
        assert!(matching("asdkjasd").is_empty());
    }

    #[test]
    fn test_filter_pattern_needs_whole_word_comparator() {
        assert!(!matching("product overview").contains(&TemplateId::Filter));
        assert!(matching("product is widget").contains(&TemplateId::Filter));
    }
}
