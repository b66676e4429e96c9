//! Structured operations
//!
//! The contract between query understanding and execution. An operation is an ordered list of
//! tagged steps plus an optional row limit; the executor always applies steps in the phase order
//! filter → group/pivot → sort → limit, whatever order they were written in.

use super::error::{AppError, Result};
use super::profile::SchemaProfile;
use super::value::{TimeGrain, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
}

impl Comparator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "!=",
            Comparator::Gt => ">",
            Comparator::Lt => "<",
            Comparator::Ge => ">=",
            Comparator::Le => "<=",
            Comparator::Contains => "contains",
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Comparator::Gt | Comparator::Lt | Comparator::Ge | Comparator::Le
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flipped(&self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ascending",
            SortDirection::Desc => "descending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Sum,
    Mean,
    Count,
    Min,
    Max,
}

impl Aggregate {
    pub const ALL: [Aggregate; 5] = [
        Aggregate::Sum,
        Aggregate::Mean,
        Aggregate::Count,
        Aggregate::Min,
        Aggregate::Max,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::Mean => "mean",
            Aggregate::Count => "count",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Aggregate::Sum => "total",
            Aggregate::Mean => "average",
            Aggregate::Count => "count of",
            Aggregate::Min => "minimum",
            Aggregate::Max => "maximum",
        }
    }

    /// Cell value used for pivot combinations with no rows.
    pub fn fill_default(&self) -> Value {
        match self {
            Aggregate::Sum | Aggregate::Count => Value::Number(0.0),
            Aggregate::Mean | Aggregate::Min | Aggregate::Max => Value::Null,
        }
    }

    pub fn requires_numeric(&self) -> bool {
        matches!(self, Aggregate::Sum | Aggregate::Mean)
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterStep {
    pub column: String,
    pub comparator: Comparator,
    pub value: Value,
    /// When set, cells are bucketed to this grain before comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grain: Option<TimeGrain>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortStep {
    pub keys: Vec<SortKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupKey {
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grain: Option<TimeGrain>,
}

impl GroupKey {
    pub fn plain(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            grain: None,
        }
    }

    /// Name of the key column in result tables.
    pub fn output_name(&self) -> String {
        match self.grain {
            Some(grain) => format!("{}_{}", self.column, grain),
            None => self.column.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupAggregateStep {
    pub group_by: Vec<GroupKey>,
    pub metric: String,
    pub aggregate: Aggregate,
}

impl GroupAggregateStep {
    pub fn output_column(&self) -> String {
        format!("{}_{}", self.aggregate, self.metric)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PivotStep {
    pub rows: GroupKey,
    pub columns: GroupKey,
    pub values: String,
    pub aggregate: Aggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreviewStep {
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Filter(FilterStep),
    Sort(SortStep),
    GroupAggregate(GroupAggregateStep),
    Pivot(PivotStep),
    Preview(PreviewStep),
}

impl Step {
    pub fn kind(&self) -> OperationKind {
        match self {
            Step::Filter(_) => OperationKind::Filter,
            Step::Sort(_) => OperationKind::Sort,
            Step::GroupAggregate(_) => OperationKind::GroupAggregate,
            Step::Pivot(_) => OperationKind::Pivot,
            Step::Preview(_) => OperationKind::Preview,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Filter,
    Sort,
    GroupAggregate,
    Pivot,
    Preview,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Filter => "filter",
            OperationKind::Sort => "sort",
            OperationKind::GroupAggregate => "group_aggregate",
            OperationKind::Pivot => "pivot",
            OperationKind::Preview => "preview",
        }
    }

    /// Execution phase: filter, then group/pivot, then sort; preview stands alone.
    pub fn phase(&self) -> u8 {
        match self {
            OperationKind::Filter => 0,
            OperationKind::GroupAggregate | OperationKind::Pivot => 1,
            OperationKind::Sort => 2,
            OperationKind::Preview => 3,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredOperation {
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl StructuredOperation {
    pub fn single(step: Step) -> Self {
        Self {
            steps: vec![step],
            limit: None,
        }
    }

    pub fn preview(rows: usize) -> Self {
        Self::single(Step::Preview(PreviewStep { rows }))
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// The kind that best describes the whole operation.
    pub fn kind(&self) -> OperationKind {
        let kinds: Vec<OperationKind> = self.steps.iter().map(Step::kind).collect();
        [
            OperationKind::Pivot,
            OperationKind::GroupAggregate,
            OperationKind::Sort,
            OperationKind::Filter,
        ]
        .into_iter()
        .find(|k| kinds.contains(k))
        .unwrap_or(OperationKind::Preview)
    }

    pub fn filters(&self) -> impl Iterator<Item = &FilterStep> {
        self.steps.iter().filter_map(|s| match s {
            Step::Filter(f) => Some(f),
            _ => None,
        })
    }

    pub fn sort(&self) -> Option<&SortStep> {
        self.steps.iter().find_map(|s| match s {
            Step::Sort(sort) => Some(sort),
            _ => None,
        })
    }

    pub fn group_aggregate(&self) -> Option<&GroupAggregateStep> {
        self.steps.iter().find_map(|s| match s {
            Step::GroupAggregate(g) => Some(g),
            _ => None,
        })
    }

    pub fn pivot(&self) -> Option<&PivotStep> {
        self.steps.iter().find_map(|s| match s {
            Step::Pivot(p) => Some(p),
            _ => None,
        })
    }

    pub fn preview_rows(&self) -> Option<usize> {
        self.steps.iter().find_map(|s| match s {
            Step::Preview(p) => Some(p.rows),
            _ => None,
        })
    }

    /// Steps in execution order; stable within a phase.
    pub fn ordered_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.kind().phase());
        steps
    }

    /// Dataset columns read by the operation (sort keys excluded; they may name output columns).
    pub fn source_columns(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        for step in &self.steps {
            match step {
                Step::Filter(f) => columns.push(f.column.as_str()),
                Step::GroupAggregate(g) => {
                    columns.extend(g.group_by.iter().map(|k| k.column.as_str()));
                    columns.push(g.metric.as_str());
                }
                Step::Pivot(p) => {
                    columns.push(p.rows.column.as_str());
                    columns.push(p.columns.column.as_str());
                    columns.push(p.values.as_str());
                }
                Step::Sort(_) | Step::Preview(_) => {}
            }
        }
        columns
    }

    /// Shape-independent checks; violations are `InvalidOperation`.
    pub fn validate_structure(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(invalid("operation has no steps"));
        }
        if self.limit == Some(0) {
            return Err(invalid("limit must be greater than zero"));
        }

        let shapes = self
            .steps
            .iter()
            .filter(|s| matches!(s, Step::GroupAggregate(_) | Step::Pivot(_)))
            .count();
        if shapes > 1 {
            return Err(invalid("at most one group_aggregate or pivot step is allowed"));
        }
        if self.steps.iter().filter(|s| matches!(s, Step::Sort(_))).count() > 1 {
            return Err(invalid("at most one sort step is allowed"));
        }

        for step in &self.steps {
            match step {
                Step::Preview(p) => {
                    if self.steps.len() > 1 {
                        return Err(invalid("preview cannot be combined with other steps"));
                    }
                    if p.rows == 0 {
                        return Err(invalid("preview row count must be greater than zero"));
                    }
                }
                Step::Filter(f) => {
                    if f.column.trim().is_empty() {
                        return Err(invalid("filter column is empty"));
                    }
                    if f.value.is_null() {
                        return Err(invalid("filter value is missing"));
                    }
                }
                Step::Sort(s) => {
                    if s.keys.is_empty() {
                        return Err(invalid("sort requires at least one key"));
                    }
                }
                Step::GroupAggregate(g) => {
                    if g.group_by.is_empty() {
                        return Err(invalid("group_aggregate requires at least one group key"));
                    }
                }
                Step::Pivot(p) => {
                    if p.rows == p.columns {
                        return Err(invalid("pivot row and column dimensions must differ"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Structure plus column existence against a profile. A column the profile does not know
    /// means the operation was built for another dataset snapshot.
    pub fn validate_against(&self, profile: &SchemaProfile) -> Result<()> {
        self.validate_structure()?;

        for column in self.source_columns() {
            if !profile.has_column(column) {
                return Err(AppError::StaleOperation(format!(
                    "column '{}' is not present in the current dataset",
                    column
                )));
            }
        }

        if let Some(sort) = self.sort() {
            for key in &sort.keys {
                if self.sort_key_is_known(&key.column, profile) {
                    continue;
                }
                if profile.has_column(&key.column) {
                    return Err(invalid(&format!(
                        "sort column '{}' is not part of the aggregated output",
                        key.column
                    )));
                }
                return Err(AppError::StaleOperation(format!(
                    "sort column '{}' is not available",
                    key.column
                )));
            }
        }
        Ok(())
    }

    fn sort_key_is_known(&self, column: &str, profile: &SchemaProfile) -> bool {
        if let Some(group) = self.group_aggregate() {
            return group
                .group_by
                .iter()
                .any(|k| k.column == column || k.output_name() == column)
                || group.metric == column
                || group.output_column() == column;
        }
        if self.pivot().is_some() {
            // Pivot value columns are data-dependent; the executor checks them.
            return !column.trim().is_empty();
        }
        profile.has_column(column)
    }
}

fn invalid(message: &str) -> AppError {
    AppError::InvalidOperation(message.to_string())
}
