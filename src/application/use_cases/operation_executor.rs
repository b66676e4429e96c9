// ============================================================
// OPERATION EXECUTOR
// ============================================================
// Applies a validated operation to a dataset:
// filter -> group/pivot -> sort -> limit, preview on its own

use super::explanation::explain;
use crate::domain::dataset::Dataset;
use crate::domain::error::{AppError, Result};
use crate::domain::execution::{ChartHint, ExecutionResult, ResultSummary, ResultTable};
use crate::domain::operation::{
    Aggregate, Comparator, FilterStep, GroupAggregateStep, GroupKey, PivotStep, SortDirection,
    SortStep, Step, StructuredOperation,
};
use crate::domain::profile::{ColumnKind, SchemaProfile};
use crate::domain::value::{compare_values, parse_date, Value};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info};

/// Filter literal after coercion to the column's kind
#[derive(Debug, Clone, PartialEq)]
enum Target {
    Number(f64),
    Date(NaiveDate),
    Label(String),
}

#[derive(Debug, Default)]
pub struct OperationExecutor;

impl OperationExecutor {
    pub fn new() -> Self {
        Self
    }

    pub fn execute(
        &self,
        operation: &StructuredOperation,
        dataset: &Dataset,
        profile: &SchemaProfile,
    ) -> Result<ExecutionResult> {
        operation.validate_structure()?;

        for column in operation.source_columns() {
            if !dataset.has_column(column) {
                return Err(AppError::StaleOperation(format!(
                    "column '{}' is not present in the current dataset",
                    column
                )));
            }
        }

        let mut table = ResultTable {
            columns: dataset.column_names(),
            rows: (0..dataset.row_count()).map(|i| dataset.row(i)).collect(),
        };
        let mut chart_hint = ChartHint::None;

        for step in operation.ordered_steps() {
            match step {
                Step::Filter(filter) => {
                    let target = coerce(filter, dataset, profile)?;
                    table = apply_filter(table, filter, &target)?;
                }
                Step::GroupAggregate(group) => {
                    table = apply_group(table, group, dataset, profile)?;
                    chart_hint = if group
                        .group_by
                        .iter()
                        .any(|k| is_temporal_key(k, profile))
                    {
                        ChartHint::Line
                    } else {
                        ChartHint::Bar
                    };
                }
                Step::Pivot(pivot) => {
                    table = apply_pivot(table, pivot, dataset, profile)?;
                    chart_hint = ChartHint::Heatmap;
                }
                Step::Sort(sort) => {
                    table = apply_sort(table, sort, operation.group_aggregate())?;
                }
                Step::Preview(preview) => table.rows.truncate(preview.rows),
            }
        }

        if let Some(limit) = operation.limit {
            table.rows.truncate(limit);
        }

        let summary = ResultSummary {
            row_count: table.row_count(),
            column_count: table.columns.len(),
            columns: table.columns.clone(),
            chart_hint,
            source_rows: dataset.row_count(),
        };
        let explanation = explain(operation, &summary);

        info!(
            kind = %operation.kind(),
            rows = summary.row_count,
            source_rows = summary.source_rows,
            "Operation executed"
        );

        Ok(ExecutionResult {
            table,
            chart_hint,
            explanation,
            summary,
        })
    }
}

fn column_kind(name: &str, profile: &SchemaProfile) -> ColumnKind {
    profile
        .column(name)
        .map(|c| c.kind)
        .unwrap_or(ColumnKind::Categorical)
}

fn is_temporal_key(key: &GroupKey, profile: &SchemaProfile) -> bool {
    key.grain.is_some() || column_kind(&key.column, profile) == ColumnKind::Temporal
}

fn first_cell<'d>(dataset: &'d Dataset, column: &str) -> Option<&'d Value> {
    dataset
        .column(column)
        .and_then(|c| c.values.iter().find(|v| !v.is_null()))
}

fn cells_are_numbers(dataset: &Dataset, column: &str) -> bool {
    dataset
        .column(column)
        .map(|c| {
            c.values
                .iter()
                .filter(|v| !v.is_null())
                .all(|v| v.as_number().is_some())
        })
        .unwrap_or(false)
}

fn mismatch(filter: &FilterStep, expected: &str) -> AppError {
    AppError::TypeMismatch(format!(
        "'{}' cannot be compared with {} column '{}' using {}",
        filter.value,
        expected,
        filter.column,
        filter.comparator.symbol()
    ))
}

/// Coerce the filter literal to the kind of the column it is compared with
fn coerce(filter: &FilterStep, dataset: &Dataset, profile: &SchemaProfile) -> Result<Target> {
    if filter.comparator == Comparator::Contains {
        return Ok(Target::Label(filter.value.to_string()));
    }

    let literal = filter.value.to_string();
    let number = filter.value.as_number();

    match column_kind(&filter.column, profile) {
        ColumnKind::Numeric => number
            .map(Target::Number)
            .ok_or_else(|| mismatch(filter, "numeric")),
        ColumnKind::Temporal => {
            if filter.grain.is_some() {
                return Ok(Target::Label(literal));
            }
            match first_cell(dataset, &filter.column) {
                Some(Value::Date(_)) => match &filter.value {
                    Value::Date(d) => Ok(Target::Date(*d)),
                    _ => parse_date(&literal)
                        .map(Target::Date)
                        .ok_or_else(|| mismatch(filter, "date")),
                },
                Some(Value::Number(_)) => number
                    .map(Target::Number)
                    .ok_or_else(|| mismatch(filter, "temporal")),
                _ => Ok(Target::Label(literal)),
            }
        }
        ColumnKind::Categorical | ColumnKind::Identifier => {
            match number {
                Some(n) if cells_are_numbers(dataset, &filter.column) => Ok(Target::Number(n)),
                _ if filter.comparator.is_ordering() => Err(mismatch(filter, "text")),
                _ => Ok(Target::Label(literal)),
            }
        }
    }
}

fn compare_cell(cell: &Value, target: &Target) -> Option<Ordering> {
    match target {
        Target::Number(n) => cell.as_number().and_then(|c| c.partial_cmp(n)),
        Target::Date(d) => match cell {
            Value::Date(c) => Some(c.cmp(d)),
            _ => None,
        },
        Target::Label(label) => Some(compare_values(
            &Value::Text(cell.to_string()),
            &Value::Text(label.clone()),
        )),
    }
}

fn cell_matches(cell: &Value, filter: &FilterStep, target: &Target) -> bool {
    if cell.is_null() {
        return false;
    }
    let cell = match filter.grain {
        Some(grain) => grain.bucket(cell),
        None => cell.clone(),
    };

    match (filter.comparator, target) {
        (Comparator::Contains, Target::Label(needle)) => {
            cell.folded().contains(&needle.to_lowercase())
        }
        (Comparator::Eq, Target::Label(label)) => cell.folded() == label.to_lowercase(),
        (Comparator::Ne, Target::Label(label)) => cell.folded() != label.to_lowercase(),
        (comparator, target) => match compare_cell(&cell, target) {
            Some(ordering) => match comparator {
                Comparator::Eq => ordering == Ordering::Equal,
                Comparator::Ne => ordering != Ordering::Equal,
                Comparator::Gt => ordering == Ordering::Greater,
                Comparator::Lt => ordering == Ordering::Less,
                Comparator::Ge => ordering != Ordering::Less,
                Comparator::Le => ordering != Ordering::Greater,
                Comparator::Contains => false,
            },
            None => false,
        },
    }
}

fn column_position(table: &ResultTable, column: &str) -> Result<usize> {
    table.column_index(column).ok_or_else(|| {
        AppError::StaleOperation(format!("column '{}' is not available", column))
    })
}

fn apply_filter(table: ResultTable, filter: &FilterStep, target: &Target) -> Result<ResultTable> {
    let idx = column_position(&table, &filter.column)?;
    let before = table.rows.len();
    let rows: Vec<Vec<Value>> = table
        .rows
        .into_iter()
        .filter(|row| cell_matches(&row[idx], filter, target))
        .collect();

    debug!(
        column = %filter.column,
        comparator = filter.comparator.symbol(),
        before = before,
        after = rows.len(),
        "Filter applied"
    );

    Ok(ResultTable {
        columns: table.columns,
        rows,
    })
}

fn require_numeric(metric: &str, aggregate: Aggregate, dataset: &Dataset, profile: &SchemaProfile) -> Result<()> {
    if !aggregate.requires_numeric() {
        return Ok(());
    }
    if column_kind(metric, profile) == ColumnKind::Numeric || cells_are_numbers(dataset, metric) {
        return Ok(());
    }
    Err(AppError::TypeMismatch(format!(
        "cannot compute {} of non-numeric column '{}'",
        aggregate, metric
    )))
}

fn aggregate_values(values: &[&Value], aggregate: Aggregate) -> Value {
    let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();

    match aggregate {
        Aggregate::Count => Value::Number(present.len() as f64),
        Aggregate::Sum => Value::Number(present.iter().filter_map(|v| v.as_number()).sum()),
        Aggregate::Mean => {
            let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_number()).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::Number(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Aggregate::Min => present
            .into_iter()
            .min_by(|a, b| compare_values(a, b))
            .cloned()
            .unwrap_or(Value::Null),
        Aggregate::Max => present
            .into_iter()
            .max_by(|a, b| compare_values(a, b))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

/// Hashable identity for a tuple of key cells
fn signature(keys: &[Value]) -> String {
    keys.iter()
        .map(|k| format!("{:?}", k))
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

fn key_value(row: &[Value], idx: usize, key: &GroupKey) -> Value {
    match key.grain {
        Some(grain) => grain.bucket(&row[idx]),
        None => row[idx].clone(),
    }
}

fn apply_group(
    table: ResultTable,
    group: &GroupAggregateStep,
    dataset: &Dataset,
    profile: &SchemaProfile,
) -> Result<ResultTable> {
    require_numeric(&group.metric, group.aggregate, dataset, profile)?;

    let key_positions = group
        .group_by
        .iter()
        .map(|k| column_position(&table, &k.column))
        .collect::<Result<Vec<_>>>()?;
    let metric_idx = column_position(&table, &group.metric)?;

    let mut order: Vec<Vec<Value>> = Vec::new();
    let mut members: Vec<Vec<&Value>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in &table.rows {
        let keys: Vec<Value> = group
            .group_by
            .iter()
            .zip(&key_positions)
            .map(|(k, &idx)| key_value(row, idx, k))
            .collect();
        let slot = *index.entry(signature(&keys)).or_insert_with(|| {
            order.push(keys);
            members.push(Vec::new());
            order.len() - 1
        });
        members[slot].push(&row[metric_idx]);
    }

    let mut columns: Vec<String> = group.group_by.iter().map(GroupKey::output_name).collect();
    columns.push(group.output_column());

    let rows = order
        .into_iter()
        .zip(members.iter())
        .map(|(mut keys, values)| {
            keys.push(aggregate_values(values, group.aggregate));
            keys
        })
        .collect::<Vec<_>>();

    debug!(groups = rows.len(), output = %group.output_column(), "Grouped rows");
    Ok(ResultTable { columns, rows })
}

fn pivot_label(value: &Value) -> String {
    match value {
        Value::Null => "(blank)".to_string(),
        other => other.to_string(),
    }
}

fn apply_pivot(
    table: ResultTable,
    pivot: &PivotStep,
    dataset: &Dataset,
    profile: &SchemaProfile,
) -> Result<ResultTable> {
    require_numeric(&pivot.values, pivot.aggregate, dataset, profile)?;

    let row_idx = column_position(&table, &pivot.rows.column)?;
    let col_idx = column_position(&table, &pivot.columns.column)?;
    let value_idx = column_position(&table, &pivot.values)?;

    let mut row_keys: Vec<Value> = Vec::new();
    let mut row_index: HashMap<String, usize> = HashMap::new();
    let mut col_labels: Vec<String> = Vec::new();
    let mut col_index: HashMap<String, usize> = HashMap::new();
    let mut cells: HashMap<(usize, usize), Vec<&Value>> = HashMap::new();

    for row in &table.rows {
        let row_key = key_value(row, row_idx, &pivot.rows);
        let r = *row_index
            .entry(signature(std::slice::from_ref(&row_key)))
            .or_insert_with(|| {
                row_keys.push(row_key.clone());
                row_keys.len() - 1
            });

        let label = pivot_label(&key_value(row, col_idx, &pivot.columns));
        let c = *col_index.entry(label.clone()).or_insert_with(|| {
            col_labels.push(label);
            col_labels.len() - 1
        });

        cells.entry((r, c)).or_default().push(&row[value_idx]);
    }

    let mut columns = vec![pivot.rows.output_name()];
    columns.extend(col_labels.iter().cloned());

    let rows = row_keys
        .into_iter()
        .enumerate()
        .map(|(r, key)| {
            let mut out = Vec::with_capacity(col_labels.len() + 1);
            out.push(key);
            for c in 0..col_labels.len() {
                out.push(match cells.get(&(r, c)) {
                    Some(values) => aggregate_values(values, pivot.aggregate),
                    None => pivot.aggregate.fill_default(),
                });
            }
            out
        })
        .collect::<Vec<_>>();

    debug!(rows = rows.len(), columns = col_labels.len(), "Pivoted rows");
    Ok(ResultTable { columns, rows })
}

/// Sort keys after grouping may name a group column or the metric
fn sort_column(column: &str, group: Option<&GroupAggregateStep>) -> String {
    if let Some(group) = group {
        if column == group.metric {
            return group.output_column();
        }
        if let Some(key) = group.group_by.iter().find(|k| k.column == column) {
            return key.output_name();
        }
    }
    column.to_string()
}

fn apply_sort(
    mut table: ResultTable,
    sort: &SortStep,
    group: Option<&GroupAggregateStep>,
) -> Result<ResultTable> {
    let keys = sort
        .keys
        .iter()
        .map(|k| {
            column_position(&table, &sort_column(&k.column, group)).map(|idx| (idx, k.direction))
        })
        .collect::<Result<Vec<_>>>()?;

    table.rows.sort_by(|a, b| {
        for &(idx, direction) in &keys {
            let ordering = match (a[idx].is_null(), b[idx].is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => {
                    let ordering = compare_values(&a[idx], &b[idx]);
                    match direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::schema_profiler::SchemaProfiler;
    use crate::domain::dataset::DatasetInput;
    use crate::domain::operation::SortKey;
    use crate::domain::value::TimeGrain;

    fn dataset(columns: &[&str], rows: &[&[&str]]) -> Dataset {
        Dataset::from_input(DatasetInput {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| Value::Text(c.to_string())).collect())
                .collect(),
            declared_kinds: Default::default(),
        })
        .unwrap()
    }

    fn sales() -> Dataset {
        dataset(
            &["product_name", "quarter", "net_revenue", "region"],
            &[
                &["Widget", "2024-Q3", "100", "North"],
                &["Gadget", "2024-Q4", "300", "South"],
                &["Widget", "2024-Q4", "250", "north"],
                &["Gizmo", "2024-Q4", "", "East"],
                &["Doohickey", "2024-Q4", "50", "West"],
                &["Sprocket", "2024-Q4", "120", "North"],
                &["Flange", "2024-Q4", "80", "South"],
                &["Gadget", "2024-Q4", "20", "East"],
                &["Bracket", "2024-Q4", "10", ""],
            ],
        )
    }

    fn run(operation: &StructuredOperation, data: &Dataset) -> Result<ExecutionResult> {
        let profile = SchemaProfiler::default().profile(data);
        OperationExecutor::new().execute(operation, data, &profile)
    }

    fn filter(column: &str, comparator: Comparator, value: Value) -> Step {
        Step::Filter(FilterStep {
            column: column.to_string(),
            comparator,
            value,
            grain: None,
        })
    }

    fn sort(column: &str, direction: SortDirection) -> Step {
        Step::Sort(SortStep {
            keys: vec![SortKey {
                column: column.to_string(),
                direction,
            }],
        })
    }

    fn sum_by(column: &str, metric: &str) -> Step {
        Step::GroupAggregate(GroupAggregateStep {
            group_by: vec![GroupKey::plain(column)],
            metric: metric.to_string(),
            aggregate: Aggregate::Sum,
        })
    }

    #[test]
    fn test_top_five_products_this_quarter() {
        let operation = StructuredOperation {
            steps: vec![
                filter("quarter", Comparator::Eq, Value::Text("2024-Q4".to_string())),
                sum_by("product_name", "net_revenue"),
                sort("sum_net_revenue", SortDirection::Desc),
            ],
            limit: Some(5),
        };
        let result = run(&operation, &sales()).unwrap();

        assert_eq!(result.table.columns, vec!["product_name", "sum_net_revenue"]);
        assert_eq!(result.table.row_count(), 5);
        let names: Vec<String> = result
            .table
            .column_values("product_name")
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(names, vec!["Gadget", "Widget", "Sprocket", "Flange", "Doohickey"]);
        assert_eq!(result.table.rows[0][1], Value::Number(320.0));
        assert_eq!(result.chart_hint, ChartHint::Bar);
        assert_eq!(result.summary.source_rows, 9);
    }

    #[test]
    fn test_phase_order_ignores_step_order() {
        let written = StructuredOperation {
            steps: vec![
                sort("net_revenue", SortDirection::Desc),
                filter("region", Comparator::Eq, Value::Text("NORTH".to_string())),
            ],
            limit: Some(2),
        };
        let result = run(&written, &sales()).unwrap();
        let revenue: Vec<&Value> = result.table.column_values("net_revenue").unwrap();
        assert_eq!(revenue, vec![&Value::Number(250.0), &Value::Number(120.0)]);
        assert_eq!(result.chart_hint, ChartHint::None);
    }

    #[test]
    fn test_nulls_never_match_and_sort_last() {
        let data = sales();
        let ne = StructuredOperation::single(filter(
            "region",
            Comparator::Ne,
            Value::Text("north".to_string()),
        ));
        assert_eq!(run(&ne, &data).unwrap().table.row_count(), 5);

        let ascending = StructuredOperation::single(sort("net_revenue", SortDirection::Asc));
        let result = run(&ascending, &data).unwrap();
        assert!(result.table.rows.last().unwrap()[2].is_null());
        let descending = StructuredOperation::single(sort("net_revenue", SortDirection::Desc));
        let result = run(&descending, &data).unwrap();
        assert!(result.table.rows.last().unwrap()[2].is_null());
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let operation = StructuredOperation::single(filter(
            "product_name",
            Comparator::Contains,
            Value::Text("GAD".to_string()),
        ));
        assert_eq!(run(&operation, &sales()).unwrap().table.row_count(), 2);
    }

    #[test]
    fn test_type_mismatches() {
        let data = sales();
        let text_ordering = StructuredOperation::single(filter(
            "region",
            Comparator::Gt,
            Value::Text("North".to_string()),
        ));
        assert!(matches!(run(&text_ordering, &data), Err(AppError::TypeMismatch(_))));

        let bad_number = StructuredOperation::single(filter(
            "net_revenue",
            Comparator::Gt,
            Value::Text("lots".to_string()),
        ));
        assert!(matches!(run(&bad_number, &data), Err(AppError::TypeMismatch(_))));

        let text_mean = StructuredOperation::single(Step::GroupAggregate(GroupAggregateStep {
            group_by: vec![GroupKey::plain("quarter")],
            metric: "region".to_string(),
            aggregate: Aggregate::Mean,
        }));
        assert!(matches!(run(&text_mean, &data), Err(AppError::TypeMismatch(_))));
    }

    #[test]
    fn test_missing_column_is_stale() {
        let operation = StructuredOperation::single(sum_by("segment", "net_revenue"));
        assert!(matches!(run(&operation, &sales()), Err(AppError::StaleOperation(_))));
    }

    #[test]
    fn test_pivot_fill_depends_on_aggregate() {
        let data = sales();
        let pivot = |aggregate| {
            StructuredOperation::single(Step::Pivot(PivotStep {
                rows: GroupKey::plain("quarter"),
                columns: GroupKey::plain("region"),
                values: "net_revenue".to_string(),
                aggregate,
            }))
        };

        let summed = run(&pivot(Aggregate::Sum), &data).unwrap();
        assert_eq!(summed.chart_hint, ChartHint::Heatmap);
        assert_eq!(summed.table.columns[0], "quarter");
        let south = summed.table.column_index("South").unwrap();
        assert_eq!(summed.table.rows[0][0], Value::Text("2024-Q3".to_string()));
        assert_eq!(summed.table.rows[0][south], Value::Number(0.0));
        assert_eq!(summed.table.rows[1][south], Value::Number(380.0));

        let averaged = run(&pivot(Aggregate::Mean), &data).unwrap();
        assert_eq!(averaged.table.rows[0][south], Value::Null);
    }

    #[test]
    fn test_group_by_month_grain_and_metric_sort() {
        let data = dataset(
            &["order_date", "units"],
            &[
                &["2024-01-05", "2"],
                &["2024-02-11", "7"],
                &["2024-01-20", "3"],
            ],
        );
        let operation = StructuredOperation {
            steps: vec![
                Step::GroupAggregate(GroupAggregateStep {
                    group_by: vec![GroupKey {
                        column: "order_date".to_string(),
                        grain: Some(TimeGrain::Month),
                    }],
                    metric: "units".to_string(),
                    aggregate: Aggregate::Sum,
                }),
                sort("units", SortDirection::Desc),
            ],
            limit: None,
        };
        let result = run(&operation, &data).unwrap();
        assert_eq!(result.table.columns, vec!["order_date_month", "sum_units"]);
        assert_eq!(result.table.rows[0], vec![Value::Text("2024-02".to_string()), Value::Number(7.0)]);
        assert_eq!(result.table.rows[1], vec![Value::Text("2024-01".to_string()), Value::Number(5.0)]);
        assert_eq!(result.chart_hint, ChartHint::Line);
    }

    #[test]
    fn test_date_filter_and_preview() {
        let data = dataset(
            &["order_date", "units"],
            &[&["2024-01-05", "2"], &["2024-02-11", "7"], &["2024-03-20", "3"]],
        );
        let after = StructuredOperation::single(filter(
            "order_date",
            Comparator::Ge,
            Value::Text("2024-02-01".to_string()),
        ));
        assert_eq!(run(&after, &data).unwrap().table.row_count(), 2);

        let result = run(&StructuredOperation::preview(2), &data).unwrap();
        assert_eq!(result.table.row_count(), 2);
        assert_eq!(result.summary.column_count, 2);
        assert!(result.explanation.starts_with("Showing the first 2 rows"));
    }
}
