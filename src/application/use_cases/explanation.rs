// ============================================================
// EXPLANATION FORMATTER
// ============================================================
// Plain-language result sentences and short suggestion labels

use super::column_resolver::display_name;
use crate::domain::execution::ResultSummary;
use crate::domain::operation::{
    Aggregate, Comparator, FilterStep, GroupAggregateStep, GroupKey, SortDirection, SortStep,
    StructuredOperation,
};

/// One or two sentences describing what was computed and how many rows came out
pub fn explain(operation: &StructuredOperation, summary: &ResultSummary) -> String {
    let rows = plural(summary.row_count, "row");

    if let Some(preview) = operation.preview_rows() {
        return format!(
            "Showing the first {} of the dataset's {}. The result has {}.",
            plural(preview, "row"),
            plural(summary.source_rows, "row"),
            rows
        );
    }

    let mut parts = Vec::new();

    let filters: Vec<String> = operation.filters().map(describe_filter).collect();
    if !filters.is_empty() {
        parts.push(format!("filtered to rows where {}", filters.join(" and ")));
    }

    if let Some(group) = operation.group_aggregate() {
        parts.push(format!(
            "grouped by {} and computed the {} {}",
            describe_keys(&group.group_by),
            group.aggregate.describe(),
            display_name(&group.metric)
        ));
    }

    if let Some(pivot) = operation.pivot() {
        parts.push(format!(
            "pivoted the {} {} with {} as rows and {} as columns",
            pivot.aggregate.describe(),
            display_name(&pivot.values),
            describe_key(&pivot.rows),
            describe_key(&pivot.columns)
        ));
    }

    if let Some(sort) = operation.sort() {
        parts.push(format!("sorted by {}", describe_sort(sort, operation.group_aggregate())));
    }

    if let Some(limit) = operation.limit {
        parts.push(format!("kept the first {}", plural(limit, "row")));
    }

    let first = capitalize(&join_clauses(&parts));
    format!("{}. The result has {}.", first, rows)
}

/// Short human-readable label for a suggestion
pub fn operation_title(operation: &StructuredOperation) -> String {
    if operation.preview_rows().is_some() {
        return "Data Overview".to_string();
    }

    if let Some(pivot) = operation.pivot() {
        return format!(
            "Pivot: {} vs {}",
            describe_key(&pivot.rows),
            describe_key(&pivot.columns)
        );
    }

    if let Some(group) = operation.group_aggregate() {
        let keys = describe_keys(&group.group_by);
        let ranked = operation
            .sort()
            .and_then(|s| s.keys.first())
            .filter(|k| k.column == group.output_column() || k.column == group.metric);

        if let (Some(limit), Some(key)) = (operation.limit, ranked) {
            let word = match key.direction {
                SortDirection::Desc => "Top",
                SortDirection::Asc => "Bottom",
            };
            return with_window(format!("{} {} {}", word, limit, keys), operation);
        }

        if group.aggregate == Aggregate::Sum {
            return with_window(format!("Analyze by {}", keys), operation);
        }
        return with_window(
            format!(
                "{} {} by {}",
                capitalize(group.aggregate.describe()),
                display_name(&group.metric),
                keys
            ),
            operation,
        );
    }

    if let Some(sort) = operation.sort() {
        let first = &sort.keys[0];
        let base = match first.direction {
            SortDirection::Asc => format!("Sort by {}", display_name(&first.column)),
            SortDirection::Desc => format!("Sort by {} (descending)", display_name(&first.column)),
        };
        return match operation.limit {
            Some(limit) => format!("{}, first {}", base, limit),
            None => base,
        };
    }

    let filters: Vec<&FilterStep> = operation.filters().collect();
    match filters.split_first() {
        Some((first, rest)) if rest.is_empty() => format!("Filter: {}", describe_filter(first)),
        Some((first, rest)) => format!("Filter: {} (+{} more)", describe_filter(first), rest.len()),
        None => "Data Overview".to_string(),
    }
}

/// Append the first filter of a grouped operation, e.g. "Top 5 Product Name (Quarter = 2024-Q4)"
fn with_window(title: String, operation: &StructuredOperation) -> String {
    match operation.filters().next() {
        Some(filter) => format!("{} ({})", title, describe_filter(filter)),
        None => title,
    }
}

fn describe_filter(filter: &FilterStep) -> String {
    let column = match filter.grain {
        Some(grain) => format!("{} ({})", display_name(&filter.column), grain),
        None => display_name(&filter.column),
    };
    match filter.comparator {
        Comparator::Contains => format!("{} contains '{}'", column, filter.value),
        other => format!("{} {} {}", column, other.symbol(), filter.value),
    }
}

fn describe_key(key: &GroupKey) -> String {
    match key.grain {
        Some(grain) => format!("{} (by {})", display_name(&key.column), grain),
        None => display_name(&key.column),
    }
}

fn describe_keys(keys: &[GroupKey]) -> String {
    keys.iter().map(describe_key).collect::<Vec<_>>().join(" and ")
}

fn describe_sort(sort: &SortStep, group: Option<&GroupAggregateStep>) -> String {
    sort.keys
        .iter()
        .map(|key| {
            let column = match group {
                Some(g) if key.column == g.output_column() || key.column == g.metric => {
                    format!("{} {}", g.aggregate.describe(), display_name(&g.metric))
                }
                _ => display_name(&key.column),
            };
            format!("{} {}", column, key.direction.describe())
        })
        .collect::<Vec<_>>()
        .join(", then ")
}

fn join_clauses(parts: &[String]) -> String {
    match parts.len() {
        0 => "returned the rows unchanged".to_string(),
        1 => parts[0].clone(),
        n => {
            let (init, last) = parts.split_at(n - 1);
            format!("{}, then {}", init.join(", "), last[0])
        }
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {}", noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
