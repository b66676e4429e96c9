// ============================================================
// SCHEMA PROFILER
// ============================================================
// Classify dataset columns to ground language resolution

use super::column_resolver::normalize_name;
use crate::domain::dataset::{Column, Dataset};
use crate::domain::pipeline_config::ProfilerConfig;
use crate::domain::profile::{ColumnKind, ColumnProfile, SchemaProfile};
use crate::domain::value::{compare_values, is_temporal_label, Value};
use std::collections::HashSet;
use tracing::debug;

const TIME_WORDS: [&str; 6] = ["year", "quarter", "month", "week", "day", "period"];
const IDENTIFIER_WORDS: [&str; 5] = ["id", "sku", "code", "uuid", "key"];

/// Pure column classifier
pub struct SchemaProfiler {
    config: ProfilerConfig,
}

impl SchemaProfiler {
    pub fn new(config: ProfilerConfig) -> Self {
        Self { config }
    }

    /// Profile every column of a dataset snapshot
    pub fn profile(&self, dataset: &Dataset) -> SchemaProfile {
        let columns = dataset
            .columns()
            .iter()
            .map(|column| {
                let profile = self.profile_column(column, dataset.declared_kind(&column.name));
                debug!(
                    column = %profile.name,
                    kind = %profile.kind,
                    distinct = profile.distinct_count,
                    nulls = profile.null_count,
                    "Profiled column"
                );
                profile
            })
            .collect();

        SchemaProfile {
            fingerprint: dataset.fingerprint().to_string(),
            row_count: dataset.row_count(),
            columns,
        }
    }

    fn profile_column(&self, column: &Column, declared: Option<ColumnKind>) -> ColumnProfile {
        let sample = self.sample_values(&column.values);
        let null_count = column.values.iter().filter(|v| v.is_null()).count();
        let non_null: Vec<&Value> = sample.iter().copied().filter(|v| !v.is_null()).collect();

        let mut seen = HashSet::new();
        let mut sample_values = Vec::new();
        for value in &non_null {
            if seen.insert(value.folded()) && sample_values.len() < self.config.sample_size {
                sample_values.push((*value).clone());
            }
        }
        let distinct_count = seen.len();

        let min_value = non_null
            .iter()
            .copied()
            .min_by(|a, b| compare_values(a, b))
            .cloned();
        let max_value = non_null
            .iter()
            .copied()
            .max_by(|a, b| compare_values(a, b))
            .cloned();

        let stats = ColumnStats::collect(&non_null);
        let holds_dates = stats.ratio(stats.dates) >= self.config.temporal_ratio;
        let kind = declared.unwrap_or_else(|| {
            self.classify(&column.name, &stats, distinct_count, non_null.len())
        });

        ColumnProfile {
            name: column.name.clone(),
            kind,
            distinct_count,
            null_count,
            sample_values,
            min_value,
            max_value,
            holds_dates,
        }
    }

    fn classify(
        &self,
        name: &str,
        stats: &ColumnStats,
        distinct_count: usize,
        non_null: usize,
    ) -> ColumnKind {
        if non_null == 0 {
            return ColumnKind::Categorical;
        }

        let normalized = normalize_name(name);
        let tokens: Vec<&str> = normalized.split('_').collect();
        let all_unique = distinct_count == non_null;

        if stats.ratio(stats.dates + stats.period_labels) >= self.config.temporal_ratio {
            return ColumnKind::Temporal;
        }

        if stats.ratio(stats.numbers) >= self.config.numeric_ratio {
            let time_named = tokens.iter().any(|t| TIME_WORDS.contains(t));
            if time_named && stats.integers == stats.numbers {
                return ColumnKind::Temporal;
            }
            let id_named = tokens.iter().any(|t| IDENTIFIER_WORDS.contains(t));
            if id_named && all_unique {
                return ColumnKind::Identifier;
            }
            return ColumnKind::Numeric;
        }

        if all_unique && non_null >= self.config.identifier_min_rows {
            return ColumnKind::Identifier;
        }

        ColumnKind::Categorical
    }

    /// Sample evenly from very long columns
    fn sample_values<'a>(&self, values: &'a [Value]) -> Vec<&'a Value> {
        let max = self.config.max_profile_rows.max(1);
        if values.len() <= max {
            return values.iter().collect();
        }

        let step = values.len() / max;
        values
            .iter()
            .enumerate()
            .filter(|(i, _)| i % step == 0)
            .map(|(_, v)| v)
            .take(max)
            .collect()
    }
}

impl Default for SchemaProfiler {
    fn default() -> Self {
        Self::new(ProfilerConfig::default())
    }
}

#[derive(Debug, Default)]
struct ColumnStats {
    total: usize,
    numbers: usize,
    integers: usize,
    dates: usize,
    period_labels: usize,
}

impl ColumnStats {
    fn collect(values: &[&Value]) -> Self {
        let mut stats = ColumnStats {
            total: values.len(),
            ..Default::default()
        };
        for value in values {
            match value {
                Value::Number(n) => {
                    stats.numbers += 1;
                    if n.fract() == 0.0 {
                        stats.integers += 1;
                    }
                }
                Value::Date(_) => stats.dates += 1,
                Value::Text(s) if is_temporal_label(s) => stats.period_labels += 1,
                _ => {}
            }
        }
        stats
    }

    fn ratio(&self, count: usize) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            count as f32 / self.total as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dataset::DatasetInput;
    use std::collections::HashMap;

    fn dataset(columns: &[&str], rows: Vec<Vec<&str>>) -> Dataset {
        Dataset::from_input(DatasetInput {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(|v| Value::Text(v.to_string())).collect())
                .collect(),
            declared_kinds: HashMap::new(),
        })
        .unwrap()
    }

    fn kind_of(profile: &SchemaProfile, name: &str) -> ColumnKind {
        profile.column(name).unwrap().kind
    }

    #[test]
    fn test_classifies_sales_columns() {
        let data = dataset(
            &["date", "quarter", "region", "order_id", "net_revenue"],
            vec![
                vec!["2024-01-03", "2024-Q1", "North", "A-1", "120.5"],
                vec!["2024-04-11", "2024-Q2", "South", "A-2", "80"],
                vec!["2024-07-21", "2024-Q3", "North", "A-3", "99.9"],
            ],
        );
        let profile = SchemaProfiler::default().profile(&data);

        assert_eq!(kind_of(&profile, "date"), ColumnKind::Temporal);
        assert!(profile.column("date").unwrap().holds_dates);
        assert_eq!(kind_of(&profile, "quarter"), ColumnKind::Temporal);
        assert_eq!(kind_of(&profile, "region"), ColumnKind::Categorical);
        assert_eq!(kind_of(&profile, "net_revenue"), ColumnKind::Numeric);
        // Too few rows to call an all-unique text column an identifier.
        assert_eq!(kind_of(&profile, "order_id"), ColumnKind::Categorical);
    }

    #[test]
    fn test_identifier_needs_enough_rows() {
        let config = ProfilerConfig {
            identifier_min_rows: 3,
            ..Default::default()
        };
        let data = dataset(
            &["order_ref", "year"],
            vec![
                vec!["X1", "2022"],
                vec!["X2", "2023"],
                vec!["X3", "2023"],
            ],
        );
        let profile = SchemaProfiler::new(config).profile(&data);
        assert_eq!(kind_of(&profile, "order_ref"), ColumnKind::Identifier);
        assert_eq!(kind_of(&profile, "year"), ColumnKind::Temporal);
    }

    #[test]
    fn test_numeric_ids_and_ranges() {
        let data = dataset(
            &["customer_id", "units"],
            vec![vec!["10", "3"], vec!["11", ""], vec!["12", "7"]],
        );
        let profile = SchemaProfiler::default().profile(&data);
        assert_eq!(kind_of(&profile, "customer_id"), ColumnKind::Identifier);

        let units = profile.column("units").unwrap();
        assert_eq!(units.kind, ColumnKind::Numeric);
        assert_eq!(units.null_count, 1);
        assert_eq!(units.min_value, Some(Value::Number(3.0)));
        assert_eq!(units.max_value, Some(Value::Number(7.0)));
    }

    #[test]
    fn test_declared_kind_wins() {
        let mut declared = HashMap::new();
        declared.insert("units".to_string(), ColumnKind::Categorical);
        let data = Dataset::from_input(DatasetInput {
            columns: vec!["units".to_string()],
            rows: vec![vec![Value::Number(1.0)]],
            declared_kinds: declared,
        })
        .unwrap();
        let profile = SchemaProfiler::default().profile(&data);
        assert_eq!(kind_of(&profile, "units"), ColumnKind::Categorical);
    }
}
