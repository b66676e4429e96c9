// ============================================================
// DATASET
// ============================================================
// Immutable in-memory table owned by a session

use super::error::{AppError, Result};
use super::profile::ColumnKind;
use super::value::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Tabular payload supplied by the ingestion collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetInput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Optional per-column kinds that override profiling.
    #[serde(default)]
    pub declared_kinds: HashMap<String, ColumnKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    row_count: usize,
    declared_kinds: HashMap<String, ColumnKind>,
    fingerprint: String,
}

impl Dataset {
    /// Build a dataset, normalizing each column's cells to a single inferred type.
    pub fn from_input(input: DatasetInput) -> Result<Self> {
        let DatasetInput {
            columns: names,
            rows,
            declared_kinds,
        } = input;

        if names.is_empty() {
            return Err(AppError::ValidationError(
                "Dataset must have at least one column".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for name in &names {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(AppError::ValidationError(
                    "Column names must not be empty".to_string(),
                ));
            }
            if !seen.insert(trimmed.to_lowercase()) {
                return Err(AppError::ValidationError(format!(
                    "Duplicate column name: {}",
                    trimmed
                )));
            }
        }

        let mut raw_columns: Vec<Vec<Value>> = vec![Vec::with_capacity(rows.len()); names.len()];
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() > names.len() {
                return Err(AppError::ValidationError(format!(
                    "Row {} has {} cells but only {} columns are defined",
                    row_idx + 1,
                    row.len(),
                    names.len()
                )));
            }
            for (col_idx, column) in raw_columns.iter_mut().enumerate() {
                column.push(row.get(col_idx).cloned().unwrap_or(Value::Null));
            }
        }

        let columns = names
            .into_iter()
            .zip(raw_columns)
            .map(|(name, values)| Column {
                name: name.trim().to_string(),
                values: normalize_column(values),
            })
            .collect::<Vec<_>>();

        Ok(Self::assemble(columns, rows.len(), declared_kinds))
    }

    fn assemble(
        columns: Vec<Column>,
        row_count: usize,
        declared_kinds: HashMap<String, ColumnKind>,
    ) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        let fingerprint = fingerprint(&columns, &declared_kinds);

        Self {
            columns,
            index,
            row_count,
            declared_kinds,
            fingerprint,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn declared_kind(&self, name: &str) -> Option<ColumnKind> {
        self.declared_kinds.get(name).copied()
    }

    /// Hex SHA-256 over column names, cells and declared kinds; identifies the dataset snapshot.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Materialize one row in column order.
    pub fn row(&self, index: usize) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| c.values.get(index).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

/// Column-level type unification: keep numbers or dates only when every non-null cell agrees,
/// otherwise fall back to text so codes like `007` keep their spelling.
fn normalize_column(values: Vec<Value>) -> Vec<Value> {
    let inferred: Vec<Value> = values
        .iter()
        .map(|v| match v {
            Value::Text(s) => Value::infer(s),
            other => other.clone(),
        })
        .collect();

    let non_null: Vec<&Value> = inferred.iter().filter(|v| !v.is_null()).collect();
    let all_numbers = !non_null.is_empty() && non_null.iter().all(|v| matches!(v, Value::Number(_)));
    let all_dates = !non_null.is_empty() && non_null.iter().all(|v| matches!(v, Value::Date(_)));

    if all_numbers || all_dates {
        return inferred;
    }

    values
        .into_iter()
        .zip(inferred)
        .map(|(original, inferred)| match (original, inferred) {
            (_, Value::Null) => Value::Null,
            (Value::Text(s), _) => Value::Text(s.trim().to_string()),
            (other, _) => Value::Text(other.to_string()),
        })
        .collect()
}

fn fingerprint(columns: &[Column], declared_kinds: &HashMap<String, ColumnKind>) -> String {
    let mut hasher = Sha256::new();
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update([0x1f]);
        for value in &column.values {
            let tag: u8 = match value {
                Value::Null => 0,
                Value::Number(_) => 1,
                Value::Date(_) => 2,
                Value::Text(_) => 3,
            };
            hasher.update([tag]);
            hasher.update(value.to_string().as_bytes());
            hasher.update([0x1e]);
        }
        hasher.update([0x1d]);
    }
    let mut declared: Vec<_> = declared_kinds.iter().collect();
    declared.sort_by(|a, b| a.0.cmp(b.0));
    for (name, kind) in declared {
        hasher.update(name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}
