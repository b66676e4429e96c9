use super::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inferred role of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Temporal,
    Categorical,
    Numeric,
    Identifier,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Temporal => "temporal",
            ColumnKind::Categorical => "categorical",
            ColumnKind::Numeric => "numeric",
            ColumnKind::Identifier => "identifier",
        }
    }

    /// Whether the column can act as a grouping dimension.
    pub fn is_dimension(&self) -> bool {
        !matches!(self, ColumnKind::Numeric)
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    pub distinct_count: usize,
    pub null_count: usize,
    /// Up to a handful of distinct values, in first-seen order.
    pub sample_values: Vec<Value>,
    pub min_value: Option<Value>,
    pub max_value: Option<Value>,
    /// Whether the cells hold calendar dates (as opposed to period labels or numbers).
    pub holds_dates: bool,
}

/// Profile of one dataset snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaProfile {
    pub fingerprint: String,
    pub row_count: usize,
    pub columns: Vec<ColumnProfile>,
}

impl SchemaProfile {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn columns_of_kind(&self, kind: ColumnKind) -> impl Iterator<Item = &ColumnProfile> {
        self.columns.iter().filter(move |c| c.kind == kind)
    }

    /// Compact `name (kind)` listing used in model prompts.
    pub fn summary(&self) -> String {
        self.columns
            .iter()
            .map(|c| {
                let samples = c
                    .sample_values
                    .iter()
                    .take(3)
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>();
                if samples.is_empty() {
                    format!("- {} ({})", c.name, c.kind)
                } else {
                    format!("- {} ({}; e.g. {})", c.name, c.kind, samples.join(", "))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
