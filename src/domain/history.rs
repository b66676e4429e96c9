use super::error::{AppError, Result};
use super::execution::ResultSummary;
use super::operation::StructuredOperation;
use serde::{Deserialize, Serialize};

pub const HISTORY_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub query: String,
    pub operation: StructuredOperation,
    pub summary: ResultSummary,
    pub explanation: String,
}

/// Append-only record of executed queries for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHistory {
    pub version: u32,
    pub entries: Vec<HistoryEntry>,
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self {
            version: HISTORY_FORMAT_VERSION,
            entries: Vec::new(),
        }
    }
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        query: &str,
        operation: StructuredOperation,
        summary: ResultSummary,
        explanation: String,
    ) -> &HistoryEntry {
        let sequence = self.entries.last().map(|e| e.sequence + 1).unwrap_or(1);
        self.entries.push(HistoryEntry {
            sequence,
            query: query.to_string(),
            operation,
            summary,
            explanation,
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Internal(format!("Failed to serialize history: {}", e)))
    }

    /// Decode a saved history. Operations are not checked here; replay validates them against
    /// the session's current dataset.
    pub fn from_json(json: &str) -> Result<Self> {
        let history: SessionHistory = serde_json::from_str(json)
            .map_err(|e| AppError::ParseError(format!("Invalid session history: {}", e)))?;

        if history.version != HISTORY_FORMAT_VERSION {
            return Err(AppError::ValidationError(format!(
                "Unsupported history version {} (expected {})",
                history.version, HISTORY_FORMAT_VERSION
            )));
        }

        let mut previous = 0;
        for entry in &history.entries {
            if entry.sequence <= previous {
                return Err(AppError::ValidationError(format!(
                    "History entries out of order at sequence {}",
                    entry.sequence
                )));
            }
            previous = entry.sequence;
        }

        Ok(history)
    }
}
