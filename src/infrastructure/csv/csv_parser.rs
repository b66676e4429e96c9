// ============================================================
// CSV PARSER
// ============================================================
// Turn uploaded CSV bytes into a dataset payload

use crate::domain::dataset::DatasetInput;
use crate::domain::error::{AppError, Result};
use crate::domain::value::Value;
use csv::{ReaderBuilder, Trim};
use encoding_rs::WINDOWS_1252;
use std::borrow::Cow;
use tracing::{debug, warn};

const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

/// CSV reader with delimiter and encoding detection
pub struct CsvParser {
    /// Delimiter character; detected from the content when unset
    delimiter: Option<u8>,

    /// Whether to trim whitespace from values
    trim: bool,

    /// Maximum number of data rows accepted
    max_rows: usize,
}

impl Default for CsvParser {
    fn default() -> Self {
        Self {
            delimiter: None,
            trim: true,
            max_rows: 1_000_000,
        }
    }
}

impl CsvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Decode as UTF-8 (BOM tolerated), falling back to Windows-1252
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<DatasetInput> {
        let content = decode(bytes);
        self.parse_content(&content)
    }

    pub fn parse_content(&self, content: &str) -> Result<DatasetInput> {
        let delimiter = self
            .delimiter
            .unwrap_or_else(|| Self::detect_delimiter(content));

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(if self.trim { Trim::All } else { Trim::None })
            .flexible(true)
            .from_reader(content.as_bytes());

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| AppError::ParseError(format!("Failed to read CSV headers: {}", e)))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        if columns.iter().all(|c| c.is_empty()) {
            return Err(AppError::ParseError("CSV has no header row".to_string()));
        }

        let mut rows = Vec::new();
        let mut ragged = 0usize;

        for (index, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                AppError::ParseError(format!("Failed to parse CSV row {}: {}", index + 1, e))
            })?;
            if rows.len() >= self.max_rows {
                return Err(AppError::ValidationError(format!(
                    "CSV exceeds the limit of {} rows",
                    self.max_rows
                )));
            }
            if record.len() != columns.len() {
                ragged += 1;
            }

            let row: Vec<Value> = (0..columns.len())
                .map(|i| match record.get(i) {
                    Some(cell) if !cell.is_empty() => Value::Text(cell.to_string()),
                    _ => Value::Null,
                })
                .collect();
            rows.push(row);
        }

        if ragged > 0 {
            warn!(rows = ragged, "CSV rows with a different field count were padded or truncated");
        }
        debug!(
            delimiter = %(delimiter as char).escape_default(),
            columns = columns.len(),
            rows = rows.len(),
            "Parsed CSV"
        );

        Ok(DatasetInput {
            columns,
            rows,
            declared_kinds: Default::default(),
        })
    }

    /// Detect delimiter from content (comma, semicolon, tab, pipe)
    pub fn detect_delimiter(content: &str) -> u8 {
        let sample: Vec<&str> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .take(10)
            .collect();
        if sample.is_empty() {
            return b',';
        }

        let mut best = b',';
        let mut best_score = 0.0f32;

        for &delimiter in &DELIMITER_CANDIDATES {
            let counts: Vec<f32> = sample
                .iter()
                .map(|line| line.bytes().filter(|&b| b == delimiter).count() as f32)
                .collect();

            // Frequent and consistent across lines wins
            let avg = counts.iter().sum::<f32>() / counts.len() as f32;
            let variance =
                counts.iter().map(|c| (c - avg).powi(2)).sum::<f32>() / counts.len() as f32;
            let score = avg / (1.0 + variance.sqrt());

            if score > best_score {
                best_score = score;
                best = delimiter;
            }
        }
        best
    }
}

fn decode(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            debug!("CSV is not valid UTF-8; decoding as Windows-1252");
            let (text, _, _) = WINDOWS_1252.decode(bytes);
            text
        }
    }
}
