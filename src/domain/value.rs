// ============================================================
// CELL VALUES AND TIME GRAINS
// ============================================================
// Typed cell values shared by the dataset, operations and results

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

static QUARTER_LABEL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<y1>\d{4})[-\s]?)?q(?P<q1>[1-4])$|^q(?P<q2>[1-4])[-\s]?(?P<y2>\d{4})$")
        .unwrap()
});

static YEAR_MONTH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<y>\d{4})[-/](?P<m>0[1-9]|1[0-2])$").unwrap());

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// A single cell.
///
/// Untagged on the wire: `null`, a JSON number, or a string. Dates serialize as
/// `YYYY-MM-DD` strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => parse_number(s),
            _ => None,
        }
    }

    /// Infer a typed value from raw text. Empty text becomes `Null`.
    pub fn infer(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Some(n) = parse_number(trimmed) {
            return Value::Number(n);
        }
        if let Some(d) = parse_date(trimmed) {
            return Value::Date(d);
        }
        Value::Text(trimmed.to_string())
    }

    /// Lower-cased rendering used for case-insensitive text comparison.
    pub fn folded(&self) -> String {
        self.to_string().to_lowercase()
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Number(_) => 0,
            Value::Date(_) => 1,
            Value::Text(_) => 2,
            Value::Null => 3,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Total order over values: numbers, then dates, then text, with nulls last.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => compare_text(x, y),
        _ => a.type_rank().cmp(&b.type_rank()),
    }
}

/// Text comparison that orders temporal labels (`2024-Q1`, `Q3`) chronologically.
fn compare_text(a: &str, b: &str) -> Ordering {
    match (temporal_label_key(a), temporal_label_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

/// Parse a number, tolerating thousands separators.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    trimmed
        .parse::<f64>()
        .ok()
        .or_else(|| trimmed.replace(',', "").parse::<f64>().ok())
        .filter(|n| n.is_finite())
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt.date());
        }
    }
    chrono::DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Whether the text is a period label such as `Q2`, `2024-Q2` or `2024-03`.
pub fn is_temporal_label(raw: &str) -> bool {
    temporal_label_key(raw).is_some()
}

/// Sort key for period labels: (year, month-of-period-start). Labels without a year sort by
/// period only.
fn temporal_label_key(raw: &str) -> Option<(i32, u32)> {
    let lower = raw.trim().to_lowercase();
    if let Some(caps) = QUARTER_LABEL_PATTERN.captures(&lower) {
        let year = caps
            .name("y1")
            .or_else(|| caps.name("y2"))
            .and_then(|m| m.as_str().parse::<i32>().ok())
            .unwrap_or(0);
        let quarter = caps
            .name("q1")
            .or_else(|| caps.name("q2"))
            .and_then(|m| m.as_str().parse::<u32>().ok())?;
        return Some((year, (quarter - 1) * 3 + 1));
    }
    if let Some(caps) = YEAR_MONTH_PATTERN.captures(&lower) {
        let year = caps["y"].parse::<i32>().ok()?;
        let month = caps["m"].parse::<u32>().ok()?;
        return Some((year, month));
    }
    None
}

/// Granularity used to bucket temporal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGrain {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    pub fn parse(word: &str) -> Option<Self> {
        match word.trim().to_lowercase().as_str() {
            "day" | "days" | "daily" => Some(TimeGrain::Day),
            "week" | "weeks" | "weekly" => Some(TimeGrain::Week),
            "month" | "months" | "monthly" => Some(TimeGrain::Month),
            "quarter" | "quarters" | "quarterly" => Some(TimeGrain::Quarter),
            "year" | "years" | "yearly" | "annual" | "annually" => Some(TimeGrain::Year),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }

    pub fn label(&self, date: NaiveDate) -> String {
        match self {
            TimeGrain::Day => date.format("%Y-%m-%d").to_string(),
            TimeGrain::Week => {
                let iso = date.iso_week();
                format!("{}-W{:02}", iso.year(), iso.week())
            }
            TimeGrain::Month => date.format("%Y-%m").to_string(),
            TimeGrain::Quarter => format!("{}-Q{}", date.year(), (date.month() - 1) / 3 + 1),
            TimeGrain::Year => date.year().to_string(),
        }
    }

    /// Bucket a cell to this grain. Dates and `YYYY-MM` labels are coarsened; other values
    /// are already period labels and pass through unchanged.
    pub fn bucket(&self, value: &Value) -> Value {
        match value {
            Value::Date(d) => Value::Text(self.label(*d)),
            Value::Text(s) => match YEAR_MONTH_PATTERN.captures(s.trim()) {
                Some(caps) if matches!(self, TimeGrain::Quarter | TimeGrain::Year) => {
                    let year = caps["y"].parse::<i32>().unwrap_or(0);
                    let month = caps["m"].parse::<u32>().unwrap_or(1);
                    match NaiveDate::from_ymd_opt(year, month, 1) {
                        Some(d) => Value::Text(self.label(d)),
                        None => value.clone(),
                    }
                }
                _ => value.clone(),
            },
            other => other.clone(),
        }
    }

    /// The date one period earlier.
    pub fn previous(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            TimeGrain::Day => date.pred_opt(),
            TimeGrain::Week => date.checked_sub_signed(chrono::Duration::days(7)),
            TimeGrain::Month => date.checked_sub_months(Months::new(1)),
            TimeGrain::Quarter => date.checked_sub_months(Months::new(3)),
            TimeGrain::Year => date.checked_sub_months(Months::new(12)),
        }
    }
}

impl fmt::Display for TimeGrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_values() {
        assert_eq!(Value::infer(""), Value::Null);
        assert_eq!(Value::infer("1,250.5"), Value::Number(1250.5));
        assert_eq!(
            Value::infer("2024-02-29"),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(Value::infer(" North "), Value::Text("North".to_string()));
    }

    #[test]
    fn test_display_drops_integer_fraction() {
        assert_eq!(Value::Number(5.0).to_string(), "5");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
    }

    #[test]
    fn test_quarter_labels_sort_chronologically() {
        let a = Value::Text("2023-Q4".to_string());
        let b = Value::Text("2024-Q1".to_string());
        assert_eq!(compare_values(&a, &b), Ordering::Less);
        assert!(is_temporal_label("Q3"));
        assert!(is_temporal_label("2024q2"));
        assert!(!is_temporal_label("North"));
    }

    #[test]
    fn test_bucket_dates() {
        let date = Value::Date(NaiveDate::from_ymd_opt(2024, 5, 17).unwrap());
        assert_eq!(TimeGrain::Quarter.bucket(&date), Value::Text("2024-Q2".to_string()));
        assert_eq!(TimeGrain::Month.bucket(&date), Value::Text("2024-05".to_string()));
        assert_eq!(TimeGrain::Year.bucket(&date), Value::Text("2024".to_string()));
        assert_eq!(
            TimeGrain::Quarter.bucket(&Value::Text("2024-11".to_string())),
            Value::Text("2024-Q4".to_string())
        );
    }

    #[test]
    fn test_nulls_sort_after_everything() {
        assert_eq!(
            compare_values(&Value::Number(1.0), &Value::Null),
            Ordering::Less
        );
    }
}
