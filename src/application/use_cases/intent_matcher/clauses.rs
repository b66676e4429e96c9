//! Query text handling: normalization, clause modifiers, conditions and sort keys.

use super::vocabulary::{
    parse_comparator, parse_count, parse_direction, COMPARATOR_PATTERN, DIRECTION_PATTERN,
};
use crate::domain::operation::{Comparator, SortDirection};
use once_cell::sync::Lazy;
use regex::{Match, Regex};
use std::ops::Range;

static MODIFIER_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)(where|sorted by|ordered by|order by|limit)(?:\s|$)").unwrap());

static LIMIT_CLAUSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^limit\s+(\d+)(?:\s+rows)?$").unwrap());

static SYMBOL_CONDITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<col>.+?)\s*(?P<op>>=|<=|!=|<>|==|=|>|<)\s*(?P<val>.+)$").unwrap()
});

static WORD_CONDITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?P<col>.+?)\s+(?:is\s+)?(?P<op>{})\s+(?P<val>.+)$",
        COMPARATOR_PATTERN.as_str()
    ))
    .unwrap()
});

static SORT_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?P<col>.+?)(?:\s+(?P<dir>{}))?$",
        DIRECTION_PATTERN.as_str()
    ))
    .unwrap()
});

static LIST_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*,\s*|\s+(?:and|then)\s+").unwrap());

static CONDITION_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*,\s*|\s+and\s+").unwrap());

/// Query after normalization: collapsed whitespace, no trailing punctuation. `lower` is the
/// ASCII-lowercased form used for matching; `original` keeps the user's casing for values.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedQuery {
    lower: String,
    original: String,
}

impl NormalizedQuery {
    pub fn new(raw: &str) -> Self {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let original = collapsed
            .trim_end_matches(|c: char| matches!(c, '?' | '.' | '!' | ';' | ',') || c.is_whitespace())
            .to_string();
        Self {
            lower: original.to_ascii_lowercase(),
            original,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.lower
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn text(&self) -> QueryText<'_> {
        QueryText {
            lower: &self.lower,
            original: &self.original,
        }
    }
}

/// Aligned view over both forms of a query; byte offsets are shared since lowercasing is ASCII-only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryText<'q> {
    pub lower: &'q str,
    pub original: &'q str,
}

impl<'q> QueryText<'q> {
    pub fn slice(&self, range: Range<usize>) -> QueryText<'q> {
        QueryText {
            lower: &self.lower[range.clone()],
            original: &self.original[range],
        }
    }

    /// Original-case text of a capture taken on `lower`
    pub fn original_of(&self, m: Match<'_>) -> &'q str {
        &self.original[m.range()]
    }

    pub fn capture(&self, m: Match<'_>) -> QueryText<'q> {
        self.slice(m.range())
    }

    pub fn trim(&self) -> QueryText<'q> {
        let start = self.lower.len() - self.lower.trim_start().len();
        let end = self.lower.trim_end().len().max(start);
        self.slice(start..end)
    }

    pub fn is_empty(&self) -> bool {
        self.lower.trim().is_empty()
    }

    /// Split on a separator pattern, dropping empty pieces
    pub fn split(&self, separator: &Regex) -> Vec<QueryText<'q>> {
        let mut pieces = Vec::new();
        let mut start = 0;
        for m in separator.find_iter(self.lower) {
            pieces.push(self.slice(start..m.start()).trim());
            start = m.end();
        }
        pieces.push(self.slice(start..self.lower.len()).trim());
        pieces.into_iter().filter(|p| !p.is_empty()).collect()
    }

    /// Comma / "and" / "then" separated list
    pub fn split_list(&self) -> Vec<QueryText<'q>> {
        self.split(&LIST_SEPARATOR)
    }
}

/// `column comparator value`, e.g. "units over 10"
#[derive(Debug, Clone, PartialEq)]
pub struct Condition<'q> {
    pub column: &'q str,
    pub comparator: Comparator,
    /// Original casing, quotes removed
    pub value: &'q str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortPhrase<'q> {
    pub column: &'q str,
    pub direction: Option<SortDirection>,
}

/// Trailing clause split off the core phrase
#[derive(Debug, Clone, PartialEq)]
pub enum Modifier<'q> {
    Where(Vec<Condition<'q>>),
    OrderBy(Vec<SortPhrase<'q>>),
    Limit(usize),
}

pub fn parse_condition(text: QueryText<'_>) -> Option<Condition<'_>> {
    let text = text.trim();
    let caps = SYMBOL_CONDITION
        .captures(text.lower)
        .or_else(|| WORD_CONDITION.captures(text.lower))?;

    let column = caps.name("col")?;
    let comparator = parse_comparator(caps.name("op")?.as_str())?;
    let value = text
        .original_of(caps.name("val")?)
        .trim()
        .trim_matches(|c| c == '"' || c == '\'');
    if value.is_empty() {
        return None;
    }

    Some(Condition {
        column: &text.lower[column.range()],
        comparator,
        value,
    })
}

/// All conditions of an `a and b` list, or None if any piece is not a condition
pub fn parse_conditions(text: QueryText<'_>) -> Option<Vec<Condition<'_>>> {
    text.split(&CONDITION_SEPARATOR)
        .into_iter()
        .map(parse_condition)
        .collect()
}

pub fn parse_sort_phrases(text: QueryText<'_>) -> Vec<SortPhrase<'_>> {
    text.split_list()
        .into_iter()
        .filter_map(|piece| {
            let caps = SORT_PHRASE.captures(piece.lower)?;
            let column = caps.name("col")?;
            Some(SortPhrase {
                column: &piece.lower[column.range()],
                direction: caps.name("dir").and_then(|d| parse_direction(d.as_str())),
            })
        })
        .collect()
}

/// Peel trailing `where …`, `sorted by …`, `limit N` clauses off the query, innermost last.
/// A clause that does not parse stays part of the core phrase.
pub fn split_modifiers(text: QueryText<'_>) -> (QueryText<'_>, Vec<Modifier<'_>>) {
    let mut core = text.trim();
    let mut modifiers = Vec::new();

    loop {
        let Some(caps) = MODIFIER_KEYWORD.captures_iter(core.lower).last() else {
            break;
        };
        let Some(keyword) = caps.get(1) else {
            break;
        };

        let tail = core.slice(keyword.start()..core.lower.len());
        let body = core.slice(keyword.end()..core.lower.len()).trim();

        let modifier = match keyword.as_str() {
            "where" => parse_conditions(body).map(Modifier::Where),
            "limit" => parse_limit(tail),
            _ => {
                let keys = parse_sort_phrases(body);
                (!keys.is_empty()).then_some(Modifier::OrderBy(keys))
            }
        };

        match modifier {
            Some(modifier) => {
                modifiers.push(modifier);
                core = core.slice(0..keyword.start()).trim();
            }
            None => break,
        }
    }

    modifiers.reverse();
    (core, modifiers)
}

fn parse_limit(tail: QueryText<'_>) -> Option<Modifier<'_>> {
    LIMIT_CLAUSE
        .captures(tail.lower)
        .and_then(|caps| parse_count(caps.get(1)?.as_str()))
        .filter(|n| *n > 0)
        .map(Modifier::Limit)
}
