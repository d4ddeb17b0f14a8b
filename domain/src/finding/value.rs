//! Normalization of entity names and claim values for comparison

use crate::util::normalize_words;
use chrono::NaiveDate;

const CORPORATE_SUFFIXES: &[&str] = &[
    "inc",
    "corp",
    "corporation",
    "ltd",
    "llc",
    "co",
    "plc",
    "gmbh",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Normalize an entity name for grouping: lowercase, no punctuation, single
/// spaces, trailing corporate suffixes removed ("Acme Corp." -> "acme").
pub fn normalize_entity(name: &str) -> String {
    let normalized = normalize_words(name, &[]);
    let mut words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    while words.len() > 1
        && words
            .last()
            .is_some_and(|w| CORPORATE_SUFFIXES.contains(w))
    {
        words.pop();
    }
    words.join(" ")
}

/// Normalize an aspect label: "Registration Date" and "registration_date" match.
pub fn normalize_aspect(aspect: &str) -> String {
    normalize_words(&aspect.replace(['_', '-'], " "), &[])
}

/// The comparable value a finding's content asserts.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimValue {
    Date(NaiveDate),
    Number(f64),
    Text(String),
}

impl ClaimValue {
    /// Classify `content` as a date, a number or free text.
    pub fn parse(content: &str) -> Self {
        let trimmed = content.trim();
        if let Some(date) = parse_date(trimmed) {
            return ClaimValue::Date(date);
        }
        if let Some(number) = parse_number(trimmed) {
            return ClaimValue::Number(number);
        }
        ClaimValue::Text(normalize_words(trimmed, &['.', '%']))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClaimValue::Date(_) => "date",
            ClaimValue::Number(_) => "number",
            ClaimValue::Text(_) => "text",
        }
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
}

fn parse_number(s: &str) -> Option<f64> {
    let mut cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '¥' | ',' | ' ' | '%'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let multiplier = match cleaned.chars().last().map(|c| c.to_ascii_lowercase()) {
        Some('k') => 1e3,
        Some('m') => 1e6,
        Some('b') => 1e9,
        _ => 1.0,
    };
    if multiplier != 1.0 {
        cleaned.pop();
    }

    cleaned
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(|n| n * multiplier)
}

/// Relative difference between two numbers, scaled by the larger magnitude.
pub fn relative_difference(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        0.0
    } else {
        (a - b).abs() / scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_entity_strips_suffixes() {
        assert_eq!(normalize_entity("Acme Corp"), "acme");
        assert_eq!(normalize_entity("  ACME,  Inc. "), "acme");
        assert_eq!(normalize_entity("Globex Holdings Ltd"), "globex holdings");
        // A bare suffix is still a name.
        assert_eq!(normalize_entity("Co"), "co");
    }

    #[test]
    fn test_normalize_aspect() {
        assert_eq!(normalize_aspect("Registration Date"), "registration date");
        assert_eq!(normalize_aspect("registration_date"), "registration date");
    }

    #[test]
    fn test_parse_dates() {
        let expected = NaiveDate::from_ymd_opt(2018, 3, 15).unwrap();
        for input in ["2018-03-15", "2018/03/15", "March 15, 2018", "15 March 2018", "Mar 15, 2018"] {
            assert_eq!(ClaimValue::parse(input), ClaimValue::Date(expected), "{input}");
        }
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(ClaimValue::parse("$1,250,000"), ClaimValue::Number(1_250_000.0));
        assert_eq!(ClaimValue::parse("4.5M"), ClaimValue::Number(4_500_000.0));
        assert_eq!(ClaimValue::parse("12%"), ClaimValue::Number(12.0));
        assert_eq!(ClaimValue::parse("250k"), ClaimValue::Number(250_000.0));
    }

    #[test]
    fn test_parse_text() {
        assert_eq!(
            ClaimValue::parse("  Delaware,  USA "),
            ClaimValue::Text("delaware usa".into())
        );
        assert_eq!(ClaimValue::parse("k").kind(), "text");
    }

    #[test]
    fn test_relative_difference() {
        assert_eq!(relative_difference(0.0, 0.0), 0.0);
        assert!((relative_difference(100.0, 95.0) - 0.05).abs() < 1e-12);
        assert_eq!(relative_difference(-10.0, 10.0), 2.0);
    }
}
