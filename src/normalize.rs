// src/normalize.rs

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::OnceLock;

/// Sentinel the accounting export writes for missing values.
const NULL_SENTINEL: &str = "NULL";

/// Date layouts tried in order. Month comes before day whenever the
/// layout alone cannot tell them apart. `%Y` layouts only apply to input
/// carrying a four-digit run, see [`parse_date_with`].
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%Y%m%d",
    "%m/%d/%y",
    "%m-%d-%y",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%m.%d.%Y",
    "%d-%b-%y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %H:%M",
];

fn is_null_sentinel(s: &str) -> bool {
    s == NULL_SENTINEL
}

/// Clean one raw JSON scalar.
///
/// `"NULL"` and absent values become `Value::Null`. Strings are trimmed and
/// turned into numbers when the whole string parses as a finite float.
/// Anything else (numbers, booleans, nested objects) passes through.
pub fn normalize_scalar(v: Option<&Value>) -> Value {
    match v {
        None | Some(Value::Null) => Value::Null,
        Some(Value::String(s)) if is_null_sentinel(s) => Value::Null,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(trimmed.to_string()))
        }
        Some(other) => other.clone(),
    }
}

/// Normalize every entry of a JSON object except the nested collections
/// named in `skip`.
pub fn normalize_fields(obj: &Map<String, Value>, skip: &[&str]) -> Map<String, Value> {
    obj.iter()
        .filter(|(k, _)| !skip.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), normalize_scalar(Some(v))))
        .collect()
}

fn leading_number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+\.\d+|\d+)").expect("static regex"))
}

/// Leading magnitude of a unit-suffixed quantity such as `"14.000 Ton"`.
pub fn parse_quantity(s: &str) -> f64 {
    if s.is_empty() || is_null_sentinel(s) {
        return 0.0;
    }
    if let Some(m) = leading_number().find(s) {
        return m.as_str().parse().unwrap_or(0.0);
    }
    // Signed or space-padded values miss the anchored pattern.
    s.split_whitespace()
        .next()
        .and_then(|tok| tok.parse().ok())
        .unwrap_or(0.0)
}

/// Left-hand side of a per-unit rate such as `"59700.00/Ton"`.
pub fn parse_rate(s: &str) -> f64 {
    if s.is_empty() || is_null_sentinel(s) {
        return 0.0;
    }
    match s.split_once('/') {
        Some((lhs, _)) => lhs.trim().parse().unwrap_or(0.0),
        None => 0.0,
    }
}

/// Canonical `YYYY-MM-DD` for a loosely formatted date, month-first when
/// ambiguous.
pub fn parse_date(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() || is_null_sentinel(s) {
        return None;
    }
    let date = parse_date_with(s, DATE_FORMATS)
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .filter(|fmt| year_width_fits(s, fmt))
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| chrono::DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// First layout in `formats` that parses `s`.
///
/// chrono's `%Y` accepts one to four digits, so "01/05/24" would match
/// `%Y/%m/%d` as year 1. `%Y` layouts are skipped unless `s` holds a
/// four-digit run.
pub fn parse_date_with(s: &str, formats: &[&str]) -> Option<NaiveDate> {
    formats
        .iter()
        .filter(|fmt| year_width_fits(s, fmt))
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn year_width_fits(s: &str, fmt: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    !fmt.contains("%Y") || RE.get_or_init(|| Regex::new(r"\d{4}").expect("static regex")).is_match(s)
}

/// Quantity of an already-normalized value: numbers pass through, strings
/// go through [`parse_quantity`].
pub fn quantity_of(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_quantity(s),
        _ => 0.0,
    }
}

/// Rate of an already-normalized value.
pub fn rate_of(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_rate(s),
        _ => 0.0,
    }
}

/// Plain numeric field (amount, discount, total). Absent or unparsable is 0.0.
pub fn number_of(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Date of an already-normalized value. Numbers are never dates.
pub fn date_of(v: Option<&Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) => parse_date(s),
        _ => None,
    }
}

/// Text column taken from the raw (un-normalized) value so numeric-looking
/// identifiers such as voucher numbers keep their original spelling.
pub fn text_of(v: Option<&Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) if is_null_sentinel(s) => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

/// String form of a normalized value for tabular output. Null becomes "".
pub fn cell_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{f:?}"),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_scalar() {
        assert_eq!(normalize_scalar(Some(&json!("NULL"))), Value::Null);
        assert_eq!(normalize_scalar(None), Value::Null);
        assert_eq!(normalize_scalar(Some(&json!("42.5"))), json!(42.5));
        assert_eq!(normalize_scalar(Some(&json!(" 7 "))), json!(7.0));
        assert_eq!(normalize_scalar(Some(&json!("Acme Corp"))), json!("Acme Corp"));
        assert_eq!(normalize_scalar(Some(&json!("  Acme  "))), json!("Acme"));
        assert_eq!(normalize_scalar(Some(&json!(12))), json!(12));
        // Non-finite floats cannot live in JSON; they stay text.
        assert_eq!(normalize_scalar(Some(&json!("NaN"))), json!("NaN"));
    }

    #[test]
    fn test_normalize_fields_skips_nested() {
        let obj = json!({"VchNo": "PO-1", "Inventory Entries": [1, 2], "TotalAmount": "10"});
        let map = normalize_fields(obj.as_object().unwrap(), &["Inventory Entries"]);
        assert_eq!(map.len(), 2);
        assert_eq!(map["TotalAmount"], json!(10.0));
        assert!(!map.contains_key("Inventory Entries"));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("14.000 Ton"), 14.0);
        assert_eq!(parse_quantity("3 Nos"), 3.0);
        assert_eq!(parse_quantity("0.5Cum"), 0.5);
        assert_eq!(parse_quantity("-2 Ton"), -2.0);
        assert_eq!(parse_quantity("Ton"), 0.0);
        assert_eq!(parse_quantity(""), 0.0);
        assert_eq!(parse_quantity("NULL"), 0.0);
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("59700.00/Ton"), 59700.0);
        assert_eq!(parse_rate("500/Nos"), 500.0);
        assert_eq!(parse_rate("abc/Ton"), 0.0);
        assert_eq!(parse_rate("500"), 0.0);
        assert_eq!(parse_rate(""), 0.0);
        assert_eq!(parse_rate("NULL"), 0.0);
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2024-01-05").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("01/05/2024").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("5-Jan-2024").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("January 5, 2024").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("2024-01-05 10:30:00").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("2024-01-05T10:30:00Z").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("NULL"), None);
    }

    #[test]
    fn test_parse_date_two_digit_year() {
        assert_eq!(parse_date("01/05/24").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("01-05-24").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("1/5/24").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("5-Jan-24").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("20240105").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("2024/01/05 10:30").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("01/05/24 10:30").as_deref(), Some("2024-01-05"));
    }

    #[test]
    fn test_typed_accessors() {
        assert_eq!(quantity_of(Some(&json!(10.0))), 10.0);
        assert_eq!(quantity_of(Some(&json!("10.000 Ton"))), 10.0);
        assert_eq!(rate_of(Some(&json!("500.00/Ton"))), 500.0);
        assert_eq!(number_of(Some(&json!("n/a"))), 0.0);
        assert_eq!(number_of(None), 0.0);
        assert_eq!(date_of(Some(&json!(20240105.0))), None);
        assert_eq!(text_of(Some(&json!(100))).as_deref(), Some("100"));
        assert_eq!(text_of(Some(&json!("NULL"))), None);
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&Value::Null), "");
        assert_eq!(cell_text(&json!(5000.0)), "5000.0");
        assert_eq!(cell_text(&json!(3)), "3");
        assert_eq!(cell_text(&json!("Acme")), "Acme");
    }
}
