// src/invoice.rs

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use tracing::warn;

/// Fields pulled out of a scanned supplier bill or weighbridge ticket, in
/// the shape stored in `invoice_items`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceFields {
    pub supplier: Option<String>,
    pub address: Option<String>,
    pub gstin: Option<String>,
    pub invoice_no: Option<String>,
    pub invoice_date: Option<String>,
    pub vehicle_number: Option<String>,
    pub token_no: Option<String>,
    pub description: Option<String>,
    pub qty: Option<f64>,
    pub rate: Option<f64>,
    pub amount: Option<f64>,
    pub empty_weight: Option<f64>,
    pub load_weight: Option<f64>,
    pub net_weight: Option<f64>,
    pub tax: Option<f64>,
    pub cgst: Option<f64>,
    pub sgst: Option<f64>,
    pub round_off: Option<f64>,
    pub total: Option<f64>,
    pub amount_in_words: Option<String>,
}

/// Loosely typed extraction output. Model replies put units, currency
/// symbols and thousands separators into numeric fields, so every field is
/// kept as raw JSON until [`RawInvoice::clean`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawInvoice {
    pub supplier: Value,
    pub address: Value,
    pub gstin: Value,
    pub invoice_no: Value,
    pub invoice_date: Value,
    pub vehicle_number: Value,
    pub token_no: Value,
    pub description: Value,
    pub qty: Value,
    pub rate: Value,
    pub amount: Value,
    pub empty_weight: Value,
    pub load_weight: Value,
    pub net_weight: Value,
    pub tax: Value,
    pub cgst: Value,
    pub sgst: Value,
    pub round_off: Value,
    pub total: Value,
    pub amount_in_words: Value,
}

fn non_numeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\d.\-]").expect("static regex"))
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Strip everything but digits, dots and minus signs, then parse.
pub fn clean_number(field: &str, v: &Value) -> Option<f64> {
    let raw = match v {
        Value::Null => return None,
        Value::Number(n) => return n.as_f64(),
        Value::String(s) if s.trim().is_empty() => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let stripped = non_numeric().replace_all(&raw, "");
    match stripped.parse::<f64>() {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(field, value = %raw, error = %e, "Failed to convert field to number");
            None
        }
    }
}

/// Keep the date only when it is already `YYYY-MM-DD`.
pub fn clean_date(v: &Value) -> Option<String> {
    let s = text(v)?;
    match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
        Ok(d) => Some(d.format("%Y-%m-%d").to_string()),
        Err(e) => {
            warn!(value = %s, error = %e, "Invalid invoice_date format");
            None
        }
    }
}

impl RawInvoice {
    /// Coerce into stored field types. `vehicle_number` from the upload
    /// form fills in when the document itself does not carry one.
    pub fn clean(&self, vehicle_number: Option<&str>) -> InvoiceFields {
        InvoiceFields {
            supplier: text(&self.supplier),
            address: text(&self.address),
            gstin: text(&self.gstin),
            invoice_no: text(&self.invoice_no),
            invoice_date: clean_date(&self.invoice_date),
            vehicle_number: text(&self.vehicle_number).or_else(|| {
                vehicle_number
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            }),
            token_no: text(&self.token_no),
            description: text(&self.description),
            qty: clean_number("qty", &self.qty),
            rate: clean_number("rate", &self.rate),
            amount: clean_number("amount", &self.amount),
            empty_weight: clean_number("empty_weight", &self.empty_weight),
            load_weight: clean_number("load_weight", &self.load_weight),
            net_weight: clean_number("net_weight", &self.net_weight),
            tax: clean_number("tax", &self.tax),
            cgst: clean_number("cgst", &self.cgst),
            sgst: clean_number("sgst", &self.sgst),
            round_off: clean_number("round_off", &self.round_off),
            total: clean_number("total", &self.total),
            amount_in_words: text(&self.amount_in_words),
        }
    }
}

impl InvoiceFields {
    /// How many fields were successfully extracted.
    pub fn coverage(&self) -> (usize, usize) {
        let filled = [
            self.supplier.is_some(),
            self.address.is_some(),
            self.gstin.is_some(),
            self.invoice_no.is_some(),
            self.invoice_date.is_some(),
            self.vehicle_number.is_some(),
            self.token_no.is_some(),
            self.description.is_some(),
            self.qty.is_some(),
            self.rate.is_some(),
            self.amount.is_some(),
            self.empty_weight.is_some(),
            self.load_weight.is_some(),
            self.net_weight.is_some(),
            self.tax.is_some(),
            self.cgst.is_some(),
            self.sgst.is_some(),
            self.round_off.is_some(),
            self.total.is_some(),
            self.amount_in_words.is_some(),
        ];
        (filled.iter().filter(|&&v| v).count(), filled.len())
    }

    pub fn is_empty(&self) -> bool {
        self.coverage().0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_numbers_strip_units() {
        assert_eq!(clean_number("total", &json!("₹ 1,250.50")), Some(1250.5));
        assert_eq!(clean_number("net_weight", &json!("14.20 MT")), Some(14.2));
        assert_eq!(clean_number("round_off", &json!("-0.40")), Some(-0.4));
        assert_eq!(clean_number("qty", &json!(12)), Some(12.0));
        assert_eq!(clean_number("qty", &json!("n/a")), None);
        assert_eq!(clean_number("qty", &Value::Null), None);
    }

    #[test]
    fn test_clean_date() {
        assert_eq!(clean_date(&json!("2024-03-09")).as_deref(), Some("2024-03-09"));
        assert_eq!(clean_date(&json!("09/03/2024")), None);
        assert_eq!(clean_date(&Value::Null), None);
    }

    #[test]
    fn test_vehicle_number_fallback() {
        let raw: RawInvoice = serde_json::from_value(json!({
            "supplier": "Sri Balaji Aggregates",
            "vehicle_number": "",
            "net_weight": "18.5 Ton"
        }))
        .unwrap();
        let fields = raw.clean(Some("KA01AB1234"));
        assert_eq!(fields.vehicle_number.as_deref(), Some("KA01AB1234"));
        assert_eq!(fields.net_weight, Some(18.5));
        assert_eq!(fields.coverage(), (3, 20));

        let raw: RawInvoice = serde_json::from_value(json!({"vehicle_number": "TN09X1"})).unwrap();
        assert_eq!(raw.clean(Some("KA01AB1234")).vehicle_number.as_deref(), Some("TN09X1"));
    }

    #[test]
    fn test_empty_fields() {
        assert!(RawInvoice::default().clean(None).is_empty());
    }
}
