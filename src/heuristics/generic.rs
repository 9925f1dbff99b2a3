use crate::invoice::RawInvoice;
use crate::normalize::parse_date_with;
use regex::Regex;
use serde_json::Value;

/// Day-first layouts printed on local supplier bills and weighbridge slips.
const BILL_DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d/%m/%y", "%d-%m-%y", "%d.%m.%y", "%Y-%m-%d",
];

/// Words that mark a line as the supplier's trading name.
const SUPPLIER_MARKERS: &str =
    r"(?i)\b(?:AGGREGATES|TRADERS|ENTERPRISES|INDUSTRIES|SUPPLIERS|CONSTRUCTIONS?|CEMENTS?|STEELS?|BLUE\s+METALS?|LTD\.?|LIMITED)\b";

/// Keyword-anchored regex extraction.
pub fn extract(text: &str) -> RawInvoice {
    let supplier_line = supplier_line(text);
    RawInvoice {
        supplier: text_value(supplier_line.map(|(_, line)| line.to_string())),
        address: text_value(supplier_line.and_then(|(idx, _)| address_after(text, idx))),
        gstin: text_value(capture(text, r"\b(\d{2}[A-Z]{5}\d{4}[A-Z][1-9A-Z]Z[0-9A-Z])\b")),
        invoice_no: text_value(capture(
            text,
            r"(?i)(?:Invoice|Bill)\s*(?:No\.?|Number|#)\s*:?\s*([A-Za-z0-9\-/]+)",
        )),
        invoice_date: text_value(extract_bill_date(text)),
        vehicle_number: text_value(extract_vehicle_number(text)),
        token_no: text_value(capture(text, r"(?i)Token\s*(?:No\.?)?\s*:?\s*([A-Za-z0-9\-]+)")),
        description: text_value(capture(text, r"(?i)\b(?:Description|Material|Item)\b\s*:\s*(.+)")),
        qty: text_value(capture(text, r"(?i)\bQty\b\.?\s*:?\s*([\d,]+(?:\.\d+)?)")),
        rate: text_value(capture(text, r"(?i)\bRate\b\s*:?\s*(?:Rs\.?|₹)?\s*([\d,]+(?:\.\d+)?)")),
        amount: text_value(capture(
            text,
            r"(?i)\b(?:Taxable\s+)?Amount\b\s*:?\s*(?:Rs\.?|₹)?\s*([\d,]+(?:\.\d+)?)",
        )),
        empty_weight: text_value(capture(
            text,
            r"(?i)(?:Empty|Tare)\s*(?:Weight|Wt\.?)?\s*:?\s*([\d,]+(?:\.\d+)?)",
        )),
        load_weight: text_value(capture(
            text,
            r"(?i)(?:Load(?:ed)?|Gross)\s*(?:Weight|Wt\.?)?\s*:?\s*([\d,]+(?:\.\d+)?)",
        )),
        net_weight: text_value(capture(text, r"(?i)Net\s*(?:Weight|Wt\.?)\s*:?\s*([\d,]+(?:\.\d+)?)")),
        tax: text_value(capture(
            text,
            r"(?i)\b(?:Total\s+)?Tax\b(?:\s+Amount)?\s*:?\s*(?:Rs\.?|₹)?\s*([\d,]+(?:\.\d+)?)",
        )),
        cgst: text_value(capture(
            text,
            r"(?i)CGST(?:\s*@\s*[\d.]+\s*%)?\s*:?\s*(?:Rs\.?|₹)?\s*([\d,]+(?:\.\d+)?)",
        )),
        sgst: text_value(capture(
            text,
            r"(?i)SGST(?:\s*@\s*[\d.]+\s*%)?\s*:?\s*(?:Rs\.?|₹)?\s*([\d,]+(?:\.\d+)?)",
        )),
        round_off: text_value(capture(text, r"(?i)Round(?:ing)?\s*Off\s*:?\s*(-?[\d.]+)")),
        total: text_value(extract_grand_total(text)),
        amount_in_words: text_value(capture(text, r"(?i)((?:Rupees|INR)\s+[A-Za-z\s\-]+?\s+Only)")),
    }
}

fn text_value(v: Option<String>) -> Value {
    v.map(Value::String).unwrap_or(Value::Null)
}

fn capture(text: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Fields needing more than one pattern
// ---------------------------------------------------------------------------

/// First line carrying a trading-name marker, or the first non-empty line.
fn supplier_line(text: &str) -> Option<(usize, &str)> {
    let re = Regex::new(SUPPLIER_MARKERS).ok()?;
    let mut lines = text.lines().enumerate().map(|(i, l)| (i, l.trim())).filter(|(_, l)| !l.is_empty());
    let first = lines.clone().next();
    lines.find(|(_, l)| re.is_match(l)).or(first)
}

/// The line right below the supplier name, unless it is a labelled field.
fn address_after(text: &str, supplier_idx: usize) -> Option<String> {
    text.lines()
        .skip(supplier_idx + 1)
        .map(str::trim)
        .find(|l| !l.is_empty())
        .filter(|l| !l.contains(':'))
        .map(str::to_string)
}

fn extract_bill_date(text: &str) -> Option<String> {
    let raw = capture(
        text,
        r"(?i)\bDate\s*:?\s*(\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4}|\d{4}-\d{2}-\d{2})",
    )?;
    parse_date_with(&raw, BILL_DATE_FORMATS).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Indian registration plates, e.g. "TN 09 AB 1234", normalised to
/// "TN09AB1234". A labelled number wins over a bare match.
fn extract_vehicle_number(text: &str) -> Option<String> {
    const PLATE: &str = r"[A-Z]{2}[\s\-]?\d{1,2}[\s\-]?[A-Z]{1,3}[\s\-]?\d{1,4}";
    let raw = capture(text, &format!(r"(?i)Vehicle\s*(?:No\.?|Number)?\s*:?\s*({PLATE})"))
        .or_else(|| capture(text, &format!(r"\b({PLATE})\b")))?;
    Some(
        raw.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase(),
    )
}

/// Last "Total" on the bill; sub-totals come first.
fn extract_grand_total(text: &str) -> Option<String> {
    let re = Regex::new(
        r"(?i)(?:Grand\s+|Net\s+)?Total(?:\s+Amount)?\s*:?\s*(?:Rs\.?|₹|INR)?\s*([\d,]+(?:\.\d+)?)",
    )
    .ok()?;
    re.captures_iter(text).last().map(|c| c[1].to_string())
}
