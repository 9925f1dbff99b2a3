// src/heuristics/mod.rs

mod generic;

use crate::errors::ExtractError;
use crate::invoice::RawInvoice;
use crate::llm_extract::InvoiceExtractor;
use async_trait::async_trait;

/// Extract invoice fields from OCR text with regex patterns only.
pub fn extract_invoice(text: &str) -> RawInvoice {
    generic::extract(text)
}

/// Offline extractor, also the fallback when the model is unreachable.
pub struct HeuristicExtractor;

#[async_trait]
impl InvoiceExtractor for HeuristicExtractor {
    fn name(&self) -> &'static str {
        "heuristics"
    }

    async fn extract(&self, text: &str) -> Result<RawInvoice, ExtractError> {
        Ok(extract_invoice(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEIGHBRIDGE_BILL: &str = "\
SRI BALAJI AGGREGATES
No 12, Quarry Road, Hosur
GSTIN: 33ABCDE1234F1Z5
Invoice No: SBA/245   Date: 09/03/2024
Vehicle No: TN 09 AB 1234
Token No: 5521
Description: 20mm Blue Metal
Empty Weight: 12,450 kg
Load Weight: 30,950 kg
Net Weight: 18,500 kg
CGST @ 2.5%: 462.50
SGST @ 2.5%: 462.50
Round Off: -0.40
Grand Total: 19,424.60
Rupees Nineteen Thousand Four Hundred Twenty Four Only
";

    #[test]
    fn test_weighbridge_bill() {
        let fields = extract_invoice(WEIGHBRIDGE_BILL).clean(None);
        assert_eq!(fields.supplier.as_deref(), Some("SRI BALAJI AGGREGATES"));
        assert_eq!(fields.address.as_deref(), Some("No 12, Quarry Road, Hosur"));
        assert_eq!(fields.gstin.as_deref(), Some("33ABCDE1234F1Z5"));
        assert_eq!(fields.invoice_no.as_deref(), Some("SBA/245"));
        assert_eq!(fields.invoice_date.as_deref(), Some("2024-03-09"));
        assert_eq!(fields.vehicle_number.as_deref(), Some("TN09AB1234"));
        assert_eq!(fields.token_no.as_deref(), Some("5521"));
        assert_eq!(fields.description.as_deref(), Some("20mm Blue Metal"));
        assert_eq!(fields.empty_weight, Some(12450.0));
        assert_eq!(fields.load_weight, Some(30950.0));
        assert_eq!(fields.net_weight, Some(18500.0));
        assert_eq!(fields.cgst, Some(462.5));
        assert_eq!(fields.sgst, Some(462.5));
        assert_eq!(fields.round_off, Some(-0.4));
        assert_eq!(fields.total, Some(19424.6));
        assert_eq!(
            fields.amount_in_words.as_deref(),
            Some("Rupees Nineteen Thousand Four Hundred Twenty Four Only")
        );
        assert_eq!(fields.qty, None);
    }

    #[test]
    fn test_unlabelled_text() {
        let fields = extract_invoice("thank you for your business").clean(Some("KA01AB1234"));
        assert_eq!(fields.supplier.as_deref(), Some("thank you for your business"));
        assert_eq!(fields.vehicle_number.as_deref(), Some("KA01AB1234"));
        assert_eq!(fields.total, None);
        assert_eq!(fields.gstin, None);
    }

    #[tokio::test]
    async fn test_heuristic_extractor() {
        let raw = HeuristicExtractor.extract(WEIGHBRIDGE_BILL).await.unwrap();
        assert_eq!(raw.token_no, serde_json::json!("5521"));
    }
}
