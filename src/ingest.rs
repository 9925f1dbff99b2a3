// src/ingest.rs

use crate::config::AuditConfig;
use crate::csv_sink::{AppendSummary, CsvSink};
use crate::errors::{IngestError, RecordError};
use crate::fanout::{IngestReport, write_vouchers};
use crate::voucher_db::{AuditEntry, RecordStore};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, info_span, warn};

const AUDIT_MODULE: &str = "Purchase Orders";
const AUDIT_ACTION: &str = "Insert";
const AUDIT_ACTOR: &str = "System";

/// Response body of a voucher upload.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub status: &'static str,
    pub message: String,
    pub details: Vec<AppendSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip)]
    pub po_written: usize,
}

/// Parse an uploaded file and run it through [`ingest_document`].
pub fn ingest_bytes<S: RecordStore + ?Sized>(
    store: &S,
    sink: &CsvSink,
    audit: &AuditConfig,
    bytes: &[u8],
) -> Result<IngestSummary, IngestError> {
    let doc: Value = serde_json::from_slice(bytes).inspect_err(|e| {
        error!(error = %e, "Invalid JSON format");
    })?;
    ingest_document(store, sink, audit, &doc)
}

/// Fan the document's vouchers out into the store, log the purchase-order
/// count, then append the flattened rows to the CSV sink.
///
/// Per-record failures end up in `errors` of the summary. The call itself
/// fails only for a malformed document or when nothing at all was produced.
pub fn ingest_document<S: RecordStore + ?Sized>(
    store: &S,
    sink: &CsvSink,
    audit: &AuditConfig,
    doc: &Value,
) -> Result<IngestSummary, IngestError> {
    let vouchers = match doc.get("Voucher") {
        Some(Value::Array(vouchers)) => vouchers,
        Some(_) => return Err(IngestError::VoucherNotList),
        None => {
            error!("'Voucher' key missing in JSON");
            return Err(IngestError::MissingVoucherKey);
        }
    };

    let span = info_span!("ingest", vouchers = vouchers.len());
    let _enter = span.enter();

    let mut report = write_vouchers(store, vouchers);
    if report.po_written > 0 {
        record_upload(store, audit, &mut report);
    }
    let produced = report.produced_rows();
    let details = flush_groups(sink, &mut report);

    let errors = report.error_messages();
    if !errors.is_empty() {
        warn!(count = errors.len(), "Errors encountered during processing");
    }

    if !produced && report.po_written == 0 {
        warn!("No valid voucher type found and no purchase orders saved");
        return Err(IngestError::NothingProduced { errors });
    }

    info!(po_written = report.po_written, files = details.len(), "Request processed successfully");
    Ok(IngestSummary {
        status: "success",
        message: format!(
            "File processed: {} records saved to po_details table, all details saved to respective tables, data also saved to CSVs.",
            report.po_written
        ),
        details,
        errors,
        po_written: report.po_written,
    })
}

fn record_upload<S: RecordStore + ?Sized>(store: &S, audit: &AuditConfig, report: &mut IngestReport) {
    let entry = AuditEntry {
        branch: audit.branch.clone(),
        module: AUDIT_MODULE.to_string(),
        action: AUDIT_ACTION.to_string(),
        actor: AUDIT_ACTOR.to_string(),
        detail: format!("Uploaded {} records to po_details", report.po_written),
        source_address: audit.source_address.clone(),
        timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    };
    if let Err(e) = store.record_audit(&entry) {
        let err = RecordError::AuditLog(e);
        error!(error = %err, "Audit log write failed");
        report.errors.push(err);
    }
}

fn flush_groups(sink: &CsvSink, report: &mut IngestReport) -> Vec<AppendSummary> {
    let mut details = Vec::new();
    for (category, rows) in &report.groups {
        if rows.is_empty() {
            continue;
        }
        match sink.append_rows(*category, rows) {
            Ok(summary) => details.push(summary),
            Err(source) => {
                let err = RecordError::CsvSink { category: category.label().to_string(), source };
                error!(error = %err, "CSV append failed");
                report.errors.push(err);
            }
        }
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::VoucherCategory;
    use crate::errors::Entity;
    use crate::fanout::testing::FlakyStore;
    use crate::voucher_db::VoucherStore;
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: VoucherStore,
        sink: CsvSink,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = VoucherStore::new(dir.path().join("site.db")).unwrap();
        let sink = CsvSink::new(dir.path().join("csv"));
        Fixture { _dir: dir, store, sink }
    }

    fn scenario_a() -> Value {
        json!({"Voucher": [{
            "VoucherTypeName": "PURCHASE ORDER",
            "VchNo": "PO-100",
            "Date": "2024-01-05",
            "CustomerName": "Acme",
            "TotalAmount": 5000,
            "Inventory Entries": [{
                "StockItem": "Cement",
                "BilledQty": "10.000 Ton",
                "Rate": "500.00/Ton",
                "Amount": 5000
            }]
        }]})
    }

    #[test]
    fn test_end_to_end_purchase_order() {
        let fx = fixture();
        let summary = ingest_document(&fx.store, &fx.sink, &AuditConfig::default(), &scenario_a()).unwrap();

        assert_eq!(summary.status, "success");
        assert_eq!(summary.po_written, 1);
        assert!(summary.message.starts_with("File processed: 1 records saved to po_details"));
        assert!(summary.errors.is_empty());
        assert_eq!(summary.details.len(), 1);
        assert_eq!(summary.details[0].voucher_type, "PURCHASE ORDER");
        assert_eq!(summary.details[0].rows_added, 1);

        let counts = fx.store.get_counts().unwrap();
        assert_eq!(counts.system_logs, 1);
        assert_eq!(counts.po_details, 1);

        let table = fx.sink.read_table(VoucherCategory::PurchaseOrder).unwrap();
        assert_eq!(table.total_rows(), 1);
        let col = table.headers.iter().position(|h| h == "StockItem").unwrap();
        assert_eq!(table.data[0][col], "Cement");
    }

    #[test]
    fn test_nothing_produced_is_an_error() {
        let fx = fixture();
        let mut doc = scenario_a();
        doc["Voucher"][0]["VoucherTypeName"] = json!("Mystery Type");
        let err = ingest_document(&fx.store, &fx.sink, &AuditConfig::default(), &doc).unwrap_err();

        let IngestError::NothingProduced { errors } = err else {
            panic!("expected NothingProduced");
        };
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Mystery Type") && errors[0].contains("PO-100"));
        assert!(!fx.sink.path_for(VoucherCategory::PurchaseOrder).exists());
        assert_eq!(fx.store.get_counts().unwrap().system_logs, 0);
    }

    #[test]
    fn test_partial_success_carries_errors() {
        let fx = fixture();
        let mut doc = scenario_a();
        doc["Voucher"].as_array_mut().unwrap().push(json!({
            "VoucherTypeName": "Sales Invoice",
            "VchNo": "SI-1"
        }));
        let summary = ingest_document(&fx.store, &fx.sink, &AuditConfig::default(), &doc).unwrap();

        assert_eq!(summary.po_written, 1);
        assert_eq!(summary.errors.len(), 1);
        let body = serde_json::to_value(&summary).unwrap();
        assert_eq!(body["errors"][0], json!("Unknown VoucherTypeName: Sales Invoice for VchNo: SI-1"));
        assert!(body.get("po_written").is_none());
    }

    #[test]
    fn test_rows_without_purchase_orders_still_succeed() {
        let fx = fixture();
        let doc = json!({"Voucher": [{"VoucherTypeName": "SupplierDetail", "VchNo": "SD-1"}]});
        let summary = ingest_document(&fx.store, &fx.sink, &AuditConfig::default(), &doc).unwrap();

        assert_eq!(summary.po_written, 0);
        assert_eq!(summary.details[0].voucher_type, "SupplierDetail");
        assert_eq!(fx.store.get_counts().unwrap().system_logs, 0);
        let body = serde_json::to_value(&summary).unwrap();
        assert!(body.get("errors").is_none());
    }

    #[test]
    fn test_unwritable_csv_still_counts_as_produced() {
        let dir = tempfile::tempdir().unwrap();
        let store = VoucherStore::new(dir.path().join("site.db")).unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"").unwrap();
        let sink = CsvSink::new(&blocker);

        let mut doc = scenario_a();
        doc["Voucher"][0]["VoucherTypeName"] = json!("Material Indent");
        let summary = ingest_document(&store, &sink, &AuditConfig::default(), &doc).unwrap();

        assert_eq!(summary.status, "success");
        assert!(summary.details.is_empty());
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("Error saving CSV for INDENT"), "{}", summary.errors[0]);
        assert_eq!(store.get_counts().unwrap().inventory_entries, 1);
    }

    #[test]
    fn test_document_shape_errors() {
        let fx = fixture();
        let audit = AuditConfig::default();
        assert!(matches!(
            ingest_bytes(&fx.store, &fx.sink, &audit, b"{not json"),
            Err(IngestError::InvalidJson(_))
        ));
        assert!(matches!(
            ingest_document(&fx.store, &fx.sink, &audit, &json!({"Vouchers": []})),
            Err(IngestError::MissingVoucherKey)
        ));
        assert!(matches!(
            ingest_document(&fx.store, &fx.sink, &audit, &json!({"Voucher": {"VchNo": "1"}})),
            Err(IngestError::VoucherNotList)
        ));
    }

    #[test]
    fn test_repeat_upload_appends_csv() {
        let fx = fixture();
        let audit = AuditConfig::default();
        let bytes = serde_json::to_vec(&scenario_a()).unwrap();
        ingest_bytes(&fx.store, &fx.sink, &audit, &bytes).unwrap();
        let second = ingest_bytes(&fx.store, &fx.sink, &audit, &bytes).unwrap();

        assert_eq!(second.details[0].rows_added, 1);
        assert_eq!(second.details[0].total_rows, 2);
        assert_eq!(fx.store.get_counts().unwrap().po_details, 2);
    }

    #[test]
    fn test_failed_purchase_orders_still_report_rows() {
        let fx = fixture();
        let mut flaky = FlakyStore::new(fx.store);
        flaky.fail_entities.push(Entity::PurchaseOrder);
        let summary = ingest_document(&flaky, &fx.sink, &AuditConfig::default(), &scenario_a()).unwrap();

        assert_eq!(summary.po_written, 0);
        assert_eq!(summary.details.len(), 1);
        assert!(summary.errors[0].starts_with("Error inserting purchase order (VchNo: PO-100, StockItem: Cement)"));
        assert_eq!(flaky.inner.get_counts().unwrap().system_logs, 0);
    }
}
