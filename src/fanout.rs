// src/fanout.rs

use crate::classify::{VoucherCategory, classify};
use crate::csv_sink::FlatRow;
use crate::errors::{Entity, RecordError, Subject};
use crate::normalize::{date_of, normalize_fields, number_of, quantity_of, rate_of, text_of};
use crate::voucher_db::{
    AccountingRow, BatchRow, BillWiseRow, InventoryRow, LedgerRow, PurchaseOrderRecord,
    RecordStore, VoucherRow,
};
use rusqlite::Result as SqliteResult;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, error, info, info_span, warn};

const INVENTORY_ENTRIES: &str = "Inventory Entries";
const LEDGER_DETAILS: &str = "Ledgerdetails";
const BATCH_ALLOCATIONS: &str = "BatchAllocations";
const ACCOUNTING_ALLOCATIONS: &str = "AccountingAllocations";
const BILL_WISE_DETAILS: &str = "BillWiseDetails";

const PO_STATUS: &str = "Active";

/// What one pass over a voucher list produced.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub vouchers_written: usize,
    pub po_written: usize,
    /// Flattened rows per category, in input order, headed for the CSV sink.
    pub groups: BTreeMap<VoucherCategory, Vec<FlatRow>>,
    pub errors: Vec<RecordError>,
}

impl IngestReport {
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    pub fn produced_rows(&self) -> bool {
        self.groups.values().any(|rows| !rows.is_empty())
    }
}

/// Fields of the voucher every descendant needs: purchase-order derivation
/// and the flattened CSV rows.
struct VoucherCtx {
    category: VoucherCategory,
    vch_no: Option<String>,
    type_name: Option<String>,
    customer_name: Option<String>,
    date: Option<String>,
    narration: Option<String>,
    total_amount: f64,
    created_at: String,
    base: FlatRow,
}

impl VoucherCtx {
    fn label(&self) -> &str {
        self.vch_no.as_deref().unwrap_or("Unknown")
    }
}

/// Stock line values a purchase order is priced from.
struct PoLine<'a> {
    material: &'a str,
    quantity: f64,
    rate: f64,
    total_amount: f64,
}

/// Non-empty array of objects under `key`. Anything else counts as absent.
fn children<'a>(obj: &'a Map<String, Value>, key: &str) -> Vec<&'a Map<String, Value>> {
    match obj.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let child = item.as_object();
                if child.is_none() {
                    warn!(collection = key, "Skipping non-object entry");
                }
                child
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn merged(parts: &[&FlatRow]) -> FlatRow {
    let mut row = FlatRow::new();
    for part in parts {
        for (k, v) in part.iter() {
            row.insert(k.clone(), v.clone());
        }
    }
    row
}

/// Walks voucher trees and writes every node through a [`RecordStore`].
///
/// A failed node records an error and skips its own subtree; its siblings
/// and already written ancestors are left alone.
pub struct Fanout<'s, S: RecordStore + ?Sized> {
    store: &'s S,
    report: IngestReport,
}

impl<'s, S: RecordStore + ?Sized> Fanout<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store, report: IngestReport::default() }
    }

    pub fn finish(self) -> IngestReport {
        self.report
    }

    fn fail(&mut self, err: RecordError) {
        error!(error = %err, "Record skipped");
        self.report.errors.push(err);
    }

    fn persist(
        &mut self,
        entity: Entity,
        subject: impl FnOnce() -> Subject,
        result: SqliteResult<i64>,
    ) -> Option<i64> {
        match result {
            Ok(id) => Some(id),
            Err(source) => {
                self.fail(RecordError::Persistence { entity, subject: subject(), source });
                None
            }
        }
    }

    fn push_row(&mut self, category: VoucherCategory, row: FlatRow) {
        self.report.groups.entry(category).or_default().push(row);
    }

    pub fn voucher(&mut self, index: usize, raw: &Value) {
        let Some(obj) = raw.as_object() else {
            self.fail(RecordError::Malformed { index });
            return;
        };

        let vch_no = text_of(obj.get("VchNo"));
        let span = info_span!("voucher", vch_no = vch_no.as_deref().unwrap_or("Unknown"));
        let _enter = span.enter();

        let type_tag = text_of(obj.get("VoucherTypeName")).unwrap_or_default();
        let Some(category) = classify(&type_tag) else {
            self.fail(RecordError::Classification {
                type_tag,
                vch_no: vch_no.unwrap_or_else(|| "Unknown".to_string()),
            });
            return;
        };
        debug!(category = %category, "Voucher classified");

        let created_at = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let row = VoucherRow {
            sal_time: text_of(obj.get("SalTime")),
            voucher_type_name: Some(type_tag.clone()),
            vch_no: vch_no.clone(),
            date: date_of(obj.get("Date")),
            effective_date: date_of(obj.get("EffectiveDate")),
            narration: text_of(obj.get("Narration")),
            state_buyer: text_of(obj.get("StateBuyer")),
            cancel: text_of(obj.get("Cancel")),
            refund: text_of(obj.get("Refund")),
            customer_name: text_of(obj.get("CustomerName")),
            mailing_name: text_of(obj.get("MailingName")),
            customer_web_id: text_of(obj.get("CustomerWebID")),
            customer_tally_id: text_of(obj.get("CustomerTallyID")),
            billing_address: text_of(obj.get("BillingAddress")),
            consignee_name: text_of(obj.get("ConsigneeName")),
            shipping_address: text_of(obj.get("ShippingAddress")),
            billing_pin_code: text_of(obj.get("BillingPinCode")),
            shipping_pin_code: text_of(obj.get("ShippingPinCode")),
            billing_phone_no: text_of(obj.get("BillingPhoneNo")),
            shipping_phone_no: text_of(obj.get("ShippingPhoneNo")),
            total_amount: number_of(obj.get("TotalAmount")),
            sales_tally_id: text_of(obj.get("SalesTallyID")),
            web_id: text_of(obj.get("WebID")),
            action: text_of(obj.get("Action")),
            billing_state: text_of(obj.get("BillingState")),
            billing_country: text_of(obj.get("BillingCountry")),
            shipping_state: text_of(obj.get("ShippingState")),
            shipping_country: text_of(obj.get("ShippingCountry")),
            created_at: created_at.clone(),
        };

        let ctx = VoucherCtx {
            category,
            vch_no,
            type_name: row.voucher_type_name.clone(),
            customer_name: row.customer_name.clone(),
            date: row.date.clone(),
            narration: row.narration.clone(),
            total_amount: row.total_amount,
            created_at,
            base: normalize_fields(obj, &[INVENTORY_ENTRIES, LEDGER_DETAILS]),
        };

        let result = self.store.insert_voucher(&row);
        let Some(voucher_id) = self.persist(Entity::Voucher, || Subject::voucher(ctx.label()), result)
        else {
            return;
        };
        self.report.vouchers_written += 1;

        let entries = children(obj, INVENTORY_ENTRIES);
        if entries.is_empty() {
            self.push_row(category, ctx.base.clone());
            let line = PoLine { material: "", quantity: 0.0, rate: 0.0, total_amount: ctx.total_amount };
            self.purchase_order(&ctx, None, &line);
        } else {
            for entry in entries {
                self.inventory_entry(&ctx, voucher_id, entry);
            }
        }

        for ledger in children(obj, LEDGER_DETAILS) {
            self.ledger_detail(&ctx, voucher_id, ledger);
        }
    }

    fn inventory_entry(&mut self, ctx: &VoucherCtx, voucher_id: i64, obj: &Map<String, Value>) {
        let row = InventoryRow {
            stock_item: text_of(obj.get("StockItem")),
            debitor_credit: text_of(obj.get("DebitorCredit")),
            billed_qty: quantity_of(obj.get("BilledQty")),
            // The export spells this field "AcutalQty".
            actual_qty: quantity_of(obj.get("AcutalQty")),
            rate: rate_of(obj.get("Rate")),
            discount: number_of(obj.get("Discount")),
            amount: number_of(obj.get("Amount")),
        };
        let stock_item = row.stock_item.clone();
        let subject = || Subject::item(ctx.label(), stock_item.as_deref());

        let result = self.store.insert_inventory_entry(voucher_id, &row);
        let Some(inventory_id) = self.persist(Entity::InventoryEntry, subject, result) else {
            return;
        };

        let info = normalize_fields(obj, &[BATCH_ALLOCATIONS, ACCOUNTING_ALLOCATIONS]);
        let material = row.stock_item.as_deref().unwrap_or("");
        let line = PoLine {
            material,
            quantity: row.billed_qty,
            rate: row.rate,
            total_amount: row.amount,
        };

        let batches = children(obj, BATCH_ALLOCATIONS);
        let accounting = children(obj, ACCOUNTING_ALLOCATIONS);
        if !batches.is_empty() {
            if !accounting.is_empty() {
                warn!(
                    stock_item = material,
                    dropped = accounting.len(),
                    "Entry has batch allocations; accounting allocations ignored"
                );
            }
            for batch in batches {
                let batch_info = normalize_fields(batch, &[]);
                self.push_row(ctx.category, merged(&[&ctx.base, &info, &batch_info]));
                if self.batch_allocation(ctx, inventory_id, material, batch) {
                    self.purchase_order(ctx, Some(material), &line);
                }
            }
        } else {
            self.push_row(ctx.category, merged(&[&ctx.base, &info]));
            for alloc in accounting {
                self.accounting_allocation(ctx, inventory_id, material, alloc);
            }
            self.purchase_order(ctx, Some(material), &line);
        }
    }

    fn batch_allocation(
        &mut self,
        ctx: &VoucherCtx,
        inventory_id: i64,
        stock_item: &str,
        obj: &Map<String, Value>,
    ) -> bool {
        let row = BatchRow {
            batch_name: text_of(obj.get("BatchName")),
            godown_name: text_of(obj.get("GodownName")),
            billed_qty: quantity_of(obj.get("BatchBilledQty")),
            actual_qty: quantity_of(obj.get("BatchActualQty")),
            rate: rate_of(obj.get("BatchRate")),
            discount: number_of(obj.get("BatchDiscount")),
            amount: number_of(obj.get("Amount")),
        };
        let result = self.store.insert_batch_allocation(inventory_id, &row);
        self.persist(
            Entity::BatchAllocation,
            || Subject::item(ctx.label(), Some(stock_item)),
            result,
        )
        .is_some()
    }

    fn accounting_allocation(
        &mut self,
        ctx: &VoucherCtx,
        inventory_id: i64,
        stock_item: &str,
        obj: &Map<String, Value>,
    ) {
        let row = AccountingRow {
            ledger_name: text_of(obj.get("LedgerName")),
            amount: number_of(obj.get("Amount")),
        };
        let result = self.store.insert_accounting_allocation(inventory_id, &row);
        self.persist(
            Entity::AccountingAllocation,
            || Subject::item(ctx.label(), Some(stock_item)),
            result,
        );
    }

    fn ledger_detail(&mut self, ctx: &VoucherCtx, voucher_id: i64, obj: &Map<String, Value>) {
        let row = LedgerRow {
            ledger_name: text_of(obj.get("Ledgername")),
            debitor_credit: text_of(obj.get("DebitorCredit")),
            amount: number_of(obj.get("Amount")),
        };
        let result = self.store.insert_ledger_detail(voucher_id, &row);
        let Some(ledger_id) =
            self.persist(Entity::LedgerDetail, || Subject::voucher(ctx.label()), result)
        else {
            return;
        };

        for bill in children(obj, BILL_WISE_DETAILS) {
            let row = BillWiseRow {
                bill_type: text_of(bill.get("BillType")),
                bill_amount: number_of(bill.get("Amount")),
            };
            let result = self.store.insert_bill_wise_detail(ledger_id, &row);
            self.persist(Entity::BillWiseDetail, || Subject::voucher(ctx.label()), result);
        }
    }

    /// Derive and write one procurement row. No-op outside the
    /// purchase-order category.
    fn purchase_order(&mut self, ctx: &VoucherCtx, stock_item: Option<&str>, line: &PoLine<'_>) {
        if ctx.category != VoucherCategory::PurchaseOrder {
            return;
        }
        let subject = || Subject::item(ctx.label(), stock_item);

        let po_number = ctx.vch_no.as_deref().filter(|s| !s.is_empty());
        let (Some(po_number), Some(delivery_date)) = (po_number, ctx.date.as_deref()) else {
            self.fail(RecordError::Validation {
                subject: subject(),
                po_number: ctx.vch_no.clone(),
                delivery_date: ctx.date.clone(),
            });
            return;
        };

        let po = PurchaseOrderRecord {
            po_number: po_number.to_string(),
            material: line.material.to_string(),
            supplier: ctx.customer_name.clone(),
            quantity: line.quantity,
            rate: line.rate,
            total_amount: line.total_amount,
            po_type: ctx.type_name.clone(),
            delivery_date: delivery_date.to_string(),
            narration: ctx.narration.clone(),
            status: PO_STATUS.to_string(),
            created_at: ctx.created_at.clone(),
            updated_at: ctx.created_at.clone(),
        };
        let result = self.store.insert_purchase_order(&po);
        if self.persist(Entity::PurchaseOrder, subject, result).is_some() {
            self.report.po_written += 1;
        }
    }
}

/// Run every voucher of a batch through the store.
pub fn write_vouchers<S: RecordStore + ?Sized>(store: &S, vouchers: &[Value]) -> IngestReport {
    let mut fanout = Fanout::new(store);
    for (index, voucher) in vouchers.iter().enumerate() {
        fanout.voucher(index, voucher);
    }
    let report = fanout.finish();
    info!(
        vouchers = vouchers.len(),
        written = report.vouchers_written,
        po_written = report.po_written,
        errors = report.errors.len(),
        "Voucher batch processed"
    );
    report
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::voucher_db::{AuditEntry, VoucherStore};

    /// Store wrapper that rejects chosen inserts.
    pub struct FlakyStore {
        pub inner: VoucherStore,
        pub fail_entities: Vec<Entity>,
        /// Only fail inventory entries with this stock item.
        pub fail_stock_item: Option<String>,
    }

    impl FlakyStore {
        pub fn new(inner: VoucherStore) -> Self {
            Self { inner, fail_entities: Vec::new(), fail_stock_item: None }
        }

        fn check(&self, entity: Entity) -> SqliteResult<()> {
            if self.fail_entities.contains(&entity) {
                return Err(rusqlite::Error::InvalidParameterName(format!("injected {entity}")));
            }
            Ok(())
        }
    }

    impl RecordStore for FlakyStore {
        fn insert_voucher(&self, row: &VoucherRow) -> SqliteResult<i64> {
            self.check(Entity::Voucher)?;
            self.inner.insert_voucher(row)
        }

        fn insert_inventory_entry(&self, voucher_id: i64, row: &InventoryRow) -> SqliteResult<i64> {
            if self.fail_stock_item.is_some() && self.fail_stock_item == row.stock_item {
                return Err(rusqlite::Error::InvalidParameterName("injected stock item".into()));
            }
            self.check(Entity::InventoryEntry)?;
            self.inner.insert_inventory_entry(voucher_id, row)
        }

        fn insert_batch_allocation(&self, inventory_id: i64, row: &BatchRow) -> SqliteResult<i64> {
            self.check(Entity::BatchAllocation)?;
            self.inner.insert_batch_allocation(inventory_id, row)
        }

        fn insert_accounting_allocation(
            &self,
            inventory_id: i64,
            row: &AccountingRow,
        ) -> SqliteResult<i64> {
            self.check(Entity::AccountingAllocation)?;
            self.inner.insert_accounting_allocation(inventory_id, row)
        }

        fn insert_ledger_detail(&self, voucher_id: i64, row: &LedgerRow) -> SqliteResult<i64> {
            self.check(Entity::LedgerDetail)?;
            self.inner.insert_ledger_detail(voucher_id, row)
        }

        fn insert_bill_wise_detail(&self, ledger_id: i64, row: &BillWiseRow) -> SqliteResult<i64> {
            self.check(Entity::BillWiseDetail)?;
            self.inner.insert_bill_wise_detail(ledger_id, row)
        }

        fn insert_purchase_order(&self, po: &PurchaseOrderRecord) -> SqliteResult<i64> {
            self.check(Entity::PurchaseOrder)?;
            self.inner.insert_purchase_order(po)
        }

        fn record_audit(&self, entry: &AuditEntry) -> SqliteResult<i64> {
            self.inner.record_audit(entry)
        }
    }
}
