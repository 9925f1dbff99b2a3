// src/voucher_db.rs

use crate::invoice::InvoiceFields;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, params};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Stock item names shown to the site team under a shorter label.
const MATERIAL_DISPLAY_NAMES: &[(&str, &str)] = &[
    ("Steel Reinforcement Rod 8mm Dia", "Steel"),
    ("TMT Bars 12mm", "TMT Bars"),
];

pub struct VoucherStore {
    conn: Connection,
}

#[derive(Debug, Clone, Default)]
pub struct VoucherRow {
    pub sal_time: Option<String>,
    pub voucher_type_name: Option<String>,
    pub vch_no: Option<String>,
    /// Canonical `YYYY-MM-DD`, `None` when absent or unparsable.
    pub date: Option<String>,
    pub effective_date: Option<String>,
    pub narration: Option<String>,
    pub state_buyer: Option<String>,
    pub cancel: Option<String>,
    pub refund: Option<String>,
    pub customer_name: Option<String>,
    pub mailing_name: Option<String>,
    pub customer_web_id: Option<String>,
    pub customer_tally_id: Option<String>,
    pub billing_address: Option<String>,
    pub consignee_name: Option<String>,
    pub shipping_address: Option<String>,
    pub billing_pin_code: Option<String>,
    pub shipping_pin_code: Option<String>,
    pub billing_phone_no: Option<String>,
    pub shipping_phone_no: Option<String>,
    pub total_amount: f64,
    pub sales_tally_id: Option<String>,
    pub web_id: Option<String>,
    pub action: Option<String>,
    pub billing_state: Option<String>,
    pub billing_country: Option<String>,
    pub shipping_state: Option<String>,
    pub shipping_country: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct InventoryRow {
    pub stock_item: Option<String>,
    pub debitor_credit: Option<String>,
    pub billed_qty: f64,
    pub actual_qty: f64,
    pub rate: f64,
    pub discount: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BatchRow {
    pub batch_name: Option<String>,
    pub godown_name: Option<String>,
    pub billed_qty: f64,
    pub actual_qty: f64,
    pub rate: f64,
    pub discount: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AccountingRow {
    pub ledger_name: Option<String>,
    pub amount: f64,
}

#[derive(Debug, Clone, Default)]
pub struct LedgerRow {
    pub ledger_name: Option<String>,
    pub debitor_credit: Option<String>,
    pub amount: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BillWiseRow {
    pub bill_type: Option<String>,
    pub bill_amount: f64,
}

/// Denormalized procurement row derived from a purchase-order voucher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderRecord {
    pub po_number: String,
    pub material: String,
    pub supplier: Option<String>,
    pub quantity: f64,
    pub rate: f64,
    pub total_amount: f64,
    pub po_type: Option<String>,
    pub delivery_date: String,
    pub narration: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub branch: String,
    pub module: String,
    pub action: String,
    pub actor: String,
    pub detail: String,
    pub source_address: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryDetails {
    pub stock_item: String,
    pub actual_qty: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredInvoiceItem {
    pub id: i64,
    #[serde(flatten)]
    pub fields: InvoiceFields,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub vouchers: usize,
    pub inventory_entries: usize,
    pub batch_allocations: usize,
    pub accounting_allocations: usize,
    pub ledger_details: usize,
    pub bill_wise_details: usize,
    pub po_details: usize,
    pub system_logs: usize,
    pub invoice_items: usize,
}

/// Insert operations the voucher fan-out depends on. Every call is an
/// independent statement returning the generated row id.
pub trait RecordStore {
    fn insert_voucher(&self, row: &VoucherRow) -> SqliteResult<i64>;
    fn insert_inventory_entry(&self, voucher_id: i64, row: &InventoryRow) -> SqliteResult<i64>;
    fn insert_batch_allocation(&self, inventory_id: i64, row: &BatchRow) -> SqliteResult<i64>;
    fn insert_accounting_allocation(
        &self,
        inventory_id: i64,
        row: &AccountingRow,
    ) -> SqliteResult<i64>;
    fn insert_ledger_detail(&self, voucher_id: i64, row: &LedgerRow) -> SqliteResult<i64>;
    fn insert_bill_wise_detail(&self, ledger_id: i64, row: &BillWiseRow) -> SqliteResult<i64>;
    fn insert_purchase_order(&self, po: &PurchaseOrderRecord) -> SqliteResult<i64>;
    fn record_audit(&self, entry: &AuditEntry) -> SqliteResult<i64>;
}

impl VoucherStore {
    /// Open the database and create any missing tables and indexes.
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let store = Self::open(db_path)?;
        store.migrate()?;
        info!("Database initialized successfully");
        Ok(store)
    }

    /// Connect without touching the schema. One of these is opened per
    /// request and dropped when the request finishes.
    pub fn open<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    fn migrate(&self) -> SqliteResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vouchers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sal_time TEXT,
                voucher_type_name TEXT,
                vch_no TEXT,
                date TEXT,
                effective_date TEXT,
                narration TEXT,
                state_buyer TEXT,
                cancel TEXT,
                refund TEXT,
                customer_name TEXT,
                mailing_name TEXT,
                customer_web_id TEXT,
                customer_tally_id TEXT,
                billing_address TEXT,
                consignee_name TEXT,
                shipping_address TEXT,
                billing_pin_code TEXT,
                shipping_pin_code TEXT,
                billing_phone_no TEXT,
                shipping_phone_no TEXT,
                total_amount REAL NOT NULL DEFAULT 0,
                sales_tally_id TEXT,
                web_id TEXT,
                action TEXT,
                billing_state TEXT,
                billing_country TEXT,
                shipping_state TEXT,
                shipping_country TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS inventory_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                voucher_id INTEGER NOT NULL,
                stock_item TEXT,
                debitor_credit TEXT,
                billed_qty REAL NOT NULL DEFAULT 0,
                actual_qty REAL NOT NULL DEFAULT 0,
                rate REAL NOT NULL DEFAULT 0,
                discount REAL NOT NULL DEFAULT 0,
                amount REAL NOT NULL DEFAULT 0,
                FOREIGN KEY (voucher_id) REFERENCES vouchers(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS batch_allocations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                inventory_id INTEGER NOT NULL,
                batch_name TEXT,
                godown_name TEXT,
                batch_billed_qty REAL NOT NULL DEFAULT 0,
                batch_actual_qty REAL NOT NULL DEFAULT 0,
                batch_rate REAL NOT NULL DEFAULT 0,
                batch_discount REAL NOT NULL DEFAULT 0,
                amount REAL NOT NULL DEFAULT 0,
                FOREIGN KEY (inventory_id) REFERENCES inventory_entries(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS accounting_allocations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                inventory_id INTEGER NOT NULL,
                ledger_name TEXT,
                amount REAL NOT NULL DEFAULT 0,
                FOREIGN KEY (inventory_id) REFERENCES inventory_entries(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS ledger_details (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                voucher_id INTEGER NOT NULL,
                ledger_name TEXT,
                debitor_credit TEXT,
                amount REAL NOT NULL DEFAULT 0,
                FOREIGN KEY (voucher_id) REFERENCES vouchers(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS bill_wise_details (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ledger_id INTEGER NOT NULL,
                bill_type TEXT,
                bill_amount REAL NOT NULL DEFAULT 0,
                FOREIGN KEY (ledger_id) REFERENCES ledger_details(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS po_details (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                po_number TEXT NOT NULL,
                material TEXT NOT NULL DEFAULT '',
                supplier TEXT,
                quantity REAL NOT NULL DEFAULT 0,
                rate REAL NOT NULL DEFAULT 0,
                total_amount REAL NOT NULL DEFAULT 0,
                po_type TEXT,
                delivery_date TEXT NOT NULL,
                narration TEXT,
                status TEXT NOT NULL DEFAULT 'Active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS system_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                branch_name TEXT NOT NULL,
                module_name TEXT NOT NULL,
                action_performed TEXT NOT NULL,
                action_by TEXT NOT NULL,
                action_on TEXT,
                ip_address TEXT,
                timestamp TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS invoice_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vehicle_number TEXT,
                description TEXT,
                quantity REAL,
                rate REAL,
                amount REAL,
                supplier_name TEXT,
                invoice_number TEXT,
                invoice_date TEXT,
                gstin TEXT,
                address TEXT,
                token_no TEXT,
                empty_weight REAL,
                load_weight REAL,
                net_weight REAL,
                tax REAL,
                cgst REAL,
                sgst REAL,
                round_off REAL,
                total REAL,
                amount_in_words TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_vouchers_vch_no ON vouchers(vch_no);
            CREATE INDEX IF NOT EXISTS idx_inventory_entries_voucher_id ON inventory_entries(voucher_id);
            CREATE INDEX IF NOT EXISTS idx_batch_allocations_inventory_id ON batch_allocations(inventory_id);
            CREATE INDEX IF NOT EXISTS idx_accounting_allocations_inventory_id ON accounting_allocations(inventory_id);
            CREATE INDEX IF NOT EXISTS idx_ledger_details_voucher_id ON ledger_details(voucher_id);
            CREATE INDEX IF NOT EXISTS idx_bill_wise_details_ledger_id ON bill_wise_details(ledger_id);
            CREATE INDEX IF NOT EXISTS idx_po_details_po_number ON po_details(po_number);",
        )
    }

    /// Distinct stock items recorded against a voucher number. A voucher
    /// without inventory contributes a single `None`.
    pub fn materials_for_voucher(&self, vch_no: &str) -> SqliteResult<Vec<Option<String>>> {
        let mut stmt = self.conn.prepare(
            "SELECT ie.stock_item
             FROM vouchers v
             LEFT JOIN inventory_entries ie ON v.id = ie.voucher_id
             WHERE v.vch_no = ?1
             ORDER BY ie.stock_item",
        )?;
        let rows = stmt.query_map(params![vch_no], |row| row.get::<_, Option<String>>(0))?;

        let mut materials: Vec<Option<String>> = Vec::new();
        for item in rows {
            let item = item?.filter(|s| !s.is_empty());
            if !materials.contains(&item) {
                materials.push(item);
            }
        }
        Ok(materials)
    }

    /// Customer name on the first voucher with this number, if non-empty.
    pub fn customer_name(&self, vch_no: &str) -> SqliteResult<Option<String>> {
        let name: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT customer_name FROM vouchers WHERE vch_no = ?1 ORDER BY id LIMIT 1",
                params![vch_no],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name.flatten().filter(|s| !s.is_empty()))
    }

    /// First inventory line of a voucher with the stock item mapped to its
    /// display name.
    pub fn inventory_details(&self, vch_no: &str) -> SqliteResult<Option<InventoryDetails>> {
        self.conn
            .query_row(
                "SELECT ie.stock_item, ie.actual_qty, ie.rate
                 FROM inventory_entries ie
                 JOIN vouchers v ON ie.voucher_id = v.id
                 WHERE v.vch_no = ?1
                 ORDER BY ie.id
                 LIMIT 1",
                params![vch_no],
                |row| {
                    let stock_item: Option<String> = row.get(0)?;
                    Ok(InventoryDetails {
                        stock_item: display_material(stock_item.as_deref().unwrap_or("")),
                        actual_qty: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                        rate: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    })
                },
            )
            .optional()
    }

    /// All purchase-order rows, oldest first, as `(id, record)`.
    pub fn purchase_orders(&self) -> SqliteResult<Vec<(i64, PurchaseOrderRecord)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, po_number, material, supplier, quantity, rate, total_amount, po_type,
                    delivery_date, narration, status, created_at, updated_at
             FROM po_details
             ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                PurchaseOrderRecord {
                    po_number: row.get(1)?,
                    material: row.get(2)?,
                    supplier: row.get(3)?,
                    quantity: row.get(4)?,
                    rate: row.get(5)?,
                    total_amount: row.get(6)?,
                    po_type: row.get(7)?,
                    delivery_date: row.get(8)?,
                    narration: row.get(9)?,
                    status: row.get(10)?,
                    created_at: row.get(11)?,
                    updated_at: row.get(12)?,
                },
            ))
        })?;
        rows.collect()
    }

    /// Persist one extracted invoice.
    pub fn insert_invoice_item(&self, fields: &InvoiceFields) -> SqliteResult<i64> {
        self.conn.execute(
            "INSERT INTO invoice_items
                (vehicle_number, description, quantity, rate, amount, supplier_name,
                 invoice_number, invoice_date, gstin, address, token_no, empty_weight,
                 load_weight, net_weight, tax, cgst, sgst, round_off, total, amount_in_words)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            params![
                fields.vehicle_number,
                fields.description,
                fields.qty,
                fields.rate,
                fields.amount,
                fields.supplier,
                fields.invoice_no,
                fields.invoice_date,
                fields.gstin,
                fields.address,
                fields.token_no,
                fields.empty_weight,
                fields.load_weight,
                fields.net_weight,
                fields.tax,
                fields.cgst,
                fields.sgst,
                fields.round_off,
                fields.total,
                fields.amount_in_words,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(id, invoice_no = ?fields.invoice_no, "Invoice item stored");
        Ok(id)
    }

    pub fn invoice_items(&self) -> SqliteResult<Vec<StoredInvoiceItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, vehicle_number, description, quantity, rate, amount, supplier_name,
                    invoice_number, invoice_date, gstin, address, token_no, empty_weight,
                    load_weight, net_weight, tax, cgst, sgst, round_off, total,
                    amount_in_words, created_at
             FROM invoice_items
             ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredInvoiceItem {
                id: row.get(0)?,
                fields: InvoiceFields {
                    vehicle_number: row.get(1)?,
                    description: row.get(2)?,
                    qty: row.get(3)?,
                    rate: row.get(4)?,
                    amount: row.get(5)?,
                    supplier: row.get(6)?,
                    invoice_no: row.get(7)?,
                    invoice_date: row.get(8)?,
                    gstin: row.get(9)?,
                    address: row.get(10)?,
                    token_no: row.get(11)?,
                    empty_weight: row.get(12)?,
                    load_weight: row.get(13)?,
                    net_weight: row.get(14)?,
                    tax: row.get(15)?,
                    cgst: row.get(16)?,
                    sgst: row.get(17)?,
                    round_off: row.get(18)?,
                    total: row.get(19)?,
                    amount_in_words: row.get(20)?,
                },
                created_at: row.get(21)?,
            })
        })?;
        rows.collect()
    }

    /// Row counts for every table.
    pub fn get_counts(&self) -> SqliteResult<TableCounts> {
        let count = |table: &str| -> SqliteResult<usize> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        };
        Ok(TableCounts {
            vouchers: count("vouchers")?,
            inventory_entries: count("inventory_entries")?,
            batch_allocations: count("batch_allocations")?,
            accounting_allocations: count("accounting_allocations")?,
            ledger_details: count("ledger_details")?,
            bill_wise_details: count("bill_wise_details")?,
            po_details: count("po_details")?,
            system_logs: count("system_logs")?,
            invoice_items: count("invoice_items")?,
        })
    }
}

impl RecordStore for VoucherStore {
    fn insert_voucher(&self, v: &VoucherRow) -> SqliteResult<i64> {
        self.conn.execute(
            "INSERT INTO vouchers
                (sal_time, voucher_type_name, vch_no, date, effective_date, narration, state_buyer,
                 cancel, refund, customer_name, mailing_name, customer_web_id, customer_tally_id,
                 billing_address, consignee_name, shipping_address, billing_pin_code,
                 shipping_pin_code, billing_phone_no, shipping_phone_no, total_amount,
                 sales_tally_id, web_id, action, billing_state, billing_country, shipping_state,
                 shipping_country, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?29)",
            params![
                v.sal_time,
                v.voucher_type_name,
                v.vch_no,
                v.date,
                v.effective_date,
                v.narration,
                v.state_buyer,
                v.cancel,
                v.refund,
                v.customer_name,
                v.mailing_name,
                v.customer_web_id,
                v.customer_tally_id,
                v.billing_address,
                v.consignee_name,
                v.shipping_address,
                v.billing_pin_code,
                v.shipping_pin_code,
                v.billing_phone_no,
                v.shipping_phone_no,
                v.total_amount,
                v.sales_tally_id,
                v.web_id,
                v.action,
                v.billing_state,
                v.billing_country,
                v.shipping_state,
                v.shipping_country,
                v.created_at,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(id, vch_no = ?v.vch_no, "Voucher stored");
        Ok(id)
    }

    fn insert_inventory_entry(&self, voucher_id: i64, e: &InventoryRow) -> SqliteResult<i64> {
        self.conn.execute(
            "INSERT INTO inventory_entries
                (voucher_id, stock_item, debitor_credit, billed_qty, actual_qty, rate, discount, amount)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                voucher_id,
                e.stock_item,
                e.debitor_credit,
                e.billed_qty,
                e.actual_qty,
                e.rate,
                e.discount,
                e.amount,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(id, voucher_id, stock_item = ?e.stock_item, "Inventory entry stored");
        Ok(id)
    }

    fn insert_batch_allocation(&self, inventory_id: i64, b: &BatchRow) -> SqliteResult<i64> {
        self.conn.execute(
            "INSERT INTO batch_allocations
                (inventory_id, batch_name, godown_name, batch_billed_qty, batch_actual_qty,
                 batch_rate, batch_discount, amount)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                inventory_id,
                b.batch_name,
                b.godown_name,
                b.billed_qty,
                b.actual_qty,
                b.rate,
                b.discount,
                b.amount,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, inventory_id, batch_name = ?b.batch_name, "Batch allocation stored");
        Ok(id)
    }

    fn insert_accounting_allocation(
        &self,
        inventory_id: i64,
        a: &AccountingRow,
    ) -> SqliteResult<i64> {
        self.conn.execute(
            "INSERT INTO accounting_allocations (inventory_id, ledger_name, amount)
             VALUES (?1, ?2, ?3)",
            params![inventory_id, a.ledger_name, a.amount],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, inventory_id, ledger_name = ?a.ledger_name, "Accounting allocation stored");
        Ok(id)
    }

    fn insert_ledger_detail(&self, voucher_id: i64, l: &LedgerRow) -> SqliteResult<i64> {
        self.conn.execute(
            "INSERT INTO ledger_details (voucher_id, ledger_name, debitor_credit, amount)
             VALUES (?1, ?2, ?3, ?4)",
            params![voucher_id, l.ledger_name, l.debitor_credit, l.amount],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, voucher_id, ledger_name = ?l.ledger_name, "Ledger detail stored");
        Ok(id)
    }

    fn insert_bill_wise_detail(&self, ledger_id: i64, b: &BillWiseRow) -> SqliteResult<i64> {
        self.conn.execute(
            "INSERT INTO bill_wise_details (ledger_id, bill_type, bill_amount)
             VALUES (?1, ?2, ?3)",
            params![ledger_id, b.bill_type, b.bill_amount],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, ledger_id, bill_type = ?b.bill_type, "Bill-wise detail stored");
        Ok(id)
    }

    fn insert_purchase_order(&self, po: &PurchaseOrderRecord) -> SqliteResult<i64> {
        self.conn.execute(
            "INSERT INTO po_details
                (po_number, material, supplier, quantity, rate, total_amount, po_type,
                 delivery_date, narration, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                po.po_number,
                po.material,
                po.supplier,
                po.quantity,
                po.rate,
                po.total_amount,
                po.po_type,
                po.delivery_date,
                po.narration,
                po.status,
                po.created_at,
                po.updated_at,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(id, po_number = %po.po_number, material = %po.material, "Purchase order stored");
        Ok(id)
    }

    fn record_audit(&self, entry: &AuditEntry) -> SqliteResult<i64> {
        self.conn.execute(
            "INSERT INTO system_logs
                (branch_name, module_name, action_performed, action_by, action_on, ip_address, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.branch,
                entry.module,
                entry.action,
                entry.actor,
                entry.detail,
                entry.source_address,
                entry.timestamp,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(id, detail = %entry.detail, "System log stored");
        Ok(id)
    }
}

fn display_material(stock_item: &str) -> String {
    MATERIAL_DISPLAY_NAMES
        .iter()
        .find(|(name, _)| *name == stock_item)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| stock_item.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, VoucherStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VoucherStore::new(dir.path().join("site.db")).unwrap();
        (dir, store)
    }

    fn voucher(vch_no: &str, customer: &str) -> VoucherRow {
        VoucherRow {
            vch_no: Some(vch_no.to_string()),
            customer_name: Some(customer.to_string()),
            created_at: "2024-01-05 09:00:00".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_returns_generated_ids() {
        let (_dir, store) = store();
        let v1 = store.insert_voucher(&voucher("PO-1", "Acme")).unwrap();
        let v2 = store.insert_voucher(&voucher("PO-2", "Birla")).unwrap();
        assert_ne!(v1, v2);

        let inv = store
            .insert_inventory_entry(v1, &InventoryRow { stock_item: Some("Cement".into()), ..Default::default() })
            .unwrap();
        store.insert_batch_allocation(inv, &BatchRow::default()).unwrap();
        store.insert_accounting_allocation(inv, &AccountingRow::default()).unwrap();
        let ledger = store.insert_ledger_detail(v1, &LedgerRow::default()).unwrap();
        store.insert_bill_wise_detail(ledger, &BillWiseRow::default()).unwrap();

        let counts = store.get_counts().unwrap();
        assert_eq!(counts.vouchers, 2);
        assert_eq!(counts.inventory_entries, 1);
        assert_eq!(counts.batch_allocations, 1);
        assert_eq!(counts.accounting_allocations, 1);
        assert_eq!(counts.ledger_details, 1);
        assert_eq!(counts.bill_wise_details, 1);
    }

    #[test]
    fn test_child_requires_existing_parent() {
        let (_dir, store) = store();
        let err = store.insert_inventory_entry(999, &InventoryRow::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_voucher_lookups() {
        let (_dir, store) = store();
        let v = store.insert_voucher(&voucher("PO-7", "Acme")).unwrap();
        for item in ["TMT Bars 12mm", "Cement", "Cement"] {
            store
                .insert_inventory_entry(
                    v,
                    &InventoryRow {
                        stock_item: Some(item.to_string()),
                        actual_qty: 4.0,
                        rate: 250.0,
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        let bare = store.insert_voucher(&voucher("PO-8", "")).unwrap();
        assert!(bare > v);

        assert_eq!(
            store.materials_for_voucher("PO-7").unwrap(),
            vec![Some("Cement".to_string()), Some("TMT Bars 12mm".to_string())]
        );
        assert_eq!(store.materials_for_voucher("PO-8").unwrap(), vec![None]);
        assert!(store.materials_for_voucher("nope").unwrap().is_empty());

        assert_eq!(store.customer_name("PO-7").unwrap().as_deref(), Some("Acme"));
        assert_eq!(store.customer_name("PO-8").unwrap(), None);

        let details = store.inventory_details("PO-7").unwrap().unwrap();
        assert_eq!(details.stock_item, "TMT Bars");
        assert_eq!(details.actual_qty, 4.0);
        assert_eq!(details.rate, 250.0);
        assert!(store.inventory_details("PO-8").unwrap().is_none());
    }

    #[test]
    fn test_purchase_order_round_trip() {
        let (_dir, store) = store();
        let po = PurchaseOrderRecord {
            po_number: "PO-1".into(),
            material: "Cement".into(),
            supplier: Some("Acme".into()),
            quantity: 10.0,
            rate: 500.0,
            total_amount: 5000.0,
            po_type: Some("PURCHASE ORDER".into()),
            delivery_date: "2024-01-05".into(),
            narration: None,
            status: "Active".into(),
            created_at: "2024-01-05 09:00:00".into(),
            updated_at: "2024-01-05 09:00:00".into(),
        };
        let id = store.insert_purchase_order(&po).unwrap();
        let rows = store.purchase_orders().unwrap();
        assert_eq!(rows, vec![(id, po)]);
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.db");
        VoucherStore::new(&path).unwrap();
        let store = VoucherStore::open(&path).unwrap();
        assert_eq!(store.get_counts().unwrap(), TableCounts::default());
    }
}
