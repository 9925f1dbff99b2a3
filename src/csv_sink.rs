// src/csv_sink.rs

use crate::classify::VoucherCategory;
use crate::errors::CsvSinkError;
use crate::normalize::cell_text;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// One flattened voucher record headed for a CSV file.
pub type FlatRow = Map<String, Value>;

/// Header plus string cells, as read back from a sink file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub data: Vec<Vec<String>>,
}

impl Table {
    pub fn total_rows(&self) -> usize {
        self.data.len()
    }
}

/// Outcome of one append, reported back per category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppendSummary {
    pub voucher_type: String,
    pub file: String,
    pub rows_added: usize,
    pub total_rows: usize,
}

/// Append-only CSV files, one per voucher category, living in one directory.
///
/// Concurrent appends to the same category are not coordinated: two
/// overlapping read-merge-write cycles can lose one side's rows.
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, category: VoucherCategory) -> PathBuf {
        self.dir.join(category.file_name())
    }

    /// Read a category file. A missing or empty file is an empty table.
    pub fn read_table(&self, category: VoucherCategory) -> Result<Table, CsvSinkError> {
        read_table_at(&self.path_for(category))
    }

    /// Merge `rows` into the category file.
    ///
    /// Columns are the union of the existing header and every key in `rows`
    /// (existing order first, then new keys as first seen). Cells missing on
    /// either side are written as empty strings.
    pub fn append_rows(
        &self,
        category: VoucherCategory,
        rows: &[FlatRow],
    ) -> Result<AppendSummary, CsvSinkError> {
        let path = self.path_for(category);
        let existing = read_table_at(&path)?;

        let mut columns = existing.headers.clone();
        for row in rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        fs::create_dir_all(&self.dir)?;
        let tmp_path = path.with_extension("csv.tmp");
        {
            let mut wtr = csv::Writer::from_path(&tmp_path)?;
            wtr.write_record(&columns)?;

            for old in &existing.data {
                let record = columns.iter().map(|col| {
                    existing
                        .headers
                        .iter()
                        .position(|h| h == col)
                        .and_then(|i| old.get(i))
                        .map(String::as_str)
                        .unwrap_or("")
                });
                wtr.write_record(record)?;
            }

            for row in rows {
                let record: Vec<String> = columns
                    .iter()
                    .map(|col| row.get(col).map(cell_text).unwrap_or_default())
                    .collect();
                wtr.write_record(&record)?;
            }
            wtr.flush()?;
        }
        fs::rename(&tmp_path, &path)?;

        let summary = AppendSummary {
            voucher_type: category.label().to_string(),
            file: path.display().to_string(),
            rows_added: rows.len(),
            total_rows: existing.data.len() + rows.len(),
        };
        info!(
            category = %category,
            file = %summary.file,
            rows_added = summary.rows_added,
            total_rows = summary.total_rows,
            "Saved CSV"
        );
        Ok(summary)
    }

    /// Delete a category file. Returns whether a file was there.
    pub fn clear(&self, category: VoucherCategory) -> Result<bool, CsvSinkError> {
        let path = self.path_for(category);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(file = %path.display(), "Cleared CSV");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_table_at(path: &Path) -> Result<Table, CsvSinkError> {
    if !path.exists() {
        return Ok(Table::default());
    }
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    let mut data = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let mut cells: Vec<String> = record.iter().map(str::to_string).collect();
        cells.resize(headers.len(), String::new());
        data.push(cells);
    }
    Ok(Table { headers, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> FlatRow {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_first_append_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path());
        let summary = sink
            .append_rows(
                VoucherCategory::PurchaseOrder,
                &[row(json!({"VchNo": "PO-100", "TotalAmount": 5000.0, "Narration": null}))],
            )
            .unwrap();
        assert_eq!(summary.voucher_type, "PURCHASE ORDER");
        assert_eq!(summary.rows_added, 1);
        assert_eq!(summary.total_rows, 1);
        assert!(summary.file.ends_with("po.csv"));

        let table = sink.read_table(VoucherCategory::PurchaseOrder).unwrap();
        assert_eq!(table.headers, vec!["VchNo", "TotalAmount", "Narration"]);
        assert_eq!(table.data, vec![vec!["PO-100", "5000.0", ""]]);
    }

    #[test]
    fn test_merge_takes_column_union() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path());
        sink.append_rows(VoucherCategory::Indent, &[row(json!({"b": "1", "c": "2"}))])
            .unwrap();
        let summary = sink
            .append_rows(VoucherCategory::Indent, &[row(json!({"a": "3", "b": "4"}))])
            .unwrap();
        assert_eq!(summary.rows_added, 1);
        assert_eq!(summary.total_rows, 2);

        let table = sink.read_table(VoucherCategory::Indent).unwrap();
        assert_eq!(table.headers, vec!["b", "c", "a"]);
        assert_eq!(
            table.data,
            vec![vec!["1", "2", ""], vec!["4", "", "3"]]
        );
    }

    #[test]
    fn test_missing_file_reads_empty_and_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("converted"));
        assert_eq!(sink.read_table(VoucherCategory::SupplierDetail).unwrap(), Table::default());
        assert!(!sink.clear(VoucherCategory::SupplierDetail).unwrap());

        sink.append_rows(VoucherCategory::SupplierDetail, &[row(json!({"x": 1}))])
            .unwrap();
        assert!(sink.clear(VoucherCategory::SupplierDetail).unwrap());
        assert!(!sink.path_for(VoucherCategory::SupplierDetail).exists());
    }

    #[test]
    fn test_categories_use_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path());
        sink.append_rows(VoucherCategory::Indent, &[row(json!({"x": 1}))]).unwrap();
        assert_eq!(sink.read_table(VoucherCategory::PurchaseOrder).unwrap().total_rows(), 0);
        assert_eq!(sink.read_table(VoucherCategory::Indent).unwrap().total_rows(), 1);
    }
}
