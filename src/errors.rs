// src/errors.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Which table a failed insert was aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Voucher,
    InventoryEntry,
    BatchAllocation,
    AccountingAllocation,
    LedgerDetail,
    BillWiseDetail,
    PurchaseOrder,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Voucher => "voucher",
            Entity::InventoryEntry => "inventory entry",
            Entity::BatchAllocation => "batch allocation",
            Entity::AccountingAllocation => "accounting allocation",
            Entity::LedgerDetail => "ledger detail",
            Entity::BillWiseDetail => "bill wise detail",
            Entity::PurchaseOrder => "purchase order",
        })
    }
}

/// The voucher (and stock item, when known) a per-record error is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub vch_no: String,
    pub stock_item: Option<String>,
}

impl Subject {
    pub fn voucher(vch_no: &str) -> Self {
        Self { vch_no: vch_no.to_string(), stock_item: None }
    }

    pub fn item(vch_no: &str, stock_item: Option<&str>) -> Self {
        Self {
            vch_no: vch_no.to_string(),
            stock_item: stock_item.map(str::to_string),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VchNo: {}", self.vch_no)?;
        if let Some(item) = &self.stock_item {
            write!(f, ", StockItem: {item}")?;
        }
        Ok(())
    }
}

/// A failure confined to one record of an ingestion batch. The batch keeps
/// going; the rendered message is handed back to the caller.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Unknown VoucherTypeName: {type_tag} for VchNo: {vch_no}")]
    Classification { type_tag: String, vch_no: String },

    #[error("Voucher #{index} is not a JSON object")]
    Malformed { index: usize },

    #[error("Error inserting {entity} ({subject}): {source}")]
    Persistence {
        entity: Entity,
        subject: Subject,
        #[source]
        source: rusqlite::Error,
    },

    #[error(
        "Error inserting purchase order ({subject}): Missing required fields: poNumber={}, deliveryDate={}",
        .po_number.as_deref().unwrap_or("None"),
        .delivery_date.as_deref().unwrap_or("None")
    )]
    Validation {
        subject: Subject,
        po_number: Option<String>,
        delivery_date: Option<String>,
    },

    #[error("Error saving CSV for {category}: {source}")]
    CsvSink {
        category: String,
        #[source]
        source: CsvSinkError,
    },

    #[error("Error inserting system log: {0}")]
    AuditLog(#[source] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum CsvSinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Failures that stop a whole ingestion request.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid JSON format: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("'Voucher' key missing in JSON")]
    MissingVoucherKey,

    #[error("'Voucher' must be a list of voucher objects")]
    VoucherNotList,

    #[error(
        "No valid VoucherType found (SupplierDetail, Purchase Order, Indent) and no purchase orders saved."
    )]
    NothingProduced { errors: Vec<String> },
}

/// Failures of the scanned-invoice path.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("File size exceeds {limit_mb}MB limit")]
    TooLarge { limit_mb: usize },

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("No text extracted from file")]
    NoText,

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("LLM API error: {0}")]
    Llm(String),

    #[error("Failed to parse JSON: {0}")]
    Parse(String),

    #[error("No valid data extracted")]
    NoData,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// HTTP-facing error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Csv(#[from] CsvSinkError),

    #[error("Database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Unexpected error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Ingest(_) => StatusCode::BAD_REQUEST,
            ApiError::Extract(
                ExtractError::TooLarge { .. }
                | ExtractError::UnsupportedType(_)
                | ExtractError::NoText
                | ExtractError::Parse(_)
                | ExtractError::NoData,
            ) => StatusCode::BAD_REQUEST,
            ApiError::Extract(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Csv(_) | ApiError::Store(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "status": "error",
            "detail": self.to_string(),
        });
        if let ApiError::Ingest(IngestError::NothingProduced { errors }) = &self {
            if !errors.is_empty() {
                body["errors"] = json!(errors);
            }
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_error_messages() {
        let e = RecordError::Classification {
            type_tag: "Mystery Type".into(),
            vch_no: "PO-100".into(),
        };
        assert_eq!(e.to_string(), "Unknown VoucherTypeName: Mystery Type for VchNo: PO-100");

        let e = RecordError::Validation {
            subject: Subject::item("PO-9", Some("Sand")),
            po_number: Some("PO-9".into()),
            delivery_date: None,
        };
        assert_eq!(
            e.to_string(),
            "Error inserting purchase order (VchNo: PO-9, StockItem: Sand): Missing required fields: poNumber=PO-9, deliveryDate=None"
        );

        let e = RecordError::Persistence {
            entity: Entity::LedgerDetail,
            subject: Subject::voucher("PO-9"),
            source: rusqlite::Error::InvalidParameterName("boom".into()),
        };
        assert!(e.to_string().starts_with("Error inserting ledger detail (VchNo: PO-9): "));
    }

    #[test]
    fn test_api_status_codes() {
        assert_eq!(
            ApiError::from(IngestError::MissingVoucherKey).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(IngestError::NothingProduced { errors: vec![] }).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(rusqlite::Error::InvalidQuery).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(ExtractError::NoText).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
    }
}
