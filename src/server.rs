// src/server.rs

use crate::classify::VoucherCategory;
use crate::config::{AuditConfig, Config};
use crate::csv_sink::CsvSink;
use crate::errors::ApiError;
use crate::ingest::{IngestSummary, ingest_bytes};
use crate::invoice_intake::InvoiceIntake;
use crate::voucher_db::VoucherStore;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderValue, header},
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Upper bound on request bodies; the invoice size check runs inside the
/// handler so its error message reaches the caller.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

const PO_HEADERS: [&str; 13] = [
    "id",
    "poNumber",
    "material",
    "supplier",
    "quantity",
    "rate",
    "totalAmount",
    "poType",
    "deliveryDate",
    "narration",
    "status",
    "createdAt",
    "updatedAt",
];

#[derive(Clone)]
pub struct AppState {
    db_path: PathBuf,
    csv: Arc<CsvSink>,
    audit: AuditConfig,
    intake: Arc<InvoiceIntake>,
}

impl AppState {
    pub fn new(
        db_path: impl Into<PathBuf>,
        csv: CsvSink,
        audit: AuditConfig,
        intake: InvoiceIntake,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            csv: Arc::new(csv),
            audit,
            intake: Arc::new(intake),
        }
    }

    /// Run `f` on a blocking thread with a connection opened for this call
    /// and closed when it returns.
    async fn with_store<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&VoucherStore) -> Result<T, ApiError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let store = VoucherStore::open(&db_path)?;
            f(&store)
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
    }
}

pub fn router(state: AppState, cors_origin: Option<&str>) -> Router {
    let cors = match cors_origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/upload-json/", post(upload_json))
        .route("/get-csv-data/:csv_type", get(get_csv_data))
        .route("/download/:csv_type", get(download_csv))
        .route("/clear-csv/:csv_type", delete(clear_csv))
        .route("/api/po-details", get(po_details))
        .route("/api/vouchers/materials-by-voucher", get(materials_by_voucher))
        .route("/api/vouchers/customer-name", get(customer_name))
        .route("/api/vouchers/inventory-details", get(inventory_details))
        .route("/extract-invoice/", post(extract_invoice))
        .route("/invoices", get(invoices))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Migrate the schema once, then serve until the process is stopped.
pub async fn serve(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    VoucherStore::new(&cfg.db_path)?;
    let state = AppState::new(
        &cfg.db_path,
        CsvSink::new(&cfg.csv.dir),
        cfg.audit.clone(),
        InvoiceIntake::from_config(cfg),
    );
    let app = router(state, cfg.server.cors_origin.as_deref());

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind).await?;
    info!(addr = %cfg.server.bind, "Listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn home() -> Json<Value> {
    Json(json!({
        "message": "Upload JSON. Vouchers will be saved in po_details table (for PURCHASE ORDER) and CSVs (SupplierDetail.csv, po.csv, indent.csv) based on type."
    }))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "site_inward"}))
}

#[derive(Default)]
struct UploadForm {
    file: Option<(Bytes, String)>,
    vehicle_number: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
                form.file = Some((data, content_type));
            }
            Some("vehicle_number") => {
                let text = field.text().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
                form.vehicle_number = Some(text).filter(|s| !s.trim().is_empty());
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn upload_json(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<IngestSummary>, ApiError> {
    info!("Received request to /upload-json/");
    let form = read_form(multipart).await?;
    let (bytes, _) = form
        .file
        .ok_or_else(|| ApiError::BadRequest("No file uploaded".into()))?;

    let csv = state.csv.clone();
    let audit = state.audit.clone();
    let summary = state
        .with_store(move |store| Ok(ingest_bytes(store, &csv, &audit, &bytes)?))
        .await?;
    Ok(Json(summary))
}

fn category_for(csv_type: &str) -> Result<VoucherCategory, ApiError> {
    VoucherCategory::from_slug(csv_type).ok_or_else(|| {
        warn!(csv_type, "Invalid CSV type");
        ApiError::BadRequest("Invalid CSV type".into())
    })
}

async fn get_csv_data(
    State(state): State<AppState>,
    Path(csv_type): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let category = category_for(&csv_type)?;
    let csv = state.csv.clone();
    let table = tokio::task::spawn_blocking(move || csv.read_table(category))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    info!(csv_type, rows = table.total_rows(), "Retrieved CSV data");
    Ok(Json(json!({
        "status": "success",
        "total_rows": table.total_rows(),
        "headers": table.headers,
        "data": table.data,
    })))
}

async fn download_csv(
    State(state): State<AppState>,
    Path(csv_type): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let category = category_for(&csv_type)?;
    let path = state.csv.path_for(category);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("CSV file not found".into()));
        }
        Err(e) => return Err(ApiError::Csv(e.into())),
    };
    let disposition = format!("attachment; filename=\"{}_data.csv\"", category.slug());
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

async fn clear_csv(
    State(state): State<AppState>,
    Path(csv_type): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let category = category_for(&csv_type)?;
    let csv = state.csv.clone();
    let removed = tokio::task::spawn_blocking(move || csv.clear(category))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    info!(csv_type, removed, "CSV cleared");
    Ok(Json(json!({
        "status": "success",
        "message": format!("{} CSV cleared successfully", csv_type.to_uppercase()),
    })))
}

async fn po_details(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let rows = state.with_store(|store| Ok(store.purchase_orders()?)).await?;
    if rows.is_empty() {
        return Ok(Json(json!({"status": "success", "headers": [], "data": [], "total_rows": 0})));
    }
    let data: Vec<Value> = rows
        .iter()
        .map(|(id, po)| {
            json!([
                id,
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
            ])
        })
        .collect();
    Ok(Json(json!({
        "status": "success",
        "headers": PO_HEADERS,
        "total_rows": data.len(),
        "data": data,
    })))
}

#[derive(Debug, Deserialize)]
struct VchNoQuery {
    vch_no: String,
}

async fn materials_by_voucher(
    State(state): State<AppState>,
    Query(q): Query<VchNoQuery>,
) -> Result<Json<Value>, ApiError> {
    let vch_no = q.vch_no.clone();
    let materials = state
        .with_store(move |store| Ok(store.materials_for_voucher(&vch_no)?))
        .await?;
    if materials.is_empty() {
        return Ok(Json(json!({"status": "success", "data": {}, "total_vouchers": 0})));
    }
    let mut data = serde_json::Map::new();
    data.insert(q.vch_no, json!(materials));
    Ok(Json(json!({"status": "success", "data": data, "total_vouchers": 1})))
}

async fn customer_name(
    State(state): State<AppState>,
    Query(q): Query<VchNoQuery>,
) -> Result<Json<Value>, ApiError> {
    let vch_no = q.vch_no.clone();
    let name = state
        .with_store(move |store| Ok(store.customer_name(&vch_no)?))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No customer name found for vch_no: {}", q.vch_no)))?;
    Ok(Json(json!({"status": "success", "vch_no": q.vch_no, "customer_name": name})))
}

async fn inventory_details(
    State(state): State<AppState>,
    Query(q): Query<VchNoQuery>,
) -> Result<Json<Value>, ApiError> {
    let vch_no = q.vch_no.clone();
    let details = state
        .with_store(move |store| Ok(store.inventory_details(&vch_no)?))
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No inventory details found for vch_no: {}", q.vch_no))
        })?;
    Ok(Json(json!({
        "status": "success",
        "vch_no": q.vch_no,
        "stock_item": details.stock_item,
        "actual_qty": details.actual_qty,
        "rate": details.rate,
    })))
}

async fn extract_invoice(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = read_form(multipart).await?;
    let (bytes, content_type) = form
        .file
        .ok_or_else(|| ApiError::BadRequest("No file uploaded".into()))?;

    let fields = state
        .intake
        .process(&bytes, &content_type, form.vehicle_number.as_deref())
        .await?;

    let stored = fields.clone();
    state.with_store(move |store| Ok(store.insert_invoice_item(&stored)?)).await?;

    Ok(Json(json!({
        "status": "success",
        "data": fields,
        "message": "Invoice data extracted and stored successfully",
    })))
}

async fn invoices(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let items = state.with_store(|store| Ok(store.invoice_items()?)).await?;
    Ok(Json(json!({
        "status": "success",
        "data": items,
        "message": "Invoices fetched successfully",
    })))
}
