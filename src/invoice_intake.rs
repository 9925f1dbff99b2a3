// src/invoice_intake.rs

use crate::config::Config;
use crate::errors::ExtractError;
use crate::invoice::InvoiceFields;
use crate::llm_extract::{InvoiceExtractor, extract_with_fallback, extractor_for};
use crate::ocr::{Ocr, UploadKind, store_upload, validate_upload};
use std::path::PathBuf;
use tracing::{info, info_span, Instrument};

/// Scanned bill in, cleaned invoice fields out.
pub struct InvoiceIntake {
    uploads_dir: PathBuf,
    max_bytes: usize,
    ocr: Ocr,
    extractor: Box<dyn InvoiceExtractor>,
}

impl InvoiceIntake {
    pub fn new(
        uploads_dir: impl Into<PathBuf>,
        max_bytes: usize,
        ocr: Ocr,
        extractor: Box<dyn InvoiceExtractor>,
    ) -> Self {
        Self { uploads_dir: uploads_dir.into(), max_bytes, ocr, extractor }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            &cfg.uploads.dir,
            cfg.uploads.max_bytes,
            Ocr::new(&cfg.ocr),
            extractor_for(&cfg.llm),
        )
    }

    /// Validate, store, read and extract one upload.
    pub async fn process(
        &self,
        bytes: &[u8],
        content_type: &str,
        vehicle_number: Option<&str>,
    ) -> Result<InvoiceFields, ExtractError> {
        let span = info_span!("extract_invoice", content_type, bytes = bytes.len());
        async {
            let kind = validate_upload(bytes, content_type, self.max_bytes)?;
            let path = store_upload(&self.uploads_dir, bytes, kind)?;
            let text = self.ocr.document_text(&path, kind).await?;
            self.fields_from_text(&text, vehicle_number).await
        }
        .instrument(span)
        .await
    }

    /// Same as [`InvoiceIntake::process`] for a file already on disk.
    pub async fn process_path(
        &self,
        path: &std::path::Path,
        vehicle_number: Option<&str>,
    ) -> Result<InvoiceFields, ExtractError> {
        let kind = UploadKind::from_path(path).ok_or_else(|| {
            ExtractError::UnsupportedType(path.display().to_string())
        })?;
        let text = self.ocr.document_text(path, kind).await?;
        self.fields_from_text(&text, vehicle_number).await
    }

    pub async fn fields_from_text(
        &self,
        text: &str,
        vehicle_number: Option<&str>,
    ) -> Result<InvoiceFields, ExtractError> {
        let raw = extract_with_fallback(self.extractor.as_ref(), text).await?;
        let fields = raw.clean(vehicle_number);
        if fields.is_empty() {
            return Err(ExtractError::NoData);
        }
        let (filled, total) = fields.coverage();
        info!(
            filled,
            total,
            extractor = self.extractor.name(),
            invoice_no = ?fields.invoice_no,
            supplier = ?fields.supplier,
            total_amount = ?fields.total,
            "Invoice fields extracted"
        );
        Ok(fields)
    }
}
