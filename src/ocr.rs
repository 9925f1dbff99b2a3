// src/ocr.rs

use crate::config::OcrConfig;
use crate::errors::ExtractError;
use lopdf::Document;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Result of attempting to extract text from a PDF.
#[derive(Debug)]
pub enum PdfContent {
    /// The PDF carries an extractable text layer.
    Text(String),
    /// Image-only PDF, needs OCR.
    ScannedImage,
    Error(String),
}

/// Minimum non-whitespace characters expected from a real text layer.
/// Below this the PDF is OCR'd instead.
const MIN_TEXT_CHARS: usize = 30;

/// Upload types accepted by the invoice extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Pdf,
    Png,
    Jpeg,
}

impl UploadKind {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "application/pdf" => Some(Self::Pdf),
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    /// Fallback for the CLI, where there is no content type to go by.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

/// Size and type checks applied before anything touches the disk.
pub fn validate_upload(
    bytes: &[u8],
    content_type: &str,
    max_bytes: usize,
) -> Result<UploadKind, ExtractError> {
    if bytes.len() > max_bytes {
        return Err(ExtractError::TooLarge { limit_mb: max_bytes / (1024 * 1024) });
    }
    UploadKind::from_content_type(content_type)
        .ok_or_else(|| ExtractError::UnsupportedType(content_type.to_string()))
}

/// Write an upload under `<dir>/<sha256>.<ext>`. Re-uploading the same
/// bytes lands on the same file.
pub fn store_upload(dir: &Path, bytes: &[u8], kind: UploadKind) -> Result<PathBuf, ExtractError> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let name = format!("{:x}.{}", hasher.finalize(), kind.extension());

    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    if !path.exists() {
        std::fs::write(&path, bytes)?;
    }
    debug!(path = %path.display(), bytes = bytes.len(), "Upload stored");
    Ok(path)
}

/// Try the embedded text layer of a PDF.
pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> PdfContent {
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned");
        return PdfContent::ScannedImage;
    }

    match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => {
            let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
            if meaningful < MIN_TEXT_CHARS {
                info!(chars = meaningful, "Extracted text too short, treating as scanned");
                PdfContent::ScannedImage
            } else {
                info!(chars = meaningful, "Text layer extracted");
                PdfContent::Text(text)
            }
        }
        Err(e) => {
            warn!(error = %e, "pdf-extract failed, falling back to OCR");
            PdfContent::ScannedImage
        }
    }
}

/// A page with image XObjects and no fonts is a scan. The document counts
/// as scanned when at least 80% of its pages are.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let resource = |page: &lopdf::Dictionary, key: &[u8]| -> bool {
        page.get(b"Resources")
            .ok()
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok())
            .and_then(|res| res.get(key).ok())
            .and_then(|x| doc.dereference(x).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok())
            .is_some_and(|d| !d.is_empty())
    };

    let image_only = pages
        .values()
        .filter_map(|id| doc.get_object(*id).ok())
        .filter_map(|obj| obj.as_dict().ok())
        .filter(|page| resource(page, b"XObject") && !resource(page, b"Font"))
        .count();

    let ratio = image_only as f64 / pages.len() as f64;
    debug!(total_pages = pages.len(), image_only, ratio = format!("{ratio:.2}"), "Scanned-page analysis");
    ratio >= 0.8
}

/// Shells out to poppler's `pdftoppm` and `tesseract`.
pub struct Ocr {
    tesseract_cmd: String,
    pdftoppm_cmd: String,
}

impl Ocr {
    pub fn new(cfg: &OcrConfig) -> Self {
        Self {
            tesseract_cmd: cfg.tesseract_cmd.clone(),
            pdftoppm_cmd: cfg.pdftoppm_cmd.clone(),
        }
    }

    /// Text of a stored upload: PDF text layer first, OCR otherwise.
    pub async fn document_text(&self, path: &Path, kind: UploadKind) -> Result<String, ExtractError> {
        let text = match kind {
            UploadKind::Pdf => {
                let bytes = tokio::fs::read(path).await?;
                match extract_text_from_pdf(&bytes) {
                    PdfContent::Text(text) => text,
                    PdfContent::ScannedImage => self.scanned_pdf_text(path).await?,
                    PdfContent::Error(e) => return Err(ExtractError::Ocr(e)),
                }
            }
            UploadKind::Png | UploadKind::Jpeg => self.image_text(path).await?,
        };

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ExtractError::NoText);
        }
        info!(chars = text.len(), "Document text ready");
        Ok(text)
    }

    async fn image_text(&self, image: &Path) -> Result<String, ExtractError> {
        let output = Command::new(&self.tesseract_cmd)
            .arg(image)
            .arg("stdout")
            .output()
            .await
            .map_err(|e| ExtractError::Ocr(format!("failed to run {}: {e}", self.tesseract_cmd)))?;
        if !output.status.success() {
            return Err(ExtractError::Ocr(format!(
                "{} exited with {}: {}",
                self.tesseract_cmd,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Rasterise every page next to the PDF, OCR them in order, then remove
    /// the page images.
    async fn scanned_pdf_text(&self, pdf: &Path) -> Result<String, ExtractError> {
        let pages_dir = pdf.with_extension("pages");
        tokio::fs::create_dir_all(&pages_dir).await?;
        let result = self.rasterise_and_read(pdf, &pages_dir).await;
        if let Err(e) = tokio::fs::remove_dir_all(&pages_dir).await {
            warn!(dir = %pages_dir.display(), error = %e, "Failed to remove page images");
        }
        result
    }

    async fn rasterise_and_read(&self, pdf: &Path, pages_dir: &Path) -> Result<String, ExtractError> {
        let output = Command::new(&self.pdftoppm_cmd)
            .args(["-r", "300", "-png"])
            .arg(pdf)
            .arg(pages_dir.join("page"))
            .output()
            .await
            .map_err(|e| ExtractError::Ocr(format!("failed to run {}: {e}", self.pdftoppm_cmd)))?;
        if !output.status.success() {
            return Err(ExtractError::Ocr(format!(
                "{} exited with {}",
                self.pdftoppm_cmd, output.status
            )));
        }

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(pages_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            pages.push(entry.path());
        }
        // pdftoppm zero-pads page numbers, so name order is page order.
        pages.sort();
        info!(pages = pages.len(), "PDF rasterised for OCR");

        let mut texts = Vec::with_capacity(pages.len());
        for page in &pages {
            texts.push(self.image_text(page).await?);
        }
        Ok(texts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes() {
        let result = extract_text_from_pdf(b"this is not a pdf");
        assert!(matches!(result, PdfContent::Error(_)));
    }

    #[test]
    fn test_validate_upload() {
        let max = 10 * 1024 * 1024;
        assert_eq!(validate_upload(b"%PDF", "application/pdf", max).unwrap(), UploadKind::Pdf);
        assert_eq!(validate_upload(b"x", "image/jpg", max).unwrap(), UploadKind::Jpeg);
        assert!(matches!(
            validate_upload(b"x", "text/plain", max),
            Err(ExtractError::UnsupportedType(t)) if t == "text/plain"
        ));
        let big = vec![0u8; max + 1];
        let err = validate_upload(&big, "image/png", max).unwrap_err();
        assert_eq!(err.to_string(), "File size exceeds 10MB limit");
    }

    #[test]
    fn test_store_upload_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let a = store_upload(dir.path(), b"same bytes", UploadKind::Png).unwrap();
        let b = store_upload(dir.path(), b"same bytes", UploadKind::Png).unwrap();
        let c = store_upload(dir.path(), b"other bytes", UploadKind::Png).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.extension().unwrap(), "png");
        assert_eq!(a.file_stem().unwrap().len(), 64);
    }

    #[test]
    fn test_kind_from_path() {
        assert_eq!(UploadKind::from_path(Path::new("bill.PDF")), Some(UploadKind::Pdf));
        assert_eq!(UploadKind::from_path(Path::new("ticket.jpeg")), Some(UploadKind::Jpeg));
        assert_eq!(UploadKind::from_path(Path::new("notes.txt")), None);
    }

    #[tokio::test]
    async fn test_missing_tesseract_is_an_ocr_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_upload(dir.path(), b"not really a png", UploadKind::Png).unwrap();
        let ocr = Ocr::new(&OcrConfig {
            tesseract_cmd: "definitely-not-a-real-tesseract".into(),
            pdftoppm_cmd: "pdftoppm".into(),
        });
        let err = ocr.document_text(&path, UploadKind::Png).await.unwrap_err();
        assert!(matches!(err, ExtractError::Ocr(_)));
    }
}
