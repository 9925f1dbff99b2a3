// src/classify.rs

use serde::Serialize;
use std::fmt;
use tracing::warn;

/// The three voucher families the back office tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum VoucherCategory {
    SupplierDetail,
    PurchaseOrder,
    Indent,
}

impl VoucherCategory {
    pub const ALL: [VoucherCategory; 3] = [Self::SupplierDetail, Self::PurchaseOrder, Self::Indent];

    /// Name used in summaries and as the CSV group key.
    pub const fn label(self) -> &'static str {
        match self {
            Self::SupplierDetail => "SupplierDetail",
            Self::PurchaseOrder => "PURCHASE ORDER",
            Self::Indent => "INDENT",
        }
    }

    /// Short name used in download URLs.
    pub const fn slug(self) -> &'static str {
        match self {
            Self::SupplierDetail => "SupplierDetail",
            Self::PurchaseOrder => "po",
            Self::Indent => "indent",
        }
    }

    pub const fn file_name(self) -> &'static str {
        match self {
            Self::SupplierDetail => "SupplierDetail.csv",
            Self::PurchaseOrder => "po.csv",
            Self::Indent => "indent.csv",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.slug() == slug)
    }
}

impl fmt::Display for VoucherCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Bucket a voucher type tag. Case-insensitive substring match in priority
/// order; `None` means the tag is unrecognized and the voucher is skipped.
///
/// A bare "PO" anywhere in the tag counts as a purchase order, so tags such
/// as "REPORT" or "DEPOSIT" land here too. Those matches are logged.
pub fn classify(type_tag: &str) -> Option<VoucherCategory> {
    let tag = type_tag.trim().to_uppercase();
    if tag.contains("SUPPLIERDETAIL") {
        Some(VoucherCategory::SupplierDetail)
    } else if tag.contains("PURCHASE ORDER") {
        Some(VoucherCategory::PurchaseOrder)
    } else if tag.contains("PO") {
        if tag != "PO" {
            warn!(type_tag = %type_tag, "Voucher type matched PURCHASE ORDER only via bare \"PO\" substring");
        }
        Some(VoucherCategory::PurchaseOrder)
    } else if tag.contains("INDENT") {
        Some(VoucherCategory::Indent)
    } else {
        None
    }
}
