use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: u64,
    /// Repeated lines within the upload.
    pub duplicates_in_upload: u64,
    /// Lines matching a code already stored for the product.
    pub already_stored: u64,
}
