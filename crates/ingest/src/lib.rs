pub mod document;
pub mod reader;

pub use document::{DocumentContent, Paragraph, clean_text, content_hash};
pub use reader::FileReader;

use anyhow::Result;
use std::path::Path;
use tracing::info;

/// Read a plain-text legal document and preprocess it into paragraphs.
pub async fn ingest_file(file_path: &Path) -> Result<DocumentContent> {
    let raw = FileReader::read_file(file_path).await?;

    let file_name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file_path.to_string_lossy().to_string());
    let file_type = file_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("txt")
        .to_lowercase();

    let document = DocumentContent::from_text(file_name, file_type, &raw);
    info!(
        file = %document.file_name,
        doc_id = %document.doc_id,
        paragraphs = document.paragraphs.len(),
        "Ingested document"
    );

    Ok(document)
}
