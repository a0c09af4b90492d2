use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

/// Reads plain-text documents. Binary formats (DOCX, PDF) are converted upstream.
pub struct FileReader;

impl FileReader {
    pub async fn read_file(path: &Path) -> Result<String> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "txt" | "md" => {
                let content = fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read file: {:?}", path))?;
                Ok(content)
            }
            _ => anyhow::bail!("Unsupported file format: {:?}", extension),
        }
    }
}
