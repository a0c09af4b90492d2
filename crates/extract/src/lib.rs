pub mod error;
pub mod llm;
pub mod normalizer;
pub mod prompt;
pub mod schema;

pub use error::SchemaError;
pub use llm::{LlmConfig, OllamaClient};
pub use schema::{
    Clause, DateMention, DefinedTerm, EntityType, ExtractedRelation, ExtractionResult, MentionRef,
    MonetaryValue, Party, PartyKind, PaymentFrequency, RelationType, Span,
};

use anyhow::{Context, Result};
use ingest::DocumentContent;
use tracing::{info, warn};

/// Longest document prefix sent to the extraction model.
pub const DEFAULT_CONTEXT_LIMIT_CHARS: usize = 10_000;

pub struct Extractor {
    llm_client: OllamaClient,
    context_limit_chars: usize,
}

impl Extractor {
    pub fn new(llm_client: OllamaClient, context_limit_chars: usize) -> Self {
        Self {
            llm_client,
            context_limit_chars,
        }
    }

    /// Extract structured facts from a preprocessed document
    pub async fn extract(&self, document: &DocumentContent) -> Result<ExtractionResult> {
        let text = document.truncated(self.context_limit_chars);
        if text.len() < document.text.len() {
            warn!(
                file = %document.file_name,
                limit = self.context_limit_chars,
                "Document longer than context limit, truncating"
            );
        }

        let prompt = prompt::build_extraction_prompt(text);
        let json_str = self
            .llm_client
            .generate_json_with_retry(&prompt, 3)
            .await
            .context("Failed to extract facts after retries")?;

        let result = parse_extraction(&document.doc_id, &json_str)?;
        info!(
            document_id = %result.document_id,
            parties = result.parties.len(),
            dates = result.dates.len(),
            clauses = result.clauses.len(),
            "Extracted document facts"
        );
        Ok(result)
    }
}

/// Parse model output into a validated extraction result bound to `document_id`.
pub fn parse_extraction(document_id: &str, json: &str) -> Result<ExtractionResult> {
    let mut value: serde_json::Value =
        serde_json::from_str(json).context("Extraction output is not JSON")?;

    let object = value
        .as_object_mut()
        .context("Extraction output is not a JSON object")?;
    object.insert(
        "document_id".to_string(),
        serde_json::Value::String(document_id.to_string()),
    );

    let mut result: ExtractionResult =
        serde_json::from_value(value).map_err(SchemaError::from)?;
    result.validate()?;

    if result.effective_date.is_none() {
        result.effective_date = result.primary_effective_date();
    }

    Ok(result)
}
