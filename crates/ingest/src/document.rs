use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use unicode_segmentation::UnicodeSegmentation;

static PAGE_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)page \d+ of \d+|\[\s*\d+\s*\]").expect("valid regex"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));
static INLINE_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub index: usize,
    pub text: String,
    pub offset: (usize, usize), // [start, end) byte positions in the cleaned text
    pub sentences: Vec<String>,
}

/// Plain text of a document after cleaning, plus its paragraph structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentContent {
    /// Hash of the cleaned text; stable across re-reads of the same content.
    pub doc_id: String,
    pub file_name: String,
    pub file_type: String,
    pub text: String,
    pub paragraphs: Vec<Paragraph>,
}

impl DocumentContent {
    pub fn from_text(file_name: String, file_type: String, raw: &str) -> Self {
        let text = clean_text(raw);
        let paragraphs = split_paragraphs(&text);
        Self {
            doc_id: content_hash(&text),
            file_name,
            file_type,
            text,
            paragraphs,
        }
    }

    /// Text prefix that fits within `max_chars`, cut on a char boundary.
    pub fn truncated(&self, max_chars: usize) -> &str {
        match self.text.char_indices().nth(max_chars) {
            Some((idx, _)) => &self.text[..idx],
            None => &self.text,
        }
    }
}

/// Generate a stable content hash (first 16 bytes of SHA-256, hex encoded)
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Remove page markers and odd whitespace, collapse blank lines and runs of spaces.
pub fn clean_text(text: &str) -> String {
    let cleaned = PAGE_MARKERS.replace_all(text, "");
    let cleaned = cleaned.replace('\u{a0}', " ").replace('\u{200b}', "");
    let cleaned = BLANK_LINES.replace_all(&cleaned, "\n\n");
    let cleaned = INLINE_SPACES.replace_all(&cleaned, " ");
    cleaned.trim().to_string()
}

fn split_paragraphs(text: &str) -> Vec<Paragraph> {
    let mut paragraphs = Vec::new();
    let mut cursor = 0;

    for block in text.split("\n\n") {
        let block_start = cursor;
        cursor += block.len() + 2;

        let trimmed = block.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lead = block.len() - block.trim_start().len();
        let start = block_start + lead;

        let sentences = trimmed
            .unicode_sentences()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        paragraphs.push(Paragraph {
            index: paragraphs.len(),
            text: trimmed.to_string(),
            offset: (start, start + trimmed.len()),
            sentences,
        });
    }

    paragraphs
}
