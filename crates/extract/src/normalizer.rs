use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

use crate::schema::EntityType;

static DROPPED_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.,'’]").expect("valid regex"));
static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex"));

/// Lowercase, drop abbreviation punctuation ("L.L.C." -> "llc"), turn every
/// other non-alphanumeric run into a single space.
pub fn normalize_text(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let stripped = DROPPED_PUNCTUATION.replace_all(&lowered, "");
    SEPARATORS.replace_all(&stripped, " ").trim().to_string()
}

pub fn normalized_tokens(raw: &str) -> Vec<String> {
    normalize_text(raw)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Canonical spelling of a corporate-form suffix; other tokens pass through.
pub fn canonical_token(token: &str) -> &str {
    match token {
        "inc" | "incorporated" => "inc",
        "corp" | "corporation" => "corp",
        "co" | "company" => "co",
        "ltd" | "limited" => "ltd",
        "llc" => "llc",
        "llp" => "llp",
        "lp" => "lp",
        "plc" => "plc",
        "gmbh" => "gmbh",
        other => other,
    }
}

fn is_legal_suffix(token: &str) -> bool {
    matches!(
        token,
        "inc"
            | "incorporated"
            | "corp"
            | "corporation"
            | "co"
            | "company"
            | "ltd"
            | "limited"
            | "llc"
            | "llp"
            | "lp"
            | "plc"
            | "gmbh"
    )
}

/// Collapse trailing legal-form suffix variants: "acme corporation" and "acme corp"
/// share the key "acme corp". Only the trailing run is rewritten.
fn canonicalize_party(normalized: &str) -> String {
    let mut tokens: Vec<&str> = normalized.split_whitespace().collect();

    if tokens.len() > 3 && tokens[tokens.len() - 3..] == ["limited", "liability", "company"] {
        tokens.truncate(tokens.len() - 3);
        tokens.push("llc");
    }

    let mut end = tokens.len();
    while end > 1 && is_legal_suffix(tokens[end - 1]) {
        tokens[end - 1] = canonical_token(tokens[end - 1]);
        end -= 1;
    }

    tokens.join(" ")
}

/// Grouping key for a raw mention of the given type. `None` for mentions that
/// normalize to nothing.
pub fn normalize_mention(kind: EntityType, raw: &str) -> Option<String> {
    let normalized = normalize_text(raw);
    if normalized.is_empty() {
        return None;
    }

    match kind {
        EntityType::Party => Some(canonicalize_party(&normalized)),
        _ => Some(normalized),
    }
}

/// Amounts group by value and currency regardless of how they were written.
pub fn amount_key(amount: f64, currency: &str) -> String {
    format!("{:.2} {}", amount, currency.trim().to_uppercase())
        .trim()
        .to_string()
}

/// "ConfidentialityClause", "confidentiality_clause" and "Confidentiality" all map to "confidentiality".
pub fn normalize_clause_tag(tag: &str) -> String {
    let compact: String = tag
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    match compact.strip_suffix("clause") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => compact,
    }
}

/// Clauses group by type tag and normalized text.
pub fn clause_key(tag: &str, text: &str) -> Option<String> {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return None;
    }
    Some(format!("{}|{}", normalize_clause_tag(tag), normalized))
}

/// Stable entity id derived from type and normalized key, independent of
/// insertion order.
pub fn entity_id(kind: EntityType, normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    format!("{}:{}", kind.as_str(), hex::encode(&digest[..8]))
}

/// Id of the document root node.
pub fn document_entity_id(document_id: &str) -> String {
    entity_id(EntityType::Document, &document_id.trim().to_lowercase())
}
