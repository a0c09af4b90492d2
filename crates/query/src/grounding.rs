use async_trait::async_trait;
use chrono::NaiveDate;
use extract::EntityType;
use extract::normalizer::{canonical_token, normalized_tokens};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::render::{edge_line, entity_line, estimate_tokens, finding_line};
use crate::retriever::{RetrievedContext, entity_vocabulary, is_stopword};

/// The external capability that turns a grounding prompt into answer text.
#[async_trait]
pub trait AnswerModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundingConfig {
    pub max_payload_tokens: usize,
    pub answer_timeout_secs: u64,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            max_payload_tokens: 1200,
            answer_timeout_secs: 60,
        }
    }
}

/// What the answering model is handed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundingPayload {
    pub question: String,
    pub context: String,
    pub prompt: String,
    pub token_estimate: usize,
    /// Context lines dropped to respect `max_payload_tokens`.
    pub truncated_lines: usize,
}

/// Why the answering collaborator produced no usable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerFailure {
    #[error("answer model timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("answer model failed: {message}")]
    Model { message: String },
    #[error("answer model returned no text")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            Self::High
        } else if score >= 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundedAnswer {
    pub answer_text: String,
    pub cited_entity_ids: Vec<String>,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    /// Set when the answer mentions facts absent from the retrieved context.
    pub unsupported: bool,
    pub unsupported_mentions: Vec<String>,
    #[serde(default)]
    pub failure: Option<AnswerFailure>,
}

static NAME_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][\w&'’-]*\.?(?:[ \t]+(?:[A-Z][\w&'’-]*\.?|&|of))*").expect("valid regex")
});
static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("valid regex"));
static SPELLED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    let month = "(?:January|February|March|April|May|June|July|August|September|October|November|December)";
    Regex::new(&format!(
        r"\b{month}\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{4}}\b|\b\d{{1,2}}(?:st|nd|rd|th)?\s+(?:of\s+)?{month},?\s+\d{{4}}\b"
    ))
    .expect("valid regex")
});
static MONEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[$€£]\s?\d[\d,]*(?:\.\d+)?|\b\d[\d,]*(?:\.\d+)?\s?(?:USD|EUR|GBP|dollars|euros)\b")
        .expect("valid regex")
});
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("valid regex"));

const MONTHS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

/// Capitalized words that name no fact on their own.
const GENERIC_WORDS: &[&str] = &[
    "according", "agreement", "answer", "based", "clause", "context", "contract", "document",
    "however", "no", "none", "not", "party", "parties", "section", "yes", "also", "both", "each",
    "either", "neither", "under", "usd", "eur", "gbp",
];

fn is_generic(token: &str) -> bool {
    is_stopword(token) || GENERIC_WORDS.contains(&token) || MONTHS.contains(&token)
}

fn canonical_tokens(text: &str) -> Vec<String> {
    normalized_tokens(text)
        .iter()
        .map(|t| canonical_token(t).to_string())
        .collect()
}

fn at_sentence_start(text: &str, offset: usize) -> bool {
    let before = text[..offset].trim_end();
    before.is_empty() || before.ends_with(['.', '!', '?', ':', '\n'])
}

/// "March 3rd, 2025" or "3 of March 2025".
fn parse_spelled_date(text: &str) -> Option<NaiveDate> {
    let tokens = normalized_tokens(text);
    let month = tokens
        .iter()
        .find_map(|t| MONTHS.iter().position(|m| *m == t.as_str()))?;
    let mut numbers = tokens.iter().filter_map(|t| {
        t.trim_end_matches(|c: char| c.is_ascii_alphabetic())
            .parse::<u32>()
            .ok()
    });
    let (first, second) = (numbers.next()?, numbers.next()?);
    let (day, year) = if first > 31 { (second, first) } else { (first, second) };
    NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month as u32 + 1, day)
}

fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn parse_amount(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse().ok()
}

/// What a candidate mention asserts.
#[derive(Debug, Clone, PartialEq)]
enum Claim {
    Name(Vec<String>),
    /// `None` when the text looks like a date but is not a real one.
    Date(Option<NaiveDate>),
    Amount(Option<f64>),
}

#[derive(Debug, Clone)]
struct Candidate {
    surface: String,
    claim: Claim,
}

/// Name-like phrases, dates and amounts the answer asserts.
fn candidate_mentions(answer: &str) -> Vec<Candidate> {
    let mut out = Vec::new();

    for m in NAME_PHRASE.find_iter(answer) {
        let mut tokens = canonical_tokens(m.as_str());
        if tokens.len() == 1 && at_sentence_start(answer, m.start()) {
            continue;
        }
        while tokens.first().is_some_and(|t| is_generic(t)) {
            tokens.remove(0);
        }
        while tokens.last().is_some_and(|t| is_generic(t)) {
            tokens.pop();
        }
        if tokens.is_empty() {
            continue;
        }
        out.push(Candidate {
            surface: m.as_str().trim_end_matches('.').to_string(),
            claim: Claim::Name(tokens),
        });
    }
    for m in ISO_DATE.find_iter(answer) {
        out.push(Candidate {
            surface: m.as_str().to_string(),
            claim: Claim::Date(parse_iso_date(m.as_str())),
        });
    }
    for m in SPELLED_DATE.find_iter(answer) {
        out.push(Candidate {
            surface: m.as_str().to_string(),
            claim: Claim::Date(parse_spelled_date(m.as_str())),
        });
    }
    for m in MONEY.find_iter(answer) {
        out.push(Candidate {
            surface: m.as_str().to_string(),
            claim: Claim::Amount(parse_amount(m.as_str())),
        });
    }

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in out {
        if !kept.iter().any(|k| k.claim == candidate.claim) {
            kept.push(candidate);
        }
    }
    kept
}

fn contains_phrase(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty()
        && needle.len() <= haystack.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Facts the retrieved entities can vouch for.
struct ContextFacts {
    /// Token sequences of every label, mention and attribute value.
    phrases: Vec<Vec<String>>,
    tokens: HashSet<String>,
    dates: HashSet<NaiveDate>,
    amounts: Vec<f64>,
}

impl ContextFacts {
    fn from_context(context: &RetrievedContext) -> Self {
        let mut facts = Self {
            phrases: Vec::new(),
            tokens: HashSet::new(),
            dates: HashSet::new(),
            amounts: Vec::new(),
        };

        for entity in &context.selected_entities {
            facts.tokens.extend(entity_vocabulary(entity));

            let texts = std::iter::once(&entity.canonical_label)
                .chain(entity.mentions.iter())
                .chain(entity.attributes.values());
            for text in texts {
                let tokens = canonical_tokens(text);
                facts.tokens.extend(tokens.iter().cloned());
                facts.phrases.push(tokens);

                facts
                    .dates
                    .extend(ISO_DATE.find_iter(text).filter_map(|m| parse_iso_date(m.as_str())));
                facts.dates.extend(
                    SPELLED_DATE
                        .find_iter(text)
                        .filter_map(|m| parse_spelled_date(m.as_str())),
                );

                let amounts = if entity.entity_type == EntityType::Amount {
                    NUMBER.find_iter(text).collect::<Vec<_>>()
                } else {
                    MONEY.find_iter(text).collect()
                };
                facts
                    .amounts
                    .extend(amounts.iter().filter_map(|m| parse_amount(m.as_str())));
            }
        }
        facts
    }

    fn supports(&self, claim: &Claim) -> bool {
        match claim {
            Claim::Name(tokens) if tokens.len() == 1 => self.tokens.contains(&tokens[0]),
            // the whole name has to come from one entity
            Claim::Name(tokens) => self.phrases.iter().any(|p| contains_phrase(p, tokens)),
            Claim::Date(date) => date.is_some_and(|d| self.dates.contains(&d)),
            Claim::Amount(value) => {
                value.is_some_and(|v| self.amounts.iter().any(|a| (a - v).abs() < 0.005))
            }
        }
    }
}

/// Frames questions for the answering model and audits what comes back.
#[derive(Debug, Clone, Default)]
pub struct AnswerGroundingAssembler {
    config: GroundingConfig,
}

impl AnswerGroundingAssembler {
    pub fn new(config: GroundingConfig) -> Self {
        Self { config }
    }

    /// Serialize the context into a bounded prompt. Deterministic.
    pub fn assemble(&self, context: &RetrievedContext, question: &str) -> GroundingPayload {
        let label = |id: &str| {
            context
                .entity(id)
                .map(|e| e.canonical_label.clone())
                .unwrap_or_else(|| id.to_string())
        };

        let mut sections: Vec<(&str, Vec<String>)> = vec![
            (
                "RELEVANT ENTITIES:",
                context.selected_entities.iter().map(entity_line).collect(),
            ),
            (
                "KEY RELATIONSHIPS:",
                context
                    .selected_edges
                    .iter()
                    .map(|e| edge_line(e, &label(&e.source_entity_id), &label(&e.target_entity_id)))
                    .collect(),
            ),
            (
                "COMPLIANCE FINDINGS:",
                context.selected_findings.iter().map(finding_line).collect(),
            ),
        ];

        let frame_tokens = estimate_tokens(&build_prompt("", question));
        let mut used = frame_tokens;
        let mut truncated_lines = 0;
        for (_, lines) in sections.iter_mut() {
            let mut kept = Vec::with_capacity(lines.len());
            for line in lines.drain(..) {
                let cost = estimate_tokens(&line);
                if used + cost <= self.config.max_payload_tokens {
                    used += cost;
                    kept.push(line);
                } else {
                    truncated_lines += 1;
                }
            }
            *lines = kept;
        }

        let mut text = String::new();
        for (heading, lines) in &sections {
            if lines.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(heading);
            text.push('\n');
            for line in lines {
                text.push_str(line);
                text.push('\n');
            }
        }

        if truncated_lines > 0 {
            debug!(truncated_lines, "Grounding payload truncated");
        }

        GroundingPayload {
            question: question.to_string(),
            prompt: build_prompt(&text, question),
            token_estimate: used,
            context: text,
            truncated_lines,
        }
    }

    /// Check an answer against the context it was grounded on.
    pub fn assemble_and_validate(
        &self,
        context: &RetrievedContext,
        question: &str,
        answer_text: &str,
    ) -> GroundedAnswer {
        if answer_text.trim().is_empty() {
            return GroundedAnswer {
                answer_text: String::new(),
                cited_entity_ids: Vec::new(),
                confidence: 0.0,
                confidence_level: ConfidenceLevel::Low,
                unsupported: true,
                unsupported_mentions: Vec::new(),
                failure: None,
            };
        }

        let answer_tokens = canonical_tokens(answer_text);

        let mut cited_entity_ids = Vec::new();
        for entity in &context.selected_entities {
            let cited = std::iter::once(&entity.canonical_label)
                .chain(entity.mentions.iter())
                .any(|phrase| contains_phrase(&answer_tokens, &canonical_tokens(phrase)));
            if cited && !cited_entity_ids.contains(&entity.id) {
                cited_entity_ids.push(entity.id.clone());
            }
        }

        let facts = ContextFacts::from_context(context);
        let candidates = candidate_mentions(answer_text);
        let unsupported_mentions: Vec<String> = candidates
            .iter()
            .filter(|c| !facts.supports(&c.claim))
            .map(|c| c.surface.clone())
            .collect();

        let unsupported = !unsupported_mentions.is_empty();
        let mut confidence = if candidates.is_empty() {
            if cited_entity_ids.is_empty() { 0.5 } else { 1.0 }
        } else {
            (candidates.len() - unsupported_mentions.len()) as f64 / candidates.len() as f64
        };
        if unsupported {
            confidence *= 0.5;
        }

        if unsupported {
            debug!(
                question = %question,
                mentions = ?unsupported_mentions,
                "Answer mentions facts outside the context"
            );
        }

        GroundedAnswer {
            answer_text: answer_text.trim().to_string(),
            cited_entity_ids,
            confidence,
            confidence_level: ConfidenceLevel::from_score(confidence),
            unsupported,
            unsupported_mentions,
            failure: None,
        }
    }

    /// One bounded call to the answering model, then validation.
    ///
    /// Never fails: timeouts and model errors come back as an unsupported
    /// placeholder answer with `failure` set.
    pub async fn answer(
        &self,
        context: &RetrievedContext,
        question: &str,
        model: &dyn AnswerModel,
    ) -> GroundedAnswer {
        let payload = self.assemble(context, question);
        let seconds = self.config.answer_timeout_secs;

        let outcome = tokio::time::timeout(Duration::from_secs(seconds), model.generate(&payload.prompt)).await;
        self.resolve_outcome(context, question, outcome.map_err(|_| AnswerFailure::Timeout { seconds }))
    }

    /// Same as [`answer`](Self::answer) with an explicit timeout.
    pub async fn answer_within(
        &self,
        context: &RetrievedContext,
        question: &str,
        model: &dyn AnswerModel,
        timeout: Duration,
    ) -> GroundedAnswer {
        let payload = self.assemble(context, question);
        let outcome = tokio::time::timeout(timeout, model.generate(&payload.prompt)).await;
        self.resolve_outcome(
            context,
            question,
            outcome.map_err(|_| AnswerFailure::Timeout {
                seconds: timeout.as_secs(),
            }),
        )
    }

    fn resolve_outcome(
        &self,
        context: &RetrievedContext,
        question: &str,
        outcome: Result<anyhow::Result<String>, AnswerFailure>,
    ) -> GroundedAnswer {
        let failure = match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                return self.assemble_and_validate(context, question, &text);
            }
            Ok(Ok(_)) => AnswerFailure::Empty,
            Ok(Err(e)) => AnswerFailure::Model {
                message: format!("{e:#}"),
            },
            Err(timeout) => timeout,
        };

        warn!(error = %failure, "Answer model call failed");
        GroundedAnswer {
            answer_text: format!("No grounded answer is available: {failure}."),
            cited_entity_ids: Vec::new(),
            confidence: 0.0,
            confidence_level: ConfidenceLevel::Low,
            unsupported: true,
            unsupported_mentions: Vec::new(),
            failure: Some(failure),
        }
    }
}

fn build_prompt(context: &str, question: &str) -> String {
    format!(
        r#"You are a legal assistant answering questions about a single document.

CONTEXT:
{}

USER QUESTION: {}

INSTRUCTIONS:
- Answer the question using only information from the context above
- Refer to parties, dates and amounts exactly as they appear in the context
- If the context doesn't contain enough information, say so
- Keep your answer concise and factual

ANSWER:"#,
        context, question
    )
}
