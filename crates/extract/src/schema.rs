use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::LazyLock;

use crate::error::SchemaError;
use crate::normalizer::normalize_clause_tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Document,
    Party,
    Date,
    Amount,
    DefinedTerm,
    Clause,
    Jurisdiction,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Party => "party",
            Self::Date => "date",
            Self::Amount => "amount",
            Self::DefinedTerm => "defined_term",
            Self::Clause => "clause",
            Self::Jurisdiction => "jurisdiction",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relation types a graph edge can carry. None of them permits a self-loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    PartyTo,
    Defines,
    References,
    GovernedBy,
    Contains,
    HasDate,
    HasAmount,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PartyTo => "PARTY_TO",
            Self::Defines => "DEFINES",
            Self::References => "REFERENCES",
            Self::GovernedBy => "GOVERNED_BY",
            Self::Contains => "CONTAINS",
            Self::HasDate => "HAS_DATE",
            Self::HasAmount => "HAS_AMOUNT",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte offset range `[start, end)` in the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyKind {
    Individual,
    Company,
    Organization,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>, // e.g. "Lessor", "Disclosing Party"
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub kind: Option<PartyKind>,
    #[serde(default)]
    pub span: Option<Span>,
}

impl Party {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
            address: None,
            kind: None,
            span: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateMention {
    pub value: NaiveDate,
    #[serde(default)]
    pub date_type: Option<String>, // "Effective Date", "Termination Date", ...
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub span: Option<Span>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentFrequency {
    Monthly,
    Quarterly,
    Annually,
    OneTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonetaryValue {
    pub amount: f64,
    #[serde(default)]
    pub currency: String,
    /// Surface form as written in the document, e.g. "$1,500".
    #[serde(default)]
    pub raw: Option<String>,
    #[serde(default)]
    pub reason: Option<String>, // "Rent", "Fine", "Fee", ...
    #[serde(default)]
    pub frequency: Option<PaymentFrequency>,
    #[serde(default)]
    pub span: Option<Span>,
}

impl MonetaryValue {
    pub fn surface(&self) -> String {
        match &self.raw {
            Some(raw) if !raw.trim().is_empty() => raw.clone(),
            _ => format!("{} {}", self.amount, self.currency).trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinedTerm {
    pub term: String,
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    #[serde(rename = "type")]
    pub clause_type: String,
    pub text: String,
    #[serde(default)]
    pub span: Option<Span>,
    #[serde(default)]
    pub duration_years: Option<u32>,
    #[serde(default)]
    pub notice_period_days: Option<u32>,
    /// Parties the clause names as bound or benefited.
    #[serde(default)]
    pub parties: Vec<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
}

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:(\d+)|(one|two|three|four|five|six|seven|eight|nine|ten|twelve|fifteen|twenty))(?:\s*\((\d+)\))?[\s-]*(year|month|day)s?\b",
    )
    .expect("valid regex")
});

fn number_word(word: &str) -> Option<u32> {
    let n = match word.to_lowercase().as_str() {
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "twelve" => 12,
        "fifteen" => 15,
        "twenty" => 20,
        _ => return None,
    };
    Some(n)
}

/// All `(quantity, unit)` pairs like "3 years", "five (5) years", "30-day" in the text.
fn durations(text: &str) -> Vec<(u32, String)> {
    DURATION
        .captures_iter(text)
        .filter_map(|caps| {
            let quantity = caps
                .get(3)
                .or_else(|| caps.get(1))
                .and_then(|m| m.as_str().parse().ok())
                .or_else(|| caps.get(2).and_then(|m| number_word(m.as_str())))?;
            let unit = caps.get(4)?.as_str().to_lowercase();
            Some((quantity, unit))
        })
        .collect()
}

impl Clause {
    pub fn new(clause_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            clause_type: clause_type.into(),
            text: text.into(),
            span: None,
            duration_years: None,
            notice_period_days: None,
            parties: Vec::new(),
            jurisdiction: None,
        }
    }

    /// True when the type tag matches any of `tags` ("ConfidentialityClause" matches "confidentiality").
    pub fn is_type(&self, tags: &[String]) -> bool {
        let own = normalize_clause_tag(&self.clause_type);
        tags.iter().any(|t| normalize_clause_tag(t) == own)
    }

    /// Explicit duration, otherwise the first whole-year duration written in the text.
    pub fn duration_years(&self) -> Option<u32> {
        self.duration_years.or_else(|| {
            durations(&self.text).into_iter().find_map(|(n, unit)| match unit.as_str() {
                "year" => Some(n),
                "month" if n % 12 == 0 => Some(n / 12),
                _ => None,
            })
        })
    }

    pub fn notice_period_days(&self) -> Option<u32> {
        self.notice_period_days.or_else(|| {
            durations(&self.text)
                .into_iter()
                .find_map(|(n, unit)| (unit == "day").then_some(n))
        })
    }
}

/// A relation the extraction step asserted between two mentions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionRef {
    pub kind: EntityType,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source: MentionRef,
    pub target: MentionRef,
    pub relation: RelationType,
    #[serde(default)]
    pub evidence: Option<Span>,
}

/// Structured facts about one document, as produced by the extraction collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub document_id: String,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    /// Region flags such as "EU" that scope compliance rules.
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub parties: Vec<Party>,
    #[serde(default)]
    pub dates: Vec<DateMention>,
    #[serde(default)]
    pub monetary_values: Vec<MonetaryValue>,
    #[serde(default)]
    pub defined_terms: Vec<DefinedTerm>,
    #[serde(default)]
    pub clauses: Vec<Clause>,
    #[serde(default)]
    pub relations: Vec<ExtractedRelation>,
}

const EFFECTIVE_DATE_KEYWORDS: &[&str] = &[
    "effective date",
    "policy date",
    "agreement date",
    "execution date",
    "document date",
    "date",
];

impl ExtractionResult {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            document_type: None,
            title: None,
            jurisdiction: None,
            regions: Vec::new(),
            effective_date: None,
            summary: None,
            parties: Vec::new(),
            dates: Vec::new(),
            monetary_values: Vec::new(),
            defined_terms: Vec::new(),
            clauses: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let result: Self = serde_json::from_str(json)?;
        result.validate()?;
        Ok(result)
    }

    /// Reject payloads whose shape cannot be trusted downstream.
    ///
    /// Empty mention strings are not rejected here; the resolver drops them
    /// individually and records a warning.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.document_id.trim().is_empty() {
            return Err(SchemaError::EmptyDocumentId);
        }

        let spans = self
            .parties
            .iter()
            .enumerate()
            .map(|(i, p)| (format!("parties[{i}]"), p.span))
            .chain(self.dates.iter().enumerate().map(|(i, d)| (format!("dates[{i}]"), d.span)))
            .chain(
                self.monetary_values
                    .iter()
                    .enumerate()
                    .map(|(i, m)| (format!("monetary_values[{i}]"), m.span)),
            )
            .chain(
                self.defined_terms
                    .iter()
                    .enumerate()
                    .map(|(i, t)| (format!("defined_terms[{i}]"), t.span)),
            )
            .chain(self.clauses.iter().enumerate().map(|(i, c)| (format!("clauses[{i}]"), c.span)))
            .chain(
                self.relations
                    .iter()
                    .enumerate()
                    .map(|(i, r)| (format!("relations[{i}]"), r.evidence)),
            );

        for (field, span) in spans {
            if let Some(span) = span
                && span.start > span.end
            {
                return Err(SchemaError::InvalidSpan {
                    field,
                    start: span.start,
                    end: span.end,
                });
            }
        }

        if let Some(index) = self.monetary_values.iter().position(|m| !m.amount.is_finite()) {
            return Err(SchemaError::InvalidAmount { index });
        }

        if let Some(index) = self.clauses.iter().position(|c| c.clause_type.trim().is_empty()) {
            return Err(SchemaError::EmptyClauseType { index });
        }

        Ok(())
    }

    /// Explicit effective date, else the best-typed extracted date, else the first one.
    pub fn primary_effective_date(&self) -> Option<NaiveDate> {
        if self.effective_date.is_some() {
            return self.effective_date;
        }

        for keyword in EFFECTIVE_DATE_KEYWORDS {
            let hit = self.dates.iter().find(|d| {
                d.date_type
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase().contains(keyword))
            });
            if let Some(date) = hit {
                return Some(date.value);
            }
        }

        self.dates.first().map(|d| d.value)
    }

    pub fn has_region(&self, region: &str) -> bool {
        self.regions.iter().any(|r| r.eq_ignore_ascii_case(region))
    }

    /// Case-insensitive substring match on the document type ("lease" matches "Lease Agreement").
    pub fn is_document_type(&self, wanted: &str) -> bool {
        self.document_type
            .as_deref()
            .is_some_and(|t| t.to_lowercase().contains(&wanted.to_lowercase()))
    }

    /// Hash of the canonical JSON form, used as an input hash for cache keys.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(&hasher.finalize()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_duration_parsing() {
        let nda = Clause::new("NDA", "confidentiality period of 3 years");
        assert_eq!(nda.duration_years(), Some(3));

        let spelled = Clause::new("Confidentiality", "binding for a period of five (5) years");
        assert_eq!(spelled.duration_years(), Some(5));

        let months = Clause::new("Confidentiality", "a 24-month confidentiality term");
        assert_eq!(months.duration_years(), Some(2));

        let odd_months = Clause::new("Confidentiality", "for 18 months");
        assert_eq!(odd_months.duration_years(), None);

        let mut explicit = Clause::new("NDA", "ten years");
        explicit.duration_years = Some(7);
        assert_eq!(explicit.duration_years(), Some(7));
    }

    #[test]
    fn test_notice_period_parsing() {
        let clause = Clause::new("Termination", "terminated by either party with 90 days notice");
        assert_eq!(clause.notice_period_days(), Some(90));
        assert_eq!(Clause::new("Termination", "at will").notice_period_days(), None);
    }

    #[test]
    fn test_clause_type_matching() {
        let clause = Clause::new("ConfidentialityClause", "...");
        assert!(clause.is_type(&["confidentiality".to_string()]));
        assert!(clause.is_type(&["NDA".to_string(), "Confidentiality Clause".to_string()]));
        assert!(!clause.is_type(&["termination".to_string()]));
    }

    #[test]
    fn test_primary_effective_date_prefers_keywords() {
        let mut result = ExtractionResult::new("doc-1");
        result.dates = vec![
            DateMention {
                value: date("2025-03-01"),
                date_type: Some("Payment Due Date".to_string()),
                context: None,
                span: None,
            },
            DateMention {
                value: date("2025-01-01"),
                date_type: Some("Effective Date".to_string()),
                context: None,
                span: None,
            },
        ];
        assert_eq!(result.primary_effective_date(), Some(date("2025-01-01")));

        result.effective_date = Some(date("2024-12-31"));
        assert_eq!(result.primary_effective_date(), Some(date("2024-12-31")));
    }

    #[test]
    fn test_validate_rejects_bad_payloads() {
        assert!(matches!(
            ExtractionResult::new("  ").validate(),
            Err(SchemaError::EmptyDocumentId)
        ));

        let mut inverted = ExtractionResult::new("doc");
        let mut party = Party::named("Acme Corp");
        party.span = Some(Span::new(10, 2));
        inverted.parties.push(party);
        assert!(matches!(inverted.validate(), Err(SchemaError::InvalidSpan { .. })));

        let mut untyped = ExtractionResult::new("doc");
        untyped.clauses.push(Clause::new("", "text"));
        assert!(matches!(
            untyped.validate(),
            Err(SchemaError::EmptyClauseType { index: 0 })
        ));
    }

    #[test]
    fn test_from_json_accepts_sparse_payload() {
        let json = r#"{
            "document_id": "lease-7",
            "document_type": "Lease Agreement",
            "parties": [{"name": "ABC Corp", "role": "Lessor"}],
            "monetary_values": [{"amount": 1500.0, "currency": "USD", "reason": "Rent", "frequency": "monthly"}],
            "clauses": [{"type": "Termination", "text": "Notice period is 30 days."}],
            "relations": [{
                "source": {"kind": "party", "text": "ABC Corp"},
                "target": {"kind": "clause", "text": "Notice period is 30 days."},
                "relation": "REFERENCES"
            }]
        }"#;

        let result = ExtractionResult::from_json(json).unwrap();
        assert!(result.is_document_type("lease"));
        assert_eq!(result.parties[0].role.as_deref(), Some("Lessor"));
        assert_eq!(result.relations[0].relation, RelationType::References);
        assert_eq!(result.fingerprint(), result.clone().fingerprint());
    }
}
