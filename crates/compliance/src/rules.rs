use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Violation,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Violation => "VIOLATION",
        })
    }
}

/// Documents a rule applies to. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliesTo {
    /// Substrings of the document type, case-insensitive ("lease" matches "Lease Agreement").
    #[serde(default)]
    pub document_types: Vec<String>,
    /// Region flags, any of which must be set on the document.
    #[serde(default)]
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationField {
    Years,
    NoticeDays,
}

impl DurationField {
    pub fn unit(&self) -> &'static str {
        match self {
            Self::Years => "years",
            Self::NoticeDays => "days",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PresenceTarget {
    Clause { clause_types: Vec<String> },
    /// A monetary value whose reason contains `reason`, with a positive amount.
    MonetaryReason { reason: String },
    DefinedTerm { term: String },
    PartyRole { role: String },
    Jurisdiction,
    EffectiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternScope {
    /// Clause texts, optionally restricted to some clause types.
    Clauses {
        #[serde(default)]
        clause_types: Vec<String>,
    },
    Summary,
    /// Clause texts, summary and definitions.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    Present,
    Absent,
}

/// What a rule checks. Each kind is evaluated by its own branch of the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    /// Clauses of the given types must state a duration within `[min, max]`.
    DurationBound {
        clause_types: Vec<String>,
        field: DurationField,
        #[serde(default)]
        min: Option<u32>,
        #[serde(default)]
        max: Option<u32>,
        /// Treat a clause that states no duration as a violation instead of inapplicable.
        #[serde(default)]
        required: bool,
    },
    PresenceCheck { target: PresenceTarget },
    PatternMatch {
        pattern: String,
        scope: PatternScope,
        expect: Expectation,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub applies_to: AppliesTo,
    #[serde(default)]
    pub recommendation: Option<String>,
    pub check: RuleCheck,
}

/// Ordered rule definitions. Findings follow this order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

fn tags(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl RuleSet {
    pub fn new(rules: Vec<RuleDefinition>) -> Self {
        Self { rules }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let set: Self = toml::from_str(s)?;
        set.validate()?;
        Ok(set)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let set: Self = serde_json::from_str(s)?;
        set.validate()?;
        Ok(set)
    }

    /// Load a `.json` or `.toml` rule file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    /// The default contract checks.
    pub fn builtin() -> Self {
        Self::new(vec![
            RuleDefinition {
                id: "NDA-001".to_string(),
                name: "Confidentiality Period Check (NDA)".to_string(),
                description: "Ensures that a confidentiality clause specifies a duration of at least 3 years for confidentiality obligations.".to_string(),
                severity: Severity::Violation,
                applies_to: AppliesTo::default(),
                recommendation: Some("Ensure the confidentiality clause specifies a duration of at least 3 years to adequately protect sensitive information.".to_string()),
                check: RuleCheck::DurationBound {
                    clause_types: tags(&["Confidentiality", "NDA", "NonDisclosure"]),
                    field: DurationField::Years,
                    min: Some(3),
                    max: None,
                    required: true,
                },
            },
            RuleDefinition {
                id: "LEASE-001".to_string(),
                name: "Lease Agreement - Rent Amount Presence".to_string(),
                description: "Verifies that a rent amount is explicitly stated in a lease agreement.".to_string(),
                severity: Severity::Violation,
                applies_to: AppliesTo {
                    document_types: tags(&["lease"]),
                    regions: Vec::new(),
                },
                recommendation: Some("The lease agreement must explicitly state the rent amount to avoid financial disputes.".to_string()),
                check: RuleCheck::PresenceCheck {
                    target: PresenceTarget::MonetaryReason {
                        reason: "rent".to_string(),
                    },
                },
            },
            RuleDefinition {
                id: "GDPR-001".to_string(),
                name: "GDPR Data Minimization Principle".to_string(),
                description: "Checks that EU documents mention data minimization, such as collecting only necessary data.".to_string(),
                severity: Severity::Warning,
                applies_to: AppliesTo {
                    document_types: Vec::new(),
                    regions: tags(&["EU"]),
                },
                recommendation: Some("Consider adding stronger language around data minimization principles to align more closely with GDPR requirements.".to_string()),
                check: RuleCheck::PatternMatch {
                    pattern: r"(?i)data\s+minimi[sz]ation|(only|strictly)\s+(the\s+)?(personal\s+)?(data|information)\s+(that\s+is\s+|which\s+is\s+)?(strictly\s+)?necessary|data\s+processing".to_string(),
                    scope: PatternScope::All,
                    expect: Expectation::Present,
                },
            },
            RuleDefinition {
                id: "TERMINATION-001".to_string(),
                name: "Termination Notice Period Check".to_string(),
                description: "Ensures a termination clause specifies a notice period.".to_string(),
                severity: Severity::Warning,
                applies_to: AppliesTo::default(),
                recommendation: Some("A termination clause should clearly define the notice period (in days) required for contract termination to prevent ambiguity.".to_string()),
                check: RuleCheck::DurationBound {
                    clause_types: tags(&["Termination"]),
                    field: DurationField::NoticeDays,
                    min: None,
                    max: None,
                    required: true,
                },
            },
        ])
    }

    /// Reject rule sets the interpreter cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for (index, rule) in self.rules.iter().enumerate() {
            let id = rule.id.trim();
            if id.is_empty() {
                return Err(ConfigError::EmptyRuleId { index });
            }
            if !ids.insert(id) {
                return Err(ConfigError::DuplicateRuleId(id.to_string()));
            }
            rule.validate()?;
        }
        Ok(())
    }
}

fn require_clause_types(rule_id: &str, clause_types: &[String]) -> Result<(), ConfigError> {
    if clause_types.iter().all(|t| t.trim().is_empty()) {
        return Err(ConfigError::EmptyClauseTypes {
            rule_id: rule_id.to_string(),
        });
    }
    Ok(())
}

impl RuleDefinition {
    fn validate(&self) -> Result<(), ConfigError> {
        let empty = |field| ConfigError::EmptyField {
            rule_id: self.id.clone(),
            field,
        };

        match &self.check {
            RuleCheck::DurationBound {
                clause_types,
                min,
                max,
                required,
                ..
            } => {
                require_clause_types(&self.id, clause_types)?;
                if let (Some(min), Some(max)) = (min, max)
                    && min > max
                {
                    return Err(ConfigError::InvalidBounds {
                        rule_id: self.id.clone(),
                        reason: format!("min {min} is greater than max {max}"),
                    });
                }
                if min.is_none() && max.is_none() && !required {
                    return Err(ConfigError::InvalidBounds {
                        rule_id: self.id.clone(),
                        reason: "no bound and not required".to_string(),
                    });
                }
            }
            RuleCheck::PresenceCheck { target } => match target {
                PresenceTarget::Clause { clause_types } => {
                    require_clause_types(&self.id, clause_types)?
                }
                PresenceTarget::MonetaryReason { reason } if reason.trim().is_empty() => {
                    return Err(empty("reason"));
                }
                PresenceTarget::DefinedTerm { term } if term.trim().is_empty() => {
                    return Err(empty("term"));
                }
                PresenceTarget::PartyRole { role } if role.trim().is_empty() => {
                    return Err(empty("role"));
                }
                _ => {}
            },
            RuleCheck::PatternMatch { pattern, .. } => {
                if pattern.trim().is_empty() {
                    return Err(empty("pattern"));
                }
                Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    rule_id: self.id.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules_are_valid() {
        let set = RuleSet::builtin();
        assert!(set.validate().is_ok());
        let ids: Vec<&str> = set.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["NDA-001", "LEASE-001", "GDPR-001", "TERMINATION-001"]);
    }

    #[test]
    fn test_load_from_toml() {
        let toml = r#"
            [[rules]]
            id = "NDA-MAX"
            name = "NDA duration at most 5 years"
            severity = "VIOLATION"

            [rules.check]
            kind = "duration_bound"
            clause_types = ["NDA", "Confidentiality"]
            field = "years"
            max = 5

            [[rules]]
            id = "RENT"
            name = "Rent stated"
            severity = "WARNING"
            applies_to = { document_types = ["lease"] }

            [rules.check]
            kind = "presence_check"
            target = { kind = "monetary_reason", reason = "rent" }
        "#;

        let set = RuleSet::from_toml_str(toml).unwrap();
        assert_eq!(set.rules.len(), 2);
        assert_eq!(
            set.rules[0].check,
            RuleCheck::DurationBound {
                clause_types: vec!["NDA".to_string(), "Confidentiality".to_string()],
                field: DurationField::Years,
                min: None,
                max: Some(5),
                required: false,
            }
        );
        assert_eq!(set.rules[1].applies_to.document_types, vec!["lease"]);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"rules": [{
            "id": "NO-AUTO-RENEW",
            "name": "No automatic renewal",
            "severity": "INFO",
            "check": {"kind": "pattern_match", "pattern": "(?i)automatic(ally)? renew",
                      "scope": {"kind": "clauses"}, "expect": "absent"}
        }]}"#;

        let set = RuleSet::from_json_str(json).unwrap();
        assert!(matches!(
            set.rules[0].check,
            RuleCheck::PatternMatch {
                expect: Expectation::Absent,
                ..
            }
        ));
    }

    fn rule(id: &str, check: RuleCheck) -> RuleDefinition {
        RuleDefinition {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            severity: Severity::Warning,
            applies_to: AppliesTo::default(),
            recommendation: None,
            check,
        }
    }

    fn bound(min: Option<u32>, max: Option<u32>) -> RuleCheck {
        RuleCheck::DurationBound {
            clause_types: vec!["NDA".to_string()],
            field: DurationField::Years,
            min,
            max,
            required: false,
        }
    }

    #[test]
    fn test_malformed_rule_sets() {
        let dup = RuleSet::new(vec![rule("A", bound(None, Some(5))), rule("A", bound(None, Some(5)))]);
        assert!(matches!(dup.validate(), Err(ConfigError::DuplicateRuleId(id)) if id == "A"));

        let blank = RuleSet::new(vec![rule(" ", bound(None, Some(5)))]);
        assert!(matches!(blank.validate(), Err(ConfigError::EmptyRuleId { index: 0 })));

        let inverted = RuleSet::new(vec![rule("A", bound(Some(6), Some(5)))]);
        assert!(matches!(inverted.validate(), Err(ConfigError::InvalidBounds { .. })));

        let unbounded = RuleSet::new(vec![rule("A", bound(None, None))]);
        assert!(matches!(unbounded.validate(), Err(ConfigError::InvalidBounds { .. })));

        let bad_regex = RuleSet::new(vec![rule(
            "A",
            RuleCheck::PatternMatch {
                pattern: "(unclosed".to_string(),
                scope: PatternScope::Summary,
                expect: Expectation::Present,
            },
        )]);
        assert!(matches!(bad_regex.validate(), Err(ConfigError::InvalidPattern { .. })));

        let no_types = RuleSet::new(vec![rule(
            "A",
            RuleCheck::PresenceCheck {
                target: PresenceTarget::Clause {
                    clause_types: vec![],
                },
            },
        )]);
        assert!(matches!(no_types.validate(), Err(ConfigError::EmptyClauseTypes { .. })));

        assert!(matches!(
            RuleSet::from_toml_str("[[rules]]\nid = 3"),
            Err(ConfigError::Toml(_))
        ));
    }
}
