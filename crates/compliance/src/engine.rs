use extract::normalizer::{clause_key, entity_id, normalize_mention};
use extract::{Clause, EntityType, ExtractionResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::rules::{
    DurationField, Expectation, PatternScope, PresenceTarget, RuleCheck, RuleDefinition, RuleSet,
    Severity,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceFinding {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    pub evidence_entity_ids: Vec<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

fn clause_entity_id(clause: &Clause) -> Option<String> {
    clause_key(&clause.clause_type, &clause.text).map(|key| entity_id(EntityType::Clause, &key))
}

fn clause_ids<'a>(clauses: impl IntoIterator<Item = &'a Clause>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in clauses.into_iter().filter_map(clause_entity_id) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

struct RuleContext<'r> {
    rule: &'r RuleDefinition,
    findings: Vec<ComplianceFinding>,
}

impl<'r> RuleContext<'r> {
    fn new(rule: &'r RuleDefinition) -> Self {
        Self {
            rule,
            findings: Vec::new(),
        }
    }

    fn violated(&mut self, message: String, evidence: Vec<String>) {
        self.findings.push(ComplianceFinding {
            rule_id: self.rule.id.clone(),
            severity: self.rule.severity,
            message,
            evidence_entity_ids: evidence,
            recommendation: self.rule.recommendation.clone(),
        });
    }

    fn inapplicable(&mut self, reason: String, evidence: Vec<String>) {
        debug!(rule_id = %self.rule.id, reason = %reason, "Rule not applicable");
        self.findings.push(ComplianceFinding {
            rule_id: self.rule.id.clone(),
            severity: Severity::Info,
            message: format!("{} not applicable: {}", self.rule.name, reason),
            evidence_entity_ids: evidence,
            recommendation: None,
        });
    }
}

fn in_scope(rule: &RuleDefinition, result: &ExtractionResult) -> bool {
    let scope = &rule.applies_to;
    let type_ok = scope.document_types.is_empty()
        || scope.document_types.iter().any(|t| result.is_document_type(t));
    let region_ok = scope.regions.is_empty() || scope.regions.iter().any(|r| result.has_region(r));
    type_ok && region_ok
}

fn check_duration(
    ctx: &mut RuleContext<'_>,
    result: &ExtractionResult,
    clause_types: &[String],
    field: DurationField,
    min: Option<u32>,
    max: Option<u32>,
    required: bool,
) {
    let clauses: Vec<&Clause> = result.clauses.iter().filter(|c| c.is_type(clause_types)).collect();
    if clauses.is_empty() {
        ctx.inapplicable(format!("no {} clause found", clause_types.join("/")), Vec::new());
        return;
    }

    let value = |c: &Clause| match field {
        DurationField::Years => c.duration_years(),
        DurationField::NoticeDays => c.notice_period_days(),
    };
    let unit = field.unit();

    let missing: Vec<&Clause> = clauses.iter().copied().filter(|c| value(*c).is_none()).collect();
    let measured: Vec<(&Clause, u32)> = clauses
        .iter()
        .filter_map(|c| value(*c).map(|v| (*c, v)))
        .collect();

    if !missing.is_empty() {
        let message = format!("{} clause does not state a duration in {}", clause_types.join("/"), unit);
        if required {
            ctx.violated(message, clause_ids(missing));
        } else if measured.is_empty() {
            ctx.inapplicable(message, clause_ids(missing));
        }
    }

    if let Some(min) = min {
        let short: Vec<&(&Clause, u32)> = measured.iter().filter(|(_, v)| *v < min).collect();
        if let Some(&&(_, shortest)) = short.iter().min_by_key(|(_, v)| *v) {
            ctx.violated(
                format!("duration of {shortest} {unit} is below the minimum of {min} {unit}"),
                clause_ids(short.iter().map(|(c, _)| *c)),
            );
        }
    }

    if let Some(max) = max {
        let long: Vec<&(&Clause, u32)> = measured.iter().filter(|(_, v)| *v > max).collect();
        if let Some(&&(_, longest)) = long.iter().max_by_key(|(_, v)| *v) {
            ctx.violated(
                format!("duration of {longest} {unit} exceeds the maximum of {max} {unit}"),
                clause_ids(long.iter().map(|(c, _)| *c)),
            );
        }
    }
}

fn check_presence(ctx: &mut RuleContext<'_>, result: &ExtractionResult, target: &PresenceTarget) {
    let (present, evidence, what) = match target {
        PresenceTarget::Clause { clause_types } => {
            let ids = clause_ids(result.clauses.iter().filter(|c| c.is_type(clause_types)));
            (!ids.is_empty(), ids, format!("{} clause", clause_types.join("/")))
        }
        PresenceTarget::MonetaryReason { reason } => {
            let wanted = reason.to_lowercase();
            let hit = result.monetary_values.iter().any(|m| {
                m.amount.is_finite()
                    && m.amount > 0.0
                    && m.reason.as_deref().is_some_and(|r| r.to_lowercase().contains(&wanted))
            });
            (hit, Vec::new(), format!("{reason} amount"))
        }
        PresenceTarget::DefinedTerm { term } => {
            let wanted = normalize_mention(EntityType::DefinedTerm, term);
            let hit = result
                .defined_terms
                .iter()
                .any(|t| normalize_mention(EntityType::DefinedTerm, &t.term) == wanted);
            (hit, Vec::new(), format!("definition of \"{term}\""))
        }
        PresenceTarget::PartyRole { role } => {
            let wanted = role.to_lowercase();
            let hit = result
                .parties
                .iter()
                .any(|p| p.role.as_deref().is_some_and(|r| r.to_lowercase().contains(&wanted)));
            (hit, Vec::new(), format!("party with role {role}"))
        }
        PresenceTarget::Jurisdiction => {
            let hit = result.jurisdiction.as_deref().is_some_and(|j| !j.trim().is_empty())
                || result.clauses.iter().any(|c| c.jurisdiction.is_some());
            (hit, Vec::new(), "governing jurisdiction".to_string())
        }
        PresenceTarget::EffectiveDate => (
            result.primary_effective_date().is_some(),
            Vec::new(),
            "effective date".to_string(),
        ),
    };

    if !present {
        ctx.violated(format!("no {what} found"), evidence);
    }
}

fn check_pattern(
    ctx: &mut RuleContext<'_>,
    result: &ExtractionResult,
    regex: &Regex,
    scope: &PatternScope,
    expect: Expectation,
) {
    let clauses: Vec<&Clause> = match scope {
        PatternScope::Clauses { clause_types } if !clause_types.is_empty() => {
            result.clauses.iter().filter(|c| c.is_type(clause_types)).collect()
        }
        PatternScope::Clauses { .. } | PatternScope::All => result.clauses.iter().collect(),
        PatternScope::Summary => Vec::new(),
    };
    let mut texts: Vec<&str> = Vec::new();
    if matches!(scope, PatternScope::Summary | PatternScope::All)
        && let Some(summary) = result.summary.as_deref()
    {
        texts.push(summary);
    }
    if matches!(scope, PatternScope::All) {
        texts.extend(result.defined_terms.iter().map(|t| t.definition.as_str()));
    }

    if clauses.is_empty() && texts.iter().all(|t| t.trim().is_empty()) {
        ctx.inapplicable("no text in scope".to_string(), Vec::new());
        return;
    }

    let matching: Vec<&Clause> = clauses.iter().copied().filter(|c| regex.is_match(&c.text)).collect();
    let found = !matching.is_empty() || texts.iter().any(|t| regex.is_match(t));

    match expect {
        Expectation::Present if !found => {
            ctx.violated(format!("no text matches /{}/", regex.as_str()), Vec::new());
        }
        Expectation::Absent if found => {
            ctx.violated(
                format!("prohibited text matches /{}/", regex.as_str()),
                clause_ids(matching),
            );
        }
        _ => {}
    }
}

/// Evaluate every rule in order.
///
/// Fails only when the rule set itself is malformed. Rules outside their
/// `applies_to` scope emit nothing; rules whose inputs are missing emit one
/// INFO finding.
pub fn evaluate(
    result: &ExtractionResult,
    rule_set: &RuleSet,
) -> Result<Vec<ComplianceFinding>, ConfigError> {
    rule_set.validate()?;

    let mut findings = Vec::new();
    for rule in &rule_set.rules {
        if !in_scope(rule, result) {
            debug!(rule_id = %rule.id, document_id = %result.document_id, "Rule out of scope");
            continue;
        }

        let mut ctx = RuleContext::new(rule);
        match &rule.check {
            RuleCheck::DurationBound {
                clause_types,
                field,
                min,
                max,
                required,
            } => check_duration(&mut ctx, result, clause_types, *field, *min, *max, *required),
            RuleCheck::PresenceCheck { target } => check_presence(&mut ctx, result, target),
            RuleCheck::PatternMatch {
                pattern,
                scope,
                expect,
            } => {
                let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    rule_id: rule.id.clone(),
                    source,
                })?;
                check_pattern(&mut ctx, result, &regex, scope, *expect);
            }
        }
        findings.extend(ctx.findings);
    }

    info!(
        document_id = %result.document_id,
        rules = rule_set.rules.len(),
        findings = findings.len(),
        "Compliance evaluation complete"
    );
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::AppliesTo;
    use extract::{MonetaryValue, Party};

    fn rule(id: &str, severity: Severity, check: RuleCheck) -> RuleDefinition {
        RuleDefinition {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            severity,
            applies_to: AppliesTo::default(),
            recommendation: Some(format!("fix {id}")),
            check,
        }
    }

    fn nda_max_five() -> RuleDefinition {
        rule(
            "NDA-MAX",
            Severity::Violation,
            RuleCheck::DurationBound {
                clause_types: vec!["NDA".to_string(), "Confidentiality".to_string()],
                field: DurationField::Years,
                min: None,
                max: Some(5),
                required: false,
            },
        )
    }

    fn nda() -> ExtractionResult {
        let mut result = ExtractionResult::new("nda-1");
        result.parties = vec![Party::named("Acme Corp"), Party::named("Jane Doe")];
        result.clauses = vec![Clause::new("NDA", "confidentiality period of 3 years")];
        result
    }

    #[test]
    fn test_satisfied_duration_rule_emits_nothing() {
        let findings = evaluate(&nda(), &RuleSet::new(vec![nda_max_five()])).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn test_duration_violations_cite_the_clause() {
        let mut result = nda();
        result.clauses = vec![Clause::new("Confidentiality", "binding for ten (10) years")];

        let findings = evaluate(&result, &RuleSet::new(vec![nda_max_five()])).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Violation);
        assert!(findings[0].message.contains("10 years"));
        assert_eq!(
            findings[0].evidence_entity_ids,
            vec![clause_entity_id(&result.clauses[0]).unwrap()]
        );
        assert_eq!(findings[0].recommendation.as_deref(), Some("fix NDA-MAX"));
    }

    #[test]
    fn test_one_finding_per_violated_condition() {
        let mut result = nda();
        result.clauses = vec![
            Clause::new("NDA", "for 1 year"),
            Clause::new("NDA", "survives for 2 years"),
            Clause::new("NDA", "for 9 years"),
        ];
        let set = RuleSet::new(vec![rule(
            "NDA-RANGE",
            Severity::Warning,
            RuleCheck::DurationBound {
                clause_types: vec!["NDA".to_string()],
                field: DurationField::Years,
                min: Some(3),
                max: Some(5),
                required: false,
            },
        )]);

        let findings = evaluate(&result, &set).unwrap();
        assert_eq!(findings.len(), 2);
        assert!(findings[0].message.contains("below the minimum"));
        assert_eq!(findings[0].evidence_entity_ids.len(), 2);
        assert!(findings[1].message.contains("exceeds the maximum"));
    }

    #[test]
    fn test_missing_inputs_emit_info() {
        let mut result = nda();
        result.clauses.clear();

        let findings = evaluate(&result, &RuleSet::new(vec![nda_max_five()])).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Info);
        assert!(findings[0].message.contains("not applicable"));

        result.clauses = vec![Clause::new("NDA", "confidential for the term of the agreement")];
        let findings = evaluate(&result, &RuleSet::new(vec![nda_max_five()])).unwrap();
        assert_eq!(findings[0].severity, Severity::Info);
    }

    #[test]
    fn test_rules_are_independent() {
        let mut result = nda();
        result.document_type = Some("Lease Agreement".to_string());
        result.clauses.push(Clause::new("Termination", "either party may terminate at will"));

        let full = RuleSet::builtin();
        let all = evaluate(&result, &full).unwrap();

        for removed in &full.rules {
            let reduced = RuleSet::new(
                full.rules
                    .iter()
                    .filter(|r| r.id != removed.id)
                    .cloned()
                    .collect(),
            );
            let expected: Vec<ComplianceFinding> =
                all.iter().filter(|f| f.rule_id != removed.id).cloned().collect();
            assert_eq!(evaluate(&result, &reduced).unwrap(), expected);
        }
    }

    #[test]
    fn test_builtin_rules_on_a_lease() {
        let mut result = ExtractionResult::new("lease-1");
        result.document_type = Some("Lease Agreement".to_string());
        result.clauses = vec![Clause::new(
            "TerminationClause",
            "Either party may terminate with 60 days written notice.",
        )];

        let findings = evaluate(&result, &RuleSet::builtin()).unwrap();
        let ids: Vec<&str> = findings.iter().map(|f| f.rule_id.as_str()).collect();
        // no confidentiality clause, no rent, GDPR out of scope, notice stated
        assert_eq!(ids, vec!["NDA-001", "LEASE-001"]);
        assert_eq!(findings[0].severity, Severity::Info);
        assert_eq!(findings[1].severity, Severity::Violation);

        result.monetary_values.push(MonetaryValue {
            amount: 1500.0,
            currency: "USD".to_string(),
            raw: None,
            reason: Some("Monthly Rent".to_string()),
            frequency: None,
            span: None,
        });
        let findings = evaluate(&result, &RuleSet::builtin()).unwrap();
        assert!(findings.iter().all(|f| f.rule_id != "LEASE-001"));
    }

    #[test]
    fn test_gdpr_rule_scoped_to_eu() {
        let mut result = ExtractionResult::new("policy-1");
        result.summary = Some("Privacy policy describing cookies.".to_string());

        let gdpr = RuleSet::new(
            RuleSet::builtin()
                .rules
                .into_iter()
                .filter(|r| r.id == "GDPR-001")
                .collect(),
        );
        assert!(evaluate(&result, &gdpr).unwrap().is_empty());

        result.regions = vec!["eu".to_string()];
        let findings = evaluate(&result, &gdpr).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);

        result.summary = Some("We apply data minimisation to all records.".to_string());
        assert!(evaluate(&result, &gdpr).unwrap().is_empty());
    }

    #[test]
    fn test_prohibited_pattern_cites_matching_clauses() {
        let mut result = nda();
        result.clauses.push(Clause::new("Renewal", "This Agreement renews automatically each year."));
        let set = RuleSet::new(vec![rule(
            "NO-AUTO-RENEW",
            Severity::Warning,
            RuleCheck::PatternMatch {
                pattern: r"(?i)renews?\s+automatically".to_string(),
                scope: PatternScope::Clauses {
                    clause_types: vec![],
                },
                expect: Expectation::Absent,
            },
        )]);

        let findings = evaluate(&result, &set).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].evidence_entity_ids,
            vec![clause_entity_id(&result.clauses[1]).unwrap()]
        );
    }

    #[test]
    fn test_malformed_rule_set_fails_evaluation() {
        let set = RuleSet::new(vec![nda_max_five(), nda_max_five()]);
        assert!(matches!(
            evaluate(&nda(), &set),
            Err(ConfigError::DuplicateRuleId(_))
        ));
    }

    #[test]
    fn test_presence_of_party_role_and_jurisdiction() {
        let mut result = nda();
        let set = RuleSet::new(vec![
            rule(
                "ROLE",
                Severity::Warning,
                RuleCheck::PresenceCheck {
                    target: PresenceTarget::PartyRole {
                        role: "disclosing".to_string(),
                    },
                },
            ),
            rule(
                "LAW",
                Severity::Info,
                RuleCheck::PresenceCheck {
                    target: PresenceTarget::Jurisdiction,
                },
            ),
        ]);

        let findings = evaluate(&result, &set).unwrap();
        assert_eq!(findings.len(), 2);

        result.parties[0] = Party::named("Acme Corp").with_role("Disclosing Party");
        result.jurisdiction = Some("Delaware".to_string());
        assert!(evaluate(&result, &set).unwrap().is_empty());
    }
}
