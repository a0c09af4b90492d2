use extract::normalizer::{
    amount_key, clause_key, document_entity_id, entity_id, normalize_mention, normalize_text,
};
use extract::{EntityType, ExtractionResult, MentionRef, RelationType, Span};
use std::collections::{BTreeMap, HashMap};

/// The contract root node the builder adds on top of the resolved entities.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRoot {
    pub id: String,
    pub label: String,
    pub attributes: BTreeMap<String, String>,
}

/// Entities that appear together in one clause.
#[derive(Debug, Clone, PartialEq)]
pub struct CoOccurrence {
    pub clause_id: String,
    pub member_ids: Vec<String>,
    pub evidence: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationHint {
    pub source_id: String,
    pub target_id: String,
    pub relation: RelationType,
    pub evidence: Option<Span>,
}

/// Relation evidence derived from an extraction result, addressed by entity id.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationHints {
    pub root: DocumentRoot,
    pub co_occurrences: Vec<CoOccurrence>,
    pub typed: Vec<RelationHint>,
}

struct Candidate {
    id: String,
    kind: EntityType,
    tokens: Vec<String>,
    span: Option<Span>,
}

fn contains_phrase(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty()
        && needle.len() <= haystack.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

impl Candidate {
    fn appears_in(&self, clause_tokens: &[String], clause_span: Option<Span>) -> bool {
        let inside = matches!((clause_span, self.span), (Some(outer), Some(inner)) if outer.contains(&inner));
        inside || contains_phrase(clause_tokens, &self.tokens)
    }
}

impl RelationHints {
    pub fn from_extraction(result: &ExtractionResult) -> Self {
        let root = document_root(result);
        let mut lookup: HashMap<(EntityType, String), String> = HashMap::new();
        let mut candidates = Vec::new();
        let mut typed = Vec::new();

        for party in &result.parties {
            let Some(key) = normalize_mention(EntityType::Party, &party.name) else {
                continue;
            };
            let id = entity_id(EntityType::Party, &key);
            lookup.entry((EntityType::Party, key)).or_insert_with(|| id.clone());
            if party.role.as_deref().is_some_and(|r| !r.trim().is_empty()) {
                typed.push(RelationHint {
                    source_id: id.clone(),
                    target_id: root.id.clone(),
                    relation: RelationType::PartyTo,
                    evidence: party.span,
                });
            }
            candidates.push(Candidate {
                id,
                kind: EntityType::Party,
                tokens: normalize_text(&party.name).split_whitespace().map(String::from).collect(),
                span: party.span,
            });
        }

        for date in &result.dates {
            let iso = date.value.to_string();
            let Some(key) = normalize_mention(EntityType::Date, &iso) else {
                continue;
            };
            let id = entity_id(EntityType::Date, &key);
            lookup.entry((EntityType::Date, key)).or_insert_with(|| id.clone());
            typed.push(RelationHint {
                source_id: root.id.clone(),
                target_id: id.clone(),
                relation: RelationType::HasDate,
                evidence: date.span,
            });
            candidates.push(Candidate {
                id,
                kind: EntityType::Date,
                tokens: Vec::new(), // only span containment places dates in clauses
                span: date.span,
            });
        }

        for value in &result.monetary_values {
            let id = entity_id(
                EntityType::Amount,
                &amount_key(value.amount, &value.currency.trim().to_uppercase()),
            );
            let surface = normalize_text(&value.surface());
            lookup
                .entry((EntityType::Amount, surface.clone()))
                .or_insert_with(|| id.clone());
            typed.push(RelationHint {
                source_id: root.id.clone(),
                target_id: id.clone(),
                relation: RelationType::HasAmount,
                evidence: value.span,
            });
            candidates.push(Candidate {
                id,
                kind: EntityType::Amount,
                tokens: surface.split_whitespace().map(String::from).collect(),
                span: value.span,
            });
        }

        for term in &result.defined_terms {
            let Some(key) = normalize_mention(EntityType::DefinedTerm, &term.term) else {
                continue;
            };
            let id = entity_id(EntityType::DefinedTerm, &key);
            lookup
                .entry((EntityType::DefinedTerm, key.clone()))
                .or_insert_with(|| id.clone());
            typed.push(RelationHint {
                source_id: root.id.clone(),
                target_id: id.clone(),
                relation: RelationType::Defines,
                evidence: term.span,
            });
            candidates.push(Candidate {
                id,
                kind: EntityType::DefinedTerm,
                tokens: key.split_whitespace().map(String::from).collect(),
                span: term.span,
            });
        }

        let mut jurisdictions: Vec<(&str, Option<Span>)> = Vec::new();
        let mut co_occurrences = Vec::new();

        for clause in &result.clauses {
            let Some(key) = clause_key(&clause.clause_type, &clause.text) else {
                continue;
            };
            let clause_id = entity_id(EntityType::Clause, &key);
            lookup
                .entry((EntityType::Clause, normalize_text(&clause.text)))
                .or_insert_with(|| clause_id.clone());
            typed.push(RelationHint {
                source_id: root.id.clone(),
                target_id: clause_id.clone(),
                relation: RelationType::Contains,
                evidence: clause.span,
            });
            if let Some(j) = &clause.jurisdiction {
                jurisdictions.push((j.as_str(), clause.span));
            }

            let clause_tokens: Vec<String> =
                normalize_text(&clause.text).split_whitespace().map(String::from).collect();
            let mut members: Vec<String> = Vec::new();
            let mut push = |id: &str| {
                if id != clause_id && !members.iter().any(|m| m == id) {
                    members.push(id.to_string());
                }
            };

            let named: Vec<String> = clause
                .parties
                .iter()
                .filter_map(|n| normalize_mention(EntityType::Party, n))
                .map(|k| entity_id(EntityType::Party, &k))
                .collect();
            if named.is_empty() {
                let parties: Vec<&Candidate> =
                    candidates.iter().filter(|c| c.kind == EntityType::Party).collect();
                let present: Vec<&&Candidate> = parties
                    .iter()
                    .filter(|c| c.appears_in(&clause_tokens, clause.span))
                    .collect();
                // a clause naming no party binds every party to the contract
                if present.is_empty() {
                    parties.iter().for_each(|c| push(&c.id));
                } else {
                    present.iter().for_each(|c| push(&c.id));
                }
            } else {
                named.iter().for_each(|id| push(id));
            }

            candidates
                .iter()
                .filter(|c| c.kind != EntityType::Party)
                .filter(|c| c.appears_in(&clause_tokens, clause.span))
                .for_each(|c| push(&c.id));

            co_occurrences.push(CoOccurrence {
                clause_id: clause_id.clone(),
                member_ids: members,
                evidence: clause.span,
            });
        }

        if let Some(j) = &result.jurisdiction {
            jurisdictions.push((j.as_str(), None));
        }
        for (name, span) in jurisdictions {
            let Some(key) = normalize_mention(EntityType::Jurisdiction, name) else {
                continue;
            };
            let id = entity_id(EntityType::Jurisdiction, &key);
            lookup
                .entry((EntityType::Jurisdiction, key))
                .or_insert_with(|| id.clone());
            typed.push(RelationHint {
                source_id: root.id.clone(),
                target_id: id,
                relation: RelationType::GovernedBy,
                evidence: span,
            });
        }

        // explicit relations come last so structural evidence wins on duplicates
        for relation in &result.relations {
            typed.push(RelationHint {
                source_id: lookup_mention(&lookup, &root, &relation.source),
                target_id: lookup_mention(&lookup, &root, &relation.target),
                relation: relation.relation,
                evidence: relation.evidence,
            });
        }

        Self {
            root,
            co_occurrences,
            typed,
        }
    }
}

fn document_root(result: &ExtractionResult) -> DocumentRoot {
    let label = result
        .title
        .as_deref()
        .or(result.document_type.as_deref())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(result.document_id.as_str())
        .trim()
        .to_string();

    let mut attributes = BTreeMap::new();
    if let Some(t) = &result.document_type {
        attributes.insert("document_type".to_string(), t.clone());
    }
    if let Some(date) = result.primary_effective_date() {
        attributes.insert("effective_date".to_string(), date.to_string());
    }
    if !result.regions.is_empty() {
        attributes.insert("regions".to_string(), result.regions.join(", "));
    }

    DocumentRoot {
        id: document_entity_id(&result.document_id),
        label,
        attributes,
    }
}

/// Id for a mention named by an explicit relation. Unknown mentions still get
/// a derived id so the builder can report the drift.
fn lookup_mention(
    lookup: &HashMap<(EntityType, String), String>,
    root: &DocumentRoot,
    mention: &MentionRef,
) -> String {
    if mention.kind == EntityType::Document {
        return root.id.clone();
    }

    let key = match mention.kind {
        EntityType::Party => normalize_mention(EntityType::Party, &mention.text),
        _ => Some(normalize_text(&mention.text)),
    }
    .unwrap_or_default();

    lookup
        .get(&(mention.kind, key.clone()))
        .cloned()
        .unwrap_or_else(|| entity_id(mention.kind, &key))
}
