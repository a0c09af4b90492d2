use extract::normalizer::{amount_key, clause_key, entity_id, normalize_mention};
use extract::{EntityType, ExtractionResult, Span};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::model::Entity;

/// A mention the resolver could not use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveWarning {
    pub kind: EntityType,
    pub field: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Canonical entities ordered by first mention.
    pub entities: Vec<Entity>,
    pub warnings: Vec<ResolveWarning>,
}

impl Resolution {
    pub fn entity_ids(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.id.as_str()).collect()
    }
}

struct MentionGroup {
    kind: EntityType,
    key: String,
    first_seen: usize,
    mentions: Vec<String>,
    span: Option<Span>,
    attributes: BTreeMap<String, Vec<String>>,
}

impl MentionGroup {
    fn canonical_label(&self) -> String {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for m in &self.mentions {
            *counts.entry(m.as_str()).or_insert(0) += 1;
        }

        // most frequent, then longest, then first seen
        let mut best: Option<(&str, usize, usize)> = None;
        for m in &self.mentions {
            let count = counts[m.as_str()];
            let len = m.chars().count();
            let better = match best {
                None => true,
                Some((_, best_count, best_len)) => {
                    count > best_count || (count == best_count && len > best_len)
                }
            };
            if better {
                best = Some((m.as_str(), count, len));
            }
        }
        best.map(|(m, _, _)| m.to_string()).unwrap_or_default()
    }

    fn into_entity(self) -> Entity {
        let canonical_label = self.canonical_label();
        Entity {
            id: entity_id(self.kind, &self.key),
            entity_type: self.kind,
            canonical_label,
            mentions: self.mentions,
            source_span: self.span,
            first_seen: self.first_seen,
            attributes: self
                .attributes
                .into_iter()
                .map(|(k, v)| (k, v.join("; ")))
                .collect(),
        }
    }
}

#[derive(Default)]
struct Collector {
    groups: Vec<MentionGroup>,
    by_key: HashMap<(EntityType, String), usize>,
    warnings: Vec<ResolveWarning>,
}

impl Collector {
    fn add(
        &mut self,
        kind: EntityType,
        key: Option<String>,
        surface: &str,
        field: String,
        span: Option<Span>,
        attributes: &[(&str, Option<&str>)],
    ) {
        let surface = surface.trim();
        let Some(key) = key.filter(|_| !surface.is_empty()) else {
            warn!(kind = %kind, field = %field, "Dropping empty mention");
            self.warnings.push(ResolveWarning {
                kind,
                field,
                reason: "empty mention".to_string(),
            });
            return;
        };

        let idx = match self.by_key.get(&(kind, key.clone())) {
            Some(&idx) => idx,
            None => {
                self.groups.push(MentionGroup {
                    kind,
                    key: key.clone(),
                    // 0 is reserved for the document root
                    first_seen: self.groups.len() + 1,
                    mentions: Vec::new(),
                    span: None,
                    attributes: BTreeMap::new(),
                });
                self.by_key.insert((kind, key), self.groups.len() - 1);
                self.groups.len() - 1
            }
        };

        let group = &mut self.groups[idx];
        group.mentions.push(surface.to_string());
        if group.span.is_none() {
            group.span = span;
        }
        for &(name, value) in attributes {
            let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            let values = group.attributes.entry(name.to_string()).or_default();
            if !values.iter().any(|v| v == value) {
                values.push(value.to_string());
            }
        }
    }
}

/// Merges raw mentions into canonical entities.
///
/// Mentions group when their normalized form is identical within the same
/// entity type; the same string under two types yields two entities. Ids
/// depend only on type and normalized form, so resolving the same input
/// twice yields the same entities.
#[derive(Debug, Clone, Default)]
pub struct EntityResolver;

impl EntityResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, result: &ExtractionResult) -> Resolution {
        let mut c = Collector::default();

        for (i, party) in result.parties.iter().enumerate() {
            c.add(
                EntityType::Party,
                normalize_mention(EntityType::Party, &party.name),
                &party.name,
                format!("parties[{i}].name"),
                party.span,
                &[("role", party.role.as_deref()), ("address", party.address.as_deref())],
            );
        }

        for (i, date) in result.dates.iter().enumerate() {
            let iso = date.value.to_string();
            c.add(
                EntityType::Date,
                normalize_mention(EntityType::Date, &iso),
                &iso,
                format!("dates[{i}].value"),
                date.span,
                &[("date_type", date.date_type.as_deref())],
            );
        }

        for (i, value) in result.monetary_values.iter().enumerate() {
            let currency = value.currency.trim().to_uppercase();
            c.add(
                EntityType::Amount,
                Some(amount_key(value.amount, &currency)),
                &value.surface(),
                format!("monetary_values[{i}]"),
                value.span,
                &[
                    ("currency", Some(currency.as_str())),
                    ("reason", value.reason.as_deref()),
                ],
            );
        }

        for (i, term) in result.defined_terms.iter().enumerate() {
            c.add(
                EntityType::DefinedTerm,
                normalize_mention(EntityType::DefinedTerm, &term.term),
                &term.term,
                format!("defined_terms[{i}].term"),
                term.span,
                &[("definition", Some(term.definition.as_str()))],
            );
        }

        for (i, clause) in result.clauses.iter().enumerate() {
            c.add(
                EntityType::Clause,
                clause_key(&clause.clause_type, &clause.text),
                &clause.text,
                format!("clauses[{i}].text"),
                clause.span,
                &[("clause_type", Some(clause.clause_type.as_str()))],
            );
            for (j, name) in clause.parties.iter().enumerate() {
                c.add(
                    EntityType::Party,
                    normalize_mention(EntityType::Party, name),
                    name,
                    format!("clauses[{i}].parties[{j}]"),
                    None,
                    &[],
                );
            }
            if let Some(jurisdiction) = &clause.jurisdiction {
                c.add(
                    EntityType::Jurisdiction,
                    normalize_mention(EntityType::Jurisdiction, jurisdiction),
                    jurisdiction,
                    format!("clauses[{i}].jurisdiction"),
                    clause.span,
                    &[],
                );
            }
        }

        if let Some(jurisdiction) = &result.jurisdiction {
            c.add(
                EntityType::Jurisdiction,
                normalize_mention(EntityType::Jurisdiction, jurisdiction),
                jurisdiction,
                "jurisdiction".to_string(),
                None,
                &[],
            );
        }

        let entities: Vec<Entity> = c.groups.into_iter().map(MentionGroup::into_entity).collect();
        debug!(
            document_id = %result.document_id,
            entities = entities.len(),
            dropped = c.warnings.len(),
            "Resolved entities"
        );

        Resolution {
            entities,
            warnings: c.warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{Clause, DefinedTerm, MonetaryValue, Party};
    use std::collections::BTreeSet;

    fn sample() -> ExtractionResult {
        let mut result = ExtractionResult::new("nda-1");
        result.parties = vec![
            Party::named("Acme Corp"),
            Party::named("Jane Doe"),
            Party::named("ACME Corporation"),
            Party::named("Acme Corp"),
        ];
        result.defined_terms = vec![DefinedTerm {
            term: "Acme Corp".to_string(),
            definition: "the disclosing party".to_string(),
            location: None,
            span: None,
        }];
        result.clauses = vec![Clause::new("NDA", "confidentiality period of 3 years")];
        result
    }

    #[test]
    fn test_groups_mentions_by_normalized_form() {
        let resolution = EntityResolver::new().resolve(&sample());

        let parties: Vec<&Entity> = resolution
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Party)
            .collect();
        assert_eq!(parties.len(), 2);

        let acme = parties[0];
        assert_eq!(acme.mentions, vec!["Acme Corp", "ACME Corporation", "Acme Corp"]);
        // most frequent surface form wins over the longer one
        assert_eq!(acme.canonical_label, "Acme Corp");
        assert_eq!(acme.first_seen, 1);
    }

    #[test]
    fn test_cross_type_collisions_never_merge() {
        let resolution = EntityResolver::new().resolve(&sample());
        let acme_like: Vec<_> = resolution
            .entities
            .iter()
            .filter(|e| e.canonical_label == "Acme Corp")
            .collect();

        assert_eq!(acme_like.len(), 2);
        assert_ne!(acme_like[0].id, acme_like[1].id);
        assert_ne!(acme_like[0].entity_type, acme_like[1].entity_type);
    }

    #[test]
    fn test_label_tie_breaks_on_length_then_first_seen() {
        let mut result = ExtractionResult::new("doc");
        result.parties = vec![Party::named("Acme Corp"), Party::named("Acme Corporation")];
        let resolution = EntityResolver::new().resolve(&result);
        assert_eq!(resolution.entities[0].canonical_label, "Acme Corporation");

        let mut result = ExtractionResult::new("doc");
        result.parties = vec![Party::named("ACME CORP"), Party::named("acme corp")];
        let resolution = EntityResolver::new().resolve(&result);
        assert_eq!(resolution.entities[0].canonical_label, "ACME CORP");
    }

    #[test]
    fn test_empty_mentions_are_dropped_with_warning() {
        let mut result = ExtractionResult::new("doc");
        result.parties = vec![Party::named("  "), Party::named("Jane Doe"), Party::named("...")];

        let resolution = EntityResolver::new().resolve(&result);
        assert_eq!(resolution.entities.len(), 1);
        assert_eq!(resolution.warnings.len(), 2);
        assert_eq!(resolution.warnings[0].field, "parties[0].name");
    }

    #[test]
    fn test_empty_input_gives_empty_result() {
        let resolution = EntityResolver::new().resolve(&ExtractionResult::new("doc"));
        assert!(resolution.entities.is_empty());
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_amounts_group_by_value_and_currency() {
        let mut result = ExtractionResult::new("lease");
        let rent = |raw: &str| MonetaryValue {
            amount: 1500.0,
            currency: "usd".to_string(),
            raw: Some(raw.to_string()),
            reason: Some("Rent".to_string()),
            frequency: None,
            span: None,
        };
        result.monetary_values = vec![rent("$1,500"), rent("1500 USD"), rent("$1,500")];

        let resolution = EntityResolver::new().resolve(&result);
        assert_eq!(resolution.entities.len(), 1);
        let amount = &resolution.entities[0];
        assert_eq!(amount.canonical_label, "$1,500");
        assert_eq!(amount.attributes.get("currency").map(String::as_str), Some("USD"));
        assert_eq!(amount.attributes.get("reason").map(String::as_str), Some("Rent"));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let resolver = EntityResolver::new();
        let input = sample();

        let first: BTreeSet<String> =
            resolver.resolve(&input).entities.into_iter().map(|e| e.id).collect();
        let second: BTreeSet<String> =
            resolver.resolve(&input).entities.into_iter().map(|e| e.id).collect();
        assert_eq!(first, second);

        assert_eq!(resolver.resolve(&input).entities, resolver.resolve(&input).entities);
    }

    #[test]
    fn test_ids_do_not_depend_on_insertion_order() {
        let mut forward = ExtractionResult::new("doc");
        forward.parties = vec![Party::named("Acme Corp"), Party::named("Jane Doe")];
        let mut reversed = forward.clone();
        reversed.parties.reverse();

        let ids = |r: &ExtractionResult| -> BTreeSet<String> {
            EntityResolver::new().resolve(r).entities.into_iter().map(|e| e.id).collect()
        };
        assert_eq!(ids(&forward), ids(&reversed));
    }
}
