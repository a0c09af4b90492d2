use compliance::ComplianceFinding;
use extract::normalizer::{canonical_token, normalized_tokens};
use graph::{Entity, KnowledgeGraph, Relation};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::render::{edge_line, entity_line, estimate_tokens, finding_line};

const STOPWORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "by", "can", "do", "does",
    "for", "from", "has", "have", "how", "i", "if", "in", "is", "it", "its", "me", "much", "of",
    "on", "or", "our", "should", "so", "that", "the", "their", "there", "these", "this", "to",
    "was", "we", "what", "when", "where", "which", "who", "whom", "why", "will", "with", "would",
    "you", "your",
];

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Normalized, suffix-canonical tokens with stopwords removed, deduplicated in order.
pub fn content_tokens(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    normalized_tokens(text)
        .iter()
        .map(|t| canonical_token(t).to_string())
        .filter(|t| !is_stopword(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Every token an entity is known by: label and all mentions.
pub fn entity_vocabulary(entity: &Entity) -> HashSet<String> {
    std::iter::once(&entity.canonical_label)
        .chain(entity.mentions.iter())
        .flat_map(|s| normalized_tokens(s))
        .map(|t| canonical_token(&t).to_string())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub direct_weight: f64,
    /// Score factor for neighbours of a lexically matched entity. See [`RetrievalConfig::validate`].
    pub hop_weight: f64,
    pub finding_boost: f64,
    pub fallback_top_n: usize,
    /// Budget used when a caller does not name one.
    pub default_token_budget: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            direct_weight: 1.0,
            hop_weight: 0.5,
            finding_boost: 0.75,
            fallback_top_n: 5,
            default_token_budget: 800,
        }
    }
}

impl RetrievalConfig {
    /// Neighbours must never tie or outrank a direct match.
    pub fn validate(&self) -> Result<(), RetrievalConfigError> {
        for (field, value) in [("direct_weight", self.direct_weight), ("hop_weight", self.hop_weight)] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(RetrievalConfigError::NonPositive { field, value });
            }
        }
        if !(self.finding_boost >= 0.0 && self.finding_boost.is_finite()) {
            return Err(RetrievalConfigError::NegativeBoost(self.finding_boost));
        }
        if self.hop_weight >= self.direct_weight {
            return Err(RetrievalConfigError::HopNotBelowDirect {
                hop: self.hop_weight,
                direct: self.direct_weight,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetrievalConfigError {
    #[error("{field} must be a positive number, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("finding_boost must not be negative, got {0}")]
    NegativeBoost(f64),

    #[error("hop_weight {hop} must be below direct_weight {direct}")]
    HopNotBelowDirect { hop: f64, direct: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    LexicalMatch,
    /// No entity overlapped the question; the most mentioned entities were used.
    MentionFrequencyFallback,
}

/// Facts selected to ground one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub question: String,
    /// Most relevant first.
    pub selected_entities: Vec<Entity>,
    /// Parallel to `selected_entities`.
    pub scores: Vec<f64>,
    pub selected_edges: Vec<Relation>,
    pub selected_findings: Vec<ComplianceFinding>,
    pub token_budget: usize,
    pub token_budget_used: usize,
    pub strategy: RetrievalStrategy,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.selected_entities.is_empty()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.selected_entities.iter().find(|e| e.id == id)
    }
}

fn label<'a>(graph: &'a KnowledgeGraph, id: &'a str) -> &'a str {
    graph.node(id).map(|n| n.canonical_label.as_str()).unwrap_or(id)
}

struct Budget {
    limit: usize,
    used: usize,
}

impl Budget {
    fn try_spend(&mut self, line: &str) -> bool {
        let cost = estimate_tokens(line);
        if self.used + cost > self.limit {
            return false;
        }
        self.used += cost;
        true
    }
}

/// Deterministic graph-aware ranking of entities for a question.
#[derive(Debug, Clone, Default)]
pub struct ContextRetriever {
    config: RetrievalConfig,
}

impl ContextRetriever {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    fn direct_scores(&self, graph: &KnowledgeGraph, question: &[String]) -> Vec<f64> {
        graph
            .nodes
            .iter()
            .map(|entity| {
                if question.is_empty() {
                    return 0.0;
                }
                let vocab = entity_vocabulary(entity);
                let overlap = question.iter().filter(|t| vocab.contains(*t)).count();
                overlap as f64 / question.len() as f64 * self.config.direct_weight
            })
            .collect()
    }

    pub fn retrieve(
        &self,
        graph: &KnowledgeGraph,
        findings: &[ComplianceFinding],
        question: &str,
        token_budget: usize,
    ) -> RetrievedContext {
        let question_tokens = content_tokens(question);
        let direct = self.direct_scores(graph, &question_tokens);
        let position: HashMap<&str, usize> = graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let adjacency = graph.adjacency();
        let mut scores: Vec<f64> = graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, entity)| {
                let hop = adjacency
                    .neighbors(&entity.id)
                    .iter()
                    .filter_map(|n| position.get(n.id.as_str()).map(|&j| direct[j]))
                    .fold(0.0_f64, f64::max)
                    * self.config.hop_weight;
                direct[i].max(hop)
            })
            .collect();

        let question_set: HashSet<&str> = question_tokens.iter().map(String::as_str).collect();
        let relevant_findings: Vec<&ComplianceFinding> = findings
            .iter()
            .filter(|f| {
                content_tokens(&format!("{} {}", f.rule_id, f.message))
                    .iter()
                    .any(|t| question_set.contains(t.as_str()))
            })
            .collect();
        for finding in &relevant_findings {
            for id in &finding.evidence_entity_ids {
                if let Some(&i) = position.get(id.as_str()) {
                    scores[i] += self.config.finding_boost;
                }
            }
        }

        let mut ranked: Vec<usize> = (0..graph.nodes.len()).filter(|&i| scores[i] > 0.0).collect();
        let strategy = if ranked.is_empty() {
            debug!(
                document_id = %graph.document_id,
                question = %question,
                "No lexical match, falling back to mention frequency"
            );
            ranked = (0..graph.nodes.len()).collect();
            ranked.sort_by(|&a, &b| {
                let (ea, eb) = (&graph.nodes[a], &graph.nodes[b]);
                eb.mention_count()
                    .cmp(&ea.mention_count())
                    .then(ea.first_seen.cmp(&eb.first_seen))
                    .then_with(|| ea.id.cmp(&eb.id))
            });
            ranked.truncate(self.config.fallback_top_n);
            RetrievalStrategy::MentionFrequencyFallback
        } else {
            ranked.sort_by(|&a, &b| {
                let (ea, eb) = (&graph.nodes[a], &graph.nodes[b]);
                scores[b]
                    .total_cmp(&scores[a])
                    .then(ea.first_seen.cmp(&eb.first_seen))
                    .then_with(|| ea.id.cmp(&eb.id))
            });
            RetrievalStrategy::LexicalMatch
        };

        let mut budget = Budget {
            limit: token_budget,
            used: 0,
        };

        let mut selected_entities = Vec::new();
        let mut selected_scores = Vec::new();
        for i in ranked {
            let entity = &graph.nodes[i];
            if budget.try_spend(&entity_line(entity)) {
                selected_entities.push(entity.clone());
                selected_scores.push(scores[i]);
            }
        }

        let selected_ids: HashSet<&str> = selected_entities.iter().map(|e| e.id.as_str()).collect();

        let mut selected_edges = Vec::new();
        for edge in &graph.edges {
            if !selected_ids.contains(edge.source_entity_id.as_str())
                || !selected_ids.contains(edge.target_entity_id.as_str())
            {
                continue;
            }
            let line = edge_line(
                edge,
                label(graph, &edge.source_entity_id),
                label(graph, &edge.target_entity_id),
            );
            if budget.try_spend(&line) {
                selected_edges.push(edge.clone());
            }
        }

        let mut selected_findings = Vec::new();
        for finding in findings {
            let cited = finding
                .evidence_entity_ids
                .iter()
                .any(|id| selected_ids.contains(id.as_str()));
            let asked = relevant_findings.iter().any(|f| std::ptr::eq(*f, finding));
            if (cited || asked) && budget.try_spend(&finding_line(finding)) {
                selected_findings.push(finding.clone());
            }
        }

        debug!(
            document_id = %graph.document_id,
            entities = selected_entities.len(),
            edges = selected_edges.len(),
            findings = selected_findings.len(),
            tokens = budget.used,
            "Retrieved context"
        );

        RetrievedContext {
            question: question.to_string(),
            selected_entities,
            scores: selected_scores,
            selected_edges,
            selected_findings,
            token_budget,
            token_budget_used: budget.used,
            strategy,
        }
    }
}
