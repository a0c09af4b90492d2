use extract::{EntityType, RelationType, Span};
use petgraph::graphmap::UnGraphMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::GraphError;

/// A canonical node: one real-world thing, however many times it was mentioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub canonical_label: String,
    /// Raw surface strings in extraction order; never empty.
    pub mentions: Vec<String>,
    pub source_span: Option<Span>,
    /// Position of the first mention in extraction order. 0 is the document root.
    pub first_seen: usize,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Entity {
    pub fn mention_count(&self) -> usize {
        self.mentions.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relation_type: RelationType,
    pub evidence_span: Option<Span>,
}

/// Entity-relationship graph of one document. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub document_id: String,
    pub nodes: Vec<Entity>,
    pub edges: Vec<Relation>,
}

impl KnowledgeGraph {
    pub fn node(&self, id: &str) -> Option<&Entity> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn root(&self) -> Option<&Entity> {
        self.nodes
            .iter()
            .find(|n| n.entity_type == EntityType::Document)
    }

    pub fn stats(&self) -> GraphStats {
        let mut by_type = BTreeMap::new();
        for node in &self.nodes {
            *by_type.entry(node.entity_type.as_str().to_string()).or_insert(0) += 1;
        }
        GraphStats {
            entity_count: self.nodes.len(),
            relation_count: self.edges.len(),
            entities_by_type: by_type,
        }
    }

    /// Undirected view for neighbourhood queries.
    pub fn adjacency(&self) -> Adjacency<'_> {
        let index: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut map = UnGraphMap::new();
        for i in 0..self.nodes.len() {
            map.add_node(i);
        }
        for edge in &self.edges {
            if let (Some(&a), Some(&b)) = (
                index.get(edge.source_entity_id.as_str()),
                index.get(edge.target_entity_id.as_str()),
            ) {
                map.add_edge(a, b, ());
            }
        }

        Adjacency {
            graph: self,
            index,
            map,
        }
    }

    /// Check the invariants a builder guarantees: unique ids, edges between
    /// existing nodes, no self-loops. Used on graphs that come back from a cache.
    pub fn validate_integrity(&self) -> Result<(), GraphError> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateEntity(node.id.clone()));
            }
        }

        for edge in &self.edges {
            for endpoint in [&edge.source_entity_id, &edge.target_entity_id] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(GraphError::DataIntegrity {
                        source_id: edge.source_entity_id.clone(),
                        target_id: edge.target_entity_id.clone(),
                        relation: edge.relation_type,
                        missing: endpoint.clone(),
                    });
                }
            }
            if edge.source_entity_id == edge.target_entity_id {
                return Err(GraphError::SelfLoop {
                    entity_id: edge.source_entity_id.clone(),
                    relation: edge.relation_type,
                });
            }
        }

        Ok(())
    }
}

pub struct Adjacency<'g> {
    graph: &'g KnowledgeGraph,
    index: HashMap<&'g str, usize>,
    map: UnGraphMap<usize, ()>,
}

impl<'g> Adjacency<'g> {
    /// Entities one hop away in either direction, in node order.
    pub fn neighbors(&self, id: &str) -> Vec<&'g Entity> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut hits: Vec<usize> = self.map.neighbors(idx).collect();
        hits.sort_unstable();
        hits.into_iter().map(|i| &self.graph.nodes[i]).collect()
    }

    pub fn degree(&self, id: &str) -> usize {
        self.index
            .get(id)
            .map(|&idx| self.map.neighbors(idx).count())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relation_count: usize,
    pub entities_by_type: BTreeMap<String, usize>,
}
