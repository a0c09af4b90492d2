use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write;

use crate::model::KnowledgeGraph;

#[derive(Debug, Clone, Serialize)]
pub struct ExportNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub mention_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportEdge {
    pub source: usize, // index into nodes
    pub target: usize,
    pub relation: String,
}

/// Index-based graph view for visualisation front ends.
#[derive(Debug, Clone, Serialize)]
pub struct GraphExport {
    pub document_id: String,
    pub nodes: Vec<ExportNode>,
    pub edges: Vec<ExportEdge>,
    #[serde(skip)]
    pub entity_to_idx: HashMap<String, usize>,
}

impl GraphExport {
    pub fn from_graph(graph: &KnowledgeGraph) -> Self {
        let mut export = Self {
            document_id: graph.document_id.clone(),
            nodes: Vec::with_capacity(graph.nodes.len()),
            edges: Vec::with_capacity(graph.edges.len()),
            entity_to_idx: HashMap::new(),
        };

        for node in &graph.nodes {
            export.entity_to_idx.insert(node.id.clone(), export.nodes.len());
            export.nodes.push(ExportNode {
                id: node.id.clone(),
                label: node.canonical_label.clone(),
                entity_type: node.entity_type.to_string(),
                mention_count: node.mention_count(),
            });
        }

        for edge in &graph.edges {
            if let (Some(&source), Some(&target)) = (
                export.entity_to_idx.get(&edge.source_entity_id),
                export.entity_to_idx.get(&edge.target_entity_id),
            ) {
                export.edges.push(ExportEdge {
                    source,
                    target,
                    relation: edge.relation_type.to_string(),
                });
            }
        }

        export
    }

    /// Graphviz rendering.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph knowledge_graph {\n");
        for (i, node) in self.nodes.iter().enumerate() {
            let label = node.label.replace('"', "\\\"");
            let _ = writeln!(dot, "  n{} [label=\"{}\", group=\"{}\"];", i, label, node.entity_type);
        }
        for edge in &self.edges {
            let _ = writeln!(dot, "  n{} -> n{} [label=\"{}\"];", edge.source, edge.target, edge.relation);
        }
        dot.push_str("}\n");
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, Relation};
    use extract::{EntityType, RelationType};
    use std::collections::BTreeMap;

    fn entity(id: &str, label: &str, entity_type: EntityType) -> Entity {
        Entity {
            id: id.to_string(),
            entity_type,
            canonical_label: label.to_string(),
            mentions: vec![label.to_string()],
            source_span: None,
            first_seen: 0,
            attributes: BTreeMap::new(),
        }
    }

    fn sample() -> KnowledgeGraph {
        KnowledgeGraph {
            document_id: "doc".to_string(),
            nodes: vec![
                entity("d", "Lease \"A\"", EntityType::Document),
                entity("p", "ABC Corp", EntityType::Party),
            ],
            edges: vec![Relation {
                source_entity_id: "p".to_string(),
                target_entity_id: "d".to_string(),
                relation_type: RelationType::PartyTo,
                evidence_span: None,
            }],
        }
    }

    #[test]
    fn test_edges_use_node_indices() {
        let export = GraphExport::from_graph(&sample());
        assert_eq!(export.nodes.len(), 2);
        assert_eq!(export.edges[0].source, 1);
        assert_eq!(export.edges[0].target, 0);
        assert_eq!(export.edges[0].relation, "PARTY_TO");

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["nodes"][1]["type"], "party");
        assert!(json.get("entity_to_idx").is_none());
    }

    #[test]
    fn test_dot_escapes_labels() {
        let dot = GraphExport::from_graph(&sample()).to_dot();
        assert!(dot.starts_with("digraph knowledge_graph {"));
        assert!(dot.contains("label=\"Lease \\\"A\\\"\""));
        assert!(dot.contains("n1 -> n0 [label=\"PARTY_TO\"]"));
    }
}
