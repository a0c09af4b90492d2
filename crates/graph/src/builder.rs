use extract::{EntityType, RelationType, Span};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::error::GraphError;
use crate::hints::RelationHints;
use crate::model::{Entity, KnowledgeGraph, Relation};

/// Assembles a [`KnowledgeGraph`] from resolved entities and relation hints.
pub struct GraphBuilder {
    nodes: Vec<Entity>,
    index: HashMap<String, usize>,
    edges: Vec<Relation>,
    seen_edges: HashSet<(String, String, RelationType)>,
    skipped_self_loops: usize,
}

impl GraphBuilder {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            edges: Vec::new(),
            seen_edges: HashSet::new(),
            skipped_self_loops: 0,
        }
    }

    fn add_entity(&mut self, entity: Entity) -> Result<(), GraphError> {
        if self.index.contains_key(&entity.id) {
            return Err(GraphError::DuplicateEntity(entity.id));
        }
        self.index.insert(entity.id.clone(), self.nodes.len());
        self.nodes.push(entity);
        Ok(())
    }

    fn add_edge(
        &mut self,
        source_id: &str,
        target_id: &str,
        relation: RelationType,
        evidence: Option<Span>,
    ) -> Result<(), GraphError> {
        for endpoint in [source_id, target_id] {
            if !self.index.contains_key(endpoint) {
                return Err(GraphError::DataIntegrity {
                    source_id: source_id.to_string(),
                    target_id: target_id.to_string(),
                    relation,
                    missing: endpoint.to_string(),
                });
            }
        }

        if source_id == target_id {
            debug!(entity_id = %source_id, relation = %relation, "Skipping self-loop");
            self.skipped_self_loops += 1;
            return Ok(());
        }

        // first evidence wins
        let triple = (source_id.to_string(), target_id.to_string(), relation);
        if self.seen_edges.insert(triple) {
            self.edges.push(Relation {
                source_entity_id: source_id.to_string(),
                target_entity_id: target_id.to_string(),
                relation_type: relation,
                evidence_span: evidence,
            });
        }
        Ok(())
    }

    /// Build the graph for one document.
    ///
    /// The document root from `hints` is inserted ahead of `entities`. Every
    /// hint endpoint must be one of those nodes, otherwise the build fails
    /// with [`GraphError::DataIntegrity`].
    pub fn build(
        document_id: &str,
        entities: &[Entity],
        hints: &RelationHints,
    ) -> Result<KnowledgeGraph, GraphError> {
        let mut builder = Self::with_capacity(entities.len() + 1);

        builder.add_entity(Entity {
            id: hints.root.id.clone(),
            entity_type: EntityType::Document,
            canonical_label: hints.root.label.clone(),
            mentions: vec![hints.root.label.clone()],
            source_span: None,
            first_seen: 0,
            attributes: hints.root.attributes.clone(),
        })?;
        for entity in entities {
            builder.add_entity(entity.clone())?;
        }

        for group in &hints.co_occurrences {
            for member in &group.member_ids {
                builder.add_edge(&group.clause_id, member, RelationType::References, group.evidence)?;
            }
        }
        for hint in &hints.typed {
            builder.add_edge(&hint.source_id, &hint.target_id, hint.relation, hint.evidence)?;
        }

        info!(
            document_id = %document_id,
            nodes = builder.nodes.len(),
            edges = builder.edges.len(),
            self_loops_skipped = builder.skipped_self_loops,
            "Built knowledge graph"
        );

        Ok(KnowledgeGraph {
            document_id: document_id.to_string(),
            nodes: builder.nodes,
            edges: builder.edges,
        })
    }
}
