pub mod builder;
pub mod error;
pub mod export;
pub mod hints;
pub mod model;
pub mod resolver;

pub use builder::GraphBuilder;
pub use error::GraphError;
pub use export::{ExportEdge, ExportNode, GraphExport};
pub use hints::{CoOccurrence, DocumentRoot, RelationHint, RelationHints};
pub use model::{Adjacency, Entity, GraphStats, KnowledgeGraph, Relation};
pub use resolver::{EntityResolver, Resolution, ResolveWarning};

use extract::ExtractionResult;

/// Resolve entities and build the graph for one extraction result.
pub fn build_graph(result: &ExtractionResult) -> Result<(KnowledgeGraph, Vec<ResolveWarning>), GraphError> {
    let resolution = EntityResolver::new().resolve(result);
    let hints = RelationHints::from_extraction(result);
    let graph = GraphBuilder::build(&result.document_id, &resolution.entities, &hints)?;
    Ok((graph, resolution.warnings))
}
