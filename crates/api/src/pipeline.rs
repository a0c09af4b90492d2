use anyhow::{Context, Result};
use compliance::{ComplianceFinding, RuleSet};
use extract::{ExtractionResult, Extractor, OllamaClient};
use graph::{KnowledgeGraph, ResolveWarning};
use ingest::DocumentContent;
use query::{AnswerGroundingAssembler, ContextRetriever, GroundingConfig, RetrievalConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheStore, get_json, hash_input, set_json};
use crate::config::AppConfig;
use crate::metrics::{Metrics, Stage, TimedOperation};
use crate::retry::RetryPolicy;
use crate::session::DocumentSession;

/// Result of one pipeline stage. A failed stage never hides the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum StageOutcome<T> {
    Completed(T),
    Failed { error: String },
}

impl<T> StageOutcome<T> {
    pub fn completed(&self) -> Option<&T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Completed(_) => None,
            Self::Failed { error } => Some(error),
        }
    }

    fn failed(error: impl std::fmt::Display) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    pub document_id: String,
    pub content_hash: String,
    /// Identifies the extraction and rule set this analysis was computed from.
    pub state_hash: String,
    pub graph: StageOutcome<KnowledgeGraph>,
    pub findings: StageOutcome<Vec<ComplianceFinding>>,
    pub warnings: Vec<ResolveWarning>,
}

#[derive(Serialize, Deserialize)]
struct CachedGraph {
    graph: KnowledgeGraph,
    warnings: Vec<ResolveWarning>,
}

struct ExtractionStage {
    extractor: Extractor,
    retry: RetryPolicy,
    model: String,
}

/// Runs graph build and compliance evaluation for documents and opens
/// question-answering sessions over the results.
pub struct DocumentAnalyzer {
    rules: Arc<RuleSet>,
    rules_hash: String,
    cache: Arc<dyn CacheStore>,
    cache_ttl: Duration,
    metrics: Arc<Metrics>,
    retriever: ContextRetriever,
    assembler: AnswerGroundingAssembler,
    extraction: Option<ExtractionStage>,
}

impl DocumentAnalyzer {
    pub fn new(rules: RuleSet, cache: Arc<dyn CacheStore>, metrics: Arc<Metrics>) -> Self {
        let rules_hash = hash_input(&serde_json::to_string(&rules).unwrap_or_default());
        Self {
            rules: Arc::new(rules),
            rules_hash,
            cache,
            cache_ttl: Duration::from_secs(3600),
            metrics,
            retriever: ContextRetriever::default(),
            assembler: AnswerGroundingAssembler::default(),
            extraction: None,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        rules: RuleSet,
        cache: Arc<dyn CacheStore>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let client = OllamaClient::new(&config.extraction_llm())
            .context("Failed to create extraction client")?;
        let extractor = Extractor::new(client, config.llm.context_limit_chars);

        Ok(Self::new(rules, cache, metrics)
            .with_cache_ttl(Duration::from_secs(config.cache.ttl_secs))
            .with_retrieval(config.retrieval.clone())
            .with_grounding(config.grounding.clone())
            .with_extractor(
                extractor,
                RetryPolicy::from_config(&config.retry),
                config.llm.extraction_model.clone(),
            ))
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_retrieval(mut self, config: RetrievalConfig) -> Self {
        self.retriever = ContextRetriever::new(config);
        self
    }

    pub fn with_grounding(mut self, config: GroundingConfig) -> Self {
        self.assembler = AnswerGroundingAssembler::new(config);
        self
    }

    pub fn with_extractor(mut self, extractor: Extractor, retry: RetryPolicy, model: String) -> Self {
        self.extraction = Some(ExtractionStage {
            extractor,
            retry,
            model,
        });
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    async fn cached<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = get_json(self.cache.as_ref(), key).await;
        self.metrics.record_cache(value.is_some());
        value
    }

    /// Extract facts from a preprocessed document through the LLM collaborator.
    pub async fn extract(&self, document: &DocumentContent) -> Result<ExtractionResult> {
        let stage = self
            .extraction
            .as_ref()
            .context("No extraction model configured")?;

        let key = CacheKey::new(&document.doc_id, "extract", &hash_input(&stage.model));
        if let Some(result) = self.cached::<ExtractionResult>(&key).await
            && result.validate().is_ok()
        {
            debug!(document_id = %document.doc_id, "Extraction cache hit");
            return Ok(result);
        }

        let timer = TimedOperation::start();
        let outcome = stage
            .retry
            .retry("extract", || stage.extractor.extract(document))
            .await;
        self.metrics
            .record_stage(Stage::Extract, timer.elapsed(), outcome.is_ok());

        let result = outcome?;
        set_json(self.cache.as_ref(), &key, &result, self.cache_ttl).await;
        Ok(result)
    }

    async fn graph_stage(
        &self,
        content_hash: &str,
        extraction: &ExtractionResult,
    ) -> (StageOutcome<KnowledgeGraph>, Vec<ResolveWarning>) {
        let key = CacheKey::new(content_hash, "graph", &extraction.fingerprint());
        if let Some(cached) = self.cached::<CachedGraph>(&key).await {
            match cached.graph.validate_integrity() {
                Ok(()) => return (StageOutcome::Completed(cached.graph), cached.warnings),
                Err(e) => warn!(key = %key, error = %e, "Cached graph failed integrity check"),
            }
        }

        let timer = TimedOperation::start();
        let outcome = graph::build_graph(extraction);
        self.metrics
            .record_stage(Stage::Graph, timer.elapsed(), outcome.is_ok());

        match outcome {
            Ok((graph, warnings)) => {
                let entry = CachedGraph { graph, warnings };
                set_json(self.cache.as_ref(), &key, &entry, self.cache_ttl).await;
                (StageOutcome::Completed(entry.graph), entry.warnings)
            }
            Err(e) => {
                warn!(document_id = %extraction.document_id, error = %e, "Graph build failed");
                (StageOutcome::failed(e), Vec::new())
            }
        }
    }

    async fn compliance_stage(
        &self,
        content_hash: &str,
        extraction: &ExtractionResult,
    ) -> StageOutcome<Vec<ComplianceFinding>> {
        let input = hash_input(&format!("{}:{}", extraction.fingerprint(), self.rules_hash));
        let key = CacheKey::new(content_hash, "compliance", &input);
        if let Some(findings) = self.cached::<Vec<ComplianceFinding>>(&key).await {
            return StageOutcome::Completed(findings);
        }

        let timer = TimedOperation::start();
        let outcome = compliance::evaluate(extraction, &self.rules);
        self.metrics
            .record_stage(Stage::Compliance, timer.elapsed(), outcome.is_ok());

        match outcome {
            Ok(findings) => {
                set_json(self.cache.as_ref(), &key, &findings, self.cache_ttl).await;
                StageOutcome::Completed(findings)
            }
            Err(e) => {
                warn!(document_id = %extraction.document_id, error = %e, "Compliance evaluation failed");
                StageOutcome::failed(e)
            }
        }
    }

    /// Build the graph and evaluate compliance for one extraction result.
    ///
    /// A payload that fails entry validation fails both stages; otherwise
    /// each stage succeeds or fails on its own.
    pub async fn analyze(&self, content_hash: &str, extraction: &ExtractionResult) -> DocumentAnalysis {
        self.metrics.record_document();
        let state_hash = hash_input(&format!("{}:{}", extraction.fingerprint(), self.rules_hash));

        if let Err(e) = extraction.validate() {
            warn!(document_id = %extraction.document_id, error = %e, "Rejected extraction result");
            return DocumentAnalysis {
                document_id: extraction.document_id.clone(),
                content_hash: content_hash.to_string(),
                state_hash,
                graph: StageOutcome::failed(&e),
                findings: StageOutcome::failed(&e),
                warnings: Vec::new(),
            };
        }

        let (graph, warnings) = self.graph_stage(content_hash, extraction).await;
        let findings = self.compliance_stage(content_hash, extraction).await;

        info!(
            document_id = %extraction.document_id,
            graph_ok = graph.completed().is_some(),
            findings = findings.completed().map(|f| f.len()).unwrap_or(0),
            warnings = warnings.len(),
            "Analyzed document"
        );

        DocumentAnalysis {
            document_id: extraction.document_id.clone(),
            content_hash: content_hash.to_string(),
            state_hash,
            graph,
            findings,
            warnings,
        }
    }

    /// Analyze `extraction` and wrap the result in a read-only session.
    pub async fn open_session(&self, content_hash: &str, extraction: ExtractionResult) -> DocumentSession {
        let analysis = self.analyze(content_hash, &extraction).await;
        DocumentSession::new(
            extraction,
            analysis,
            self.retriever.clone(),
            self.assembler.clone(),
            Arc::clone(&self.cache),
            self.cache_ttl,
            Arc::clone(&self.metrics),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, NoCache};
    use compliance::{RuleCheck, RuleDefinition, Severity};
    use extract::{Clause, ExtractedRelation, MentionRef, Party, RelationType};

    fn nda() -> ExtractionResult {
        let mut result = ExtractionResult::new("doc-nda");
        result.document_type = Some("NDA".to_string());
        result.parties = vec![Party::named("Acme Corp"), Party::named("Jane Doe")];
        result.clauses = vec![Clause::new("NDA", "confidentiality period of 3 years")];
        result
    }

    fn analyzer(cache: Arc<dyn CacheStore>) -> DocumentAnalyzer {
        DocumentAnalyzer::new(RuleSet::builtin(), cache, Metrics::new())
    }

    #[tokio::test]
    async fn test_both_stages_complete() {
        let analyzer = analyzer(Arc::new(NoCache));
        let analysis = analyzer.analyze("hash", &nda()).await;

        let graph = analysis.graph.completed().unwrap();
        assert_eq!(graph.document_id, "doc-nda");
        assert!(graph.validate_integrity().is_ok());
        assert!(analysis.findings.completed().is_some());
    }

    #[tokio::test]
    async fn test_graph_failure_keeps_findings() {
        let mut result = nda();
        result.relations.push(ExtractedRelation {
            source: MentionRef {
                kind: extract::EntityType::Party,
                text: "Acme Corp".to_string(),
            },
            target: MentionRef {
                kind: extract::EntityType::Party,
                text: "Nobody Ltd".to_string(),
            },
            relation: RelationType::References,
            evidence: None,
        });

        let analysis = analyzer(Arc::new(NoCache)).analyze("hash", &result).await;
        assert!(analysis.graph.error().is_some());
        assert!(analysis.findings.completed().is_some());
    }

    #[tokio::test]
    async fn test_bad_rules_keep_graph() {
        let rules = RuleSet::new(vec![RuleDefinition {
            id: "BAD-001".to_string(),
            name: "Broken pattern".to_string(),
            description: String::new(),
            severity: Severity::Warning,
            applies_to: Default::default(),
            recommendation: None,
            check: RuleCheck::PatternMatch {
                pattern: "(unclosed".to_string(),
                scope: compliance::PatternScope::All,
                expect: compliance::Expectation::Present,
            },
        }]);
        let analyzer = DocumentAnalyzer::new(rules, Arc::new(NoCache), Metrics::new());

        let analysis = analyzer.analyze("hash", &nda()).await;
        assert!(analysis.graph.completed().is_some());
        assert!(analysis.findings.error().unwrap().contains("BAD-001"));
    }

    #[tokio::test]
    async fn test_invalid_payload_fails_both_stages() {
        let analysis = analyzer(Arc::new(NoCache))
            .analyze("hash", &ExtractionResult::new(" "))
            .await;
        assert!(analysis.graph.error().is_some());
        assert!(analysis.findings.error().is_some());
    }

    #[tokio::test]
    async fn test_second_analysis_is_served_from_cache() {
        let cache = Arc::new(MemoryCache::new(100));
        let metrics = Metrics::new();
        let analyzer = DocumentAnalyzer::new(RuleSet::builtin(), cache.clone(), metrics.clone());

        let first = analyzer.analyze("hash", &nda()).await;
        let second = analyzer.analyze("hash", &nda()).await;

        assert_eq!(first.graph, second.graph);
        assert_eq!(first.findings, second.findings);
        assert_eq!(first.state_hash, second.state_hash);
        let snap = metrics.snapshot();
        assert_eq!(snap.cache_misses, 2);
        assert_eq!(snap.cache_hits, 2);
    }

    #[tokio::test]
    async fn test_extract_without_model_is_an_error() {
        let analyzer = analyzer(Arc::new(NoCache));
        let document = DocumentContent::from_text("a.txt".into(), "txt".into(), "Some text.");
        assert!(analyzer.extract(&document).await.is_err());
    }

    #[test]
    fn test_stage_outcome_serialization() {
        let failed: StageOutcome<Vec<u32>> = StageOutcome::Failed {
            error: "boom".to_string(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["result"]["error"], "boom");

        let done = serde_json::to_value(StageOutcome::Completed(vec![1u32])).unwrap();
        assert_eq!(done["status"], "completed");
        assert_eq!(done["result"][0], 1);
    }
}
