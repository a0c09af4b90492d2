use compliance::ComplianceFinding;
use extract::ExtractionResult;
use graph::KnowledgeGraph;
use query::{AnswerGroundingAssembler, AnswerModel, ContextRetriever, GroundedAnswer, RetrievalStrategy, RetrievedContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{CacheKey, CacheStore, get_json, hash_input, set_json};
use crate::metrics::{Metrics, Stage, TimedOperation};
use crate::pipeline::DocumentAnalysis;

/// An analyzed document that questions can be asked against.
///
/// Nothing in a session changes after it is opened, so one `Arc<DocumentSession>`
/// can serve any number of concurrent questions.
pub struct DocumentSession {
    extraction: ExtractionResult,
    analysis: DocumentAnalysis,
    empty_graph: KnowledgeGraph,
    retriever: ContextRetriever,
    assembler: AnswerGroundingAssembler,
    cache: Arc<dyn CacheStore>,
    cache_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl DocumentSession {
    pub fn new(
        extraction: ExtractionResult,
        analysis: DocumentAnalysis,
        retriever: ContextRetriever,
        assembler: AnswerGroundingAssembler,
        cache: Arc<dyn CacheStore>,
        cache_ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        let empty_graph = KnowledgeGraph {
            document_id: analysis.document_id.clone(),
            nodes: Vec::new(),
            edges: Vec::new(),
        };
        Self {
            extraction,
            analysis,
            empty_graph,
            retriever,
            assembler,
            cache,
            cache_ttl,
            metrics,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.analysis.document_id
    }

    pub fn extraction(&self) -> &ExtractionResult {
        &self.extraction
    }

    pub fn analysis(&self) -> &DocumentAnalysis {
        &self.analysis
    }

    /// The built graph, or an empty one when the graph stage failed.
    pub fn graph(&self) -> &KnowledgeGraph {
        self.analysis.graph.completed().unwrap_or(&self.empty_graph)
    }

    pub fn findings(&self) -> &[ComplianceFinding] {
        self.analysis
            .findings
            .completed()
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn default_token_budget(&self) -> usize {
        self.retriever.config().default_token_budget
    }

    pub async fn retrieve(&self, question: &str, token_budget: usize) -> RetrievedContext {
        let input = hash_input(&format!("{}:{}:{}", self.analysis.state_hash, token_budget, question));
        let key = CacheKey::new(&self.analysis.content_hash, "retrieve", &input);

        let cached = get_json::<RetrievedContext>(self.cache.as_ref(), &key).await;
        self.metrics.record_cache(cached.is_some());
        if let Some(context) = cached {
            return context;
        }

        let timer = TimedOperation::start();
        let context = self
            .retriever
            .retrieve(self.graph(), self.findings(), question, token_budget);
        self.metrics
            .record_stage(Stage::Retrieval, timer.elapsed(), true);

        if context.strategy == RetrievalStrategy::MentionFrequencyFallback {
            debug!(
                document_id = %self.document_id(),
                "No lexical match for question, used mention-frequency fallback"
            );
        }

        set_json(self.cache.as_ref(), &key, &context, self.cache_ttl).await;
        context
    }

    /// Retrieve context and ask the model once, returning both.
    pub async fn ask_with_context(
        &self,
        question: &str,
        token_budget: Option<usize>,
        model: &dyn AnswerModel,
    ) -> (RetrievedContext, GroundedAnswer) {
        let budget = token_budget.unwrap_or_else(|| self.default_token_budget());
        let context = self.retrieve(question, budget).await;

        let timer = TimedOperation::start();
        let answer = self.assembler.answer(&context, question, model).await;
        self.metrics
            .record_stage(Stage::Answer, timer.elapsed(), answer.failure.is_none());
        self.metrics
            .record_answer(answer.unsupported, answer.failure.is_some());

        info!(
            document_id = %self.document_id(),
            entities = context.selected_entities.len(),
            budget_used = context.token_budget_used,
            unsupported = answer.unsupported,
            confidence = answer.confidence,
            "Answered question"
        );

        (context, answer)
    }

    pub async fn ask(&self, question: &str, token_budget: Option<usize>, model: &dyn AnswerModel) -> GroundedAnswer {
        self.ask_with_context(question, token_budget, model).await.1
    }
}
