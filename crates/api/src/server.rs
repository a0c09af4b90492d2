use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use compliance::ComplianceFinding;
use dashmap::DashMap;
use extract::ExtractionResult;
use graph::{GraphExport, GraphStats, KnowledgeGraph, ResolveWarning};
use query::{AnswerModel, GroundedAnswer, RetrievalStrategy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{CacheStats, CacheStore};
use crate::config::{AppConfig, CacheConfig};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::pipeline::DocumentAnalyzer;
use crate::session::DocumentSession;

struct OpenSession {
    session: Arc<DocumentSession>,
    opened_at: Instant,
}

/// Open sessions by document id, bounded by the `[cache]` entry limit and TTL.
///
/// A zero limit (caching disabled) falls back to the default limits, since
/// questions still need a session to be asked against.
pub struct SessionRegistry {
    entries: DashMap<String, OpenSession>,
    max_entries: usize,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    pub fn from_config(cache: &CacheConfig) -> Self {
        let defaults = CacheConfig::default();
        let max_entries = match cache.max_entries {
            0 => defaults.max_entries,
            n => n,
        };
        let ttl_secs = match cache.ttl_secs {
            0 => defaults.ttl_secs,
            n => n,
        };
        Self::new(max_entries, Duration::from_secs(ttl_secs))
    }

    pub fn insert(&self, document_id: String, session: Arc<DocumentSession>) {
        // Re-analysing a document replaces its session without evicting another
        if !self.entries.contains_key(&document_id) {
            self.make_room();
        }
        self.entries.insert(
            document_id,
            OpenSession {
                session,
                opened_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, document_id: &str) -> Option<Arc<DocumentSession>> {
        let live = match self.entries.get(document_id) {
            Some(entry) if entry.opened_at.elapsed() < self.ttl => Some(Arc::clone(&entry.session)),
            Some(_) => None,
            None => return None,
        };
        if live.is_none() {
            self.entries.remove(document_id);
        }
        live
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn make_room(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }

        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.opened_at.elapsed() < ttl);

        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.opened_at)
                .map(|entry| entry.key().clone());
            let Some(id) = oldest else { break };
            debug!(document_id = %id, "Session limit reached, closing oldest session");
            self.entries.remove(&id);
        }
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub analyzer: DocumentAnalyzer,
    pub sessions: SessionRegistry,
    pub answer_model: Arc<dyn AnswerModel>,
    pub cache: Arc<dyn CacheStore>,
    pub metrics: Arc<Metrics>,
    llm_permits: Semaphore,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        analyzer: DocumentAnalyzer,
        answer_model: Arc<dyn AnswerModel>,
        cache: Arc<dyn CacheStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let permits = config.concurrency.max_concurrent_llm_calls.max(1);
        let sessions = SessionRegistry::from_config(&config.cache);
        Self {
            config,
            analyzer,
            sessions,
            answer_model,
            cache,
            metrics,
            llm_permits: Semaphore::new(permits),
        }
    }

    fn session(&self, document_id: &str) -> Result<Arc<DocumentSession>, StatusCode> {
        self.sessions.get(document_id).ok_or(StatusCode::NOT_FOUND)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/documents", post(analyze_document))
        .route("/documents/:id/graph", get(get_graph))
        .route("/documents/:id/graph/export", get(export_graph))
        .route("/documents/:id/findings", get(get_findings))
        .route("/documents/:id/ask", post(ask_question))
        .route("/stats", get(get_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    llm: String,
    documents: usize,
}

async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, StatusCode> {
    let url = format!("{}/api/tags", state.config.llm.base_url);
    let llm_status = match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => "ok".to_string(),
        Ok(resp) => format!("error: status {}", resp.status()),
        Err(e) => format!("error: {}", e),
    };

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        llm: llm_status,
        documents: state.sessions.len(),
    }))
}

/// Either a TXT/MD file to read and extract, or an extraction result produced elsewhere.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AnalyzeRequest {
    Path { path: String },
    Extraction { extraction: ExtractionResult },
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub document_id: String,
    pub content_hash: String,
    pub graph: Option<GraphStats>,
    pub graph_error: Option<String>,
    pub findings: Option<usize>,
    pub findings_error: Option<String>,
    pub warnings: Vec<ResolveWarning>,
}

pub async fn analyze_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, StatusCode> {
    let (content_hash, extraction) = match req {
        AnalyzeRequest::Path { path } => {
            let path = PathBuf::from(&path);
            if !path.is_file() {
                return Err(StatusCode::NOT_FOUND);
            }

            let document = ingest::ingest_file(&path).await.map_err(|e| {
                warn!(path = %path.display(), error = %e, "Failed to read document");
                StatusCode::UNPROCESSABLE_ENTITY
            })?;

            let _permit = state
                .llm_permits
                .acquire()
                .await
                .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
            let extraction = state.analyzer.extract(&document).await.map_err(|e| {
                error!(file = %document.file_name, error = ?e, "Extraction failed");
                StatusCode::BAD_GATEWAY
            })?;
            (document.doc_id, extraction)
        }
        AnalyzeRequest::Extraction { extraction } => (extraction.fingerprint(), extraction),
    };

    let session = state.analyzer.open_session(&content_hash, extraction).await;
    let analysis = session.analysis();
    let response = AnalyzeResponse {
        document_id: analysis.document_id.clone(),
        content_hash: analysis.content_hash.clone(),
        graph: analysis.graph.completed().map(KnowledgeGraph::stats),
        graph_error: analysis.graph.error().map(str::to_string),
        findings: analysis.findings.completed().map(Vec::len),
        findings_error: analysis.findings.error().map(str::to_string),
        warnings: analysis.warnings.clone(),
    };

    state
        .sessions
        .insert(response.document_id.clone(), Arc::new(session));
    Ok(Json(response))
}

async fn get_graph(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<KnowledgeGraph>, StatusCode> {
    let session = state.session(&id)?;
    match session.analysis().graph.completed() {
        Some(graph) => Ok(Json(graph.clone())),
        None => Err(StatusCode::UNPROCESSABLE_ENTITY),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ExportParams {
    format: Option<String>,
}

async fn export_graph(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ExportParams>,
) -> Result<Response, StatusCode> {
    let session = state.session(&id)?;
    let graph = session
        .analysis()
        .graph
        .completed()
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
    let export = GraphExport::from_graph(graph);

    match params.format.as_deref() {
        None | Some("json") => Ok(Json(export).into_response()),
        Some("dot") => Ok((
            [(header::CONTENT_TYPE, "text/vnd.graphviz")],
            export.to_dot(),
        )
            .into_response()),
        Some(_) => Err(StatusCode::BAD_REQUEST),
    }
}

#[derive(Debug, Serialize)]
pub struct FindingsResponse {
    pub document_id: String,
    pub findings: Vec<ComplianceFinding>,
}

async fn get_findings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FindingsResponse>, StatusCode> {
    let session = state.session(&id)?;
    let findings = session
        .analysis()
        .findings
        .completed()
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;

    Ok(Json(FindingsResponse {
        document_id: id,
        findings: findings.clone(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub token_budget: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub request_id: Uuid,
    pub document_id: String,
    pub answer: GroundedAnswer,
    pub context_entity_ids: Vec<String>,
    pub token_budget_used: usize,
    pub strategy: RetrievalStrategy,
}

pub async fn ask_question(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, StatusCode> {
    if req.question.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let session = state.session(&id)?;
    let request_id = Uuid::new_v4();
    info!(%request_id, document_id = %id, "Question received");

    let _permit = state
        .llm_permits
        .acquire()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    let (context, answer) = session
        .ask_with_context(&req.question, req.token_budget, state.answer_model.as_ref())
        .await;

    Ok(Json(AskResponse {
        request_id,
        document_id: id,
        context_entity_ids: context.selected_entities.iter().map(|e| e.id.clone()).collect(),
        token_budget_used: context.token_budget_used,
        strategy: context.strategy,
        answer,
    }))
}

#[derive(Serialize)]
struct StatsResponse {
    documents: usize,
    rules: usize,
    metrics: MetricsSnapshot,
    cache: CacheStats,
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, StatusCode> {
    Ok(Json(StatsResponse {
        documents: state.sessions.len(),
        rules: state.analyzer.rules().rules.len(),
        metrics: state.metrics.snapshot(),
        cache: state.cache.stats(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use async_trait::async_trait;
    use compliance::RuleSet;
    use extract::{Clause, Party};
    use std::io::Write;

    struct Echo;

    #[async_trait]
    impl AnswerModel for Echo {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok("Acme Corp is bound for 3 years.".to_string())
        }
    }

    fn state() -> Arc<AppState> {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new(100));
        let metrics = Metrics::new();
        let analyzer = DocumentAnalyzer::new(RuleSet::builtin(), Arc::clone(&cache), Arc::clone(&metrics));
        Arc::new(AppState::new(AppConfig::default(), analyzer, Arc::new(Echo), cache, metrics))
    }

    fn nda() -> ExtractionResult {
        let mut result = ExtractionResult::new("doc-nda");
        result.document_type = Some("NDA".to_string());
        result.parties = vec![Party::named("Acme Corp"), Party::named("Jane Doe")];
        result.clauses = vec![Clause::new("NDA", "confidentiality period of 3 years")];
        result
    }

    #[test]
    fn test_analyze_request_shapes() {
        let by_path: AnalyzeRequest = serde_json::from_str(r#"{"path": "contract.txt"}"#).unwrap();
        assert!(matches!(by_path, AnalyzeRequest::Path { .. }));

        let inline: AnalyzeRequest =
            serde_json::from_str(r#"{"extraction": {"document_id": "d1", "parties": [{"name": "Acme"}]}}"#)
                .unwrap();
        assert!(matches!(inline, AnalyzeRequest::Extraction { .. }));
    }

    #[tokio::test]
    async fn test_analyze_then_ask() {
        let state = state();
        let Json(analyzed) = analyze_document(
            State(state.clone()),
            Json(AnalyzeRequest::Extraction { extraction: nda() }),
        )
        .await
        .unwrap();

        assert_eq!(analyzed.document_id, "doc-nda");
        assert!(analyzed.graph.is_some());
        assert!(analyzed.findings.is_some());
        assert!(state.sessions.get("doc-nda").is_some());

        let Json(asked) = ask_question(
            State(state.clone()),
            Path("doc-nda".to_string()),
            Json(AskRequest {
                question: "Who is bound by confidentiality?".to_string(),
                token_budget: None,
            }),
        )
        .await
        .unwrap();

        assert!(!asked.answer.unsupported);
        assert!(!asked.context_entity_ids.is_empty());
        assert_eq!(state.metrics.snapshot().questions_answered, 1);
    }

    #[tokio::test]
    async fn test_sessions_are_bounded_and_expire() {
        let analyzer = DocumentAnalyzer::new(RuleSet::builtin(), Arc::new(MemoryCache::new(10)), Metrics::new());
        let open = |id: &'static str| {
            let mut extraction = nda();
            extraction.document_id = id.to_string();
            analyzer.open_session(id, extraction)
        };

        let sessions = SessionRegistry::new(2, Duration::from_secs(3600));
        sessions.insert("a".to_string(), Arc::new(open("a").await));
        sessions.insert("b".to_string(), Arc::new(open("b").await));
        sessions.insert("a".to_string(), Arc::new(open("a").await));
        assert_eq!(sessions.len(), 2);

        sessions.insert("c".to_string(), Arc::new(open("c").await));
        assert_eq!(sessions.len(), 2);
        assert!(sessions.get("b").is_none());
        assert!(sessions.get("a").is_some());
        assert!(sessions.get("c").is_some());

        let expired = SessionRegistry::new(10, Duration::ZERO);
        expired.insert("a".to_string(), Arc::new(open("a").await));
        assert!(expired.get("a").is_none());
        assert!(expired.is_empty());

        let disabled = CacheConfig {
            enabled: false,
            max_entries: 0,
            ttl_secs: 0,
        };
        let registry = SessionRegistry::from_config(&disabled);
        registry.insert("a".to_string(), Arc::new(open("a").await));
        assert!(registry.get("a").is_some());
    }

    #[tokio::test]
    async fn test_unknown_document_and_blank_question() {
        let state = state();
        let missing = ask_question(
            State(state.clone()),
            Path("nope".to_string()),
            Json(AskRequest {
                question: "Who?".to_string(),
                token_budget: None,
            }),
        )
        .await;
        assert_eq!(missing.err(), Some(StatusCode::NOT_FOUND));

        let blank = ask_question(
            State(state),
            Path("nope".to_string()),
            Json(AskRequest {
                question: "   ".to_string(),
                token_budget: None,
            }),
        )
        .await;
        assert_eq!(blank.err(), Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_unsupported_file_type_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        file.write_all(b"%PDF-1.4").unwrap();

        let result = analyze_document(
            State(state()),
            Json(AnalyzeRequest::Path {
                path: file.path().display().to_string(),
            }),
        )
        .await;
        assert_eq!(result.err(), Some(StatusCode::UNPROCESSABLE_ENTITY));
    }
}
