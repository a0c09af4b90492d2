pub mod cache;
pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod server;
pub mod session;

pub use cache::{CacheKey, CacheStore, MemoryCache, NoCache};
pub use config::{AppConfig, OperationMode};
pub use metrics::{Metrics, MetricsSnapshot, TimedOperation};
pub use pipeline::{DocumentAnalysis, DocumentAnalyzer, StageOutcome};
pub use retry::RetryPolicy;
pub use server::{AppState, SessionRegistry, router};
pub use session::DocumentSession;
