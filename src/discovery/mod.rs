pub mod analyzer;
pub mod models;
pub mod pipeline;
pub mod scorer;
pub mod search;
pub mod store;

pub use models::{
    AiAnalysis, AnalysisFailure, AnalysisFailureKind, CandidateStatus, DiscoveryRun,
    RepositoryCandidate, RepositoryMetadata, RepositoryMetrics, RepositoryScores,
    RepositorySignals, RunStatus,
};
pub use pipeline::{DiscoveryPipeline, PipelineSettings, RunRequest};
pub use search::{SearchQuery, SearchStrategy};
pub use store::{CandidateQuery, CandidateStore, CandidateUpdate, Page, RunQuery};
