use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::discovery::{
    CandidateQuery, CandidateStatus, CandidateUpdate, DiscoveryRun, RepositoryMetadata, RunQuery,
    RunRequest, RunStatus, SearchStrategy,
};

/// Request to analyze and score a batch of repositories.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DiscoveryRunRequest {
    /// Search strategy that produced these repositories (optional, recorded on each candidate).
    pub strategy: Option<SearchStrategy>,
    /// Process at most this many repositories (defaults to discovery.maxReposPerRun).
    pub max_results: Option<usize>,
    /// Repository metadata fetched by the crawler.
    pub repositories: Vec<RepositoryMetadata>,
    /// Wait for the run to finish instead of returning the running snapshot (default false).
    pub wait: Option<bool>,
}

impl DiscoveryRunRequest {
    pub fn wait(&self) -> bool {
        self.wait.unwrap_or(false)
    }

    pub fn into_run_request(self) -> RunRequest {
        RunRequest {
            strategy: self.strategy,
            max_results: self.max_results,
            repositories: self.repositories,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetRunRequest {
    /// Run id returned by `discovery_run`.
    pub run_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetCandidateRequest {
    /// Candidate id, `owner/name`.
    pub id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListRunsRequest {
    /// Filter by run status: "running", "completed" or "failed".
    pub status: Option<RunStatus>,
    /// Number of runs to skip (default 0).
    pub skip: Option<usize>,
    /// Number of runs to return (default 20, max 100).
    pub limit: Option<usize>,
}

impl From<ListRunsRequest> for RunQuery {
    fn from(req: ListRunsRequest) -> Self {
        Self {
            status: req.status,
            skip: req.skip.unwrap_or(0),
            limit: req.limit,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListCandidatesRequest {
    /// Filter by review status: "pending", "reviewed", "approved" or "rejected".
    pub status: Option<CandidateStatus>,
    /// Only candidates whose potential score is at least this value (0.0-1.0).
    pub min_potential: Option<f64>,
    /// Number of candidates to skip (default 0).
    pub skip: Option<usize>,
    /// Number of candidates to return (default 20, max 100).
    pub limit: Option<usize>,
}

impl ListCandidatesRequest {
    pub fn validate(&self) -> Result<(), String> {
        match self.min_potential {
            Some(p) if !(0.0..=1.0).contains(&p) => {
                Err(format!("min_potential must be within 0.0-1.0, got {p}"))
            }
            _ => Ok(()),
        }
    }
}

impl From<ListCandidatesRequest> for CandidateQuery {
    fn from(req: ListCandidatesRequest) -> Self {
        Self {
            status: req.status,
            min_potential: req.min_potential,
            skip: req.skip.unwrap_or(0),
            limit: req.limit,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateCandidateRequest {
    /// Candidate id, `owner/name`.
    pub id: String,
    /// New review status. Status only moves forward: pending -> reviewed -> approved/rejected.
    pub status: Option<CandidateStatus>,
    /// Who reviewed the candidate.
    pub reviewed_by: Option<String>,
    /// Free-form review notes.
    pub notes: Option<String>,
}

impl UpdateCandidateRequest {
    pub fn into_parts(self) -> (String, CandidateUpdate) {
        (
            self.id,
            CandidateUpdate {
                status: self.status,
                reviewed_by: self.reviewed_by,
                notes: self.notes,
            },
        )
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchQueriesRequest {
    /// Only this strategy (defaults to the configured strategies).
    pub strategy: Option<SearchStrategy>,
    /// Languages to search (defaults to the configured languages).
    pub languages: Option<Vec<String>>,
}

/// Run header without the candidate list.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub run_id: &'a str,
    pub status: RunStatus,
    pub strategy: Option<SearchStrategy>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub repos_scanned: usize,
    pub candidates_found: usize,
    pub failures: usize,
    pub tokens_used: u64,
    pub cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
}

impl<'a> From<&'a DiscoveryRun> for RunSummary<'a> {
    fn from(run: &'a DiscoveryRun) -> Self {
        Self {
            run_id: &run.run_id,
            status: run.status,
            strategy: run.strategy,
            started_at: run.started_at,
            completed_at: run.completed_at,
            repos_scanned: run.repos_scanned,
            candidates_found: run.candidates_found,
            failures: run.failure_count(),
            tokens_used: run.tokens_used,
            cost_usd: run.cost_usd,
            error: run.error.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
    pub items: Vec<T>,
}
