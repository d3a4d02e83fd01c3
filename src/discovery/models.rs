use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::discovery::search::SearchStrategy;

/// Repository metadata as fetched by the external crawler. Opaque input to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RepositoryMetadata {
    pub owner: String,
    pub name: String,
    /// Canonical URL, e.g. https://github.com/owner/name
    pub url: String,
    pub description: Option<String>,
    pub language: Option<String>,
    /// SPDX identifier when known.
    pub license: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,
    /// Most recent issue or pull request activity. Absent means none recorded.
    pub last_issue_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stars: u32,
    #[serde(default)]
    pub forks: u32,
    #[serde(default)]
    pub open_issues: u32,
    #[serde(default)]
    pub contributors_count: u32,
    /// Commits in the trailing 12 months.
    #[serde(default)]
    pub commits_last_year: u32,
    /// Number of comparable repositories found by the crawler, if measured.
    pub similar_repos_count: Option<u32>,
    #[serde(default)]
    pub has_readme: bool,
    #[serde(default)]
    pub has_tests: bool,
    #[serde(default)]
    pub has_ci: bool,
    #[serde(default)]
    pub has_docs: bool,
    /// README text, passed to the model for analysis.
    pub readme: Option<String>,
}

impl RepositoryMetadata {
    /// Unique key, `owner/name`.
    pub fn id(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepositoryMetrics {
    pub stars: u32,
    pub forks: u32,
    pub open_issues: u32,
    pub contributors_count: u32,
    pub commits_last_year: u32,
    pub days_since_last_commit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepositorySignals {
    pub abandoned: bool,
    pub has_readme: bool,
    pub has_license: bool,
    pub has_tests: bool,
    pub has_ci: bool,
    pub has_docs: bool,
    pub documentation_quality: f64,
    pub code_quality_estimate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RepositoryScores {
    pub potential: f64,
    pub revival_feasibility: f64,
    pub product_fit: f64,
}

/// Structured summary the model returns for one repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AiAnalysis {
    pub summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    /// "low|medium|high effort, <reason>"
    pub revival_recommendation: String,
    pub estimated_effort_hours: Option<u32>,
    pub target_audience: String,
    /// Code quality estimate in [0, 1], when the model provides one.
    pub quality: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Pending,
    Reviewed,
    Approved,
    Rejected,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Lifecycle only moves forward: pending → reviewed → approved/rejected.
    /// A pending candidate may be decided directly; decisions are final.
    pub fn can_transition_to(&self, next: CandidateStatus) -> bool {
        use CandidateStatus::*;
        matches!(
            (*self, next),
            (Pending, Reviewed | Approved | Rejected) | (Reviewed, Approved | Rejected)
        ) || *self == next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisFailureKind {
    /// The model answered but the text was not the expected JSON shape.
    ParseError,
    /// Every provider in the chain failed.
    ProvidersFailed,
    /// The request itself was rejected as malformed.
    InvalidRequest,
    /// The daily budget was exhausted before this candidate was analyzed.
    BudgetExceeded,
    /// The analysis task panicked.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisFailure {
    pub kind: AnalysisFailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryCandidate {
    /// `owner/name`
    pub id: String,
    pub owner: String,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub license: Option<String>,
    pub topics: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,

    pub metrics: RepositoryMetrics,
    pub signals: RepositorySignals,
    pub scores: RepositoryScores,
    pub ai_analysis: Option<AiAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_error: Option<AnalysisFailure>,

    pub status: CandidateStatus,
    pub discovered_at: DateTime<Utc>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,

    pub discovery_strategy: Option<SearchStrategy>,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Outcome of one discovery run. A failed run still carries every candidate processed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryRun {
    pub run_id: String,
    pub strategy: Option<SearchStrategy>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub repos_scanned: usize,
    pub candidates_found: usize,
    /// Per-candidate analysis failures by kind.
    pub failures: BTreeMap<AnalysisFailureKind, usize>,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub error: Option<String>,
    pub candidates: Vec<RepositoryCandidate>,
}

impl DiscoveryRun {
    pub fn started(run_id: String, strategy: Option<SearchStrategy>) -> Self {
        Self {
            run_id,
            strategy,
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            repos_scanned: 0,
            candidates_found: 0,
            failures: BTreeMap::new(),
            tokens_used: 0,
            cost_usd: 0.0,
            error: None,
            candidates: Vec::new(),
        }
    }

    pub fn failure_count(&self) -> usize {
        self.failures.values().sum()
    }
}
