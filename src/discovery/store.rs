use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::discovery::models::{CandidateStatus, DiscoveryRun, RepositoryCandidate, RunStatus};
use crate::error::DiscoveryError;

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Filters for listing candidates. Results are ordered by potential, highest first.
#[derive(Debug, Clone, Default)]
pub struct CandidateQuery {
    pub status: Option<CandidateStatus>,
    pub min_potential: Option<f64>,
    pub skip: usize,
    /// Clamped to `1..=MAX_PAGE_LIMIT`; `None` means `DEFAULT_PAGE_LIMIT`.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct RunQuery {
    pub status: Option<RunStatus>,
    pub skip: usize,
    pub limit: Option<usize>,
}

/// One page of results plus the number of matches before paging.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
    pub items: Vec<T>,
}

/// Review fields to apply to a stored candidate. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct CandidateUpdate {
    pub status: Option<CandidateStatus>,
    pub reviewed_by: Option<String>,
    pub notes: Option<String>,
}

fn page_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

fn paginate<T>(items: Vec<T>, skip: usize, limit: Option<usize>) -> Page<T> {
    let limit = page_limit(limit);
    let total = items.len();
    Page {
        total,
        skip,
        limit,
        items: items.into_iter().skip(skip).take(limit).collect(),
    }
}

#[derive(Default)]
struct Inner {
    runs: HashMap<String, DiscoveryRun>,
    candidates: HashMap<String, RepositoryCandidate>,
}

/// In-memory storage for discovery runs and candidates.
///
/// Candidates are keyed by `owner/name`. Rediscovering a repository refreshes its
/// metadata and scores but keeps any review decision already made.
#[derive(Default)]
pub struct CandidateStore {
    inner: Mutex<Inner>,
}

impl CandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a run. Its candidates are upserted into the candidate index.
    pub async fn save_run(&self, run: DiscoveryRun) {
        let mut inner = self.inner.lock().await;
        for candidate in &run.candidates {
            upsert(&mut inner.candidates, candidate.clone());
        }
        inner.runs.insert(run.run_id.clone(), run);
    }

    /// The run as saved, with each candidate's review fields read from the index.
    pub async fn get_run(&self, run_id: &str) -> Result<DiscoveryRun, DiscoveryError> {
        let inner = self.inner.lock().await;
        let mut run = inner
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| DiscoveryError::RunNotFound(run_id.to_string()))?;
        refresh_reviews(&inner.candidates, &mut run);
        Ok(run)
    }

    /// Runs newest first.
    pub async fn list_runs(&self, query: &RunQuery) -> Page<DiscoveryRun> {
        let mut runs: Vec<DiscoveryRun> = {
            let inner = self.inner.lock().await;
            inner
                .runs
                .values()
                .filter(|r| query.status.is_none_or(|s| r.status == s))
                .cloned()
                .map(|mut run| {
                    refresh_reviews(&inner.candidates, &mut run);
                    run
                })
                .collect()
        };
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        paginate(runs, query.skip, query.limit)
    }

    pub async fn upsert_candidate(&self, candidate: RepositoryCandidate) {
        let mut inner = self.inner.lock().await;
        upsert(&mut inner.candidates, candidate);
    }

    pub async fn get_candidate(&self, id: &str) -> Result<RepositoryCandidate, DiscoveryError> {
        self.inner
            .lock()
            .await
            .candidates
            .get(id)
            .cloned()
            .ok_or_else(|| DiscoveryError::CandidateNotFound(id.to_string()))
    }

    pub async fn list_candidates(&self, query: &CandidateQuery) -> Page<RepositoryCandidate> {
        let mut candidates: Vec<RepositoryCandidate> = {
            let inner = self.inner.lock().await;
            inner
                .candidates
                .values()
                .filter(|c| query.status.is_none_or(|s| c.status == s))
                .filter(|c| query.min_potential.is_none_or(|m| c.scores.potential >= m))
                .cloned()
                .collect()
        };
        // id breaks ties so equal scores list deterministically
        candidates.sort_by(|a, b| {
            b.scores
                .potential
                .partial_cmp(&a.scores.potential)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        paginate(candidates, query.skip, query.limit)
    }

    /// Apply review fields. A status change must move the lifecycle forward;
    /// any applied status stamps `reviewed_at`.
    pub async fn update_candidate(
        &self,
        id: &str,
        update: CandidateUpdate,
    ) -> Result<RepositoryCandidate, DiscoveryError> {
        let mut inner = self.inner.lock().await;
        let candidate = inner
            .candidates
            .get_mut(id)
            .ok_or_else(|| DiscoveryError::CandidateNotFound(id.to_string()))?;

        if let Some(next) = update.status {
            if !candidate.status.can_transition_to(next) {
                return Err(DiscoveryError::InvalidTransition {
                    id: id.to_string(),
                    from: candidate.status.as_str(),
                    to: next.as_str(),
                });
            }
            candidate.status = next;
            candidate.reviewed_at = Some(Utc::now());
        }
        if let Some(reviewer) = update.reviewed_by {
            candidate.reviewed_by = Some(reviewer);
        }
        if let Some(notes) = update.notes {
            candidate.notes = Some(notes);
        }

        tracing::info!(
            candidate = id,
            status = candidate.status.as_str(),
            "candidate updated"
        );
        Ok(candidate.clone())
    }

    pub async fn candidate_count(&self) -> usize {
        self.inner.lock().await.candidates.len()
    }
}

fn refresh_reviews(index: &HashMap<String, RepositoryCandidate>, run: &mut DiscoveryRun) {
    for candidate in &mut run.candidates {
        if let Some(current) = index.get(&candidate.id) {
            candidate.status = current.status;
            candidate.reviewed_by = current.reviewed_by.clone();
            candidate.reviewed_at = current.reviewed_at;
            candidate.notes = current.notes.clone();
        }
    }
}

fn upsert(index: &mut HashMap<String, RepositoryCandidate>, mut candidate: RepositoryCandidate) {
    if let Some(existing) = index.get(&candidate.id) {
        candidate.status = existing.status;
        candidate.reviewed_by = existing.reviewed_by.clone();
        candidate.reviewed_at = existing.reviewed_at;
        candidate.notes = existing.notes.clone();
    }
    index.insert(candidate.id.clone(), candidate);
}
