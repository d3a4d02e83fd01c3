use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{Id as TaskId, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::DiscoverySection;
use crate::discovery::analyzer;
use crate::discovery::models::{
    AiAnalysis, AnalysisFailure, AnalysisFailureKind, CandidateStatus, DiscoveryRun,
    RepositoryCandidate, RepositoryMetadata, RunStatus,
};
use crate::discovery::scorer;
use crate::discovery::search::SearchStrategy;
use crate::discovery::store::CandidateStore;
use crate::dispatch::manager::ProviderManager;
use crate::error::{CompletionError, DiscoveryError, ProviderError};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub max_concurrency: usize,
    pub cooldown: Duration,
    pub max_repos_per_run: usize,
}

impl From<&DiscoverySection> for PipelineSettings {
    fn from(section: &DiscoverySection) -> Self {
        Self {
            max_concurrency: section.max_concurrency,
            cooldown: section.cooldown(),
            max_repos_per_run: section.max_repos_per_run,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&DiscoverySection::default())
    }
}

/// Input to one discovery run: metadata already fetched by the crawler.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub strategy: Option<SearchStrategy>,
    /// Overrides `max_repos_per_run` for this run.
    pub max_results: Option<usize>,
    pub repositories: Vec<RepositoryMetadata>,
}

/// What one analysis task hands back.
struct Outcome {
    index: usize,
    analysis: Option<AiAnalysis>,
    failure: Option<AnalysisFailure>,
    tokens: u64,
    cost_usd: f64,
}

/// Analyzes and scores externally supplied repositories.
///
/// Every input repository yields exactly one candidate with status `pending`.
/// Analysis failures are recorded on the candidate rather than dropping it.
/// Once the daily budget is exhausted, no further analyses are started; the
/// remaining repositories are scored from metadata alone and the run is marked failed.
pub struct DiscoveryPipeline {
    manager: Arc<ProviderManager>,
    store: Arc<CandidateStore>,
    settings: PipelineSettings,
    last_run: Mutex<Option<Instant>>,
}

impl DiscoveryPipeline {
    pub fn new(
        manager: Arc<ProviderManager>,
        store: Arc<CandidateStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            manager,
            store,
            settings,
            last_run: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<CandidateStore> {
        &self.store
    }

    pub fn manager(&self) -> &Arc<ProviderManager> {
        &self.manager
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Claim the run slot, or report how long until the cooldown expires.
    async fn claim_slot(&self) -> Result<(), DiscoveryError> {
        let mut last = self.last_run.lock().await;
        if let Some(started) = *last {
            let elapsed = started.elapsed();
            if elapsed < self.settings.cooldown {
                let remaining = self.settings.cooldown - elapsed;
                tracing::info!(remaining_secs = remaining.as_secs(), "discovery run refused, cooldown active");
                return Err(DiscoveryError::CooldownActive { remaining });
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }

    fn open_run(&self, request: &RunRequest) -> DiscoveryRun {
        let mut run = DiscoveryRun::started(uuid::Uuid::new_v4().to_string(), request.strategy);
        run.repos_scanned = request.repositories.len();
        run
    }

    /// Run to completion and return the finished run.
    pub async fn run(&self, request: RunRequest) -> Result<DiscoveryRun, DiscoveryError> {
        self.claim_slot().await?;
        let run = self.open_run(&request);
        Ok(self.execute(run, request).await)
    }

    /// Start a run in the background and return its `running` snapshot at once.
    /// Poll the store with the returned run id for the result.
    pub async fn start(self: &Arc<Self>, request: RunRequest) -> Result<DiscoveryRun, DiscoveryError> {
        self.claim_slot().await?;
        let run = self.open_run(&request);
        self.store.save_run(run.clone()).await;

        let pipeline = Arc::clone(self);
        let snapshot = run.clone();
        tokio::spawn(async move {
            pipeline.execute(run, request).await;
        });
        Ok(snapshot)
    }

    async fn execute(&self, mut run: DiscoveryRun, request: RunRequest) -> DiscoveryRun {
        let limit = request.max_results.unwrap_or(self.settings.max_repos_per_run);
        let mut repositories = request.repositories;
        if repositories.len() > limit {
            tracing::info!(
                run_id = %run.run_id,
                supplied = repositories.len(),
                limit,
                "truncating discovery input"
            );
            repositories.truncate(limit);
        }

        tracing::info!(
            run_id = %run.run_id,
            strategy = request.strategy.map(|s| s.as_str()),
            repositories = repositories.len(),
            "discovery run started"
        );

        let now = Utc::now();
        let repositories = Arc::new(repositories);
        let halt = CancellationToken::new();
        let outcomes = self.analyze_all(&repositories, &halt).await;

        let mut candidates = Vec::with_capacity(repositories.len());
        for (index, meta) in repositories.iter().enumerate() {
            let outcome = outcomes.get(&index);
            let analysis = outcome.and_then(|o| o.analysis.clone());
            let failure = outcome.and_then(|o| o.failure.clone()).or_else(|| {
                outcome.is_none().then(|| AnalysisFailure {
                    kind: AnalysisFailureKind::Internal,
                    message: "analysis task did not report".to_string(),
                })
            });
            if let Some(f) = &failure {
                *run.failures.entry(f.kind).or_default() += 1;
            }
            if let Some(o) = outcome {
                run.tokens_used += o.tokens;
                run.cost_usd += o.cost_usd;
            }
            candidates.push(build_candidate(
                meta,
                analysis,
                failure,
                request.strategy,
                &run.run_id,
                now,
            ));
        }

        run.candidates_found = candidates.len();
        run.candidates = candidates;
        run.completed_at = Some(Utc::now());
        if halt.is_cancelled() {
            run.status = RunStatus::Failed;
            run.error = Some(format!(
                "daily budget of ${:.2} exhausted; remaining repositories were scored without analysis",
                self.manager.daily_budget_usd()
            ));
        } else {
            run.status = RunStatus::Completed;
        }

        tracing::info!(
            run_id = %run.run_id,
            status = ?run.status,
            candidates = run.candidates_found,
            failures = run.failure_count(),
            tokens = run.tokens_used,
            cost_usd = run.cost_usd,
            "discovery run finished"
        );
        self.store.save_run(run.clone()).await;
        run
    }

    /// Fan out one analysis per repository under the concurrency bound.
    /// Keyed by input index.
    async fn analyze_all(
        &self,
        repositories: &Arc<Vec<RepositoryMetadata>>,
        halt: &CancellationToken,
    ) -> HashMap<usize, Outcome> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut set = JoinSet::new();
        let mut task_index: HashMap<TaskId, usize> = HashMap::new();

        for index in 0..repositories.len() {
            let manager = Arc::clone(&self.manager);
            let repositories = Arc::clone(repositories);
            let semaphore = Arc::clone(&semaphore);
            let halt = halt.clone();

            let handle = set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                analyze_one(&manager, &repositories[index], index, &halt).await
            });
            task_index.insert(handle.id(), index);
        }

        let mut outcomes = HashMap::with_capacity(repositories.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => {
                    outcomes.insert(outcome.index, outcome);
                }
                Err(join_err) => {
                    tracing::error!("analysis task failed: {join_err}");
                    if let Some(&index) = task_index.get(&join_err.id()) {
                        outcomes.insert(
                            index,
                            Outcome {
                                index,
                                analysis: None,
                                failure: Some(AnalysisFailure {
                                    kind: AnalysisFailureKind::Internal,
                                    message: format!("analysis task panicked: {join_err}"),
                                }),
                                tokens: 0,
                                cost_usd: 0.0,
                            },
                        );
                    }
                }
            }
        }
        outcomes
    }
}

async fn analyze_one(
    manager: &ProviderManager,
    meta: &RepositoryMetadata,
    index: usize,
    halt: &CancellationToken,
) -> Outcome {
    let mut outcome = Outcome {
        index,
        analysis: None,
        failure: None,
        tokens: 0,
        cost_usd: 0.0,
    };

    if halt.is_cancelled() {
        outcome.failure = Some(budget_failure());
        return outcome;
    }

    let request = analyzer::analysis_request(meta);
    match manager.complete(&request, true).await {
        Ok(response) => {
            outcome.tokens = response.usage.total_tokens();
            outcome.cost_usd = response.cost.total_cost();
            match analyzer::parse_analysis(&response.content) {
                Ok(analysis) => outcome.analysis = Some(analysis),
                Err(e) => {
                    tracing::warn!(repository = %meta.id(), "{e}");
                    outcome.failure = Some(AnalysisFailure {
                        kind: AnalysisFailureKind::ParseError,
                        message: e.to_string(),
                    });
                }
            }
        }
        Err(CompletionError::BudgetExceeded { .. }) => {
            if !halt.is_cancelled() {
                tracing::warn!(repository = %meta.id(), "daily budget exhausted, halting analyses");
            }
            halt.cancel();
            outcome.failure = Some(budget_failure());
        }
        Err(e) => {
            tracing::warn!(repository = %meta.id(), "analysis failed: {e}");
            outcome.failure = Some(AnalysisFailure {
                kind: failure_kind(&e),
                message: e.user_message(),
            });
        }
    }
    outcome
}

fn budget_failure() -> AnalysisFailure {
    AnalysisFailure {
        kind: AnalysisFailureKind::BudgetExceeded,
        message: "daily budget exhausted, scored without analysis".to_string(),
    }
}

fn failure_kind(error: &CompletionError) -> AnalysisFailureKind {
    match error {
        CompletionError::BudgetExceeded { .. } => AnalysisFailureKind::BudgetExceeded,
        CompletionError::Provider(ProviderError::InvalidRequest { .. }) => {
            AnalysisFailureKind::InvalidRequest
        }
        CompletionError::Provider(_)
        | CompletionError::AllProvidersFailed { .. }
        | CompletionError::NoProviders => AnalysisFailureKind::ProvidersFailed,
    }
}

/// Score one repository and assemble its `pending` candidate record.
pub fn build_candidate(
    meta: &RepositoryMetadata,
    analysis: Option<AiAnalysis>,
    analysis_error: Option<AnalysisFailure>,
    strategy: Option<SearchStrategy>,
    run_id: &str,
    now: DateTime<Utc>,
) -> RepositoryCandidate {
    let metrics = scorer::derive_metrics(meta, now);
    let mut signals = scorer::initial_signals(meta, now);
    if let Some(a) = &analysis {
        signals = scorer::refine_signals(signals, a);
    }
    let scores = scorer::score(meta, &metrics, &signals, analysis.as_ref());

    RepositoryCandidate {
        id: meta.id(),
        owner: meta.owner.clone(),
        name: meta.name.clone(),
        url: meta.url.clone(),
        description: meta.description.clone(),
        language: meta.language.clone(),
        license: meta.license.clone(),
        topics: meta.topics.clone(),
        created_at: meta.created_at,
        pushed_at: meta.pushed_at,
        metrics,
        signals,
        scores,
        ai_analysis: analysis,
        analysis_error,
        status: CandidateStatus::Pending,
        discovered_at: now,
        reviewed_by: None,
        reviewed_at: None,
        notes: None,
        discovery_strategy: strategy,
        run_id: Some(run_id.to_string()),
    }
}
