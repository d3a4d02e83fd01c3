use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};

use crate::catalog::ModelCatalog;
use crate::config::{Config, DiscoverySection};
use crate::discovery::search::{self, SearchStrategy};
use crate::discovery::{CandidateStore, DiscoveryPipeline, PipelineSettings};
use crate::dispatch::manager::ProviderManager;
use crate::error::{ConfigError, DiscoveryError};
use crate::response::{ToolMetadata, ToolResponse};
use crate::tools::discovery::{
    DiscoveryRunRequest, GetCandidateRequest, GetRunRequest, ListCandidatesRequest, ListRunsRequest, PageResponse,
    RunSummary, SearchQueriesRequest, UpdateCandidateRequest,
};
use crate::tools::listmodels::{ListModelsResponse, ModelInfo};
use crate::tools::usage::{UsageStatsRequest, UsageStatsResponse};
use crate::usage::UsageTracker;

#[derive(Clone)]
pub struct AccuServer {
    pipeline: Arc<DiscoveryPipeline>,
    discovery: Arc<DiscoverySection>,
    tool_router: ToolRouter<Self>,
}

fn discovery_error(tool: &str, e: &DiscoveryError, start: Instant) -> ToolResponse {
    ToolResponse::error(
        e.to_string(),
        e.kind(),
        ToolMetadata::new(tool, start.elapsed().as_secs_f64()),
    )
}

#[tool_router]
impl AccuServer {
    /// Wire the provider chain, tracker, store and pipeline from configuration.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let catalog = Arc::new(ModelCatalog::builtin());
        let tracker = Arc::new(UsageTracker::new());
        let manager = Arc::new(ProviderManager::from_config(&config, catalog, tracker)?);
        let pipeline = Arc::new(DiscoveryPipeline::new(
            manager,
            Arc::new(CandidateStore::new()),
            PipelineSettings::from(&config.discovery),
        ));
        Ok(Self::with_pipeline(pipeline, config.discovery))
    }

    pub fn with_pipeline(pipeline: Arc<DiscoveryPipeline>, discovery: DiscoverySection) -> Self {
        Self {
            pipeline,
            discovery: Arc::new(discovery),
            tool_router: Self::tool_router(),
        }
    }

    fn manager(&self) -> &Arc<ProviderManager> {
        self.pipeline.manager()
    }

    #[tool(
        name = "discovery_run",
        description = "Analyze and score crawled repositories for revival potential. Every repository becomes a pending candidate. Returns the run summary; poll `discovery_get_run` unless `wait` is true."
    )]
    pub async fn discovery_run(
        &self,
        Parameters(req): Parameters<DiscoveryRunRequest>,
    ) -> Result<CallToolResult, McpError> {
        if req.repositories.is_empty() {
            return Err(McpError::invalid_params("repositories must not be empty", None));
        }
        if req.max_results == Some(0) {
            return Err(McpError::invalid_params("max_results must be at least 1", None));
        }
        let start = Instant::now();
        let wait = req.wait();
        let request = req.into_run_request();

        let result = if wait {
            self.pipeline.run(request).await
        } else {
            self.pipeline.start(request).await
        };

        let response = match result {
            Ok(run) => ToolResponse::json(
                &RunSummary::from(&run),
                ToolMetadata::new("discovery_run", start.elapsed().as_secs_f64()),
            ),
            Err(e) => {
                tracing::warn!("discovery run refused: {e}");
                discovery_error("discovery_run", &e, start)
            }
        };
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "discovery_get_run",
        description = "Get one discovery run with all its scored candidates.",
        annotations(read_only_hint = true)
    )]
    pub async fn discovery_get_run(
        &self,
        Parameters(req): Parameters<GetRunRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        let response = match self.pipeline.store().get_run(&req.run_id).await {
            Ok(run) => ToolResponse::json(
                &run,
                ToolMetadata::new("discovery_get_run", start.elapsed().as_secs_f64()),
            ),
            Err(e) => discovery_error("discovery_get_run", &e, start),
        };
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "discovery_list_runs",
        description = "List discovery runs, newest first, without their candidates.",
        annotations(read_only_hint = true)
    )]
    pub async fn discovery_list_runs(
        &self,
        Parameters(req): Parameters<ListRunsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        let page = self.pipeline.store().list_runs(&req.into()).await;
        let body = PageResponse {
            total: page.total,
            skip: page.skip,
            limit: page.limit,
            items: page.items.iter().map(RunSummary::from).collect(),
        };
        let response = ToolResponse::json(
            &body,
            ToolMetadata::new("discovery_list_runs", start.elapsed().as_secs_f64()),
        );
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "discovery_candidates",
        description = "List discovered candidates by potential score, highest first. Filter by review status and minimum potential.",
        annotations(read_only_hint = true)
    )]
    pub async fn discovery_candidates(
        &self,
        Parameters(req): Parameters<ListCandidatesRequest>,
    ) -> Result<CallToolResult, McpError> {
        req.validate()
            .map_err(|msg| McpError::invalid_params(msg, None))?;
        let start = Instant::now();
        let page = self.pipeline.store().list_candidates(&req.into()).await;
        let body = PageResponse {
            total: page.total,
            skip: page.skip,
            limit: page.limit,
            items: page.items,
        };
        let response = ToolResponse::json(
            &body,
            ToolMetadata::new("discovery_candidates", start.elapsed().as_secs_f64()),
        );
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "discovery_get_candidate",
        description = "Get one candidate by `owner/name`, with its scores, signals, analysis and review state.",
        annotations(read_only_hint = true)
    )]
    pub async fn discovery_get_candidate(
        &self,
        Parameters(req): Parameters<GetCandidateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        let response = match self.pipeline.store().get_candidate(&req.id).await {
            Ok(candidate) => ToolResponse::json(
                &candidate,
                ToolMetadata::new("discovery_get_candidate", start.elapsed().as_secs_f64()),
            ),
            Err(e) => discovery_error("discovery_get_candidate", &e, start),
        };
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "discovery_update_candidate",
        description = "Record a review decision on a candidate: status (reviewed/approved/rejected), reviewer and notes."
    )]
    pub async fn discovery_update_candidate(
        &self,
        Parameters(req): Parameters<UpdateCandidateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        let (id, update) = req.into_parts();
        let response = match self.pipeline.store().update_candidate(&id, update).await {
            Ok(candidate) => ToolResponse::json(
                &candidate,
                ToolMetadata::new("discovery_update_candidate", start.elapsed().as_secs_f64()),
            ),
            Err(e) => discovery_error("discovery_update_candidate", &e, start),
        };
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "discovery_search_queries",
        description = "Show the GitHub search queries each discovery strategy would issue.",
        annotations(read_only_hint = true)
    )]
    pub async fn discovery_search_queries(
        &self,
        Parameters(req): Parameters<SearchQueriesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let strategies: Vec<SearchStrategy> = match req.strategy {
            Some(s) => vec![s],
            None => self.discovery.strategies.clone(),
        };
        let languages = req
            .languages
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.discovery.languages.clone());

        let queries = search::plan_queries(
            &strategies,
            &languages,
            self.discovery.min_stars,
            self.discovery.max_stars,
            Utc::now(),
        );
        let response =
            ToolResponse::json(&queries, ToolMetadata::new("discovery_search_queries", 0.0));
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "usage_stats",
        description = "Completion usage: request count, tokens, cost and latency, broken down by provider and model, plus today's budget position.",
        annotations(read_only_hint = true)
    )]
    pub async fn usage_stats(
        &self,
        Parameters(req): Parameters<UsageStatsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.manager();
        let body = UsageStatsResponse {
            stats: manager.tracker().stats(req.since),
            daily_cost_usd: manager.daily_cost(),
            daily_budget_usd: manager.daily_budget_usd(),
            budget_remaining_usd: manager.budget_remaining(),
        };
        let response = ToolResponse::json(&body, ToolMetadata::new("usage_stats", 0.0));
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "listmodels",
        description = "List priced models from the catalog and which providers use them by default.",
        annotations(read_only_hint = true)
    )]
    pub async fn listmodels(&self) -> Result<CallToolResult, McpError> {
        let manager = self.manager();
        let defaults = manager.default_models();
        let models = manager
            .catalog()
            .entries()
            .into_iter()
            .map(|entry| {
                let mut info = ModelInfo::from(entry);
                info.configured_for = defaults
                    .iter()
                    .filter(|(_, model)| *model == info.name)
                    .map(|(provider, _)| provider.clone())
                    .collect();
                info
            })
            .collect();

        let list = ListModelsResponse { models };
        let response =
            ToolResponse::success(list.to_markdown(), ToolMetadata::new("listmodels", 0.0));
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "provider_health",
        description = "Check every configured provider and report which are reachable.",
        annotations(read_only_hint = true)
    )]
    pub async fn provider_health(&self) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        let health = self.manager().health().await;
        let response = ToolResponse::json(
            &health,
            ToolMetadata::new("provider_health", start.elapsed().as_secs_f64()),
        );
        Ok(response.into_call_tool_result())
    }
}

#[tool_handler]
impl ServerHandler for AccuServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "accu".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "accu: repository discovery and scoring backed by a failover AI provider chain.\n\n\
                 Workflow:\n\
                 1. `discovery_search_queries` shows what to crawl for each strategy.\n\
                 2. `discovery_run` with the crawled repository metadata. Each repository is analyzed \
                    by the cheapest healthy provider and scored.\n\
                 3. `discovery_get_run` to poll a run, `discovery_candidates` to browse by potential, \
                    `discovery_get_candidate` for one candidate.\n\
                 4. `discovery_update_candidate` to record review decisions.\n\n\
                 `usage_stats` reports spend against the daily budget; `provider_health` checks the chain."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
