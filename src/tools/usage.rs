use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::usage::UsageStats;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UsageStatsRequest {
    /// Only count requests at or after this RFC 3339 timestamp (default: all recorded requests).
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct UsageStatsResponse {
    #[serde(flatten)]
    pub stats: UsageStats,
    pub daily_cost_usd: f64,
    pub daily_budget_usd: f64,
    pub budget_remaining_usd: f64,
}
