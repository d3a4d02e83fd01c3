use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dispatch::{CompletionResponse, Cost, TokenUsage};

/// One completed request. Never mutated after creation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub cost: Cost,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UsageBreakdown {
    pub requests: u64,
    pub tokens: u64,
    pub cost_usd: f64,
}

impl UsageBreakdown {
    fn add(&mut self, record: &UsageRecord) {
        self.requests += 1;
        self.tokens += record.usage.total_tokens();
        self.cost_usd += record.cost.total_cost();
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UsageStats {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub avg_latency_ms: f64,
    pub by_provider: BTreeMap<String, UsageBreakdown>,
    pub by_model: BTreeMap<String, UsageBreakdown>,
}

/// Append-only request log shared by every worker through an `Arc`.
///
/// Appends take a short synchronous lock; nothing awaits while it is held.
#[derive(Debug, Default)]
pub struct UsageTracker {
    records: Mutex<Vec<UsageRecord>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, response: &CompletionResponse) {
        self.record_at(response, Utc::now());
    }

    /// Record with an explicit timestamp (replay and tests).
    pub fn record_at(&self, response: &CompletionResponse, timestamp: DateTime<Utc>) {
        let record = UsageRecord {
            timestamp,
            provider: response.provider.clone(),
            model: response.model.clone(),
            usage: response.usage,
            cost: response.cost,
            latency_ms: response.latency_ms,
        };
        self.lock().push(record);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every record, oldest first.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.lock().clone()
    }

    /// Aggregates over records at or after `since` (all records when `None`).
    pub fn stats(&self, since: Option<DateTime<Utc>>) -> UsageStats {
        let records = self.lock();
        let mut stats = UsageStats::default();
        let mut latency_sum: u128 = 0;

        for record in records
            .iter()
            .filter(|r| since.is_none_or(|since| r.timestamp >= since))
        {
            stats.total_requests += 1;
            stats.total_tokens += record.usage.total_tokens();
            stats.total_cost_usd += record.cost.total_cost();
            latency_sum += u128::from(record.latency_ms);
            stats
                .by_provider
                .entry(record.provider.clone())
                .or_default()
                .add(record);
            stats
                .by_model
                .entry(record.model.clone())
                .or_default()
                .add(record);
        }

        if stats.total_requests > 0 {
            stats.avg_latency_ms = latency_sum as f64 / stats.total_requests as f64;
        }
        stats
    }

    /// Spend recorded on the UTC calendar day containing `now`.
    pub fn daily_cost(&self, now: DateTime<Utc>) -> f64 {
        let today = now.date_naive();
        self.lock()
            .iter()
            .filter(|r| r.timestamp.date_naive() == today)
            .map(|r| r.cost.total_cost())
            .sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<UsageRecord>> {
        // Poisoning only means another worker panicked mid-call; pushes are whole.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
