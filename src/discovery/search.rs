//! Search strategies and the GitHub search query each one produces.
//!
//! Only the query contract lives here; executing the search is the crawler's job.

use chrono::{DateTime, Months, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Repositories not pushed for this long count as stale in search queries.
const STALE_AFTER_MONTHS: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Starred projects that stopped receiving pushes.
    AbandonedStars,
    /// Small prototypes and proofs of concept.
    UnfinishedIdeas,
    /// Mid-popularity projects likely maintained by one person.
    SoloDeveloper,
    /// Stale projects in one language.
    LanguageSpecific,
}

impl SearchStrategy {
    pub const ALL: [SearchStrategy; 4] = [
        Self::AbandonedStars,
        Self::UnfinishedIdeas,
        Self::SoloDeveloper,
        Self::LanguageSpecific,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AbandonedStars => "abandoned_stars",
            Self::UnfinishedIdeas => "unfinished_ideas",
            Self::SoloDeveloper => "solo_developer",
            Self::LanguageSpecific => "language_specific",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub strategy: SearchStrategy,
    pub language: String,
    pub query: String,
}

/// Build the search query for one strategy and language.
pub fn build_query(
    strategy: SearchStrategy,
    language: &str,
    min_stars: u32,
    max_stars: u32,
    now: DateTime<Utc>,
) -> String {
    let cutoff = now
        .checked_sub_months(Months::new(STALE_AFTER_MONTHS))
        .unwrap_or(now)
        .format("%Y-%m-%d");

    let query = match strategy {
        SearchStrategy::AbandonedStars => {
            format!("stars:{min_stars}..{max_stars} pushed:<{cutoff} archived:false")
        }
        SearchStrategy::UnfinishedIdeas => {
            "stars:5..50 (topic:mvp OR topic:prototype OR topic:proof-of-concept)".to_string()
        }
        SearchStrategy::SoloDeveloper => format!("stars:20..200 pushed:<{cutoff} archived:false"),
        SearchStrategy::LanguageSpecific => {
            format!("language:{language} stars:{min_stars}..{max_stars} pushed:<{cutoff}")
        }
    };

    if query.contains("language:") {
        query
    } else {
        format!("language:{language} {query}")
    }
}

/// Queries for every (strategy, language) pair, strategies outermost.
pub fn plan_queries(
    strategies: &[SearchStrategy],
    languages: &[String],
    min_stars: u32,
    max_stars: u32,
    now: DateTime<Utc>,
) -> Vec<SearchQuery> {
    strategies
        .iter()
        .flat_map(|&strategy| {
            languages.iter().map(move |language| SearchQuery {
                strategy,
                language: language.clone(),
                query: build_query(strategy, language, min_stars, max_stars, now),
            })
        })
        .collect()
}
