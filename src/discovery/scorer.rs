//! Abandonment classification and weighted repository scores.
//!
//! Everything here is pure: the caller passes `now`, and identical inputs
//! always produce identical outputs. Out-of-range inputs are clamped, never rejected.

use chrono::{DateTime, Months, Utc};

use crate::discovery::models::{
    AiAnalysis, RepositoryMetadata, RepositoryMetrics, RepositoryScores, RepositorySignals,
};

pub const WEIGHT_QUALITY: f64 = 0.30;
pub const WEIGHT_UNIQUENESS: f64 = 0.25;
pub const WEIGHT_COMPLETENESS: f64 = 0.25;
pub const WEIGHT_REVIVAL_EFFORT: f64 = 0.20;

pub const ABANDONMENT_STAR_FLOOR: u32 = 10;
const ISSUE_QUIET_MONTHS: u32 = 6;

/// Hours at which revival effort bottoms out at zero.
const EFFORT_HOURS_CEILING: f64 = 1000.0;
/// Similar-repository count at which uniqueness bottoms out at zero.
const SIMILAR_REPOS_CEILING: f64 = 100.0;

/// Used when the model gives no effort estimate: the midpoint of the scale.
pub const DEFAULT_EFFORT_HOURS: u32 = 500;
/// Used when the crawler did not measure similar repositories: neutral uniqueness.
pub const DEFAULT_SIMILAR_REPOS: u32 = 50;
pub const DEFAULT_CODE_QUALITY: f64 = 0.5;

/// Days of inactivity at which the feasibility staleness factor reaches zero.
const STALENESS_HORIZON_DAYS: f64 = 1095.0;

fn unit(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

/// `abandoned` iff no commits in the trailing 12 months, no issue activity in
/// the trailing 6 months, and at least `ABANDONMENT_STAR_FLOOR` stars.
pub fn is_abandoned(
    stars: u32,
    commits_last_year: u32,
    last_issue_activity: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let issues_quiet = match last_issue_activity {
        None => true,
        Some(at) => match now.checked_sub_months(Months::new(ISSUE_QUIET_MONTHS)) {
            Some(cutoff) => at <= cutoff,
            None => false,
        },
    };
    commits_last_year == 0 && issues_quiet && stars >= ABANDONMENT_STAR_FLOOR
}

pub fn completeness(has_readme: bool, has_license: bool, has_docs: bool, has_tests: bool) -> f64 {
    let present = [has_readme, has_license, has_docs, has_tests]
        .into_iter()
        .filter(|b| *b)
        .count();
    present as f64 / 4.0
}

pub fn revival_effort(estimated_hours: f64) -> f64 {
    unit(1.0 - (estimated_hours.max(0.0) / EFFORT_HOURS_CEILING).min(1.0))
}

pub fn uniqueness(similar_repos_count: u32) -> f64 {
    unit(1.0 - (f64::from(similar_repos_count) / SIMILAR_REPOS_CEILING).min(1.0))
}

/// The four components of the potential score, each expected in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PotentialInputs {
    pub quality: f64,
    pub uniqueness: f64,
    pub completeness: f64,
    pub revival_effort: f64,
}

pub fn potential(inputs: &PotentialInputs) -> f64 {
    unit(
        WEIGHT_QUALITY * unit(inputs.quality)
            + WEIGHT_UNIQUENESS * unit(inputs.uniqueness)
            + WEIGHT_COMPLETENESS * unit(inputs.completeness)
            + WEIGHT_REVIVAL_EFFORT * unit(inputs.revival_effort),
    )
}

/// How practical a revival is: recent activity, documentation, tests, community.
pub fn revival_feasibility(metrics: &RepositoryMetrics, signals: &RepositorySignals) -> f64 {
    let staleness = metrics
        .days_since_last_commit
        .map_or(0.0, |days| unit(1.0 - f64::from(days) / STALENESS_HORIZON_DAYS));
    let test_factor = if signals.has_tests { 0.7 } else { 0.3 };
    let community = (f64::from(metrics.contributors_count) / 5.0).min(1.0);

    unit(
        0.25 * staleness
            + 0.30 * unit(signals.documentation_quality)
            + 0.25 * test_factor
            + 0.20 * community,
    )
}

/// Interest and adoption signals. Stars have a sweet spot between 20 and 200.
pub fn product_fit(metrics: &RepositoryMetrics) -> f64 {
    let stars = f64::from(metrics.stars);
    let star_score = if metrics.stars < 20 {
        stars / 20.0
    } else if metrics.stars <= 200 {
        1.0
    } else {
        (1.0 - (stars - 200.0) / 1000.0).max(0.5)
    };

    let fork_ratio = f64::from(metrics.forks) / f64::from(metrics.stars.max(1));
    let fork_score = (fork_ratio * 5.0).min(1.0);
    let issue_score = (f64::from(metrics.open_issues) / 20.0).min(1.0);

    unit(0.40 * star_score + 0.35 * fork_score + 0.25 * issue_score)
}

fn days_since(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<u32> {
    at.map(|at| (now - at).num_days().clamp(0, i64::from(u32::MAX)) as u32)
}

pub fn derive_metrics(meta: &RepositoryMetadata, now: DateTime<Utc>) -> RepositoryMetrics {
    RepositoryMetrics {
        stars: meta.stars,
        forks: meta.forks,
        open_issues: meta.open_issues,
        contributors_count: meta.contributors_count,
        commits_last_year: meta.commits_last_year,
        days_since_last_commit: days_since(meta.pushed_at, now),
    }
}

/// Signals derivable from metadata alone, before any model analysis.
pub fn initial_signals(meta: &RepositoryMetadata, now: DateTime<Utc>) -> RepositorySignals {
    let has_readme = meta.has_readme || meta.readme.as_deref().is_some_and(|r| !r.trim().is_empty());
    RepositorySignals {
        abandoned: is_abandoned(
            meta.stars,
            meta.commits_last_year,
            meta.last_issue_activity_at,
            now,
        ),
        has_readme,
        has_license: meta.license.is_some(),
        has_tests: meta.has_tests,
        has_ci: meta.has_ci,
        has_docs: meta.has_docs,
        documentation_quality: if has_readme { 0.5 } else { 0.0 },
        code_quality_estimate: DEFAULT_CODE_QUALITY,
    }
}

/// Quality implied by the first effort word of a recommendation.
/// Less revival effort means better code.
fn quality_from_recommendation(recommendation: &str) -> Option<f64> {
    recommendation
        .split(|c: char| !c.is_ascii_alphabetic())
        .map(str::to_ascii_lowercase)
        .find_map(|word| match word.as_str() {
            "low" => Some(0.8),
            "medium" => Some(0.6),
            "high" => Some(0.4),
            _ => None,
        })
}

/// Fold a model analysis into the metadata signals.
pub fn refine_signals(mut signals: RepositorySignals, analysis: &AiAnalysis) -> RepositorySignals {
    if let Some(q) = analysis
        .quality
        .map(unit)
        .or_else(|| quality_from_recommendation(&analysis.revival_recommendation))
    {
        signals.code_quality_estimate = q;
    }

    if analysis
        .strengths
        .iter()
        .any(|s| s.to_lowercase().contains("test"))
    {
        signals.has_tests = true;
    }

    let mentions = |items: &[String]| {
        items
            .iter()
            .filter(|s| s.to_lowercase().contains("doc"))
            .count() as f64
    };
    let doc_balance = mentions(&analysis.strengths) - mentions(&analysis.weaknesses);
    signals.documentation_quality = unit(0.5 + doc_balance * 0.2);
    signals
}

/// All three scores for one repository.
pub fn score(
    meta: &RepositoryMetadata,
    metrics: &RepositoryMetrics,
    signals: &RepositorySignals,
    analysis: Option<&AiAnalysis>,
) -> RepositoryScores {
    let hours = analysis
        .and_then(|a| a.estimated_effort_hours)
        .unwrap_or(DEFAULT_EFFORT_HOURS);
    let inputs = PotentialInputs {
        quality: signals.code_quality_estimate,
        uniqueness: uniqueness(meta.similar_repos_count.unwrap_or(DEFAULT_SIMILAR_REPOS)),
        completeness: completeness(
            signals.has_readme,
            signals.has_license,
            signals.has_docs,
            signals.has_tests,
        ),
        revival_effort: revival_effort(f64::from(hours)),
    };

    RepositoryScores {
        potential: potential(&inputs),
        revival_feasibility: revival_feasibility(metrics, signals),
        product_fit: product_fit(metrics),
    }
}
