//! Dashboard aggregates over recent experiments and results.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use shared_types::{
    parse_timestamp, Analytics, DailyCount, Experiment, ExperimentResult, TypeCount, WeeklyOutcome,
};

use crate::query::MAX_PAGE_LIMIT;
use crate::store::{ExperimentRepository, StoreError};

/// Aggregates over one full page of each table.
pub async fn load(repo: &ExperimentRepository, now: DateTime<Utc>) -> Result<Analytics, StoreError> {
    let experiments = repo.scan_experiments(MAX_PAGE_LIMIT).await?;
    let results = repo.scan_results(MAX_PAGE_LIMIT).await?;
    Ok(summarize(&experiments, &results, now))
}

pub fn summarize(
    experiments: &[Experiment],
    results: &[ExperimentResult],
    now: DateTime<Utc>,
) -> Analytics {
    let day_ago = now - Duration::hours(24);

    let mut per_day: BTreeMap<String, u32> = BTreeMap::new();
    let mut per_type: BTreeMap<&str, u32> = BTreeMap::new();
    let mut last24h_experiments = 0;
    for exp in experiments {
        let started = parse_timestamp(&exp.start_time);
        if started.is_some_and(|at| at >= day_ago) {
            last24h_experiments += 1;
        }
        if let Some(at) = started {
            *per_day.entry(at.format("%Y-%m-%d").to_string()).or_default() += 1;
        }
        *per_type.entry(exp.configuration.failure_type.as_str()).or_default() += 1;
    }

    let mut per_week: BTreeMap<String, (u32, u32)> = BTreeMap::new();
    for res in results {
        let Some(at) = parse_timestamp(&res.timestamp) else {
            continue;
        };
        let week = at.iso_week();
        let entry = per_week
            .entry(format!("{}-W{:02}", week.year(), week.week()))
            .or_default();
        if res.success {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }

    let successes = results.iter().filter(|r| r.success).count();
    let success_rate = percentage(successes, results.len());
    let average_recovery_time = if results.is_empty() {
        0.0
    } else {
        round1(results.iter().map(|r| r.recovery_time).sum::<f64>() / results.len() as f64)
    };

    let mut experiment_type_distribution: Vec<TypeCount> = per_type
        .into_iter()
        .map(|(failure_type, count)| TypeCount {
            failure_type: failure_type.to_string(),
            count,
        })
        .collect();
    experiment_type_distribution.sort_by(|a, b| b.count.cmp(&a.count));

    Analytics {
        total_experiments: experiments.len() as u32,
        success_rate,
        average_recovery_time,
        last24h_experiments,
        experiments_over_time: per_day
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect(),
        success_failure_by_week: per_week
            .into_iter()
            .map(|(week, (success, failure))| WeeklyOutcome {
                week,
                success,
                failure,
            })
            .collect(),
        experiment_type_distribution,
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round1(part as f64 * 100.0 / whole as f64)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
