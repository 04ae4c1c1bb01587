//! Listing experiments and results.
//!
//! Listings read one page from the store and filter that page: a filtered
//! listing can return fewer items than the limit even when more matches exist
//! further on.

use shared_types::{Experiment, ExperimentQueryParams, ExperimentResult, ResultQueryParams};

use crate::store::{ExperimentRepository, StoreError};

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Status filter value that matches every experiment.
const ALL_STATUSES: &str = "ALL";

/// Effective page size for a requested limit. Missing or zero means the
/// default; anything above the maximum is capped.
pub fn page_limit(requested: Option<u32>) -> u32 {
    requested
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .min(MAX_PAGE_LIMIT)
}

/// Apply status and date filters, newest start first.
///
/// Timestamps compare as strings; every stored timestamp has the same fixed
/// width, so string order is time order.
pub fn filter_experiments(
    mut experiments: Vec<Experiment>,
    params: &ExperimentQueryParams,
) -> Vec<Experiment> {
    if let Some(status) = params.status.as_deref().filter(|s| *s != ALL_STATUSES) {
        experiments.retain(|exp| exp.status.as_str() == status);
    }
    if let Some(start) = params.start_date.as_deref() {
        experiments.retain(|exp| exp.start_time.as_str() >= start);
    }
    if let Some(end) = params.end_date.as_deref() {
        // Experiments that have not ended never match an end-date bound.
        experiments.retain(|exp| exp.end_time.as_deref().is_some_and(|t| t <= end));
    }
    experiments.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    experiments
}

pub fn filter_results(
    mut results: Vec<ExperimentResult>,
    params: &ResultQueryParams,
) -> Vec<ExperimentResult> {
    if let Some(start) = params.start_date.as_deref() {
        results.retain(|res| res.timestamp.as_str() >= start);
    }
    if let Some(end) = params.end_date.as_deref() {
        results.retain(|res| res.timestamp.as_str() <= end);
    }
    results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    results
}

#[derive(Clone)]
pub struct QueryService {
    repo: ExperimentRepository,
}

impl QueryService {
    pub fn new(repo: ExperimentRepository) -> Self {
        Self { repo }
    }

    pub async fn list_experiments(
        &self,
        params: &ExperimentQueryParams,
    ) -> Result<Vec<Experiment>, StoreError> {
        let page = self.repo.scan_experiments(page_limit(params.limit)).await?;
        Ok(filter_experiments(page, params))
    }

    /// With an experiment id, that experiment's results newest first (date
    /// bounds are not applied); otherwise a filtered page of all results.
    pub async fn list_results(
        &self,
        params: &ResultQueryParams,
    ) -> Result<Vec<ExperimentResult>, StoreError> {
        let limit = page_limit(params.limit);
        if let Some(experiment_id) = params.experiment_id.as_deref() {
            return self.repo.results_for_experiment(experiment_id, limit).await;
        }
        let page = self.repo.scan_results(limit).await?;
        Ok(filter_results(page, params))
    }
}
