use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{Experiment, ExperimentResult, ExperimentStatus};

use super::{Condition, ConditionalUpdate, Item, RecordStore, StoreError, TableSchema};

/// Results index: partition on `experimentId`, newest `timestamp` first.
pub const EXPERIMENT_ID_INDEX: &str = "ExperimentIdIndex";

/// Fields the orchestrator may change after an experiment record exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentUpdate {
    pub status: Option<ExperimentStatus>,
    pub end_time: Option<String>,
    pub duration: Option<i64>,
    pub execution_ref: Option<String>,
}

impl ExperimentUpdate {
    pub fn status(status: ExperimentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// The mutable fields of `experiment`, for persisting a transition.
    pub fn from_record(experiment: &Experiment) -> Self {
        Self {
            status: Some(experiment.status),
            end_time: experiment.end_time.clone(),
            duration: experiment.duration,
            execution_ref: experiment.execution_ref.clone(),
        }
    }

    fn into_item(self) -> Item {
        let mut fields = Item::new();
        if let Some(status) = self.status {
            fields.insert("status".into(), status.as_str().into());
        }
        if let Some(end_time) = self.end_time {
            fields.insert("endTime".into(), end_time.into());
        }
        if let Some(duration) = self.duration {
            fields.insert("duration".into(), duration.into());
        }
        if let Some(execution_ref) = self.execution_ref {
            fields.insert("executionRef".into(), execution_ref.into());
        }
        fields
    }
}

/// Outcome of writing an [`ExperimentUpdate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(Experiment),
    /// The stored status does not allow the write; the record as stored.
    Refused(Experiment),
    Missing,
}

/// Typed access to the experiments and results tables.
#[derive(Clone)]
pub struct ExperimentRepository {
    store: Arc<dyn RecordStore>,
    experiments_table: String,
    results_table: String,
}

impl ExperimentRepository {
    pub fn new(
        store: Arc<dyn RecordStore>,
        experiments_table: impl Into<String>,
        results_table: impl Into<String>,
    ) -> Self {
        Self {
            store,
            experiments_table: experiments_table.into(),
            results_table: results_table.into(),
        }
    }

    /// Table layouts this repository expects the store to know about.
    pub fn schemas(experiments_table: &str, results_table: &str) -> Vec<TableSchema> {
        vec![
            TableSchema::new(experiments_table, "experimentId"),
            TableSchema::new(results_table, "resultId").with_index(
                EXPERIMENT_ID_INDEX,
                "experimentId",
                "timestamp",
            ),
        ]
    }

    // ── Experiments ─────────────────────────────────────────────────────────

    pub async fn create_experiment(&self, experiment: &Experiment) -> Result<(), StoreError> {
        self.store
            .put(&self.experiments_table, to_item(experiment)?)
            .await
    }

    pub async fn get_experiment(&self, experiment_id: &str) -> Result<Option<Experiment>, StoreError> {
        self.store
            .get_by_key(&self.experiments_table, experiment_id)
            .await?
            .map(from_item)
            .transpose()
    }

    /// Apply `update` to the stored record.
    ///
    /// A status change is checked against the status stored at the moment of
    /// the write, so a record that reached a terminal status is never moved
    /// again, whoever else is writing.
    pub async fn update_experiment(
        &self,
        experiment_id: &str,
        update: ExperimentUpdate,
    ) -> Result<Transition, StoreError> {
        let Some(next) = update.status else {
            return Ok(
                match self
                    .store
                    .update_fields(&self.experiments_table, experiment_id, update.into_item())
                    .await?
                {
                    Some(item) => Transition::Applied(from_item(item)?),
                    None => Transition::Missing,
                },
            );
        };

        let writable_from = Condition::one_of(
            "status",
            ExperimentStatus::ALL
                .into_iter()
                .filter(|stored| stored.accepts_write_of(next))
                .map(|stored| serde_json::Value::from(stored.as_str())),
        );
        let outcome = self
            .store
            .update_fields_if(
                &self.experiments_table,
                experiment_id,
                update.into_item(),
                &writable_from,
            )
            .await?;
        Ok(match outcome {
            ConditionalUpdate::Updated(item) => Transition::Applied(from_item(item)?),
            ConditionalUpdate::Rejected(item) => Transition::Refused(from_item(item)?),
            ConditionalUpdate::Missing => Transition::Missing,
        })
    }

    pub async fn delete_experiment(&self, experiment_id: &str) -> Result<(), StoreError> {
        self.store
            .delete(&self.experiments_table, experiment_id)
            .await
    }

    pub async fn scan_experiments(&self, limit: u32) -> Result<Vec<Experiment>, StoreError> {
        self.store
            .scan(&self.experiments_table, limit)
            .await?
            .into_iter()
            .map(from_item)
            .collect()
    }

    // ── Results ─────────────────────────────────────────────────────────────

    pub async fn put_result(&self, result: &ExperimentResult) -> Result<(), StoreError> {
        self.store.put(&self.results_table, to_item(result)?).await
    }

    pub async fn get_result(&self, result_id: &str) -> Result<Option<ExperimentResult>, StoreError> {
        self.store
            .get_by_key(&self.results_table, result_id)
            .await?
            .map(from_item)
            .transpose()
    }

    pub async fn scan_results(&self, limit: u32) -> Result<Vec<ExperimentResult>, StoreError> {
        self.store
            .scan(&self.results_table, limit)
            .await?
            .into_iter()
            .map(from_item)
            .collect()
    }

    /// Newest-first results of one experiment.
    pub async fn results_for_experiment(
        &self,
        experiment_id: &str,
        limit: u32,
    ) -> Result<Vec<ExperimentResult>, StoreError> {
        self.store
            .query_by_index(
                &self.results_table,
                EXPERIMENT_ID_INDEX,
                experiment_id,
                limit,
                true,
            )
            .await?
            .into_iter()
            .map(from_item)
            .collect()
    }
}

fn to_item<T: Serialize>(value: &T) -> Result<Item, StoreError> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "expected an object, got {other}"
        ))),
    }
}

fn from_item<T: DeserializeOwned>(item: Item) -> Result<T, StoreError> {
    Ok(serde_json::from_value(serde_json::Value::Object(item))?)
}
