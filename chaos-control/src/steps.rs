//! Step timeline reconstruction.
//!
//! Folds an execution's event history into one record per named state. The
//! fold runs over whatever history is available at call time and keeps no
//! state between calls, so the same history always yields the same steps.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared_types::{iso_timestamp, ExperimentStep, StepStatus};

use crate::workflow::{HistoryEvent, HistoryEventType};

#[derive(Debug, Clone)]
struct StepDraft {
    name: String,
    status: StepStatus,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    duration: Option<i64>,
    output: Option<serde_json::Value>,
}

impl StepDraft {
    fn running(name: &str, start: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Running,
            start: Some(start),
            end: None,
            duration: None,
            output: None,
        }
    }

    fn into_step(self) -> ExperimentStep {
        ExperimentStep {
            step_name: self.name,
            status: self.status,
            start_time: self.start.map(iso_timestamp),
            end_time: self.end.map(iso_timestamp),
            duration: self.duration,
            output: self.output,
        }
    }
}

/// Step records keyed by state name, in order of first appearance.
///
/// Re-entering a state replaces its record in place: only the latest attempt
/// of a retried state is kept.
#[derive(Debug, Default)]
struct StepTable {
    order: Vec<StepDraft>,
    positions: HashMap<String, usize>,
}

impl StepTable {
    fn upsert(&mut self, draft: StepDraft) {
        match self.positions.get(&draft.name) {
            Some(&pos) => self.order[pos] = draft,
            None => {
                self.positions.insert(draft.name.clone(), self.order.len());
                self.order.push(draft);
            }
        }
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut StepDraft> {
        let pos = *self.positions.get(name)?;
        self.order.get_mut(pos)
    }

    fn into_steps(self) -> Vec<ExperimentStep> {
        self.order
            .into_iter()
            .filter(|draft| !draft.name.is_empty())
            .map(StepDraft::into_step)
            .collect()
    }
}

/// Whole seconds from `start` to `end`, rounded down and never negative.
pub fn floor_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let millis = (end - start).num_milliseconds();
    millis.div_euclid(1000).max(0)
}

/// Rebuild the step timeline from an ordered event history.
///
/// - a state-entered event opens (or reopens) the step as running
/// - a state-exited event completes it with a duration; a missing open record
///   is synthesised from the exit timestamp so truncated histories still show
///   the step
/// - a task-failed event marks the step whose entered event is the failure's
///   predecessor as failed, without a duration; failures whose predecessor is
///   not an entered event in this history are dropped
/// - every other event is ignored
pub fn reconstruct_steps(events: &[HistoryEvent]) -> Vec<ExperimentStep> {
    let entered_names: HashMap<i64, &str> = events
        .iter()
        .filter_map(|event| {
            let details = event.state_entered_event_details.as_ref()?;
            Some((event.id, details.name.as_str()))
        })
        .collect();

    let mut table = StepTable::default();

    for event in events {
        match event.event_type {
            HistoryEventType::TaskStateEntered => {
                if let Some(details) = &event.state_entered_event_details {
                    table.upsert(StepDraft::running(&details.name, event.timestamp));
                }
            }
            HistoryEventType::TaskStateExited => {
                let Some(details) = &event.state_exited_event_details else {
                    continue;
                };
                if table.get_mut(&details.name).is_none() {
                    table.upsert(StepDraft::running(&details.name, event.timestamp));
                }
                if let Some(step) = table.get_mut(&details.name) {
                    let start = step.start.unwrap_or(event.timestamp);
                    step.status = StepStatus::Completed;
                    step.end = Some(event.timestamp);
                    step.duration = Some(floor_seconds(start, event.timestamp));
                    step.output = details.output.as_deref().map(parse_output);
                }
            }
            HistoryEventType::TaskFailed => {
                let Some(name) = event
                    .previous_event_id
                    .and_then(|prev| entered_names.get(&prev).copied())
                else {
                    continue;
                };
                match table.get_mut(name) {
                    Some(step) => {
                        step.status = StepStatus::Failed;
                        step.end = Some(event.timestamp);
                    }
                    None => table.upsert(StepDraft {
                        name: name.to_string(),
                        status: StepStatus::Failed,
                        start: None,
                        end: Some(event.timestamp),
                        duration: None,
                        output: None,
                    }),
                }
            }
            _ => {}
        }
    }

    table.into_steps()
}

fn parse_output(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
