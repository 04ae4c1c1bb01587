use crate::orchestrator::Orchestrator;

/// Shared by every handler behind an `Arc`.
pub struct AppState {
    pub orchestrator: Orchestrator,
}
