//! Chaos control plane
//!
//! Orchestrates failure-injection experiments: records them, starts their
//! workflow executions, reconciles their status, rebuilds step timelines from
//! execution history and reports fleet health.

pub mod analytics;
pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod fleet;
pub mod health;
pub mod middleware;
pub mod orchestrator;
pub mod query;
pub mod state;
pub mod steps;
pub mod store;
pub mod workflow;

pub use state::AppState;
