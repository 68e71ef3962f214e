//! Persistence collaborator.
//!
//! The orchestrator never assumes multi-entity transactions: creating a
//! playbook is two calls (`insert_playbook`, then `insert_steps`) and the
//! caller compensates if the second one fails.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::core::playbook::{PlaybookDefinition, StepDefinition};
use crate::core::suite::ScenarioSuite;
use crate::domain::{RiskLevel, Scenario, ScenarioRun, SuiteRun};

pub use memory::MemoryStore;

/// Errors raised by a store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("playbook {0} has a live run")]
    PlaybookLocked(Uuid),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// CRUD access to every orchestrated entity, org-scoped for listing
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert the playbook record; its steps are stored separately
    async fn insert_playbook(&self, playbook: &PlaybookDefinition) -> Result<(), StoreError>;

    /// Attach (or replace) the step set of a stored playbook
    async fn insert_steps(&self, playbook_id: Uuid, steps: &[StepDefinition]) -> Result<(), StoreError>;

    async fn get_playbook(&self, id: Uuid) -> Result<PlaybookDefinition, StoreError>;
    async fn list_playbooks(&self, org_id: &str) -> Result<Vec<PlaybookDefinition>, StoreError>;
    async fn update_playbook(&self, playbook: &PlaybookDefinition) -> Result<(), StoreError>;
    async fn delete_playbook(&self, id: Uuid) -> Result<(), StoreError>;

    /// Replace the playbook and its steps unless a non-terminal run
    /// references it (`PlaybookLocked`). The check and the write are
    /// one atomic step with respect to `insert_run`.
    async fn edit_playbook(&self, playbook: &PlaybookDefinition) -> Result<(), StoreError>;

    /// Delete the playbook unless a non-terminal run references it
    async fn delete_idle_playbook(&self, id: Uuid) -> Result<(), StoreError>;

    async fn insert_scenario(&self, scenario: &Scenario) -> Result<(), StoreError>;
    async fn get_scenario(&self, id: Uuid) -> Result<Scenario, StoreError>;
    async fn list_scenarios(&self, org_id: &str) -> Result<Vec<Scenario>, StoreError>;
    async fn update_scenario(&self, scenario: &Scenario) -> Result<(), StoreError>;

    /// Atomically bump the run counter and mark `run_id` active.
    ///
    /// Fails with `Conflict` when another run is active and
    /// `allow_concurrent` is false.
    async fn begin_scenario_run(
        &self,
        scenario_id: Uuid,
        run_id: Uuid,
        allow_concurrent: bool,
    ) -> Result<Scenario, StoreError>;

    /// Clear `run_id` as the active run and record the resulting risk
    async fn finish_scenario_run(
        &self,
        scenario_id: Uuid,
        run_id: Uuid,
        risk: RiskLevel,
    ) -> Result<Scenario, StoreError>;

    /// Insert a new run. Fails with `Conflict` when the playbook was
    /// edited after the run's steps were materialized from it.
    async fn insert_run(&self, run: &ScenarioRun) -> Result<(), StoreError>;
    async fn get_run(&self, id: Uuid) -> Result<ScenarioRun, StoreError>;
    async fn update_run(&self, run: &ScenarioRun) -> Result<(), StoreError>;
    async fn list_runs(&self, scenario_id: Uuid) -> Result<Vec<ScenarioRun>, StoreError>;

    async fn insert_suite(&self, suite: &ScenarioSuite) -> Result<(), StoreError>;
    async fn get_suite(&self, id: Uuid) -> Result<ScenarioSuite, StoreError>;
    async fn list_suites(&self, org_id: &str) -> Result<Vec<ScenarioSuite>, StoreError>;
    async fn update_suite(&self, suite: &ScenarioSuite) -> Result<(), StoreError>;

    /// Atomically bump the suite's run counter
    async fn increment_suite_run_count(&self, suite_id: Uuid) -> Result<u64, StoreError>;

    async fn insert_suite_run(&self, suite_run: &SuiteRun) -> Result<(), StoreError>;
    async fn get_suite_run(&self, id: Uuid) -> Result<SuiteRun, StoreError>;
    async fn update_suite_run(&self, suite_run: &SuiteRun) -> Result<(), StoreError>;
    async fn list_suite_runs(&self, suite_id: Uuid) -> Result<Vec<SuiteRun>, StoreError>;
}
