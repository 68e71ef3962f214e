//! In-memory store.
//!
//! Each entity lives in its own `RwLock<HashMap>`; counters are updated
//! under the write lock so concurrent starts never undercount.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::playbook::{PlaybookDefinition, StepDefinition};
use crate::core::suite::ScenarioSuite;
use crate::domain::{RiskLevel, Scenario, ScenarioRun, ScenarioStatus, SuiteRun};

use super::{Store, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    playbooks: RwLock<HashMap<Uuid, PlaybookDefinition>>,
    steps: RwLock<HashMap<Uuid, Vec<StepDefinition>>>,
    scenarios: RwLock<HashMap<Uuid, Scenario>>,
    runs: RwLock<HashMap<Uuid, ScenarioRun>>,
    suites: RwLock<HashMap<Uuid, ScenarioSuite>>,
    suite_runs: RwLock<HashMap<Uuid, SuiteRun>>,

    /// Fault injection: make `insert_steps` fail
    fail_step_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `insert_steps` call fail (or stop failing)
    pub fn fail_step_inserts(&self, fail: bool) {
        self.fail_step_inserts.store(fail, Ordering::SeqCst);
    }
}

fn not_found(kind: &'static str, id: Uuid) -> StoreError {
    StoreError::NotFound { kind, id }
}

fn has_live_run(runs: &HashMap<Uuid, ScenarioRun>, playbook_id: Uuid) -> bool {
    runs.values()
        .any(|r| r.playbook_id == playbook_id && !r.is_terminal())
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_playbook(&self, playbook: &PlaybookDefinition) -> Result<(), StoreError> {
        let mut playbooks = self.playbooks.write().await;
        if playbooks.contains_key(&playbook.id) {
            return Err(StoreError::Conflict(format!(
                "playbook {} already exists",
                playbook.id
            )));
        }
        let mut record = playbook.clone();
        record.steps.clear();
        playbooks.insert(playbook.id, record);
        Ok(())
    }

    async fn insert_steps(&self, playbook_id: Uuid, steps: &[StepDefinition]) -> Result<(), StoreError> {
        if self.fail_step_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("step insertion rejected".to_string()));
        }
        if !self.playbooks.read().await.contains_key(&playbook_id) {
            return Err(not_found("playbook", playbook_id));
        }
        self.steps.write().await.insert(playbook_id, steps.to_vec());
        Ok(())
    }

    async fn get_playbook(&self, id: Uuid) -> Result<PlaybookDefinition, StoreError> {
        let mut playbook = self
            .playbooks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("playbook", id))?;
        playbook.steps = self.steps.read().await.get(&id).cloned().unwrap_or_default();
        Ok(playbook)
    }

    async fn list_playbooks(&self, org_id: &str) -> Result<Vec<PlaybookDefinition>, StoreError> {
        let ids: Vec<Uuid> = self
            .playbooks
            .read()
            .await
            .values()
            .filter(|p| p.org_id == org_id)
            .map(|p| p.id)
            .collect();

        let mut playbooks = Vec::with_capacity(ids.len());
        for id in ids {
            playbooks.push(self.get_playbook(id).await?);
        }
        playbooks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(playbooks)
    }

    async fn update_playbook(&self, playbook: &PlaybookDefinition) -> Result<(), StoreError> {
        let mut playbooks = self.playbooks.write().await;
        let slot = playbooks
            .get_mut(&playbook.id)
            .ok_or_else(|| not_found("playbook", playbook.id))?;
        let mut record = playbook.clone();
        record.steps.clear();
        *slot = record;
        drop(playbooks);

        self.steps
            .write()
            .await
            .insert(playbook.id, playbook.steps.clone());
        Ok(())
    }

    async fn delete_playbook(&self, id: Uuid) -> Result<(), StoreError> {
        self.playbooks
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| not_found("playbook", id))?;
        self.steps.write().await.remove(&id);
        Ok(())
    }

    async fn edit_playbook(&self, playbook: &PlaybookDefinition) -> Result<(), StoreError> {
        let runs = self.runs.read().await;
        let mut playbooks = self.playbooks.write().await;
        let slot = playbooks
            .get_mut(&playbook.id)
            .ok_or_else(|| not_found("playbook", playbook.id))?;
        if has_live_run(&runs, playbook.id) {
            return Err(StoreError::PlaybookLocked(playbook.id));
        }

        let mut record = playbook.clone();
        record.steps.clear();
        *slot = record;
        self.steps
            .write()
            .await
            .insert(playbook.id, playbook.steps.clone());
        Ok(())
    }

    async fn delete_idle_playbook(&self, id: Uuid) -> Result<(), StoreError> {
        let runs = self.runs.read().await;
        let mut playbooks = self.playbooks.write().await;
        if !playbooks.contains_key(&id) {
            return Err(not_found("playbook", id));
        }
        if has_live_run(&runs, id) {
            return Err(StoreError::PlaybookLocked(id));
        }

        playbooks.remove(&id);
        self.steps.write().await.remove(&id);
        Ok(())
    }

    async fn insert_scenario(&self, scenario: &Scenario) -> Result<(), StoreError> {
        self.scenarios
            .write()
            .await
            .insert(scenario.id, scenario.clone());
        Ok(())
    }

    async fn get_scenario(&self, id: Uuid) -> Result<Scenario, StoreError> {
        self.scenarios
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("scenario", id))
    }

    async fn list_scenarios(&self, org_id: &str) -> Result<Vec<Scenario>, StoreError> {
        let mut scenarios: Vec<Scenario> = self
            .scenarios
            .read()
            .await
            .values()
            .filter(|s| s.org_id == org_id)
            .cloned()
            .collect();
        scenarios.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(scenarios)
    }

    async fn update_scenario(&self, scenario: &Scenario) -> Result<(), StoreError> {
        let mut scenarios = self.scenarios.write().await;
        let slot = scenarios
            .get_mut(&scenario.id)
            .ok_or_else(|| not_found("scenario", scenario.id))?;
        *slot = scenario.clone();
        Ok(())
    }

    async fn begin_scenario_run(
        &self,
        scenario_id: Uuid,
        run_id: Uuid,
        allow_concurrent: bool,
    ) -> Result<Scenario, StoreError> {
        let mut scenarios = self.scenarios.write().await;
        let scenario = scenarios
            .get_mut(&scenario_id)
            .ok_or_else(|| not_found("scenario", scenario_id))?;

        if let Some(active) = scenario.latest_active_run() {
            if !allow_concurrent {
                return Err(StoreError::Conflict(format!(
                    "scenario {} already has active run {}",
                    scenario_id, active
                )));
            }
        }

        scenario.run_count += 1;
        scenario.active_run_ids.push(run_id);
        scenario.status = ScenarioStatus::InProgress;
        scenario.updated_at = Utc::now();
        Ok(scenario.clone())
    }

    async fn finish_scenario_run(
        &self,
        scenario_id: Uuid,
        run_id: Uuid,
        risk: RiskLevel,
    ) -> Result<Scenario, StoreError> {
        let mut scenarios = self.scenarios.write().await;
        let scenario = scenarios
            .get_mut(&scenario_id)
            .ok_or_else(|| not_found("scenario", scenario_id))?;

        let before = scenario.active_run_ids.len();
        scenario.active_run_ids.retain(|id| *id != run_id);
        if before != scenario.active_run_ids.len() && scenario.active_run_ids.is_empty() {
            scenario.status = ScenarioStatus::Completed;
        }
        scenario.current_risk = risk;
        scenario.updated_at = Utc::now();
        Ok(scenario.clone())
    }

    async fn insert_run(&self, run: &ScenarioRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let playbooks = self.playbooks.read().await;
        if let Some(playbook) = playbooks.get(&run.playbook_id) {
            if playbook.updated_at != run.playbook_revision {
                return Err(StoreError::Conflict(format!(
                    "playbook {} changed while run {} was starting",
                    run.playbook_id, run.id
                )));
            }
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<ScenarioRun, StoreError> {
        self.runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("scenario run", id))
    }

    async fn update_run(&self, run: &ScenarioRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let slot = runs
            .get_mut(&run.id)
            .ok_or_else(|| not_found("scenario run", run.id))?;
        *slot = run.clone();
        Ok(())
    }

    async fn list_runs(&self, scenario_id: Uuid) -> Result<Vec<ScenarioRun>, StoreError> {
        let mut runs: Vec<ScenarioRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.scenario_id == scenario_id)
            .cloned()
            .collect();
        // Most recent first
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    async fn insert_suite(&self, suite: &ScenarioSuite) -> Result<(), StoreError> {
        self.suites.write().await.insert(suite.id, suite.clone());
        Ok(())
    }

    async fn get_suite(&self, id: Uuid) -> Result<ScenarioSuite, StoreError> {
        self.suites
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("suite", id))
    }

    async fn list_suites(&self, org_id: &str) -> Result<Vec<ScenarioSuite>, StoreError> {
        let mut suites: Vec<ScenarioSuite> = self
            .suites
            .read()
            .await
            .values()
            .filter(|s| s.org_id == org_id)
            .cloned()
            .collect();
        suites.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(suites)
    }

    async fn update_suite(&self, suite: &ScenarioSuite) -> Result<(), StoreError> {
        let mut suites = self.suites.write().await;
        let slot = suites
            .get_mut(&suite.id)
            .ok_or_else(|| not_found("suite", suite.id))?;
        *slot = suite.clone();
        Ok(())
    }

    async fn increment_suite_run_count(&self, suite_id: Uuid) -> Result<u64, StoreError> {
        let mut suites = self.suites.write().await;
        let suite = suites
            .get_mut(&suite_id)
            .ok_or_else(|| not_found("suite", suite_id))?;
        suite.run_count += 1;
        Ok(suite.run_count)
    }

    async fn insert_suite_run(&self, suite_run: &SuiteRun) -> Result<(), StoreError> {
        self.suite_runs
            .write()
            .await
            .insert(suite_run.id, suite_run.clone());
        Ok(())
    }

    async fn get_suite_run(&self, id: Uuid) -> Result<SuiteRun, StoreError> {
        self.suite_runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("suite run", id))
    }

    async fn update_suite_run(&self, suite_run: &SuiteRun) -> Result<(), StoreError> {
        let mut suite_runs = self.suite_runs.write().await;
        let slot = suite_runs
            .get_mut(&suite_run.id)
            .ok_or_else(|| not_found("suite run", suite_run.id))?;
        *slot = suite_run.clone();
        Ok(())
    }

    async fn list_suite_runs(&self, suite_id: Uuid) -> Result<Vec<SuiteRun>, StoreError> {
        let mut suite_runs: Vec<SuiteRun> = self
            .suite_runs
            .read()
            .await
            .values()
            .filter(|r| r.suite_id == suite_id)
            .cloned()
            .collect();
        suite_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(suite_runs)
    }
}
