//! Orchestration facade.
//!
//! Coordinates the store, the audit sink and the two external services
//! around the pure state machines in `run_machine` and `suite_runner`.
//! Every mutating operation loads the entity, applies one transition,
//! persists it and appends exactly one audit event for its subject.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{
    ActionExecutor, HttpExecutor, HttpSynthesizer, SimulatedExecutor, Synthesizer,
    TemplateSynthesizer,
};
use crate::config::{ExecutorConfig, ResolvedConfig, SynthesisConfig};
use crate::domain::{
    AuditAction, AuditEvent, AuditSubject, EntityKind, RunStatus, Scenario, ScenarioRun,
    ScenarioStatus, SuiteRun, SuiteRunItem, SuiteRunStatus,
};
use crate::error::{OrchestratorError, Result};
use crate::store::{MemoryStore, Store, StoreError};

use super::aggregator::{self, NarrativeRequest, RiskMapRequest};
use super::audit_log::{AuditSink, JsonlAuditLog, MemoryAuditLog};
use super::graph::{validate_definitions, validate_playbook};
use super::limits::ExecutionLimits;
use super::playbook::{PlaybookDefinition, PlaybookStatus, StepDefinition};
use super::run_machine::{self, ExecutionContext};
use super::suite::{ScenarioSuite, SuiteItem, SuiteStatus};
use super::suite_runner::{self, ScenarioDriver};
use super::trigger::TriggerCondition;

/// Policy applied when starting and executing runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunPolicy {
    /// Allow more than one in-flight run per scenario
    #[serde(default)]
    pub allow_concurrent_runs: bool,

    #[serde(default)]
    pub limits: ExecutionLimits,
}

/// Partial edit of a playbook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybookUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub steps: Option<Vec<StepDefinition>>,
}

/// A suite item to insert; appended when no position is given
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSuiteItem {
    pub scenario_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub trigger: TriggerCondition,
    #[serde(default)]
    pub position: Option<usize>,
}

/// Partial edit of a suite item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteItemUpdate {
    pub name: Option<String>,
    pub trigger: Option<TriggerCondition>,
    pub position: Option<usize>,
}

/// Main orchestrator
pub struct Orchestrator {
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditSink>,
    executor: Arc<dyn ActionExecutor>,
    synthesizer: Arc<dyn Synthesizer>,
    policy: RunPolicy,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        audit: Arc<dyn AuditSink>,
        executor: Arc<dyn ActionExecutor>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            store,
            audit,
            executor,
            synthesizer,
            policy: RunPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fully in-process orchestrator with simulated collaborators
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryAuditLog::new()),
            Arc::new(SimulatedExecutor::new()),
            Arc::new(TemplateSynthesizer::new()),
        )
    }

    /// Build collaborators from resolved configuration
    pub async fn from_config(config: &ResolvedConfig) -> anyhow::Result<Self> {
        let audit = JsonlAuditLog::open(config.audit_log_path()).await?;

        let executor: Arc<dyn ActionExecutor> = match &config.executor {
            ExecutorConfig::Simulated => Arc::new(SimulatedExecutor::new()),
            ExecutorConfig::Http { endpoint } => {
                let mut http = HttpExecutor::new(endpoint.clone());
                if let Some(ref token) = config.executor_token {
                    http = http.with_token(token.clone());
                }
                Arc::new(http)
            }
        };

        let synthesizer: Arc<dyn Synthesizer> = match &config.synthesis {
            SynthesisConfig::Template => Arc::new(TemplateSynthesizer::new()),
            SynthesisConfig::Http {
                endpoint,
                timeout_seconds,
            } => Arc::new(HttpSynthesizer::new(
                endpoint.clone(),
                Duration::from_secs(*timeout_seconds),
            )),
        };

        info!(
            executor = executor.name(),
            synthesizer = synthesizer.name(),
            audit_log = %config.audit_log_path().display(),
            "Orchestrator configured"
        );

        Ok(Self::new(Arc::new(MemoryStore::new()), Arc::new(audit), executor, synthesizer)
            .with_policy(config.run_policy()))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    async fn record(&self, event: AuditEvent) -> Result<AuditEvent> {
        self.audit.append(event).await.map_err(OrchestratorError::Audit)
    }

    // ------------------------------------------------------------------
    // Playbooks
    // ------------------------------------------------------------------

    /// Insert the record, then its steps; delete the record if the steps
    /// cannot be stored.
    async fn insert_playbook_with_steps(&self, playbook: &PlaybookDefinition) -> Result<()> {
        self.store.insert_playbook(playbook).await?;

        if let Err(err) = self.store.insert_steps(playbook.id, &playbook.steps).await {
            warn!(playbook_id = %playbook.id, error = %err, "Step insertion failed, deleting playbook record");
            if let Err(cleanup) = self.store.delete_playbook(playbook.id).await {
                error!(playbook_id = %playbook.id, error = %cleanup, "Compensating delete failed");
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Validate and store a new playbook
    #[instrument(skip(self, playbook), fields(playbook = %playbook.name))]
    pub async fn create_playbook(
        &self,
        mut playbook: PlaybookDefinition,
        actor: &str,
    ) -> Result<PlaybookDefinition> {
        validate_playbook(&playbook)?;

        let now = Utc::now();
        playbook.created_at = now;
        playbook.updated_at = now;
        self.insert_playbook_with_steps(&playbook).await?;

        info!(playbook_id = %playbook.id, steps = playbook.steps.len(), "Playbook created");
        self.record(
            AuditEvent::new(
                &playbook.org_id,
                AuditSubject::playbook(playbook.id),
                AuditAction::Created,
                actor,
                format!("Playbook '{}' created", playbook.name),
            )
            .with_payload(json!({ "version": playbook.version, "steps": playbook.steps.len() })),
        )
        .await?;
        Ok(playbook)
    }

    pub async fn get_playbook(&self, id: Uuid) -> Result<PlaybookDefinition> {
        Ok(self.store.get_playbook(id).await?)
    }

    pub async fn list_playbooks(&self, org_id: &str) -> Result<Vec<PlaybookDefinition>> {
        Ok(self.store.list_playbooks(org_id).await?)
    }

    /// Validate a bare step list without storing anything
    pub fn validate_playbook_steps(&self, steps: &[StepDefinition]) -> Result<()> {
        validate_definitions(steps)
    }

    /// Reject edits while any scenario of this playbook has a live run.
    /// The store repeats the check atomically with the write.
    async fn ensure_playbook_unlocked(&self, playbook: &PlaybookDefinition) -> Result<()> {
        let scenarios = self.store.list_scenarios(&playbook.org_id).await?;
        for scenario in scenarios.iter().filter(|s| s.playbook_id == playbook.id) {
            let runs = self.store.list_runs(scenario.id).await?;
            if runs
                .iter()
                .any(|r| r.playbook_id == playbook.id && !r.is_terminal())
            {
                return Err(OrchestratorError::Locked {
                    kind: EntityKind::Playbook,
                    id: playbook.id,
                });
            }
        }
        Ok(())
    }

    #[instrument(skip(self, update))]
    pub async fn update_playbook(
        &self,
        id: Uuid,
        update: PlaybookUpdate,
        actor: &str,
    ) -> Result<PlaybookDefinition> {
        let mut playbook = self.store.get_playbook(id).await?;
        if playbook.status == PlaybookStatus::Archived {
            return Err(OrchestratorError::invalid_request(format!(
                "Playbook {} is archived",
                id
            )));
        }
        self.ensure_playbook_unlocked(&playbook).await?;

        let mut changed = Vec::new();
        if let Some(steps) = update.steps {
            validate_definitions(&steps)?;
            playbook.steps = steps;
            changed.push("steps");
        }
        if let Some(name) = update.name {
            playbook.name = name;
            changed.push("name");
        }
        if let Some(description) = update.description {
            playbook.description = description;
            changed.push("description");
        }
        playbook.updated_at = Utc::now();
        self.store.edit_playbook(&playbook).await?;

        self.record(
            AuditEvent::new(
                &playbook.org_id,
                AuditSubject::playbook(id),
                AuditAction::Updated,
                actor,
                format!("Playbook '{}' updated", playbook.name),
            )
            .with_payload(json!({ "changed": changed })),
        )
        .await?;
        Ok(playbook)
    }

    /// Validate and activate; only active playbooks can start runs
    #[instrument(skip(self))]
    pub async fn activate_playbook(&self, id: Uuid, actor: &str) -> Result<PlaybookDefinition> {
        let mut playbook = self.store.get_playbook(id).await?;
        if playbook.status == PlaybookStatus::Archived {
            return Err(OrchestratorError::invalid_request(format!(
                "Playbook {} is archived",
                id
            )));
        }
        validate_playbook(&playbook)?;

        playbook.status = PlaybookStatus::Active;
        playbook.updated_at = Utc::now();
        self.store.update_playbook(&playbook).await?;

        info!(playbook_id = %id, "Playbook activated");
        self.record(AuditEvent::new(
            &playbook.org_id,
            AuditSubject::playbook(id),
            AuditAction::Activated,
            actor,
            format!("Playbook '{}' activated", playbook.name),
        ))
        .await?;
        Ok(playbook)
    }

    #[instrument(skip(self))]
    pub async fn archive_playbook(&self, id: Uuid, actor: &str) -> Result<PlaybookDefinition> {
        let mut playbook = self.store.get_playbook(id).await?;
        playbook.status = PlaybookStatus::Archived;
        playbook.updated_at = Utc::now();
        self.store.update_playbook(&playbook).await?;

        self.record(AuditEvent::new(
            &playbook.org_id,
            AuditSubject::playbook(id),
            AuditAction::Archived,
            actor,
            format!("Playbook '{}' archived", playbook.name),
        ))
        .await?;
        Ok(playbook)
    }

    /// Delete a playbook; returns the removed definition
    #[instrument(skip(self))]
    pub async fn delete_playbook(&self, id: Uuid, actor: &str) -> Result<PlaybookDefinition> {
        let playbook = self.store.get_playbook(id).await?;
        self.ensure_playbook_unlocked(&playbook).await?;
        self.store.delete_idle_playbook(id).await?;

        self.record(AuditEvent::new(
            &playbook.org_id,
            AuditSubject::playbook(id),
            AuditAction::Deleted,
            actor,
            format!("Playbook '{}' deleted", playbook.name),
        ))
        .await?;
        Ok(playbook)
    }

    /// Create a draft successor of `id` with a bumped version, reusing
    /// its steps unless new ones are given
    #[instrument(skip(self, steps))]
    pub async fn new_playbook_version(
        &self,
        id: Uuid,
        steps: Option<Vec<StepDefinition>>,
        actor: &str,
    ) -> Result<PlaybookDefinition> {
        let previous = self.store.get_playbook(id).await?;

        let now = Utc::now();
        let mut next = previous.clone();
        next.id = Uuid::new_v4();
        next.version = previous.version + 1;
        next.status = PlaybookStatus::Draft;
        next.created_at = now;
        next.updated_at = now;
        if let Some(steps) = steps {
            next.steps = steps;
        }
        validate_playbook(&next)?;
        self.insert_playbook_with_steps(&next).await?;

        info!(previous = %id, playbook_id = %next.id, version = next.version, "Playbook version created");
        self.record(
            AuditEvent::new(
                &next.org_id,
                AuditSubject::playbook(next.id),
                AuditAction::Created,
                actor,
                format!("Playbook '{}' version {} created", next.name, next.version),
            )
            .within(previous.id)
            .with_payload(json!({ "previous_id": previous.id, "version": next.version })),
        )
        .await?;
        Ok(next)
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    #[instrument(skip(self, scenario), fields(scenario = %scenario.name))]
    pub async fn create_scenario(&self, mut scenario: Scenario, actor: &str) -> Result<Scenario> {
        let playbook = self.store.get_playbook(scenario.playbook_id).await?;
        if playbook.org_id != scenario.org_id {
            return Err(OrchestratorError::invalid_request(format!(
                "Playbook {} belongs to another organization",
                playbook.id
            )));
        }

        let now = Utc::now();
        scenario.run_count = 0;
        scenario.active_run_ids.clear();
        scenario.created_at = now;
        scenario.updated_at = now;
        self.store.insert_scenario(&scenario).await?;

        self.record(
            AuditEvent::new(
                &scenario.org_id,
                AuditSubject::scenario(scenario.id),
                AuditAction::Created,
                actor,
                format!("Scenario '{}' created", scenario.name),
            )
            .within(playbook.id),
        )
        .await?;
        Ok(scenario)
    }

    pub async fn get_scenario(&self, id: Uuid) -> Result<Scenario> {
        Ok(self.store.get_scenario(id).await?)
    }

    pub async fn list_scenarios(&self, org_id: &str) -> Result<Vec<Scenario>> {
        Ok(self.store.list_scenarios(org_id).await?)
    }

    pub async fn mark_scenario_ready(&self, id: Uuid, actor: &str) -> Result<Scenario> {
        self.set_scenario_status(id, ScenarioStatus::Ready, actor).await
    }

    /// Manual status change; refused while a run is in flight
    #[instrument(skip(self))]
    pub async fn set_scenario_status(
        &self,
        id: Uuid,
        status: ScenarioStatus,
        actor: &str,
    ) -> Result<Scenario> {
        let mut scenario = self.store.get_scenario(id).await?;
        if scenario.has_active_run() {
            return Err(OrchestratorError::ScenarioLocked {
                scenario_id: id,
                status: scenario.status,
            });
        }

        let previous = scenario.status;
        scenario.status = status;
        scenario.updated_at = Utc::now();
        self.store.update_scenario(&scenario).await?;

        self.record(
            AuditEvent::new(
                &scenario.org_id,
                AuditSubject::scenario(id),
                AuditAction::Updated,
                actor,
                format!("Scenario '{}' status changed", scenario.name),
            )
            .with_payload(json!({ "from": previous, "to": status })),
        )
        .await?;
        Ok(scenario)
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    fn run_event(run: &ScenarioRun, action: AuditAction, actor: &str, summary: String) -> AuditEvent {
        let mut event = AuditEvent::new(&run.org_id, AuditSubject::run(run.id), action, actor, summary)
            .within(run.scenario_id);
        if let Some(suite_run_id) = run.suite_run_id {
            event = event.within(suite_run_id);
        }
        event
    }

    /// Action recorded after a transition that may have ended the run
    fn settled_action(run: &ScenarioRun, otherwise: AuditAction) -> AuditAction {
        match run.status {
            RunStatus::Completed => AuditAction::Completed,
            RunStatus::Failed => AuditAction::Failed,
            _ => otherwise,
        }
    }

    /// Store the run and release the scenario once it is terminal
    async fn persist_run(&self, run: &ScenarioRun) -> Result<()> {
        self.store.update_run(run).await?;
        if run.is_terminal() {
            self.store
                .finish_scenario_run(run.scenario_id, run.id, run.risk_level())
                .await?;
        }
        Ok(())
    }

    async fn begin_run(
        &self,
        scenario_id: Uuid,
        suite_run_id: Option<Uuid>,
        actor: &str,
    ) -> Result<ScenarioRun> {
        let scenario = self.store.get_scenario(scenario_id).await?;
        let playbook = self.store.get_playbook(scenario.playbook_id).await?;
        if !playbook.is_active() {
            return Err(OrchestratorError::PlaybookNotActive {
                playbook_id: playbook.id,
            });
        }

        let mut run = run_machine::start(&playbook, &scenario)?;
        run.suite_run_id = suite_run_id;

        match self
            .store
            .begin_scenario_run(scenario_id, run.id, self.policy.allow_concurrent_runs)
            .await
        {
            Ok(_) => {}
            Err(StoreError::Conflict(_)) => {
                let active = self.store.get_scenario(scenario_id).await?.latest_active_run();
                return Err(OrchestratorError::ScenarioBusy {
                    scenario_id,
                    run_id: active.unwrap_or_default(),
                });
            }
            Err(err) => return Err(err.into()),
        }

        if let Err(err) = self.store.insert_run(&run).await {
            warn!(run_id = %run.id, error = %err, "Run insert failed, releasing scenario");
            self.store
                .finish_scenario_run(scenario_id, run.id, scenario.current_risk)
                .await?;
            return Err(err.into());
        }
        if run.is_terminal() {
            self.store
                .finish_scenario_run(scenario_id, run.id, run.risk_level())
                .await?;
        }

        self.record(
            Self::run_event(
                &run,
                AuditAction::Started,
                actor,
                format!("Run of scenario '{}' started", scenario.name),
            )
            .with_payload(json!({
                "playbook_id": playbook.id,
                "playbook_version": playbook.version,
                "total_steps": run.total_steps,
                "status": run.status,
            })),
        )
        .await?;
        Ok(run)
    }

    /// Start a run of `scenario_id`; its steps are seeded but not executed
    #[instrument(skip(self))]
    pub async fn start_run(&self, scenario_id: Uuid, actor: &str) -> Result<ScenarioRun> {
        self.begin_run(scenario_id, None, actor).await
    }

    async fn load_execution(&self, run: &ScenarioRun) -> Result<(PlaybookDefinition, Scenario)> {
        let playbook = self.store.get_playbook(run.playbook_id).await?;
        let scenario = self.store.get_scenario(run.scenario_id).await?;
        Ok((playbook, scenario))
    }

    /// Execute the run's current step
    #[instrument(skip(self))]
    pub async fn execute_run_step(&self, run_id: Uuid, actor: &str) -> Result<ScenarioRun> {
        let mut run = self.store.get_run(run_id).await?;
        let (playbook, scenario) = self.load_execution(&run).await?;

        let ctx = ExecutionContext {
            playbook: &playbook,
            parameters: &scenario.parameters,
            executor: self.executor.as_ref(),
            limits: &self.policy.limits,
        };
        let report = run_machine::execute_current(&mut run, &ctx).await?;
        self.persist_run(&run).await?;

        self.record(
            Self::run_event(
                &run,
                Self::settled_action(&run, AuditAction::StepExecuted),
                actor,
                format!("Step '{}' {}", report.step_key, report.status),
            )
            .with_payload(json!({
                "step_key": report.step_key,
                "step_status": report.status,
                "attempts": report.attempts,
                "run_status": run.status,
            })),
        )
        .await?;
        Ok(run)
    }

    /// Execute steps until the run ends or blocks
    #[instrument(skip(self))]
    pub async fn drive_run(&self, run_id: Uuid, actor: &str) -> Result<ScenarioRun> {
        let mut run = self.store.get_run(run_id).await?;
        let (playbook, scenario) = self.load_execution(&run).await?;

        let ctx = ExecutionContext {
            playbook: &playbook,
            parameters: &scenario.parameters,
            executor: self.executor.as_ref(),
            limits: &self.policy.limits,
        };
        let handled = run_machine::drive(&mut run, &ctx).await?;
        if handled == 0 {
            return Ok(run);
        }
        self.persist_run(&run).await?;

        self.record(
            Self::run_event(
                &run,
                Self::settled_action(&run, AuditAction::StepExecuted),
                actor,
                format!("{} step(s) executed", handled),
            )
            .with_payload(json!({
                "steps_handled": handled,
                "current_step_index": run.current_step_index,
                "run_status": run.status,
            })),
        )
        .await?;
        Ok(run)
    }

    #[instrument(skip(self))]
    pub async fn pause_run(&self, run_id: Uuid, actor: &str) -> Result<ScenarioRun> {
        let mut run = self.store.get_run(run_id).await?;
        run_machine::pause(&mut run)?;
        self.persist_run(&run).await?;

        self.record(Self::run_event(
            &run,
            AuditAction::Paused,
            actor,
            format!("Run paused at step {}", run.current_step_index),
        ))
        .await?;
        Ok(run)
    }

    #[instrument(skip(self))]
    pub async fn resume_run(&self, run_id: Uuid, actor: &str) -> Result<ScenarioRun> {
        let mut run = self.store.get_run(run_id).await?;
        run_machine::resume(&mut run)?;
        self.persist_run(&run).await?;

        self.record(Self::run_event(&run, AuditAction::Resumed, actor, "Run resumed".to_string()))
            .await?;
        Ok(run)
    }

    #[instrument(skip(self))]
    pub async fn cancel_run(&self, run_id: Uuid, reason: &str, actor: &str) -> Result<ScenarioRun> {
        let mut run = self.store.get_run(run_id).await?;
        run_machine::cancel(&mut run, reason)?;
        self.persist_run(&run).await?;

        self.record(
            Self::run_event(&run, AuditAction::Cancelled, actor, "Run cancelled".to_string())
                .with_payload(json!({ "reason": reason })),
        )
        .await?;
        Ok(run)
    }

    #[instrument(skip(self, notes))]
    pub async fn approve_step(
        &self,
        run_id: Uuid,
        step_key: &str,
        actor: &str,
        notes: Option<String>,
    ) -> Result<ScenarioRun> {
        let mut run = self.store.get_run(run_id).await?;
        run_machine::approve(&mut run, step_key, actor, notes.clone())?;
        self.persist_run(&run).await?;

        self.record(
            Self::run_event(&run, AuditAction::Approved, actor, format!("Step '{}' approved", step_key))
                .with_payload(json!({ "step_key": step_key, "notes": notes })),
        )
        .await?;
        Ok(run)
    }

    #[instrument(skip(self, notes))]
    pub async fn reject_step(
        &self,
        run_id: Uuid,
        step_key: &str,
        actor: &str,
        notes: &str,
    ) -> Result<ScenarioRun> {
        let mut run = self.store.get_run(run_id).await?;
        let playbook = self.store.get_playbook(run.playbook_id).await?;
        run_machine::reject(&mut run, &playbook, step_key, actor, notes)?;
        self.persist_run(&run).await?;

        self.record(
            Self::run_event(
                &run,
                Self::settled_action(&run, AuditAction::Rejected),
                actor,
                format!("Step '{}' rejected", step_key),
            )
            .with_payload(json!({ "step_key": step_key, "notes": notes, "run_status": run.status })),
        )
        .await?;
        Ok(run)
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<ScenarioRun> {
        Ok(self.store.get_run(run_id).await?)
    }

    pub async fn list_runs(&self, scenario_id: Uuid) -> Result<Vec<ScenarioRun>> {
        Ok(self.store.list_runs(scenario_id).await?)
    }

    // ------------------------------------------------------------------
    // Suites
    // ------------------------------------------------------------------

    async fn ensure_scenario_in_org(&self, scenario_id: Uuid, org_id: &str) -> Result<()> {
        let scenario = self.store.get_scenario(scenario_id).await?;
        if scenario.org_id != org_id {
            return Err(OrchestratorError::invalid_request(format!(
                "Scenario {} belongs to another organization",
                scenario_id
            )));
        }
        Ok(())
    }

    /// Reject structural edits while a suite run is in flight
    async fn ensure_suite_unlocked(&self, suite_id: Uuid) -> Result<()> {
        let runs = self.store.list_suite_runs(suite_id).await?;
        if runs.iter().any(|r| !r.is_terminal()) {
            return Err(OrchestratorError::Locked {
                kind: EntityKind::Suite,
                id: suite_id,
            });
        }
        Ok(())
    }

    fn ensure_suite_editable(suite: &ScenarioSuite) -> Result<()> {
        if suite.status == SuiteStatus::Archived {
            return Err(OrchestratorError::invalid_request(format!(
                "Suite {} is archived",
                suite.id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, suite), fields(suite = %suite.name))]
    pub async fn create_suite(&self, mut suite: ScenarioSuite, actor: &str) -> Result<ScenarioSuite> {
        suite.items.sort_by_key(|i| i.position);
        suite.validate()?;
        for item in &suite.items {
            self.ensure_scenario_in_org(item.scenario_id, &suite.org_id).await?;
        }

        let now = Utc::now();
        suite.status = suite.configured_status();
        suite.run_count = 0;
        suite.created_at = now;
        suite.updated_at = now;
        self.store.insert_suite(&suite).await?;

        info!(suite_id = %suite.id, items = suite.items.len(), "Suite created");
        self.record(
            AuditEvent::new(
                &suite.org_id,
                AuditSubject::suite(suite.id),
                AuditAction::Created,
                actor,
                format!("Suite '{}' created", suite.name),
            )
            .with_payload(json!({ "items": suite.items.len() })),
        )
        .await?;
        Ok(suite)
    }

    pub async fn get_suite(&self, id: Uuid) -> Result<ScenarioSuite> {
        Ok(self.store.get_suite(id).await?)
    }

    pub async fn list_suites(&self, org_id: &str) -> Result<Vec<ScenarioSuite>> {
        Ok(self.store.list_suites(org_id).await?)
    }

    #[instrument(skip(self))]
    pub async fn archive_suite(&self, id: Uuid, actor: &str) -> Result<ScenarioSuite> {
        let mut suite = self.store.get_suite(id).await?;
        self.ensure_suite_unlocked(id).await?;

        suite.status = SuiteStatus::Archived;
        suite.updated_at = Utc::now();
        self.store.update_suite(&suite).await?;

        self.record(AuditEvent::new(
            &suite.org_id,
            AuditSubject::suite(id),
            AuditAction::Archived,
            actor,
            format!("Suite '{}' archived", suite.name),
        ))
        .await?;
        Ok(suite)
    }

    async fn save_edited_suite(
        &self,
        suite: &mut ScenarioSuite,
        action: AuditAction,
        item: &SuiteItem,
        actor: &str,
    ) -> Result<()> {
        suite.repack_positions();
        suite.validate()?;
        suite.status = suite.configured_status();
        suite.updated_at = Utc::now();
        self.store.update_suite(suite).await?;

        self.record(
            AuditEvent::new(
                &suite.org_id,
                AuditSubject::suite(suite.id),
                action,
                actor,
                format!("Suite item '{}' {}", item.name, match action {
                    AuditAction::ItemAdded => "added",
                    AuditAction::ItemRemoved => "removed",
                    _ => "updated",
                }),
            )
            .with_payload(json!({ "item_id": item.id, "position": item.position })),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, item), fields(item = %item.name))]
    pub async fn add_suite_item(
        &self,
        suite_id: Uuid,
        item: NewSuiteItem,
        actor: &str,
    ) -> Result<ScenarioSuite> {
        let mut suite = self.store.get_suite(suite_id).await?;
        Self::ensure_suite_editable(&suite)?;
        self.ensure_suite_unlocked(suite_id).await?;
        item.trigger.validate().map_err(|e| e.owned_by(item.name.clone()))?;
        self.ensure_scenario_in_org(item.scenario_id, &suite.org_id).await?;

        let position = item.position.unwrap_or(suite.items.len()).min(suite.items.len());
        let added = SuiteItem::new(item.scenario_id, item.name, position, item.trigger);
        suite.items.insert(position, added.clone());

        self.save_edited_suite(&mut suite, AuditAction::ItemAdded, &added, actor)
            .await?;
        Ok(suite)
    }

    #[instrument(skip(self, update))]
    pub async fn update_suite_item(
        &self,
        suite_id: Uuid,
        item_id: Uuid,
        update: SuiteItemUpdate,
        actor: &str,
    ) -> Result<ScenarioSuite> {
        let mut suite = self.store.get_suite(suite_id).await?;
        Self::ensure_suite_editable(&suite)?;
        self.ensure_suite_unlocked(suite_id).await?;

        let index = suite
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or(OrchestratorError::NotFound {
                kind: "suite item",
                id: item_id,
            })?;

        let mut item = suite.items.remove(index);
        if let Some(name) = update.name {
            item.name = name;
        }
        if let Some(trigger) = update.trigger {
            trigger.validate().map_err(|e| e.owned_by(item.name.clone()))?;
            item.trigger = trigger;
        }
        let position = update.position.unwrap_or(index).min(suite.items.len());
        item.position = position;
        suite.items.insert(position, item.clone());

        self.save_edited_suite(&mut suite, AuditAction::ItemUpdated, &item, actor)
            .await?;
        Ok(suite)
    }

    #[instrument(skip(self))]
    pub async fn remove_suite_item(
        &self,
        suite_id: Uuid,
        item_id: Uuid,
        actor: &str,
    ) -> Result<ScenarioSuite> {
        let mut suite = self.store.get_suite(suite_id).await?;
        Self::ensure_suite_editable(&suite)?;
        self.ensure_suite_unlocked(suite_id).await?;

        let index = suite
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or(OrchestratorError::NotFound {
                kind: "suite item",
                id: item_id,
            })?;
        let removed = suite.items.remove(index);

        self.save_edited_suite(&mut suite, AuditAction::ItemRemoved, &removed, actor)
            .await?;
        Ok(suite)
    }

    // ------------------------------------------------------------------
    // Suite runs
    // ------------------------------------------------------------------

    fn suite_run_event(
        suite_run: &SuiteRun,
        action: AuditAction,
        actor: &str,
        summary: String,
    ) -> AuditEvent {
        AuditEvent::new(
            &suite_run.org_id,
            AuditSubject::suite_run(suite_run.id),
            action,
            actor,
            summary,
        )
        .within(suite_run.suite_id)
    }

    fn suite_settled_action(suite_run: &SuiteRun, otherwise: AuditAction) -> AuditAction {
        match suite_run.status {
            SuiteRunStatus::Completed => AuditAction::Completed,
            SuiteRunStatus::Failed => AuditAction::Failed,
            _ => otherwise,
        }
    }

    /// Bookkeeping once a suite run is terminal: mark the suite and
    /// synthesize the artifacts its options ask for. Synthesis failures
    /// are logged, not returned; the artifacts can be regenerated.
    async fn conclude_suite_run(&self, suite_run: &mut SuiteRun) -> Result<()> {
        let mut suite = self.store.get_suite(suite_run.suite_id).await?;
        if suite.status == SuiteStatus::Running {
            suite.status = SuiteStatus::Completed;
            suite.updated_at = Utc::now();
            self.store.update_suite(&suite).await?;
        }

        let options = &suite.options;
        if options.generate_narrative {
            let request = NarrativeRequest {
                verbosity: options.narrative_verbosity,
                include_recommendations: true,
            };
            if let Err(err) =
                aggregator::generate_narrative(suite_run, &suite.name, &request, self.synthesizer.as_ref()).await
            {
                warn!(suite_run_id = %suite_run.id, error = %err, "Narrative generation failed");
            }
        }
        if options.generate_risk_map {
            let request = RiskMapRequest {
                include_opportunities: options.include_opportunities,
            };
            if let Err(err) =
                aggregator::generate_risk_map(suite_run, &suite.name, &request, self.synthesizer.as_ref()).await
            {
                warn!(suite_run_id = %suite_run.id, error = %err, "Risk map generation failed");
            }
        }
        Ok(())
    }

    /// Start a run of the suite; at most one suite run is live per suite
    #[instrument(skip(self))]
    pub async fn start_suite_run(&self, suite_id: Uuid, actor: &str) -> Result<SuiteRun> {
        let mut suite = self.store.get_suite(suite_id).await?;
        Self::ensure_suite_editable(&suite)?;
        self.ensure_suite_unlocked(suite_id).await?;

        let mut suite_run = suite_runner::start(&suite)?;
        let run_number = self.store.increment_suite_run_count(suite_id).await?;
        suite = self.store.get_suite(suite_id).await?;
        suite.status = SuiteStatus::Running;
        suite.updated_at = Utc::now();
        self.store.update_suite(&suite).await?;
        self.store.insert_suite_run(&suite_run).await?;

        if suite_run.is_terminal() {
            self.conclude_suite_run(&mut suite_run).await?;
            self.store.update_suite_run(&suite_run).await?;
        }

        self.record(
            Self::suite_run_event(
                &suite_run,
                AuditAction::Started,
                actor,
                format!("Suite '{}' run #{} started", suite.name, run_number),
            )
            .with_payload(json!({ "total_items": suite_run.total_items, "status": suite_run.status })),
        )
        .await?;
        Ok(suite_run)
    }

    /// Handle the current item of a suite run
    #[instrument(skip(self))]
    pub async fn advance_suite_run(
        &self,
        suite_run_id: Uuid,
        skip_current: bool,
        actor: &str,
    ) -> Result<SuiteRun> {
        let mut suite_run = self.store.get_suite_run(suite_run_id).await?;
        let suite = self.store.get_suite(suite_run.suite_id).await?;

        let report = suite_runner::advance(&mut suite_run, &suite, self, skip_current, actor).await?;
        if suite_run.is_terminal() {
            self.conclude_suite_run(&mut suite_run).await?;
        }
        self.store.update_suite_run(&suite_run).await?;

        self.record(
            Self::suite_run_event(
                &suite_run,
                Self::suite_settled_action(&suite_run, AuditAction::Advanced),
                actor,
                format!("Item '{}' {}", report.item_name, report.item_status),
            )
            .with_payload(serde_json::to_value(&report).unwrap_or_default()),
        )
        .await?;
        Ok(suite_run)
    }

    #[instrument(skip(self))]
    pub async fn pause_suite_run(&self, suite_run_id: Uuid, actor: &str) -> Result<SuiteRun> {
        let mut suite_run = self.store.get_suite_run(suite_run_id).await?;
        suite_runner::pause(&mut suite_run)?;
        self.store.update_suite_run(&suite_run).await?;

        self.record(Self::suite_run_event(
            &suite_run,
            AuditAction::Paused,
            actor,
            format!("Suite run paused at item {}", suite_run.current_item_index),
        ))
        .await?;
        Ok(suite_run)
    }

    #[instrument(skip(self))]
    pub async fn resume_suite_run(&self, suite_run_id: Uuid, actor: &str) -> Result<SuiteRun> {
        let mut suite_run = self.store.get_suite_run(suite_run_id).await?;
        suite_runner::resume(&mut suite_run)?;
        self.store.update_suite_run(&suite_run).await?;

        self.record(Self::suite_run_event(
            &suite_run,
            AuditAction::Resumed,
            actor,
            "Suite run resumed".to_string(),
        ))
        .await?;
        Ok(suite_run)
    }

    #[instrument(skip(self))]
    pub async fn abort_suite_run(&self, suite_run_id: Uuid, reason: &str, actor: &str) -> Result<SuiteRun> {
        let mut suite_run = self.store.get_suite_run(suite_run_id).await?;
        suite_runner::abort(&mut suite_run, self, reason, actor).await?;
        self.conclude_suite_run(&mut suite_run).await?;
        self.store.update_suite_run(&suite_run).await?;

        self.record(
            Self::suite_run_event(&suite_run, AuditAction::Aborted, actor, "Suite run aborted".to_string())
                .with_payload(json!({ "reason": reason })),
        )
        .await?;
        Ok(suite_run)
    }

    pub async fn get_suite_run(&self, suite_run_id: Uuid) -> Result<SuiteRun> {
        Ok(self.store.get_suite_run(suite_run_id).await?)
    }

    pub async fn list_suite_runs(&self, suite_id: Uuid) -> Result<Vec<SuiteRun>> {
        Ok(self.store.list_suite_runs(suite_id).await?)
    }

    pub async fn list_suite_run_items(&self, suite_run_id: Uuid) -> Result<Vec<SuiteRunItem>> {
        Ok(self.store.get_suite_run(suite_run_id).await?.items)
    }

    /// (Re)generate the narrative of a terminal suite run
    #[instrument(skip(self, request))]
    pub async fn generate_narrative(
        &self,
        suite_run_id: Uuid,
        request: NarrativeRequest,
        actor: &str,
    ) -> Result<SuiteRun> {
        let mut suite_run = self.store.get_suite_run(suite_run_id).await?;
        let suite = self.store.get_suite(suite_run.suite_id).await?;

        aggregator::generate_narrative(&mut suite_run, &suite.name, &request, self.synthesizer.as_ref())
            .await?;
        self.store.update_suite_run(&suite_run).await?;

        self.record(
            Self::suite_run_event(
                &suite_run,
                AuditAction::NarrativeGenerated,
                actor,
                "Narrative generated".to_string(),
            )
            .with_payload(json!({
                "verbosity": request.verbosity,
                "include_recommendations": request.include_recommendations,
            })),
        )
        .await?;
        Ok(suite_run)
    }

    /// (Re)generate the risk map of a terminal suite run
    #[instrument(skip(self, request))]
    pub async fn generate_risk_map(
        &self,
        suite_run_id: Uuid,
        request: RiskMapRequest,
        actor: &str,
    ) -> Result<SuiteRun> {
        let mut suite_run = self.store.get_suite_run(suite_run_id).await?;
        let suite = self.store.get_suite(suite_run.suite_id).await?;

        aggregator::generate_risk_map(&mut suite_run, &suite.name, &request, self.synthesizer.as_ref())
            .await?;
        self.store.update_suite_run(&suite_run).await?;

        self.record(
            Self::suite_run_event(
                &suite_run,
                AuditAction::RiskMapGenerated,
                actor,
                "Risk map generated".to_string(),
            )
            .with_payload(json!({ "include_opportunities": request.include_opportunities })),
        )
        .await?;
        Ok(suite_run)
    }

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    /// Events about `subject_id`, including those of runs inside a suite run
    pub async fn list_audit_events(&self, subject_id: Uuid) -> Result<Vec<AuditEvent>> {
        self.audit
            .list_for(subject_id)
            .await
            .map_err(OrchestratorError::Audit)
    }
}

#[async_trait]
impl ScenarioDriver for Orchestrator {
    async fn launch(&self, scenario_id: Uuid, suite_run_id: Uuid, actor: &str) -> Result<ScenarioRun> {
        let run = self.begin_run(scenario_id, Some(suite_run_id), actor).await?;
        if run.is_terminal() {
            return Ok(run);
        }
        self.drive_run(run.id, actor).await
    }

    async fn continue_run(&self, run_id: Uuid, actor: &str) -> Result<ScenarioRun> {
        self.drive_run(run_id, actor).await
    }

    async fn cancel(&self, run_id: Uuid, reason: &str, actor: &str) -> Result<ScenarioRun> {
        let run = self.store.get_run(run_id).await?;
        if run.is_terminal() {
            return Ok(run);
        }
        self.cancel_run(run_id, reason, actor).await
    }
}
