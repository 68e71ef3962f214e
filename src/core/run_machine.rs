//! Scenario run state machine.
//!
//! Run transitions:
//! - running -> paused | cancelled | completed | failed
//! - paused -> running | cancelled
//! - completed, failed, cancelled are terminal
//!
//! Every function takes the run by `&mut` and mutates nothing else;
//! persisting the result is the caller's job.

use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::adapters::{ActionExecutor, ActionRequest};
use crate::domain::{
    ApprovalDecision, ApprovalRecord, RunStatus, RunStep, RunStepStatus, Scenario, ScenarioRun,
    StepOutcome,
};
use crate::error::{OrchestratorError, Result};

use super::graph::{resolve_index, validate_playbook};
use super::limits::{ExecutionLimits, LimitViolation};
use super::playbook::{PlaybookDefinition, StepConfig, StepDefinition};

/// Collaborators and inputs needed to execute steps of one run
pub struct ExecutionContext<'a> {
    pub playbook: &'a PlaybookDefinition,
    pub parameters: &'a Map<String, Value>,
    pub executor: &'a dyn ActionExecutor,
    pub limits: &'a ExecutionLimits,
}

/// What happened to the step handled by `execute_current`
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step_key: String,
    pub status: RunStepStatus,
    pub attempts: u32,
    pub run_status: RunStatus,
}

fn seed_status(step: &StepDefinition) -> RunStepStatus {
    if step.requires_approval {
        RunStepStatus::AwaitingApproval
    } else {
        RunStepStatus::Ready
    }
}

/// Materialize a new run of `scenario` from `playbook`.
///
/// The playbook is validated first. One RunStep is created per step
/// definition in position order, each seeded `ready` or
/// `awaiting_approval`. A playbook without steps yields a run that is
/// already completed.
pub fn start(playbook: &PlaybookDefinition, scenario: &Scenario) -> Result<ScenarioRun> {
    if !playbook.steps.is_empty() {
        validate_playbook(playbook)?;
    }

    let now = Utc::now();
    let steps: Vec<RunStep> = playbook
        .steps
        .iter()
        .enumerate()
        .map(|(index, def)| {
            let mut step = RunStep::pending(def.key.clone(), index);
            step.status = seed_status(def);
            step
        })
        .collect();

    let mut run = ScenarioRun {
        id: uuid::Uuid::new_v4(),
        org_id: scenario.org_id.clone(),
        scenario_id: scenario.id,
        playbook_id: playbook.id,
        suite_run_id: None,
        playbook_version: playbook.version,
        playbook_revision: playbook.updated_at,
        status: RunStatus::Running,
        current_step_index: 0,
        total_steps: steps.len(),
        risk_score: 0.0,
        opportunity_score: 0.0,
        steps,
        started_at: now,
        completed_at: None,
        paused_at: None,
        cancelled_at: None,
        cancel_reason: None,
        error: None,
    };

    if run.total_steps == 0 {
        warn!(run_id = %run.id, "Playbook has no steps, completing run immediately");
        complete(&mut run);
    }

    info!(run_id = %run.id, steps = run.total_steps, "Run started");
    Ok(run)
}

fn ensure_status(run: &ScenarioRun, allowed: &[RunStatus], operation: &'static str) -> Result<()> {
    if allowed.contains(&run.status) {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidRunState {
            run_id: run.id,
            status: run.status,
            operation,
        })
    }
}

fn step_position(run: &ScenarioRun, step_key: &str) -> Result<usize> {
    run.steps
        .iter()
        .position(|s| s.step_key == step_key)
        .ok_or_else(|| OrchestratorError::UnknownStep {
            run_id: run.id,
            step_key: step_key.to_string(),
        })
}

fn complete(run: &mut ScenarioRun) {
    run.status = RunStatus::Completed;
    run.current_step_index = run.total_steps;
    run.completed_at = Some(Utc::now());
}

fn fail(run: &mut ScenarioRun, index: usize, message: String) {
    let now = Utc::now();
    if let Some(step) = run.steps.get_mut(index) {
        step.status = RunStepStatus::Failed;
        step.error = Some(message.clone());
        step.completed_at = Some(now);
        run.error = Some(format!("Step '{}' failed: {}", step.step_key, message));
    } else {
        run.error = Some(message);
    }
    run.status = RunStatus::Failed;
    run.completed_at = Some(now);
}

/// Move past the step at `from`.
///
/// A strictly forward `target` skips the steps in between; anything else
/// continues linearly. Steps already skipped (rejected ahead of time) are
/// passed over.
fn advance(run: &mut ScenarioRun, playbook: &PlaybookDefinition, from: usize, target: Option<&str>) {
    let mut next = from + 1;

    if let Some(key) = target {
        match resolve_index(&playbook.steps, key) {
            Some(index) if index > from => {
                for step in run.steps.iter_mut().skip(from + 1).take(index - from - 1) {
                    if step.status.is_unstarted() {
                        step.status = RunStepStatus::Skipped;
                    }
                }
                next = index;
            }
            _ => {
                warn!(run_id = %run.id, from, target = key, "Ignoring non-forward jump, continuing linearly");
            }
        }
    }

    while run
        .steps
        .get(next)
        .map(|s| s.status == RunStepStatus::Skipped)
        .unwrap_or(false)
    {
        next += 1;
    }

    if next >= run.total_steps {
        complete(run);
        info!(run_id = %run.id, "Run completed");
    } else {
        run.current_step_index = next;
        debug!(run_id = %run.id, step_index = next, "Advanced to next step");
    }
}

/// Continuation chosen by a finished step
fn continuation<'a>(def: &'a StepDefinition, outcome: &StepOutcome) -> Option<&'a str> {
    if let StepConfig::Branch(branch) = &def.config {
        if let Some(condition) = branch
            .conditions
            .iter()
            .find(|c| c.when.matches(&outcome.payload, outcome.risk_score))
        {
            return Some(condition.next_step_key.as_str());
        }
    }
    def.next_step_key.as_deref()
}

fn fold_scores(run: &mut ScenarioRun, outcome: &StepOutcome) {
    if let Some(risk) = outcome.risk_score {
        run.risk_score = run.risk_score.max(risk.clamp(0.0, 1.0));
    }

    let scores: Vec<f64> = run
        .steps
        .iter()
        .filter_map(|s| s.outcome.as_ref())
        .filter_map(|o| o.opportunity_score)
        .collect();
    if !scores.is_empty() {
        run.opportunity_score = scores.iter().sum::<f64>() / scores.len() as f64;
    }
}

fn prior_outputs(run: &ScenarioRun) -> Map<String, Value> {
    run.steps
        .iter()
        .filter(|s| s.status == RunStepStatus::Completed)
        .filter_map(|s| s.outcome.as_ref().map(|o| (s.step_key.clone(), o.payload.clone())))
        .collect()
}

/// Execute the step at `current_step_index`.
///
/// The step must be `ready`, or `running` after approval. Execution
/// failures are recorded on the step and the run; only state errors are
/// returned as `Err`.
pub async fn execute_current(run: &mut ScenarioRun, ctx: &ExecutionContext<'_>) -> Result<StepReport> {
    ensure_status(run, &[RunStatus::Running], "executed")?;

    let index = run.current_step_index;
    let (step_key, status) = match run.steps.get(index) {
        Some(step) => (step.step_key.clone(), step.status),
        None => {
            return Err(OrchestratorError::invalid_request(format!(
                "Run {} has no current step",
                run.id
            )))
        }
    };
    if !matches!(status, RunStepStatus::Ready | RunStepStatus::Running) {
        return Err(OrchestratorError::InvalidStepState {
            step_key,
            status,
            operation: "executed",
        });
    }
    let def = ctx
        .playbook
        .get_step(&step_key)
        .ok_or_else(|| OrchestratorError::UnknownStep {
            run_id: run.id,
            step_key: step_key.clone(),
        })?;

    if let Err(violation) = ctx.limits.check_steps(run.steps_executed()) {
        error!(run_id = %run.id, step = %step_key, %violation, "Execution limit reached");
        fail(run, index, violation.to_string());
        return Ok(report(run, index));
    }

    let timeout = def.timeout(ctx.limits.step_timeout_seconds);
    let prior = prior_outputs(run);

    loop {
        let attempt = {
            let step = &mut run.steps[index];
            step.attempts += 1;
            step.status = RunStepStatus::Running;
            step.started_at.get_or_insert_with(Utc::now);
            step.context = json!({
                "attempt": step.attempts,
                "timeout_seconds": timeout.as_secs(),
                "prior_outputs": prior.keys().collect::<Vec<_>>(),
            });
            step.attempts
        };

        let request = ActionRequest {
            run_id: run.id,
            scenario_id: run.scenario_id,
            step_key: step_key.clone(),
            step_name: def.name.clone(),
            config: def.config.clone(),
            parameters: ctx.parameters.clone(),
            prior_outputs: prior.clone(),
            attempt,
        };

        debug!(run_id = %run.id, step = %step_key, attempt, executor = ctx.executor.name(), "Executing step");
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, ctx.executor.execute(&request, timeout)).await {
            Ok(Ok(outcome)) => ctx
                .limits
                .check_payload(&outcome.payload)
                .map(|_| outcome)
                .map_err(anyhow::Error::from),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LimitViolation::StepTimeout {
                seconds: timeout.as_secs(),
            }
            .into()),
        };

        match result {
            Ok(mut outcome) => {
                if outcome.duration_ms == 0 {
                    outcome.duration_ms = started.elapsed().as_millis() as u64;
                }
                let target = continuation(def, &outcome).map(str::to_string);

                let step = &mut run.steps[index];
                step.status = RunStepStatus::Completed;
                step.error = None;
                step.completed_at = Some(Utc::now());
                step.outcome = Some(outcome.clone());

                fold_scores(run, &outcome);
                info!(run_id = %run.id, step = %step_key, attempt, "Step completed");

                advance(run, ctx.playbook, index, target.as_deref());
                return Ok(report(run, index));
            }
            Err(e) => {
                if let Some(policy) = def.retry.as_ref().filter(|p| p.should_retry(attempt)) {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        run_id = %run.id,
                        step = %step_key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Step failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }

                error!(run_id = %run.id, step = %step_key, attempt, error = %e, "Step failed permanently");
                fail(run, index, e.to_string());
                return Ok(report(run, index));
            }
        }
    }
}

fn report(run: &ScenarioRun, index: usize) -> StepReport {
    let step = &run.steps[index];
    StepReport {
        step_key: step.step_key.clone(),
        status: step.status,
        attempts: step.attempts,
        run_status: run.status,
    }
}

/// Execute steps until the run is terminal, paused, or blocked on an
/// approval gate. Returns the number of steps handled.
pub async fn drive(run: &mut ScenarioRun, ctx: &ExecutionContext<'_>) -> Result<usize> {
    let mut handled = 0;
    while run.status == RunStatus::Running {
        match run.current_step().map(|s| s.status) {
            Some(RunStepStatus::Ready) | Some(RunStepStatus::Running) => {
                execute_current(run, ctx).await?;
                handled += 1;
            }
            _ => break,
        }
    }
    Ok(handled)
}

/// Decisions are only taken on a running run; a paused run is frozen
/// until `resume`.
fn approvable(run: &ScenarioRun, step_key: &str, operation: &'static str) -> Result<usize> {
    ensure_status(run, &[RunStatus::Running], operation)?;
    let index = step_position(run, step_key)?;
    let status = run.steps[index].status;
    if !status.is_approvable() {
        return Err(OrchestratorError::InvalidStepState {
            step_key: step_key.to_string(),
            status,
            operation,
        });
    }
    Ok(index)
}

/// Approve a `ready` or `awaiting_approval` step; it becomes `running`
/// and executes on the next `execute_current`.
pub fn approve(run: &mut ScenarioRun, step_key: &str, actor: &str, notes: Option<String>) -> Result<()> {
    let index = approvable(run, step_key, "approved")?;

    let step = &mut run.steps[index];
    step.status = RunStepStatus::Running;
    step.approval = Some(ApprovalRecord {
        decision: ApprovalDecision::Approved,
        actor: actor.to_string(),
        decided_at: Utc::now(),
        notes,
    });

    info!(run_id = %run.id, step = step_key, actor, "Step approved");
    Ok(())
}

/// Reject a `ready` or `awaiting_approval` step. The step is skipped and,
/// if it is the current step, the run advances instead of failing.
pub fn reject(
    run: &mut ScenarioRun,
    playbook: &PlaybookDefinition,
    step_key: &str,
    actor: &str,
    notes: &str,
) -> Result<()> {
    if notes.trim().is_empty() {
        return Err(OrchestratorError::invalid_request(
            "Rejection notes are required",
        ));
    }
    let index = approvable(run, step_key, "rejected")?;

    let now = Utc::now();
    let step = &mut run.steps[index];
    step.status = RunStepStatus::Skipped;
    step.completed_at = Some(now);
    step.approval = Some(ApprovalRecord {
        decision: ApprovalDecision::Rejected,
        actor: actor.to_string(),
        decided_at: now,
        notes: Some(notes.to_string()),
    });

    info!(run_id = %run.id, step = step_key, actor, "Step rejected");

    if index == run.current_step_index {
        let target = playbook
            .get_step(step_key)
            .and_then(|d| d.next_step_key.clone());
        advance(run, playbook, index, target.as_deref());
    }
    Ok(())
}

/// Pause a running run; step statuses are left untouched
pub fn pause(run: &mut ScenarioRun) -> Result<()> {
    ensure_status(run, &[RunStatus::Running], "paused")?;
    run.status = RunStatus::Paused;
    run.paused_at = Some(Utc::now());
    info!(run_id = %run.id, step_index = run.current_step_index, "Run paused");
    Ok(())
}

pub fn resume(run: &mut ScenarioRun) -> Result<()> {
    ensure_status(run, &[RunStatus::Paused], "resumed")?;
    run.status = RunStatus::Running;
    run.paused_at = None;
    info!(run_id = %run.id, "Run resumed");
    Ok(())
}

/// Cancel a running or paused run; unstarted steps become `skipped`
pub fn cancel(run: &mut ScenarioRun, reason: impl Into<String>) -> Result<()> {
    ensure_status(run, &[RunStatus::Running, RunStatus::Paused], "cancelled")?;

    let now = Utc::now();
    for step in run.steps.iter_mut().filter(|s| s.status.is_unstarted()) {
        step.status = RunStepStatus::Skipped;
    }
    run.status = RunStatus::Cancelled;
    run.cancel_reason = Some(reason.into());
    run.cancelled_at = Some(now);
    run.completed_at = Some(now);
    run.paused_at = None;

    info!(run_id = %run.id, "Run cancelled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use anyhow::Result as AnyResult;
    use async_trait::async_trait;

    use crate::adapters::SimulatedExecutor;
    use crate::core::playbook::{BranchCondition, BranchConfig, BranchPredicate, RetryPolicy};
    use crate::domain::OutcomeClass;

    fn linear_playbook() -> PlaybookDefinition {
        PlaybookDefinition::new(
            "acme",
            "incident",
            vec![
                StepDefinition::agent_action("assess", 0, "analyst", "assess the breach").then("notify"),
                StepDefinition::agent_action("notify", 1, "comms", "notify customers"),
            ],
        )
    }

    fn scenario_for(playbook: &PlaybookDefinition) -> Scenario {
        Scenario::new("acme", "ransomware drill", playbook.id)
    }

    fn ctx<'a>(
        playbook: &'a PlaybookDefinition,
        scenario: &'a Scenario,
        executor: &'a dyn ActionExecutor,
        limits: &'a ExecutionLimits,
    ) -> ExecutionContext<'a> {
        ExecutionContext {
            playbook,
            parameters: &scenario.parameters,
            executor,
            limits,
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    struct SlowExecutor;

    #[async_trait]
    impl ActionExecutor for SlowExecutor {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(&self, _request: &ActionRequest, _timeout: Duration) -> AnyResult<StepOutcome> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(StepOutcome::default())
        }

        async fn health_check(&self) -> AnyResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_linear_run_end_to_end() {
        let playbook = linear_playbook();
        let scenario = scenario_for(&playbook);
        let executor = SimulatedExecutor::new();
        let limits = ExecutionLimits::default();
        let ctx = ctx(&playbook, &scenario, &executor, &limits);

        let mut run = start(&playbook, &scenario).unwrap();
        assert_eq!(run.steps.len(), 2);
        assert!(run.steps.iter().all(|s| s.status == RunStepStatus::Ready));

        execute_current(&mut run, &ctx).await.unwrap();
        assert_eq!(run.current_step_index, 1);
        assert_eq!(run.status, RunStatus::Running);

        let report = execute_current(&mut run, &ctx).await.unwrap();
        assert_eq!(report.run_status, RunStatus::Completed);
        assert_eq!(run.outcome_class(), Some(OutcomeClass::Success));
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn test_empty_playbook_completes_on_start() {
        let playbook = PlaybookDefinition::new("acme", "legacy", Vec::new());
        let run = start(&playbook, &scenario_for(&playbook)).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.total_steps, 0);
    }

    #[test]
    fn test_start_rejects_invalid_graph() {
        let playbook = PlaybookDefinition::new(
            "acme",
            "broken",
            vec![StepDefinition::agent_action("assess", 0, "analyst", "assess").then("missing")],
        );
        let err = start(&playbook, &scenario_for(&playbook)).unwrap_err();
        assert!(err.is_structural());
    }

    #[tokio::test]
    async fn test_approval_gate_blocks_until_approved() {
        let mut playbook = linear_playbook();
        playbook.steps[1].requires_approval = true;
        let scenario = scenario_for(&playbook);
        let executor = SimulatedExecutor::new();
        let limits = ExecutionLimits::default();
        let ctx = ctx(&playbook, &scenario, &executor, &limits);

        let mut run = start(&playbook, &scenario).unwrap();
        assert_eq!(run.steps[1].status, RunStepStatus::AwaitingApproval);

        assert_eq!(drive(&mut run, &ctx).await.unwrap(), 1);
        assert!(run.is_awaiting_approval());

        let err = execute_current(&mut run, &ctx).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStepState { .. }));

        approve(&mut run, "notify", "alice", Some("go".to_string())).unwrap();
        assert_eq!(run.steps[1].status, RunStepStatus::Running);

        drive(&mut run, &ctx).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.steps[1].approval.as_ref().unwrap().actor, "alice");
    }

    #[tokio::test]
    async fn test_approve_completed_step_is_state_error() {
        let playbook = linear_playbook();
        let scenario = scenario_for(&playbook);
        let executor = SimulatedExecutor::new();
        let limits = ExecutionLimits::default();
        let ctx = ctx(&playbook, &scenario, &executor, &limits);

        let mut run = start(&playbook, &scenario).unwrap();
        execute_current(&mut run, &ctx).await.unwrap();

        let err = approve(&mut run, "assess", "alice", None).unwrap_err();
        match err {
            OrchestratorError::InvalidStepState { status, .. } => {
                assert_eq!(status, RunStepStatus::Completed)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reject_skips_and_advances() {
        let mut playbook = linear_playbook();
        playbook.steps[0].requires_approval = true;
        let scenario = scenario_for(&playbook);

        let mut run = start(&playbook, &scenario).unwrap();
        assert!(reject(&mut run, &playbook, "assess", "bob", "  ").is_err());

        reject(&mut run, &playbook, "assess", "bob", "not needed").unwrap();
        assert_eq!(run.steps[0].status, RunStepStatus::Skipped);
        assert_eq!(run.current_step_index, 1);
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn test_cancel_skips_unstarted_steps() {
        let playbook = linear_playbook();
        let mut run = start(&playbook, &scenario_for(&playbook)).unwrap();
        run.steps[1].status = RunStepStatus::Pending;

        cancel(&mut run, "drill called off").unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.steps.iter().all(|s| s.status == RunStepStatus::Skipped));
        assert_eq!(run.cancel_reason.as_deref(), Some("drill called off"));

        assert!(matches!(
            cancel(&mut run, "again"),
            Err(OrchestratorError::InvalidRunState { .. })
        ));
    }

    #[test]
    fn test_pause_resume() {
        let playbook = linear_playbook();
        let mut run = start(&playbook, &scenario_for(&playbook)).unwrap();

        assert!(resume(&mut run).is_err());
        pause(&mut run).unwrap();
        assert!(run.paused_at.is_some());
        assert!(pause(&mut run).is_err());
        assert_eq!(run.steps[0].status, RunStepStatus::Ready);

        resume(&mut run).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.paused_at.is_none());
    }

    #[test]
    fn test_paused_run_refuses_decisions() {
        let playbook = linear_playbook();
        let mut run = start(&playbook, &scenario_for(&playbook)).unwrap();
        run.current_step_index = run.total_steps - 1;
        pause(&mut run).unwrap();

        let last = run.steps[run.total_steps - 1].step_key.clone();
        assert!(matches!(
            reject(&mut run, &playbook, &last, "lead", "not now"),
            Err(OrchestratorError::InvalidRunState { status: RunStatus::Paused, .. })
        ));
        assert!(matches!(
            approve(&mut run, &last, "lead", None),
            Err(OrchestratorError::InvalidRunState { status: RunStatus::Paused, .. })
        ));
        assert_eq!(run.status, RunStatus::Paused);
        assert!(run.steps[run.total_steps - 1].approval.is_none());
    }

    #[tokio::test]
    async fn test_paused_run_does_not_execute() {
        let playbook = linear_playbook();
        let scenario = scenario_for(&playbook);
        let executor = SimulatedExecutor::new();
        let limits = ExecutionLimits::default();
        let ctx = ctx(&playbook, &scenario, &executor, &limits);

        let mut run = start(&playbook, &scenario).unwrap();
        pause(&mut run).unwrap();
        assert!(execute_current(&mut run, &ctx).await.is_err());
        assert_eq!(drive(&mut run, &ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_without_retry_fails_run() {
        let playbook = linear_playbook();
        let scenario = scenario_for(&playbook)
            .with_parameter("fail_steps", serde_json::json!(["assess"]));
        let executor = SimulatedExecutor::new();
        let limits = ExecutionLimits::default();
        let ctx = ctx(&playbook, &scenario, &executor, &limits);

        let mut run = start(&playbook, &scenario).unwrap();
        let report = execute_current(&mut run, &ctx).await.unwrap();

        assert_eq!(report.status, RunStepStatus::Failed);
        assert_eq!(report.attempts, 1);
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.as_deref().unwrap().contains("assess"));
        assert!(run.steps[0].error.is_some());
    }

    #[tokio::test]
    async fn test_retryable_step_recovers() {
        let mut playbook = linear_playbook();
        playbook.steps[0].retry = Some(fast_retry(3));
        let scenario = scenario_for(&playbook);
        let executor = SimulatedExecutor::new().with_transient_failures("assess", 2);
        let limits = ExecutionLimits::default();
        let ctx = ctx(&playbook, &scenario, &executor, &limits);

        let mut run = start(&playbook, &scenario).unwrap();
        let report = execute_current(&mut run, &ctx).await.unwrap();

        assert_eq!(report.status, RunStepStatus::Completed);
        assert_eq!(report.attempts, 3);
        assert_eq!(run.current_step_index, 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let mut playbook = linear_playbook();
        playbook.steps[0].retry = Some(fast_retry(2));
        let scenario = scenario_for(&playbook);
        let executor = SimulatedExecutor::new().with_transient_failures("assess", 5);
        let limits = ExecutionLimits::default();
        let ctx = ctx(&playbook, &scenario, &executor, &limits);

        let mut run = start(&playbook, &scenario).unwrap();
        let report = execute_current(&mut run, &ctx).await.unwrap();

        assert_eq!(report.attempts, 2);
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_step_timeout_fails_step() {
        let mut playbook = linear_playbook();
        playbook.steps[0].timeout_seconds = Some(0);
        let scenario = scenario_for(&playbook);
        let limits = ExecutionLimits::default();
        let ctx = ctx(&playbook, &scenario, &SlowExecutor, &limits);

        let mut run = start(&playbook, &scenario).unwrap();
        execute_current(&mut run, &ctx).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.steps[0].error.as_deref().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_forward_jump_skips_intermediate_steps() {
        let playbook = PlaybookDefinition::new(
            "acme",
            "triage",
            vec![
                StepDefinition::agent_action("assess", 0, "analyst", "assess").then("close"),
                StepDefinition::agent_action("escalate", 1, "ciso", "escalate"),
                StepDefinition::agent_action("close", 2, "analyst", "close"),
            ],
        );
        let scenario = scenario_for(&playbook);
        let executor = SimulatedExecutor::new();
        let limits = ExecutionLimits::default();
        let ctx = ctx(&playbook, &scenario, &executor, &limits);

        let mut run = start(&playbook, &scenario).unwrap();
        drive(&mut run, &ctx).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.steps[1].status, RunStepStatus::Skipped);
        assert_eq!(run.outcome_class(), Some(OutcomeClass::Partial));
    }

    #[tokio::test]
    async fn test_backward_jump_continues_linearly() {
        let playbook = PlaybookDefinition::new(
            "acme",
            "loop",
            vec![
                StepDefinition::agent_action("assess", 0, "analyst", "assess"),
                StepDefinition::agent_action("review", 1, "analyst", "review").then("assess"),
                StepDefinition::agent_action("close", 2, "analyst", "close"),
            ],
        );
        let scenario = scenario_for(&playbook);
        let executor = SimulatedExecutor::new();
        let limits = ExecutionLimits::default();
        let ctx = ctx(&playbook, &scenario, &executor, &limits);

        let mut run = start(&playbook, &scenario).unwrap();
        assert_eq!(drive(&mut run, &ctx).await.unwrap(), 3);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.steps_executed(), 3);
    }

    #[tokio::test]
    async fn test_branch_selects_first_matching_condition() {
        let branch = StepDefinition {
            key: "route".to_string(),
            name: "Route by risk".to_string(),
            position: 1,
            config: StepConfig::Branch(BranchConfig {
                conditions: vec![
                    BranchCondition {
                        when: BranchPredicate::RiskAtLeast {
                            level: crate::domain::RiskLevel::High,
                        },
                        next_step_key: "escalate".to_string(),
                    },
                    BranchCondition {
                        when: BranchPredicate::Otherwise,
                        next_step_key: "close".to_string(),
                    },
                ],
            }),
            next_step_key: None,
            requires_approval: false,
            retry: None,
            timeout_seconds: None,
        };
        let playbook = PlaybookDefinition::new(
            "acme",
            "triage",
            vec![
                StepDefinition::agent_action("assess", 0, "analyst", "assess"),
                branch,
                StepDefinition::agent_action("escalate", 2, "ciso", "escalate").then("close"),
                StepDefinition::agent_action("close", 3, "analyst", "close"),
            ],
        );
        let executor = SimulatedExecutor::new();
        let limits = ExecutionLimits::default();

        let calm = scenario_for(&playbook).with_parameter("risk_score", serde_json::json!(0.1));
        let mut run = start(&playbook, &calm).unwrap();
        drive(&mut run, &ctx(&playbook, &calm, &executor, &limits)).await.unwrap();
        assert_eq!(run.step("escalate").unwrap().status, RunStepStatus::Skipped);

        let hot = scenario_for(&playbook).with_parameter("risk_score", serde_json::json!(0.9));
        let mut run = start(&playbook, &hot).unwrap();
        drive(&mut run, &ctx(&playbook, &hot, &executor, &limits)).await.unwrap();
        assert!(run.is_step_completed("escalate"));
        assert_eq!(run.risk_level(), crate::domain::RiskLevel::Critical);
    }

    #[tokio::test]
    async fn test_max_steps_limit_fails_run() {
        let playbook = linear_playbook();
        let scenario = scenario_for(&playbook);
        let executor = SimulatedExecutor::new();
        let limits = ExecutionLimits {
            max_steps_per_run: 1,
            ..Default::default()
        };
        let ctx = ctx(&playbook, &scenario, &executor, &limits);

        let mut run = start(&playbook, &scenario).unwrap();
        drive(&mut run, &ctx).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.as_deref().unwrap().contains("Maximum steps"));
    }

    #[tokio::test]
    async fn test_rolling_scores() {
        let playbook = linear_playbook();
        let scenario = scenario_for(&playbook)
            .with_parameter("risk_score", serde_json::json!(0.6))
            .with_parameter("opportunity_score", serde_json::json!(0.4));
        let executor = SimulatedExecutor::new();
        let limits = ExecutionLimits::default();
        let ctx = ctx(&playbook, &scenario, &executor, &limits);

        let mut run = start(&playbook, &scenario).unwrap();
        drive(&mut run, &ctx).await.unwrap();

        assert!((run.risk_score - 0.6).abs() < f64::EPSILON);
        assert!((run.opportunity_score - 0.4).abs() < 1e-9);
        assert_eq!(run.tokens_used(), 50);
    }
}
