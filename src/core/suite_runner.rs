//! Suite run orchestration.
//!
//! Suite run transitions:
//! - running -> paused | aborted | completed | failed
//! - paused -> running | aborted
//!
//! Items execute strictly one after another: trigger conditions read the
//! outcomes of earlier items, so an item never starts before the previous
//! one is settled. Each `advance` handles exactly the current item.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{
    ConditionEvaluation, ScenarioRun, SuiteRun, SuiteRunItem, SuiteRunItemStatus, SuiteRunStatus,
};
use crate::error::{OrchestratorError, Result};

use super::aggregator::aggregate;
use super::limits::check_suite_timeout;
use super::suite::ScenarioSuite;
use super::trigger::{evaluate, AccumulatedState};

/// Starts and drives the scenario runs backing suite items
#[async_trait]
pub trait ScenarioDriver: Send + Sync {
    /// Start a run of `scenario_id` and drive it as far as it goes
    async fn launch(&self, scenario_id: Uuid, suite_run_id: Uuid, actor: &str) -> Result<ScenarioRun>;

    /// Keep driving an existing run
    async fn continue_run(&self, run_id: Uuid, actor: &str) -> Result<ScenarioRun>;

    /// Cancel an in-flight run
    async fn cancel(&self, run_id: Uuid, reason: &str, actor: &str) -> Result<ScenarioRun>;
}

/// What one `advance` did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceReport {
    pub item_index: usize,
    pub item_name: String,
    pub item_status: SuiteRunItemStatus,
    pub condition: Option<ConditionEvaluation>,
    pub run_id: Option<Uuid>,

    /// The item's run is waiting on an approval gate or paused
    pub blocked: bool,

    pub suite_status: SuiteRunStatus,
}

/// Materialize a suite run: one pending item per suite item, in order.
/// A suite without items completes immediately.
pub fn start(suite: &ScenarioSuite) -> Result<SuiteRun> {
    suite.validate()?;

    let mut ordered: Vec<_> = suite.items.iter().collect();
    ordered.sort_by_key(|i| i.position);

    let items: Vec<SuiteRunItem> = ordered
        .iter()
        .enumerate()
        .map(|(index, item)| SuiteRunItem::pending(item.id, item.scenario_id, item.name.clone(), index))
        .collect();

    let mut suite_run = SuiteRun {
        id: Uuid::new_v4(),
        org_id: suite.org_id.clone(),
        suite_id: suite.id,
        status: SuiteRunStatus::Running,
        current_item_index: 0,
        total_items: items.len(),
        items,
        error: None,
        abort_reason: None,
        aggregated_outcomes: Vec::new(),
        narrative: None,
        risk_map: None,
        started_at: Utc::now(),
        completed_at: None,
        paused_at: None,
    };

    if suite_run.total_items == 0 {
        finish(&mut suite_run, SuiteRunStatus::Completed);
    }

    info!(suite_run_id = %suite_run.id, items = suite_run.total_items, "Suite run started");
    Ok(suite_run)
}

fn ensure_status(suite_run: &SuiteRun, allowed: &[SuiteRunStatus], operation: &'static str) -> Result<()> {
    if allowed.contains(&suite_run.status) {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidSuiteRunState {
            suite_run_id: suite_run.id,
            status: suite_run.status,
            operation,
        })
    }
}

/// Move to a terminal status and store the aggregated outcomes
fn finish(suite_run: &mut SuiteRun, status: SuiteRunStatus) {
    suite_run.status = status;
    suite_run.completed_at = Some(Utc::now());
    suite_run.paused_at = None;
    suite_run.aggregated_outcomes = aggregate(suite_run);
    info!(suite_run_id = %suite_run.id, %status, "Suite run finished");
}

fn move_next(suite_run: &mut SuiteRun) {
    suite_run.current_item_index += 1;
    if suite_run.current_item_index >= suite_run.total_items {
        finish(suite_run, SuiteRunStatus::Completed);
    }
}

fn report(suite_run: &SuiteRun, index: usize, blocked: bool) -> AdvanceReport {
    let item = &suite_run.items[index];
    AdvanceReport {
        item_index: index,
        item_name: item.name.clone(),
        item_status: item.status,
        condition: item.condition.clone(),
        run_id: item.run_id,
        blocked,
        suite_status: suite_run.status,
    }
}

/// Apply the state of the item's scenario run. Returns whether the item
/// is still blocked on that run.
fn settle(suite_run: &mut SuiteRun, index: usize, run: &ScenarioRun, stop_on_failure: bool) -> bool {
    let item = &mut suite_run.items[index];
    item.run_id = Some(run.id);

    if !run.is_terminal() {
        item.status = SuiteRunItemStatus::Running;
        debug!(suite_run_id = %suite_run.id, item = %item.name, run_status = %run.status, "Item blocked on its run");
        return true;
    }

    item.record_run(run);
    let name = item.name.clone();
    let status = item.status;

    if status == SuiteRunItemStatus::Failed && stop_on_failure {
        error!(suite_run_id = %suite_run.id, item = %name, "Item failed, stopping suite run");
        suite_run.error = Some(format!("Item '{}' failed", name));
        finish(suite_run, SuiteRunStatus::Failed);
    } else {
        info!(suite_run_id = %suite_run.id, item = %name, %status, "Item settled");
        move_next(suite_run);
    }
    false
}

/// Handle the current item.
///
/// A pending item has its trigger evaluated (unless `always`), then is
/// either skipped or executed through `driver`. An item whose run is
/// blocked stays `running` and the index does not move; the next advance
/// continues that run. `skip_current` skips a pending item, or cancels
/// the in-flight run of a running one.
///
/// A pending item whose trigger is not met is passed over without a run,
/// but its final status is `condition_unmet` rather than `skipped`; the
/// evaluation stays in `condition`. Only items skipped by the caller end
/// as `skipped`.
pub async fn advance(
    suite_run: &mut SuiteRun,
    suite: &ScenarioSuite,
    driver: &dyn ScenarioDriver,
    skip_current: bool,
    actor: &str,
) -> Result<AdvanceReport> {
    ensure_status(suite_run, &[SuiteRunStatus::Running], "advanced")?;

    let index = suite_run.current_item_index;
    if index >= suite_run.items.len() {
        return Err(OrchestratorError::invalid_request(format!(
            "Suite run {} has no current item",
            suite_run.id
        )));
    }

    if let Err(violation) = check_suite_timeout(suite_run.started_at, suite.options.timeout_seconds, Utc::now()) {
        warn!(suite_run_id = %suite_run.id, %violation, "Suite run timed out");
        if let Some(run_id) = suite_run.items[index].run_id {
            if suite_run.items[index].status == SuiteRunItemStatus::Running {
                let run = driver.cancel(run_id, "suite run timed out", actor).await?;
                suite_run.items[index].record_run(&run);
            }
        }
        suite_run.error = Some(violation.to_string());
        finish(suite_run, SuiteRunStatus::Failed);
        return Ok(report(suite_run, index, false));
    }

    let stop_on_failure = suite.options.stop_on_failure;

    match suite_run.items[index].status {
        SuiteRunItemStatus::Running => {
            let Some(run_id) = suite_run.items[index].run_id else {
                return Err(OrchestratorError::invalid_request(format!(
                    "Item '{}' is running without a scenario run",
                    suite_run.items[index].name
                )));
            };

            let run = if skip_current {
                driver.cancel(run_id, "skipped by suite advance", actor).await?
            } else {
                driver.continue_run(run_id, actor).await?
            };
            let blocked = settle(suite_run, index, &run, stop_on_failure);
            Ok(report(suite_run, index, blocked))
        }
        SuiteRunItemStatus::Pending => {
            let suite_item = suite
                .get_item(suite_run.items[index].suite_item_id)
                .ok_or_else(|| {
                    OrchestratorError::invalid_request(format!(
                        "Suite item {} no longer exists",
                        suite_run.items[index].suite_item_id
                    ))
                })?;

            let mut met = true;
            if !suite_item.trigger.is_always() {
                let state = AccumulatedState::from_items(&suite_run.items[..index]);
                let evaluation = evaluate(&suite_item.trigger, &state);
                met = evaluation.met;
                debug!(
                    suite_run_id = %suite_run.id,
                    item = %suite_item.name,
                    met,
                    detail = %evaluation.detail,
                    "Trigger evaluated"
                );

                let item = &mut suite_run.items[index];
                item.status = if met {
                    SuiteRunItemStatus::ConditionMet
                } else {
                    SuiteRunItemStatus::ConditionUnmet
                };
                item.condition = Some(evaluation);
            }

            if !met || skip_current {
                if met {
                    suite_run.items[index].status = SuiteRunItemStatus::Skipped;
                }
                info!(suite_run_id = %suite_run.id, item = %suite_item.name, condition_met = met, "Item skipped");
                move_next(suite_run);
                return Ok(report(suite_run, index, false));
            }

            let scenario_id = suite_run.items[index].scenario_id;
            suite_run.items[index].status = SuiteRunItemStatus::Running;
            let run = driver.launch(scenario_id, suite_run.id, actor).await?;
            let blocked = settle(suite_run, index, &run, stop_on_failure);
            Ok(report(suite_run, index, blocked))
        }
        other => Err(OrchestratorError::invalid_request(format!(
            "Current item '{}' is already {}",
            suite_run.items[index].name, other
        ))),
    }
}

/// Pause a running suite run; the current index is frozen
pub fn pause(suite_run: &mut SuiteRun) -> Result<()> {
    ensure_status(suite_run, &[SuiteRunStatus::Running], "paused")?;
    suite_run.status = SuiteRunStatus::Paused;
    suite_run.paused_at = Some(Utc::now());
    info!(suite_run_id = %suite_run.id, item_index = suite_run.current_item_index, "Suite run paused");
    Ok(())
}

pub fn resume(suite_run: &mut SuiteRun) -> Result<()> {
    ensure_status(suite_run, &[SuiteRunStatus::Paused], "resumed")?;
    suite_run.status = SuiteRunStatus::Running;
    suite_run.paused_at = None;
    info!(suite_run_id = %suite_run.id, "Suite run resumed");
    Ok(())
}

/// Abort a running or paused suite run.
///
/// No further items execute; the in-flight run of a running item is
/// cancelled and remaining pending items are skipped.
pub async fn abort(
    suite_run: &mut SuiteRun,
    driver: &dyn ScenarioDriver,
    reason: &str,
    actor: &str,
) -> Result<()> {
    ensure_status(
        suite_run,
        &[SuiteRunStatus::Running, SuiteRunStatus::Paused],
        "aborted",
    )?;

    for index in 0..suite_run.items.len() {
        match (suite_run.items[index].status, suite_run.items[index].run_id) {
            (SuiteRunItemStatus::Running, Some(run_id)) => {
                let run = driver.cancel(run_id, reason, actor).await?;
                suite_run.items[index].record_run(&run);
            }
            (SuiteRunItemStatus::Pending, _) | (SuiteRunItemStatus::Running, None) => {
                suite_run.items[index].status = SuiteRunItemStatus::Skipped;
            }
            _ => {}
        }
    }

    suite_run.abort_reason = Some(reason.to_string());
    finish(suite_run, SuiteRunStatus::Aborted);
    Ok(())
}
