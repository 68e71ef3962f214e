//! Suite run state.
//!
//! A SuiteRun sequences several scenario runs. Transitions are driven by
//! `core::suite_runner`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::outcome::{AggregatedOutcome, NarrativeDocument, RiskMap};
use super::run::{OutcomeClass, ScenarioRun};
use super::scenario::RiskLevel;

/// One execution of a scenario suite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteRun {
    pub id: Uuid,
    pub org_id: String,
    pub suite_id: Uuid,
    pub status: SuiteRunStatus,

    /// Index of the item the next advance works on
    pub current_item_index: usize,
    pub total_items: usize,

    /// One record per suite item, ordered by position
    pub items: Vec<SuiteRunItem>,

    /// Error detail if the suite run failed
    pub error: Option<String>,

    /// Reason given on abort
    pub abort_reason: Option<String>,

    /// Filled by the outcome aggregator once terminal
    #[serde(default)]
    pub aggregated_outcomes: Vec<AggregatedOutcome>,

    pub narrative: Option<NarrativeDocument>,
    pub risk_map: Option<RiskMap>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
}

impl SuiteRun {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The item at `current_item_index`, if any remain
    pub fn current_item(&self) -> Option<&SuiteRunItem> {
        self.items.get(self.current_item_index)
    }

    /// Items that actually executed a scenario run to a terminal state
    pub fn executed_items(&self) -> impl Iterator<Item = &SuiteRunItem> {
        self.items.iter().filter(|i| i.is_executed())
    }
}

/// Status of a suite run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteRunStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Aborted,
}

impl SuiteRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

impl std::fmt::Display for SuiteRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Per-item execution record inside a suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteRunItem {
    /// Suite item this record tracks
    pub suite_item_id: Uuid,
    pub scenario_id: Uuid,
    pub name: String,
    pub position: usize,
    pub status: SuiteRunItemStatus,

    /// Trigger evaluation, absent for `always` items
    pub condition: Option<ConditionEvaluation>,

    /// Scenario run started for this item
    pub run_id: Option<Uuid>,

    #[serde(default)]
    pub steps_executed: usize,
    #[serde(default)]
    pub tokens_used: u64,
    pub risk_level: Option<RiskLevel>,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    pub outcome: Option<OutcomeClass>,
    #[serde(default)]
    pub sentiment_delta: f64,
    #[serde(default)]
    pub responding_roles: Vec<String>,
    pub error: Option<String>,
}

impl SuiteRunItem {
    pub fn pending(suite_item_id: Uuid, scenario_id: Uuid, name: String, position: usize) -> Self {
        Self {
            suite_item_id,
            scenario_id,
            name,
            position,
            status: SuiteRunItemStatus::Pending,
            condition: None,
            run_id: None,
            steps_executed: 0,
            tokens_used: 0,
            risk_level: None,
            duration_ms: None,
            key_findings: Vec::new(),
            outcome: None,
            sentiment_delta: 0.0,
            responding_roles: Vec::new(),
            error: None,
        }
    }

    /// Completed or failed after running a scenario
    pub fn is_executed(&self) -> bool {
        matches!(
            self.status,
            SuiteRunItemStatus::Completed | SuiteRunItemStatus::Failed
        )
    }

    /// Copy the metrics of a terminal scenario run onto this item
    pub fn record_run(&mut self, run: &ScenarioRun) {
        self.run_id = Some(run.id);
        self.steps_executed = run.steps_executed();
        self.tokens_used = run.tokens_used();
        self.risk_level = Some(run.risk_level());
        self.duration_ms = run.duration_ms();
        self.key_findings = run.key_findings();
        self.outcome = run.outcome_class();
        self.sentiment_delta = run.sentiment_delta();
        self.responding_roles = run.responding_roles();
        self.error = run.error.clone();
        self.status = match run.outcome_class() {
            Some(OutcomeClass::Success) | Some(OutcomeClass::Partial) => {
                SuiteRunItemStatus::Completed
            }
            Some(OutcomeClass::Cancelled) => SuiteRunItemStatus::Skipped,
            _ => SuiteRunItemStatus::Failed,
        };
    }
}

/// Status of a suite run item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteRunItemStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    ConditionMet,
    ConditionUnmet,
}

impl std::fmt::Display for SuiteRunItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::ConditionMet => "condition_met",
            Self::ConditionUnmet => "condition_unmet",
        };
        f.write_str(s)
    }
}

/// Result of evaluating an item's trigger condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionEvaluation {
    pub met: bool,

    /// Human-readable explanation of the decision
    pub detail: String,

    pub evaluated_at: DateTime<Utc>,
}

impl ConditionEvaluation {
    pub fn met(detail: impl Into<String>) -> Self {
        Self {
            met: true,
            detail: detail.into(),
            evaluated_at: Utc::now(),
        }
    }

    pub fn unmet(detail: impl Into<String>) -> Self {
        Self {
            met: false,
            detail: detail.into(),
            evaluated_at: Utc::now(),
        }
    }
}
