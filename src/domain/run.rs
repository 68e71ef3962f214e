//! Scenario run state.
//!
//! A ScenarioRun is one execution of a scenario's playbook, tracked step
//! by step. Transitions are driven by `core::run_machine`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scenario::RiskLevel;

/// One execution of a scenario's playbook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRun {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Owning organization
    pub org_id: String,

    /// Scenario being executed
    pub scenario_id: Uuid,

    /// Playbook the steps were materialized from
    pub playbook_id: Uuid,

    /// Suite run that launched this run, if any
    #[serde(default)]
    pub suite_run_id: Option<Uuid>,

    /// Playbook version at start time
    pub playbook_version: u32,

    /// `updated_at` of the playbook the steps were materialized from
    #[serde(default)]
    pub playbook_revision: DateTime<Utc>,

    /// Current status
    pub status: RunStatus,

    /// Index of the step being worked on
    pub current_step_index: usize,

    /// Number of materialized steps
    pub total_steps: usize,

    /// Rolling risk score (highest seen), 0..=1
    pub risk_score: f64,

    /// Rolling opportunity score (mean of reported scores), 0..=1
    pub opportunity_score: f64,

    /// One record per step definition, ordered by step_index
    pub steps: Vec<RunStep>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Reason given on cancellation
    pub cancel_reason: Option<String>,

    /// Error message if the run failed
    pub error: Option<String>,
}

impl ScenarioRun {
    /// Check if the run can no longer change
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The step at `current_step_index`, if any remain
    pub fn current_step(&self) -> Option<&RunStep> {
        self.steps.get(self.current_step_index)
    }

    /// Look up a step by its key
    pub fn step(&self, key: &str) -> Option<&RunStep> {
        self.steps.iter().find(|s| s.step_key == key)
    }

    /// Check if a specific step is completed
    pub fn is_step_completed(&self, key: &str) -> bool {
        self.step(key)
            .map(|s| s.status == RunStepStatus::Completed)
            .unwrap_or(false)
    }

    /// Whether the current step is blocked on a human decision
    pub fn is_awaiting_approval(&self) -> bool {
        matches!(
            self.current_step().map(|s| s.status),
            Some(RunStepStatus::AwaitingApproval)
        )
    }

    /// Number of steps that finished successfully
    pub fn steps_executed(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == RunStepStatus::Completed)
            .count()
    }

    /// Total tokens reported by step outcomes
    pub fn tokens_used(&self) -> u64 {
        self.steps
            .iter()
            .filter_map(|s| s.outcome.as_ref())
            .map(|o| o.tokens_used)
            .sum()
    }

    /// Wall-clock duration, if the run has finished
    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }

    /// Risk level bucket of the rolling risk score
    pub fn risk_level(&self) -> RiskLevel {
        RiskLevel::from_score(self.risk_score)
    }

    /// Summaries of completed steps, in step order
    pub fn key_findings(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| s.outcome.as_ref())
            .filter(|o| !o.summary.trim().is_empty())
            .map(|o| o.summary.clone())
            .collect()
    }

    /// Signed sum of sentiment reported by step outcomes
    pub fn sentiment_delta(&self) -> f64 {
        self.steps
            .iter()
            .filter_map(|s| s.outcome.as_ref())
            .filter_map(|o| o.sentiment)
            .sum()
    }

    /// Distinct roles that produced a response, in first-seen order
    pub fn responding_roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = Vec::new();
        for role in self
            .steps
            .iter()
            .filter_map(|s| s.outcome.as_ref())
            .flat_map(|o| o.responding_roles.iter())
        {
            if !roles.iter().any(|r| r.eq_ignore_ascii_case(role)) {
                roles.push(role.clone());
            }
        }
        roles
    }

    /// Outcome classification of a terminal run
    pub fn outcome_class(&self) -> Option<OutcomeClass> {
        match self.status {
            RunStatus::Completed => {
                if self.steps.iter().any(|s| s.status == RunStepStatus::Skipped) {
                    Some(OutcomeClass::Partial)
                } else {
                    Some(OutcomeClass::Success)
                }
            }
            RunStatus::Failed => Some(OutcomeClass::Failure),
            RunStatus::Cancelled => Some(OutcomeClass::Cancelled),
            RunStatus::Running | RunStatus::Paused => None,
        }
    }
}

/// Status of a scenario run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Currently executing
    Running,

    /// Paused (can be resumed)
    Paused,

    /// All steps finished
    Completed,

    /// A step failed without retries left
    Failed,

    /// Cancelled by an operator
    Cancelled,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Running
    }
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Per-step execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStep {
    /// Key of the step definition this record tracks
    pub step_key: String,

    /// Position in the run (equals the definition's position)
    pub step_index: usize,

    /// Current status
    pub status: RunStepStatus,

    /// Number of execution attempts so far
    pub attempts: u32,

    /// Execution context handed to the action executor
    #[serde(default)]
    pub context: serde_json::Value,

    /// Outcome of a successful execution
    pub outcome: Option<StepOutcome>,

    /// Human decision, for gated steps
    pub approval: Option<ApprovalRecord>,

    /// Error message if the step failed
    pub error: Option<String>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunStep {
    /// Create a pending record for a step definition
    pub fn pending(step_key: impl Into<String>, step_index: usize) -> Self {
        Self {
            step_key: step_key.into(),
            step_index,
            status: RunStepStatus::Pending,
            attempts: 0,
            context: serde_json::Value::Null,
            outcome: None,
            approval: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Status of a single run step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStepStatus {
    /// Not reached yet
    Pending,

    /// Reached and free to execute
    Ready,

    /// Reached but blocked on a human decision
    AwaitingApproval,

    /// Approved or currently executing
    Running,

    /// Executed successfully
    Completed,

    /// Execution failed
    Failed,

    /// Rejected, jumped over, or cancelled before execution
    Skipped,
}

impl Default for RunStepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl RunStepStatus {
    /// Only reached-but-unexecuted steps accept approve/reject
    pub fn is_approvable(&self) -> bool {
        matches!(self, Self::Ready | Self::AwaitingApproval)
    }

    /// Steps that cancellation turns into `Skipped`
    pub fn is_unstarted(&self) -> bool {
        matches!(self, Self::Pending | Self::Ready | Self::AwaitingApproval)
    }
}

impl std::fmt::Display for RunStepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Result payload of a step execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutcome {
    /// One-line summary suitable for findings and narratives
    pub summary: String,

    /// Structured output of the action
    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default)]
    pub tokens_used: u64,

    /// Risk score reported by the action, 0..=1
    #[serde(default)]
    pub risk_score: Option<f64>,

    /// Opportunity score reported by the action, 0..=1
    #[serde(default)]
    pub opportunity_score: Option<f64>,

    /// Signed sentiment reading, -1..=1
    #[serde(default)]
    pub sentiment: Option<f64>,

    /// Roles that responded during the action
    #[serde(default)]
    pub responding_roles: Vec<String>,

    #[serde(default)]
    pub duration_ms: u64,
}

/// A human decision on a gated step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub decision: ApprovalDecision,
    pub actor: String,
    pub decided_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// Coarse classification of how a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    /// Every step completed
    Success,

    /// Completed with at least one skipped step
    Partial,

    /// A step failed
    Failure,

    /// Cancelled before finishing
    Cancelled,
}

impl std::fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with(steps: Vec<RunStep>, status: RunStatus) -> ScenarioRun {
        ScenarioRun {
            id: Uuid::new_v4(),
            org_id: "acme".to_string(),
            scenario_id: Uuid::new_v4(),
            playbook_id: Uuid::new_v4(),
            suite_run_id: None,
            playbook_version: 1,
            playbook_revision: Utc::now(),
            status,
            current_step_index: 0,
            total_steps: steps.len(),
            risk_score: 0.0,
            opportunity_score: 0.0,
            steps,
            started_at: Utc::now(),
            completed_at: None,
            paused_at: None,
            cancelled_at: None,
            cancel_reason: None,
            error: None,
        }
    }

    fn completed_step(key: &str, index: usize, outcome: StepOutcome) -> RunStep {
        let mut step = RunStep::pending(key, index);
        step.status = RunStepStatus::Completed;
        step.outcome = Some(outcome);
        step
    }

    #[test]
    fn test_outcome_class() {
        let done = completed_step("a", 0, StepOutcome::default());
        let mut skipped = RunStep::pending("b", 1);
        skipped.status = RunStepStatus::Skipped;

        let run = run_with(vec![done.clone()], RunStatus::Completed);
        assert_eq!(run.outcome_class(), Some(OutcomeClass::Success));

        let run = run_with(vec![done.clone(), skipped], RunStatus::Completed);
        assert_eq!(run.outcome_class(), Some(OutcomeClass::Partial));

        let run = run_with(vec![done], RunStatus::Running);
        assert_eq!(run.outcome_class(), None);
    }

    #[test]
    fn test_metrics_rollup() {
        let run = run_with(
            vec![
                completed_step(
                    "assess",
                    0,
                    StepOutcome {
                        summary: "Exposure confirmed".to_string(),
                        tokens_used: 120,
                        sentiment: Some(-0.4),
                        responding_roles: vec!["CISO".to_string()],
                        ..Default::default()
                    },
                ),
                completed_step(
                    "notify",
                    1,
                    StepOutcome {
                        summary: "Regulator notified".to_string(),
                        tokens_used: 80,
                        sentiment: Some(0.1),
                        responding_roles: vec!["ciso".to_string(), "Legal".to_string()],
                        ..Default::default()
                    },
                ),
            ],
            RunStatus::Completed,
        );

        assert_eq!(run.steps_executed(), 2);
        assert_eq!(run.tokens_used(), 200);
        assert!((run.sentiment_delta() + 0.3).abs() < 1e-9);
        assert_eq!(run.responding_roles(), vec!["CISO", "Legal"]);
        assert_eq!(run.key_findings().len(), 2);
        assert!(run.is_step_completed("notify"));
    }

    #[test]
    fn test_step_status_predicates() {
        assert!(RunStepStatus::Ready.is_approvable());
        assert!(RunStepStatus::AwaitingApproval.is_approvable());
        assert!(!RunStepStatus::Running.is_approvable());
        assert!(RunStepStatus::Pending.is_unstarted());
        assert!(!RunStepStatus::Completed.is_unstarted());
    }
}
