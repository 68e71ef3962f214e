//! Error taxonomy for orchestration operations.
//!
//! - structural: the shape of a playbook or a config payload is wrong;
//!   rejected before anything is persisted
//! - state: the operation is not valid for the entity's current status;
//!   the current status is always included
//! - collaborator: the store, audit sink or synthesizer failed
//!
//! Execution failures of delegated actions are not errors here: they are
//! recorded on the RunStep / SuiteRunItem that ran them.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::{EntityKind, RunStatus, RunStepStatus, ScenarioStatus, SuiteRunStatus};
use crate::store::StoreError;

/// Structural errors in a playbook's step graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Playbook must have at least one step")]
    EmptyPlaybook,

    #[error("Duplicate step key: {key}")]
    DuplicateStepKey { key: String },

    #[error("Step '{key}' has position {found}, expected {expected}")]
    NonSequentialPosition {
        key: String,
        expected: usize,
        found: usize,
    },

    #[error("Step '{step}' references non-existent step '{missing}'")]
    DanglingReference { step: String, missing: String },
}

/// A typed config payload failed its own schema check
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind} config{}: {reason}", .owner.as_ref().map(|o| format!(" for '{o}'")).unwrap_or_default())]
pub struct ConfigError {
    /// Tag of the step type or trigger type being validated
    pub kind: String,

    /// Step key or suite item name, when known
    pub owner: Option<String>,

    pub reason: String,
}

impl ConfigError {
    pub fn new(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            owner: None,
            reason: reason.into(),
        }
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Errors returned by orchestration operations
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("Step '{step_key}' cannot be {operation} while {status}")]
    InvalidStepState {
        step_key: String,
        status: RunStepStatus,
        operation: &'static str,
    },

    #[error("Run {run_id} cannot be {operation} while {status}")]
    InvalidRunState {
        run_id: Uuid,
        status: RunStatus,
        operation: &'static str,
    },

    #[error("Suite run {suite_run_id} cannot be {operation} while {status}")]
    InvalidSuiteRunState {
        suite_run_id: Uuid,
        status: SuiteRunStatus,
        operation: &'static str,
    },

    #[error("Suite run {suite_run_id} is {status}; outcomes require a terminal run")]
    RunNotTerminal {
        suite_run_id: Uuid,
        status: SuiteRunStatus,
    },

    #[error("Playbook {playbook_id} is not active")]
    PlaybookNotActive { playbook_id: Uuid },

    #[error("Scenario {scenario_id} already has an active run {run_id}")]
    ScenarioBusy { scenario_id: Uuid, run_id: Uuid },

    #[error("{kind} {id} is locked by an in-flight run")]
    Locked { kind: EntityKind, id: Uuid },

    #[error("Scenario {scenario_id} status cannot change while {status} with an active run")]
    ScenarioLocked {
        scenario_id: Uuid,
        status: ScenarioStatus,
    },

    #[error("Step '{step_key}' not found in run {run_id}")]
    UnknownStep { run_id: Uuid, step_key: String },

    #[error("{reason}")]
    InvalidRequest { reason: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    #[error(transparent)]
    Store(StoreError),

    #[error("Audit sink failed: {0}")]
    Audit(#[source] anyhow::Error),

    #[error("Synthesis failed: {0}")]
    Synthesis(#[source] anyhow::Error),
}

impl OrchestratorError {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Structural errors are rejected before persistence
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Graph(_) | Self::InvalidConfig(_))
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            StoreError::PlaybookLocked(id) => Self::Locked {
                kind: EntityKind::Playbook,
                id,
            },
            other => Self::Store(other),
        }
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_culprit() {
        let err = GraphError::DanglingReference {
            step: "assess".to_string(),
            missing: "escalate".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Step 'assess' references non-existent step 'escalate'"
        );

        let err = ConfigError::new("keyword_match", "keywords must not be empty")
            .owned_by("Escalation");
        assert_eq!(
            err.to_string(),
            "Invalid keyword_match config for 'Escalation': keywords must not be empty"
        );
    }

    #[test]
    fn test_state_error_includes_status() {
        let err = OrchestratorError::InvalidStepState {
            step_key: "notify".to_string(),
            status: RunStepStatus::Completed,
            operation: "approved",
        };
        assert_eq!(err.to_string(), "Step 'notify' cannot be approved while completed");
        assert!(!err.is_structural());
    }

    #[test]
    fn test_store_not_found_maps_to_lookup_error() {
        let id = Uuid::new_v4();
        let err: OrchestratorError = StoreError::NotFound { kind: "suite", id }.into();
        assert!(matches!(err, OrchestratorError::NotFound { kind: "suite", .. }));

        let err: OrchestratorError = StoreError::Backend("disk full".to_string()).into();
        assert!(matches!(err, OrchestratorError::Store(_)));
    }
}
