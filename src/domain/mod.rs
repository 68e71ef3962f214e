//! Domain types for the scenarist orchestrator.
//!
//! This module contains the runtime data structures:
//! - Scenario: a playbook bound to context
//! - ScenarioRun: step-by-step execution state
//! - SuiteRun: item-by-item execution state of a suite
//! - AuditEvent: immutable records of state changes
//! - Outcome artifacts: aggregated outcomes, narratives, risk maps

pub mod events;
pub mod outcome;
pub mod run;
pub mod scenario;
pub mod suite_run;

// Re-export commonly used types
pub use events::{AuditAction, AuditEvent, AuditSubject, EntityKind};
pub use outcome::{
    AggregatedOutcome, NarrativeDocument, NarrativeVerbosity, OpportunityEntry, RiskEntry, RiskMap,
};
pub use run::{
    ApprovalDecision, ApprovalRecord, OutcomeClass, RunStatus, RunStep, RunStepStatus,
    ScenarioRun, StepOutcome,
};
pub use scenario::{RiskLevel, Scenario, ScenarioStatus};
pub use suite_run::{
    ConditionEvaluation, SuiteRun, SuiteRunItem, SuiteRunItemStatus, SuiteRunStatus,
};
