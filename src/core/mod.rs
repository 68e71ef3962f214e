//! Core orchestration logic.
//!
//! This module contains:
//! - Playbook: step definitions and typed step configs
//! - Graph: structural validation of step graphs
//! - RunMachine: scenario run state machine
//! - Trigger: suite item trigger conditions
//! - SuiteRunner: suite run orchestration
//! - Aggregator: outcomes, narratives and risk maps
//! - AuditLog: append-only, digest-chained audit sink
//! - Orchestrator: service facade over all of the above

pub mod aggregator;
pub mod audit_log;
pub mod graph;
pub mod limits;
pub mod orchestrator;
pub mod playbook;
pub mod run_machine;
pub mod suite;
pub mod suite_runner;
pub mod trigger;

// Re-export commonly used types
pub use aggregator::{NarrativeRequest, RiskMapRequest};
pub use audit_log::{verify_chain, AuditSink, ChainStatus, JsonlAuditLog, MemoryAuditLog};
pub use graph::{validate_definitions, validate_playbook, validate_steps};
pub use limits::{ExecutionLimits, LimitViolation};
pub use orchestrator::{NewSuiteItem, Orchestrator, PlaybookUpdate, RunPolicy, SuiteItemUpdate};
pub use playbook::{
    AgentActionConfig, BranchCondition, BranchConfig, BranchPredicate, DataTransformConfig,
    PlaybookDefinition, PlaybookStatus, RetryPolicy, StepConfig, StepDefinition, TransformOp,
};
pub use suite::{ScenarioSuite, SuiteItem, SuiteOptions, SuiteStatus};
pub use suite_runner::{AdvanceReport, ScenarioDriver};
pub use trigger::{
    AccumulatedState, AgentResponse, Comparison, KeywordMatch, MatchMode, OutcomeMatch,
    RiskThreshold, SentimentShift, ShiftDirection, TriggerCondition,
};
