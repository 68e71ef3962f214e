//! scenarist - Playbook, scenario and suite orchestration
//!
//! Runs validated playbooks step by step against scenario context, with
//! human approval gates, and chains scenario simulations into suites whose
//! items are gated by trigger conditions over earlier outcomes.
//!
//! # Architecture
//!
//! The state machines are pure functions over owned run values; the
//! `Orchestrator` facade loads, transitions, persists and audits:
//! - Every state change appends one event to a digest-chained audit log
//! - Nothing runs in the background; every transition is an explicit call
//! - Step actions and narrative synthesis are delegated to collaborators
//!
//! # Modules
//!
//! - `adapters`: Action executors and synthesizers (simulated, template, HTTP)
//! - `core`: Graph validation, run and suite state machines, triggers,
//!   aggregation, audit log, orchestrator facade
//! - `domain`: Data structures (Scenario, ScenarioRun, SuiteRun, AuditEvent)
//! - `store`: Persistence trait and in-memory store
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Validate a playbook
//! scenarist validate playbooks/breach.yaml
//!
//! # Rehearse a whole suite end to end
//! scenarist simulate bundles/breach-chain.yaml --auto-approve
//!
//! # Inspect the audit trail of a run or suite run
//! scenarist audit <id> --verify
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod store;

// Re-export main types at crate root for convenience
pub use crate::core::{
    Orchestrator, PlaybookDefinition, RunPolicy, ScenarioSuite, StepDefinition, TriggerCondition,
};
pub use domain::{AuditEvent, Scenario, ScenarioRun, SuiteRun};
pub use error::{OrchestratorError, Result};
pub use store::{MemoryStore, Store};
