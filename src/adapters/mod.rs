//! Collaborator interfaces for external services.
//!
//! Adapters provide a unified interface for the two services the
//! orchestrator delegates to: executing step actions and synthesizing
//! narratives / risk maps from suite outcomes.

pub mod http;
pub mod simulated;
pub mod template;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::playbook::StepConfig;
use crate::domain::{
    AggregatedOutcome, NarrativeDocument, NarrativeVerbosity, RiskMap, StepOutcome,
    SuiteRunStatus,
};

pub use http::{HttpExecutor, HttpSynthesizer};
pub use simulated::SimulatedExecutor;
pub use template::TemplateSynthesizer;

/// Everything an executor needs to perform one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub run_id: Uuid,
    pub scenario_id: Uuid,
    pub step_key: String,
    pub step_name: String,

    /// Typed step config (agent action, data transform, branch)
    pub config: StepConfig,

    /// Scenario parameters
    pub parameters: serde_json::Map<String, serde_json::Value>,

    /// Payloads of completed steps, keyed by step key
    pub prior_outputs: serde_json::Map<String, serde_json::Value>,

    /// 1-indexed attempt number
    pub attempt: u32,
}

/// Trait for action-execution services
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Human-readable executor name
    fn name(&self) -> &str;

    /// Perform the step's action and report its outcome
    async fn execute(&self, request: &ActionRequest, timeout: Duration) -> Result<StepOutcome>;

    /// Health check (for HTTP executors)
    async fn health_check(&self) -> Result<()>;
}

/// Findings of one executed suite item, for synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFindings {
    pub name: String,
    pub findings: Vec<String>,
}

/// Input handed to a synthesizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisContext {
    pub suite_run_id: Uuid,
    pub suite_name: String,
    pub status: SuiteRunStatus,
    pub outcomes: Vec<AggregatedOutcome>,
    pub findings: Vec<ItemFindings>,
}

/// Trait for narrative / risk-map synthesis services
#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn narrative(
        &self,
        context: &SynthesisContext,
        verbosity: NarrativeVerbosity,
        include_recommendations: bool,
    ) -> Result<NarrativeDocument>;

    async fn risk_map(
        &self,
        context: &SynthesisContext,
        include_opportunities: bool,
    ) -> Result<RiskMap>;
}
