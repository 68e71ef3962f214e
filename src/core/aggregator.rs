//! Outcome aggregation for finished suite runs.
//!
//! Narrative and risk-map generation are re-runnable: each call replaces
//! the artifact stored on the suite run. Both require a terminal run.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::adapters::{ItemFindings, SynthesisContext, Synthesizer};
use crate::domain::{
    AggregatedOutcome, NarrativeVerbosity, OutcomeClass, SuiteRun, SuiteRunItem,
    SuiteRunItemStatus,
};
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NarrativeRequest {
    #[serde(default)]
    pub verbosity: NarrativeVerbosity,
    #[serde(default)]
    pub include_recommendations: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskMapRequest {
    #[serde(default)]
    pub include_opportunities: bool,
}

fn summarize(item: &SuiteRunItem) -> String {
    if let Some(ref error) = item.error {
        return error.clone();
    }
    if item.key_findings.is_empty() {
        format!("{} step(s) executed, no findings recorded", item.steps_executed)
    } else {
        item.key_findings.join("; ")
    }
}

/// One entry per executed (completed or failed) item, in position order
pub fn aggregate(suite_run: &SuiteRun) -> Vec<AggregatedOutcome> {
    suite_run
        .executed_items()
        .map(|item| AggregatedOutcome {
            name: item.name.clone(),
            outcome: item.outcome.unwrap_or(match item.status {
                SuiteRunItemStatus::Failed => OutcomeClass::Failure,
                _ => OutcomeClass::Success,
            }),
            summary: summarize(item),
            risk_level: item.risk_level.unwrap_or_default(),
        })
        .collect()
}

fn ensure_terminal(suite_run: &SuiteRun) -> Result<()> {
    if suite_run.is_terminal() {
        Ok(())
    } else {
        Err(OrchestratorError::RunNotTerminal {
            suite_run_id: suite_run.id,
            status: suite_run.status,
        })
    }
}

/// Input handed to the synthesizer for `suite_run`
pub fn synthesis_context(suite_run: &SuiteRun, suite_name: &str) -> SynthesisContext {
    let outcomes = if suite_run.aggregated_outcomes.is_empty() {
        aggregate(suite_run)
    } else {
        suite_run.aggregated_outcomes.clone()
    };

    SynthesisContext {
        suite_run_id: suite_run.id,
        suite_name: suite_name.to_string(),
        status: suite_run.status,
        outcomes,
        findings: suite_run
            .executed_items()
            .map(|item| ItemFindings {
                name: item.name.clone(),
                findings: item.key_findings.clone(),
            })
            .collect(),
    }
}

/// Synthesize and store a narrative on a terminal suite run
pub async fn generate_narrative(
    suite_run: &mut SuiteRun,
    suite_name: &str,
    request: &NarrativeRequest,
    synthesizer: &dyn Synthesizer,
) -> Result<()> {
    ensure_terminal(suite_run)?;

    let context = synthesis_context(suite_run, suite_name);
    let narrative = synthesizer
        .narrative(&context, request.verbosity, request.include_recommendations)
        .await
        .map_err(OrchestratorError::Synthesis)?;

    info!(suite_run_id = %suite_run.id, synthesizer = synthesizer.name(), "Narrative generated");
    suite_run.narrative = Some(narrative);
    Ok(())
}

/// Synthesize and store a risk map on a terminal suite run
pub async fn generate_risk_map(
    suite_run: &mut SuiteRun,
    suite_name: &str,
    request: &RiskMapRequest,
    synthesizer: &dyn Synthesizer,
) -> Result<()> {
    ensure_terminal(suite_run)?;

    let context = synthesis_context(suite_run, suite_name);
    let risk_map = synthesizer
        .risk_map(&context, request.include_opportunities)
        .await
        .map_err(OrchestratorError::Synthesis)?;

    info!(
        suite_run_id = %suite_run.id,
        risks = risk_map.risks.len(),
        opportunities = risk_map.opportunities.len(),
        "Risk map generated"
    );
    suite_run.risk_map = Some(risk_map);
    Ok(())
}
