//! End-to-end suite rehearsal from a bundle file.
//!
//! A bundle declares playbooks, scenarios and one suite in a single YAML
//! document. Scenarios reference playbooks by name and suite items
//! reference scenarios by name, so bundles never carry ids.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::core::{
    NarrativeRequest, Orchestrator, PlaybookDefinition, ScenarioSuite, SuiteOptions,
    TriggerCondition,
};
use crate::domain::{
    NarrativeVerbosity, RiskLevel, RunStepStatus, Scenario, SuiteRun, SuiteRunItemStatus,
};

const ACTOR: &str = "scenarist-cli";

/// Bundle file schema
#[derive(Debug, Clone, Deserialize)]
pub struct Bundle {
    /// Organization for every entity (defaults to the configured one)
    #[serde(default)]
    pub org_id: Option<String>,
    pub playbooks: Vec<PlaybookDefinition>,
    pub scenarios: Vec<BundleScenario>,
    pub suite: BundleSuite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleScenario {
    pub name: String,
    /// Name of a playbook in the same bundle
    pub playbook: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub baseline_risk: RiskLevel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleSuite {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: SuiteOptions,
    pub items: Vec<BundleItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleItem {
    pub name: String,
    /// Name of a scenario in the same bundle
    pub scenario: String,
    #[serde(default)]
    pub trigger: TriggerCondition,
}

impl Bundle {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bundle file: {}", path.display()))?;
        serde_yaml::from_str(&content).context("Failed to parse bundle YAML")
    }
}

/// Load the bundle into `orchestrator` and drive its suite to a terminal
/// state. Approval gates are approved when `auto_approve` is set and
/// stop the rehearsal otherwise.
pub async fn run_bundle(
    orchestrator: &Orchestrator,
    bundle: Bundle,
    default_org: &str,
    auto_approve: bool,
    verbosity: Option<NarrativeVerbosity>,
) -> Result<SuiteRun> {
    let org_id = bundle.org_id.unwrap_or_else(|| default_org.to_string());

    let mut playbook_ids = HashMap::new();
    for mut playbook in bundle.playbooks {
        playbook.org_id = org_id.clone();
        let name = playbook.name.clone();
        let created = orchestrator
            .create_playbook(playbook, ACTOR)
            .await
            .with_context(|| format!("Playbook '{}' rejected", name))?;
        orchestrator.activate_playbook(created.id, ACTOR).await?;
        playbook_ids.insert(name, created.id);
    }

    let mut scenario_ids = HashMap::new();
    for entry in bundle.scenarios {
        let playbook_id = *playbook_ids
            .get(&entry.playbook)
            .with_context(|| format!("Scenario '{}' references unknown playbook '{}'", entry.name, entry.playbook))?;
        let mut scenario = Scenario::new(&org_id, &entry.name, playbook_id).with_baseline_risk(entry.baseline_risk);
        scenario.parameters = entry.parameters;
        let created = orchestrator.create_scenario(scenario, ACTOR).await?;
        orchestrator.mark_scenario_ready(created.id, ACTOR).await?;
        scenario_ids.insert(entry.name, created.id);
    }

    let mut suite = ScenarioSuite::new(&org_id, &bundle.suite.name).with_options(bundle.suite.options);
    suite.description = bundle.suite.description;
    for item in bundle.suite.items {
        let scenario_id = *scenario_ids
            .get(&item.scenario)
            .with_context(|| format!("Suite item '{}' references unknown scenario '{}'", item.name, item.scenario))?;
        suite = suite.with_item(scenario_id, item.name, item.trigger);
    }
    let suite = orchestrator.create_suite(suite, ACTOR).await?;

    let mut suite_run = orchestrator.start_suite_run(suite.id, ACTOR).await?;
    info!(suite_run_id = %suite_run.id, items = suite_run.total_items, "Rehearsing suite");

    // Each item needs one advance per approval gate plus one to launch
    let budget = suite_run.total_items * (orchestrator.policy().limits.max_steps_per_run + 2) + 1;
    for _ in 0..budget {
        if suite_run.is_terminal() {
            break;
        }
        suite_run = orchestrator.advance_suite_run(suite_run.id, false, ACTOR).await?;

        let Some(item) = suite_run.current_item() else {
            continue;
        };
        if item.status != SuiteRunItemStatus::Running || suite_run.is_terminal() {
            continue;
        }
        let Some(run_id) = item.run_id else {
            continue;
        };

        let run = orchestrator.get_run(run_id).await?;
        let Some(step) = run.current_step() else {
            continue;
        };
        if step.status != RunStepStatus::AwaitingApproval {
            anyhow::bail!(
                "Item '{}' is blocked: run {} is {} at step '{}'",
                item.name,
                run.id,
                run.status,
                step.step_key
            );
        }
        if !auto_approve {
            anyhow::bail!(
                "Item '{}' awaits approval of step '{}' in run {} (use --auto-approve)",
                item.name,
                step.step_key,
                run.id
            );
        }
        debug!(run_id = %run.id, step = %step.step_key, "Auto-approving step");
        orchestrator
            .approve_step(run.id, &step.step_key, ACTOR, Some("auto-approved by rehearsal".to_string()))
            .await?;
    }

    if !suite_run.is_terminal() {
        anyhow::bail!("Suite run {} did not finish", suite_run.id);
    }

    if let Some(verbosity) = verbosity {
        let request = NarrativeRequest {
            verbosity,
            include_recommendations: true,
        };
        suite_run = orchestrator.generate_narrative(suite_run.id, request, ACTOR).await?;
    }

    Ok(suite_run)
}

/// Print item results, narrative and risk map
pub fn print_suite_run(suite_run: &SuiteRun) {
    println!("Suite run {} ({})", suite_run.id, suite_run.status);
    if let Some(ref error) = suite_run.error {
        println!("Error: {}", error);
    }
    println!();
    println!("{:<4} {:<28} {:<16} {:<8} {:>6}", "#", "ITEM", "STATUS", "RISK", "STEPS");
    println!("{}", "-".repeat(66));
    for item in &suite_run.items {
        println!(
            "{:<4} {:<28} {:<16} {:<8} {:>6}",
            item.position,
            item.name,
            item.status.to_string(),
            item.risk_level.map(|r| r.as_str()).unwrap_or("-"),
            item.steps_executed
        );
        if let Some(ref condition) = item.condition {
            println!("     condition: {}", condition.detail);
        }
        for finding in &item.key_findings {
            println!("     - {}", finding);
        }
    }

    if let Some(ref narrative) = suite_run.narrative {
        println!();
        println!("== {} ==", narrative.title);
        println!("{}", narrative.body);
        if !narrative.recommendations.is_empty() {
            println!();
            println!("Recommendations:");
            for rec in &narrative.recommendations {
                println!("  * {}", rec);
            }
        }
    }

    if let Some(ref map) = suite_run.risk_map {
        println!();
        println!("Risk map:");
        for risk in &map.risks {
            println!("  [{}] {}: {}", risk.severity.as_str(), risk.category, risk.description);
            if let Some(ref mitigation) = risk.mitigation {
                println!("      mitigation: {}", mitigation);
            }
        }
        for opportunity in &map.opportunities {
            println!("  [+] {}: {}", opportunity.category, opportunity.description);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SuiteRunStatus;

    const BUNDLE: &str = r#"
org_id: acme
playbooks:
  - name: Breach response
    steps:
      - key: assess
        position: 0
        type: agent_action
        role: analyst
        instruction: Assess the intrusion
        next_step_key: notify
      - key: notify
        position: 1
        type: agent_action
        role: comms
        instruction: Notify the regulator
        requires_approval: true
scenarios:
  - name: Ransomware
    playbook: Breach response
    parameters:
      risk_score: 0.8
  - name: Board briefing
    playbook: Breach response
suite:
  name: Breach chain
  items:
    - name: Contain
      scenario: Ransomware
    - name: Brief the board
      scenario: Board briefing
      trigger:
        trigger_condition_type: risk_threshold
        min_risk_level: high
"#;

    #[tokio::test]
    async fn test_bundle_rehearsal_with_auto_approve() {
        let bundle: Bundle = serde_yaml::from_str(BUNDLE).unwrap();
        let orchestrator = Orchestrator::in_memory();

        let suite_run = run_bundle(&orchestrator, bundle, "default", true, Some(NarrativeVerbosity::Executive))
            .await
            .unwrap();

        assert_eq!(suite_run.status, SuiteRunStatus::Completed);
        assert_eq!(suite_run.items[0].status, SuiteRunItemStatus::Completed);
        assert_eq!(suite_run.items[1].status, SuiteRunItemStatus::Completed);
        assert_eq!(
            suite_run.narrative.as_ref().unwrap().verbosity,
            NarrativeVerbosity::Executive
        );
        assert!(suite_run.risk_map.is_some());
    }

    #[tokio::test]
    async fn test_bundle_rehearsal_stops_at_gate() {
        let bundle: Bundle = serde_yaml::from_str(BUNDLE).unwrap();
        let orchestrator = Orchestrator::in_memory();

        let err = run_bundle(&orchestrator, bundle, "default", false, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--auto-approve"));
    }

    #[tokio::test]
    async fn test_unknown_scenario_reference() {
        let mut bundle: Bundle = serde_yaml::from_str(BUNDLE).unwrap();
        bundle.suite.items[0].scenario = "Missing".to_string();
        let orchestrator = Orchestrator::in_memory();

        let err = run_bundle(&orchestrator, bundle, "default", true, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown scenario 'Missing'"));
    }
}
