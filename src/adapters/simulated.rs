//! Deterministic in-process executor.
//!
//! Produces outcomes derived from the step config and scenario parameters
//! so suites can be rehearsed without any external service. Recognized
//! scenario parameters:
//! - `risk_score` / `opportunity_score` / `sentiment`: numbers echoed on
//!   every outcome
//! - `fail_steps`: list of step keys whose execution always fails

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::playbook::{StepConfig, TransformOp};
use crate::domain::StepOutcome;

use super::{ActionExecutor, ActionRequest};

/// Executor that simulates actions locally
#[derive(Default)]
pub struct SimulatedExecutor {
    /// Remaining injected failures per step key
    flaky: Mutex<HashMap<String, u32>>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `times` executions of `step_key`
    pub fn with_transient_failures(self, step_key: impl Into<String>, times: u32) -> Self {
        if let Ok(mut flaky) = self.flaky.lock() {
            flaky.insert(step_key.into(), times);
        }
        self
    }

    fn take_injected_failure(&self, step_key: &str) -> bool {
        let Ok(mut flaky) = self.flaky.lock() else {
            return false;
        };
        match flaky.get_mut(step_key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

fn number(parameters: &serde_json::Map<String, Value>, key: &str) -> Option<f64> {
    parameters.get(key).and_then(Value::as_f64)
}

fn always_fails(request: &ActionRequest) -> bool {
    request
        .parameters
        .get("fail_steps")
        .and_then(Value::as_array)
        .map(|keys| keys.iter().any(|k| k.as_str() == Some(request.step_key.as_str())))
        .unwrap_or(false)
}

#[async_trait]
impl ActionExecutor for SimulatedExecutor {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn execute(&self, request: &ActionRequest, _timeout: Duration) -> Result<StepOutcome> {
        let started = Instant::now();

        if always_fails(request) || self.take_injected_failure(&request.step_key) {
            anyhow::bail!(
                "Simulated failure in step '{}' (attempt {})",
                request.step_key,
                request.attempt
            );
        }

        let mut outcome = StepOutcome {
            risk_score: number(&request.parameters, "risk_score"),
            opportunity_score: number(&request.parameters, "opportunity_score"),
            sentiment: number(&request.parameters, "sentiment"),
            ..Default::default()
        };

        match &request.config {
            StepConfig::AgentAction(action) => {
                outcome.summary = format!("{} responded to '{}'", action.role, action.instruction);
                outcome.payload = json!({
                    "role": action.role,
                    "response": format!("Acknowledged: {}", action.instruction),
                    "outputs": action.expected_outputs,
                });
                outcome.tokens_used = 10 * action.instruction.split_whitespace().count() as u64;
                outcome.responding_roles = vec![action.role.clone()];
            }
            StepConfig::DataTransform(transform) => {
                let gathered: serde_json::Map<String, Value> = transform
                    .inputs
                    .iter()
                    .filter_map(|key| {
                        request
                            .prior_outputs
                            .get(key)
                            .or_else(|| request.parameters.get(key))
                            .map(|v| (key.clone(), v.clone()))
                    })
                    .collect();
                let result = match transform.operation {
                    TransformOp::Summarize => json!(format!("{} inputs summarized", gathered.len())),
                    _ => Value::Object(gathered.clone()),
                };
                outcome.summary = format!(
                    "{:?} of {} input(s) published as '{}'",
                    transform.operation,
                    gathered.len(),
                    transform.output_key
                );
                let mut published = serde_json::Map::new();
                published.insert(transform.output_key.clone(), result);
                outcome.payload = Value::Object(published);
            }
            StepConfig::Branch(_) => {
                outcome.summary = format!("Branch '{}' evaluated", request.step_key);
                outcome.payload = Value::Object(request.parameters.clone());
            }
        }

        outcome.duration_ms = started.elapsed().as_millis() as u64;
        Ok(outcome)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::playbook::{AgentActionConfig, DataTransformConfig};
    use uuid::Uuid;

    fn request(step_key: &str, config: StepConfig) -> ActionRequest {
        ActionRequest {
            run_id: Uuid::new_v4(),
            scenario_id: Uuid::new_v4(),
            step_key: step_key.to_string(),
            step_name: step_key.to_string(),
            config,
            parameters: serde_json::Map::new(),
            prior_outputs: serde_json::Map::new(),
            attempt: 1,
        }
    }

    fn agent() -> StepConfig {
        StepConfig::AgentAction(AgentActionConfig {
            role: "analyst".to_string(),
            instruction: "Assess the blast radius".to_string(),
            expected_outputs: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_agent_action_outcome() {
        let executor = SimulatedExecutor::new();
        let mut req = request("assess", agent());
        req.parameters.insert("risk_score".to_string(), json!(0.6));

        let outcome = executor.execute(&req, Duration::from_secs(1)).await.unwrap();

        assert_eq!(outcome.responding_roles, vec!["analyst"]);
        assert_eq!(outcome.risk_score, Some(0.6));
        assert_eq!(outcome.tokens_used, 40);
        assert!(outcome.summary.contains("analyst"));
    }

    #[tokio::test]
    async fn test_transform_reads_prior_outputs() {
        let executor = SimulatedExecutor::new();
        let mut req = request(
            "merge",
            StepConfig::DataTransform(DataTransformConfig {
                operation: TransformOp::Merge,
                inputs: vec!["assess".to_string(), "region".to_string()],
                output_key: "brief".to_string(),
            }),
        );
        req.prior_outputs.insert("assess".to_string(), json!({ "ok": true }));
        req.parameters.insert("region".to_string(), json!("eu"));

        let outcome = executor.execute(&req, Duration::from_secs(1)).await.unwrap();

        assert_eq!(outcome.payload["brief"]["assess"]["ok"], true);
        assert_eq!(outcome.payload["brief"]["region"], "eu");
    }

    #[tokio::test]
    async fn test_transient_failures_run_out() {
        let executor = SimulatedExecutor::new().with_transient_failures("assess", 1);
        let req = request("assess", agent());

        assert!(executor.execute(&req, Duration::from_secs(1)).await.is_err());
        assert!(executor.execute(&req, Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_steps_parameter() {
        let executor = SimulatedExecutor::new();
        let mut req = request("assess", agent());
        req.parameters.insert("fail_steps".to_string(), json!(["assess"]));

        let err = executor.execute(&req, Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("assess"));
    }
}
