//! Playbook definitions and loading.
//!
//! Playbooks are defined in YAML (or created through the orchestrator)
//! and consist of positioned steps. Each step carries a typed config
//! selected by its `type` tag.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::RiskLevel;
use crate::error::ConfigError;

/// A complete playbook definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Owning organization
    #[serde(default)]
    pub org_id: String,

    /// Playbook name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Bumped whenever a new step set is created from this playbook
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub status: PlaybookStatus,

    /// Steps in position order
    pub steps: Vec<StepDefinition>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl PlaybookDefinition {
    /// Create a draft playbook
    pub fn new(org_id: impl Into<String>, name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            org_id: org_id.into(),
            name: name.into(),
            description: String::new(),
            version: 1,
            status: PlaybookStatus::Draft,
            steps,
            created_at: now,
            updated_at: now,
        }
    }

    /// Load a playbook from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read playbook file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a playbook from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse playbook YAML")
    }

    /// Get a step by key
    pub fn get_step(&self, key: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.key == key)
    }

    /// Get the index of a step by key
    pub fn step_index(&self, key: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.key == key)
    }

    pub fn is_active(&self) -> bool {
        self.status == PlaybookStatus::Active
    }
}

/// Playbook lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybookStatus {
    Draft,
    Active,
    Archived,
}

impl Default for PlaybookStatus {
    fn default() -> Self {
        Self::Draft
    }
}

/// A single step in a playbook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step key (unique within playbook)
    pub key: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Zero-based position; must equal the step's index in the list
    pub position: usize,

    /// Typed, per-step-type configuration
    #[serde(flatten)]
    pub config: StepConfig,

    /// Linear continuation
    #[serde(default)]
    pub next_step_key: Option<String>,

    /// Block on a human decision before executing
    #[serde(default)]
    pub requires_approval: bool,

    /// Present only on retryable steps
    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    /// Override of the default step timeout
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl StepDefinition {
    /// An agent action step with default settings
    pub fn agent_action(
        key: impl Into<String>,
        position: usize,
        role: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            position,
            config: StepConfig::AgentAction(AgentActionConfig {
                role: role.into(),
                instruction: instruction.into(),
                expected_outputs: Vec::new(),
            }),
            next_step_key: None,
            requires_approval: false,
            retry: None,
            timeout_seconds: None,
        }
    }

    /// Set the linear continuation
    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next_step_key = Some(next.into());
        self
    }

    /// Gate this step behind human approval
    pub fn gated(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    /// Make this step retryable
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Every step key this step can continue to, linear first
    pub fn referenced_keys(&self) -> impl Iterator<Item = &str> {
        let branch_targets = match &self.config {
            StepConfig::Branch(branch) => branch.conditions.as_slice(),
            _ => &[],
        };
        self.next_step_key
            .as_deref()
            .into_iter()
            .chain(branch_targets.iter().map(|c| c.next_step_key.as_str()))
    }

    /// Get the effective timeout for this step
    pub fn timeout(&self, default_seconds: u64) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(default_seconds))
    }
}

/// Per-type step configuration, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    AgentAction(AgentActionConfig),
    DataTransform(DataTransformConfig),
    Branch(BranchConfig),
}

impl StepConfig {
    /// The `type` tag
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::AgentAction(_) => "agent_action",
            Self::DataTransform(_) => "data_transform",
            Self::Branch(_) => "branch",
        }
    }

    /// The capability implementation selected by the tag
    pub fn capability(&self) -> &dyn StepCapability {
        match self {
            Self::AgentAction(c) => c,
            Self::DataTransform(c) => c,
            Self::Branch(c) => c,
        }
    }
}

/// Behaviour every step type provides.
///
/// Execution itself is delegated to an `ActionExecutor`; this trait
/// covers what the orchestrator needs to know before handing it over.
pub trait StepCapability {
    /// Check the config against this type's schema
    fn validate(&self) -> Result<(), ConfigError>;

    /// One-line description for logs and audit payloads
    fn describe(&self) -> String;
}

/// Ask an agent in a given role to act
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentActionConfig {
    pub role: String,
    pub instruction: String,
    #[serde(default)]
    pub expected_outputs: Vec<String>,
}

impl StepCapability for AgentActionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.role.trim().is_empty() {
            return Err(ConfigError::new("agent_action", "role must not be empty"));
        }
        if self.instruction.trim().is_empty() {
            return Err(ConfigError::new("agent_action", "instruction must not be empty"));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} acts: {}", self.role, self.instruction)
    }
}

/// Reshape data produced by earlier steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransformConfig {
    pub operation: TransformOp,

    /// Keys of earlier steps (or scenario parameters) to read
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Name under which the result is published
    pub output_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformOp {
    Extract,
    Merge,
    Filter,
    Summarize,
}

impl StepCapability for DataTransformConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.output_key.trim().is_empty() {
            return Err(ConfigError::new("data_transform", "output_key must not be empty"));
        }
        if self.operation == TransformOp::Merge && self.inputs.len() < 2 {
            return Err(ConfigError::new(
                "data_transform",
                "merge needs at least two inputs",
            ));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "{:?} [{}] -> {}",
            self.operation,
            self.inputs.join(", "),
            self.output_key
        )
    }
}

/// Choose the continuation from the branch step's own outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchConfig {
    /// Checked in order; the first match wins
    pub conditions: Vec<BranchCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCondition {
    pub when: BranchPredicate,
    pub next_step_key: String,
}

/// Predicate over a branch step's outcome payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BranchPredicate {
    /// `payload[field] == value`
    Equals {
        field: String,
        value: serde_json::Value,
    },

    /// `payload[field]` is present and not null
    Exists { field: String },

    /// Outcome risk score buckets to at least `level`
    RiskAtLeast { level: RiskLevel },

    /// Always matches
    Otherwise,
}

impl BranchPredicate {
    pub fn matches(&self, payload: &serde_json::Value, risk_score: Option<f64>) -> bool {
        match self {
            Self::Equals { field, value } => payload.get(field) == Some(value),
            Self::Exists { field } => payload.get(field).map(|v| !v.is_null()).unwrap_or(false),
            Self::RiskAtLeast { level } => risk_score
                .map(|s| RiskLevel::from_score(s) >= *level)
                .unwrap_or(false),
            Self::Otherwise => true,
        }
    }
}

impl StepCapability for BranchConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.conditions.is_empty() {
            return Err(ConfigError::new("branch", "at least one condition is required"));
        }
        for condition in &self.conditions {
            match &condition.when {
                BranchPredicate::Equals { field, .. } | BranchPredicate::Exists { field }
                    if field.trim().is_empty() =>
                {
                    return Err(ConfigError::new("branch", "condition field must not be empty"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        let targets: Vec<&str> = self
            .conditions
            .iter()
            .map(|c| c.next_step_key.as_str())
            .collect();
        format!("branch to one of [{}]", targets.join(", "))
    }
}

/// Retry policy for retryable steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::new("retry", "max_attempts must be at least 1"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::new("retry", "backoff_multiplier must be >= 1.0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INCIDENT_PLAYBOOK_YAML: &str = r#"
name: incident
description: Data exposure response

steps:
  - key: assess
    name: Assess exposure
    position: 0
    type: agent_action
    role: analyst
    instruction: Assess the blast radius
    next_step_key: triage

  - key: triage
    position: 1
    type: branch
    conditions:
      - when: { kind: risk_at_least, level: high }
        next_step_key: escalate
      - when: { kind: otherwise }
        next_step_key: notify

  - key: notify
    position: 2
    type: data_transform
    operation: summarize
    inputs: [assess]
    output_key: notice

  - key: escalate
    position: 3
    type: agent_action
    role: ciso
    instruction: Brief the board
    requires_approval: true
    retry:
      max_attempts: 2
"#;

    #[test]
    fn test_playbook_parsing() {
        let playbook = PlaybookDefinition::from_yaml(INCIDENT_PLAYBOOK_YAML).unwrap();

        assert_eq!(playbook.name, "incident");
        assert_eq!(playbook.version, 1);
        assert_eq!(playbook.status, PlaybookStatus::Draft);
        assert_eq!(playbook.steps.len(), 4);
        assert_eq!(playbook.steps[1].config.type_tag(), "branch");

        let escalate = playbook.get_step("escalate").unwrap();
        assert!(escalate.requires_approval);
        assert_eq!(escalate.retry.as_ref().unwrap().max_attempts, 2);
        assert_eq!(escalate.retry.as_ref().unwrap().initial_delay_ms, 1000);
    }

    #[test]
    fn test_referenced_keys_include_branch_targets() {
        let playbook = PlaybookDefinition::from_yaml(INCIDENT_PLAYBOOK_YAML).unwrap();

        let assess: Vec<&str> = playbook.steps[0].referenced_keys().collect();
        assert_eq!(assess, vec!["triage"]);

        let triage: Vec<&str> = playbook.steps[1].referenced_keys().collect();
        assert_eq!(triage, vec!["escalate", "notify"]);
    }

    #[test]
    fn test_capability_validation() {
        let bad = StepConfig::AgentAction(AgentActionConfig {
            role: " ".to_string(),
            instruction: "do it".to_string(),
            expected_outputs: Vec::new(),
        });
        assert!(bad.capability().validate().is_err());

        let merge = DataTransformConfig {
            operation: TransformOp::Merge,
            inputs: vec!["a".to_string()],
            output_key: "merged".to_string(),
        };
        assert!(merge.validate().is_err());

        let branch = BranchConfig { conditions: Vec::new() };
        assert!(branch.validate().is_err());
    }

    #[test]
    fn test_branch_predicates() {
        let payload = serde_json::json!({ "severity": "high", "ticket": null });

        let equals = BranchPredicate::Equals {
            field: "severity".to_string(),
            value: serde_json::json!("high"),
        };
        assert!(equals.matches(&payload, None));

        let exists = BranchPredicate::Exists { field: "ticket".to_string() };
        assert!(!exists.matches(&payload, None));

        let risky = BranchPredicate::RiskAtLeast { level: RiskLevel::High };
        assert!(risky.matches(&payload, Some(0.8)));
        assert!(!risky.matches(&payload, Some(0.3)));
        assert!(!risky.matches(&payload, None));
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10000)); // Capped
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
