//! Scenarios bind a playbook to situational context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named binding of a playbook to contextual parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique identifier
    pub id: Uuid,

    /// Owning organization
    pub org_id: String,

    /// Human-readable name
    pub name: String,

    /// Playbook this scenario executes
    pub playbook_id: Uuid,

    /// Free-form contextual parameters handed to every step
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,

    /// Risk level declared when the scenario was created
    #[serde(default)]
    pub baseline_risk: RiskLevel,

    /// Risk level as of the most recent run
    #[serde(default)]
    pub current_risk: RiskLevel,

    /// Lifecycle status
    #[serde(default)]
    pub status: ScenarioStatus,

    /// Number of runs ever started
    #[serde(default)]
    pub run_count: u64,

    /// Runs currently in flight, oldest first
    #[serde(default)]
    pub active_run_ids: Vec<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scenario {
    /// Create a draft scenario for a playbook
    pub fn new(org_id: impl Into<String>, name: impl Into<String>, playbook_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            org_id: org_id.into(),
            name: name.into(),
            playbook_id,
            parameters: serde_json::Map::new(),
            baseline_risk: RiskLevel::Low,
            current_risk: RiskLevel::Low,
            status: ScenarioStatus::Draft,
            run_count: 0,
            active_run_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set a contextual parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Set the baseline risk (also seeds the current risk)
    pub fn with_baseline_risk(mut self, risk: RiskLevel) -> Self {
        self.baseline_risk = risk;
        self.current_risk = risk;
        self
    }

    /// Whether a run for this scenario is in flight
    pub fn has_active_run(&self) -> bool {
        !self.active_run_ids.is_empty()
    }

    /// Most recently started run still in flight
    pub fn latest_active_run(&self) -> Option<Uuid> {
        self.active_run_ids.last().copied()
    }
}

/// Scenario lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Draft,
    Ready,
    InProgress,
    Completed,
}

impl std::fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl Default for ScenarioStatus {
    fn default() -> Self {
        Self::Draft
    }
}

/// Ordered risk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Low
    }
}

impl RiskLevel {
    /// Bucket a 0..=1 score into a level
    pub fn from_score(score: f64) -> Self {
        if score < 0.25 {
            Self::Low
        } else if score < 0.5 {
            Self::Medium
        } else if score < 0.75 {
            Self::High
        } else {
            Self::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!(
            [RiskLevel::Medium, RiskLevel::Critical, RiskLevel::Low]
                .into_iter()
                .max(),
            Some(RiskLevel::Critical)
        );
    }

    #[test]
    fn test_risk_level_from_score() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.3), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.5), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.99), RiskLevel::Critical);
    }

    #[test]
    fn test_scenario_builder() {
        let scenario = Scenario::new("acme", "Data breach", Uuid::new_v4())
            .with_parameter("region", serde_json::json!("eu-west"))
            .with_baseline_risk(RiskLevel::High);

        assert_eq!(scenario.status, ScenarioStatus::Draft);
        assert_eq!(scenario.current_risk, RiskLevel::High);
        assert_eq!(scenario.parameters["region"], "eu-west");
        assert!(!scenario.has_active_run());
    }

    #[test]
    fn test_scenario_status_display() {
        assert_eq!(ScenarioStatus::InProgress.to_string(), "in_progress");
        assert_eq!(ScenarioStatus::Draft.to_string(), "draft");
    }
}
