//! Scenario suite definitions.
//!
//! A suite chains scenario simulations in order; each item carries a
//! trigger condition deciding whether it runs given what ran before it.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::NarrativeVerbosity;
use crate::error::ConfigError;

use super::trigger::TriggerCondition;

/// An ordered chain of scenario simulations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSuite {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    #[serde(default)]
    pub org_id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub status: SuiteStatus,

    /// Ordered by position
    #[serde(default)]
    pub items: Vec<SuiteItem>,

    #[serde(default)]
    pub options: SuiteOptions,

    /// Number of suite runs ever started
    #[serde(default)]
    pub run_count: u64,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl ScenarioSuite {
    pub fn new(org_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            org_id: org_id.into(),
            name: name.into(),
            description: String::new(),
            version: 1,
            status: SuiteStatus::Draft,
            items: Vec::new(),
            options: SuiteOptions::default(),
            run_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append an item at the next position
    pub fn with_item(
        mut self,
        scenario_id: Uuid,
        name: impl Into<String>,
        trigger: TriggerCondition,
    ) -> Self {
        let position = self.items.len();
        self.items.push(SuiteItem::new(scenario_id, name, position, trigger));
        self
    }

    pub fn with_options(mut self, options: SuiteOptions) -> Self {
        self.options = options;
        self
    }

    /// Load a suite from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read suite file: {}", path.display()))?;
        serde_yaml::from_str(&content).context("Failed to parse suite YAML")
    }

    pub fn get_item(&self, id: Uuid) -> Option<&SuiteItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Re-number positions to match list order
    pub fn repack_positions(&mut self) {
        for (index, item) in self.items.iter_mut().enumerate() {
            item.position = index;
        }
    }

    /// Check options and every item's trigger parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.options.validate()?;

        for (index, item) in self.items.iter().enumerate() {
            if item.position != index {
                return Err(ConfigError::new(
                    "suite_item",
                    format!("position {} does not match index {}", item.position, index),
                )
                .owned_by(item.name.clone()));
            }
            item.trigger
                .validate()
                .map_err(|e| e.owned_by(item.name.clone()))?;
        }
        Ok(())
    }

    /// Status implied by the item list alone
    pub fn configured_status(&self) -> SuiteStatus {
        if self.items.is_empty() {
            SuiteStatus::Draft
        } else {
            SuiteStatus::Configured
        }
    }
}

/// Lifecycle status of a suite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteStatus {
    /// No items yet
    Draft,
    /// Has items, ready to run
    Configured,
    /// A suite run is in flight
    Running,
    /// The latest suite run finished
    Completed,
    Archived,
}

impl Default for SuiteStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl std::fmt::Display for SuiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// One member of a suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteItem {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub scenario_id: Uuid,

    pub name: String,

    #[serde(default)]
    pub position: usize,

    #[serde(default)]
    pub trigger: TriggerCondition,
}

impl SuiteItem {
    pub fn new(
        scenario_id: Uuid,
        name: impl Into<String>,
        position: usize,
        trigger: TriggerCondition,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scenario_id,
            name: name.into(),
            position,
            trigger,
        }
    }
}

/// Execution and reporting options of a suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteOptions {
    /// Synthesize a narrative when a suite run ends
    pub generate_narrative: bool,

    /// Synthesize a risk map when a suite run ends
    pub generate_risk_map: bool,

    /// Include opportunities in generated risk maps
    pub include_opportunities: bool,

    /// Fail the suite run as soon as one item fails
    pub stop_on_failure: bool,

    /// Declared cap on parallel items; items always run sequentially
    pub max_concurrent_simulations: u32,

    /// Maximum age of a suite run before advancing fails it
    pub timeout_seconds: Option<u64>,

    pub narrative_verbosity: NarrativeVerbosity,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            generate_narrative: true,
            generate_risk_map: true,
            include_opportunities: true,
            stop_on_failure: false,
            max_concurrent_simulations: 1,
            timeout_seconds: None,
            narrative_verbosity: NarrativeVerbosity::default(),
        }
    }
}

impl SuiteOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_simulations == 0 {
            return Err(ConfigError::new(
                "suite_options",
                "max_concurrent_simulations must be at least 1",
            ));
        }
        if self.timeout_seconds == Some(0) {
            return Err(ConfigError::new("suite_options", "timeout_seconds must be positive"));
        }
        Ok(())
    }
}
