//! Artifacts produced by the outcome aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::OutcomeClass;
use super::scenario::RiskLevel;

/// Summary of one executed suite item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedOutcome {
    pub name: String,
    pub outcome: OutcomeClass,
    pub summary: String,
    pub risk_level: RiskLevel,
}

/// How much detail a generated narrative carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeVerbosity {
    /// A few sentences
    Summary,

    /// One section per executed item
    Detailed,

    /// Headline plus risk posture, for leadership
    Executive,
}

impl Default for NarrativeVerbosity {
    fn default() -> Self {
        Self::Summary
    }
}

/// Narrative document synthesized from aggregated outcomes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeDocument {
    pub verbosity: NarrativeVerbosity,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Risks and opportunities synthesized from aggregated outcomes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskMap {
    pub risks: Vec<RiskEntry>,
    #[serde(default)]
    pub opportunities: Vec<OpportunityEntry>,
    pub generated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEntry {
    pub category: String,
    pub severity: RiskLevel,
    pub description: String,
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityEntry {
    pub category: String,
    pub description: String,
    pub potential: Option<String>,
}
