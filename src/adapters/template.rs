//! Deterministic template-based synthesizer.
//!
//! Builds narratives and risk maps purely from aggregated outcomes. No
//! text generation is involved; the output is stable for a given input.

use std::fmt::Write as _;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::domain::{
    NarrativeDocument, NarrativeVerbosity, OpportunityEntry, OutcomeClass, RiskEntry, RiskLevel,
    RiskMap,
};

use super::{SynthesisContext, Synthesizer};

/// Synthesizer that fills fixed templates
#[derive(Debug, Default, Clone)]
pub struct TemplateSynthesizer;

impl TemplateSynthesizer {
    pub fn new() -> Self {
        Self
    }
}

fn highest_risk(context: &SynthesisContext) -> RiskLevel {
    context
        .outcomes
        .iter()
        .map(|o| o.risk_level)
        .max()
        .unwrap_or_default()
}

fn count(context: &SynthesisContext, class: OutcomeClass) -> usize {
    context.outcomes.iter().filter(|o| o.outcome == class).count()
}

fn headline(context: &SynthesisContext) -> String {
    format!(
        "{} scenario(s) executed: {} succeeded, {} partial, {} failed. Highest risk observed: {}.",
        context.outcomes.len(),
        count(context, OutcomeClass::Success),
        count(context, OutcomeClass::Partial),
        count(context, OutcomeClass::Failure),
        highest_risk(context)
    )
}

fn recommendations(context: &SynthesisContext) -> Vec<String> {
    let mut recs = Vec::new();
    for outcome in &context.outcomes {
        if outcome.outcome == OutcomeClass::Failure {
            recs.push(format!("Review the failure in '{}' before re-running", outcome.name));
        }
        if outcome.risk_level >= RiskLevel::High {
            recs.push(format!(
                "Prioritize mitigation for '{}' ({} risk)",
                outcome.name, outcome.risk_level
            ));
        }
    }
    if recs.is_empty() {
        recs.push("Maintain current controls; no elevated risks were observed".to_string());
    }
    recs
}

#[async_trait]
impl Synthesizer for TemplateSynthesizer {
    fn name(&self) -> &str {
        "template"
    }

    async fn narrative(
        &self,
        context: &SynthesisContext,
        verbosity: NarrativeVerbosity,
        include_recommendations: bool,
    ) -> Result<NarrativeDocument> {
        let mut body = String::new();

        match verbosity {
            NarrativeVerbosity::Summary => {
                body.push_str(&headline(context));
            }
            NarrativeVerbosity::Detailed => {
                body.push_str(&headline(context));
                for outcome in &context.outcomes {
                    write!(
                        body,
                        "\n\n## {}\nOutcome: {}. Risk: {}.\n{}",
                        outcome.name, outcome.outcome, outcome.risk_level, outcome.summary
                    )?;
                    if let Some(item) = context.findings.iter().find(|f| f.name == outcome.name) {
                        for finding in &item.findings {
                            write!(body, "\n- {finding}")?;
                        }
                    }
                }
            }
            NarrativeVerbosity::Executive => {
                let attention: Vec<&str> = context
                    .outcomes
                    .iter()
                    .filter(|o| o.risk_level >= RiskLevel::High || o.outcome == OutcomeClass::Failure)
                    .map(|o| o.name.as_str())
                    .collect();
                write!(
                    body,
                    "Headline: {}\nRisk posture: {}.",
                    headline(context),
                    highest_risk(context)
                )?;
                if attention.is_empty() {
                    body.push_str("\nNo scenario requires leadership attention.");
                } else {
                    write!(body, "\nRequires attention: {}.", attention.join(", "))?;
                }
            }
        }

        Ok(NarrativeDocument {
            verbosity,
            title: format!("{} ({})", context.suite_name, context.status),
            body,
            recommendations: if include_recommendations {
                recommendations(context)
            } else {
                Vec::new()
            },
            generated_at: Utc::now(),
        })
    }

    async fn risk_map(
        &self,
        context: &SynthesisContext,
        include_opportunities: bool,
    ) -> Result<RiskMap> {
        let risks = context
            .outcomes
            .iter()
            .filter(|o| o.risk_level >= RiskLevel::Medium || o.outcome == OutcomeClass::Failure)
            .map(|o| {
                let severity = if o.outcome == OutcomeClass::Failure {
                    o.risk_level.max(RiskLevel::High)
                } else {
                    o.risk_level
                };
                RiskEntry {
                    category: o.name.clone(),
                    severity,
                    description: o.summary.clone(),
                    mitigation: (severity >= RiskLevel::High)
                        .then(|| format!("Assign an owner and rehearse '{}' again", o.name)),
                }
            })
            .collect();

        let opportunities = if include_opportunities {
            context
                .outcomes
                .iter()
                .filter(|o| {
                    matches!(o.outcome, OutcomeClass::Success | OutcomeClass::Partial)
                        && o.risk_level <= RiskLevel::Medium
                })
                .map(|o| OpportunityEntry {
                    category: o.name.clone(),
                    description: format!("Response to '{}' held up under rehearsal", o.name),
                    potential: context
                        .findings
                        .iter()
                        .find(|f| f.name == o.name)
                        .and_then(|f| f.findings.first().cloned()),
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(RiskMap {
            risks,
            opportunities,
            generated_at: Some(Utc::now()),
        })
    }
}
