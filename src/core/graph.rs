//! Structural validation of a playbook's step graph.
//!
//! Validation is pure: it inspects the step list and reports the first
//! structural problem found. It runs before a playbook is activated and
//! again before any run is started from it.

use std::collections::HashSet;

use crate::error::{GraphError, OrchestratorError};

use super::playbook::{PlaybookDefinition, StepDefinition};

/// Validate the step list as a well-formed graph.
///
/// Checks, in order: non-empty, unique keys, positions equal to list
/// index, every linear and branch `next_step_key` resolves.
pub fn validate_steps(steps: &[StepDefinition]) -> Result<(), GraphError> {
    if steps.is_empty() {
        return Err(GraphError::EmptyPlaybook);
    }

    let mut keys: HashSet<&str> = HashSet::with_capacity(steps.len());
    for step in steps {
        if !keys.insert(step.key.as_str()) {
            return Err(GraphError::DuplicateStepKey {
                key: step.key.clone(),
            });
        }
    }

    for (index, step) in steps.iter().enumerate() {
        if step.position != index {
            return Err(GraphError::NonSequentialPosition {
                key: step.key.clone(),
                expected: index,
                found: step.position,
            });
        }
    }

    for step in steps {
        if let Some(missing) = step.referenced_keys().find(|k| !keys.contains(k)) {
            return Err(GraphError::DanglingReference {
                step: step.key.clone(),
                missing: missing.to_string(),
            });
        }
    }

    Ok(())
}

/// Full pre-activation check: graph shape, then every step's typed config.
pub fn validate_playbook(playbook: &PlaybookDefinition) -> Result<(), OrchestratorError> {
    validate_definitions(&playbook.steps)
}

/// Graph shape plus per-step config and retry checks for a bare step list
pub fn validate_definitions(steps: &[StepDefinition]) -> Result<(), OrchestratorError> {
    validate_steps(steps)?;

    for step in steps {
        step.config
            .capability()
            .validate()
            .map_err(|e| e.owned_by(step.key.clone()))?;

        if let Some(ref retry) = step.retry {
            retry.validate().map_err(|e| e.owned_by(step.key.clone()))?;
        }
    }

    Ok(())
}

/// Index of the step named `key`, if present
pub fn resolve_index(steps: &[StepDefinition], key: &str) -> Option<usize> {
    steps.iter().position(|s| s.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::playbook::{BranchCondition, BranchConfig, BranchPredicate, StepConfig};

    fn step(key: &str, position: usize) -> StepDefinition {
        StepDefinition::agent_action(key, position, "analyst", "review")
    }

    #[test]
    fn test_valid_linear_graph() {
        let steps = vec![step("assess", 0).then("notify"), step("notify", 1)];
        assert!(validate_steps(&steps).is_ok());
    }

    #[test]
    fn test_empty_playbook() {
        assert_eq!(validate_steps(&[]), Err(GraphError::EmptyPlaybook));
    }

    #[test]
    fn test_duplicate_key_reported_before_positions() {
        // Positions are also wrong; the duplicate check runs first
        let steps = vec![step("a", 0), step("a", 7)];
        assert_eq!(
            validate_steps(&steps),
            Err(GraphError::DuplicateStepKey { key: "a".to_string() })
        );
    }

    #[test]
    fn test_gap_in_positions() {
        let steps = vec![step("a", 0), step("b", 5)];
        assert_eq!(
            validate_steps(&steps),
            Err(GraphError::NonSequentialPosition {
                key: "b".to_string(),
                expected: 1,
                found: 5,
            })
        );
    }

    #[test]
    fn test_dangling_branch_target() {
        let mut triage = step("triage", 1);
        triage.config = StepConfig::Branch(BranchConfig {
            conditions: vec![BranchCondition {
                when: BranchPredicate::Otherwise,
                next_step_key: "escalate".to_string(),
            }],
        });
        let steps = vec![step("assess", 0).then("triage"), triage];

        assert_eq!(
            validate_steps(&steps),
            Err(GraphError::DanglingReference {
                step: "triage".to_string(),
                missing: "escalate".to_string(),
            })
        );
    }

    #[test]
    fn test_config_errors_name_the_step() {
        let mut bad = step("assess", 0);
        bad.config = StepConfig::Branch(BranchConfig { conditions: Vec::new() });
        let playbook = PlaybookDefinition::new("acme", "broken", vec![bad]);

        let err = validate_playbook(&playbook).unwrap_err();
        assert!(err.is_structural());
        assert!(err.to_string().contains("'assess'"));
    }
}
