//! Step Graph Integration Tests
//!
//! Structural validation of playbooks: keys, positions, references.

use scenarist::core::{
    validate_playbook, validate_steps, BranchCondition, BranchConfig, BranchPredicate,
    PlaybookDefinition, RetryPolicy, StepConfig, StepDefinition,
};
use scenarist::domain::RiskLevel;
use scenarist::error::{GraphError, OrchestratorError};
use scenarist::Orchestrator;

fn step(key: &str, position: usize) -> StepDefinition {
    StepDefinition::agent_action(key, position, "analyst", format!("Handle {}", key))
}

#[test]
fn test_assess_notify_playbook_is_valid() {
    let steps = vec![step("assess", 0).then("notify"), step("notify", 1)];
    assert!(validate_steps(&steps).is_ok());

    let playbook = PlaybookDefinition::new("acme", "Breach", steps);
    assert!(validate_playbook(&playbook).is_ok());
}

#[test]
fn test_duplicate_keys_rejected_regardless_of_positions() {
    // Correct positions
    let steps = vec![step("assess", 0), step("assess", 1)];
    assert_eq!(
        validate_steps(&steps),
        Err(GraphError::DuplicateStepKey {
            key: "assess".to_string()
        })
    );

    // Broken positions too: duplicates are still what gets reported
    let steps = vec![step("assess", 3), step("assess", 7)];
    assert!(matches!(
        validate_steps(&steps),
        Err(GraphError::DuplicateStepKey { .. })
    ));
}

#[test]
fn test_dangling_linear_reference_rejected() {
    let steps = vec![step("assess", 0).then("escalate"), step("notify", 1)];

    match validate_steps(&steps) {
        Err(GraphError::DanglingReference { step, missing }) => {
            assert_eq!(step, "assess");
            assert_eq!(missing, "escalate");
        }
        other => panic!("Expected DanglingReference, got {:?}", other),
    }
}

#[test]
fn test_dangling_branch_reference_rejected() {
    let mut triage = step("triage", 0);
    triage.config = StepConfig::Branch(BranchConfig {
        conditions: vec![
            BranchCondition {
                when: BranchPredicate::RiskAtLeast {
                    level: RiskLevel::High,
                },
                next_step_key: "escalate".to_string(),
            },
            BranchCondition {
                when: BranchPredicate::Otherwise,
                next_step_key: "close".to_string(),
            },
        ],
    });
    let steps = vec![triage, step("close", 1)];

    assert_eq!(
        validate_steps(&steps),
        Err(GraphError::DanglingReference {
            step: "triage".to_string(),
            missing: "escalate".to_string(),
        })
    );
}

#[test]
fn test_positions_must_equal_index() {
    let steps = vec![step("assess", 0), step("notify", 5)];

    assert_eq!(
        validate_steps(&steps),
        Err(GraphError::NonSequentialPosition {
            key: "notify".to_string(),
            expected: 1,
            found: 5,
        })
    );
}

#[test]
fn test_empty_playbook_rejected() {
    assert_eq!(validate_steps(&[]), Err(GraphError::EmptyPlaybook));
}

#[test]
fn test_step_configs_checked_after_shape() {
    let bad_retry = step("assess", 0).with_retry(RetryPolicy {
        max_attempts: 0,
        ..Default::default()
    });
    let playbook = PlaybookDefinition::new("acme", "Breach", vec![bad_retry]);

    let err = validate_playbook(&playbook).unwrap_err();
    assert!(err.is_structural());
    match err {
        OrchestratorError::InvalidConfig(config) => {
            assert_eq!(config.owner.as_deref(), Some("assess"));
        }
        other => panic!("Expected InvalidConfig, got {:?}", other),
    }
}

#[test]
fn test_playbook_from_yaml() {
    let yaml = r#"
name: Breach response
description: Contain, assess and notify

steps:
  - key: contain
    position: 0
    type: agent_action
    role: responder
    instruction: Isolate affected hosts
    retry:
      max_attempts: 2
  - key: triage
    position: 1
    type: branch
    conditions:
      - when: { kind: risk_at_least, level: high }
        next_step_key: notify
      - when: { kind: otherwise }
        next_step_key: close
  - key: notify
    position: 2
    type: agent_action
    role: comms
    instruction: Notify the regulator
    requires_approval: true
    next_step_key: close
  - key: close
    position: 3
    type: data_transform
    operation: summarize
    inputs: [contain, notify]
    output_key: report
"#;

    let playbook = PlaybookDefinition::from_yaml(yaml).unwrap();
    assert_eq!(playbook.steps.len(), 4);
    assert_eq!(playbook.steps[1].config.type_tag(), "branch");
    assert!(playbook.steps[2].requires_approval);
    assert_eq!(playbook.steps[0].retry.as_ref().unwrap().max_attempts, 2);
    assert!(validate_playbook(&playbook).is_ok());
}

#[tokio::test]
async fn test_invalid_playbook_is_never_persisted() {
    let orchestrator = Orchestrator::in_memory();
    let playbook = PlaybookDefinition::new("acme", "Broken", vec![step("a", 0), step("a", 1)]);
    let id = playbook.id;

    let err = orchestrator.create_playbook(playbook, "tester").await.unwrap_err();
    assert!(err.is_structural());
    assert!(orchestrator.list_playbooks("acme").await.unwrap().is_empty());
    assert!(orchestrator.list_audit_events(id).await.unwrap().is_empty());

    assert!(orchestrator
        .validate_playbook_steps(&[step("a", 0), step("b", 1)])
        .is_ok());
}
