//! Audit Log Integration Tests
//!
//! Every orchestrator mutation lands in the JSONL audit log with a
//! chained digest; events are retrievable by subject or enclosing entity.

use std::sync::Arc;

use tempfile::TempDir;

use scenarist::adapters::{SimulatedExecutor, TemplateSynthesizer};
use scenarist::core::{
    AuditSink, ChainStatus, JsonlAuditLog, PlaybookDefinition, ScenarioSuite, StepDefinition,
    TriggerCondition,
};
use scenarist::domain::{AuditAction, EntityKind, Scenario};
use scenarist::{MemoryStore, Orchestrator};

const ACTOR: &str = "auditor";

async fn orchestrator_with_log(temp: &TempDir) -> (Orchestrator, Arc<JsonlAuditLog>) {
    let log = Arc::new(
        JsonlAuditLog::open(temp.path().join("state").join("audit.jsonl"))
            .await
            .unwrap(),
    );
    let orchestrator = Orchestrator::new(
        Arc::new(MemoryStore::new()),
        log.clone(),
        Arc::new(SimulatedExecutor::new()),
        Arc::new(TemplateSynthesizer::new()),
    );
    (orchestrator, log)
}

async fn rehearse(orchestrator: &Orchestrator) -> (uuid::Uuid, uuid::Uuid, uuid::Uuid) {
    let steps = vec![
        StepDefinition::agent_action("assess", 0, "analyst", "Assess").then("notify"),
        StepDefinition::agent_action("notify", 1, "comms", "Notify"),
    ];
    let playbook = orchestrator
        .create_playbook(PlaybookDefinition::new("acme", "Breach", steps), ACTOR)
        .await
        .unwrap();
    orchestrator.activate_playbook(playbook.id, ACTOR).await.unwrap();
    let scenario = orchestrator
        .create_scenario(Scenario::new("acme", "Ransomware", playbook.id), ACTOR)
        .await
        .unwrap();

    let suite = ScenarioSuite::new("acme", "Chain").with_item(scenario.id, "Contain", TriggerCondition::Always);
    let suite = orchestrator.create_suite(suite, ACTOR).await.unwrap();
    let mut suite_run = orchestrator.start_suite_run(suite.id, ACTOR).await.unwrap();
    while !suite_run.is_terminal() {
        suite_run = orchestrator
            .advance_suite_run(suite_run.id, false, ACTOR)
            .await
            .unwrap();
    }
    (scenario.id, suite.id, suite_run.id)
}

#[tokio::test]
async fn test_mutations_are_logged_in_order() {
    let temp = TempDir::new().unwrap();
    let (orchestrator, log) = orchestrator_with_log(&temp).await;
    let (_, _, _) = rehearse(&orchestrator).await;

    let events = log.replay().await.unwrap();
    let actions: Vec<(EntityKind, AuditAction)> = events
        .iter()
        .map(|e| (e.subject.kind, e.action))
        .collect();

    assert_eq!(
        actions,
        vec![
            (EntityKind::Playbook, AuditAction::Created),
            (EntityKind::Playbook, AuditAction::Activated),
            (EntityKind::Scenario, AuditAction::Created),
            (EntityKind::Suite, AuditAction::Created),
            (EntityKind::SuiteRun, AuditAction::Started),
            (EntityKind::ScenarioRun, AuditAction::Started),
            (EntityKind::ScenarioRun, AuditAction::Completed),
            (EntityKind::SuiteRun, AuditAction::Completed),
        ]
    );
    assert!(events.iter().all(|e| e.actor == ACTOR && e.org_id == "acme"));
    assert!(events.iter().all(|e| e.digest.is_some()));
}

#[tokio::test]
async fn test_suite_run_events_include_its_runs() {
    let temp = TempDir::new().unwrap();
    let (orchestrator, _log) = orchestrator_with_log(&temp).await;
    let (scenario_id, suite_id, suite_run_id) = rehearse(&orchestrator).await;

    let for_suite_run = orchestrator.list_audit_events(suite_run_id).await.unwrap();
    assert_eq!(for_suite_run.len(), 4);
    assert!(for_suite_run
        .iter()
        .any(|e| e.subject.kind == EntityKind::ScenarioRun && e.action == AuditAction::Completed));

    // Runs are scoped to their scenario too
    let for_scenario = orchestrator.list_audit_events(scenario_id).await.unwrap();
    assert_eq!(for_scenario.len(), 3);

    // Suite runs are scoped to their suite; runs only to the suite run
    let for_suite = orchestrator.list_audit_events(suite_id).await.unwrap();
    assert_eq!(for_suite.len(), 3);
}

#[tokio::test]
async fn test_rejected_operations_leave_no_event() {
    let temp = TempDir::new().unwrap();
    let (orchestrator, log) = orchestrator_with_log(&temp).await;

    let steps = vec![StepDefinition::agent_action("assess", 0, "analyst", "Assess").then("missing")];
    assert!(orchestrator
        .create_playbook(PlaybookDefinition::new("acme", "Broken", steps), ACTOR)
        .await
        .is_err());
    assert!(orchestrator
        .start_run(uuid::Uuid::new_v4(), ACTOR)
        .await
        .is_err());

    assert!(log.replay().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chain_detects_tampering() {
    let temp = TempDir::new().unwrap();
    let (orchestrator, log) = orchestrator_with_log(&temp).await;
    rehearse(&orchestrator).await;

    match log.verify().await.unwrap() {
        ChainStatus::Intact { events } => assert_eq!(events, 8),
        broken => panic!("Expected intact chain, got {:?}", broken),
    }

    let content = std::fs::read_to_string(log.path()).unwrap();
    let tampered = content.replacen("Playbook 'Breach' created", "Playbook 'Benign' created", 1);
    assert_ne!(content, tampered);
    std::fs::write(log.path(), tampered).unwrap();

    let events = log.replay().await.unwrap();
    match log.verify().await.unwrap() {
        ChainStatus::Broken { index, event_id } => {
            assert_eq!(index, 0);
            assert_eq!(event_id, events[0].id);
        }
        intact => panic!("Expected broken chain, got {:?}", intact),
    }
}

#[tokio::test]
async fn test_log_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let (orchestrator, log) = orchestrator_with_log(&temp).await;
    rehearse(&orchestrator).await;

    let reopened = JsonlAuditLog::open(log.path().to_path_buf()).await.unwrap();
    assert_eq!(reopened.replay().await.unwrap().len(), 8);
    assert!(matches!(
        reopened.verify().await.unwrap(),
        ChainStatus::Intact { events: 8 }
    ));
}
