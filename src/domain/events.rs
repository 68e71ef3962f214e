//! Audit events.
//!
//! Every state transition is recorded as an immutable AuditEvent in an
//! append-only log. Events are never mutated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single record in the append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// Organization the subject belongs to
    pub org_id: String,

    /// Entity whose state changed
    pub subject: AuditSubject,

    /// Enclosing entities (scenario of a run, suite of a suite run, ...)
    #[serde(default)]
    pub scope: Vec<Uuid>,

    /// What happened
    pub action: AuditAction,

    /// Who triggered the change
    pub actor: String,

    /// Human-readable summary (NO secrets)
    pub summary: String,

    /// Structured description of what changed
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Chained digest, assigned by the audit sink on append
    #[serde(default)]
    pub digest: Option<String>,
}

impl AuditEvent {
    /// Create a new event with the current timestamp
    pub fn new(
        org_id: impl Into<String>,
        subject: AuditSubject,
        action: AuditAction,
        actor: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            org_id: org_id.into(),
            subject,
            scope: Vec::new(),
            action,
            actor: actor.into(),
            summary: summary.into(),
            payload: serde_json::Value::Null,
            digest: None,
        }
    }

    /// Attach a structured payload
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Attach an enclosing entity id
    pub fn within(mut self, id: Uuid) -> Self {
        self.scope.push(id);
        self
    }

    /// Whether this event concerns the given entity, directly or via scope
    pub fn concerns(&self, id: Uuid) -> bool {
        self.subject.id == id || self.scope.contains(&id)
    }
}

/// The entity an audit event is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSubject {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl AuditSubject {
    pub fn playbook(id: Uuid) -> Self {
        Self { kind: EntityKind::Playbook, id }
    }

    pub fn scenario(id: Uuid) -> Self {
        Self { kind: EntityKind::Scenario, id }
    }

    pub fn run(id: Uuid) -> Self {
        Self { kind: EntityKind::ScenarioRun, id }
    }

    pub fn suite(id: Uuid) -> Self {
        Self { kind: EntityKind::Suite, id }
    }

    pub fn suite_run(id: Uuid) -> Self {
        Self { kind: EntityKind::SuiteRun, id }
    }
}

/// Kinds of audited entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Playbook,
    Scenario,
    ScenarioRun,
    Suite,
    SuiteRun,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Playbook => "playbook",
            Self::Scenario => "scenario",
            Self::ScenarioRun => "scenario_run",
            Self::Suite => "suite",
            Self::SuiteRun => "suite_run",
        };
        f.write_str(s)
    }
}

/// Types of audited transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
    Activated,
    Archived,
    Started,
    StepExecuted,
    Advanced,
    Paused,
    Resumed,
    Cancelled,
    Aborted,
    Approved,
    Rejected,
    Completed,
    Failed,
    ItemAdded,
    ItemUpdated,
    ItemRemoved,
    NarrativeGenerated,
    RiskMapGenerated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let run_id = Uuid::new_v4();
        let event = AuditEvent::new(
            "acme",
            AuditSubject::run(run_id),
            AuditAction::Approved,
            "alice",
            "Step 'notify' approved",
        )
        .with_payload(serde_json::json!({ "step_key": "notify" }));

        let json = serde_json::to_string(&event).unwrap();
        let parsed: AuditEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.action, AuditAction::Approved);
        assert_eq!(parsed.subject.kind, EntityKind::ScenarioRun);
        assert_eq!(parsed.payload["step_key"], "notify");
        assert!(json.contains("\"approved\""));
    }

    #[test]
    fn test_event_scope() {
        let suite_id = Uuid::new_v4();
        let suite_run_id = Uuid::new_v4();
        let event = AuditEvent::new(
            "acme",
            AuditSubject::suite_run(suite_run_id),
            AuditAction::Started,
            "system",
            "Suite run started",
        )
        .within(suite_id);

        assert!(event.concerns(suite_run_id));
        assert!(event.concerns(suite_id));
        assert!(!event.concerns(Uuid::new_v4()));
    }
}
