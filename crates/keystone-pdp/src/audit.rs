//! Decision audit records.
//!
//! One [`DecisionAuditEvent`] is emitted per resource decision. Events carry
//! the obligations triggered on the resource even when the consolidated
//! decision later drops them for a denial. Events never contain token
//! material.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::evaluator::DataRuleResult;

/// What kind of operation is being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditActionType {
    Decision,
}

/// The outcome recorded for an audited decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditResult {
    Permit,
    Deny,
}

impl AuditResult {
    pub fn from_passed(passed: bool) -> Self {
        if passed { Self::Permit } else { Self::Deny }
    }
}

/// A structured audit record for one resource decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionAuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// The resource's ephemeral id.
    pub object_id: String,
    pub action_type: AuditActionType,
    pub action_name: String,
    pub result: AuditResult,
    /// The entity chain or token ephemeral id.
    pub actor_id: String,
    pub obligations: Vec<String>,
    pub fulfillable_obligations: Vec<String>,
    pub entitled: bool,
    pub obligations_satisfied: bool,
    pub data_rule_results: Vec<DataRuleResult>,
}

impl DecisionAuditEvent {
    pub fn new(
        object_id: impl Into<String>,
        action_name: impl Into<String>,
        actor_id: impl Into<String>,
        passed: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            object_id: object_id.into(),
            action_type: AuditActionType::Decision,
            action_name: action_name.into(),
            result: AuditResult::from_passed(passed),
            actor_id: actor_id.into(),
            obligations: Vec::new(),
            fulfillable_obligations: Vec::new(),
            entitled: passed,
            obligations_satisfied: true,
            data_rule_results: Vec::new(),
        }
    }
}

/// Receives decision audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &DecisionAuditEvent);
}

/// Writes audit events as structured `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &DecisionAuditEvent) {
        tracing::info!(
            target: "keystone::audit",
            audit_id = %event.id,
            object_id = %event.object_id,
            action = %event.action_name,
            actor_id = %event.actor_id,
            result = ?event.result,
            entitled = event.entitled,
            obligations_satisfied = event.obligations_satisfied,
            obligations = ?event.obligations,
            "Decision"
        );
    }
}

/// Collects audit events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<DecisionAuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event recorded so far.
    pub fn events(&self) -> Vec<DecisionAuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &DecisionAuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.clone());
    }
}
