//! Append-only audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::actor::Actor;
use crate::ids::{AuditId, UserId};

/// Tag of a state-changing action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    FundCreated,
    FundBalanceReconciled,
    RoutingRuleSaved,
    RoutingRuleDeleted,
    RequestCreated,
    DraftUpdated,
    RequestSubmitted,
    StepApproved,
    RequestApproved,
    RequestDenied,
    InfoRequested,
    StudentResponded,
    BudgetOverrideConfirmed,
    DisbursementRecorded,
    RequestClosed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FundCreated => "fund_created",
            Self::FundBalanceReconciled => "fund_balance_reconciled",
            Self::RoutingRuleSaved => "routing_rule_saved",
            Self::RoutingRuleDeleted => "routing_rule_deleted",
            Self::RequestCreated => "request_created",
            Self::DraftUpdated => "draft_updated",
            Self::RequestSubmitted => "request_submitted",
            Self::StepApproved => "step_approved",
            Self::RequestApproved => "request_approved",
            Self::RequestDenied => "request_denied",
            Self::InfoRequested => "info_requested",
            Self::StudentResponded => "student_responded",
            Self::BudgetOverrideConfirmed => "budget_override_confirmed",
            Self::DisbursementRecorded => "disbursement_recorded",
            Self::RequestClosed => "request_closed",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Fund,
    FundRequest,
    RoutingRule,
    Disbursement,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fund => "Fund",
            Self::FundRequest => "FundRequest",
            Self::RoutingRule => "RoutingRule",
            Self::Disbursement => "Disbursement",
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub actor_id: UserId,
    pub actor_name: String,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub details: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        id: AuditId,
        actor: &Actor,
        action: AuditAction,
        entity_type: EntityType,
        entity_id: impl ToString,
        details: serde_json::Value,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            actor_id: actor.id.clone(),
            actor_name: actor.name.clone(),
            action,
            entity_type,
            entity_id: entity_id.to_string(),
            details,
            recorded_at,
        }
    }
}
