//! Request and response bodies of the JSON API.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fundflow_core::{BudgetCheck, BudgetTotals};

use crate::state_machine::{AttachmentRef, EngineStatsSnapshot};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: String,
    pub stats: EngineStatsSnapshot,
}

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// Machine-readable error kind, e.g. `invalid_transition`.
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<Decimal>,
}

impl ErrorBody {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            remaining: None,
            requested: None,
        }
    }
}

/// Answer to a warn-mode approval that needs the reviewer's confirmation.
#[derive(Debug, Serialize)]
pub struct BudgetConfirmationBody {
    pub status: &'static str,
    pub remaining: Decimal,
    pub requested: Decimal,
    pub totals: BudgetTotals,
}

impl From<BudgetCheck> for BudgetConfirmationBody {
    fn from(check: BudgetCheck) -> Self {
        Self {
            status: "budget_confirmation_required",
            remaining: check.remaining,
            requested: check.requested,
            totals: check.totals,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BudgetQuery {
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct PlanQuery {
    pub amount: Decimal,
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct InfoResponseBody {
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CloseBody {
    #[serde(default)]
    pub reason: Option<String>,
}
