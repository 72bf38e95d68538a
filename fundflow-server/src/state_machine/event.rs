//! Events that trigger state transitions.
//!
//! Each event is one user-initiated action on a request. The acting user
//! travels in the `TransitionContext`, not in the event.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fundflow_core::{Attachment, Decision, PaymentMethod, ReviewId};

/// Field changes a student may make to a draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftChanges {
    pub requested_amount: Option<Decimal>,
    pub intended_use_category: Option<String>,
    pub use_description: Option<String>,
    pub justification: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub add_attachments: Vec<Attachment>,
}

/// All events that can trigger state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Student edits their draft.
    EditDraft(DraftChanges),

    /// Student submits their draft for review.
    Submit,

    /// A reviewer records a decision on one review record.
    Decide {
        review_id: ReviewId,
        decision: Decision,
        comments: Option<String>,
        /// Caller acknowledged a warn-mode budget shortfall.
        confirm_budget_override: bool,
    },

    /// Student answers a Needs Info decision.
    RespondToInfoRequest {
        message: String,
        attachments: Vec<Attachment>,
    },

    /// Payment was made for an approved request.
    Disburse {
        amount: Decimal,
        method: PaymentMethod,
        notes: Option<String>,
        receipt_url: Option<String>,
    },

    /// Administrative archival.
    Close { reason: Option<String> },
}

impl Event {
    /// Short name used in logs and error messages.
    pub fn action(&self) -> &'static str {
        match self {
            Event::EditDraft(_) => "edit",
            Event::Submit => "submit",
            Event::Decide {
                decision: Decision::Approved,
                ..
            } => "approve",
            Event::Decide {
                decision: Decision::Denied,
                ..
            } => "deny",
            Event::Decide {
                decision: Decision::NeedsInfo,
                ..
            } => "request information on",
            Event::Decide { .. } => "decide on",
            Event::RespondToInfoRequest { .. } => "respond to",
            Event::Disburse { .. } => "disburse",
            Event::Close { .. } => "close",
        }
    }

    /// Returns a summary of the event suitable for logging.
    ///
    /// Free-text fields are left out.
    pub fn log_summary(&self) -> String {
        match self {
            Event::EditDraft(_) => "EditDraft".to_string(),
            Event::Submit => "Submit".to_string(),
            Event::Decide {
                review_id,
                decision,
                confirm_budget_override,
                ..
            } => format!(
                "Decide {{ review: {}, decision: {}, override: {} }}",
                review_id, decision, confirm_budget_override
            ),
            Event::RespondToInfoRequest { attachments, .. } => format!(
                "RespondToInfoRequest {{ attachments: {} }}",
                attachments.len()
            ),
            Event::Disburse { amount, method, .. } => {
                format!("Disburse {{ amount: {}, method: {:?} }}", amount, method)
            }
            Event::Close { .. } => "Close".to_string(),
        }
    }
}
