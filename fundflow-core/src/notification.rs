//! Notification requests emitted at transition points.
//!
//! Delivery is someone else's job; the workflow only records who should hear
//! about what, with enough context to render a message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::Role;
use crate::ids::{NotificationId, RequestId, UserId};
use crate::model::ReviewerRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipient {
    User { user_id: UserId, email: Option<String> },
    RoleQueue { role: Role },
    StaffQueue,
}

impl From<&ReviewerRef> for Recipient {
    fn from(reviewer: &ReviewerRef) -> Self {
        match reviewer {
            ReviewerRef::User { user_id } => Self::User {
                user_id: user_id.clone(),
                email: None,
            },
            ReviewerRef::RoleQueue { role } => Self::RoleQueue { role: *role },
            ReviewerRef::StaffQueue => Self::StaffQueue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKey {
    ReviewAssigned,
    InfoRequested,
    RequestApproved,
    RequestDenied,
    RequestPaid,
}

impl TemplateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReviewAssigned => "review_assigned",
            Self::InfoRequested => "info_requested",
            Self::RequestApproved => "request_approved",
            Self::RequestDenied => "request_denied",
            Self::RequestPaid => "request_paid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub id: NotificationId,
    pub request_id: RequestId,
    pub recipient: Recipient,
    pub template: TemplateKey,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
