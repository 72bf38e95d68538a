//! Domain core for student fund requests: entities, routing rule evaluation
//! and the budget ledger. Nothing in this crate performs I/O.

pub mod actor;
pub mod audit;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod model;
pub mod notification;
pub mod routing;
pub mod validation;

pub use actor::{Actor, Role};
pub use audit::{AuditAction, AuditEntry, EntityType};
pub use error::{WorkflowError, WorkflowResult};
pub use ids::*;
pub use ledger::{check_budget, enforce, BudgetCheck, BudgetTotals, BudgetVerdict};
pub use model::*;
pub use notification::{NotificationRequest, Recipient, TemplateKey};
pub use routing::{
    applicable_steps_for, build_plan, compute_applicable_steps, validate_rule, MAX_SLA_DAYS,
};
