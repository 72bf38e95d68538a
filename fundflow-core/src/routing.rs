//! Routing rule evaluation.
//!
//! Given a request and the routing rules of its fund, decide which review
//! steps apply and in which order. Evaluation is pure: the same inputs always
//! produce the same ordered output.

use rust_decimal::Decimal;

use crate::error::WorkflowError;
use crate::model::{Assignment, FundRequest, Permission, PlannedStep, RoutingRule};

/// Longest SLA a routing rule may set, in days.
pub const MAX_SLA_DAYS: u32 = 3650;

/// Whether `rule` applies to a request of `amount` in `category`.
///
/// Both amount bounds are inclusive; a missing bound is unbounded.
pub fn rule_applies(rule: &RoutingRule, amount: Decimal, category: &str) -> bool {
    rule.is_active
        && rule.min_amount.map_or(true, |min| amount >= min)
        && rule.max_amount.map_or(true, |max| amount <= max)
        && (rule.categories.is_empty() || rule.categories.contains(category))
}

/// Rules that apply to `request`, ordered by step order.
///
/// Equal step orders keep creation order; rules created at the same instant
/// keep their input order.
pub fn compute_applicable_steps(request: &FundRequest, rules: &[RoutingRule]) -> Vec<RoutingRule> {
    applicable_steps_for(
        request.requested_amount,
        &request.intended_use_category,
        rules,
    )
}

/// Same as [`compute_applicable_steps`] without a request at hand.
pub fn applicable_steps_for(
    amount: Decimal,
    category: &str,
    rules: &[RoutingRule],
) -> Vec<RoutingRule> {
    let mut applicable: Vec<RoutingRule> = rules
        .iter()
        .filter(|rule| rule_applies(rule, amount, category))
        .cloned()
        .collect();
    // sort_by_key is stable
    applicable.sort_by_key(|rule| (rule.step_order, rule.created_at));
    applicable
}

/// Freeze applicable rules into a review plan.
///
/// With no applicable rule the plan is the single fallback staff step. A plan
/// whose last step may only recommend gets the fallback step appended, so a
/// final approval is always made at an `approve_deny` step.
pub fn build_plan(applicable: &[RoutingRule]) -> Vec<PlannedStep> {
    let mut plan: Vec<PlannedStep> = applicable.iter().map(PlannedStep::from_rule).collect();
    match plan.last() {
        None => plan.push(PlannedStep::fallback()),
        Some(last) if last.permission == Permission::RecommendOnly => {
            let step_order = last.step_order.saturating_add(1);
            plan.push(PlannedStep {
                step_order,
                ..PlannedStep::fallback()
            });
        }
        Some(_) => {}
    }
    plan
}

/// Check a rule before it is stored.
pub fn validate_rule(rule: &RoutingRule) -> Result<(), WorkflowError> {
    if rule.step_order == 0 {
        return Err(WorkflowError::validation("step order must be positive"));
    }
    if rule.step_name.trim().is_empty() {
        return Err(WorkflowError::validation("step name is required"));
    }
    for bound in [rule.min_amount, rule.max_amount].into_iter().flatten() {
        if bound.is_sign_negative() {
            return Err(WorkflowError::validation("amount bounds must not be negative"));
        }
    }
    if let Some(days) = rule.sla_days {
        if days == 0 || days > MAX_SLA_DAYS {
            return Err(WorkflowError::validation(format!(
                "SLA must be between 1 and {} days, got {}",
                MAX_SLA_DAYS, days
            )));
        }
    }
    if let (Some(min), Some(max)) = (rule.min_amount, rule.max_amount) {
        if min > max {
            return Err(WorkflowError::validation(format!(
                "minimum amount {} exceeds maximum amount {}",
                min, max
            )));
        }
    }
    match &rule.assignment {
        Assignment::Users { user_ids } if user_ids.is_empty() => Err(WorkflowError::validation(
            "specific-user assignment needs at least one user",
        )),
        Assignment::AnyStaff => Err(WorkflowError::validation(
            "rules must assign a role or specific users",
        )),
        _ => Ok(()),
    }
}
