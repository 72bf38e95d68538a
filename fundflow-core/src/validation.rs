//! Input checks applied to requests before they reach the store.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::WorkflowError;
use crate::model::{Fund, FundRequest};

/// Checks that hold for any saved request, draft or not.
pub fn validate_draft(fund: &Fund, request: &FundRequest) -> Result<(), WorkflowError> {
    validate_amount(fund, request.requested_amount)?;
    let category = request.intended_use_category.trim();
    if category.is_empty() {
        return Err(WorkflowError::validation("intended use category is required"));
    }
    if !fund.allows_category(category) {
        return Err(WorkflowError::validation(format!(
            "category '{}' is not allowed for fund {}",
            category, fund.name
        )));
    }
    Ok(())
}

/// Checks that must hold before a request enters review.
pub fn validate_submission(
    fund: &Fund,
    request: &FundRequest,
    today: NaiveDate,
) -> Result<(), WorkflowError> {
    validate_draft(fund, request)?;
    if request.justification.trim().is_empty() {
        return Err(WorkflowError::validation("justification is required"));
    }
    if fund.requires_attachments && request.attachments.is_empty() {
        return Err(WorkflowError::validation(format!(
            "fund {} requires at least one attachment",
            fund.name
        )));
    }
    if !fund.is_open_on(today) {
        return Err(WorkflowError::validation(format!(
            "fund {} is not accepting requests",
            fund.name
        )));
    }
    Ok(())
}

pub fn validate_amount(fund: &Fund, amount: Decimal) -> Result<(), WorkflowError> {
    if amount <= Decimal::ZERO {
        return Err(WorkflowError::validation("requested amount must be positive"));
    }
    if let Some(max) = fund.max_request_amount {
        if amount > max {
            return Err(WorkflowError::validation(format!(
                "requested amount {} exceeds the fund maximum of {}",
                amount, max
            )));
        }
    }
    Ok(())
}

/// A payment must move a positive amount.
pub fn validate_payment(amount: Decimal) -> Result<(), WorkflowError> {
    if amount <= Decimal::ZERO {
        return Err(WorkflowError::validation("disbursement amount must be positive"));
    }
    Ok(())
}

/// Checks applied when a fund is created.
pub fn validate_fund(fund: &Fund) -> Result<(), WorkflowError> {
    if fund.name.trim().is_empty() {
        return Err(WorkflowError::validation("fund name is required"));
    }
    if fund.total_budget.is_sign_negative() {
        return Err(WorkflowError::validation("total budget must not be negative"));
    }
    if let Some(max) = fund.max_request_amount {
        if max <= Decimal::ZERO {
            return Err(WorkflowError::validation(
                "maximum request amount must be positive",
            ));
        }
    }
    if let (Some(start), Some(end)) = (fund.start_date, fund.end_date) {
        if start > end {
            return Err(WorkflowError::validation("fund ends before it starts"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{FundId, OrganizationId, RequestId, UserId};
    use crate::model::{
        Attachment, BudgetEnforcement, FundStatus, RequestStatus, StudentInfo,
    };
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn fund() -> Fund {
        Fund {
            id: FundId::new(),
            organization_id: OrganizationId::new(),
            name: "Book Grant".to_string(),
            description: String::new(),
            eligibility_notes: None,
            start_date: None,
            end_date: None,
            total_budget: Decimal::from(5000),
            remaining_budget: Decimal::from(5000),
            max_request_amount: Some(Decimal::from(250)),
            allowed_categories: ["Books & Supplies".to_string()].into_iter().collect(),
            requires_attachments: true,
            budget_enforcement: BudgetEnforcement::Warn,
            status: FundStatus::Active,
            owner_id: UserId::from("owner"),
            created_at: Utc::now(),
        }
    }

    fn request(fund: &Fund, amount: i64) -> FundRequest {
        let id = RequestId::new();
        FundRequest {
            id,
            request_number: FundRequest::number_for(id),
            organization_id: fund.organization_id,
            fund_id: fund.id,
            fund_name: fund.name.clone(),
            student: StudentInfo {
                user_id: UserId::from("s1"),
                full_name: "Sasha".to_string(),
                email: "sasha@example.edu".to_string(),
                phone: None,
            },
            requested_amount: Decimal::from(amount),
            intended_use_category: "Books & Supplies".to_string(),
            use_description: "Chemistry textbook".to_string(),
            justification: "Required for CHEM 101".to_string(),
            attachments: vec![],
            status: RequestStatus::Draft,
            submitted_at: None,
            locked: false,
            current_step: None,
            routing_plan: vec![],
            active_step: None,
            review_round: 0,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    #[test]
    fn test_amount_must_be_positive_and_capped() {
        let f = fund();
        assert!(validate_draft(&f, &request(&f, 0)).is_err());
        assert!(validate_draft(&f, &request(&f, 251)).is_err());
        assert!(validate_draft(&f, &request(&f, 250)).is_ok());
    }

    #[test]
    fn test_category_must_be_allowed() {
        let f = fund();
        let mut r = request(&f, 100);
        r.intended_use_category = "Housing".to_string();
        assert!(validate_draft(&f, &r).is_err());
    }

    #[test]
    fn test_submission_requires_attachment_when_fund_demands_it() {
        let f = fund();
        let mut r = request(&f, 100);
        assert!(validate_submission(&f, &r, today()).is_err());

        r.attachments.push(Attachment {
            name: "quote.pdf".to_string(),
            url: "https://files.example.edu/quote.pdf".to_string(),
            uploaded_by: UserId::from("s1"),
            uploaded_at: Utc::now(),
        });
        assert!(validate_submission(&f, &r, today()).is_ok());
    }

    #[test]
    fn test_submission_rejected_for_inactive_fund() {
        let mut f = fund();
        f.requires_attachments = false;
        f.status = FundStatus::Archived;
        let r = request(&f, 100);
        assert!(validate_submission(&f, &r, today()).is_err());
    }

    #[test]
    fn test_fund_dates_must_be_ordered() {
        let mut f = fund();
        f.start_date = NaiveDate::from_ymd_opt(2026, 9, 1);
        f.end_date = NaiveDate::from_ymd_opt(2026, 8, 1);
        assert!(validate_fund(&f).is_err());
    }
}
