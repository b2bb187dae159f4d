//! Two-phase gated actions: an Operations request, then exactly one Management decision.

mod config;
mod priority;

pub use config::{
    PriorityConfig, DEFAULT_HIGH_PRIORITY_AMOUNT, DEFAULT_MEDIUM_PRIORITY_AMOUNT,
    DEFAULT_URGENCY_KEYWORDS,
};
pub use priority::Priority;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregate::{Application, Query};
use super::domain::{
    non_blank, ActionKind, ApplicationId, Principal, QueryId, RequestId, Role, ValidationError,
};
use super::engine::{self, DirectAction, TransitionError};
use super::events::{EventLogEntry, EventPayload};
use priority::assess_priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub(crate) const fn past_tense(self) -> &'static str {
        match self {
            Decision::Approve => "approved",
            Decision::Reject => "rejected",
        }
    }

    const fn resulting_status(self) -> RequestStatus {
        match self {
            Decision::Approve => RequestStatus::Approved,
            Decision::Reject => RequestStatus::Rejected,
        }
    }
}

impl FromStr for Decision {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Decision::Approve),
            "reject" | "rejected" => Ok(Decision::Reject),
            _ => Err(ValidationError::InvalidValue {
                field: "decision",
                value: value.to_string(),
            }),
        }
    }
}

/// Application facts as they stood when the request was raised. Never refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub app_no: String,
    pub customer_name: String,
    pub branch: String,
    pub branch_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan_amount: Option<u64>,
    pub query_text: String,
}

impl RequestContext {
    fn capture(application: &Application, query: &Query) -> Self {
        Self {
            app_no: application.app_no.clone(),
            customer_name: application.customer_name.clone(),
            branch: application.branch.clone(),
            branch_code: application.branch_code.clone(),
            loan_amount: application.loan_amount,
            query_text: query.text.clone(),
        }
    }
}

/// Phase-one artifact of a gated action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub query_id: QueryId,
    pub application_id: ApplicationId,
    pub request_type: ActionKind,
    pub requested_by: String,
    pub request_date: DateTime<Utc>,
    pub status: RequestStatus,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    pub context: RequestContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_remarks: Option<String>,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

/// Phase-one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSubmission {
    pub request_type: ActionKind,
    pub assigned_to: Option<String>,
    pub remarks: Option<String>,
}

impl RequestSubmission {
    pub fn new(request_type: ActionKind) -> Self {
        Self {
            request_type,
            assigned_to: None,
            remarks: None,
        }
    }

    pub fn assigned_to(mut self, assignee: impl Into<String>) -> Self {
        self.assigned_to = Some(assignee.into());
        self
    }

    pub fn remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }
}

/// Phase-two input. `assigned_to` and `remarks` override the values carried by the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionInput {
    pub decision: Decision,
    pub assigned_to: Option<String>,
    pub remarks: Option<String>,
}

impl DecisionInput {
    pub fn approve() -> Self {
        Self {
            decision: Decision::Approve,
            assigned_to: None,
            remarks: None,
        }
    }

    pub fn reject(remarks: impl Into<String>) -> Self {
        Self {
            decision: Decision::Reject,
            assigned_to: None,
            remarks: Some(remarks.into()),
        }
    }

    pub fn remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }
}

/// Selection over stored approval requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub query_id: Option<QueryId>,
}

impl RequestFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(RequestStatus::Pending),
            query_id: None,
        }
    }

    pub fn for_query(mut self, query_id: Option<QueryId>) -> Self {
        self.query_id = query_id;
        self
    }

    pub fn matches(&self, request: &ApprovalRequest) -> bool {
        self.status.map_or(true, |status| request.status == status)
            && self
                .query_id
                .as_ref()
                .map_or(true, |query| &request.query_id == query)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval request {id} was already {status}")]
    AlreadyProcessed { id: RequestId, status: RequestStatus },
    #[error("{role} callers may not {action}")]
    Unauthorized { role: Role, action: &'static str },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub(crate) fn authorize_submission(principal: &Principal) -> Result<(), ApprovalError> {
    match principal.role {
        Role::Operations => Ok(()),
        role => Err(ApprovalError::Unauthorized {
            role,
            action: "submit approval requests",
        }),
    }
}

pub(crate) fn authorize_decision(principal: &Principal) -> Result<(), ApprovalError> {
    match principal.role {
        Role::Management => Ok(()),
        role => Err(ApprovalError::Unauthorized {
            role,
            action: "decide approval requests",
        }),
    }
}

pub(crate) fn can_list_requests(principal: &Principal) -> bool {
    matches!(principal.role, Role::Operations | Role::Management)
}

/// Phase one: snapshot context, score priority, and log the request. The query is left untouched.
pub(crate) fn submit(
    id: RequestId,
    application: &Application,
    query_id: &QueryId,
    submission: &RequestSubmission,
    requester: &Principal,
    config: &PriorityConfig,
    now: DateTime<Utc>,
) -> Result<(ApprovalRequest, EventLogEntry), ApprovalError> {
    let query = application
        .query(query_id)
        .ok_or_else(|| TransitionError::QueryNotFound(query_id.clone()))?;

    let assigned_to = non_blank(submission.assigned_to.clone());
    let remarks = non_blank(submission.remarks.clone());
    let priority = assess_priority(
        submission.request_type,
        application.loan_amount,
        &query.text,
        config,
    );

    let request = ApprovalRequest {
        id,
        query_id: query_id.clone(),
        application_id: application.id.clone(),
        request_type: submission.request_type,
        requested_by: requester.id.clone(),
        request_date: now,
        status: RequestStatus::Pending,
        priority,
        assigned_to: assigned_to.clone(),
        remarks: remarks.clone(),
        context: RequestContext::capture(application, query),
        processed_by: None,
        process_date: None,
        decision_remarks: None,
    };

    let entry = EventLogEntry::new(
        application.id.clone(),
        query_id.clone(),
        &requester.id,
        requester.role,
        now,
        EventPayload::RequestSubmission {
            request_id: request.id.clone(),
            request_type: request.request_type,
            priority,
            assigned_to,
            remarks,
        },
    )?;

    Ok((request, entry))
}

/// Phase two: settle a pending request. Approval applies the requested action to the query;
/// rejection leaves the query as it is. Either way the decision itself is logged first.
pub(crate) fn decide(
    application: &mut Application,
    request: &mut ApprovalRequest,
    input: &DecisionInput,
    approver: &Principal,
    now: DateTime<Utc>,
) -> Result<(Option<Query>, Vec<EventLogEntry>), ApprovalError> {
    if !request.is_pending() {
        return Err(ApprovalError::AlreadyProcessed {
            id: request.id.clone(),
            status: request.status,
        });
    }

    let decision_remarks = non_blank(input.remarks.clone());
    request.status = input.decision.resulting_status();
    request.processed_by = Some(approver.id.clone());
    request.process_date = Some(now);
    request.decision_remarks = decision_remarks.clone();

    let mut events = vec![EventLogEntry::new(
        application.id.clone(),
        request.query_id.clone(),
        &approver.id,
        approver.role,
        now,
        EventPayload::RequestDecision {
            request_id: request.id.clone(),
            request_type: request.request_type,
            decision: input.decision,
            remarks: decision_remarks.clone(),
        },
    )?];

    if input.decision == Decision::Reject {
        return Ok((None, events));
    }

    let action = DirectAction {
        action: request.request_type,
        assigned_to: non_blank(input.assigned_to.clone()).or_else(|| request.assigned_to.clone()),
        remarks: decision_remarks.or_else(|| request.remarks.clone()),
    };
    let (query, entry) = engine::apply_direct_action(
        application,
        &request.query_id,
        &action,
        approver,
        Some(request.id.clone()),
        now,
    )?;
    events.push(entry);

    Ok((Some(query), events))
}
