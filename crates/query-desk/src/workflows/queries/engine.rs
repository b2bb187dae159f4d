//! Transition engine: validates and applies state changes to individual queries and
//! re-derives the owning application's aggregate status after every change.
//!
//! Functions here mutate an in-memory [`Application`] and hand back the log entries that
//! describe the change. Persisting both atomically is the caller's job.

use chrono::{DateTime, Utc};

use super::aggregate::{Application, Query, Resolution, RevertStamp};
use super::domain::{
    non_blank, ActionKind, Principal, QueryId, QueryStatus, RequestId, Role, Team,
    ValidationError,
};
use super::events::{EventLogEntry, EventPayload};

/// A terminal team decision applied without a separate approval step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectAction {
    pub action: ActionKind,
    pub assigned_to: Option<String>,
    pub remarks: Option<String>,
}

impl DirectAction {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
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

/// Return a query to `pending`. The reason is mandatory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertCommand {
    pub reason: String,
    pub team: Option<Team>,
}

impl RevertCommand {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            team: None,
        }
    }

    pub fn for_team(mut self, team: Team) -> Self {
        self.team = Some(team);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if self.reason.trim().is_empty() {
            Err(ValidationError::MissingReason)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("query {0} not found")]
    QueryNotFound(QueryId),
    #[error("{role} callers may not {action}")]
    Unauthorized { role: Role, action: &'static str },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Unescalated direct actions need Management authority; Operations goes through a request.
pub(crate) fn authorize_direct_action(principal: &Principal) -> Result<(), TransitionError> {
    match principal.role {
        Role::Management => Ok(()),
        role => Err(TransitionError::Unauthorized {
            role,
            action: "apply direct actions; submit an approval request instead",
        }),
    }
}

/// Map a caller-supplied reference onto a child query. An application id addresses its first query.
pub fn resolve_target(application: &Application, reference: &QueryId) -> Option<QueryId> {
    if reference.0 == application.id.0 {
        return application.first_query().map(|query| query.id.clone());
    }
    application.query(reference).map(|query| query.id.clone())
}

/// Append freshly raised queries; each one opens its chat history with a message entry.
pub(crate) fn raise_queries(
    application: &mut Application,
    queries: Vec<Query>,
    actor: &Principal,
    now: DateTime<Utc>,
) -> Result<Vec<EventLogEntry>, TransitionError> {
    let mut events = Vec::with_capacity(queries.len());
    for query in queries {
        if query.text.trim().is_empty() {
            return Err(ValidationError::EmptyQueryText.into());
        }
        events.push(EventLogEntry::new(
            application.id.clone(),
            query.id.clone(),
            &actor.id,
            actor.role,
            now,
            EventPayload::MessagePost {
                text: query.text.clone(),
            },
        )?);
        application.push_query(query, now);
    }
    application.recompute_status(&actor.id, now);
    Ok(events)
}

/// Move a query to the terminal status of `action` and re-derive the aggregate.
pub(crate) fn apply_direct_action(
    application: &mut Application,
    query_id: &QueryId,
    action: &DirectAction,
    actor: &Principal,
    request_id: Option<RequestId>,
    now: DateTime<Utc>,
) -> Result<(Query, EventLogEntry), TransitionError> {
    let assigned_to = non_blank(action.assigned_to.clone());
    let remarks = non_blank(action.remarks.clone());

    let query = application
        .query_mut(query_id)
        .ok_or_else(|| TransitionError::QueryNotFound(query_id.clone()))?;

    query.status = action.action.terminal_status();
    query.is_resolved = true;
    query.resolution = Some(Resolution {
        resolved_by: actor.id.clone(),
        resolved_at: now,
        reason: remarks
            .clone()
            .unwrap_or_else(|| format!("{} by {}", action.action, actor.role)),
    });
    if assigned_to.is_some() {
        query.assigned_to = assigned_to.clone();
    }
    if remarks.is_some() {
        query.remarks = remarks.clone();
    }
    let updated = query.clone();

    application.last_updated = now;
    application.recompute_status(&actor.id, now);

    let entry = EventLogEntry::new(
        application.id.clone(),
        query_id.clone(),
        &actor.id,
        actor.role,
        now,
        EventPayload::DirectAction {
            action: action.action,
            assigned_to,
            remarks,
            request_id,
        },
    )?;

    Ok((updated, entry))
}

/// Return a query to `pending`, clearing its resolution and stamping the revert.
///
/// Reverting a query that is already pending changes nothing but is still logged.
pub(crate) fn revert(
    application: &mut Application,
    query_id: &QueryId,
    command: &RevertCommand,
    actor: &Principal,
    now: DateTime<Utc>,
) -> Result<(Query, EventLogEntry), TransitionError> {
    command.validate()?;
    let reason = command.reason.trim().to_string();

    let query = application
        .query_mut(query_id)
        .ok_or_else(|| TransitionError::QueryNotFound(query_id.clone()))?;

    let previous_status = query.status;
    // A pending query has nothing to undo; only the log records the attempt.
    let reopened = previous_status != QueryStatus::Pending;
    if reopened {
        query.status = QueryStatus::Pending;
        query.is_resolved = false;
        query.resolution = None;
        query.revert = Some(RevertStamp {
            reverted_by: actor.id.clone(),
            reverted_at: now,
            reason: reason.clone(),
        });
    }
    let updated = query.clone();

    if reopened {
        application.last_updated = now;
        application.recompute_status(&actor.id, now);
    }

    let entry = EventLogEntry::new(
        application.id.clone(),
        query_id.clone(),
        &actor.id,
        actor.role,
        now,
        EventPayload::RevertAction {
            reason,
            previous_status,
            team: command.team.or(actor.role.team()),
        },
    )?;

    Ok((updated, entry))
}

/// Build a chat message entry.
///
/// Workflow status is never consulted; resolved queries accept messages.
pub(crate) fn post_message(
    application: &Application,
    query_id: &QueryId,
    text: &str,
    actor: &Principal,
    now: DateTime<Utc>,
) -> Result<EventLogEntry, TransitionError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyMessage.into());
    }
    if application.query(query_id).is_none() {
        return Err(TransitionError::QueryNotFound(query_id.clone()));
    }

    Ok(EventLogEntry::new(
        application.id.clone(),
        query_id.clone(),
        &actor.id,
        actor.role,
        now,
        EventPayload::MessagePost {
            text: text.to_string(),
        },
    )?)
}
