//! Append-only audit trail. Every entry carries a rendered, human-readable line that chat
//! views display verbatim, plus the structured payload it was rendered from.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::approval::{Decision, Priority};
use super::domain::{
    ActionKind, ApplicationId, EventId, QueryId, QueryStatus, RequestId, Role, Team,
    ValidationError,
};

static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_event_id() -> EventId {
    let id = EVENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    EventId(format!("evt-{id:08}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Action,
    Message,
    Revert,
    Request,
}

/// Structured body of a log entry; each variant carries exactly the fields its action needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    DirectAction {
        action: ActionKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        assigned_to: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remarks: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
    },
    RevertAction {
        reason: String,
        previous_status: QueryStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        team: Option<Team>,
    },
    MessagePost {
        text: String,
    },
    RequestSubmission {
        request_id: RequestId,
        request_type: ActionKind,
        priority: Priority,
        #[serde(skip_serializing_if = "Option::is_none")]
        assigned_to: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remarks: Option<String>,
    },
    RequestDecision {
        request_id: RequestId,
        request_type: ActionKind,
        decision: Decision,
        #[serde(skip_serializing_if = "Option::is_none")]
        remarks: Option<String>,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::DirectAction { .. } => EventKind::Action,
            EventPayload::RevertAction { .. } => EventKind::Revert,
            EventPayload::MessagePost { .. } => EventKind::Message,
            EventPayload::RequestSubmission { .. } | EventPayload::RequestDecision { .. } => {
                EventKind::Request
            }
        }
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            EventPayload::DirectAction { request_id, .. } => request_id.as_ref(),
            EventPayload::RequestSubmission { request_id, .. }
            | EventPayload::RequestDecision { request_id, .. } => Some(request_id),
            EventPayload::RevertAction { .. } | EventPayload::MessagePost { .. } => None,
        }
    }

    fn render(&self, actor: &str, role: Role, at: DateTime<Utc>) -> String {
        let stamp = at.format("%Y-%m-%d %H:%M UTC");
        let mut line = match self {
            EventPayload::DirectAction {
                action, request_id, ..
            } => match request_id {
                Some(request) => format!(
                    "{actor} ({role}) {} the query on {stamp} under request {request}",
                    action.past_tense()
                ),
                None => format!("{actor} ({role}) {} the query on {stamp}", action.past_tense()),
            },
            EventPayload::RevertAction {
                reason,
                previous_status,
                team,
            } => {
                let team = team
                    .map(|team| format!(" for the {team} team"))
                    .unwrap_or_default();
                if *previous_status == QueryStatus::Pending {
                    format!(
                        "{actor} ({role}) asked to revert the query{team} on {stamp}, but it was still pending. Reason: {reason}"
                    )
                } else {
                    format!(
                        "{actor} ({role}) reverted the query from {previous_status} to pending{team} on {stamp}. Reason: {reason}"
                    )
                }
            }
            EventPayload::MessagePost { text } => format!("{actor} ({role}) on {stamp}: {text}"),
            EventPayload::RequestSubmission {
                request_id,
                request_type,
                priority,
                ..
            } => format!(
                "{actor} ({role}) requested management approval to {request_type} on {stamp} [{request_id}, priority {priority}]"
            ),
            EventPayload::RequestDecision {
                request_id,
                request_type,
                decision,
                ..
            } => format!(
                "{actor} ({role}) {} the {request_type} request {request_id} on {stamp}",
                decision.past_tense()
            ),
        };

        let (assigned_to, remarks) = match self {
            EventPayload::DirectAction {
                assigned_to,
                remarks,
                ..
            }
            | EventPayload::RequestSubmission {
                assigned_to,
                remarks,
                ..
            } => (assigned_to.as_deref(), remarks.as_deref()),
            EventPayload::RequestDecision { remarks, .. } => (None, remarks.as_deref()),
            EventPayload::RevertAction { .. } | EventPayload::MessagePost { .. } => (None, None),
        };
        if let Some(assignee) = assigned_to {
            line.push_str(&format!(". Assigned to: {assignee}"));
        }
        if let Some(remarks) = remarks {
            line.push_str(&format!(". Remarks: {remarks}"));
        }
        line
    }
}

/// One immutable entry of the per-query event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: EventId,
    pub query_id: QueryId,
    pub application_id: ApplicationId,
    pub kind: EventKind,
    pub actor: String,
    pub actor_role: Role,
    pub timestamp: DateTime<Utc>,
    pub rendered: String,
    pub payload: EventPayload,
}

impl EventLogEntry {
    /// Build an entry. Only the query id and actor are required; workflow state is never consulted.
    pub fn new(
        application_id: ApplicationId,
        query_id: QueryId,
        actor: &str,
        actor_role: Role,
        timestamp: DateTime<Utc>,
        payload: EventPayload,
    ) -> Result<Self, ValidationError> {
        if query_id.0.trim().is_empty() {
            return Err(ValidationError::MissingField("query_id"));
        }
        if actor.trim().is_empty() {
            return Err(ValidationError::MissingField("actor"));
        }

        Ok(Self {
            id: next_event_id(),
            rendered: payload.render(actor, actor_role, timestamp),
            kind: payload.kind(),
            query_id,
            application_id,
            actor: actor.to_string(),
            actor_role,
            timestamp,
            payload,
        })
    }
}

/// Display direction for a query's history; storage order is always commit order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrder {
    #[default]
    Chronological,
    NewestFirst,
}

impl FromStr for EventOrder {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "chronological" | "asc" => Ok(EventOrder::Chronological),
            "newest_first" | "desc" => Ok(EventOrder::NewestFirst),
            _ => Err(ValidationError::InvalidValue {
                field: "order",
                value: value.to_string(),
            }),
        }
    }
}

impl EventOrder {
    pub fn arrange(self, mut entries: Vec<EventLogEntry>) -> Vec<EventLogEntry> {
        if self == EventOrder::NewestFirst {
            entries.reverse();
        }
        entries
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventKind::Action => "action",
            EventKind::Message => "message",
            EventKind::Revert => "revert",
            EventKind::Request => "request",
        };
        f.write_str(label)
    }
}

/// Selection over the stored log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub query_id: Option<QueryId>,
    pub application_id: Option<ApplicationId>,
}

impl EventFilter {
    pub fn for_query(query_id: QueryId) -> Self {
        Self {
            query_id: Some(query_id),
            application_id: None,
        }
    }

    pub fn matches(&self, entry: &EventLogEntry) -> bool {
        self.query_id
            .as_ref()
            .map_or(true, |query| &entry.query_id == query)
            && self
                .application_id
                .as_ref()
                .map_or(true, |application| &entry.application_id == application)
    }
}
