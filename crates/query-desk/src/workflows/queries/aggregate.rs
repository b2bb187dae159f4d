use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    ApplicationId, ApplicationStatus, QueryId, QueryStatus, Role, Team, TeamTargets,
};

pub const ALL_QUERIES_RESOLVED: &str = "All queries resolved";

/// Who closed a query or application, when, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
    pub reason: String,
}

/// Stamp left on a query that was returned to `pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertStamp {
    pub reverted_by: String,
    pub reverted_at: DateTime<Utc>,
    pub reason: String,
}

/// One discrete question raised against an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: QueryId,
    pub text: String,
    pub status: QueryStatus,
    pub sender: String,
    pub sender_role: Role,
    pub timestamp: DateTime<Utc>,
    pub is_resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revert: Option<RevertStamp>,
}

impl Query {
    pub fn raised(
        id: QueryId,
        text: String,
        sender: String,
        sender_role: Role,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            text,
            status: QueryStatus::Pending,
            sender,
            sender_role,
            timestamp,
            is_resolved: false,
            resolution: None,
            assigned_to: None,
            remarks: None,
            revert: None,
        }
    }
}

/// Creation payload for a new application aggregate.
#[derive(Debug, Clone)]
pub struct ApplicationDraft {
    pub id: ApplicationId,
    pub app_no: String,
    pub customer_name: String,
    pub branch: String,
    pub branch_code: String,
    pub loan_amount: Option<u64>,
    pub team_targets: TeamTargets,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
}

/// Aggregate root: one loan application and the queries raised against it.
///
/// `status` and `resolution` are private so that the only way to change them is
/// [`Application::recompute_status`], which derives both from the child queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub app_no: String,
    pub customer_name: String,
    pub branch: String,
    pub branch_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan_amount: Option<u64>,
    pub team_targets: TeamTargets,
    pub queries: Vec<Query>,
    status: ApplicationStatus,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<Resolution>,
}

impl Application {
    pub fn new(draft: ApplicationDraft, queries: Vec<Query>) -> Self {
        let mut application = Self {
            id: draft.id,
            app_no: draft.app_no,
            customer_name: draft.customer_name,
            branch: draft.branch,
            branch_code: draft.branch_code,
            loan_amount: draft.loan_amount,
            team_targets: draft.team_targets,
            queries,
            status: ApplicationStatus::Pending,
            submitted_by: draft.submitted_by.clone(),
            submitted_at: draft.submitted_at,
            last_updated: draft.submitted_at,
            resolution: None,
        };
        application.recompute_status(&draft.submitted_by, draft.submitted_at);
        application
    }

    pub fn status(&self) -> ApplicationStatus {
        self.status
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    pub fn query(&self, id: &QueryId) -> Option<&Query> {
        self.queries.iter().find(|query| &query.id == id)
    }

    pub(crate) fn query_mut(&mut self, id: &QueryId) -> Option<&mut Query> {
        self.queries.iter_mut().find(|query| &query.id == id)
    }

    pub fn first_query(&self) -> Option<&Query> {
        self.queries.first()
    }

    pub fn latest_query(&self) -> Option<&Query> {
        self.queries.last()
    }

    pub(crate) fn push_query(&mut self, query: Query, now: DateTime<Utc>) {
        self.queries.push(query);
        self.last_updated = now;
    }

    /// Re-derive the aggregate status from every child query.
    ///
    /// Entering `resolved` stamps the resolution with `actor`; staying resolved keeps the
    /// original stamp; any pending child clears it.
    pub(crate) fn recompute_status(&mut self, actor: &str, now: DateTime<Utc>) {
        let derived = derive_status(&self.queries);
        match derived {
            ApplicationStatus::Resolved if self.status != ApplicationStatus::Resolved => {
                self.resolution = Some(Resolution {
                    resolved_by: actor.to_string(),
                    resolved_at: now,
                    reason: ALL_QUERIES_RESOLVED.to_string(),
                });
            }
            ApplicationStatus::Resolved => {}
            ApplicationStatus::Pending => self.resolution = None,
        }
        self.status = derived;
    }
}

/// `resolved` iff every query is in a terminal state. An application without queries stays pending.
pub fn derive_status(queries: &[Query]) -> ApplicationStatus {
    if !queries.is_empty() && queries.iter().all(|query| query.status.is_terminal()) {
        ApplicationStatus::Resolved
    } else {
        ApplicationStatus::Pending
    }
}

/// Counts derived on demand from current application state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatistics {
    pub total_applications: usize,
    pub pending_applications: usize,
    pub resolved_applications: usize,
    pub total_queries: usize,
    pub queries_by_status: BTreeMap<QueryStatus, usize>,
    pub applications_by_team: BTreeMap<Team, usize>,
}

impl QueueStatistics {
    pub fn from_applications<'a, I>(applications: I) -> Self
    where
        I: IntoIterator<Item = &'a Application>,
    {
        let mut stats = Self::default();
        for application in applications {
            stats.total_applications += 1;
            match application.status() {
                ApplicationStatus::Pending => stats.pending_applications += 1,
                ApplicationStatus::Resolved => stats.resolved_applications += 1,
            }
            for team in application.team_targets.teams() {
                *stats.applications_by_team.entry(team).or_default() += 1;
            }
            for query in &application.queries {
                stats.total_queries += 1;
                *stats.queries_by_status.entry(query.status).or_default() += 1;
            }
        }
        stats
    }
}
