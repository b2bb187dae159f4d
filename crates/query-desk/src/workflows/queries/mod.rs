//! Query lifecycle and approval workflow for loan applications.
//!
//! Operations raises queries against an application, Sales and Credit answer them, and
//! gated actions pass through a two-phase Management approval. The application status is
//! always derived from its queries, and every change lands in an append-only event log.

pub mod aggregate;
pub mod approval;
pub mod domain;
pub mod engine;
pub mod events;
mod locks;
pub mod repository;
pub mod router;
pub mod service;
pub mod store;
pub mod visibility;

#[cfg(test)]
mod tests;

pub use aggregate::{
    derive_status, Application, ApplicationDraft, Query, QueueStatistics, Resolution,
    RevertStamp, ALL_QUERIES_RESOLVED,
};
pub use approval::{
    ApprovalError, ApprovalRequest, Decision, DecisionInput, Priority, PriorityConfig,
    RequestContext, RequestFilter, RequestStatus, RequestSubmission,
};
pub use domain::{
    ActionKind, ApplicationId, ApplicationStatus, EventId, Principal, QueryId, QueryStatus,
    RequestId, Role, Team, TeamTargets, ValidationError,
};
pub use engine::{resolve_target, DirectAction, RevertCommand, TransitionError};
pub use events::{EventFilter, EventKind, EventLogEntry, EventOrder, EventPayload};
pub use repository::{
    Audience, Clock, Notification, NotificationError, NotificationPublisher, QueryRepository,
    RepositoryError, SystemClock, WriteBatch,
};
pub use router::{principal_from_headers, query_router, status_for};
pub use service::{
    ApplicationFilter, ErrorKind, PendingRequestView, QueryDeskService, QueryServiceError,
    RaiseQuery, StatisticsView,
};
pub use store::InMemoryQueryStore;
pub use visibility::can_view;
