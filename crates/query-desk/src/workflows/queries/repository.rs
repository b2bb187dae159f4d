use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregate::Application;
use super::approval::{ApprovalRequest, RequestFilter};
use super::domain::{ApplicationId, QueryId, RequestId, Role, Team};
use super::events::{EventFilter, EventLogEntry};

/// Write to the application aggregate carried by a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum ApplicationWrite {
    Insert(Application),
    Update(Application),
}

impl ApplicationWrite {
    pub fn application(&self) -> &Application {
        match self {
            ApplicationWrite::Insert(application) | ApplicationWrite::Update(application) => {
                application
            }
        }
    }
}

/// Unit of work committed atomically: either every write lands or none does.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub application: Option<ApplicationWrite>,
    pub request: Option<ApprovalRequest>,
    pub events: Vec<EventLogEntry>,
}

impl WriteBatch {
    pub fn insert_application(mut self, application: Application) -> Self {
        self.application = Some(ApplicationWrite::Insert(application));
        self
    }

    pub fn update_application(mut self, application: Application) -> Self {
        self.application = Some(ApplicationWrite::Update(application));
        self
    }

    pub fn put_request(mut self, request: ApprovalRequest) -> Self {
        self.request = Some(request);
        self
    }

    pub fn append<I>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = EventLogEntry>,
    {
        self.events.extend(events);
        self
    }
}

/// Persistence port for applications, approval requests, and the event log.
///
/// Callers serialise mutations per application; implementations only need to make
/// `commit` all-or-nothing and keep events in commit order.
pub trait QueryRepository: Send + Sync {
    fn fetch_application(&self, id: &ApplicationId)
        -> Result<Option<Application>, RepositoryError>;
    fn find_by_app_no(&self, app_no: &str) -> Result<Option<Application>, RepositoryError>;
    /// Owning application of a child query.
    fn locate_query(&self, query_id: &QueryId) -> Result<Option<ApplicationId>, RepositoryError>;
    fn list_applications(&self) -> Result<Vec<Application>, RepositoryError>;
    fn fetch_request(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, RepositoryError>;
    fn list_requests(&self, filter: &RequestFilter)
        -> Result<Vec<ApprovalRequest>, RepositoryError>;
    fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventLogEntry>, RepositoryError>;
    fn commit(&self, batch: WriteBatch) -> Result<(), RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound notification hook (e-mail, chat, push adapters).
pub trait NotificationPublisher: Send + Sync {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Audience of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "audience", content = "name", rename_all = "snake_case")]
pub enum Audience {
    Team(Team),
    Role(Role),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub template: String,
    pub application_id: ApplicationId,
    pub audience: Vec<Audience>,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
