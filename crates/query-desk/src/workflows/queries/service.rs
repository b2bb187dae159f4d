use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::aggregate::{Application, ApplicationDraft, Query, QueueStatistics};
use super::approval::{
    self, ApprovalError, ApprovalRequest, DecisionInput, PriorityConfig, RequestFilter,
    RequestStatus, RequestSubmission,
};
use super::domain::{
    require, ApplicationId, ApplicationStatus, Principal, QueryId, QueryStatus, RequestId, Role,
    Team, TeamTargets, ValidationError,
};
use super::engine::{self, DirectAction, RevertCommand, TransitionError};
use super::events::{EventFilter, EventLogEntry, EventOrder};
use super::locks::KeyedLocks;
use super::repository::{
    Audience, Clock, Notification, NotificationPublisher, QueryRepository, RepositoryError,
    SystemClock, WriteBatch,
};
use super::visibility;

static APPLICATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static QUERY_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static REQUEST_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_application_id() -> ApplicationId {
    let id = APPLICATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ApplicationId(format!("app-{id:06}"))
}

fn next_query_id() -> QueryId {
    let id = QUERY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    QueryId(format!("qry-{id:06}"))
}

fn next_request_id() -> RequestId {
    let id = REQUEST_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RequestId(format!("req-{id:06}"))
}

const UNAVAILABLE_QUERY_TEXT: &str = "(query details unavailable)";

/// Command raising one or more queries against a loan application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaiseQuery {
    pub app_no: String,
    pub customer_name: String,
    #[serde(default)]
    pub branch: String,
    pub branch_code: String,
    #[serde(default)]
    pub loan_amount: Option<u64>,
    pub team_targets: TeamTargets,
    pub queries: Vec<String>,
}

impl RaiseQuery {
    fn validate(&self) -> Result<(), ValidationError> {
        require(&self.app_no, "app_no")?;
        require(&self.customer_name, "customer_name")?;
        require(&self.branch_code, "branch_code")?;
        if self.queries.is_empty() {
            return Err(ValidationError::MissingField("queries"));
        }
        if self.queries.iter().any(|text| text.trim().is_empty()) {
            return Err(ValidationError::EmptyQueryText);
        }
        Ok(())
    }
}

/// Listing filter over applications; every field is optional and they combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApplicationFilter {
    pub team: Option<Team>,
    pub branch_code: Option<String>,
    pub status: Option<ApplicationStatus>,
    /// Case-insensitive substring of the business application number.
    pub app_no: Option<String>,
}

impl ApplicationFilter {
    pub fn matches(&self, application: &Application) -> bool {
        self.team
            .map_or(true, |team| application.team_targets.includes(team))
            && self
                .branch_code
                .as_deref()
                .map_or(true, |code| application.branch_code.eq_ignore_ascii_case(code.trim()))
            && self
                .status
                .map_or(true, |status| application.status() == status)
            && self.app_no.as_deref().map_or(true, |needle| {
                application
                    .app_no
                    .to_ascii_lowercase()
                    .contains(&needle.trim().to_ascii_lowercase())
            })
    }
}

/// Pending request enriched with the live state of its query for the Management queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRequestView {
    #[serde(flatten)]
    pub request: ApprovalRequest,
    pub current_query_text: String,
    pub current_status: Option<QueryStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticsView {
    #[serde(flatten)]
    pub statistics: QueueStatistics,
    /// Set when storage could not be read and the counts are an empty placeholder.
    pub degraded: bool,
}

/// Error taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidStateTransition,
    Authorization,
    Storage,
}

/// Error raised by the query desk service.
#[derive(Debug, thiserror::Error)]
pub enum QueryServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("query {0} not found")]
    QueryNotFound(QueryId),
    #[error("approval request {0} not found")]
    RequestNotFound(RequestId),
    #[error("application {0} not found")]
    ApplicationNotFound(ApplicationId),
    #[error("approval request {id} was already {status}")]
    RequestAlreadyProcessed { id: RequestId, status: RequestStatus },
    #[error("{role} callers may not {action}")]
    Unauthorized { role: Role, action: &'static str },
    #[error("caller identity missing `{0}`")]
    MissingIdentity(&'static str),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl QueryServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryServiceError::Validation(_) => ErrorKind::Validation,
            QueryServiceError::QueryNotFound(_)
            | QueryServiceError::RequestNotFound(_)
            | QueryServiceError::ApplicationNotFound(_) => ErrorKind::NotFound,
            QueryServiceError::RequestAlreadyProcessed { .. } => ErrorKind::InvalidStateTransition,
            QueryServiceError::Unauthorized { .. } | QueryServiceError::MissingIdentity(_) => {
                ErrorKind::Authorization
            }
            QueryServiceError::Repository(_) => ErrorKind::Storage,
        }
    }
}

impl From<TransitionError> for QueryServiceError {
    fn from(value: TransitionError) -> Self {
        match value {
            TransitionError::QueryNotFound(id) => Self::QueryNotFound(id),
            TransitionError::Unauthorized { role, action } => Self::Unauthorized { role, action },
            TransitionError::Validation(err) => Self::Validation(err),
        }
    }
}

impl From<ApprovalError> for QueryServiceError {
    fn from(value: ApprovalError) -> Self {
        match value {
            ApprovalError::AlreadyProcessed { id, status } => {
                Self::RequestAlreadyProcessed { id, status }
            }
            ApprovalError::Unauthorized { role, action } => Self::Unauthorized { role, action },
            ApprovalError::Transition(err) => err.into(),
            ApprovalError::Validation(err) => Self::Validation(err),
        }
    }
}

/// Command surface of the query lifecycle: composes the transition engine, approval
/// coordinator, visibility rules, and persistence under per-application critical sections.
pub struct QueryDeskService<R, N> {
    repository: Arc<R>,
    notifier: Arc<N>,
    clock: Arc<dyn Clock>,
    priority: PriorityConfig,
    locks: KeyedLocks,
}

impl<R, N> QueryDeskService<R, N>
where
    R: QueryRepository + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(repository: Arc<R>, notifier: Arc<N>, priority: PriorityConfig) -> Self {
        Self {
            repository,
            notifier,
            clock: Arc::new(SystemClock),
            priority,
            locks: KeyedLocks::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn priority_config(&self) -> &PriorityConfig {
        &self.priority
    }

    /// Raise queries. A new `app_no` creates the application; a known one gains the new queries.
    pub fn raise_query(
        &self,
        principal: &Principal,
        command: RaiseQuery,
    ) -> Result<Application, QueryServiceError> {
        if !matches!(principal.role, Role::Operations | Role::Management) {
            return Err(self.deny(principal, "raise queries"));
        }
        command.validate()?;
        let app_no = command.app_no.trim().to_string();

        let application = self.locks.with(&format!("app-no:{app_no}"), || {
            match self.repository.find_by_app_no(&app_no)? {
                Some(existing) => self.append_queries(principal, existing.id, &command),
                None => self.create_application(principal, app_no.clone(), &command),
            }
        })?;

        let mut details = BTreeMap::new();
        details.insert("app_no".to_string(), application.app_no.clone());
        details.insert("raised_by".to_string(), principal.id.clone());
        self.notify(Notification {
            template: "query_raised".to_string(),
            application_id: application.id.clone(),
            audience: application.team_targets.teams().map(Audience::Team).collect(),
            details,
        });

        Ok(application)
    }

    fn create_application(
        &self,
        principal: &Principal,
        app_no: String,
        command: &RaiseQuery,
    ) -> Result<Application, QueryServiceError> {
        let now = self.clock.now();
        let draft = ApplicationDraft {
            id: next_application_id(),
            app_no,
            customer_name: command.customer_name.trim().to_string(),
            branch: command.branch.trim().to_string(),
            branch_code: command.branch_code.trim().to_string(),
            loan_amount: command.loan_amount,
            team_targets: command.team_targets,
            submitted_by: principal.id.clone(),
            submitted_at: now,
        };
        let mut application = Application::new(draft, Vec::new());
        let events = engine::raise_queries(
            &mut application,
            self.build_queries(principal, command, now),
            principal,
            now,
        )?;

        self.repository.commit(
            WriteBatch::default()
                .insert_application(application.clone())
                .append(events),
        )?;
        info!(
            application_id = %application.id,
            app_no = %application.app_no,
            queries = application.queries.len(),
            actor = %principal.id,
            "application raised"
        );
        Ok(application)
    }

    fn append_queries(
        &self,
        principal: &Principal,
        application_id: ApplicationId,
        command: &RaiseQuery,
    ) -> Result<Application, QueryServiceError> {
        self.locks.with(&application_id.0, || {
            let mut application = self
                .repository
                .fetch_application(&application_id)?
                .ok_or_else(|| QueryServiceError::ApplicationNotFound(application_id.clone()))?;
            if application.team_targets != command.team_targets {
                return Err(ValidationError::TeamRetargeting {
                    app_no: application.app_no.clone(),
                    current: application.team_targets,
                }
                .into());
            }

            let now = self.clock.now();
            let events = engine::raise_queries(
                &mut application,
                self.build_queries(principal, command, now),
                principal,
                now,
            )?;
            self.repository.commit(
                WriteBatch::default()
                    .update_application(application.clone())
                    .append(events),
            )?;
            info!(
                application_id = %application.id,
                added = command.queries.len(),
                actor = %principal.id,
                "queries appended to existing application"
            );
            Ok(application)
        })
    }

    fn build_queries(
        &self,
        principal: &Principal,
        command: &RaiseQuery,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Vec<Query> {
        command
            .queries
            .iter()
            .map(|text| {
                Query::raised(
                    next_query_id(),
                    text.trim().to_string(),
                    principal.id.clone(),
                    principal.role,
                    now,
                )
            })
            .collect()
    }

    /// Apply an unescalated terminal action to a query.
    pub fn apply_direct_action(
        &self,
        principal: &Principal,
        reference: &QueryId,
        action: DirectAction,
    ) -> Result<Query, QueryServiceError> {
        if let Err(err) = engine::authorize_direct_action(principal) {
            warn!(actor = %principal.id, role = %principal.role, "direct action refused");
            return Err(err.into());
        }

        self.with_application(reference, |mut application, query_id| {
            self.ensure_visible(&application, principal)?;
            let now = self.clock.now();
            let (query, entry) = engine::apply_direct_action(
                &mut application,
                &query_id,
                &action,
                principal,
                None,
                now,
            )?;
            let status = application.status();
            self.repository.commit(
                WriteBatch::default()
                    .update_application(application)
                    .append([entry]),
            )?;
            info!(
                %query_id,
                action = %action.action,
                actor = %principal.id,
                application_status = status.label(),
                "direct action applied"
            );
            Ok(query)
        })
    }

    /// Return a query to `pending`. Fails before touching anything when the reason is blank.
    pub fn revert(
        &self,
        principal: &Principal,
        reference: &QueryId,
        command: RevertCommand,
    ) -> Result<Query, QueryServiceError> {
        command.validate()?;

        self.with_application(reference, |mut application, query_id| {
            self.ensure_visible(&application, principal)?;
            let now = self.clock.now();
            let (query, entry) =
                engine::revert(&mut application, &query_id, &command, principal, now)?;
            self.repository.commit(
                WriteBatch::default()
                    .update_application(application)
                    .append([entry]),
            )?;
            info!(%query_id, actor = %principal.id, "query reverted to pending");
            Ok(query)
        })
    }

    /// Append a chat message. Status is untouched, so resolved queries still accept messages.
    pub fn post_message(
        &self,
        principal: &Principal,
        reference: &QueryId,
        text: &str,
    ) -> Result<EventLogEntry, QueryServiceError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        self.with_application(reference, |application, query_id| {
            self.ensure_visible(&application, principal)?;
            let entry =
                engine::post_message(&application, &query_id, text, principal, self.clock.now())?;
            self.repository
                .commit(WriteBatch::default().append([entry.clone()]))?;
            debug!(%query_id, actor = %principal.id, "message posted");
            Ok(entry)
        })
    }

    /// Phase one of a gated action. The query stays exactly as it is.
    pub fn submit_request(
        &self,
        principal: &Principal,
        reference: &QueryId,
        submission: RequestSubmission,
    ) -> Result<ApprovalRequest, QueryServiceError> {
        if let Err(err) = approval::authorize_submission(principal) {
            warn!(actor = %principal.id, role = %principal.role, "approval request refused");
            return Err(err.into());
        }

        let request = self.with_application(reference, |application, query_id| {
            self.ensure_visible(&application, principal)?;
            let (request, entry) = approval::submit(
                next_request_id(),
                &application,
                &query_id,
                &submission,
                principal,
                &self.priority,
                self.clock.now(),
            )?;
            self.repository.commit(
                WriteBatch::default()
                    .put_request(request.clone())
                    .append([entry]),
            )?;
            info!(
                request_id = %request.id,
                %query_id,
                request_type = %request.request_type,
                priority = %request.priority,
                actor = %principal.id,
                "approval request submitted"
            );
            Ok(request)
        })?;

        let mut details = BTreeMap::new();
        details.insert("request_id".to_string(), request.id.0.clone());
        details.insert("request_type".to_string(), request.request_type.to_string());
        details.insert("priority".to_string(), request.priority.to_string());
        self.notify(Notification {
            template: "approval_requested".to_string(),
            application_id: request.application_id.clone(),
            audience: vec![Audience::Role(Role::Management)],
            details,
        });

        Ok(request)
    }

    /// Phase two: settle a pending request. A second decision on the same request fails.
    pub fn decide_request(
        &self,
        principal: &Principal,
        request_id: &RequestId,
        input: DecisionInput,
    ) -> Result<ApprovalRequest, QueryServiceError> {
        if let Err(err) = approval::authorize_decision(principal) {
            warn!(actor = %principal.id, role = %principal.role, "approval decision refused");
            return Err(err.into());
        }

        let application_id = self
            .repository
            .fetch_request(request_id)?
            .ok_or_else(|| QueryServiceError::RequestNotFound(request_id.clone()))?
            .application_id;

        let request = self.locks.with(&application_id.0, || {
            let mut request = self
                .repository
                .fetch_request(request_id)?
                .ok_or_else(|| QueryServiceError::RequestNotFound(request_id.clone()))?;
            let mut application = self
                .repository
                .fetch_application(&application_id)?
                .ok_or_else(|| QueryServiceError::QueryNotFound(request.query_id.clone()))?;

            let (query, events) = approval::decide(
                &mut application,
                &mut request,
                &input,
                principal,
                self.clock.now(),
            )?;

            let mut batch = WriteBatch::default()
                .put_request(request.clone())
                .append(events);
            if query.is_some() {
                batch = batch.update_application(application);
            }
            self.repository.commit(batch)?;
            info!(
                request_id = %request.id,
                decision = request.status.label(),
                actor = %principal.id,
                "approval request decided"
            );
            Ok::<_, QueryServiceError>(request)
        })?;

        let mut details = BTreeMap::new();
        details.insert("request_id".to_string(), request.id.0.clone());
        details.insert("status".to_string(), request.status.to_string());
        self.notify(Notification {
            template: "approval_decided".to_string(),
            application_id: request.application_id.clone(),
            audience: vec![Audience::Role(Role::Operations)],
            details,
        });

        Ok(request)
    }

    /// Applications visible to the caller that match `filter`, most recently updated first.
    pub fn list_applications(
        &self,
        principal: &Principal,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, QueryServiceError> {
        let mut applications: Vec<Application> =
            visibility::visible(self.repository.list_applications()?, principal)
                .filter(|application| filter.matches(application))
                .collect();
        applications.sort_by(|left, right| {
            right
                .last_updated
                .cmp(&left.last_updated)
                .then_with(|| left.app_no.cmp(&right.app_no))
        });
        debug!(actor = %principal.id, count = applications.len(), "applications listed");
        Ok(applications)
    }

    pub fn get_application(
        &self,
        principal: &Principal,
        application_id: &ApplicationId,
    ) -> Result<Application, QueryServiceError> {
        let application = self
            .repository
            .fetch_application(application_id)?
            .ok_or_else(|| QueryServiceError::ApplicationNotFound(application_id.clone()))?;
        self.ensure_visible(&application, principal)?;
        Ok(application)
    }

    /// Undecided requests, newest first, optionally narrowed to one query.
    pub fn list_pending_requests(
        &self,
        principal: &Principal,
        query_id: Option<QueryId>,
    ) -> Result<Vec<ApprovalRequest>, QueryServiceError> {
        if !approval::can_list_requests(principal) {
            return Err(self.deny(principal, "view the approval queue"));
        }

        let mut requests = self
            .repository
            .list_requests(&RequestFilter::pending().for_query(query_id))?;
        requests.sort_by(|left, right| {
            right
                .request_date
                .cmp(&left.request_date)
                .then_with(|| right.id.cmp(&left.id))
        });
        Ok(requests)
    }

    /// Pending requests joined with their query's live state. An application that cannot be
    /// loaded yields placeholder details instead of failing the whole queue.
    pub fn pending_queue(
        &self,
        principal: &Principal,
        query_id: Option<QueryId>,
    ) -> Result<Vec<PendingRequestView>, QueryServiceError> {
        let requests = self.list_pending_requests(principal, query_id)?;
        Ok(requests
            .into_iter()
            .map(|request| {
                let live = match self.repository.fetch_application(&request.application_id) {
                    Ok(application) => application.and_then(|application| {
                        application
                            .query(&request.query_id)
                            .map(|query| (query.text.clone(), query.status))
                    }),
                    Err(err) => {
                        warn!(request_id = %request.id, error = %err, "queue enrichment degraded");
                        None
                    }
                };
                let (current_query_text, current_status) = match live {
                    Some((text, status)) => (text, Some(status)),
                    None => (UNAVAILABLE_QUERY_TEXT.to_string(), None),
                };
                PendingRequestView {
                    request,
                    current_query_text,
                    current_status,
                }
            })
            .collect())
    }

    /// History of a query, in the direction the caller asks for.
    pub fn list_events(
        &self,
        principal: &Principal,
        reference: &QueryId,
        order: EventOrder,
    ) -> Result<Vec<EventLogEntry>, QueryServiceError> {
        let application_id = self.owning_application(reference)?;
        let application = self
            .repository
            .fetch_application(&application_id)?
            .ok_or_else(|| QueryServiceError::QueryNotFound(reference.clone()))?;
        self.ensure_visible(&application, principal)?;
        let query_id = engine::resolve_target(&application, reference)
            .ok_or_else(|| QueryServiceError::QueryNotFound(reference.clone()))?;

        let entries = self
            .repository
            .list_events(&EventFilter::for_query(query_id))?;
        Ok(order.arrange(entries))
    }

    /// Counts over the applications the caller can see; storage failure yields a degraded view.
    pub fn statistics(&self, principal: &Principal) -> StatisticsView {
        match self.repository.list_applications() {
            Ok(applications) => {
                let visible: Vec<Application> =
                    visibility::visible(applications, principal).collect();
                StatisticsView {
                    statistics: QueueStatistics::from_applications(&visible),
                    degraded: false,
                }
            }
            Err(err) => {
                warn!(error = %err, "statistics unavailable; returning degraded view");
                StatisticsView {
                    statistics: QueueStatistics::default(),
                    degraded: true,
                }
            }
        }
    }

    fn owning_application(&self, reference: &QueryId) -> Result<ApplicationId, QueryServiceError> {
        let as_application = ApplicationId(reference.0.clone());
        if self
            .repository
            .fetch_application(&as_application)?
            .is_some()
        {
            return Ok(as_application);
        }
        self.repository
            .locate_query(reference)?
            .ok_or_else(|| QueryServiceError::QueryNotFound(reference.clone()))
    }

    /// Run `f` inside the owning application's critical section with freshly loaded state.
    fn with_application<T>(
        &self,
        reference: &QueryId,
        f: impl FnOnce(Application, QueryId) -> Result<T, QueryServiceError>,
    ) -> Result<T, QueryServiceError> {
        let application_id = self.owning_application(reference)?;
        self.locks.with(&application_id.0, || {
            let application = self
                .repository
                .fetch_application(&application_id)?
                .ok_or_else(|| QueryServiceError::QueryNotFound(reference.clone()))?;
            let query_id = engine::resolve_target(&application, reference)
                .ok_or_else(|| QueryServiceError::QueryNotFound(reference.clone()))?;
            f(application, query_id)
        })
    }

    fn ensure_visible(
        &self,
        application: &Application,
        principal: &Principal,
    ) -> Result<(), QueryServiceError> {
        if visibility::can_view(application, principal) {
            Ok(())
        } else {
            Err(self.deny(principal, "access this application"))
        }
    }

    fn deny(&self, principal: &Principal, action: &'static str) -> QueryServiceError {
        warn!(actor = %principal.id, role = %principal.role, action, "authorization refused");
        QueryServiceError::Unauthorized {
            role: principal.role,
            action,
        }
    }

    fn notify(&self, notification: Notification) {
        let template = notification.template.clone();
        if let Err(err) = self.notifier.publish(notification) {
            warn!(%template, error = %err, "notification dropped after commit");
        }
    }
}
