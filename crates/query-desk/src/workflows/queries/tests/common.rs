use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::queries::aggregate::{Application, ApplicationDraft, Query};
use crate::workflows::queries::approval::{ApprovalRequest, PriorityConfig, RequestFilter};
use crate::workflows::queries::domain::{
    ApplicationId, Principal, QueryId, RequestId, Role, TeamTargets,
};
use crate::workflows::queries::events::{EventFilter, EventLogEntry};
use crate::workflows::queries::repository::{
    Clock, Notification, NotificationError, NotificationPublisher, QueryRepository,
    RepositoryError, WriteBatch,
};
use crate::workflows::queries::router::{
    query_router, ACTOR_BRANCHES_HEADER, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER, ACTOR_VIEW_HEADER,
};
use crate::workflows::queries::service::{QueryDeskService, RaiseQuery};
use crate::workflows::queries::store::InMemoryQueryStore;

pub(super) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 30, 0)
        .single()
        .expect("valid timestamp")
}

/// Clock that advances one second per reading so ordering assertions stay deterministic.
pub(super) struct StepClock {
    start: DateTime<Utc>,
    ticks: AtomicI64,
}

impl Default for StepClock {
    fn default() -> Self {
        Self {
            start: base_time(),
            ticks: AtomicI64::new(0),
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        self.start + Duration::seconds(tick)
    }
}

pub(super) fn operations() -> Principal {
    Principal::new("ops.rekha", Role::Operations)
}

pub(super) fn manager() -> Principal {
    Principal::new("mgr.anand", Role::Management)
}

pub(super) fn sales(branches: &[&str]) -> Principal {
    Principal::new("sales.kiran", Role::Sales).with_branches(branches.iter().copied())
}

pub(super) fn credit(branches: &[&str]) -> Principal {
    Principal::new("credit.meera", Role::Credit).with_branches(branches.iter().copied())
}

pub(super) fn raise_command(
    app_no: &str,
    branch_code: &str,
    team_targets: TeamTargets,
    queries: &[&str],
) -> RaiseQuery {
    RaiseQuery {
        app_no: app_no.to_string(),
        customer_name: "Asha Verma".to_string(),
        branch: format!("{branch_code} main"),
        branch_code: branch_code.to_string(),
        loan_amount: Some(750_000),
        team_targets,
        queries: queries.iter().map(|text| text.to_string()).collect(),
    }
}

/// Standalone aggregate for engine-level tests.
pub(super) fn application_with_queries(count: usize) -> Application {
    let at = base_time();
    let queries = (0..count)
        .map(|index| {
            Query::raised(
                QueryId(format!("q-{index}")),
                format!("Document {index} missing"),
                "ops.rekha".to_string(),
                Role::Operations,
                at,
            )
        })
        .collect();
    Application::new(
        ApplicationDraft {
            id: ApplicationId("app-test".to_string()),
            app_no: "LN-1001".to_string(),
            customer_name: "Asha Verma".to_string(),
            branch: "Mumbai main".to_string(),
            branch_code: "MUM".to_string(),
            loan_amount: Some(750_000),
            team_targets: TeamTargets::Both,
            submitted_by: "ops.rekha".to_string(),
            submitted_at: at,
        },
        queries,
    )
}

pub(super) type TestService<R = InMemoryQueryStore> = QueryDeskService<R, MemoryNotifier>;

pub(super) fn build_service() -> (TestService, Arc<InMemoryQueryStore>, Arc<MemoryNotifier>) {
    let repository = Arc::new(InMemoryQueryStore::new());
    let notifier = Arc::new(MemoryNotifier::default());
    let service = QueryDeskService::new(
        repository.clone(),
        notifier.clone(),
        PriorityConfig::default(),
    )
    .with_clock(Arc::new(StepClock::default()));
    (service, repository, notifier)
}

pub(super) fn build_faulty_service() -> (TestService<FaultyRepository>, Arc<FaultyRepository>) {
    let repository = Arc::new(FaultyRepository::default());
    let service = QueryDeskService::new(
        repository.clone(),
        Arc::new(MemoryNotifier::default()),
        PriorityConfig::default(),
    )
    .with_clock(Arc::new(StepClock::default()));
    (service, repository)
}

#[derive(Default)]
pub(super) struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub(super) fn templates(&self) -> Vec<String> {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .iter()
            .map(|notification| notification.template.clone())
            .collect()
    }

    pub(super) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }
}

impl NotificationPublisher for MemoryNotifier {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
        Ok(())
    }
}

pub(super) struct OfflineNotifier;

impl NotificationPublisher for OfflineNotifier {
    fn publish(&self, _notification: Notification) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp relay offline".to_string()))
    }
}

/// In-memory store whose individual operations can be switched to fail.
#[derive(Default)]
pub(super) struct FaultyRepository {
    pub(super) inner: InMemoryQueryStore,
    pub(super) fail_commit: AtomicBool,
    pub(super) fail_fetch: AtomicBool,
    pub(super) fail_list: AtomicBool,
}

impl FaultyRepository {
    fn check(flag: &AtomicBool) -> Result<(), RepositoryError> {
        if flag.load(Ordering::SeqCst) {
            Err(RepositoryError::Unavailable("database offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl QueryRepository for FaultyRepository {
    fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        Self::check(&self.fail_fetch)?;
        self.inner.fetch_application(id)
    }

    fn find_by_app_no(&self, app_no: &str) -> Result<Option<Application>, RepositoryError> {
        Self::check(&self.fail_fetch)?;
        self.inner.find_by_app_no(app_no)
    }

    fn locate_query(&self, query_id: &QueryId) -> Result<Option<ApplicationId>, RepositoryError> {
        self.inner.locate_query(query_id)
    }

    fn list_applications(&self) -> Result<Vec<Application>, RepositoryError> {
        Self::check(&self.fail_list)?;
        self.inner.list_applications()
    }

    fn fetch_request(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, RepositoryError> {
        self.inner.fetch_request(id)
    }

    fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        self.inner.list_requests(filter)
    }

    fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventLogEntry>, RepositoryError> {
        self.inner.list_events(filter)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), RepositoryError> {
        Self::check(&self.fail_commit)?;
        self.inner.commit(batch)
    }
}

pub(super) struct UnavailableRepository;

impl QueryRepository for UnavailableRepository {
    fn fetch_application(
        &self,
        _id: &ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn find_by_app_no(&self, _app_no: &str) -> Result<Option<Application>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn locate_query(&self, _query_id: &QueryId) -> Result<Option<ApplicationId>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn list_applications(&self) -> Result<Vec<Application>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch_request(&self, _id: &RequestId) -> Result<Option<ApprovalRequest>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn list_requests(
        &self,
        _filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn list_events(&self, _filter: &EventFilter) -> Result<Vec<EventLogEntry>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn commit(&self, _batch: WriteBatch) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) fn identity_headers(principal: &Principal) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACTOR_ID_HEADER,
        HeaderValue::from_str(&principal.id).expect("ascii id"),
    );
    headers.insert(
        ACTOR_ROLE_HEADER,
        HeaderValue::from_static(principal.role.label()),
    );
    if !principal.assigned_branches.is_empty() {
        let branches = principal
            .assigned_branches
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(",");
        headers.insert(
            ACTOR_BRANCHES_HEADER,
            HeaderValue::from_str(&branches).expect("ascii branches"),
        );
    }
    headers.insert(
        ACTOR_VIEW_HEADER,
        HeaderValue::from_static(principal.management_view.label()),
    );
    headers
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) fn query_router_with_service(service: TestService) -> axum::Router {
    query_router(Arc::new(service))
}
