use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query as QueryParams, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::approval::{Decision, DecisionInput, RequestSubmission};
use super::domain::{
    non_blank, ActionKind, ApplicationId, Principal, QueryId, RequestId, Role, TeamTargets,
    ValidationError,
};
use super::engine::{DirectAction, RevertCommand};
use super::events::EventOrder;
use super::repository::{NotificationPublisher, QueryRepository};
use super::service::{
    ApplicationFilter, ErrorKind, QueryDeskService, QueryServiceError, RaiseQuery,
};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const ACTOR_BRANCHES_HEADER: &str = "x-actor-branches";
pub const ACTOR_VIEW_HEADER: &str = "x-actor-view";

/// Router builder exposing the query lifecycle and approval endpoints.
pub fn query_router<R, N>(service: Arc<QueryDeskService<R, N>>) -> Router
where
    R: QueryRepository + 'static,
    N: NotificationPublisher + 'static,
{
    Router::new()
        .route(
            "/api/v1/applications",
            post(raise_handler::<R, N>).get(list_applications_handler::<R, N>),
        )
        .route(
            "/api/v1/applications/:application_id",
            get(application_handler::<R, N>),
        )
        .route(
            "/api/v1/queries/:query_id/actions",
            post(direct_action_handler::<R, N>),
        )
        .route(
            "/api/v1/queries/:query_id/revert",
            post(revert_handler::<R, N>),
        )
        .route(
            "/api/v1/queries/:query_id/messages",
            post(message_handler::<R, N>),
        )
        .route(
            "/api/v1/queries/:query_id/events",
            get(events_handler::<R, N>),
        )
        .route(
            "/api/v1/queries/:query_id/requests",
            post(submit_request_handler::<R, N>),
        )
        .route(
            "/api/v1/requests/pending",
            get(pending_requests_handler::<R, N>),
        )
        .route(
            "/api/v1/requests/:request_id/decision",
            post(decision_handler::<R, N>),
        )
        .route("/api/v1/statistics", get(statistics_handler::<R, N>))
        .with_state(service)
}

/// Resolve the calling principal from identity headers.
pub fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, QueryServiceError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let id = header(ACTOR_ID_HEADER).ok_or(QueryServiceError::MissingIdentity(ACTOR_ID_HEADER))?;
    let role: Role = header(ACTOR_ROLE_HEADER)
        .ok_or(QueryServiceError::MissingIdentity(ACTOR_ROLE_HEADER))?
        .parse()?;
    let branches = header(ACTOR_BRANCHES_HEADER)
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|branch| !branch.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let view = match header(ACTOR_VIEW_HEADER) {
        Some(view) => view.parse()?,
        None => TeamTargets::Both,
    };

    Ok(Principal::new(id, role)
        .with_branches(branches)
        .with_view(view))
}

/// HTTP status for a workflow failure. A missing identity is 401, not 403.
pub fn status_for(error: &QueryServiceError) -> StatusCode {
    match (error, error.kind()) {
        (QueryServiceError::MissingIdentity(_), _) => StatusCode::UNAUTHORIZED,
        (_, ErrorKind::Validation) => StatusCode::UNPROCESSABLE_ENTITY,
        (_, ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        (_, ErrorKind::InvalidStateTransition) => StatusCode::CONFLICT,
        (_, ErrorKind::Authorization) => StatusCode::FORBIDDEN,
        (_, ErrorKind::Storage) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(error: QueryServiceError) -> Response {
    let payload = json!({
        "error": error.to_string(),
        "kind": error.kind(),
    });
    (status_for(&error), Json(payload)).into_response()
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, QueryServiceError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ValidationError::MalformedBody(rejection.body_text()).into())
}

fn parse_optional<T>(value: Option<String>) -> Result<Option<T>, ValidationError>
where
    T: std::str::FromStr<Err = ValidationError>,
{
    non_blank(value).map(|value| value.parse()).transpose()
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApplicationListParams {
    team: Option<String>,
    branch: Option<String>,
    status: Option<String>,
    app_no: Option<String>,
}

impl ApplicationListParams {
    fn into_filter(self) -> Result<ApplicationFilter, ValidationError> {
        Ok(ApplicationFilter {
            team: parse_optional(self.team)?,
            branch_code: non_blank(self.branch),
            status: parse_optional(self.status)?,
            app_no: non_blank(self.app_no),
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionBody {
    action: String,
    #[serde(default)]
    assigned_to: Option<String>,
    #[serde(default)]
    remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RevertBody {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    team: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageBody {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RequestBody {
    request_type: String,
    #[serde(default)]
    assigned_to: Option<String>,
    #[serde(default)]
    remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionBody {
    decision: String,
    #[serde(default)]
    assigned_to: Option<String>,
    #[serde(default)]
    remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventParams {
    order: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PendingParams {
    query_id: Option<String>,
}

pub(crate) async fn raise_handler<R, N>(
    State(service): State<Arc<QueryDeskService<R, N>>>,
    headers: HeaderMap,
    payload: Result<Json<RaiseQuery>, JsonRejection>,
) -> Response
where
    R: QueryRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let result = principal_from_headers(&headers).and_then(|principal| {
        let command = json_body(payload)?;
        service.raise_query(&principal, command)
    });
    match result {
        Ok(application) => (StatusCode::CREATED, Json(application)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn list_applications_handler<R, N>(
    State(service): State<Arc<QueryDeskService<R, N>>>,
    headers: HeaderMap,
    QueryParams(params): QueryParams<ApplicationListParams>,
) -> Response
where
    R: QueryRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let result = principal_from_headers(&headers).and_then(|principal| {
        let filter = params.into_filter()?;
        service.list_applications(&principal, &filter)
    });
    match result {
        Ok(applications) => (StatusCode::OK, Json(applications)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn application_handler<R, N>(
    State(service): State<Arc<QueryDeskService<R, N>>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    R: QueryRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let id = ApplicationId(application_id);
    let result = principal_from_headers(&headers)
        .and_then(|principal| service.get_application(&principal, &id));
    match result {
        Ok(application) => (StatusCode::OK, Json(application)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn direct_action_handler<R, N>(
    State(service): State<Arc<QueryDeskService<R, N>>>,
    headers: HeaderMap,
    Path(query_id): Path<String>,
    payload: Result<Json<ActionBody>, JsonRejection>,
) -> Response
where
    R: QueryRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let result = principal_from_headers(&headers).and_then(|principal| {
        let body = json_body(payload)?;
        let action = DirectAction {
            action: body.action.parse::<ActionKind>()?,
            assigned_to: body.assigned_to,
            remarks: body.remarks,
        };
        service.apply_direct_action(&principal, &QueryId(query_id), action)
    });
    match result {
        Ok(query) => (StatusCode::OK, Json(query)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn revert_handler<R, N>(
    State(service): State<Arc<QueryDeskService<R, N>>>,
    headers: HeaderMap,
    Path(query_id): Path<String>,
    payload: Result<Json<RevertBody>, JsonRejection>,
) -> Response
where
    R: QueryRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let result = principal_from_headers(&headers).and_then(|principal| {
        let body = json_body(payload)?;
        let command = RevertCommand {
            reason: body.reason,
            team: parse_optional(body.team)?,
        };
        service.revert(&principal, &QueryId(query_id), command)
    });
    match result {
        Ok(query) => (StatusCode::OK, Json(query)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn message_handler<R, N>(
    State(service): State<Arc<QueryDeskService<R, N>>>,
    headers: HeaderMap,
    Path(query_id): Path<String>,
    payload: Result<Json<MessageBody>, JsonRejection>,
) -> Response
where
    R: QueryRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let result = principal_from_headers(&headers).and_then(|principal| {
        let body = json_body(payload)?;
        service.post_message(&principal, &QueryId(query_id), &body.text)
    });
    match result {
        Ok(entry) => (StatusCode::CREATED, Json(entry)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn events_handler<R, N>(
    State(service): State<Arc<QueryDeskService<R, N>>>,
    headers: HeaderMap,
    Path(query_id): Path<String>,
    QueryParams(params): QueryParams<EventParams>,
) -> Response
where
    R: QueryRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let result = principal_from_headers(&headers).and_then(|principal| {
        let order = parse_optional::<EventOrder>(params.order)?.unwrap_or_default();
        service.list_events(&principal, &QueryId(query_id), order)
    });
    match result {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn submit_request_handler<R, N>(
    State(service): State<Arc<QueryDeskService<R, N>>>,
    headers: HeaderMap,
    Path(query_id): Path<String>,
    payload: Result<Json<RequestBody>, JsonRejection>,
) -> Response
where
    R: QueryRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let result = principal_from_headers(&headers).and_then(|principal| {
        let body = json_body(payload)?;
        let submission = RequestSubmission {
            request_type: body.request_type.parse::<ActionKind>()?,
            assigned_to: body.assigned_to,
            remarks: body.remarks,
        };
        service.submit_request(&principal, &QueryId(query_id), submission)
    });
    match result {
        Ok(request) => (StatusCode::CREATED, Json(request)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn pending_requests_handler<R, N>(
    State(service): State<Arc<QueryDeskService<R, N>>>,
    headers: HeaderMap,
    QueryParams(params): QueryParams<PendingParams>,
) -> Response
where
    R: QueryRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let query_id = non_blank(params.query_id).map(QueryId);
    let result = principal_from_headers(&headers)
        .and_then(|principal| service.pending_queue(&principal, query_id));
    match result {
        Ok(queue) => (StatusCode::OK, Json(queue)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn decision_handler<R, N>(
    State(service): State<Arc<QueryDeskService<R, N>>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    payload: Result<Json<DecisionBody>, JsonRejection>,
) -> Response
where
    R: QueryRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let result = principal_from_headers(&headers).and_then(|principal| {
        let body = json_body(payload)?;
        let input = DecisionInput {
            decision: body.decision.parse::<Decision>()?,
            assigned_to: body.assigned_to,
            remarks: body.remarks,
        };
        service.decide_request(&principal, &RequestId(request_id), input)
    });
    match result {
        Ok(request) => (StatusCode::OK, Json(request)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn statistics_handler<R, N>(
    State(service): State<Arc<QueryDeskService<R, N>>>,
    headers: HeaderMap,
) -> Response
where
    R: QueryRepository + 'static,
    N: NotificationPublisher + 'static,
{
    match principal_from_headers(&headers) {
        Ok(principal) => (StatusCode::OK, Json(service.statistics(&principal))).into_response(),
        Err(error) => error_response(error),
    }
}
