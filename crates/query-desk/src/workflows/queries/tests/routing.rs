use super::common::*;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::workflows::queries::domain::{Principal, Role, TeamTargets};
use crate::workflows::queries::router::{principal_from_headers, statistics_handler};
use crate::workflows::queries::service::{QueryDeskService, QueryServiceError};
use crate::workflows::queries::approval::PriorityConfig;

fn request(method: &str, uri: &str, principal: &Principal, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in identity_headers(principal).iter() {
        builder = builder.header(name, value);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).expect("serialise body")))
            .expect("request builds"),
        None => builder.body(Body::empty()).expect("request builds"),
    }
}

fn raise_body(app_no: &str, branch_code: &str, targets: &str) -> Value {
    json!({
        "app_no": app_no,
        "customer_name": "Asha Verma",
        "branch": "Mumbai main",
        "branch_code": branch_code,
        "loan_amount": 1_500_000,
        "team_targets": targets,
        "queries": ["Bank statement missing"],
    })
}

#[test]
fn principal_is_read_from_identity_headers() {
    let mut headers = HeaderMap::new();
    headers.insert("x-actor-id", "mgr.anand".parse().expect("header"));
    headers.insert("x-actor-role", "Management".parse().expect("header"));
    headers.insert("x-actor-branches", "MUM, DEL,".parse().expect("header"));
    headers.insert("x-actor-view", "credit".parse().expect("header"));

    let principal = principal_from_headers(&headers).expect("identity resolves");
    assert_eq!(principal.role, Role::Management);
    assert_eq!(principal.management_view, TeamTargets::Credit);
    assert_eq!(
        principal.assigned_branches.iter().cloned().collect::<Vec<_>>(),
        vec!["DEL".to_string(), "MUM".to_string()]
    );
}

#[test]
fn missing_identity_is_reported() {
    let mut headers = HeaderMap::new();
    headers.insert("x-actor-role", "sales".parse().expect("header"));
    assert!(matches!(
        principal_from_headers(&headers),
        Err(QueryServiceError::MissingIdentity("x-actor-id"))
    ));
}

#[tokio::test]
async fn statistics_handler_requires_identity() {
    let (service, _, _) = build_service();
    let response = statistics_handler(State(Arc::new(service)), HeaderMap::new()).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["kind"], "authorization");
}

#[tokio::test]
async fn statistics_handler_reports_degraded_storage() {
    let service = Arc::new(QueryDeskService::new(
        Arc::new(UnavailableRepository),
        Arc::new(MemoryNotifier::default()),
        PriorityConfig::default(),
    ));
    let response = statistics_handler(State(service), identity_headers(&operations())).await;

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["degraded"], true);
    assert_eq!(payload["total_applications"], 0);
}

#[tokio::test]
async fn raise_route_creates_application() {
    let (service, _, _) = build_service();
    let router = query_router_with_service(service);

    let response = router
        .oneshot(request(
            "POST",
            "/api/v1/applications",
            &operations(),
            Some(raise_body("LN-4001", "MUM", "both")),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["status"], "pending");
    assert_eq!(payload["team_targets"], "both");
    assert_eq!(payload["queries"][0]["status"], "pending");
}

#[tokio::test]
async fn direct_action_route_maps_authorization_to_forbidden() {
    let (service, _, _) = build_service();
    let application = service
        .raise_query(
            &operations(),
            raise_command("LN-4002", "MUM", TeamTargets::Sales, &["Doc"]),
        )
        .expect("raise");
    let router = query_router_with_service(service);
    let uri = format!("/api/v1/queries/{}/actions", application.queries[0].id);

    let response = router
        .oneshot(request(
            "POST",
            &uri,
            &operations(),
            Some(json!({ "action": "approve" })),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let payload = read_json_body(response).await;
    assert_eq!(payload["kind"], "authorization");
}

#[tokio::test]
async fn unknown_action_is_unprocessable() {
    let (service, _, _) = build_service();
    let application = service
        .raise_query(
            &operations(),
            raise_command("LN-4003", "MUM", TeamTargets::Sales, &["Doc"]),
        )
        .expect("raise");
    let router = query_router_with_service(service);
    let uri = format!("/api/v1/queries/{}/actions", application.id);

    let response = router
        .oneshot(request(
            "POST",
            &uri,
            &manager(),
            Some(json!({ "action": "escalate" })),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn gated_flow_over_http() {
    let (service, _, _) = build_service();
    let application = service
        .raise_query(
            &operations(),
            raise_command("LN-4004", "MUM", TeamTargets::Credit, &["Doc"]),
        )
        .expect("raise");
    let router = query_router_with_service(service);
    let query_id = application.queries[0].id.clone();

    let submitted = router
        .clone()
        .oneshot(request(
            "POST",
            &format!("/api/v1/queries/{query_id}/requests"),
            &operations(),
            Some(json!({ "request_type": "request-otc", "remarks": "Original pending" })),
        ))
        .await
        .expect("route executes");
    assert_eq!(submitted.status(), StatusCode::CREATED);
    let submitted = read_json_body(submitted).await;
    assert_eq!(submitted["priority"], "high");
    let request_id = submitted["id"].as_str().expect("request id").to_string();

    let queue = router
        .clone()
        .oneshot(request("GET", "/api/v1/requests/pending", &manager(), None))
        .await
        .expect("route executes");
    assert_eq!(queue.status(), StatusCode::OK);
    let queue = read_json_body(queue).await;
    assert_eq!(queue[0]["id"], request_id.as_str());
    assert_eq!(queue[0]["current_status"], "pending");

    let decision_uri = format!("/api/v1/requests/{request_id}/decision");
    let decided = router
        .clone()
        .oneshot(request(
            "POST",
            &decision_uri,
            &manager(),
            Some(json!({ "decision": "approve" })),
        ))
        .await
        .expect("route executes");
    assert_eq!(decided.status(), StatusCode::OK);

    let repeated = router
        .clone()
        .oneshot(request(
            "POST",
            &decision_uri,
            &manager(),
            Some(json!({ "decision": "reject", "remarks": "late" })),
        ))
        .await
        .expect("route executes");
    assert_eq!(repeated.status(), StatusCode::CONFLICT);

    let events = router
        .oneshot(request(
            "GET",
            &format!("/api/v1/queries/{query_id}/events?order=newest_first"),
            &manager(),
            None,
        ))
        .await
        .expect("route executes");
    let events = read_json_body(events).await;
    assert_eq!(events[0]["kind"], "action");
    assert_eq!(events[0]["payload"]["type"], "direct_action");
    assert_eq!(events[0]["payload"]["request_id"], request_id.as_str());
}

#[tokio::test]
async fn revert_route_requires_reason() {
    let (service, _, _) = build_service();
    let application = service
        .raise_query(
            &operations(),
            raise_command("LN-4005", "MUM", TeamTargets::Sales, &["Doc"]),
        )
        .expect("raise");
    let router = query_router_with_service(service);

    let response = router
        .oneshot(request(
            "POST",
            &format!("/api/v1/queries/{}/revert", application.queries[0].id),
            &manager(),
            Some(json!({ "team": "sales" })),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["kind"], "validation");
}

#[tokio::test]
async fn application_listing_respects_visibility() {
    let (service, _, _) = build_service();
    service
        .raise_query(
            &operations(),
            raise_command("LN-4006", "MUM", TeamTargets::Sales, &["Doc"]),
        )
        .expect("raise");
    service
        .raise_query(
            &operations(),
            raise_command("LN-4007", "DEL", TeamTargets::Sales, &["Doc"]),
        )
        .expect("raise");
    let router = query_router_with_service(service);

    let response = router
        .oneshot(request(
            "GET",
            "/api/v1/applications?team=sales",
            &sales(&["MUM"]),
            None,
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    let numbers: Vec<_> = payload
        .as_array()
        .expect("array")
        .iter()
        .map(|application| application["app_no"].as_str().expect("app_no").to_string())
        .collect();
    assert_eq!(numbers, vec!["LN-4006".to_string()]);
}

#[tokio::test]
async fn unknown_application_is_not_found() {
    let (service, _, _) = build_service();
    let router = query_router_with_service(service);

    let response = router
        .oneshot(request(
            "GET",
            "/api/v1/applications/app-999999",
            &operations(),
            None,
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_team_target_is_a_structured_validation_error() {
    let (service, _, _) = build_service();
    let router = query_router_with_service(service);

    let response = router
        .oneshot(request(
            "POST",
            "/api/v1/applications",
            &operations(),
            Some(raise_body("LN-4008", "MUM", "everyone")),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["kind"], "validation");
    assert!(payload["error"]
        .as_str()
        .expect("error message")
        .starts_with("malformed request body"));
}

#[tokio::test]
async fn body_without_required_field_is_a_structured_validation_error() {
    let (service, _, _) = build_service();
    let application = service
        .raise_query(
            &operations(),
            raise_command("LN-4009", "MUM", TeamTargets::Sales, &["Doc"]),
        )
        .expect("raise");
    let router = query_router_with_service(service);

    let response = router
        .oneshot(request(
            "POST",
            &format!("/api/v1/queries/{}/requests", application.queries[0].id),
            &operations(),
            Some(json!({ "remarks": "no type given" })),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["kind"], "validation");
}
