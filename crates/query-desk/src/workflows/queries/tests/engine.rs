use super::common::*;
use chrono::Duration;
use proptest::prelude::*;

use crate::workflows::queries::aggregate::{derive_status, ALL_QUERIES_RESOLVED};
use crate::workflows::queries::domain::{
    ActionKind, ApplicationStatus, QueryId, QueryStatus, Team, ValidationError,
};
use crate::workflows::queries::engine::{
    self, resolve_target, DirectAction, RevertCommand, TransitionError,
};
use crate::workflows::queries::events::{EventKind, EventPayload};

fn query_id(index: usize) -> QueryId {
    QueryId(format!("q-{index}"))
}

#[test]
fn application_resolves_only_after_last_pending_query_closes() {
    let mut application = application_with_queries(2);
    let manager = manager();

    engine::apply_direct_action(
        &mut application,
        &query_id(0),
        &DirectAction::new(ActionKind::Approve),
        &manager,
        None,
        base_time(),
    )
    .expect("first action applies");
    assert_eq!(application.status(), ApplicationStatus::Pending);
    assert!(application.resolution().is_none());

    let later = base_time() + Duration::minutes(5);
    engine::apply_direct_action(
        &mut application,
        &query_id(1),
        &DirectAction::new(ActionKind::Otc),
        &manager,
        None,
        later,
    )
    .expect("second action applies");

    assert_eq!(application.status(), ApplicationStatus::Resolved);
    let resolution = application.resolution().expect("resolution stamped");
    assert_eq!(resolution.reason, ALL_QUERIES_RESOLVED);
    assert_eq!(resolution.resolved_by, manager.id);
    assert_eq!(resolution.resolved_at, later);
}

#[test]
fn direct_action_records_assignee_remarks_and_event() {
    let mut application = application_with_queries(1);
    let (query, entry) = engine::apply_direct_action(
        &mut application,
        &query_id(0),
        &DirectAction::new(ActionKind::Deferral)
            .assigned_to("Branch desk")
            .remarks("Customer travelling"),
        &manager(),
        None,
        base_time(),
    )
    .expect("deferral applies");

    assert_eq!(query.status, QueryStatus::Deferred);
    assert!(query.is_resolved);
    assert_eq!(query.assigned_to.as_deref(), Some("Branch desk"));
    assert_eq!(query.remarks.as_deref(), Some("Customer travelling"));
    assert_eq!(entry.kind, EventKind::Action);
    assert!(entry.rendered.contains("deferred"));
    assert!(entry.rendered.ends_with(". Assigned to: Branch desk. Remarks: Customer travelling"));
}

#[test]
fn revert_reopens_query_and_clears_application_resolution() {
    let mut application = application_with_queries(1);
    let manager = manager();
    engine::apply_direct_action(
        &mut application,
        &query_id(0),
        &DirectAction::new(ActionKind::Approve),
        &manager,
        None,
        base_time(),
    )
    .expect("approve");
    assert_eq!(application.status(), ApplicationStatus::Resolved);

    let (query, entry) = engine::revert(
        &mut application,
        &query_id(0),
        &RevertCommand::new("Wrong document accepted"),
        &credit(&["MUM"]),
        base_time() + Duration::minutes(1),
    )
    .expect("revert applies");

    assert_eq!(query.status, QueryStatus::Pending);
    assert!(!query.is_resolved);
    assert!(query.resolution.is_none());
    let stamp = query.revert.expect("revert stamped");
    assert_eq!(stamp.reason, "Wrong document accepted");
    assert_eq!(application.status(), ApplicationStatus::Pending);
    assert!(application.resolution().is_none());
    match entry.payload {
        EventPayload::RevertAction {
            previous_status,
            team,
            ..
        } => {
            assert_eq!(previous_status, QueryStatus::Approved);
            assert_eq!(team, Some(Team::Credit));
        }
        other => panic!("expected revert payload, got {other:?}"),
    }
}

#[test]
fn revert_without_reason_leaves_query_untouched() {
    let mut application = application_with_queries(1);
    engine::apply_direct_action(
        &mut application,
        &query_id(0),
        &DirectAction::new(ActionKind::Approve),
        &manager(),
        None,
        base_time(),
    )
    .expect("approve");
    let before = application.clone();

    let result = engine::revert(
        &mut application,
        &query_id(0),
        &RevertCommand::new("   "),
        &manager(),
        base_time(),
    );

    assert!(matches!(
        result,
        Err(TransitionError::Validation(ValidationError::MissingReason))
    ));
    assert_eq!(application, before);
}

#[test]
fn reverting_a_pending_query_is_logged_but_changes_nothing_else() {
    let mut application = application_with_queries(1);
    let before = application.clone();
    let (query, entry) = engine::revert(
        &mut application,
        &query_id(0),
        &RevertCommand::new("Re-check").for_team(Team::Sales),
        &operations(),
        base_time() + Duration::minutes(5),
    )
    .expect("revert on pending query is accepted");

    assert_eq!(application, before);
    assert_eq!(query, before.queries[0]);
    assert!(query.revert.is_none());
    assert_eq!(entry.kind, EventKind::Revert);
    assert!(entry.rendered.contains("for the sales team"));
    assert!(entry.rendered.contains("still pending"));
    assert!(!entry.rendered.contains("from pending to pending"));
}

#[test]
fn messages_are_accepted_on_resolved_queries() {
    let mut application = application_with_queries(1);
    engine::apply_direct_action(
        &mut application,
        &query_id(0),
        &DirectAction::new(ActionKind::Approve),
        &manager(),
        None,
        base_time(),
    )
    .expect("approve");

    let entry = engine::post_message(
        &application,
        &query_id(0),
        "  Original copy couriered  ",
        &sales(&["MUM"]),
        base_time(),
    )
    .expect("message accepted");

    assert_eq!(entry.kind, EventKind::Message);
    assert_eq!(
        entry.payload,
        EventPayload::MessagePost {
            text: "Original copy couriered".to_string()
        }
    );
    assert_eq!(application.status(), ApplicationStatus::Resolved);
}

#[test]
fn blank_message_is_rejected() {
    let application = application_with_queries(1);
    let result = engine::post_message(&application, &query_id(0), " \n", &operations(), base_time());
    assert!(matches!(
        result,
        Err(TransitionError::Validation(ValidationError::EmptyMessage))
    ));
}

#[test]
fn unknown_query_is_not_found() {
    let mut application = application_with_queries(1);
    let result = engine::apply_direct_action(
        &mut application,
        &QueryId("q-missing".to_string()),
        &DirectAction::new(ActionKind::Approve),
        &manager(),
        None,
        base_time(),
    );
    assert!(matches!(result, Err(TransitionError::QueryNotFound(_))));
}

#[test]
fn application_id_addresses_first_query() {
    let application = application_with_queries(3);
    let reference = QueryId(application.id.0.clone());
    assert_eq!(resolve_target(&application, &reference), Some(query_id(0)));
    assert_eq!(resolve_target(&application, &query_id(2)), Some(query_id(2)));
    assert_eq!(
        resolve_target(&application, &QueryId("elsewhere".to_string())),
        None
    );
}

#[test]
fn appended_query_returns_resolved_application_to_pending() {
    let mut application = application_with_queries(1);
    engine::apply_direct_action(
        &mut application,
        &query_id(0),
        &DirectAction::new(ActionKind::Approve),
        &manager(),
        None,
        base_time(),
    )
    .expect("approve");

    let events = engine::raise_queries(
        &mut application,
        vec![crate::workflows::queries::aggregate::Query::raised(
            QueryId("q-extra".to_string()),
            "Bank statement for March".to_string(),
            "ops.rekha".to_string(),
            crate::workflows::queries::domain::Role::Operations,
            base_time(),
        )],
        &operations(),
        base_time(),
    )
    .expect("raise");

    assert_eq!(events.len(), 1);
    assert_eq!(application.status(), ApplicationStatus::Pending);
    assert!(application.resolution().is_none());
}

#[derive(Debug, Clone)]
enum Step {
    Act(usize, ActionKind),
    Revert(usize),
}

fn step() -> impl Strategy<Value = Step> {
    let action = prop_oneof![
        Just(ActionKind::Approve),
        Just(ActionKind::Deferral),
        Just(ActionKind::Otc),
    ];
    prop_oneof![
        (0usize..4, action).prop_map(|(index, action)| Step::Act(index, action)),
        (0usize..4).prop_map(Step::Revert),
    ]
}

proptest! {
    #[test]
    fn aggregate_status_always_matches_children(steps in prop::collection::vec(step(), 0..40)) {
        let mut application = application_with_queries(4);
        let manager = manager();
        for (tick, step) in steps.into_iter().enumerate() {
            let now = base_time() + Duration::seconds(tick as i64);
            match step {
                Step::Act(index, action) => {
                    engine::apply_direct_action(
                        &mut application,
                        &query_id(index),
                        &DirectAction::new(action),
                        &manager,
                        None,
                        now,
                    )
                    .expect("action applies");
                }
                Step::Revert(index) => {
                    engine::revert(
                        &mut application,
                        &query_id(index),
                        &RevertCommand::new("recheck"),
                        &manager,
                        now,
                    )
                    .expect("revert applies");
                }
            }

            prop_assert_eq!(application.status(), derive_status(&application.queries));
            prop_assert_eq!(
                application.resolution().is_some(),
                application.status() == ApplicationStatus::Resolved
            );
            for query in &application.queries {
                prop_assert_eq!(query.is_resolved, query.status.is_terminal());
                prop_assert_eq!(query.resolution.is_some(), query.is_resolved);
            }
        }
    }
}
