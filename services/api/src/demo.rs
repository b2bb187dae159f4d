use crate::infra::RecordingNotifier;
use chrono::Utc;
use clap::Args;
use query_desk::error::AppError;
use query_desk::workflows::queries::{
    ActionKind, Application, ApplicationId, DecisionInput, DirectAction, EventOrder,
    InMemoryQueryStore, Principal, PriorityConfig, QueryDeskService, QueryId, RaiseQuery,
    RequestSubmission, RevertCommand, Role, TeamTargets,
};
use std::sync::Arc;

type DemoService = QueryDeskService<InMemoryQueryStore, RecordingNotifier>;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Loan amount attached to the demo application; drives approval priority.
    #[arg(long, default_value_t = 2_500_000)]
    pub(crate) loan_amount: u64,
    /// Stop once the application resolves instead of reverting a query afterwards.
    #[arg(long)]
    pub(crate) skip_revert: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let notifier = Arc::new(RecordingNotifier::default());
    let service: DemoService = QueryDeskService::new(
        Arc::new(InMemoryQueryStore::new()),
        notifier.clone(),
        PriorityConfig::default(),
    );

    let operations = Principal::new("ops.rekha", Role::Operations);
    let management = Principal::new("mgr.anand", Role::Management);
    let credit = Principal::new("credit.meera", Role::Credit).with_branches(["MUM"]);

    println!("Query desk demo ({})", Utc::now().format("%Y-%m-%d %H:%M UTC"));

    let application = service.raise_query(
        &operations,
        RaiseQuery {
            app_no: "APP-1".to_string(),
            customer_name: "Vikram Rao".to_string(),
            branch: "Mumbai Andheri".to_string(),
            branch_code: "MUM".to_string(),
            loan_amount: Some(args.loan_amount),
            team_targets: TeamTargets::Both,
            queries: vec![
                "Salary slips for the last three months are missing".to_string(),
                "Property valuation report pending".to_string(),
            ],
        },
    )?;
    let q1 = application.queries[0].id.clone();
    let q2 = application.queries[1].id.clone();
    println!(
        "\nRaised {} for {} (loan amount {})",
        application.app_no, application.customer_name, args.loan_amount
    );
    print_status(&service, &operations, &application.id)?;

    service.apply_direct_action(
        &management,
        &q1,
        DirectAction::new(ActionKind::Approve).remarks("Slips received at branch"),
    )?;
    println!("\nManagement approved {q1} directly");
    print_status(&service, &operations, &application.id)?;

    let request = service.submit_request(
        &operations,
        &q2,
        RequestSubmission::new(ActionKind::Deferral)
            .assigned_to("Valuation desk")
            .remarks("Valuer visit scheduled"),
    )?;
    println!(
        "\nOperations requested a {} on {q2}: {} (priority {})",
        request.request_type, request.id, request.priority
    );
    print_status(&service, &operations, &application.id)?;

    println!("\nApproval queue");
    for entry in service.pending_queue(&management, None)? {
        println!(
            "  {} [{}] {} on {}: {} ({})",
            entry.request.id,
            entry.request.priority,
            entry.request.request_type,
            entry.request.context.app_no,
            entry.current_query_text,
            entry
                .current_status
                .map(|status| status.label())
                .unwrap_or("unknown"),
        );
    }

    service.decide_request(&management, &request.id, DecisionInput::approve())?;
    println!("\nManagement approved {}", request.id);
    print_status(&service, &operations, &application.id)?;

    if !args.skip_revert {
        service.revert(
            &credit,
            &q1,
            RevertCommand::new("Slip for January is illegible"),
        )?;
        println!("\nCredit reverted {q1}");
        print_status(&service, &operations, &application.id)?;
    }

    service.post_message(&credit, &q2, "Valuer confirmed for Friday")?;

    for query_id in [&q1, &q2] {
        print_history(&service, &management, query_id)?;
    }

    println!("\nNotifications");
    for notification in notifier.sent() {
        let audience = notification
            .audience
            .iter()
            .map(|audience| format!("{audience:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {} -> {}", notification.template, audience);
    }

    let stats = service.statistics(&operations);
    match serde_json::to_string_pretty(&stats) {
        Ok(json) => println!("\nStatistics:\n{json}"),
        Err(err) => println!("\nStatistics unavailable: {err}"),
    }

    Ok(())
}

fn print_status(
    service: &DemoService,
    viewer: &Principal,
    application_id: &ApplicationId,
) -> Result<(), AppError> {
    let application: Application = service.get_application(viewer, application_id)?;
    let children = application
        .queries
        .iter()
        .map(|query| format!("{}={}", query.id, query.status))
        .collect::<Vec<_>>()
        .join(", ");
    println!("  {} is {} [{}]", application.app_no, application.status().label(), children);
    if let Some(resolution) = application.resolution() {
        println!("  {} by {}", resolution.reason, resolution.resolved_by);
    }
    Ok(())
}

fn print_history(
    service: &DemoService,
    viewer: &Principal,
    query_id: &QueryId,
) -> Result<(), AppError> {
    println!("\nChat history for {query_id}");
    for entry in service.list_events(viewer, query_id, EventOrder::Chronological)? {
        println!("  [{}] {}", entry.kind, entry.rendered);
    }
    Ok(())
}
