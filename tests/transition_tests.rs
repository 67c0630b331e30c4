//! Readiness, claiming and completion.

mod test_utils;

use jobstore::models::{ExitCode, Job, JobState};
use jobstore::repositories::{
    Assignment, Completion, ErrorKind, HistoryOptions, JobTicket, StoreError, TicketOptions,
};
use test_utils::{runnable, setup_store, state_of};

fn ticket_ids(tickets: &[JobTicket]) -> Vec<&str> {
    tickets.iter().map(|ticket| ticket.job_id.as_str()).collect()
}

#[tokio::test]
async fn consumers_wait_for_their_producers() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store
        .register(
            Some(1),
            &[
                runnable("extract").with_products(["raw"]),
                runnable("load").with_requisites(["raw"]),
            ],
        )
        .await?;

    let tickets = store
        .get_job_tickets("localhost", &[], &TicketOptions::default())
        .await?;
    assert_eq!(ticket_ids(&tickets), vec!["extract"]);

    store
        .set_state(2, &["extract".to_string()], JobState::Succeeded)
        .await?;

    let tickets = store
        .get_job_tickets("localhost", &[], &TicketOptions::default())
        .await?;
    assert_eq!(ticket_ids(&tickets), vec!["load"]);
    Ok(())
}

#[tokio::test]
async fn affinity_start_time_and_priority_shape_readiness() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store
        .register(
            Some(1),
            &[
                runnable("low").with_attr("priority", 5),
                runnable("high").with_attr("priority", 0),
                runnable("pinned").with_attr("exec_node", "gpu"),
                runnable("elsewhere").with_attr("exec_host", "other-host"),
                runnable("later").with_attr("start_datetime", "2999-01-01T00:00:00Z"),
            ],
        )
        .await?;

    let tickets = store
        .get_job_tickets("localhost", &[], &TicketOptions::default())
        .await?;
    assert_eq!(ticket_ids(&tickets), vec!["high", "low"]);

    let tickets = store
        .get_job_tickets("localhost", &["gpu".to_string()], &TicketOptions::default())
        .await?;
    assert_eq!(ticket_ids(&tickets), vec!["high", "pinned", "low"]);
    assert_eq!(tickets[1].node.as_deref(), Some("gpu"));

    let tickets = store
        .get_job_tickets(
            "localhost",
            &[],
            &TicketOptions {
                fetch_limit: Some(1),
            },
        )
        .await?;
    assert_eq!(ticket_ids(&tickets), vec!["high"]);
    Ok(())
}

#[tokio::test]
async fn concurrent_claims_have_one_winner() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store.register(Some(1), &[runnable("a")]).await?;
    let ticket = JobTicket::new("a", 1, None);

    let (first, second) = tokio::join!(
        store.offer_to_execute(&ticket),
        store.offer_to_execute(&ticket)
    );
    let winners = [first?, second?].into_iter().flatten().count();

    assert_eq!(winners, 1);
    assert_eq!(state_of(&store, "a").await?, JobState::Running);
    let history = store
        .get_execution_history(
            "a",
            &HistoryOptions {
                limit: 10,
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(history.len(), 1);
    Ok(())
}

#[tokio::test]
async fn completion_records_history_and_terminal_state() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store.register(Some(1), &[runnable("a")]).await?;

    let ticket = JobTicket::new("a", 1, None).assigned(Assignment {
        node: Some("n1".to_string()),
        host: Some("h1".to_string()),
        thread: Some("worker-0".to_string()),
    });
    let offer = store.offer_to_execute(&ticket).await?.unwrap();
    assert_eq!(offer.job.job_id, "a");

    let recorded = store
        .report_completion_status(&Completion {
            ticket,
            execution_id: offer.execution_id,
            exit_code: ExitCode::FailureSkipped.code(),
            description: Some("skipped".to_string()),
        })
        .await?;

    assert!(recorded);
    assert_eq!(state_of(&store, "a").await?, JobState::Succeeded);
    let history = store
        .get_execution_history("a", &HistoryOptions::default())
        .await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, offer.execution_id);
    assert_eq!(history[0].host.as_deref(), Some("h1"));
    assert_eq!(history[0].thread.as_deref(), Some("worker-0"));
    assert_eq!(history[0].exit_code, Some(ExitCode::FailureSkipped.code()));
    assert!(history[0].end_at.is_some());
    Ok(())
}

#[tokio::test]
async fn failed_exit_code_marks_job_failed() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store.register(Some(1), &[runnable("a")]).await?;
    let ticket = JobTicket::new("a", 1, None);
    let offer = store.offer_to_execute(&ticket).await?.unwrap();

    store
        .report_completion_status(&Completion {
            ticket,
            execution_id: offer.execution_id,
            exit_code: ExitCode::Failed.code(),
            description: None,
        })
        .await?;

    assert_eq!(state_of(&store, "a").await?, JobState::Failed);
    Ok(())
}

#[tokio::test]
async fn unknown_exit_code_is_rejected_before_writes() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store.register(Some(1), &[runnable("a")]).await?;
    let ticket = JobTicket::new("a", 1, None);
    let offer = store.offer_to_execute(&ticket).await?.unwrap();

    let error = store
        .report_completion_status(&Completion {
            ticket,
            execution_id: offer.execution_id,
            exit_code: 42,
            description: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(error, StoreError::UnknownExitCode(42)));
    assert_eq!(state_of(&store, "a").await?, JobState::Running);
    let history = store
        .get_execution_history("a", &HistoryOptions::default())
        .await?;
    assert!(history[0].end_at.is_none());
    Ok(())
}

#[tokio::test]
async fn redefinition_after_claim_voids_completion() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store.register(Some(1), &[runnable("a")]).await?;
    let ticket = JobTicket::new("a", 1, None);
    let offer = store.offer_to_execute(&ticket).await?.unwrap();

    store.register(Some(2), &[runnable("a")]).await?;

    let recorded = store
        .report_completion_status(&Completion {
            ticket,
            execution_id: offer.execution_id,
            exit_code: ExitCode::Succeeded.code(),
            description: None,
        })
        .await?;

    assert!(!recorded);
    assert_eq!(state_of(&store, "a").await?, JobState::Wait);
    let history = store
        .get_execution_history("a", &HistoryOptions::default())
        .await?;
    assert!(history[0].end_at.is_none());
    assert!(history[0].exit_code.is_none());
    Ok(())
}

#[tokio::test]
async fn stale_ticket_cannot_claim() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store.register(Some(1), &[runnable("a")]).await?;
    store.register(Some(2), &[runnable("a")]).await?;

    assert!(store
        .offer_to_execute(&JobTicket::new("a", 1, None))
        .await?
        .is_none());
    assert!(store
        .offer_to_execute(&JobTicket::new("a", 2, None))
        .await?
        .is_some());
    Ok(())
}

#[tokio::test]
async fn unbuildable_job_is_failed_on_claim() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store.register(Some(1), &[Job::new("no_commands")]).await?;

    let error = store
        .offer_to_execute(&JobTicket::new("no_commands", 1, None))
        .await
        .unwrap_err();

    assert!(matches!(error, StoreError::CommandBuild(_)));
    assert_eq!(error.kind(), ErrorKind::Execution);
    assert_eq!(state_of(&store, "no_commands").await?, JobState::Failed);
    Ok(())
}

#[tokio::test]
async fn set_state_overrides_and_skips_initiator() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store
        .register(Some(1), &[runnable("a"), runnable("b")])
        .await?;

    let changed = store
        .set_state(
            3,
            &["a".to_string(), "b".to_string(), "INITIATOR".to_string()],
            JobState::Discarded,
        )
        .await?;

    assert_eq!(changed, 2);
    assert_eq!(state_of(&store, "a").await?, JobState::Discarded);
    assert_eq!(store.get_job("a").await?.unwrap().update_id, Some(3));
    assert_eq!(state_of(&store, "INITIATOR").await?, JobState::Succeeded);

    let error = store.set_state(4, &[], JobState::Wait).await.unwrap_err();
    assert!(matches!(error, StoreError::NoJobsSelected));
    Ok(())
}

#[tokio::test]
async fn set_state_voids_outstanding_tickets() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store.register(Some(1), &[runnable("a")]).await?;

    let stale = JobTicket::new("a", 1, None);
    store.set_state(5, &["a".to_string()], JobState::Wait).await?;

    assert!(store.offer_to_execute(&stale).await?.is_none());
    assert_eq!(state_of(&store, "a").await?, JobState::Wait);

    let fresh = store
        .get_job_tickets("localhost", &[], &TicketOptions::default())
        .await?;
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].update_id, 5);
    Ok(())
}
