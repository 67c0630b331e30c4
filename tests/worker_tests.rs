//! Worker ticks against an in-memory store running real shell commands.

mod test_utils;

use jobstore::config::WorkerConfig;
use jobstore::models::{Job, JobState};
use jobstore::repositories::{HistoryOptions, JobTicket};
use jobstore::worker::{TicketOutcome, Worker, process_ticket};
use serde_json::json;
use test_utils::{runnable, setup_store, state_of};

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        host: "test-host".to_string(),
        nodes: vec!["n1".to_string()],
        tick_ms: 100,
        jitter_ms: 0,
        concurrency: 2,
        fetch_limit: 10,
    }
}

#[tokio::test]
async fn tick_runs_ready_jobs_and_unblocks_consumers() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store
        .register(
            Some(1),
            &[
                runnable("extract").with_products(["raw"]),
                Job::new("flaky").with_attr("commands", json!(["true", "exit 3", "true"])),
                runnable("load").with_requisites(["raw"]),
            ],
        )
        .await?;
    let worker = Worker::new(store.clone(), worker_config());

    assert_eq!(worker.tick().await?, 2);
    assert_eq!(state_of(&store, "extract").await?, JobState::Succeeded);
    assert_eq!(state_of(&store, "flaky").await?, JobState::Failed);
    assert_eq!(state_of(&store, "load").await?, JobState::Wait);

    let history = store
        .get_execution_history("flaky", &HistoryOptions::default())
        .await?;
    assert_eq!(history[0].exit_code, Some(1));
    assert_eq!(history[0].host.as_deref(), Some("test-host"));
    assert_eq!(history[0].node.as_deref(), Some("n1"));
    assert!(
        history[0]
            .description
            .as_deref()
            .is_some_and(|text| text.contains("exit 3"))
    );

    assert_eq!(worker.tick().await?, 1);
    assert_eq!(state_of(&store, "load").await?, JobState::Succeeded);

    assert_eq!(worker.tick().await?, 0);
    Ok(())
}

#[tokio::test]
async fn tick_counts_only_claimed_tickets() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store
        .register(Some(1), &[runnable("ok"), Job::new("broken")])
        .await?;
    let worker = Worker::new(store.clone(), worker_config());

    assert_eq!(worker.tick().await?, 1);
    assert_eq!(state_of(&store, "ok").await?, JobState::Succeeded);
    assert_eq!(state_of(&store, "broken").await?, JobState::Failed);
    Ok(())
}

#[tokio::test]
async fn processing_a_stale_ticket_is_a_lost_claim() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store.register(Some(1), &[runnable("a")]).await?;
    store.register(Some(2), &[runnable("a")]).await?;

    let outcome = process_ticket(&store, JobTicket::new("a", 1, None)).await?;
    assert_eq!(outcome, TicketOutcome::Lost);

    let outcome = process_ticket(&store, JobTicket::new("a", 2, None)).await?;
    assert_eq!(outcome, TicketOutcome::Completed);
    assert_eq!(state_of(&store, "a").await?, JobState::Succeeded);
    Ok(())
}

#[tokio::test]
async fn run_stops_on_cancellation() -> anyhow::Result<()> {
    let store = setup_store().await?;
    store.register(Some(1), &[runnable("a")]).await?;
    let worker = Worker::new(store.clone(), worker_config());
    let shutdown = tokio_util::sync::CancellationToken::new();

    let token = shutdown.clone();
    let handle = tokio::spawn(async move { worker.run(token).await });

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    shutdown.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle).await??;

    assert_eq!(state_of(&store, "a").await?, JobState::Succeeded);
    Ok(())
}
