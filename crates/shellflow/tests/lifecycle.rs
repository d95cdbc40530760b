mod common;

use std::time::{Duration, Instant};

use common::{payload_for, MemoryHarness};
use serde_json::json;
use shellflow::jobs::memory::WriteOp;
use shellflow::jobs::store::{JobStore, QueueStore};
use shellflow::jobs::{resolve_final_status, JobStatus, Priority, ProcessOutcome};

#[tokio::test]
async fn clean_exit_completes_with_exit_code_zero() {
    let h = MemoryHarness::new();
    let lifecycle = h.lifecycle();

    let job = h.enqueue("echo", &["hello"], Priority::Medium, 5).await;
    lifecycle.dispatch(&payload_for(&job)).await.unwrap();

    let stored = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "completed");
    assert_eq!(stored.exit_code, Some(0));
    assert!(stored.started_at.is_some(), "running was persisted");
    assert!(stored.completed_at.is_some());
    assert!(h.combined_log(job.id).await.contains("hello"));
}

#[tokio::test]
async fn nonzero_exit_fails_with_exit_code() {
    let h = MemoryHarness::new();
    let lifecycle = h.lifecycle();

    let job = h.enqueue("sh", &["-c", "exit 3"], Priority::Low, 5).await;
    lifecycle.dispatch(&payload_for(&job)).await.unwrap();

    let stored = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "failed");
    assert_eq!(stored.exit_code, Some(3));
}

#[tokio::test]
async fn spawn_error_fails_with_descriptive_log_and_no_exit_code() {
    let h = MemoryHarness::new();
    let lifecycle = h.lifecycle();

    let job = h
        .enqueue("/no/such/binary/anywhere", &[], Priority::Medium, 5)
        .await;
    lifecycle.dispatch(&payload_for(&job)).await.unwrap();

    let stored = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "failed");
    assert_eq!(stored.exit_code, None);
    assert!(h
        .combined_log(job.id)
        .await
        .contains("failed to start process"));
}

#[tokio::test]
async fn cancel_before_start_skips_execution() {
    let h = MemoryHarness::new();
    let lifecycle = h.lifecycle();

    let job = h.enqueue("echo", &["never runs"], Priority::High, 5).await;
    h.queue.set_cancel_flag(job.id, 60).await.unwrap();

    lifecycle.dispatch(&payload_for(&job)).await.unwrap();

    let stored = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "cancelled");
    assert!(stored.started_at.is_none(), "the job never started");
    assert_eq!(h.store.mark_running_count(job.id).await, 0);
    assert!(
        !h.queue.cancel_requested(job.id).await.unwrap(),
        "flag is cleared once acted upon"
    );
}

#[tokio::test]
async fn cancel_during_run_wins_over_clean_exit() {
    let h = MemoryHarness::new();
    let lifecycle = h.lifecycle();

    let job = h.enqueue("sleep", &["1"], Priority::Medium, 10).await;

    let queue = h.queue.clone();
    let id = job.id;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        queue.set_cancel_flag(id, 60).await.unwrap();
    });

    lifecycle.dispatch(&payload_for(&job)).await.unwrap();

    let stored = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "cancelled");
    assert_eq!(stored.exit_code, None, "cancelled jobs carry no exit code");
    assert!(!h.queue.cancel_requested(job.id).await.unwrap());
}

#[tokio::test]
async fn timeout_kills_within_bounded_margin() {
    let h = MemoryHarness::new();
    let lifecycle = h.lifecycle();

    let job = h.enqueue("sleep", &["10"], Priority::Medium, 1).await;

    let started = Instant::now();
    lifecycle.dispatch(&payload_for(&job)).await.unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_secs(3),
        "killed within the margin, took {elapsed:?}"
    );

    let stored = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "failed");
    assert_eq!(stored.exit_code, None);
    assert!(h.combined_log(job.id).await.contains("timeout"));
}

#[tokio::test]
async fn duplicate_delivery_executes_at_most_once() {
    let h = MemoryHarness::new();
    let lifecycle = h.lifecycle();

    let job = h.enqueue("echo", &["once"], Priority::Medium, 5).await;
    let payload = payload_for(&job);

    lifecycle.dispatch(&payload).await.unwrap();
    lifecycle.dispatch(&payload).await.unwrap();

    assert_eq!(h.store.mark_running_count(job.id).await, 1);

    let finishes = h
        .store
        .write_ops()
        .await
        .into_iter()
        .filter(|op| matches!(op, WriteOp::Finished(id, _) if *id == job.id))
        .count();
    assert_eq!(finishes, 1, "one terminal transition only");
}

#[tokio::test]
async fn malformed_payload_without_id_is_dropped() {
    let h = MemoryHarness::new();
    let lifecycle = h.lifecycle();

    lifecycle.dispatch("{definitely not json").await.unwrap();

    assert!(h.store.write_ops().await.is_empty());
}

#[tokio::test]
async fn malformed_payload_with_known_id_fails_that_job() {
    let h = MemoryHarness::new();
    let lifecycle = h.lifecycle();

    let job = h.enqueue("echo", &["x"], Priority::Medium, 5).await;
    // Entry lost its command field somewhere along the way.
    let broken = json!({ "id": job.id }).to_string();

    lifecycle.dispatch(&broken).await.unwrap();

    let stored = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "failed");
    assert!(h.combined_log(job.id).await.contains("malformed queue entry"));
    assert_eq!(h.store.mark_running_count(job.id).await, 0);
}

#[tokio::test]
async fn empty_command_fails_without_spawning() {
    let h = MemoryHarness::new();
    let lifecycle = h.lifecycle();

    let job = h.enqueue("   ", &[], Priority::Medium, 5).await;
    lifecycle.dispatch(&payload_for(&job)).await.unwrap();

    let stored = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "failed");
    assert_eq!(h.store.mark_running_count(job.id).await, 0);
}

#[tokio::test]
async fn terminal_status_is_persisted_after_every_log_entry() {
    let h = MemoryHarness::new();
    let lifecycle = h.lifecycle();

    let job = h
        .enqueue("sh", &["-c", "echo a; echo b; echo c"], Priority::Medium, 5)
        .await;
    lifecycle.dispatch(&payload_for(&job)).await.unwrap();

    let ops = h.store.write_ops().await;
    let finish_pos = ops
        .iter()
        .position(|op| matches!(op, WriteOp::Finished(id, _) if *id == job.id))
        .expect("terminal write present");
    let last_log_pos = ops
        .iter()
        .rposition(|op| matches!(op, WriteOp::LogAppended(id) if *id == job.id));

    if let Some(last_log_pos) = last_log_pos {
        assert!(
            last_log_pos < finish_pos,
            "all log appends land before the terminal status write"
        );
    }

    let combined = h.combined_log(job.id).await;
    let (a, b, c) = (
        combined.find('a').unwrap(),
        combined.find('b').unwrap(),
        combined.find('c').unwrap(),
    );
    assert!(a < b && b < c, "chunks retain emission order");
}

#[tokio::test]
async fn output_chunks_are_published_to_observers() {
    let h = MemoryHarness::new();
    let lifecycle = h.lifecycle();

    let job = h.enqueue("echo", &["watched"], Priority::Medium, 5).await;
    lifecycle.dispatch(&payload_for(&job)).await.unwrap();

    let published = h.queue.published().await;
    assert!(published
        .iter()
        .any(|(id, message)| *id == job.id && message.contains("watched")));
}

#[test]
fn final_status_reconciliation() {
    // Natural exits.
    assert_eq!(
        resolve_final_status(&ProcessOutcome::Exited { exit_code: 0 }, false),
        (JobStatus::Completed, Some(0))
    );
    assert_eq!(
        resolve_final_status(&ProcessOutcome::Exited { exit_code: 7 }, false),
        (JobStatus::Failed, Some(7))
    );

    // Forced terminations surface as failed with no exit code.
    assert_eq!(
        resolve_final_status(&ProcessOutcome::TimedOut, false),
        (JobStatus::Failed, None)
    );
    assert_eq!(
        resolve_final_status(&ProcessOutcome::Signaled, false),
        (JobStatus::Failed, None)
    );
    assert_eq!(
        resolve_final_status(
            &ProcessOutcome::Error {
                message: "spawn".to_string()
            },
            false
        ),
        (JobStatus::Failed, None)
    );

    // A cancellation flag observed at exit wins over everything.
    for outcome in [
        ProcessOutcome::Exited { exit_code: 0 },
        ProcessOutcome::Exited { exit_code: 1 },
        ProcessOutcome::TimedOut,
        ProcessOutcome::Signaled,
    ] {
        assert_eq!(
            resolve_final_status(&outcome, true),
            (JobStatus::Cancelled, None)
        );
    }
}
