//! End-to-end scenarios: producer feeds through the router, snapshot
//! bootstrap, redelivery absorption, client-side convergence.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::connection::ConnectionPhase;
use crate::db::Database;
use crate::hub::PulseHub;
use crate::protocol::{
    DashboardState, DestinationTotals, JobStateChange, OutboundMessage, RawLogLine, StatusKind,
};
use crate::testing::{mem_hub, GatedChannel, RecordingChannel};

const INITIAL_CHECK: &str = r#"{"action":"initialCheck","data":"Please fetch the current job status and logs."}"#;

fn line(timestamp: i64, message: &str) -> RawLogLine {
    RawLogLine {
        timestamp,
        message: message.to_string(),
    }
}

#[tokio::test]
async fn log_feed_drives_counters_and_recent_events() {
    let transport = RecordingChannel::new();
    let hub = mem_hub(transport);
    let router = hub.router();

    let batch = vec![
        line(1_000, "Calling PartitionStep with 1 docs"),
        line(2_000, "Chunk step finished in 0.1s"),
        line(3_000, "writing a total of 42 vectors"),
    ];
    let state = router.handle_log_batch(&batch).unwrap();

    assert_eq!(state.vectors_written, 42);
    assert_eq!(state.recent_events.len(), 3);
    // Newest first.
    assert_eq!(state.recent_events[0].timestamp, 3_000);
    assert_eq!(state.recent_events[2].timestamp, 1_000);
}

#[tokio::test]
async fn snapshot_reflects_job_feed_transitions() {
    let transport = RecordingChannel::new();
    let hub = mem_hub(transport.clone());
    let router = hub.router();

    for i in 0..3 {
        router
            .handle_job_event(&JobStateChange {
                status: StatusKind::Running,
                job_id: format!("job-{i}"),
                timestamp: 1_000 + i as i64,
            })
            .unwrap();
    }
    router
        .handle_job_event(&JobStateChange {
            status: StatusKind::Succeeded,
            job_id: "job-0".to_string(),
            timestamp: 9_000,
        })
        .unwrap();

    let mut conn = hub.connect("conn-1");
    conn.open().unwrap();
    conn.handle_message(INITIAL_CHECK).await.unwrap();

    let json = transport.last_json("conn-1").unwrap();
    assert_eq!(json["type"], "initialCheckResponse");
    assert_eq!(json["jobStatusCounts"]["RUNNING"], 3);
    assert_eq!(json["jobStatusCounts"]["SUCCEEDED"], 1);
    // Snapshot goes to the requesting connection only.
    assert_eq!(transport.sent_to("conn-1").len(), 1);
}

#[tokio::test]
async fn snapshot_before_any_event_is_zeroed_not_an_error() {
    let transport = RecordingChannel::new();
    let hub = mem_hub(transport.clone());

    let mut conn = hub.connect("conn-1");
    conn.open().unwrap();
    conn.handle_message(INITIAL_CHECK).await.unwrap();

    let json = transport.last_json("conn-1").unwrap();
    assert_eq!(json["totalVectors"], 0);
    assert_eq!(json["documentsIngested"], 0);
    assert_eq!(json["logs"].as_array().unwrap().len(), 0);
    assert_eq!(json["jobStatusCounts"]["FAILED"], 0);
}

#[tokio::test]
async fn redelivered_batch_is_absorbed_without_double_counting() {
    let transport = RecordingChannel::new();
    let hub = mem_hub(transport);
    let router = hub.router();

    let batch = vec![
        line(1_000, "writing a total of 42 elements"),
        line(2_000, "ingest process finished in 88.5s"),
    ];
    let first = router.handle_log_batch(&batch).unwrap();
    assert_eq!(first.vectors_written, 42);
    assert_eq!(first.documents_ingested, 1);

    // At-least-once transport redelivers the identical batch.
    let second = router.handle_log_batch(&batch).unwrap();
    assert_eq!(second.vectors_written, 42);
    assert_eq!(second.documents_ingested, 1);
    assert_eq!(second.recent_events, first.recent_events);
}

#[tokio::test]
async fn authoritative_resync_supersedes_stale_totals() {
    let transport = RecordingChannel::new();
    let hub = mem_hub(transport);
    let router = hub.router();

    router
        .handle_authoritative_counts(DestinationTotals {
            total_vectors: 900,
            total_documents: 12,
        })
        .unwrap();
    // A later authoritative read may legitimately be lower (deletions).
    let state = router
        .handle_authoritative_counts(DestinationTotals {
            total_vectors: 850,
            total_documents: 11,
        })
        .unwrap();

    assert_eq!(state.total_vectors, 850);
    assert_eq!(state.total_documents, 11);
}

#[test]
fn connection_walks_the_lifecycle_state_machine() {
    tokio_test::block_on(async {
        let transport = RecordingChannel::new();
        let hub = mem_hub(transport.clone());

        let mut conn = hub.connect("conn-1");
        assert_eq!(conn.phase(), ConnectionPhase::Connecting);

        // Messages before open are ignored, not answered.
        conn.handle_message(INITIAL_CHECK).await.unwrap();
        assert!(transport.sent_to("conn-1").is_empty());

        conn.open().unwrap();
        assert_eq!(conn.phase(), ConnectionPhase::Open);
        assert!(hub.registry().is_live("conn-1"));

        // open() is idempotent.
        conn.open().unwrap();
        assert_eq!(hub.registry().len(), 1);

        conn.close().unwrap();
        assert_eq!(conn.phase(), ConnectionPhase::Closed);
        assert!(!hub.registry().is_live("conn-1"));

        // close() is idempotent and reopening stays closed.
        conn.close().unwrap();
        conn.open().unwrap();
        assert_eq!(conn.phase(), ConnectionPhase::Closed);
    });
}

#[tokio::test]
async fn failed_snapshot_delivery_closes_the_connection() {
    let transport = RecordingChannel::new();
    let hub = mem_hub(transport.clone());

    let mut conn = hub.connect("conn-1");
    conn.open().unwrap();
    transport.fail_connection("conn-1");

    // Degraded delivery, not a hard failure.
    conn.handle_message(INITIAL_CHECK).await.unwrap();
    assert_eq!(conn.phase(), ConnectionPhase::Closed);
    assert!(!hub.registry().is_live("conn-1"));
}

#[tokio::test]
async fn malformed_client_request_is_dropped_quietly() {
    let transport = RecordingChannel::new();
    let hub = mem_hub(transport.clone());

    let mut conn = hub.connect("conn-1");
    conn.open().unwrap();
    conn.handle_message(r#"{"action":"unknownThing"}"#).await.unwrap();
    conn.handle_message("not even json").await.unwrap();

    assert!(transport.sent_to("conn-1").is_empty());
    assert!(hub.registry().is_live("conn-1"));
}

#[tokio::test]
async fn hub_state_survives_a_process_restart() {
    let transport = RecordingChannel::new();
    let db = Arc::new(Database::open_in_memory().expect("in-memory DB"));

    {
        let hub = PulseHub::new(db.clone(), "dep-1", transport.clone()).unwrap();
        let router = hub.router();
        router
            .handle_log_batch(&[line(1_000, "writing a total of 7 elements")])
            .unwrap();
        let mut conn = hub.connect("conn-1");
        conn.open().unwrap();
    }

    // New hub over the same durable store.
    let hub = PulseHub::new(db, "dep-1", transport.clone()).unwrap();
    assert!(hub.registry().is_live("conn-1"));
    assert_eq!(hub.store().snapshot().vectors_written, 7);

    // And the restored connection still receives fan-out.
    let report = hub
        .publisher()
        .broadcast(&OutboundMessage::Update(Default::default()))
        .await
        .unwrap();
    assert_eq!(report.delivered, vec!["conn-1".to_string()]);
}

#[tokio::test]
async fn delayed_snapshot_cannot_clobber_a_racing_update() {
    let transport = GatedChannel::new("conn-1");
    let db = Arc::new(Database::open_in_memory().expect("in-memory DB"));
    let hub = PulseHub::new(db, "dep-test", transport.clone()).unwrap();
    let fanout = hub.start_fanout();

    let mut conn = hub.connect("conn-1");
    conn.open().unwrap();

    // The snapshot delivery stalls at the transport, read already taken.
    let responder = tokio::spawn(async move {
        conn.handle_message(INITIAL_CHECK).await.unwrap();
    });
    transport.held_delivery_arrived().await;

    // A mutation lands while the snapshot is in flight. Its broadcast round
    // must queue behind the snapshot, never overtake it.
    let router = hub.router();
    router
        .handle_log_batch(&[line(1_000, "writing a total of 42 elements")])
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(transport.recorder().sent_to("conn-1").is_empty());

    transport.release();
    responder.await.unwrap();

    let recorder = transport.recorder();
    let mut waited = Duration::ZERO;
    while recorder.sent_to("conn-1").len() < 2 {
        assert!(waited < Duration::from_secs(2), "racing update never delivered");
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }

    let payloads = recorder.sent_to("conn-1");
    let first: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(first["type"], "initialCheckResponse");

    // Replaying the delivered order through the dashboard merge model ends
    // on the post-mutation state.
    let mut view = DashboardState::default();
    for raw in &payloads {
        match serde_json::from_str::<OutboundMessage>(raw).unwrap() {
            OutboundMessage::Snapshot(snapshot) => view.apply_snapshot(&snapshot),
            OutboundMessage::Update(update) => update.merge_into(&mut view),
        }
    }
    assert_eq!(view.vectors_written, 42);
    fanout.abort();
}

#[tokio::test]
async fn descriptor_is_announced_and_snapshotted() {
    let transport = RecordingChannel::new();
    let hub = mem_hub(transport.clone());
    let router = hub.router();

    let mut rx = hub.bus().subscribe();
    router.handle_descriptor("s3|pinecone|openai").unwrap();
    match rx.try_recv().unwrap() {
        OutboundMessage::Update(update) => {
            assert_eq!(
                update.source_destination_embedding.as_deref(),
                Some("s3|pinecone|openai")
            );
        }
        other => panic!("expected an incremental update, got {other:?}"),
    }

    let mut conn = hub.connect("conn-1");
    conn.open().unwrap();
    conn.handle_message(INITIAL_CHECK).await.unwrap();
    let json = transport.last_json("conn-1").unwrap();
    assert_eq!(json["sourceArn"], "s3|pinecone|openai");
}
