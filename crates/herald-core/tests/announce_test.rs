// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for announcement dispatch.

mod common;

use std::time::Duration;

use common::*;
use herald_core::{Error, Orchestrator, RecordKind, ServiceError, Status, Storage};

#[tokio::test]
async fn test_announce_with_empty_queue() {
    let ctx = TestContext::new().await;

    let err = ctx.orchestrator.announce().await.unwrap_err();
    assert!(matches!(err, Error::EmptyQueue));

    // Untagged records are never queued.
    ctx.orchestrator.create_run(ctx.run("run-1")).await.unwrap();
    let err = ctx.orchestrator.announce().await.unwrap_err();
    assert!(matches!(err, Error::EmptyQueue));
}

#[tokio::test]
async fn test_announce_run_and_sample() {
    let ctx = TestContext::new().await;
    let orch = &ctx.orchestrator;

    orch.create_run(ctx.run("run-1").tags(["sequence"]))
        .await
        .expect("create run");
    orch.create_sample(ctx.sample("sample-1", "run-1", 1).tags(["pipeline"]))
        .await
        .expect("create sample");
    assert_eq!(orch.queue_len().await, 2);

    let report = orch.announce().await.expect("announce");

    assert_eq!(report.runs, 1);
    assert_eq!(report.samples, 1);
    assert_eq!(report.requests, 2);
    assert_eq!(orch.queue_len().await, 0);
    assert_eq!(orch.announced_count().await, 2);
    assert_eq!(
        orch.record_status(RecordKind::Run, "run-1").await.unwrap(),
        Status::Announced
    );
    assert_eq!(
        orch.record_status(RecordKind::Sample, "sample-1").await.unwrap(),
        Status::Announced
    );
    assert_eq!(
        ctx.requests(),
        [req("sequence", "run-1"), req("pipeline", "sample-1")]
    );

    let counts = orch.counts(RecordKind::Run).await;
    assert_eq!(counts.announced, 1);
    assert_eq!(counts.tagged_incomplete, 0);
}

#[tokio::test]
async fn test_runs_announced_before_samples() {
    let ctx = TestContext::new().await;
    let orch = &ctx.orchestrator;

    orch.create_run(ctx.run("run-1").tags(["sequence"])).await.unwrap();
    orch.create_sample(ctx.sample("sample-1", "run-1", 1).tags(["pipeline"]))
        .await
        .unwrap();
    orch.create_run(ctx.run("run-2").tags(["sequence"])).await.unwrap();
    orch.create_sample(ctx.sample("sample-2", "run-2", 2).tags(["pipeline"]))
        .await
        .unwrap();

    orch.announce().await.unwrap();

    assert_eq!(
        ctx.requests(),
        [
            req("sequence", "run-1"),
            req("sequence", "run-2"),
            req("pipeline", "sample-1"),
            req("pipeline", "sample-2"),
        ]
    );
}

#[tokio::test]
async fn test_requests_follow_dependency_order() {
    let ctx = TestContext::new().await;
    let orch = &ctx.orchestrator;

    orch.create_run(ctx.run("run-1").tags(["upload", "sequence", "basecall"]))
        .await
        .unwrap();

    let record = orch.record(RecordKind::Run, "run-1").await.unwrap();
    assert_eq!(record.request_order(), ["sequence", "basecall", "upload"]);

    orch.announce().await.unwrap();

    assert_eq!(
        ctx.requests(),
        [
            req("sequence", "run-1"),
            req("basecall", "run-1"),
            req("upload", "run-1"),
        ]
    );
}

#[tokio::test]
async fn test_failing_service_keeps_record_queued() {
    let ctx = TestContext::new().await;
    let orch = &ctx.orchestrator;

    orch.create_run(ctx.run("run-1").tags(["sequence"])).await.unwrap();
    orch.create_sample(ctx.sample("sample-1", "run-1", 1).tags(["pipeline"]))
        .await
        .unwrap();
    ctx.client("pipeline").set_failing(true);

    let err = orch.announce().await.unwrap_err();
    match &err {
        Error::DispatchFailed {
            service,
            label,
            source,
        } => {
            assert_eq!(service, "pipeline");
            assert_eq!(label, "sample-1");
            assert!(matches!(source, ServiceError::Rejected(_)));
        }
        other => panic!("expected dispatch failure, got {other:?}"),
    }

    // The run went out before the failure and stays announced.
    assert_eq!(
        orch.record_status(RecordKind::Run, "run-1").await.unwrap(),
        Status::Announced
    );
    assert_eq!(
        orch.record_status(RecordKind::Sample, "sample-1").await.unwrap(),
        Status::TaggedIncomplete
    );
    assert_eq!(orch.queue_len().await, 1);
    assert!(orch.is_queued(RecordKind::Sample, "sample-1").await);

    // Once the service recovers the sample goes out on the next call.
    ctx.client("pipeline").set_failing(false);
    let report = orch.announce().await.expect("second announce");
    assert_eq!(report.runs, 0);
    assert_eq!(report.samples, 1);
    assert_eq!(orch.queue_len().await, 0);
    assert_eq!(ctx.client("sequence").calls(), 1);
}

#[tokio::test]
async fn test_failed_record_is_left_unchanged() {
    let ctx = TestContext::new().await;
    let orch = &ctx.orchestrator;

    orch.create_run(ctx.run("run-1").tags(["sequence", "basecall"]))
        .await
        .unwrap();
    let before = orch.record(RecordKind::Run, "run-1").await.unwrap();
    ctx.client("basecall").set_failing(true);

    orch.announce().await.unwrap_err();

    // sequence accepted the request, but nothing about it was stored.
    assert_eq!(ctx.requests(), [req("sequence", "run-1")]);
    let after = orch.record(RecordKind::Run, "run-1").await.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_unreachable_service_blocks_everything() {
    let ctx = TestContext::new().await;
    let orch = &ctx.orchestrator;

    orch.create_run(ctx.run("run-1").tags(["sequence"])).await.unwrap();
    orch.create_sample(ctx.sample("sample-1", "run-1", 1).tags(["pipeline"]))
        .await
        .unwrap();
    ctx.client("pipeline").set_reachable(false);

    let err = orch.announce().await.unwrap_err();
    assert!(matches!(
        err,
        Error::ServiceUnreachable { ref service, .. } if service == "pipeline"
    ));

    assert!(ctx.requests().is_empty());
    assert_eq!(ctx.client("sequence").calls(), 0);
    assert_eq!(orch.queue_len().await, 2);
    assert_eq!(orch.announced_count().await, 0);
}

#[tokio::test]
async fn test_completed_tags_are_not_requested() {
    let ctx = TestContext::new().await;
    let orch = &ctx.orchestrator;

    orch.create_run(
        ctx.run("run-1")
            .tags(["sequence", "basecall", "upload"])
            .historic(),
    )
    .await
    .unwrap();
    assert_eq!(
        orch.record_status(RecordKind::Run, "run-1").await.unwrap(),
        Status::TaggedIncomplete
    );

    orch.announce().await.unwrap();

    assert_eq!(ctx.requests(), [req("upload", "run-1")]);
    assert_eq!(ctx.client("sequence").probes(), 0);
    assert_eq!(ctx.client("upload").probes(), 1);
}

#[tokio::test]
async fn test_announce_appends_history() {
    let ctx = TestContext::new().await;
    let orch = &ctx.orchestrator;

    orch.create_run(ctx.run("run-1").tags(["sequence", "basecall"]))
        .await
        .unwrap();
    orch.announce().await.unwrap();

    let record = orch.record(RecordKind::Run, "run-1").await.unwrap();
    let history: Vec<&str> = record
        .metadata()
        .history()
        .iter()
        .map(|c| c.text.as_str())
        .collect();
    assert_eq!(history.first(), Some(&"run created."));
    assert!(history.contains(&"sequence request sent."));
    assert!(history.contains(&"basecall request sent."));
    assert_eq!(history.last(), Some(&"run announced."));
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let mut ctx = TestContext::new().await;
    ctx.client("sequence").set_delay(Duration::from_secs(30));

    ctx.orchestrator
        .create_run(ctx.run("run-1").tags(["sequence"]))
        .await
        .unwrap();

    // Swap in an orchestrator with a short request timeout over the same store.
    let registry = ctx.orchestrator.registry().clone();
    ctx.orchestrator.close().await.unwrap();
    let storage = Storage::open(ctx.dir.path(), ctx.max_entries).await.unwrap();
    ctx.orchestrator = Orchestrator::builder()
        .storage(storage)
        .registry(registry)
        .request_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    ctx.orchestrator.rebuild().await.unwrap();

    let err = ctx.orchestrator.announce().await.unwrap_err();
    match err {
        Error::DispatchFailed { source, .. } => {
            assert!(matches!(source, ServiceError::Timeout(d) if d == Duration::from_millis(100)));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(ctx.orchestrator.queue_len().await, 1);
}

#[tokio::test]
async fn test_announced_survives_restart() {
    let mut ctx = TestContext::new().await;

    ctx.orchestrator
        .create_run(ctx.run("run-1").tags(["sequence"]))
        .await
        .unwrap();
    ctx.orchestrator
        .create_run(ctx.run("run-2").tags(["sequence"]))
        .await
        .unwrap();
    ctx.orchestrator.announce().await.unwrap();
    ctx.orchestrator
        .create_run(ctx.run("run-3").tags(["sequence"]))
        .await
        .unwrap();

    ctx.restart().await;

    let counts = ctx.orchestrator.counts(RecordKind::Run).await;
    assert_eq!(counts.total, 3);
    assert_eq!(counts.announced, 2);
    assert_eq!(counts.tagged_incomplete, 1);
    assert_eq!(ctx.orchestrator.queue_len().await, 1);
    assert!(ctx.orchestrator.is_queued(RecordKind::Run, "run-3").await);
}
