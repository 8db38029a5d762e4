use std::{sync::Arc, time::Duration};

use basic_core::{
    JobStatus, Orchestrator, ProgressReport, ReporterExit, SessionKey,
    SimulatedSubService, StatusRegistry, SubServiceDescriptor, Transport,
};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_millis(500);

fn orchestrator(descriptors: Vec<SubServiceDescriptor>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(StatusRegistry::new()),
        Arc::new(SimulatedSubService::default()),
        descriptors,
        TICK,
    )
}

fn staggered() -> Vec<SubServiceDescriptor> {
    vec![
        SubServiceDescriptor::new("service-1", Transport::Rest)
            .with_fixed_latency(Duration::ZERO),
        SubServiceDescriptor::new("service-2", Transport::Rpc)
            .with_fixed_latency(Duration::from_secs(1)),
        SubServiceDescriptor::new("service-3", Transport::Grpc)
            .with_fixed_latency(Duration::from_secs(2)),
    ]
}

#[tokio::test(start_paused = true)]
async fn three_staggered_services_stream_to_completion() {
    let orchestrator = Arc::new(orchestrator(staggered()));
    let ticket = orchestrator
        .open(SessionKey::new("e2e"))
        .expect("open job");
    let (tx, mut rx) = mpsc::channel::<ProgressReport>(16);

    let started = Instant::now();
    let streamer = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        let ticket = ticket.clone();
        let mut tx = tx;
        async move {
            orchestrator
                .stream(&ticket, &mut tx, CancellationToken::new())
                .await
        }
    });

    let mut received = Vec::new();
    while let Some(report) = rx.recv().await {
        received.push((started.elapsed(), report));
    }

    let exit = streamer.await.expect("join").expect("stream");
    assert_eq!(exit, ReporterExit::Completed {
        reports: received.len() as u64
    });

    let lengths: Vec<usize> =
        received.iter().map(|(_, report)| report.results.len()).collect();
    assert!(
        lengths.windows(2).all(|pair| pair[0] <= pair[1]),
        "result lists must only grow: {lengths:?}"
    );
    assert!(received.iter().enumerate().all(|(n, (_, report))| {
        report.sequence == n as u64 + 1 && report.job_id == ticket.job_id
    }));

    let (elapsed, last) = received.last().expect("final report");
    assert!(last.is_final);
    assert!(*elapsed >= Duration::from_secs(2));
    assert!(*elapsed <= Duration::from_secs(2) + TICK);
    assert_eq!(last.status, JobStatus::Complete);
    assert_eq!(last.results.len(), 3);
    assert_eq!(last.error_count, 0);
    assert!(last.completed_at.is_some());

    let finals = received.iter().filter(|(_, report)| report.is_final).count();
    assert_eq!(finals, 1);

    // Ticks before the slowest service lands stay Running.
    for (elapsed, report) in &received[..received.len() - 1] {
        assert!(*elapsed < Duration::from_secs(2) + TICK);
        assert_eq!(report.status, JobStatus::Running);
        assert!(report.completed_at.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn failing_service_finishes_with_error() {
    let mut descriptors = staggered();
    descriptors[1] = descriptors[1].clone().failing();
    let orchestrator = orchestrator(descriptors);
    let ticket = orchestrator.open(SessionKey::generate()).expect("open job");
    let (mut tx, mut rx) = mpsc::channel::<ProgressReport>(16);

    orchestrator
        .stream(&ticket, &mut tx, CancellationToken::new())
        .await
        .expect("stream");
    drop(tx);

    let mut last = None;
    while let Some(report) = rx.recv().await {
        last = Some(report);
    }
    let last = last.expect("final report");
    assert_eq!(last.status, JobStatus::CompleteWithError);
    assert_eq!(last.error_count, 1);
    assert_eq!(last.results.len(), 2);
    assert!(
        orchestrator
            .registry()
            .errors(ticket.job_id)
            .iter()
            .any(|message| message.contains("service-2"))
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_stream_leaves_the_job_running_to_completion() {
    let orchestrator = Arc::new(orchestrator(staggered()));
    let ticket = orchestrator.open(SessionKey::new("leaver")).expect("open job");
    let (tx, mut rx) = mpsc::channel::<ProgressReport>(16);
    let cancel = CancellationToken::new();

    let streamer = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        let ticket = ticket.clone();
        let cancel = cancel.clone();
        let mut tx = tx;
        async move { orchestrator.stream(&ticket, &mut tx, cancel).await }
    });

    let first = rx.recv().await.expect("first report");
    assert!(!first.is_final);
    cancel.cancel();

    let exit = streamer.await.expect("join").expect("stream");
    assert_eq!(exit, ReporterExit::Cancelled { reports: 1 });
    assert!(rx.recv().await.is_none());

    tokio::time::sleep(Duration::from_secs(3)).await;
    let snapshot = orchestrator
        .snapshot(ticket.job_id)
        .expect("job still tracked");
    assert_eq!(snapshot.status, JobStatus::Complete);
    assert_eq!(snapshot.results.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn second_caller_on_same_session_observes_the_same_job() {
    let orchestrator = orchestrator(staggered());
    let first = orchestrator.open(SessionKey::new("shared")).expect("open");
    let second = orchestrator.open(SessionKey::new("shared")).expect("attach");
    assert!(second.attached);

    let (mut tx_a, mut rx_a) = mpsc::channel::<ProgressReport>(16);
    let (mut tx_b, mut rx_b) = mpsc::channel::<ProgressReport>(16);
    let (a, b) = tokio::join!(
        orchestrator.stream(&first, &mut tx_a, CancellationToken::new()),
        orchestrator.stream(&second, &mut tx_b, CancellationToken::new()),
    );
    a.expect("stream a");
    b.expect("stream b");
    drop((tx_a, tx_b));

    let mut finals = Vec::new();
    for rx in [&mut rx_a, &mut rx_b] {
        let mut last = None;
        while let Some(report) = rx.recv().await {
            last = Some(report);
        }
        finals.push(last.expect("final report"));
    }
    assert_eq!(finals[0].job_id, finals[1].job_id);
    assert!(finals.iter().all(|report| report.is_final));
    assert_eq!(orchestrator.registry().len(), 1);
}
