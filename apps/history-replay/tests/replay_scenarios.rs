//! Replay Session Integration Tests
//!
//! Drives full sessions (fetcher, dispatcher, seek controller) against an
//! in-memory history source with the tokio clock paused, so real-time
//! assertions are deterministic.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;

use history_replay::{
    HistoryError, HistoryPort, InMemoryHistory, RawSample, ReplayEvent, ReplaySession, RetryConfig, SeekCommand, SeekError,
    SensorCatalog, SensorId, SensorRef, SessionConfig, SessionConfigError, SessionHandle,
};

const ORIGIN_UNIX: i64 = 1_401_926_400;
const SENSOR_A: &str = "http://chain-api.media.mit.edu/sensors/1";
const SENSOR_B: &str = "http://chain-api.media.mit.edu/sensors/2";

/// Virtual time `secs` seconds after the replay origin.
fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ORIGIN_UNIX + secs, 0).unwrap()
}

fn iso(secs: i64) -> String {
    at(secs).to_rfc3339()
}

fn config(scale: f64) -> SessionConfig {
    SessionConfig {
        start: at(0),
        scale,
        look_ahead: TimeDelta::seconds(1000),
        chunk_length: TimeDelta::seconds(2000),
        poll_interval: Duration::from_millis(50),
        retry: RetryConfig::fixed(Duration::from_millis(200), Duration::from_secs(1), 2.0),
        ..SessionConfig::default()
    }
}

fn catalog(ids: &[&str]) -> Arc<SensorCatalog> {
    Arc::new(
        ids.iter()
            .map(|id| SensorRef::new(SensorId::new(*id), "temperature"))
            .collect(),
    )
}

/// One sensor with readings at 0s, 5s and 10s (values 1, 2, 3).
fn three_readings() -> (Arc<InMemoryHistory>, Arc<SensorCatalog>) {
    let mut history = InMemoryHistory::new();
    history.add_samples(
        &SensorId::new(SENSOR_A),
        [
            RawSample::new(iso(0), 1.0),
            RawSample::new(iso(5), 2.0),
            RawSample::new(iso(10), 3.0),
        ],
    );
    (Arc::new(history), catalog(&[SENSOR_A]))
}

fn spawn(
    config: SessionConfig,
    catalog: Arc<SensorCatalog>,
    history: &Arc<InMemoryHistory>,
) -> (SessionHandle, mpsc::Receiver<ReplayEvent>) {
    let (tx, rx) = mpsc::channel(64);
    let session = ReplaySession::spawn(
        config,
        catalog,
        Arc::<InMemoryHistory>::clone(history),
        Arc::new(tx),
        CancellationToken::new(),
    )
    .unwrap();
    (session, rx)
}

async fn next_event(rx: &mut mpsc::Receiver<ReplayEvent>) -> ReplayEvent {
    timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("sink closed")
}

// =============================================================================
// Timeline
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_events_follow_the_pseudo_clock() {
    let (history, catalog) = three_readings();
    let started = Instant::now();
    let (session, mut rx) = spawn(config(10.0), catalog, &history);

    let first = next_event(&mut rx).await;
    assert_eq!(first.timestamp, at(0));
    assert!((first.value - 1.0).abs() < f64::EPSILON);

    let second = next_event(&mut rx).await;
    assert_eq!(second.timestamp, at(5));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(500), "t=5 delivered early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "t=5 delivered late: {elapsed:?}");

    // t=10 is not due until 1.0s real time
    assert!(timeout(Duration::from_millis(400), rx.recv()).await.is_err());

    let third = next_event(&mut rx).await;
    assert_eq!(third.timestamp, at(10));
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(session.snapshot().virtual_now >= third.timestamp);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_event_is_delivered_before_its_time() {
    let (history, catalog) = three_readings();
    let (session, mut rx) = spawn(config(10.0), catalog, &history);

    for _ in 0..3 {
        let event = next_event(&mut rx).await;
        assert!(session.snapshot().virtual_now >= event.timestamp);
    }

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_events_are_ordered_across_sensors() {
    let mut history = InMemoryHistory::new();
    history.add_samples(
        &SensorId::new(SENSOR_A),
        [
            RawSample::new(iso(3), 1.0),
            RawSample::new(iso(8), 2.0),
        ],
    );
    history.add_samples(
        &SensorId::new(SENSOR_B),
        [
            RawSample::new(iso(1), 10.0),
            RawSample::new(iso(3), 20.0),
            RawSample::new(iso(9), 30.0),
        ],
    );
    let history = Arc::new(history);
    let (session, mut rx) = spawn(config(100.0), catalog(&[SENSOR_A, SENSOR_B]), &history);

    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(next_event(&mut rx).await);
    }

    let timeline: Vec<(DateTime<Utc>, &str)> = received
        .iter()
        .map(|event| (event.timestamp, event.sensor.id.as_str()))
        .collect();
    assert_eq!(
        timeline,
        vec![
            (at(1), SENSOR_B),
            // Equal timestamps keep fetch order: catalog order within a chunk
            (at(3), SENSOR_A),
            (at(3), SENSOR_B),
            (at(8), SENSOR_A),
            (at(9), SENSOR_B),
        ]
    );

    session.shutdown().await;
}

// =============================================================================
// Seek
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_seek_discards_pending_events_and_refetches() {
    let (history, catalog) = three_readings();
    let started = Instant::now();
    let (session, mut rx) = spawn(config(10.0), catalog, &history);

    assert_eq!(next_event(&mut rx).await.timestamp, at(0));
    assert_eq!(next_event(&mut rx).await.timestamp, at(5));

    // t=10 is still queued under the old origin
    session.seek(SeekCommand::to(at(7))).await.unwrap();

    let next = next_event(&mut rx).await;
    assert!(next.timestamp >= at(7));
    assert_eq!(next.timestamp, at(10));

    // Refetched from the new origin: due 0.3s after the seek, not at 1.0s
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_millis(950), "old t=10 delivered: {elapsed:?}");

    let snapshot = session.snapshot();
    assert_eq!(snapshot.generation, 1);
    assert!((snapshot.scale - 10.0).abs() < f64::EPSILON);

    let requests = history.requests();
    assert!(
        requests
            .iter()
            .any(|r| r.start == at(7) && r.end == at(7) + TimeDelta::seconds(2000)),
        "no refetch from the seek target: {requests:?}"
    );

    session.shutdown().await;
}

/// History source whose first fetch blocks until released.
struct GatedHistory {
    inner: Arc<InMemoryHistory>,
    gated: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedHistory {
    fn new(inner: Arc<InMemoryHistory>) -> Self {
        Self {
            inner,
            gated: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl HistoryPort for GatedHistory {
    async fn fetch_samples(
        &self,
        sensor: &SensorRef,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawSample>, HistoryError> {
        if self.gated.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.fetch_samples(sensor, start, end).await
    }

    fn name(&self) -> &str {
        "gated"
    }
}

#[tokio::test(start_paused = true)]
async fn test_seek_during_fetch_discards_the_in_flight_chunk() {
    let (inner, catalog) = three_readings();
    let history = Arc::new(GatedHistory::new(Arc::clone(&inner)));
    let (tx, mut rx) = mpsc::channel(64);
    let session = ReplaySession::spawn(
        config(10.0),
        catalog,
        Arc::clone(&history) as Arc<dyn HistoryPort>,
        Arc::new(tx),
        CancellationToken::new(),
    )
    .unwrap();

    // First window [0, 2000) is now in flight
    timeout(Duration::from_secs(5), history.entered.notified())
        .await
        .expect("first fetch never started");

    session.seek(SeekCommand::to(at(7))).await.unwrap();
    timeout(Duration::from_secs(5), async {
        while session.snapshot().generation == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("seek never applied");

    let snapshot = session.snapshot();
    assert_eq!(snapshot.horizon, at(7));
    assert_eq!(snapshot.queued, 0);

    // The old chunk (t=0, 5, 10) completes after the rebase
    history.release.notify_one();

    let first = next_event(&mut rx).await;
    assert_eq!(first.timestamp, at(10));
    assert!((first.value - 3.0).abs() < f64::EPSILON);
    assert!(timeout(Duration::from_secs(2), rx.recv()).await.is_err());

    let requests = inner.requests();
    assert_eq!(requests[0].start, at(0));
    assert!(
        requests
            .iter()
            .any(|r| r.start == at(7) && r.end == at(7) + TimeDelta::seconds(2000)),
        "no refetch from the seek target: {requests:?}"
    );

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_seek_backwards_replays_again() {
    let (history, catalog) = three_readings();
    let (session, mut rx) = spawn(config(10.0), catalog, &history);

    for _ in 0..3 {
        next_event(&mut rx).await;
    }

    session.seek(SeekCommand::to(at(0))).await.unwrap();

    assert_eq!(next_event(&mut rx).await.timestamp, at(0));
    assert_eq!(next_event(&mut rx).await.timestamp, at(5));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_seek_can_change_speed() {
    let (history, catalog) = three_readings();
    let (session, mut rx) = spawn(config(10.0), catalog, &history);

    assert_eq!(next_event(&mut rx).await.timestamp, at(0));

    session
        .seek(SeekCommand::to(at(0)).with_scale(100.0))
        .await
        .unwrap();

    let replayed = next_event(&mut rx).await;
    assert_eq!(replayed.timestamp, at(0));
    assert!((session.snapshot().scale - 100.0).abs() < f64::EPSILON);

    // At 100x, t=5 arrives 50ms after the rebase
    let rebased_at = Instant::now();
    assert_eq!(next_event(&mut rx).await.timestamp, at(5));
    assert!(rebased_at.elapsed() < Duration::from_millis(100));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_seek_rejects_invalid_scale() {
    let (history, catalog) = three_readings();
    let (session, _rx) = spawn(config(10.0), catalog, &history);

    let result = session.seek(SeekCommand::to(at(7)).with_scale(-1.0)).await;
    assert_eq!(result, Err(SeekError::InvalidScale(-1.0)));
    assert_eq!(session.snapshot().generation, 0);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_seek_after_close_fails() {
    let (history, catalog) = three_readings();
    let (session, _rx) = spawn(config(10.0), catalog, &history);

    session.cancellation_token().cancel();

    assert_eq!(
        session.seek(SeekCommand::to(at(7))).await,
        Err(SeekError::SessionClosed)
    );
    assert!(session.is_closed());
}

// =============================================================================
// Failures and Bad Data
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_chunk_is_retried_for_the_same_window() {
    let (history, catalog) = three_readings();
    history.fail_next(2);
    let started = Instant::now();
    let (session, mut rx) = spawn(config(10.0), catalog, &history);

    let first = next_event(&mut rx).await;
    assert_eq!(first.timestamp, at(0));

    // Two failures back off 200ms then 400ms before the third attempt
    assert!(started.elapsed() >= Duration::from_millis(600));

    let requests = history.requests();
    assert!(requests.len() >= 3);
    for request in &requests[..3] {
        assert_eq!(request.start, at(0));
        assert_eq!(request.end, at(2000));
    }

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_bad_samples_are_skipped() {
    let mut history = InMemoryHistory::new();
    history.add_samples(
        &SensorId::new(SENSOR_A),
        [
            RawSample::new("not a timestamp", 1.0),
            RawSample::new(iso(1), 2.0).with_sensor("http://chain-api.media.mit.edu/sensors/999"),
            RawSample::new(iso(2), 3.0),
            RawSample::new(iso(3), 4.0).with_sensor(SENSOR_B),
        ],
    );
    let history = Arc::new(history);
    let (session, mut rx) = spawn(config(10.0), catalog(&[SENSOR_A, SENSOR_B]), &history);

    let valid = next_event(&mut rx).await;
    assert_eq!(valid.timestamp, at(2));
    assert!((valid.value - 3.0).abs() < f64::EPSILON);
    assert_eq!(valid.sensor.id.as_str(), SENSOR_A);

    // A sample may belong to another catalog sensor than the one requested
    let reattributed = next_event(&mut rx).await;
    assert_eq!(reattributed.timestamp, at(3));
    assert_eq!(reattributed.sensor.id.as_str(), SENSOR_B);

    assert!(timeout(Duration::from_secs(5), rx.recv()).await.is_err());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sensor_without_history_does_not_stall_replay() {
    let (history, _) = three_readings();
    let (session, mut rx) = spawn(config(10.0), catalog(&[SENSOR_B, SENSOR_A]), &history);

    assert_eq!(next_event(&mut rx).await.timestamp, at(0));
    assert_eq!(next_event(&mut rx).await.timestamp, at(5));

    session.shutdown().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_closed_sink_ends_session() {
    let (history, catalog) = three_readings();
    let (session, mut rx) = spawn(config(10.0), catalog, &history);

    next_event(&mut rx).await;
    drop(rx);

    timeout(Duration::from_secs(5), session.closed())
        .await
        .expect("session did not end after the sink closed");
    assert!(session.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_parent_cancellation_ends_session() {
    let (history, catalog) = three_readings();
    let parent = CancellationToken::new();
    let (tx, _rx) = mpsc::channel::<ReplayEvent>(64);
    let session = ReplaySession::spawn(
        config(10.0),
        catalog,
        Arc::<InMemoryHistory>::clone(&history),
        Arc::new(tx),
        parent.child_token(),
    )
    .unwrap();

    parent.cancel();

    timeout(Duration::from_secs(1), session.closed())
        .await
        .expect("session ignored parent cancellation");
    session.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let (history, catalog) = three_readings();
    let (tx, _rx) = mpsc::channel::<ReplayEvent>(1);

    let result = ReplaySession::spawn(
        SessionConfig {
            scale: 0.0,
            ..config(1.0)
        },
        catalog,
        history,
        Arc::new(tx),
        CancellationToken::new(),
    );

    assert!(matches!(result, Err(SessionConfigError::InvalidScale(_))));
}
