//! End-to-end lifecycle: real listener, real HTTP requests, real shutdown.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use event_ingest::dispatcher::{EventContext, EventHandler};
use event_ingest::event::Event;
use event_ingest::grace::GracePlan;
use event_ingest::health::HealthEndpoint;
use event_ingest::lifecycle::{Lifecycle, Phase};
use event_ingest::sync::BackgroundSync;

#[derive(Clone, Copy)]
enum Behavior {
    /// Sleeps, then succeeds.
    Quick(Duration),
    /// Ignores both tokens and never finishes.
    Stuck,
    /// Works until the work token fires, then replies until the reply token fires.
    Cooperative,
    /// Fails straight away.
    Failing,
}

#[derive(Default)]
struct Counters {
    started: AtomicUsize,
    finished: AtomicUsize,
}

struct TestHandler {
    behavior: Behavior,
    counters: Arc<Counters>,
}

impl EventHandler for TestHandler {
    type Error = String;

    async fn handle(&self, ctx: EventContext, _event: Event) -> Result<(), String> {
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        let result = match self.behavior {
            Behavior::Quick(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Behavior::Stuck => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Behavior::Cooperative => {
                ctx.work.cancelled().await;
                ctx.reply.cancelled().await;
                Ok(())
            }
            Behavior::Failing => Err("handler failed".to_string()),
        };
        self.counters.finished.fetch_add(1, Ordering::SeqCst);
        result
    }
}

struct Running {
    addr: SocketAddr,
    notify: CancellationToken,
    root: CancellationToken,
    phases: tokio::sync::watch::Receiver<Phase>,
    task: JoinHandle<ExitCode>,
}

async fn start(plan: GracePlan, behavior: Behavior, counters: Arc<Counters>) -> Running {
    start_with(Lifecycle::new(plan).with_path("/events"), behavior, counters).await
}

async fn start_with(lifecycle: Lifecycle, behavior: Behavior, counters: Arc<Counters>) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let root = lifecycle.root().clone();
    let notify = root.child_token();
    let phases = lifecycle.phases();
    let handler = TestHandler { behavior, counters };
    let task = tokio::spawn(lifecycle.run(listener, handler, notify.clone()));
    Running {
        addr,
        notify,
        root,
        phases,
        task,
    }
}

async fn post_event(
    client: &reqwest::Client,
    addr: SocketAddr,
    id: &str,
) -> reqwest::Result<reqwest::Response> {
    client
        .post(format!("http://{addr}/events"))
        .header("content-type", "application/cloudevents+json")
        .json(&json!({
            "specversion": "1.0",
            "id": id,
            "source": "tests",
            "type": "sh.keptn.event.test.triggered",
            "data": { "project": "sockshop" }
        }))
        .send()
        .await
}

async fn wait_for_started(counters: &Counters, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while counters.started.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("handlers did not start");
}

#[tokio::test]
async fn test_events_are_acknowledged_before_handlers_finish() {
    let counters = Arc::new(Counters::default());
    let running = start(
        GracePlan::new(Duration::from_secs(5), Duration::from_secs(1)),
        Behavior::Quick(Duration::from_millis(300)),
        counters.clone(),
    )
    .await;
    let client = reqwest::Client::new();

    let response = post_event(&client, running.addr, "evt-1").await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    assert_eq!(counters.finished.load(Ordering::SeqCst), 0);

    running.notify.cancel();
    let code = running.task.await.unwrap();
    assert_eq!(code, ExitCode::SUCCESS);
    assert_eq!(counters.finished.load(Ordering::SeqCst), 1);
    assert_eq!(*running.phases.borrow(), Phase::Terminated);
}

#[tokio::test]
async fn test_invalid_event_is_rejected() {
    let counters = Arc::new(Counters::default());
    let running = start(
        GracePlan::new(Duration::ZERO, Duration::ZERO),
        Behavior::Quick(Duration::ZERO),
        counters.clone(),
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/events", running.addr))
        .header("content-type", "application/json")
        .body(r#"{"specversion":"1.0","source":"tests"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().is_some());

    running.notify.cancel();
    running.task.await.unwrap();
    assert_eq!(counters.started.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_receiver_path_answers_liveness() {
    let running = start(
        GracePlan::new(Duration::ZERO, Duration::ZERO),
        Behavior::Quick(Duration::ZERO),
        Arc::new(Counters::default()),
    )
    .await;

    let body: serde_json::Value = reqwest::get(format!("http://{}/events", running.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");

    running.notify.cancel();
    running.task.await.unwrap();
}

#[tokio::test]
async fn test_no_events_accepted_after_notify() {
    let running = start(
        GracePlan::new(Duration::from_secs(1), Duration::ZERO),
        Behavior::Quick(Duration::ZERO),
        Arc::new(Counters::default()),
    )
    .await;

    running.notify.cancel();
    running.task.await.unwrap();

    let client = reqwest::Client::new();
    assert!(post_event(&client, running.addr, "late").await.is_err());
}

#[tokio::test]
async fn test_drain_finishes_early_when_handlers_complete() {
    let counters = Arc::new(Counters::default());
    let running = start(
        GracePlan::new(Duration::from_secs(10), Duration::from_secs(10)),
        Behavior::Quick(Duration::from_millis(200)),
        counters.clone(),
    )
    .await;
    let client = reqwest::Client::new();
    for i in 0..5 {
        post_event(&client, running.addr, &format!("evt-{i}")).await.unwrap();
    }

    let start = Instant::now();
    running.notify.cancel();
    running.task.await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(3), "drain took {:?}", start.elapsed());
    assert_eq!(counters.finished.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_stuck_handler_is_abandoned_after_both_periods() {
    let counters = Arc::new(Counters::default());
    let running = start(
        GracePlan::new(Duration::from_millis(400), Duration::from_millis(300)),
        Behavior::Stuck,
        counters.clone(),
    )
    .await;
    let client = reqwest::Client::new();
    post_event(&client, running.addr, "stuck").await.unwrap();
    wait_for_started(&counters, 1).await;

    let start = Instant::now();
    running.notify.cancel();
    let code = running.task.await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(code, ExitCode::SUCCESS);
    assert!(elapsed >= Duration::from_millis(700), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "returned after {elapsed:?}");
    assert_eq!(counters.finished.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cooperative_handler_uses_both_periods() {
    let counters = Arc::new(Counters::default());
    let running = start(
        GracePlan::new(Duration::from_millis(300), Duration::from_millis(300)),
        Behavior::Cooperative,
        counters.clone(),
    )
    .await;
    let client = reqwest::Client::new();
    post_event(&client, running.addr, "coop").await.unwrap();
    wait_for_started(&counters, 1).await;

    let start = Instant::now();
    running.notify.cancel();
    running.task.await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(600), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1400), "returned after {elapsed:?}");
}

#[tokio::test]
async fn test_failing_handlers_do_not_disturb_shutdown() {
    let counters = Arc::new(Counters::default());
    let running = start(
        GracePlan::new(Duration::from_secs(5), Duration::from_secs(5)),
        Behavior::Failing,
        counters.clone(),
    )
    .await;
    let client = reqwest::Client::new();
    for i in 0..10 {
        let response = post_event(&client, running.addr, &format!("evt-{i}")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    }
    wait_for_started(&counters, 10).await;

    let start = Instant::now();
    running.notify.cancel();
    running.task.await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(counters.finished.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_stalled_request_does_not_hold_shutdown() {
    let counters = Arc::new(Counters::default());
    let running = start(
        GracePlan::new(Duration::from_millis(300), Duration::from_millis(300)),
        Behavior::Quick(Duration::ZERO),
        counters.clone(),
    )
    .await;

    // Headers promise a body that never fully arrives.
    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    stream
        .write_all(
            b"POST /events HTTP/1.1\r\nHost: localhost\r\n\
              Content-Type: application/cloudevents+json\r\n\
              Content-Length: 1000\r\n\r\n{\"id\":",
        )
        .await
        .unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let start = Instant::now();
    running.notify.cancel();
    let code = tokio::time::timeout(Duration::from_secs(5), running.task)
        .await
        .expect("lifecycle blocked on the stalled connection")
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(code, ExitCode::SUCCESS);
    assert!(elapsed < Duration::from_millis(1500), "returned after {elapsed:?}");
    assert_eq!(*running.phases.borrow(), Phase::Terminated);
    assert_eq!(counters.started.load(Ordering::SeqCst), 0);
    drop(stream);
}

#[tokio::test]
async fn test_root_cancel_skips_grace_periods() {
    let counters = Arc::new(Counters::default());
    let running = start(
        GracePlan::new(Duration::from_secs(30), Duration::from_secs(30)),
        Behavior::Stuck,
        counters.clone(),
    )
    .await;
    let client = reqwest::Client::new();
    post_event(&client, running.addr, "stuck").await.unwrap();
    wait_for_started(&counters, 1).await;

    let start = Instant::now();
    running.root.cancel();
    running.task.await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(running.notify.is_cancelled());
}

#[tokio::test]
async fn test_phases_advance_in_order() {
    let counters = Arc::new(Counters::default());
    let mut running = start(
        GracePlan::new(Duration::from_millis(200), Duration::from_millis(200)),
        Behavior::Cooperative,
        counters.clone(),
    )
    .await;
    let client = reqwest::Client::new();
    post_event(&client, running.addr, "coop").await.unwrap();
    wait_for_started(&counters, 1).await;
    assert_eq!(*running.phases.borrow_and_update(), Phase::Running);

    running.notify.cancel();
    let mut seen = vec![Phase::Running];
    while running.phases.changed().await.is_ok() {
        let phase = *running.phases.borrow_and_update();
        assert!(phase > *seen.last().unwrap(), "phase went from {seen:?} to {phase:?}");
        seen.push(phase);
        if phase == Phase::Terminated {
            break;
        }
    }
    assert_eq!(seen.last(), Some(&Phase::Terminated));
    running.task.await.unwrap();
}

#[tokio::test]
async fn test_health_endpoint_stopped_after_core() {
    let health = HealthEndpoint::start("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let health_url = format!("http://{}/health", health.local_addr());
    let lifecycle = Lifecycle::new(GracePlan::new(Duration::ZERO, Duration::ZERO))
        .with_path("/events")
        .with_health(health);
    let running = start_with(
        lifecycle,
        Behavior::Quick(Duration::ZERO),
        Arc::new(Counters::default()),
    )
    .await;

    assert!(reqwest::get(&health_url).await.unwrap().status().is_success());

    running.notify.cancel();
    running.task.await.unwrap();
    assert!(reqwest::get(&health_url).await.is_err());
}

struct CountingSync {
    stopped: Arc<AtomicUsize>,
}

impl BackgroundSync for CountingSync {
    async fn run(self, notify: CancellationToken, _work: CancellationToken) {
        notify.cancelled().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_background_sync_is_drained() {
    let stopped = Arc::new(AtomicUsize::new(0));
    let lifecycle = Lifecycle::new(GracePlan::new(Duration::from_secs(5), Duration::from_secs(1)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let notify = lifecycle.root().child_token();
    let handler = TestHandler {
        behavior: Behavior::Quick(Duration::ZERO),
        counters: Arc::new(Counters::default()),
    };

    let task = tokio::spawn(lifecycle.run_with_sync(
        listener,
        handler,
        notify.clone(),
        Some(CountingSync {
            stopped: stopped.clone(),
        }),
    ));

    notify.cancel();
    task.await.unwrap();
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
}
