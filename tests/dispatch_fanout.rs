//! Fan-out/fan-in of concurrently dispatched handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use event_ingest::dispatcher::{EventContext, EventDispatcher, EventHandler};
use event_ingest::event::Event;
use event_ingest::registry::WorkerRegistry;

const EVENTS: usize = 100;

#[derive(Default)]
struct Outcomes {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

struct JitteryHandler {
    outcomes: Arc<Outcomes>,
}

impl EventHandler for JitteryHandler {
    type Error = String;

    async fn handle(&self, _ctx: EventContext, event: Event) -> Result<(), String> {
        let sleep_ms = rand::thread_rng().gen_range(1..50);
        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;

        let index: usize = event.id.parse().map_err(|_| "bad id".to_string())?;
        if index % 10 == 0 {
            self.outcomes.failed.fetch_add(1, Ordering::SeqCst);
            Err(format!("event {index} failed"))
        } else {
            self.outcomes.succeeded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wait_until_zero_covers_all_dispatched_events() {
    let outcomes = Arc::new(Outcomes::default());
    let registry = WorkerRegistry::new();
    let dispatcher = Arc::new(EventDispatcher::new(
        JitteryHandler {
            outcomes: outcomes.clone(),
        },
        registry.clone(),
        CancellationToken::new(),
        CancellationToken::new(),
    ));

    // Dispatch from many tasks at once, like concurrent receiver requests.
    let senders: Vec<_> = (0..EVENTS)
        .map(|i| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.dispatch(Event::new(i.to_string(), "tests", "sh.keptn.event.test"));
            })
        })
        .collect();
    for sender in senders {
        sender.await.unwrap();
    }

    registry.wait_until_zero().await;

    let succeeded = outcomes.succeeded.load(Ordering::SeqCst);
    let failed = outcomes.failed.load(Ordering::SeqCst);
    assert_eq!(succeeded + failed, EVENTS);
    assert_eq!(failed, EVENTS / 10);
    assert_eq!(registry.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_holds_the_drain() {
    struct Slow;

    impl EventHandler for Slow {
        type Error = String;

        async fn handle(&self, _ctx: EventContext, event: Event) -> Result<(), String> {
            let secs = if event.id == "slow" { 30 } else { 1 };
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok(())
        }
    }

    let registry = WorkerRegistry::new();
    let dispatcher = EventDispatcher::new(
        Slow,
        registry.clone(),
        CancellationToken::new(),
        CancellationToken::new(),
    );

    dispatcher.dispatch(Event::new("fast", "tests", "t"));
    dispatcher.dispatch(Event::new("slow", "tests", "t"));

    let start = tokio::time::Instant::now();
    registry.wait_until_zero().await;
    assert!(start.elapsed() >= Duration::from_secs(30));
}
