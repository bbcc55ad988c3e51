//! Scripted walkthrough: two consumers sharing one filtered feed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::time::sleep;

use livefeed_client::{
    Listener, ManagerConfig, ManagerStats, MemoryTransport, OpenBehavior, RealtimeManager,
    SessionInfo,
};
use livefeed_proto::{ChangeEvent, FeedKey, TransportStatus};

const FEED: &str = "orders-42";
const SETTLE: Duration = Duration::from_millis(20);

/// Manager state captured after one step.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub label: String,
    pub stats: ManagerStats,
    pub sessions: Vec<SessionInfo>,
    /// Listener invocations since the previous step.
    pub notifications: usize,
}

struct Recorder {
    manager: Arc<RealtimeManager<MemoryTransport>>,
    calls: Arc<AtomicUsize>,
    seen: usize,
    steps: Vec<Step>,
}

impl Recorder {
    fn record(&mut self, label: &str) {
        let total = self.calls.load(Ordering::SeqCst);
        self.steps.push(Step {
            label: label.to_string(),
            stats: self.manager.stats(),
            sessions: self.manager.sessions(),
            notifications: total - self.seen,
        });
        self.seen = total;
    }
}

fn counting_listener(calls: &Arc<AtomicUsize>) -> Listener {
    let calls = Arc::clone(calls);
    Listener::new(move || {
        calls.fetch_add(1, Ordering::SeqCst);
    })
}

pub async fn run(config: ManagerConfig) -> Result<Vec<Step>, Box<dyn std::error::Error>> {
    let grace = config.grace_delay;
    let transport = Arc::new(MemoryTransport::new());
    transport.plan(FEED, [OpenBehavior::Hang]);
    let manager = RealtimeManager::new(transport.clone(), config);

    let calls = Arc::new(AtomicUsize::new(0));
    let mut recorder = Recorder {
        manager: manager.clone(),
        calls: calls.clone(),
        seen: 0,
        steps: Vec::new(),
    };

    let key = FeedKey::new(FEED, "orders").with_filter("customer_id=eq.42");
    let cb1 = counting_listener(&calls);
    let cb2 = counting_listener(&calls);

    let first = manager.subscribe(key.clone(), cb1.clone());
    recorder.record("first consumer subscribes");

    let second = manager.subscribe(key, cb2.clone());
    sleep(SETTLE).await;
    recorder.record("second consumer joins before connect");

    transport.signal(FEED, TransportStatus::Connected);
    first.await?;
    second.await?;
    recorder.record("transport confirms the feed");

    transport.publish(ChangeEvent::insert("orders", json!({ "customer_id": 7 })));
    transport.publish(ChangeEvent::update(
        "orders",
        json!({ "customer_id": 42, "status": "shipped" }),
        None,
    ));
    sleep(SETTLE).await;
    recorder.record("one matching change published");

    manager.unsubscribe(FEED, &cb1);
    recorder.record("first consumer leaves");

    manager.unsubscribe(FEED, &cb2);
    recorder.record("second consumer leaves");

    sleep(grace + SETTLE).await;
    recorder.record("grace delay elapsed");

    tracing::debug!(
        opens = transport.open_count(FEED),
        closes = transport.close_count(FEED),
        "scenario finished"
    );
    manager.shutdown().await;

    Ok(recorder.steps)
}
