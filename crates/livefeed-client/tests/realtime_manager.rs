//! Integration tests for the feed session manager.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tokio::time::{sleep, Instant};

use livefeed_client::proto::{ChangeEvent, EventType, FeedKey, TransportStatus};
use livefeed_client::{
    FeedSubscription, Listener, ManagerConfig, MemoryTransport, OpenBehavior, ProcessSignal,
    RealtimeManager, SessionState, SignalHub, SubscriptionError,
};

struct TestContext {
    transport: Arc<MemoryTransport>,
    manager: Arc<RealtimeManager<MemoryTransport>>,
}

impl TestContext {
    fn new() -> Self {
        Self::with_transport(MemoryTransport::new())
    }

    fn with_transport(transport: MemoryTransport) -> Self {
        let transport = Arc::new(transport);
        let manager = RealtimeManager::new(transport.clone(), ManagerConfig::default());
        Self { transport, manager }
    }

    fn ref_count(&self, name: &str) -> Option<usize> {
        self.manager.session_info(name).map(|info| info.ref_count)
    }

    fn state(&self, name: &str) -> Option<SessionState> {
        self.manager.session_info(name).map(|info| info.state)
    }
}

struct Tally {
    calls: Arc<AtomicUsize>,
    listener: Listener,
}

impl Tally {
    fn new() -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let listener = {
            let calls = calls.clone();
            Listener::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        Self { calls, listener }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn orders_key(name: &str) -> FeedKey {
    FeedKey::new(name, "orders")
}

async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_subscribers_share_one_open() {
    let ctx = TestContext::new();
    let tallies: Vec<Tally> = (0..5).map(|_| Tally::new()).collect();

    let pending: Vec<_> = tallies
        .iter()
        .map(|p| ctx.manager.subscribe(orders_key("orders"), p.listener.clone()))
        .collect();
    assert_eq!(ctx.ref_count("orders"), Some(5));

    for outcome in join_all(pending).await {
        outcome.unwrap();
    }

    assert_eq!(ctx.transport.open_count("orders"), 1);
    assert_eq!(ctx.ref_count("orders"), Some(5));
    assert_eq!(ctx.manager.session_info("orders").unwrap().listener_count, 5);
}

#[tokio::test(start_paused = true)]
async fn ref_count_tracks_calls_and_never_goes_negative() {
    let ctx = TestContext::new();
    let a = Tally::new();
    let b = Tally::new();

    ctx.manager
        .subscribe(orders_key("orders"), a.listener.clone())
        .await
        .unwrap();
    assert_eq!(ctx.ref_count("orders"), Some(1));

    ctx.manager
        .subscribe(orders_key("orders"), b.listener.clone())
        .await
        .unwrap();
    assert_eq!(ctx.ref_count("orders"), Some(2));

    ctx.manager.unsubscribe("orders", &a.listener);
    assert_eq!(ctx.ref_count("orders"), Some(1));

    ctx.manager
        .subscribe(orders_key("orders"), a.listener.clone())
        .await
        .unwrap();
    assert_eq!(ctx.ref_count("orders"), Some(2));

    ctx.manager.unsubscribe("orders", &a.listener);
    ctx.manager.unsubscribe("orders", &b.listener);
    assert_eq!(ctx.ref_count("orders"), Some(0));

    // extra releases saturate
    ctx.manager.unsubscribe("orders", &b.listener);
    assert_eq!(ctx.ref_count("orders"), Some(0));
}

#[tokio::test(start_paused = true)]
async fn resubscribe_within_grace_keeps_session() {
    let ctx = TestContext::new();
    let tally = Tally::new();

    ctx.manager
        .subscribe(orders_key("orders"), tally.listener.clone())
        .await
        .unwrap();
    ctx.manager.unsubscribe("orders", &tally.listener);

    sleep(Duration::from_millis(500)).await;
    ctx.manager
        .subscribe(orders_key("orders"), tally.listener.clone())
        .await
        .unwrap();

    sleep(Duration::from_secs(3)).await;

    assert_eq!(ctx.state("orders"), Some(SessionState::Connected));
    assert_eq!(ctx.transport.open_count("orders"), 1);
    assert_eq!(ctx.transport.close_count("orders"), 0);
}

#[tokio::test(start_paused = true)]
async fn idle_session_is_closed_once_after_grace() {
    let ctx = TestContext::new();
    let tally = Tally::new();

    ctx.manager
        .subscribe(orders_key("orders"), tally.listener.clone())
        .await
        .unwrap();
    ctx.manager.unsubscribe("orders", &tally.listener);

    sleep(Duration::from_millis(900)).await;
    assert!(ctx.manager.session_info("orders").is_some());

    sleep(Duration::from_millis(200)).await;
    assert!(ctx.manager.session_info("orders").is_none());
    assert!(!ctx.transport.is_open("orders"));

    sleep(Duration::from_secs(5)).await;
    assert_eq!(ctx.transport.close_count("orders"), 1);
}

#[tokio::test(start_paused = true)]
async fn retries_with_doubling_backoff() {
    let ctx = TestContext::new();
    ctx.transport.plan(
        "orders",
        [OpenBehavior::Fail("unavailable".into()), OpenBehavior::TimeOut],
    );
    let tally = Tally::new();

    ctx.manager
        .subscribe(orders_key("orders"), tally.listener.clone())
        .await
        .unwrap();

    assert_eq!(ctx.state("orders"), Some(SessionState::Connected));

    let opens = ctx.transport.open_times("orders");
    assert_eq!(opens.len(), 3);
    let first_wait = opens[1] - opens[0];
    let second_wait = opens[2] - opens[1];
    assert!(first_wait >= Duration::from_secs(1) && first_wait < Duration::from_millis(1100));
    assert!(second_wait >= Duration::from_secs(2) && second_wait < Duration::from_millis(2100));

    // failed attempts are released
    assert_eq!(ctx.transport.close_count("orders"), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_feed_is_rejected_and_removed() {
    let ctx = TestContext::with_transport(MemoryTransport::with_default(OpenBehavior::Fail(
        "unavailable".into(),
    )));
    let tally = Tally::new();
    let joiner = Tally::new();

    let first = ctx
        .manager
        .subscribe(orders_key("orders"), tally.listener.clone());
    let second = ctx
        .manager
        .subscribe(orders_key("orders"), joiner.listener.clone());

    let err = first.await.unwrap_err();
    assert_eq!(second.await.unwrap_err(), err);

    match err {
        SubscriptionError::Exhausted { feed, attempts, .. } => {
            assert_eq!(feed, "orders");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(ctx.transport.open_count("orders"), 3);
    assert!(ctx.manager.stats().session_names.is_empty());
    assert!(!ctx.transport.is_open("orders"));
}

#[tokio::test(start_paused = true)]
async fn panicking_listener_does_not_block_others() {
    let ctx = TestContext::new();
    let first = Tally::new();
    let broken = Listener::new(|| panic!("listener exploded"));
    let third = Tally::new();

    for listener in [first.listener.clone(), broken, third.listener.clone()] {
        ctx.manager
            .subscribe(orders_key("orders"), listener)
            .await
            .unwrap();
    }

    ctx.transport
        .emit("orders", ChangeEvent::insert("orders", json!({ "id": 1 })));
    settle().await;

    assert_eq!(first.calls(), 1);
    assert_eq!(third.calls(), 1);
    assert_eq!(ctx.state("orders"), Some(SessionState::Connected));
}

#[tokio::test(start_paused = true)]
async fn nothing_is_dispatched_before_connected() {
    let ctx = TestContext::with_transport(MemoryTransport::with_default(OpenBehavior::Hang));
    let tally = Tally::new();

    let pending = ctx
        .manager
        .subscribe(orders_key("orders"), tally.listener.clone());
    settle().await;
    assert_eq!(ctx.state("orders"), Some(SessionState::Connecting));

    ctx.transport
        .emit("orders", ChangeEvent::insert("orders", json!({ "id": 1 })));
    settle().await;
    assert_eq!(tally.calls(), 0);

    ctx.transport.signal("orders", TransportStatus::Connected);
    pending.await.unwrap();
    assert_eq!(tally.calls(), 0);

    ctx.transport
        .emit("orders", ChangeEvent::insert("orders", json!({ "id": 2 })));
    settle().await;
    assert_eq!(tally.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn adapter_rebind_does_not_resubscribe() {
    let ctx = TestContext::new();
    let old_calls = Arc::new(AtomicUsize::new(0));
    let new_calls = Arc::new(AtomicUsize::new(0));

    let mut sub = FeedSubscription::new(ctx.manager.clone());
    {
        let old_calls = old_calls.clone();
        sub.activate(orders_key("orders"), move || {
            old_calls.fetch_add(1, Ordering::SeqCst);
        });
    }
    settle().await;
    let before = ctx.manager.stats();

    {
        let new_calls = new_calls.clone();
        sub.set_callback(move || {
            new_calls.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(ctx.manager.stats(), before);

    ctx.transport
        .emit("orders", ChangeEvent::insert("orders", json!({})));
    settle().await;

    assert_eq!(old_calls.load(Ordering::SeqCst), 0);
    assert_eq!(new_calls.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.transport.open_count("orders"), 1);
}

#[tokio::test(start_paused = true)]
async fn two_components_share_filtered_feed() {
    let ctx = TestContext::with_transport(MemoryTransport::with_default(OpenBehavior::Hang));
    let key = FeedKey::new("orders-42", "orders")
        .with_filter("customer_id=eq.42")
        .with_event_type(EventType::Any);
    let cb1 = Tally::new();
    let cb2 = Tally::new();

    let first = ctx.manager.subscribe(key.clone(), cb1.listener.clone());
    let second = ctx.manager.subscribe(key, cb2.listener.clone());
    settle().await;

    ctx.transport.signal("orders-42", TransportStatus::Connected);
    first.await.unwrap();
    second.await.unwrap();

    let info = ctx.manager.session_info("orders-42").unwrap();
    assert_eq!(info.listener_count, 2);
    assert_eq!(info.ref_count, 2);
    assert_eq!(ctx.transport.open_count("orders-42"), 1);

    // only matching rows reach the listeners
    ctx.transport
        .publish(ChangeEvent::update("orders", json!({ "customer_id": 7 }), None));
    ctx.transport
        .publish(ChangeEvent::update("orders", json!({ "customer_id": 42 }), None));
    settle().await;
    assert_eq!(cb1.calls(), 1);
    assert_eq!(cb2.calls(), 1);

    ctx.manager.unsubscribe("orders-42", &cb1.listener);
    assert_eq!(ctx.ref_count("orders-42"), Some(1));
    sleep(Duration::from_secs(2)).await;
    assert!(ctx.manager.session_info("orders-42").is_some());

    ctx.manager.unsubscribe("orders-42", &cb2.listener);
    assert_eq!(ctx.ref_count("orders-42"), Some(0));
    sleep(Duration::from_secs(2)).await;

    assert_eq!(ctx.transport.close_count("orders-42"), 1);
    assert!(!ctx
        .manager
        .stats()
        .session_names
        .contains(&"orders-42".to_string()));
}

#[tokio::test(start_paused = true)]
async fn mismatched_key_is_refused() {
    let ctx = TestContext::new();
    let owner = Tally::new();
    let intruder = Tally::new();

    ctx.manager
        .subscribe(
            FeedKey::new("orders-42", "orders").with_filter("customer_id=eq.42"),
            owner.listener.clone(),
        )
        .await
        .unwrap();

    let err = ctx
        .manager
        .subscribe(
            FeedKey::new("orders-42", "orders").with_filter("customer_id=eq.7"),
            intruder.listener.clone(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SubscriptionError::KeyMismatch { .. }));
    assert_eq!(err.feed(), "orders-42");

    let info = ctx.manager.session_info("orders-42").unwrap();
    assert_eq!(info.ref_count, 1);
    assert_eq!(info.listener_count, 1);
    assert_eq!(ctx.transport.open_count("orders-42"), 1);
}

#[tokio::test(start_paused = true)]
async fn network_restore_reopens_every_feed() {
    let ctx = TestContext::new();
    let hub = SignalHub::new();
    let _listener = ctx.manager.listen_for_signals(&hub);
    let orders = Tally::new();
    let wallets = Tally::new();

    ctx.manager
        .subscribe(orders_key("orders"), orders.listener.clone())
        .await
        .unwrap();
    ctx.manager
        .subscribe(FeedKey::new("wallets", "wallets"), wallets.listener.clone())
        .await
        .unwrap();

    ctx.transport.signal("orders", TransportStatus::Closed);
    settle().await;
    assert_eq!(ctx.state("orders"), Some(SessionState::Failed));

    hub.emit(ProcessSignal::NetworkOffline);
    hub.emit(ProcessSignal::NetworkOnline);
    settle().await;

    for name in ["orders", "wallets"] {
        assert_eq!(ctx.state(name), Some(SessionState::Connected));
        assert_eq!(ctx.transport.open_count(name), 2);
        assert_eq!(ctx.transport.close_count(name), 1);
    }
    assert_eq!(orders.calls(), 1);
    assert_eq!(wallets.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnect_keeps_failed_session() {
    let ctx = TestContext::new();
    let tally = Tally::new();

    ctx.manager
        .subscribe(orders_key("orders"), tally.listener.clone())
        .await
        .unwrap();

    ctx.transport.plan(
        "orders",
        [
            OpenBehavior::Fail("down".into()),
            OpenBehavior::Fail("down".into()),
            OpenBehavior::Fail("down".into()),
        ],
    );
    ctx.manager.reconnect_all().await;

    assert_eq!(ctx.state("orders"), Some(SessionState::Failed));
    assert_eq!(ctx.ref_count("orders"), Some(1));
    assert_eq!(tally.calls(), 0);

    ctx.manager.reconnect_all().await;
    assert_eq!(ctx.state("orders"), Some(SessionState::Connected));
    assert_eq!(tally.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn visibility_refreshes_without_reopening() {
    let ctx = TestContext::new();
    let hub = SignalHub::new();
    let _listener = ctx.manager.listen_for_signals(&hub);
    let tally = Tally::new();

    ctx.manager
        .subscribe(orders_key("orders"), tally.listener.clone())
        .await
        .unwrap();

    hub.emit(ProcessSignal::Hidden);
    hub.emit(ProcessSignal::Visible);
    settle().await;

    assert_eq!(tally.calls(), 1);
    assert_eq!(ctx.transport.total_opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn orphaned_subscription_is_closed_before_open() {
    let ctx = TestContext::new();
    ctx.transport.inject_orphan(orders_key("orders"));
    let tally = Tally::new();
    let started = Instant::now();

    ctx.manager
        .subscribe(orders_key("orders"), tally.listener.clone())
        .await
        .unwrap();

    assert_eq!(ctx.transport.close_count("orders"), 1);
    assert_eq!(ctx.transport.open_count("orders"), 1);
    let opened = ctx.transport.open_times("orders")[0];
    assert!(opened - started >= Duration::from_millis(100));
    assert_eq!(ctx.state("orders"), Some(SessionState::Connected));
}

#[tokio::test(start_paused = true)]
async fn double_mount_opens_once() {
    let ctx = TestContext::new();
    let mut sub = FeedSubscription::new(ctx.manager.clone());

    sub.activate(orders_key("orders"), || {});
    sub.deactivate();
    sub.activate(orders_key("orders"), || {});

    sleep(Duration::from_secs(3)).await;

    assert_eq!(ctx.transport.open_count("orders"), 1);
    assert_eq!(ctx.ref_count("orders"), Some(1));
    assert_eq!(ctx.state("orders"), Some(SessionState::Connected));
}

#[tokio::test(start_paused = true)]
async fn cleanup_waits_for_pending_connect() {
    let ctx = TestContext::with_transport(MemoryTransport::with_default(OpenBehavior::Hang));
    let tally = Tally::new();

    let pending = ctx
        .manager
        .subscribe(orders_key("orders"), tally.listener.clone());
    ctx.manager.unsubscribe("orders", &tally.listener);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(ctx.state("orders"), Some(SessionState::Connecting));

    ctx.transport.signal("orders", TransportStatus::Connected);
    pending.await.unwrap();

    sleep(Duration::from_secs(2)).await;
    assert!(ctx.manager.session_info("orders").is_none());
    assert!(!ctx.transport.is_open("orders"));
}
