//! Randomized consumer churn against the in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use livefeed_client::{
    FeedStatus, FeedSubscription, ManagerConfig, ManagerStats, MemoryTransport, OpenBehavior,
    ProcessSignal, RealtimeManager, SignalHub,
};
use livefeed_proto::{ChangeEvent, FeedKey};

/// Options for the `simulate` command.
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of consumers churning.
    #[arg(long, default_value_t = 8)]
    pub consumers: usize,

    /// Number of distinct feeds consumers pick from.
    #[arg(long, default_value_t = 4)]
    pub feeds: usize,

    /// Number of churn rounds.
    #[arg(long, default_value_t = 20)]
    pub rounds: usize,

    /// Pause between rounds in milliseconds.
    #[arg(long, default_value_t = 50)]
    pub tick_ms: u64,

    /// Probability that a new feed gets injected connect failures.
    #[arg(long, default_value_t = 0.2)]
    pub failure_rate: f64,

    /// Probability per round of a network-restore signal.
    #[arg(long, default_value_t = 0.05)]
    pub restore_rate: f64,

    /// Change events published per round.
    #[arg(long, default_value_t = 3)]
    pub events_per_round: usize,

    /// Seed for reproducible runs.
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Default for SimulateArgs {
    fn default() -> Self {
        Self {
            consumers: 8,
            feeds: 4,
            rounds: 20,
            tick_ms: 50,
            failure_rate: 0.2,
            restore_rate: 0.05,
            events_per_round: 3,
            seed: None,
        }
    }
}

/// Counters collected over a simulation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationReport {
    pub rounds: usize,
    pub activations: usize,
    pub deactivations: usize,
    pub injected_failures: usize,
    pub failed_subscriptions: usize,
    pub events_published: usize,
    pub notifications: usize,
    pub network_restores: usize,
    pub transport_opens: usize,
    pub peak_sessions: usize,
    /// Manager state after every consumer left and cleanup settled.
    pub final_stats: ManagerStats,
    pub elapsed_ms: u64,
}

fn feed_key(index: usize) -> FeedKey {
    FeedKey::new(format!("orders-{index}"), "orders").with_filter(format!("customer_id=eq.{index}"))
}

pub async fn run(
    config: ManagerConfig,
    args: SimulateArgs,
) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    if args.feeds == 0 {
        return Err("at least one feed is required".into());
    }

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let failure_rate = args.failure_rate.clamp(0.0, 1.0);
    let restore_rate = args.restore_rate.clamp(0.0, 1.0);
    let tick = Duration::from_millis(args.tick_ms);

    let drain_limit = config.grace_delay
        + (config.connect_timeout + config.backoff(config.max_attempts)) * config.max_attempts
        + tick;
    let max_attempts = config.max_attempts.max(1);

    let transport = Arc::new(MemoryTransport::new());
    let manager = RealtimeManager::new(transport.clone(), config);
    let hub = SignalHub::new();
    let signal_task = manager.listen_for_signals(&hub);

    let notifications = Arc::new(AtomicUsize::new(0));
    let mut consumers: Vec<FeedSubscription<MemoryTransport>> = (0..args.consumers)
        .map(|_| FeedSubscription::new(manager.clone()))
        .collect();

    let started = Instant::now();
    let mut report = SimulationReport {
        rounds: args.rounds,
        ..Default::default()
    };

    info!(
        consumers = args.consumers,
        feeds = args.feeds,
        rounds = args.rounds,
        "starting simulation"
    );

    for round in 0..args.rounds {
        for consumer in consumers.iter_mut() {
            if !rng.gen_bool(0.3) {
                continue;
            }

            if consumer.is_active() {
                consumer.deactivate();
                report.deactivations += 1;
                continue;
            }

            let key = feed_key(rng.gen_range(0..args.feeds));
            if manager.session_info(&key.name).is_none() && rng.gen_bool(failure_rate) {
                let failures = rng.gen_range(1..=max_attempts);
                transport.plan(
                    &key.name,
                    (0..failures).map(|_| OpenBehavior::Fail("injected failure".into())),
                );
                report.injected_failures += 1;
                debug!(feed = %key.name, failures, "injecting connect failures");
            }

            let counter = Arc::clone(&notifications);
            consumer.activate(key, move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
            report.activations += 1;
        }

        for _ in 0..args.events_per_round {
            let customer = rng.gen_range(0..args.feeds);
            transport.publish(ChangeEvent::insert(
                "orders",
                json!({ "customer_id": customer, "round": round }),
            ));
            report.events_published += 1;
        }

        if rng.gen_bool(restore_rate) {
            hub.emit(ProcessSignal::NetworkOnline);
            report.network_restores += 1;
        }

        report.peak_sessions = report.peak_sessions.max(manager.stats().session_count);
        sleep(tick).await;
    }

    report.failed_subscriptions = consumers
        .iter()
        .filter(|c| matches!(c.status(), FeedStatus::Failed(_)))
        .count();

    drop(consumers);

    let deadline = Instant::now() + drain_limit;
    while manager.stats().session_count > 0 && Instant::now() < deadline {
        sleep(tick.max(Duration::from_millis(10))).await;
    }

    report.final_stats = manager.stats();
    report.notifications = notifications.load(Ordering::Relaxed);
    report.transport_opens = transport.total_opens();
    report.elapsed_ms = started.elapsed().as_millis() as u64;

    manager.shutdown().await;
    signal_task.abort();

    info!(
        opens = report.transport_opens,
        notifications = report.notifications,
        leftover = report.final_stats.session_count,
        "simulation finished"
    );

    Ok(report)
}
