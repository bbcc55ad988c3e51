//! Channel session manager.
//!
//! One [`RealtimeManager`] owns every live feed in the process. Consumers that
//! name the same feed share one transport subscription; the manager counts
//! their registrations, retries failed connects with exponential backoff,
//! fans each change out to every listener, and closes a feed once it has
//! been unused for the configured grace delay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, trace, warn};

use livefeed_proto::{FeedKey, FeedSignal, TransportStatus};

use crate::config::ManagerConfig;
use crate::error::{ConnectError, SubscriptionError};
use crate::listener::{notify_all, Listener};
use crate::session::{ConnectFuture, FeedSession, ManagerStats, SessionInfo, SessionState};
use crate::signals::{ProcessSignal, SignalHub};
use crate::transport::{feed_channel, FeedSource, Transport};

/// Future returned by [`RealtimeManager::subscribe`].
///
/// Resolves once the feed is connected, or with the error that ended the
/// connect procedure. Dropping it does not cancel anything.
pub type SubscribeFuture = BoxFuture<'static, Result<(), SubscriptionError>>;

/// A listener registration accepted by [`RealtimeManager::register`].
pub struct Registration {
    /// Generation of the session the listener joined.
    pub generation: u64,
    /// Connect outcome of that session.
    pub connect: SubscribeFuture,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

enum ConnectMode<H> {
    /// First connect for a new session; orphaned subscriptions are cleared.
    Fresh,
    /// Repair of an existing session; carries the handle to release first.
    Reconnect(Option<H>),
}

/// Process-wide owner of live feed sessions.
///
/// Construct one per process with [`new`](Self::new) and hand the `Arc` to
/// every consumer. All methods that can spawn work must be called from
/// within a tokio runtime.
pub struct RealtimeManager<T: Transport> {
    transport: Arc<T>,
    config: ManagerConfig,
    sessions: Mutex<HashMap<String, FeedSession<T::Handle>>>,
    next_generation: AtomicU64,
}

impl<T: Transport> RealtimeManager<T> {
    /// Create a manager on top of a transport.
    pub fn new(transport: Arc<T>, config: ManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            transport,
            config,
            sessions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        })
    }

    /// The transport this manager opens subscriptions on.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Register `listener` for the feed named by `key`.
    ///
    /// The listener is registered and the reference count incremented before
    /// this method returns, whether or not the feed is connected yet. The
    /// returned future only reports how connecting went. Concurrent callers
    /// for a feed that is still connecting share the same attempt.
    ///
    /// A key whose name is already open for a different table, filter or
    /// event type resolves to [`SubscriptionError::KeyMismatch`] and is not
    /// registered.
    pub fn subscribe(self: &Arc<Self>, key: FeedKey, listener: Listener) -> SubscribeFuture {
        match self.register(key, listener) {
            Ok(registration) => registration.connect,
            Err(e) => future::ready(Err(e)).boxed(),
        }
    }

    /// Like [`subscribe`](Self::subscribe), but reports a refused
    /// registration synchronously. On `Ok` the listener is registered with
    /// the returned session generation and should be released with
    /// [`unregister`](Self::unregister).
    pub fn register(
        self: &Arc<Self>,
        key: FeedKey,
        listener: Listener,
    ) -> Result<Registration, SubscriptionError> {
        let mut sessions = self.sessions.lock();

        if let Some(session) = sessions.get_mut(&key.name) {
            if !session.key.same_source(&key) {
                let err = SubscriptionError::KeyMismatch {
                    feed: key.name.clone(),
                    existing: session.key.describe_source(),
                    requested: key.describe_source(),
                };
                warn!(feed = %key.name, error = %err, "refusing subscription");
                return Err(err);
            }

            session.listeners.insert(listener);
            session.ref_count += 1;
            debug!(
                feed = %key.name,
                ref_count = session.ref_count,
                state = ?session.state,
                "joined existing feed"
            );

            let connect = if let Some(pending) = &session.pending {
                pending.clone().boxed()
            } else if session.state == SessionState::Connected {
                future::ready(Ok(())).boxed()
            } else {
                self.start_reconnect(session).boxed()
            };
            return Ok(Registration {
                generation: session.generation,
                connect,
            });
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut session = FeedSession::new(key.clone(), generation);
        session.listeners.insert(listener);
        session.ref_count = 1;

        let pending = self.spawn_connect(key.clone(), generation, ConnectMode::Fresh);
        session.pending = Some(pending.clone());
        sessions.insert(key.name.clone(), session);

        debug!(
            feed = %key.name,
            generation,
            source = %key.describe_source(),
            "feed session created"
        );

        Ok(Registration {
            generation,
            connect: pending.boxed(),
        })
    }

    /// Remove `listener` from a feed and release one registration.
    ///
    /// When the count reaches zero the feed is closed after the grace delay,
    /// unless it is registered again in the meantime. Unknown names are
    /// ignored.
    pub fn unsubscribe(self: &Arc<Self>, name: &str, listener: &Listener) {
        self.detach(name, None, listener);
    }

    /// Release a registration made with [`register`](Self::register).
    ///
    /// Only the session generation the listener joined is touched. If that
    /// session was removed and the name now belongs to a newer session, the
    /// call is ignored.
    pub fn unregister(self: &Arc<Self>, name: &str, generation: u64, listener: &Listener) {
        self.detach(name, Some(generation), listener);
    }

    fn detach(self: &Arc<Self>, name: &str, generation: Option<u64>, listener: &Listener) {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(name) else {
            debug!(feed = name, "unsubscribe for unknown feed ignored");
            return;
        };
        if generation.is_some_and(|g| g != session.generation) {
            debug!(
                feed = name,
                stale = generation,
                current = session.generation,
                "release for a replaced feed session ignored"
            );
            return;
        }

        session.listeners.remove(listener);
        if session.ref_count == 0 {
            debug!(feed = name, "unsubscribe on idle feed ignored");
            return;
        }
        session.ref_count -= 1;
        debug!(feed = name, ref_count = session.ref_count, "listener removed");

        if session.ref_count == 0 {
            session.idle_epoch += 1;
            self.schedule_cleanup(name.to_string(), session.generation, session.idle_epoch);
        }
    }

    /// Reopen every feed and notify its listeners once it is back.
    ///
    /// Used when connectivity returns. Feeds that are still connecting keep
    /// their current attempt.
    pub async fn reconnect_all(self: &Arc<Self>) {
        let pending: Vec<(String, ConnectFuture)> = {
            let mut sessions = self.sessions.lock();
            sessions
                .iter_mut()
                .map(|(name, session)| (name.clone(), self.start_reconnect(session)))
                .collect()
        };

        if pending.is_empty() {
            return;
        }
        info!(feeds = pending.len(), "reconnecting all feeds");

        let outcomes = future::join_all(
            pending
                .into_iter()
                .map(|(name, connect)| async move { (name, connect.await) }),
        )
        .await;

        for (name, outcome) in outcomes {
            if let Err(e) = outcome {
                warn!(feed = %name, error = %e, "feed did not recover");
            }
        }
    }

    /// Notify the listeners of every connected feed once, without
    /// reconnecting. Returns the number of feeds refreshed.
    pub fn refresh_all(&self) -> usize {
        let targets: Vec<(String, Vec<Listener>)> = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .filter(|(_, session)| session.state == SessionState::Connected)
                .map(|(name, session)| (name.clone(), session.listener_list()))
                .collect()
        };

        for (name, listeners) in &targets {
            notify_all(name, listeners);
        }
        targets.len()
    }

    /// React to a process-wide signal.
    pub async fn handle_signal(self: &Arc<Self>, signal: ProcessSignal) {
        match signal {
            ProcessSignal::NetworkOnline => {
                info!("network restored");
                self.reconnect_all().await;
            }
            ProcessSignal::NetworkOffline => {
                warn!("network lost; feeds reconnect when it returns");
            }
            ProcessSignal::Visible => {
                let refreshed = self.refresh_all();
                debug!(refreshed, "page visible, feeds refreshed");
            }
            ProcessSignal::Hidden => {
                debug!("page hidden");
            }
        }
    }

    /// Follow a signal hub for the rest of the process lifetime.
    ///
    /// The listener task stops when the hub is dropped or the manager is.
    pub fn listen_for_signals(self: &Arc<Self>, hub: &SignalHub) -> JoinHandle<()> {
        let mut signals = hub.subscribe();
        let manager = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let signal = match signals.recv().await {
                    Ok(signal) => signal,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "process signals lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.handle_signal(signal).await;
            }
            debug!("process signal listener stopped");
        })
    }

    /// Close every feed now, skipping the grace delay.
    pub async fn shutdown(&self) {
        let drained: Vec<FeedSession<T::Handle>> = {
            let mut sessions = self.sessions.lock();
            sessions.drain().map(|(_, session)| session).collect()
        };

        info!(feeds = drained.len(), "shutting down feed manager");
        for session in drained {
            self.close_session(session).await;
        }
    }

    /// Number and names of live sessions.
    pub fn stats(&self) -> ManagerStats {
        let mut names: Vec<String> = self.sessions.lock().keys().cloned().collect();
        names.sort();
        ManagerStats {
            session_count: names.len(),
            session_names: names,
        }
    }

    /// Snapshot of one session.
    pub fn session_info(&self, name: &str) -> Option<SessionInfo> {
        self.sessions.lock().get(name).map(FeedSession::info)
    }

    /// Snapshots of every session, sorted by name.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> =
            self.sessions.lock().values().map(FeedSession::info).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    fn start_reconnect(self: &Arc<Self>, session: &mut FeedSession<T::Handle>) -> ConnectFuture {
        if let Some(pending) = &session.pending {
            return pending.clone();
        }
        if let Some(pump) = session.pump.take() {
            pump.abort();
        }

        session.state = SessionState::Closing;
        let old = session.handle.take();
        let pending = self.spawn_connect(
            session.key.clone(),
            session.generation,
            ConnectMode::Reconnect(old),
        );
        session.pending = Some(pending.clone());
        pending
    }

    fn spawn_connect(
        self: &Arc<Self>,
        key: FeedKey,
        generation: u64,
        mode: ConnectMode<T::Handle>,
    ) -> ConnectFuture {
        let feed = key.name.clone();
        let task = tokio::spawn(Arc::clone(self).run_connect(key, generation, mode));

        async move {
            task.await.unwrap_or_else(|e| {
                error!(feed = %feed, error = %e, "connect task ended abnormally");
                Err(SubscriptionError::Aborted { feed })
            })
        }
        .boxed()
        .shared()
    }

    async fn run_connect(
        self: Arc<Self>,
        key: FeedKey,
        generation: u64,
        mode: ConnectMode<T::Handle>,
    ) -> Result<(), SubscriptionError> {
        let reconnect = matches!(mode, ConnectMode::Reconnect(_));

        match mode {
            ConnectMode::Fresh => {
                if let Some(stale) = self.transport.find_existing(&key.name).await {
                    warn!(feed = %key.name, "closing orphaned subscription before opening");
                    self.release(&key.name, stale).await;
                    sleep(self.config.stale_settle_delay).await;
                }
            }
            ConnectMode::Reconnect(old) => {
                if let Some(old) = old {
                    self.release(&key.name, old).await;
                }
                self.set_state(&key.name, generation, SessionState::Connecting);
            }
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = ConnectError::Closed;

        for attempt in 1..=max_attempts {
            if !self.is_current(&key.name, generation) {
                debug!(feed = %key.name, generation, "session gone, abandoning connect");
                return Err(SubscriptionError::Aborted { feed: key.name });
            }

            match self.attempt(&key).await {
                Ok((handle, source)) => {
                    return self
                        .finish_connect(&key, generation, handle, source, reconnect)
                        .await;
                }
                Err(e) => {
                    warn!(
                        feed = %key.name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "connect attempt failed"
                    );
                    last_error = e;
                    if attempt < max_attempts {
                        sleep(self.config.backoff(attempt)).await;
                    }
                }
            }
        }

        let err = SubscriptionError::Exhausted {
            feed: key.name.clone(),
            attempts: max_attempts,
            last: last_error,
        };
        error!(feed = %key.name, error = %err, "giving up on feed");
        self.abandon(&key.name, generation, reconnect).await;
        Err(err)
    }

    /// One bounded connect attempt. Partial state is released on failure.
    async fn attempt(&self, key: &FeedKey) -> Result<(T::Handle, FeedSource), ConnectError> {
        let limit = self.config.connect_timeout;
        let deadline = Instant::now() + limit;
        let (sink, mut source) = feed_channel();

        let handle = timeout_at(deadline, self.transport.open(key, sink))
            .await
            .map_err(|_| ConnectError::Deadline(limit))??;

        match timeout_at(deadline, await_confirmation(&key.name, &mut source)).await {
            Ok(Ok(())) => Ok((handle, source)),
            Ok(Err(e)) => {
                self.release(&key.name, handle).await;
                Err(e)
            }
            Err(_) => {
                self.release(&key.name, handle).await;
                Err(ConnectError::Deadline(limit))
            }
        }
    }

    async fn finish_connect(
        self: &Arc<Self>,
        key: &FeedKey,
        generation: u64,
        handle: T::Handle,
        source: FeedSource,
        refresh: bool,
    ) -> Result<(), SubscriptionError> {
        let installed = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(&key.name) {
                Some(session) if session.generation == generation => {
                    session.handle = Some(handle);
                    session.state = SessionState::Connected;
                    session.pending = None;
                    session.pump = Some(tokio::spawn(Self::pump(
                        Arc::downgrade(self),
                        key.name.clone(),
                        generation,
                        source,
                    )));

                    let listeners = if refresh {
                        session.listener_list()
                    } else {
                        Vec::new()
                    };
                    let idle_epoch = (session.ref_count == 0).then_some(session.idle_epoch);
                    Ok((listeners, idle_epoch))
                }
                _ => Err(handle),
            }
        };

        match installed {
            Ok((listeners, idle_epoch)) => {
                info!(feed = %key.name, generation, "feed connected");
                if let Some(epoch) = idle_epoch {
                    self.schedule_cleanup(key.name.clone(), generation, epoch);
                }
                notify_all(&key.name, &listeners);
                Ok(())
            }
            Err(handle) => {
                debug!(feed = %key.name, generation, "session removed while connecting");
                self.release(&key.name, handle).await;
                Err(SubscriptionError::Aborted {
                    feed: key.name.clone(),
                })
            }
        }
    }

    /// Drain transport signals for a connected session.
    async fn pump(manager: Weak<Self>, name: String, generation: u64, mut source: FeedSource) {
        while let Some(signal) = source.recv().await {
            let Some(manager) = manager.upgrade() else {
                break;
            };
            match signal {
                FeedSignal::Change(event) => {
                    let Some(listeners) = manager.dispatch_targets(&name, generation) else {
                        break;
                    };
                    trace!(
                        feed = %name,
                        table = %event.table,
                        kind = ?event.kind,
                        listeners = listeners.len(),
                        "dispatching change"
                    );
                    notify_all(&name, &listeners);
                }
                FeedSignal::Status(status) => manager.on_status(&name, generation, status),
            }
        }
        debug!(feed = %name, generation, "feed signal stream ended");
    }

    /// Listeners to notify for a change, or `None` if the session is gone.
    fn dispatch_targets(&self, name: &str, generation: u64) -> Option<Vec<Listener>> {
        let sessions = self.sessions.lock();
        let session = sessions.get(name).filter(|s| s.generation == generation)?;
        if session.state == SessionState::Connected {
            Some(session.listener_list())
        } else {
            Some(Vec::new())
        }
    }

    fn on_status(&self, name: &str, generation: u64, status: TransportStatus) {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(name).filter(|s| s.generation == generation) else {
            return;
        };

        match status {
            TransportStatus::Connected if session.state == SessionState::Failed => {
                session.state = SessionState::Connected;
                info!(feed = name, "feed recovered");
            }
            status if status.is_failure() && session.state == SessionState::Connected => {
                session.state = SessionState::Failed;
                warn!(feed = name, status = ?status, "feed failed after connecting");
            }
            _ => {}
        }
    }

    /// Give up on a session after its connect procedure was exhausted.
    async fn abandon(self: &Arc<Self>, name: &str, generation: u64, reconnect: bool) {
        let removed = {
            let mut sessions = self.sessions.lock();
            let current = sessions
                .get(name)
                .is_some_and(|s| s.generation == generation);

            if !current {
                None
            } else if reconnect {
                if let Some(session) = sessions.get_mut(name) {
                    session.state = SessionState::Failed;
                    session.pending = None;
                    if session.ref_count == 0 {
                        self.schedule_cleanup(name.to_string(), generation, session.idle_epoch);
                    }
                }
                None
            } else {
                sessions.remove(name)
            }
        };

        if let Some(session) = removed {
            self.close_session(session).await;
        }
    }

    fn schedule_cleanup(self: &Arc<Self>, name: String, generation: u64, epoch: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(feed = %name, "no async runtime, feed cleanup skipped");
            return;
        };

        let manager = Arc::clone(self);
        let delay = self.config.grace_delay;
        runtime.spawn(async move {
            sleep(delay).await;
            manager.cleanup_if_idle(&name, generation, epoch).await;
        });
    }

    async fn cleanup_if_idle(&self, name: &str, generation: u64, epoch: u64) {
        let removed = {
            let mut sessions = self.sessions.lock();
            let idle = match sessions.get(name) {
                Some(s) if s.generation != generation || s.idle_epoch != epoch || s.ref_count > 0 => {
                    debug!(feed = name, "cleanup skipped, feed in use again");
                    false
                }
                Some(s) if s.pending.is_some() => {
                    debug!(feed = name, "cleanup deferred until connect settles");
                    false
                }
                Some(_) => true,
                None => false,
            };
            if idle {
                sessions.remove(name)
            } else {
                None
            }
        };

        if let Some(session) = removed {
            self.close_session(session).await;
        }
    }

    async fn close_session(&self, mut session: FeedSession<T::Handle>) {
        if let Some(pump) = session.pump.take() {
            pump.abort();
        }
        if let Some(handle) = session.handle.take() {
            self.release(&session.key.name, handle).await;
        }
        debug!(
            feed = %session.key.name,
            generation = session.generation,
            "feed session closed"
        );
    }

    /// Close a transport handle; failures are logged and otherwise ignored.
    async fn release(&self, name: &str, handle: T::Handle) {
        if let Err(e) = self.transport.close(handle).await {
            error!(feed = name, error = %e, "failed to close subscription");
        }
    }

    fn is_current(&self, name: &str, generation: u64) -> bool {
        self.sessions
            .lock()
            .get(name)
            .is_some_and(|s| s.generation == generation)
    }

    fn set_state(&self, name: &str, generation: u64, state: SessionState) {
        if let Some(session) = self
            .sessions
            .lock()
            .get_mut(name)
            .filter(|s| s.generation == generation)
        {
            session.state = state;
        }
    }
}

impl<T: Transport> std::fmt::Debug for RealtimeManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeManager")
            .field("sessions", &self.sessions.lock().len())
            .field("config", &self.config)
            .finish()
    }
}

/// Wait for the transport to confirm a new subscription.
///
/// Changes that arrive before confirmation are dropped.
async fn await_confirmation(feed: &str, source: &mut FeedSource) -> Result<(), ConnectError> {
    while let Some(signal) = source.recv().await {
        match signal {
            FeedSignal::Status(TransportStatus::Connected) => return Ok(()),
            FeedSignal::Status(TransportStatus::Connecting) => {}
            FeedSignal::Status(TransportStatus::Error(message)) => {
                return Err(ConnectError::Transport(message))
            }
            FeedSignal::Status(TransportStatus::TimedOut) => return Err(ConnectError::TimedOut),
            FeedSignal::Status(TransportStatus::Closed) => return Err(ConnectError::Closed),
            FeedSignal::Change(_) => trace!(feed, "dropping change received before confirmation"),
        }
    }
    Err(ConnectError::Closed)
}
