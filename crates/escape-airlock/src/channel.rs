// ABOUTME: The Airlock channel client: pokes, subscriptions, scries, threads, and reset
// ABOUTME: Owns channel state behind one mutex; the stream consumer shares it through Arc<Inner>

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::command::{encode_batch, Command};
use crate::config::AirlockConfig;
use crate::error::AirlockError;
use crate::identity::{scry_url, thread_url, ChannelIdentity};
use crate::registry::{
    PendingSubscription, PokeRegistry, SubscriptionEvent, SubscriptionHandler,
    SubscriptionRegistry,
};
use crate::status::{ChannelObserver, ConnectionStatus};
use crate::stream::{self, StreamPhase};
use crate::transport::{HttpTransport, Transport};

/// App, mark and message of the poke that makes the ship create the channel.
const BOOTSTRAP_APP: &str = "hood";
const BOOTSTRAP_MARK: &str = "helm-hi";
const BOOTSTRAP_MESSAGE: &str = "Opening API channel";

/// Mutable state of one channel generation.
pub(crate) struct ChannelState {
    pub(crate) identity: ChannelIdentity,
    pub(crate) generation: u64,
    pub(crate) last_event_id: u64,
    pub(crate) last_acknowledged_event_id: u64,
    pub(crate) phase: StreamPhase,
    pub(crate) error_count: u32,
    pub(crate) cancel: CancellationToken,
    pub(crate) pokes: PokeRegistry,
    pub(crate) subscriptions: SubscriptionRegistry,
}

impl ChannelState {
    fn new(base_url: &str, generation: u64) -> Self {
        Self {
            identity: ChannelIdentity::generate(base_url),
            generation,
            last_event_id: 0,
            last_acknowledged_event_id: 0,
            phase: StreamPhase::Closed,
            error_count: 0,
            cancel: CancellationToken::new(),
            pokes: PokeRegistry::default(),
            subscriptions: SubscriptionRegistry::default(),
        }
    }

    /// Allocate the next outbound id (the first is 1).
    pub(crate) fn next_id(&mut self) -> u64 {
        self.last_event_id += 1;
        self.last_event_id
    }

    /// Record an inbound event id. Returns the ack to send when the
    /// unacknowledged backlog exceeds `threshold`.
    pub(crate) fn observe_event(&mut self, id: u64, threshold: u64) -> Option<Command> {
        // Ids only move forward so outbound ids are never reused
        self.last_event_id = self.last_event_id.max(id);
        if self.last_event_id - self.last_acknowledged_event_id > threshold {
            self.last_acknowledged_event_id = self.last_event_id;
            return Some(Command::Ack {
                event_id: self.last_event_id,
            });
        }
        None
    }

    pub(crate) fn ticket(&self) -> Ticket {
        Ticket {
            url: self.identity.channel_url(),
            cancel: self.cancel.clone(),
            generation: self.generation,
        }
    }
}

/// Where and under which generation a write goes.
#[derive(Debug, Clone)]
pub(crate) struct Ticket {
    pub(crate) url: String,
    pub(crate) cancel: CancellationToken,
    pub(crate) generation: u64,
}

pub(crate) struct Inner {
    pub(crate) config: AirlockConfig,
    pub(crate) transport: Arc<dyn Transport>,
    observer: RwLock<Option<Arc<dyn ChannelObserver>>>,
    state: Mutex<ChannelState>,
    phase_tx: watch::Sender<StreamPhase>,
}

impl Inner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn observer(&self) -> Option<Arc<dyn ChannelObserver>> {
        self.observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Move to `phase`, publishing it to watchers. Call with the state locked.
    pub(crate) fn set_phase(&self, state: &mut ChannelState, phase: StreamPhase) {
        state.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    pub(crate) fn notify_status(&self, status: ConnectionStatus) {
        if let Some(observer) = self.observer() {
            observer.on_status(status);
        }
    }

    /// PUT `commands` to the channel, racing the generation's cancellation.
    pub(crate) async fn write(
        &self,
        ticket: &Ticket,
        commands: &[Command],
    ) -> Result<(), AirlockError> {
        let body = encode_batch(commands)?;
        tracing::debug!(
            url = %ticket.url,
            actions = ?commands.iter().map(Command::action).collect::<Vec<_>>(),
            "writing to channel"
        );

        tokio::select! {
            _ = ticket.cancel.cancelled() => Err(AirlockError::Cancelled),
            result = self.transport.put_channel(&ticket.url, body) => result,
        }
    }

    fn forget_poke(&self, generation: u64, id: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.pokes.remove(id);
        }
    }

    fn forget_subscription(&self, generation: u64, id: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.subscriptions.remove(id);
        }
    }
}

/// Request to run a thread on the ship.
#[derive(Debug, Clone)]
pub struct ThreadRequest {
    /// Desk the thread lives on; falls back to the configured desk.
    pub desk: Option<String>,
    pub input_mark: String,
    pub output_mark: String,
    pub thread_name: String,
    pub body: Value,
}

impl ThreadRequest {
    pub fn new(
        input_mark: impl Into<String>,
        output_mark: impl Into<String>,
        thread_name: impl Into<String>,
        body: Value,
    ) -> Self {
        Self {
            desk: None,
            input_mark: input_mark.into(),
            output_mark: output_mark.into(),
            thread_name: thread_name.into(),
            body,
        }
    }

    pub fn with_desk(mut self, desk: impl Into<String>) -> Self {
        self.desk = Some(desk.into());
        self
    }
}

/// Client for one ship's channel.
///
/// Cheap to clone; clones share the channel. Pokes and subscriptions travel over
/// the channel and are correlated by id with frames from the event stream, which
/// opens lazily on the first write. Scries and threads are plain requests.
#[derive(Clone)]
pub struct Airlock {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Airlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Airlock")
            .field("channel", &state.identity.id())
            .field("ship", &self.inner.config.ship)
            .field("phase", &state.phase)
            .field("last_event_id", &state.last_event_id)
            .finish_non_exhaustive()
    }
}

impl Airlock {
    /// Create a client that talks HTTP to the ship in `config`.
    pub fn new(config: AirlockConfig) -> Result<Self, AirlockError> {
        let transport = HttpTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client over a custom transport.
    pub fn with_transport(
        config: AirlockConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, AirlockError> {
        config.validate()?;
        let state = ChannelState::new(&config.base_url, 0);
        let (phase_tx, _) = watch::channel(StreamPhase::Closed);

        tracing::debug!(channel = %state.identity.id(), ship = %config.ship, "channel created");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                observer: RwLock::new(None),
                state: Mutex::new(state),
                phase_tx,
            }),
        })
    }

    /// Set the observer for stream lifecycle events.
    pub fn set_observer(&self, observer: Arc<dyn ChannelObserver>) {
        *self
            .inner
            .observer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn config(&self) -> &AirlockConfig {
        &self.inner.config
    }

    pub fn ship(&self) -> &str {
        &self.inner.config.ship
    }

    pub fn channel_id(&self) -> String {
        self.inner.lock().identity.id().to_string()
    }

    pub fn channel_url(&self) -> String {
        self.inner.lock().identity.channel_url()
    }

    pub fn last_event_id(&self) -> u64 {
        self.inner.lock().last_event_id
    }

    pub fn last_acknowledged_event_id(&self) -> u64 {
        self.inner.lock().last_acknowledged_event_id
    }

    pub fn error_count(&self) -> u32 {
        self.inner.lock().error_count
    }

    pub fn phase(&self) -> StreamPhase {
        self.inner.lock().phase
    }

    pub fn status(&self) -> ConnectionStatus {
        self.phase().into()
    }

    /// Receiver that sees every phase change.
    pub fn watch_phase(&self) -> watch::Receiver<StreamPhase> {
        self.inner.phase_tx.subscribe()
    }

    pub fn pending_pokes(&self) -> usize {
        self.inner.lock().pokes.len()
    }

    /// Ids of the subscriptions still registered.
    pub fn active_subscriptions(&self) -> Vec<u64> {
        self.inner.lock().subscriptions.ids()
    }

    // =========================================================================
    // Allocation & writes
    // =========================================================================

    /// Allocate the next outbound id.
    pub fn next_id(&self) -> u64 {
        self.inner.lock().next_id()
    }

    /// Write `commands` to the channel in one request, then make sure the
    /// event stream is open.
    pub async fn send(&self, commands: &[Command]) -> Result<(), AirlockError> {
        let ticket = self.inner.lock().ticket();
        self.send_with(&ticket, commands).await
    }

    async fn send_with(&self, ticket: &Ticket, commands: &[Command]) -> Result<(), AirlockError> {
        self.inner.write(ticket, commands).await?;

        let phase = {
            let state = self.inner.lock();
            if state.generation != ticket.generation {
                return Err(AirlockError::ChannelReset);
            }
            state.phase
        };
        match phase {
            StreamPhase::Closed => self.ensure_open().await,
            StreamPhase::Fatal => Err(fatal_error()),
            _ => Ok(()),
        }
    }

    /// Open the event stream if it isn't already, and wait until it is
    /// connected.
    ///
    /// A ship only creates a channel once something is written to it, so a
    /// channel that has never been written gets a `hood` hello poke first.
    pub async fn ensure_open(&self) -> Result<(), AirlockError> {
        let mut phase_rx = self.inner.phase_tx.subscribe();

        let start = {
            let mut state = self.inner.lock();
            match state.phase {
                StreamPhase::Open => return Ok(()),
                StreamPhase::Fatal => return Err(fatal_error()),
                StreamPhase::Bootstrapping | StreamPhase::Erroring { .. } => None,
                StreamPhase::Closed => {
                    self.inner.set_phase(&mut state, StreamPhase::Bootstrapping);
                    let bootstrap = (state.last_event_id == 0).then(|| {
                        let id = state.next_id();
                        // The ack is consumed by the registry; nobody waits on it
                        let (done_tx, _) = oneshot::channel();
                        state.pokes.insert(id, done_tx);
                        Command::Poke {
                            id,
                            ship: self.inner.config.ship.clone(),
                            app: BOOTSTRAP_APP.to_string(),
                            mark: BOOTSTRAP_MARK.to_string(),
                            json: Value::String(BOOTSTRAP_MESSAGE.to_string()),
                        }
                    });
                    Some((bootstrap, state.ticket()))
                }
            }
        };

        if let Some((bootstrap, ticket)) = start {
            self.inner.notify_status(ConnectionStatus::Connecting);
            if let Some(poke) = bootstrap {
                tracing::debug!(channel = %ticket.url, "bootstrapping channel");
                if let Err(err) = self.inner.write(&ticket, &[poke]).await {
                    let mut state = self.inner.lock();
                    if state.generation == ticket.generation {
                        self.inner.set_phase(&mut state, StreamPhase::Closed);
                    }
                    return Err(err);
                }
            }
            tokio::spawn(stream::run(
                Arc::clone(&self.inner),
                ticket.generation,
                ticket.cancel.clone(),
            ));
        }

        let settled = phase_rx
            .wait_for(|phase| {
                matches!(
                    phase,
                    StreamPhase::Open | StreamPhase::Fatal | StreamPhase::Closed
                )
            })
            .await
            .map(|phase| *phase);

        match settled {
            Ok(StreamPhase::Open) => Ok(()),
            Ok(StreamPhase::Fatal) => Err(fatal_error()),
            _ => Err(AirlockError::ChannelReset),
        }
    }

    // =========================================================================
    // Pokes
    // =========================================================================

    /// Poke `app` on our own ship. Resolves with the poke's id once the ship acks it.
    pub async fn poke(&self, app: &str, mark: &str, json: Value) -> Result<u64, AirlockError> {
        let ship = self.inner.config.ship.clone();
        self.poke_ship(&ship, app, mark, json).await
    }

    /// Poke `app` on `ship`.
    ///
    /// Completes when the ack or err frame arrives, not when the write succeeds.
    pub async fn poke_ship(
        &self,
        ship: &str,
        app: &str,
        mark: &str,
        json: Value,
    ) -> Result<u64, AirlockError> {
        let (done_tx, done_rx) = oneshot::channel();
        let (id, command, ticket) = {
            let mut state = self.inner.lock();
            let id = state.next_id();
            state.pokes.insert(id, done_tx);
            let command = Command::Poke {
                id,
                ship: ship.trim_start_matches('~').to_string(),
                app: app.to_string(),
                mark: mark.to_string(),
                json,
            };
            (id, command, state.ticket())
        };

        if let Err(err) = self.send_with(&ticket, &[command]).await {
            self.inner.forget_poke(ticket.generation, id);
            return Err(err);
        }

        match done_rx.await {
            Ok(Ok(())) => Ok(id),
            Ok(Err(err)) => Err(AirlockError::Poke(err)),
            Err(_) => Err(AirlockError::ChannelReset),
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to `path` on `app` of our own ship.
    pub async fn subscribe<H>(&self, app: &str, path: &str, handler: H) -> Result<u64, AirlockError>
    where
        H: SubscriptionHandler + 'static,
    {
        let ship = self.inner.config.ship.clone();
        self.subscribe_ship(&ship, app, path, handler).await
    }

    /// Subscribe to `path` on `app` of `ship`.
    ///
    /// Returns the subscription id once the write succeeds. `handler` then sees
    /// every fact until [`unsubscribe`](Self::unsubscribe), a quit, or an err frame.
    pub async fn subscribe_ship<H>(
        &self,
        ship: &str,
        app: &str,
        path: &str,
        handler: H,
    ) -> Result<u64, AirlockError>
    where
        H: SubscriptionHandler + 'static,
    {
        let ship = ship.trim_start_matches('~').to_string();
        let (id, command, ticket) = {
            let mut state = self.inner.lock();
            let id = state.next_id();
            state.subscriptions.insert(
                id,
                PendingSubscription {
                    ship: ship.clone(),
                    app: app.to_string(),
                    path: path.to_string(),
                    handler: Arc::new(handler),
                },
            );
            let command = Command::Subscribe {
                id,
                ship,
                app: app.to_string(),
                path: path.to_string(),
            };
            (id, command, state.ticket())
        };

        if let Err(err) = self.send_with(&ticket, &[command]).await {
            self.inner.forget_subscription(ticket.generation, id);
            return Err(err);
        }

        tracing::debug!(id, app, path, "subscribed");
        Ok(id)
    }

    /// End a subscription. The registry entry goes once the write succeeds,
    /// whatever state the event stream is in.
    pub async fn unsubscribe(&self, subscription: u64) -> Result<(), AirlockError> {
        let (command, ticket) = {
            let mut state = self.inner.lock();
            let id = state.next_id();
            (Command::Unsubscribe { id, subscription }, state.ticket())
        };

        // No stream needed: the entry goes once the ship has the request
        self.inner.write(&ticket, &[command]).await?;
        self.inner.forget_subscription(ticket.generation, subscription);
        tracing::debug!(subscription, "unsubscribed");
        Ok(())
    }

    /// Subscribe, wait for the first fact, and unsubscribe.
    ///
    /// Fails with [`AirlockError::SubscriptionQuit`] if the ship quits first and
    /// [`AirlockError::Timeout`] (after unsubscribing) if `timeout` elapses first.
    pub async fn subscribe_once(
        &self,
        app: &str,
        path: &str,
        timeout: Option<Duration>,
    ) -> Result<Value, AirlockError> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let id = self.subscribe(app, path, events_tx).await?;

        // Only the first event is read; anything after it is dropped with the receiver
        let first = match timeout {
            Some(limit) => match tokio::time::timeout(limit, events_rx.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    tracing::debug!(id, app, path, "subscribe_once timed out");
                    if let Err(err) = self.unsubscribe(id).await {
                        tracing::warn!(id, error = %err, "failed to unsubscribe after timeout");
                    }
                    return Err(AirlockError::Timeout);
                }
            },
            None => events_rx.recv().await,
        };

        match first {
            Some(SubscriptionEvent::Fact { json, .. }) => {
                if let Err(err) = self.unsubscribe(id).await {
                    tracing::warn!(id, error = %err, "failed to unsubscribe after first fact");
                }
                Ok(json)
            }
            Some(SubscriptionEvent::Quit { .. }) => Err(AirlockError::SubscriptionQuit),
            Some(SubscriptionEvent::Error { err, .. }) => Err(AirlockError::Subscription(err)),
            None => Err(AirlockError::ChannelReset),
        }
    }

    // =========================================================================
    // Stateless requests
    // =========================================================================

    /// Read `path` from `app`'s scry namespace.
    pub async fn scry(&self, app: &str, path: &str) -> Result<Value, AirlockError> {
        let url = scry_url(&self.inner.config.base_url, app, path);
        tracing::debug!(%url, "scry");
        self.inner.transport.get_json(&url).await
    }

    /// Run a thread and return its result.
    pub async fn thread(&self, request: ThreadRequest) -> Result<Value, AirlockError> {
        let desk = request
            .desk
            .or_else(|| self.inner.config.desk.clone())
            .filter(|desk| !desk.is_empty())
            .ok_or(AirlockError::MissingDesk)?;

        let url = thread_url(
            &self.inner.config.base_url,
            &desk,
            &request.input_mark,
            &request.thread_name,
            &request.output_mark,
        );
        tracing::debug!(%url, "thread");
        self.inner.transport.post_json(&url, &request.body).await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Abandon the channel and start a new one.
    ///
    /// Cancels in-flight writes, stops the event stream, drops every pending
    /// poke and subscription, and generates a new channel id with counters at
    /// zero. Outstanding pokes fail with [`AirlockError::ChannelReset`].
    /// Subscriptions must be re-issued. If the old channel ever reached the
    /// ship, a best-effort delete is sent to it.
    pub async fn reset(&self) {
        let teardown = {
            let mut state = self.inner.lock();
            state.cancel.cancel();

            let old_url = state.identity.channel_url();
            let materialized = state.last_event_id > 0;
            let teardown_id = state.last_event_id + 1;

            let fresh = ChannelState::new(&self.inner.config.base_url, state.generation + 1);
            tracing::info!(
                old = %state.identity.id(),
                new = %fresh.identity.id(),
                pokes = state.pokes.len(),
                subscriptions = state.subscriptions.len(),
                "resetting channel"
            );
            *state = fresh;
            self.inner.set_phase(&mut state, StreamPhase::Closed);

            materialized.then_some((old_url, Command::Delete { id: teardown_id }))
        };
        self.inner.notify_status(ConnectionStatus::Connecting);

        if let Some((url, command)) = teardown {
            let result = match encode_batch(&[command]) {
                Ok(body) => self.inner.transport.put_channel(&url, body).await,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                tracing::debug!(%url, error = %err, "channel delete failed");
            }
        }
    }
}

fn fatal_error() -> AirlockError {
    AirlockError::StreamFatal("event stream failed; reset the channel".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_id_starts_at_one() {
        let mut state = ChannelState::new("http://localhost", 0);
        assert_eq!(state.next_id(), 1);
        assert_eq!(state.next_id(), 2);
        assert_eq!(state.next_id(), 3);
    }

    #[test]
    fn test_ack_after_backlog_exceeds_threshold() {
        let mut state = ChannelState::new("http://localhost", 0);
        let mut acks = Vec::new();
        for id in 1..=21 {
            if let Some(ack) = state.observe_event(id, 20) {
                acks.push((id, ack));
            }
        }
        assert_eq!(acks, vec![(21, Command::Ack { event_id: 21 })]);
        assert_eq!(state.last_acknowledged_event_id, 21);

        // Next ack only once the gap exceeds 20 again
        for id in 22..=41 {
            assert!(state.observe_event(id, 20).is_none());
        }
        assert_eq!(
            state.observe_event(42, 20),
            Some(Command::Ack { event_id: 42 })
        );
    }

    #[test]
    fn test_observe_event_never_lowers_counter() {
        let mut state = ChannelState::new("http://localhost", 0);
        for _ in 0..5 {
            state.next_id();
        }
        assert!(state.observe_event(2, 20).is_none());
        assert_eq!(state.last_event_id, 5);
        assert_eq!(state.next_id(), 6);
        assert!(state.last_acknowledged_event_id <= state.last_event_id);
    }

    #[test]
    fn test_ticket_matches_identity() {
        let state = ChannelState::new("http://localhost:8080", 3);
        let ticket = state.ticket();
        assert_eq!(ticket.url, state.identity.channel_url());
        assert_eq!(ticket.generation, 3);
        assert!(!ticket.cancel.is_cancelled());
    }

    #[test]
    fn test_thread_request_builder() {
        let request = ThreadRequest::new("graph-update-3", "graph-view-action", "graph-create", Value::Null)
            .with_desk("landscape");
        assert_eq!(request.desk.as_deref(), Some("landscape"));
        assert_eq!(request.thread_name, "graph-create");
    }
}
