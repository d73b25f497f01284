// ABOUTME: Event-stream consumer: frame dispatch, acks, and reconnect with backoff
// ABOUTME: One consumer task per channel generation, stopped by the generation's cancel token

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::channel::Inner;
use crate::error::AirlockError;
use crate::frame::{parse_frame, InboundFrame};
use crate::status::ConnectionStatus;
use crate::transport::StreamSignal;

/// Lifecycle phase of a channel's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Not connected and nothing in flight.
    Closed,
    /// First write done (or under way), waiting for the stream to open.
    Bootstrapping,
    Open,
    /// The stream failed `errors` times in a row and is reconnecting.
    Erroring { errors: u32 },
    /// Too many consecutive failures; only a reset recovers.
    Fatal,
}

/// What a stream error leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorVerdict {
    Retry { attempt: u32, delay: Duration },
    Fatal,
    /// The error belongs to a generation that was reset.
    Stale,
}

/// Consume the event stream of generation `generation` until it is cancelled
/// or goes fatal.
pub(crate) async fn run(inner: Arc<Inner>, generation: u64, cancel: CancellationToken) {
    let Some(url) = current_url(&inner, generation) else {
        return;
    };
    let mut resume_from: Option<u64> = None;

    loop {
        tracing::debug!(%url, last_event_id = ?resume_from, "opening event stream");
        let mut events = inner.transport.open_stream(&url, resume_from);

        let failure = loop {
            let signal = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(%url, "event stream cancelled");
                    return;
                }
                signal = events.next() => signal,
            };

            match signal {
                Some(StreamSignal::Open) => {
                    if !mark_open(&inner, generation) {
                        return;
                    }
                }
                Some(StreamSignal::Message { data }) => {
                    if !handle_message(&inner, generation, &data) {
                        return;
                    }
                }
                Some(StreamSignal::Error(err)) => break Some(err),
                Some(StreamSignal::Closed) | None => break None,
            }
        };

        let verdict = match failure {
            Some(err) => {
                tracing::warn!(%url, error = %err, "event stream error");
                record_error(&inner, generation, &err)
            }
            None => {
                tracing::warn!(%url, "event stream closed by ship");
                go_fatal(&inner, generation, "event stream closed by ship".to_string())
            }
        };

        match verdict {
            ErrorVerdict::Retry { attempt, delay } => {
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting event stream");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                let state = inner.lock();
                if state.generation != generation {
                    return;
                }
                resume_from = Some(state.last_event_id);
            }
            ErrorVerdict::Fatal | ErrorVerdict::Stale => return,
        }
    }
}

fn current_url(inner: &Inner, generation: u64) -> Option<String> {
    let state = inner.lock();
    (state.generation == generation).then(|| state.identity.channel_url())
}

/// Returns false when the generation is gone.
fn mark_open(inner: &Inner, generation: u64) -> bool {
    {
        let mut state = inner.lock();
        if state.generation != generation {
            return false;
        }
        state.error_count = 0;
        inner.set_phase(&mut state, StreamPhase::Open);
    }
    tracing::info!("event stream open");

    if let Some(observer) = inner.observer() {
        observer.on_open();
        observer.on_status(ConnectionStatus::Connected);
    }
    true
}

/// Count one failure and decide whether to reconnect.
pub(crate) fn record_error(inner: &Inner, generation: u64, err: &str) -> ErrorVerdict {
    let attempt = {
        let mut state = inner.lock();
        if state.generation != generation || state.phase == StreamPhase::Fatal {
            return ErrorVerdict::Stale;
        }
        state.error_count += 1;
        if state.error_count >= inner.config.max_stream_errors {
            None
        } else {
            let errors = state.error_count;
            inner.set_phase(&mut state, StreamPhase::Erroring { errors });
            Some(errors)
        }
    };

    match attempt {
        Some(attempt) => {
            let delay = inner.config.retry_delay(attempt);
            if let Some(observer) = inner.observer() {
                observer.on_retry(attempt, delay);
                observer.on_status(ConnectionStatus::Reconnecting);
            }
            ErrorVerdict::Retry { attempt, delay }
        }
        None => go_fatal(inner, generation, err.to_string()),
    }
}

/// Move to Fatal and notify the observer, once per generation.
fn go_fatal(inner: &Inner, generation: u64, reason: String) -> ErrorVerdict {
    {
        let mut state = inner.lock();
        if state.generation != generation || state.phase == StreamPhase::Fatal {
            return ErrorVerdict::Stale;
        }
        inner.set_phase(&mut state, StreamPhase::Fatal);
    }
    tracing::error!(error = %reason, "event stream failed permanently");

    if let Some(observer) = inner.observer() {
        observer.on_fatal(&AirlockError::StreamFatal(reason));
        observer.on_status(ConnectionStatus::Disconnected);
    }
    ErrorVerdict::Fatal
}

/// Handle one message. Returns false when the generation is gone.
fn handle_message(inner: &Arc<Inner>, generation: u64, data: &str) -> bool {
    let frame = match parse_frame(data) {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            tracing::debug!("ignoring event without id");
            return true;
        }
        Err(err) => {
            tracing::warn!(error = %err, "ignoring unparseable event");
            return true;
        }
    };
    let id = frame.id();

    let (ack, ticket) = {
        let mut state = inner.lock();
        if state.generation != generation {
            return false;
        }
        if state.phase == StreamPhase::Fatal {
            return true;
        }
        let ack = state.observe_event(id, inner.config.ack_threshold);
        (ack, state.ticket())
    };

    if let Some(ack) = ack {
        // Acks only trim the ship's backlog; delivery never waits on them
        tracing::debug!(event_id = id, "acknowledging events");
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            if let Err(err) = inner.write(&ticket, &[ack]).await {
                tracing::warn!(event_id = id, error = %err, "failed to acknowledge events");
            }
        });
    }

    dispatch(inner, generation, frame);
    true
}

fn dispatch(inner: &Inner, generation: u64, frame: InboundFrame) {
    match frame {
        InboundFrame::PokeAck { id } => resolve_poke(inner, generation, id, Ok(())),
        InboundFrame::PokeErr { id, err } => resolve_poke(inner, generation, id, Err(err)),
        InboundFrame::SubscribeAck { id } => {
            tracing::debug!(id, "subscription acknowledged");
        }
        InboundFrame::SubscribeErr { id, err } => {
            if let Some(handler) = take_subscription(inner, generation, id) {
                deliver(id, "on_error", || handler.on_error(id, err));
            } else {
                tracing::debug!(id, "err for unknown subscription");
            }
        }
        InboundFrame::Fact { id, json } => {
            let handler = {
                let state = inner.lock();
                if state.generation != generation {
                    return;
                }
                state.subscriptions.handler(id)
            };
            match handler {
                Some(handler) => deliver(id, "on_fact", || handler.on_fact(id, json)),
                None => tracing::debug!(id, "fact for unknown subscription"),
            }
        }
        InboundFrame::Quit { id } => {
            if let Some(handler) = take_subscription(inner, generation, id) {
                deliver(id, "on_quit", || handler.on_quit(id));
            } else {
                tracing::debug!(id, "quit for unknown subscription");
            }
        }
        InboundFrame::Unrecognized { id, response } => {
            tracing::debug!(id, ?response, "unrecognized event");
        }
    }
}

fn resolve_poke(inner: &Inner, generation: u64, id: u64, outcome: Result<(), String>) {
    let mut state = inner.lock();
    if state.generation != generation {
        return;
    }
    if let Err(err) = &outcome {
        tracing::debug!(id, %err, "poke rejected");
    }
    if !state.pokes.resolve(id, outcome) {
        tracing::debug!(id, "poke response for unknown id");
    }
}

fn take_subscription(
    inner: &Inner,
    generation: u64,
    id: u64,
) -> Option<Arc<dyn crate::registry::SubscriptionHandler>> {
    let mut state = inner.lock();
    if state.generation != generation {
        return None;
    }
    state.subscriptions.remove(id).map(|s| s.handler)
}

/// Run a handler callback, keeping the consumer alive if it panics.
fn deliver(id: u64, callback: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(id, callback, "subscription handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_survives_panic() {
        let mut ran_after = false;
        deliver(1, "on_fact", || panic!("handler bug"));
        deliver(1, "on_fact", || ran_after = true);
        assert!(ran_after);
    }

    #[test]
    fn test_phase_is_copy() {
        let phase = StreamPhase::Erroring { errors: 2 };
        let copy = phase;
        assert_eq!(phase, copy);
        assert_ne!(copy, StreamPhase::Open);
    }
}
