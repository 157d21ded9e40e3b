//! Diagnostic event streams.
//!
//! Every published check result is fanned out to the subscribed streams with
//! non-blocking sends. A subscriber that falls behind loses events; losses are
//! counted, never waited on.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::checker::Diagnostic;
use crate::error::{DmError, DmResult, EngineError};

use super::CheckState;

/// Unique identifier for a stream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One completed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckEvent {
    pub rule: String,
    /// Generation of the rule text the check ran against.
    pub generation: u64,
    pub state: CheckState,
    pub diagnostics: Vec<Diagnostic>,
    /// Hex blake3 fingerprint of the schema snapshot used.
    pub schema_fingerprint: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub(crate) enum ControlMsg {
    Unregister { subscription_id: SubscriptionId },
}

/// Fan-out point owned by the engine.
#[derive(Debug)]
pub(crate) struct StreamHub {
    capacity: usize,
    subscribers: Mutex<HashMap<SubscriptionId, Sender<CheckEvent>>>,
    control_tx: Sender<ControlMsg>,
    control_rx: Receiver<ControlMsg>,
    dropped_events: Arc<AtomicU64>,
}

impl StreamHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let (control_tx, control_rx) = bounded::<ControlMsg>(capacity.max(1));
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(HashMap::new()),
            control_tx,
            control_rx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn subscribe(&self) -> DmResult<DiagnosticStream> {
        let subscription_id = SubscriptionId::new();
        let (tx, rx) = bounded::<CheckEvent>(self.capacity);
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| DmError::internal("stream subscribers lock poisoned"))?;
        self.drain_control(&mut subscribers);
        subscribers.insert(subscription_id, tx);
        Ok(DiagnosticStream::new(subscription_id, rx, self.control_tx.clone()))
    }

    pub(crate) fn publish(&self, event: &CheckEvent) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            warn!(rule = %event.rule, "stream subscribers lock poisoned; event not published");
            return;
        };
        self.drain_control(&mut subscribers);
        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                warn!(subscription = %id, rule = %event.rule, "subscriber lagging; event dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub(crate) fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map_or(0, |mut subscribers| {
            self.drain_control(&mut subscribers);
            subscribers.len()
        })
    }

    fn drain_control(&self, subscribers: &mut HashMap<SubscriptionId, Sender<CheckEvent>>) {
        while let Ok(msg) = self.control_rx.try_recv() {
            match msg {
                ControlMsg::Unregister { subscription_id } => {
                    subscribers.remove(&subscription_id);
                }
            }
        }
    }
}

/// A subscription to completed checks.
///
/// Dropping this stream attempts best-effort unregistration.
#[derive(Debug)]
pub struct DiagnosticStream {
    subscription_id: SubscriptionId,
    rx: Receiver<CheckEvent>,
    control_tx: Sender<ControlMsg>,
    unregistered: AtomicBool,
}

impl DiagnosticStream {
    fn new(subscription_id: SubscriptionId, rx: Receiver<CheckEvent>, control_tx: Sender<ControlMsg>) -> Self {
        Self {
            subscription_id,
            rx,
            control_tx,
            unregistered: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Best-effort explicit unregistration.
    ///
    /// Non-blocking and idempotent. Events already buffered can still be
    /// received.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.control_tx.try_send(ControlMsg::Unregister {
            subscription_id: self.subscription_id,
        });
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> DmResult<CheckEvent> {
        self.rx.recv().map_err(|_| disconnected())
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> DmResult<CheckEvent> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => DmError::Engine(EngineError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }),
            RecvTimeoutError::Disconnected => disconnected(),
        })
    }

    /// Next buffered event, if any.
    pub fn try_recv(&self) -> DmResult<Option<CheckEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(disconnected()),
        }
    }

    /// Every buffered event, oldest first.
    pub fn drain(&self) -> Vec<CheckEvent> {
        self.rx.try_iter().collect()
    }
}

impl Drop for DiagnosticStream {
    fn drop(&mut self) {
        if !self.unregistered.swap(true, Ordering::AcqRel) {
            let _ = self.control_tx.try_send(ControlMsg::Unregister {
                subscription_id: self.subscription_id,
            });
        }
    }
}

fn disconnected() -> DmError {
    DmError::Engine(EngineError::Disconnected {
        path: "diagnostic_stream".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(rule: &str) -> CheckEvent {
        CheckEvent {
            rule: rule.to_string(),
            generation: 1,
            state: CheckState::Clean,
            diagnostics: Vec::new(),
            schema_fingerprint: String::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let hub = StreamHub::new(8);
        let a = hub.subscribe().unwrap();
        let b = hub.subscribe().unwrap();
        hub.publish(&event("r1"));
        assert_eq!(a.recv_timeout(Duration::from_secs(1)).unwrap().rule, "r1");
        assert_eq!(b.try_recv().unwrap().unwrap().rule, "r1");
        assert!(a.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_full_stream_counts_drops() {
        let hub = StreamHub::new(1);
        let stream = hub.subscribe().unwrap();
        hub.publish(&event("r1"));
        hub.publish(&event("r2"));
        hub.publish(&event("r3"));
        assert_eq!(hub.dropped_events(), 2);
        assert_eq!(stream.drain().len(), 1);
    }

    #[test]
    fn test_unsubscribe_removes_subscriber() {
        let hub = StreamHub::new(4);
        let stream = hub.subscribe().unwrap();
        assert_eq!(hub.subscriber_count(), 1);
        stream.unsubscribe();
        stream.unsubscribe();
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_dropped_stream_is_pruned() {
        let hub = StreamHub::new(4);
        drop(hub.subscribe().unwrap());
        hub.publish(&event("r1"));
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.dropped_events(), 0);
    }

    #[test]
    fn test_recv_timeout_reports_timeout() {
        let hub = StreamHub::new(4);
        let stream = hub.subscribe().unwrap();
        let err = stream.recv_timeout(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, DmError::Engine(EngineError::Timeout { .. })));
    }

    #[test]
    fn test_recv_reports_disconnect_after_hub_drop() {
        let hub = StreamHub::new(4);
        let stream = hub.subscribe().unwrap();
        drop(hub);
        let err = stream.recv().unwrap_err();
        let DmError::Engine(EngineError::Disconnected { path }) = err else {
            panic!("expected Disconnected, got {err:?}");
        };
        assert_eq!(path, "diagnostic_stream");
    }
}
