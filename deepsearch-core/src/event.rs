//! Session event stream — ordered, typed progress events.
//!
//! Every orchestrator-visible state change and sub-call outcome becomes
//! an [`Event`] with a session-scoped, strictly increasing, gapless
//! sequence number. Emission is synchronous with respect to the
//! producing phase; consumption is asynchronous and may lag according
//! to the configured [`BufferPolicy`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tracing::debug;
use uuid::Uuid;

/// Kind of a session event. Closed enumeration; `done`, `cancelled`,
/// and `error` are terminal and exactly one of them ends every stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    PhaseStarted,
    PhaseCompleted,
    PlanReady,
    QueryIssued,
    ResultReceived,
    SearchFailed,
    FindingAdded,
    ReflectionVerdict,
    BudgetExhausted,
    ModelFallback,
    EnhancementApplied,
    ReportChunk,
    Cancelled,
    Error,
    Done,
}

impl EventKind {
    /// Whether this kind ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Done | EventKind::Cancelled | EventKind::Error
        )
    }
}

/// One unit of the session output stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Strictly increasing, gapless within the session, starting at 1.
    pub sequence: u64,
    pub kind: EventKind,
    pub session_id: Uuid,
    /// Kind-specific structure.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Buffering policy between the pipeline and a (possibly slow) consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BufferPolicy {
    /// Bounded channel; the pipeline awaits when the consumer lags by
    /// more than `capacity` events.
    Backpressure { capacity: usize },
    /// Ring buffer; when full, the oldest unconsumed event is evicted
    /// so the pipeline never blocks. Consumers detect the loss through
    /// the gap in sequence numbers.
    DropOldest { capacity: usize },
}

impl Default for BufferPolicy {
    fn default() -> Self {
        BufferPolicy::Backpressure { capacity: 256 }
    }
}

/// Create the emitter/stream pair for one session.
pub fn channel(session_id: Uuid, policy: BufferPolicy) -> (EventEmitter, EventStream) {
    match policy {
        BufferPolicy::Backpressure { capacity } => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (
                EventEmitter {
                    session_id,
                    next_sequence: 1,
                    inner: EmitterInner::Bounded(tx),
                },
                EventStream {
                    inner: StreamInner::Bounded(rx),
                },
            )
        }
        BufferPolicy::DropOldest { capacity } => {
            let ring = Arc::new(Ring {
                capacity: capacity.max(1),
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            });
            (
                EventEmitter {
                    session_id,
                    next_sequence: 1,
                    inner: EmitterInner::Ring(ring.clone()),
                },
                EventStream {
                    inner: StreamInner::Ring(ring),
                },
            )
        }
    }
}

struct Ring {
    capacity: usize,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    closed: AtomicBool,
}

enum EmitterInner {
    Bounded(mpsc::Sender<Event>),
    Ring(Arc<Ring>),
}

/// Producer side, owned exclusively by the session task.
pub struct EventEmitter {
    session_id: Uuid,
    next_sequence: u64,
    inner: EmitterInner,
}

impl EventEmitter {
    /// Emit one event, assigning the next sequence number.
    ///
    /// With `Backpressure` this awaits until the consumer has room; a
    /// dropped consumer is tolerated (the pipeline still runs to its
    /// terminal state). With `DropOldest` this never blocks.
    pub async fn emit(&mut self, kind: EventKind, payload: serde_json::Value) {
        let event = Event {
            sequence: self.next_sequence,
            kind,
            session_id: self.session_id,
            payload,
            timestamp: Utc::now(),
        };
        self.next_sequence += 1;

        match &self.inner {
            EmitterInner::Bounded(tx) => {
                if tx.send(event).await.is_err() {
                    debug!(session_id = %self.session_id, ?kind, "Event consumer gone, dropping event");
                }
            }
            EmitterInner::Ring(ring) => {
                {
                    let mut queue = ring.queue.lock().expect("event ring lock poisoned");
                    if queue.len() == ring.capacity {
                        let dropped = queue.pop_front();
                        debug!(
                            session_id = %self.session_id,
                            dropped_sequence = dropped.map(|e| e.sequence),
                            "Event ring full, dropping oldest event"
                        );
                    }
                    queue.push_back(event);
                }
                ring.notify.notify_one();
            }
        }
    }

    /// The sequence number the next event will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }
}

impl Drop for EventEmitter {
    fn drop(&mut self) {
        if let EmitterInner::Ring(ring) = &self.inner {
            ring.closed.store(true, Ordering::SeqCst);
            ring.notify.notify_waiters();
            // notify_one stores a permit for a consumer that has not
            // registered its waiter yet.
            ring.notify.notify_one();
        }
        // Bounded: dropping the sender closes the channel.
    }
}

enum StreamInner {
    Bounded(mpsc::Receiver<Event>),
    Ring(Arc<Ring>),
}

/// Consumer side of a session's event stream.
pub struct EventStream {
    inner: StreamInner,
}

impl EventStream {
    /// Receive the next event; `None` once the session task has
    /// finished and all buffered events were consumed.
    pub async fn next(&mut self) -> Option<Event> {
        match &mut self.inner {
            StreamInner::Bounded(rx) => rx.recv().await,
            StreamInner::Ring(ring) => loop {
                let notified = ring.notify.notified();
                {
                    let mut queue = ring.queue.lock().expect("event ring lock poisoned");
                    if let Some(event) = queue.pop_front() {
                        return Some(event);
                    }
                    if ring.closed.load(Ordering::SeqCst) {
                        return None;
                    }
                }
                notified.await;
            },
        }
    }

    /// Drain the stream to completion, collecting every event.
    pub async fn collect(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}
