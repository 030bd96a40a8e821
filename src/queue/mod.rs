//! Timed message queue.
//!
//! Per-type FIFO of duration-bearing messages, played back against a virtual
//! cursor so timing is jitter-insensitive and drift-free across `update`
//! ticks. A connection timeout clears everything when the link goes quiet,
//! and a lag floor bounds how much history can replay after a stall.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::protocol::TimedMessage;

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued messages. Clamped to at least 1.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Without a packet for this long, the queue is disconnected and drops
    /// all pending and active messages.
    #[serde(default = "default_connection_timeout", with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// How far behind `now` the virtual cursor may fall before messages are
    /// skipped or clamped. Clamped to at least 1 ms.
    #[serde(default = "default_max_command_lag", with = "humantime_serde")]
    pub max_command_lag: Duration,
}

fn default_capacity() -> usize {
    200
}
fn default_connection_timeout() -> Duration {
    Duration::from_millis(200)
}
fn default_max_command_lag() -> Duration {
    Duration::from_millis(100)
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            connection_timeout: default_connection_timeout(),
            max_command_lag: default_max_command_lag(),
        }
    }
}

impl QueueConfig {
    fn clamped(mut self) -> Self {
        if self.capacity == 0 {
            self.capacity = default_capacity();
        }
        if self.max_command_lag.is_zero() {
            self.max_command_lag = Duration::from_millis(1);
        }
        self
    }
}

/// Counters for queue diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    /// Messages accepted by `push`.
    pub messages_received: u64,
    /// Pushes rejected because the queue was full.
    pub queue_overflows: u64,
    /// Messages dropped because their whole window fell behind the lag floor.
    pub messages_skipped: u64,
}

struct ActiveSlot<M> {
    message: M,
    start: Instant,
}

struct Inner<M> {
    config: QueueConfig,
    metrics: QueueMetrics,
    ring: VecDeque<M>,
    active: Option<ActiveSlot<M>>,
    virtual_cursor: Option<Instant>,
    last_rx: Option<Instant>,
}

/// Duration-scheduled playback queue, generic over any [`TimedMessage`].
///
/// All operations lock an internal mutex. [`active_message`] uses a
/// try-lock so a real-time reader never blocks on the network thread.
///
/// [`active_message`]: TimedQueue::active_message
pub struct TimedQueue<M> {
    inner: Mutex<Inner<M>>,
}

impl<M: TimedMessage + Clone> TimedQueue<M> {
    /// Create a queue with the given configuration.
    pub fn new(config: QueueConfig) -> Self {
        let config = config.clamped();
        let ring = VecDeque::with_capacity(config.capacity);
        Self {
            inner: Mutex::new(Inner {
                config,
                metrics: QueueMetrics::default(),
                ring,
                active: None,
                virtual_cursor: None,
                last_rx: None,
            }),
        }
    }

    /// Append a message. Returns `false` (counted as overflow) when full.
    pub fn push(&self, message: M) -> bool {
        self.inner.lock().push(message)
    }

    /// Drop all pending and active messages.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of queued (not yet active) messages.
    pub fn len(&self) -> usize {
        self.inner.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stamp the connection liveness clock.
    pub fn notify_received(&self, now: Instant) {
        self.inner.lock().last_rx = Some(now);
    }

    /// Drive the playback state machine; call once per control-loop tick.
    pub fn update(&self, now: Instant) {
        let mut inner = self.inner.lock();

        if !inner.is_connected(now) {
            // Safety property: a disconnected queue never yields an active
            // command.
            inner.clear();
            return;
        }

        loop {
            if let Some(active) = &inner.active {
                let duration = Duration::from_millis(u64::from(active.message.duration_ms()));
                if now.saturating_duration_since(active.start) < duration {
                    break;
                }
                let end = active.start + duration;
                inner.active = None;
                inner.virtual_cursor = Some(end);
            }

            // Sub-tick drain: keep promoting while more messages are due.
            inner.promote_next(now);
            if inner.active.is_none() {
                break;
            }
        }
    }

    /// The currently playing message, or `None`.
    ///
    /// Non-blocking: returns `None` when the mutex is contended, so a
    /// real-time control loop never waits on the network thread.
    pub fn active_message(&self) -> Option<M> {
        let inner = self.inner.try_lock()?;
        inner.active.as_ref().map(|slot| slot.message.clone())
    }

    /// Blocking variant of [`active_message`](Self::active_message) for
    /// non-real-time consumers.
    pub fn active_message_blocking(&self) -> Option<M> {
        let inner = self.inner.lock();
        inner.active.as_ref().map(|slot| slot.message.clone())
    }

    /// Whether a packet has arrived within the connection timeout.
    pub fn is_connected(&self, now: Instant) -> bool {
        self.inner.lock().is_connected(now)
    }

    /// Current metric counters.
    pub fn metrics(&self) -> QueueMetrics {
        self.inner.lock().metrics
    }

    /// Zero all metric counters.
    pub fn reset_metrics(&self) {
        self.inner.lock().metrics = QueueMetrics::default();
    }

    /// Replace the configuration. Changing capacity clears the queue.
    pub fn set_config(&self, config: QueueConfig) {
        let mut inner = self.inner.lock();
        let config = config.clamped();
        if config.capacity != inner.config.capacity {
            inner.clear();
            inner.ring = VecDeque::with_capacity(config.capacity);
        }
        inner.config = config;
    }

    /// Current configuration.
    pub fn config(&self) -> QueueConfig {
        self.inner.lock().config.clone()
    }

    /// Acquire exclusive access for an atomic batch of push/clear.
    ///
    /// The lock is held for the transaction's scope; `update` and
    /// `active_message` callers wait (or see `None`) until it drops.
    pub fn begin_transaction(&self) -> Transaction<'_, M> {
        Transaction {
            inner: self.inner.lock(),
        }
    }
}

impl<M: TimedMessage + Clone> Default for TimedQueue<M> {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

/// RAII batch handle returned by [`TimedQueue::begin_transaction`].
pub struct Transaction<'a, M> {
    inner: MutexGuard<'a, Inner<M>>,
}

impl<M: TimedMessage> Transaction<'_, M> {
    /// Append a message inside the transaction.
    pub fn push(&mut self, message: M) -> bool {
        self.inner.push(message)
    }

    /// Drop all pending and active messages inside the transaction.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Queued message count inside the transaction.
    pub fn len(&self) -> usize {
        self.inner.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M: TimedMessage> Inner<M> {
    fn push(&mut self, message: M) -> bool {
        if self.ring.len() >= self.config.capacity {
            self.metrics.queue_overflows += 1;
            return false;
        }
        self.ring.push_back(message);
        self.metrics.messages_received += 1;
        true
    }

    fn clear(&mut self) {
        self.ring.clear();
        self.active = None;
        self.virtual_cursor = None;
    }

    fn is_connected(&self, now: Instant) -> bool {
        match self.last_rx {
            Some(last_rx) => now.saturating_duration_since(last_rx) <= self.config.connection_timeout,
            None => false,
        }
    }

    fn promote_next(&mut self, now: Instant) {
        let mut cursor = match self.virtual_cursor {
            Some(cursor) => cursor,
            None => now,
        };

        if self.ring.is_empty() {
            self.virtual_cursor = Some(cursor.max(now));
            return;
        }

        let lag_floor = now.checked_sub(self.config.max_command_lag);

        while let Some(front) = self.ring.front() {
            let duration = Duration::from_millis(u64::from(front.duration_ms()));
            let mut start = cursor;
            let end = start + duration;

            if let Some(floor) = lag_floor {
                if end <= floor {
                    // Stale end to end: skip it and account the time.
                    self.ring.pop_front();
                    self.metrics.messages_skipped += 1;
                    cursor = end;
                    continue;
                }
                if start < floor {
                    // At most max_command_lag of history replays at once.
                    start = floor;
                }
            }

            let message = self.ring.pop_front().expect("front just peeked");
            self.active = Some(ActiveSlot { message, start });
            self.virtual_cursor = Some(start + duration);
            return;
        }

        self.virtual_cursor = Some(cursor.max(now));
    }
}
