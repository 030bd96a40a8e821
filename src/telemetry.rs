//! Telemetry accumulation.
//!
//! Collects high-frequency state samples during the control loop and sends
//! them as batched packets at a configurable rate, avoiding a send syscall
//! per reading. Samples are absolute snapshots, so a dropped packet
//! self-corrects on the next flush; when the buffer fills, old samples are
//! discarded (latest wins).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::protocol::{encode_packet, PacketFlags, TypedPacket, WireMessage};
use crate::storage::{MessageStorage, StackVec};
use crate::transport::ByteWriter;

/// Telemetry accumulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Flush every N control-loop ticks. Two ticks at a 50 Hz loop gives
    /// 25 Hz telemetry.
    #[serde(default = "default_flush_interval_ticks")]
    pub flush_interval_ticks: usize,

    /// Samples buffered before old data is discarded.
    #[serde(default = "default_max_buffered")]
    pub max_buffered_messages: usize,
}

fn default_flush_interval_ticks() -> usize {
    2
}
fn default_max_buffered() -> usize {
    64
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            flush_interval_ticks: default_flush_interval_ticks(),
            max_buffered_messages: default_max_buffered(),
        }
    }
}

/// Counters for telemetry diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryMetrics {
    pub messages_recorded: u64,
    pub messages_sent: u64,
    pub packets_sent: u64,
    pub buffer_overflows: u64,
    pub send_failures: u64,
}

struct Inner<M, S> {
    config: TelemetryConfig,
    buffer: S,
    tick_count: usize,
    metrics: TelemetryMetrics,
    tx_scratch: Vec<u8>,
    _marker: std::marker::PhantomData<M>,
}

/// Batches telemetry messages and flushes them through a [`ByteWriter`].
///
/// Defaults to stack storage so recording in the control loop never
/// allocates; use `TelemetryAccumulator<M, Vec<M>>` for large batches.
pub struct TelemetryAccumulator<M, S = StackVec<M, 64>> {
    inner: Mutex<Inner<M, S>>,
}

impl<M, S> TelemetryAccumulator<M, S>
where
    M: WireMessage + Copy,
    S: MessageStorage<M> + Default,
{
    /// Create an accumulator.
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                buffer: S::default(),
                tick_count: 0,
                metrics: TelemetryMetrics::default(),
                tx_scratch: Vec::new(),
                _marker: std::marker::PhantomData,
            }),
        }
    }

    /// Record one sample.
    pub fn record(&self, message: M) {
        let mut inner = self.inner.lock();
        inner.record(message);
    }

    /// Record several samples at once.
    pub fn record_batch<I: IntoIterator<Item = M>>(&self, messages: I) {
        let mut inner = self.inner.lock();
        for message in messages {
            inner.record(message);
        }
    }

    /// Flush if the tick interval has elapsed; call once per loop tick.
    ///
    /// Returns `true` if a packet went out.
    pub fn maybe_flush<W: ByteWriter>(&self, adapter: &mut W) -> bool {
        let mut inner = self.inner.lock();
        inner.tick_count += 1;
        if inner.tick_count < inner.config.flush_interval_ticks {
            return false;
        }
        inner.tick_count = 0;
        inner.flush(adapter)
    }

    /// Flush immediately regardless of the tick interval.
    pub fn force_flush<W: ByteWriter>(&self, adapter: &mut W) -> bool {
        let mut inner = self.inner.lock();
        inner.tick_count = 0;
        inner.flush(adapter)
    }

    /// Samples waiting for the next flush.
    pub fn buffered_count(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    /// Drop buffered samples without sending.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.buffer.clear();
        inner.tick_count = 0;
    }

    /// Current metric counters.
    pub fn metrics(&self) -> TelemetryMetrics {
        self.inner.lock().metrics
    }

    /// Zero all metric counters.
    pub fn reset_metrics(&self) {
        self.inner.lock().metrics = TelemetryMetrics::default();
    }

    /// Replace the configuration.
    pub fn set_config(&self, config: TelemetryConfig) {
        self.inner.lock().config = config;
    }
}

impl<M, S> Default for TelemetryAccumulator<M, S>
where
    M: WireMessage + Copy,
    S: MessageStorage<M> + Default,
{
    fn default() -> Self {
        Self::new(TelemetryConfig::default())
    }
}

impl<M, S> Inner<M, S>
where
    M: WireMessage + Copy,
    S: MessageStorage<M> + Default,
{
    fn record(&mut self, message: M) {
        if self.buffer.len() >= self.config.max_buffered_messages {
            // Latest wins: stale samples have no value once newer ones
            // exist, so start over rather than block.
            self.buffer.clear();
            self.metrics.buffer_overflows += 1;
        }
        if !self.buffer.push(message) {
            // Fixed container smaller than the configured cap.
            self.buffer.clear();
            self.metrics.buffer_overflows += 1;
            self.buffer.push(message);
        }
        self.metrics.messages_recorded += 1;
    }

    fn flush<W: ByteWriter>(&mut self, adapter: &mut W) -> bool {
        if self.buffer.is_empty() {
            return false;
        }

        let storage = std::mem::take(&mut self.buffer);
        let count = storage.len();
        let packet = TypedPacket::from_storage(storage, PacketFlags::NONE);

        let needed = packet.encoded_size();
        if needed > self.tx_scratch.len() {
            self.tx_scratch.resize(needed, 0);
        }

        let written = match encode_packet(&packet, &mut self.tx_scratch) {
            Ok(written) => written,
            Err(_) => {
                self.metrics.send_failures += 1;
                return false;
            }
        };

        if !adapter.send_bytes(&self.tx_scratch[..written]) {
            self.metrics.send_failures += 1;
            return false;
        }

        self.metrics.messages_sent += count as u64;
        self.metrics.packets_sent += 1;
        true
    }
}
