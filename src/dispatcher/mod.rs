//! Packet dispatcher.
//!
//! Thin routing layer that owns a stream parser and maps message type ids to
//! type-specific handlers. The dispatcher owns no queues: robot code creates
//! a queue per subsystem and registers a handler that fills it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//! use bcnp::dispatcher::{Dispatcher, DispatcherConfig};
//! use bcnp::queue::TimedQueue;
//! use bcnp::schema::{self, DriveCmd};
//!
//! let registry = Arc::new(schema::build_registry().unwrap());
//! let dispatcher = Dispatcher::new(DispatcherConfig::default(), registry);
//!
//! let drive_queue = Arc::new(TimedQueue::<DriveCmd>::default());
//! let queue = Arc::clone(&drive_queue);
//! dispatcher.register::<DriveCmd, _>(move |view| {
//!     let mut tx = queue.begin_transaction();
//!     if view.header.flags.clear_queue() {
//!         tx.clear();
//!     }
//!     for cmd in view.messages::<DriveCmd>() {
//!         tx.push(cmd);
//!     }
//!     drop(tx);
//!     queue.notify_received(Instant::now());
//! });
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::parser::{ParseErrorInfo, ParserConfig, StreamParser};
use crate::protocol::{PacketView, WireMessage};
use crate::registry::MessageRegistry;
use crate::types::MessageTypeId;

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Stream parser settings.
    #[serde(default)]
    pub parser: ParserConfig,

    /// Without a packet for this long, `is_connected` reports false.
    #[serde(default = "default_connection_timeout", with = "humantime_serde")]
    pub connection_timeout: Duration,
}

fn default_connection_timeout() -> Duration {
    Duration::from_millis(200)
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            parser: ParserConfig::default(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

/// Callback for handling packets of one message type.
pub type PacketHandler = Box<dyn FnMut(&PacketView<'_>) + Send>;

/// Callback for parse errors.
pub type ErrorHandler = Box<dyn FnMut(&ParseErrorInfo) + Send>;

#[derive(Default)]
struct DispatchState {
    handlers: HashMap<u16, PacketHandler>,
    error_handler: Option<ErrorHandler>,
    last_rx: Option<Instant>,
    parse_errors: u64,
    unrouted_packets: u64,
}

/// Parses a BCNP byte stream and routes packets to registered handlers.
///
/// Thread-safe for concurrent `push_bytes` (serialized on an internal
/// mutex). Handlers run on the pushing thread and must not call back into
/// the dispatcher; doing so deadlocks on the dispatcher lock.
pub struct Dispatcher {
    config: DispatcherConfig,
    parser: Mutex<StreamParser>,
    state: Arc<Mutex<DispatchState>>,
}

impl Dispatcher {
    /// Create a dispatcher resolving wire sizes through `registry`.
    pub fn new(config: DispatcherConfig, registry: Arc<MessageRegistry>) -> Self {
        let state = Arc::new(Mutex::new(DispatchState::default()));

        // The parser's callbacks reference shared state, not the dispatcher
        // itself: the ownership edge runs dispatcher → parser only.
        let packet_state = Arc::clone(&state);
        let mut parser = StreamParser::new(config.parser.clone(), registry, move |view| {
            let mut state = packet_state.lock();
            state.last_rx = Some(Instant::now());
            match state.handlers.get_mut(&view.header.message_type_id.0) {
                Some(handler) => handler(view),
                None => {
                    // Unknown types are valid protocol events, not errors.
                    state.unrouted_packets += 1;
                    trace!(
                        type_id = view.header.message_type_id.0,
                        "no handler for message type"
                    );
                }
            }
        });

        let error_state = Arc::clone(&state);
        parser.set_error_callback(move |info| {
            let mut state = error_state.lock();
            state.parse_errors += 1;
            if let Some(handler) = state.error_handler.as_mut() {
                handler(info);
            }
        });

        Self {
            config,
            parser: Mutex::new(parser),
            state,
        }
    }

    /// Feed raw transport bytes; drains packets into handlers.
    pub fn push_bytes(&self, data: &[u8]) {
        self.parser.lock().push(data);
    }

    /// Register a handler for message type `M`.
    pub fn register<M, F>(&self, handler: F)
    where
        M: WireMessage,
        F: FnMut(&PacketView<'_>) + Send + 'static,
    {
        self.register_handler(M::TYPE_ID, handler);
    }

    /// Register a handler by raw type id. Replaces any existing handler.
    pub fn register_handler<F>(&self, type_id: MessageTypeId, handler: F)
    where
        F: FnMut(&PacketView<'_>) + Send + 'static,
    {
        self.state.lock().handlers.insert(type_id.0, Box::new(handler));
    }

    /// Remove the handler for a type id.
    pub fn unregister_handler(&self, type_id: MessageTypeId) {
        self.state.lock().handlers.remove(&type_id.0);
    }

    /// Install the parse-error callback.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: FnMut(&ParseErrorInfo) + Send + 'static,
    {
        self.state.lock().error_handler = Some(Box::new(handler));
    }

    /// Whether a packet arrived within the connection timeout.
    pub fn is_connected(&self, now: Instant) -> bool {
        match self.state.lock().last_rx {
            Some(last_rx) => {
                now.saturating_duration_since(last_rx) <= self.config.connection_timeout
            }
            None => false,
        }
    }

    /// Instant of the most recent packet, if any.
    pub fn last_receive_time(&self) -> Option<Instant> {
        self.state.lock().last_rx
    }

    /// Total parse errors observed.
    pub fn parse_error_count(&self) -> u64 {
        self.state.lock().parse_errors
    }

    /// Packets dropped because no handler was registered for their type.
    pub fn unrouted_packet_count(&self) -> u64 {
        self.state.lock().unrouted_packets
    }

    /// Reset the parser; optionally zero its error state.
    ///
    /// Call on transport reconnect so a half-buffered frame from the old
    /// connection cannot poison the new stream.
    pub fn reset_parser(&self, clear_error_state: bool) {
        self.parser.lock().reset(clear_error_state);
    }

    /// Override the parser's wire-size lookup (testing hook).
    pub fn set_wire_size_lookup(&self, lookup: crate::parser::WireLookup) {
        self.parser.lock().set_wire_size_lookup(lookup);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::protocol::{encode_packet_to_vec, TypedPacket};
    use crate::schema::{self, DriveCmd, EncoderData};

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(schema::build_registry().unwrap());
        Dispatcher::new(DispatcherConfig::default(), registry)
    }

    fn drive_packet(cmds: &[DriveCmd]) -> Vec<u8> {
        let mut packet: TypedPacket<DriveCmd> = TypedPacket::new();
        for cmd in cmds {
            packet.push(*cmd);
        }
        encode_packet_to_vec(&packet).unwrap()
    }

    #[test]
    fn test_routes_to_registered_handler() {
        let dispatcher = dispatcher();
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&received);
        dispatcher.register::<DriveCmd, _>(move |view| {
            sink.lock().extend(view.messages::<DriveCmd>());
        });

        dispatcher.push_bytes(&drive_packet(&[
            DriveCmd::new(0.5, -1.0, 1500),
            DriveCmd::new(-0.25, 0.25, 500),
        ]));

        let received = received.lock();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].duration_ms, 1500);
    }

    #[test]
    fn test_unknown_type_ignored_but_counted() {
        let dispatcher = dispatcher();

        // EncoderData is registered in the schema but has no handler here.
        let mut packet: TypedPacket<EncoderData> = TypedPacket::new();
        packet.push(EncoderData::default());
        dispatcher.push_bytes(&encode_packet_to_vec(&packet).unwrap());

        assert_eq!(dispatcher.unrouted_packet_count(), 1);
        assert_eq!(dispatcher.parse_error_count(), 0);
        assert!(dispatcher.last_receive_time().is_some());
    }

    #[test]
    fn test_unregister_stops_routing() {
        let dispatcher = dispatcher();
        let count = Arc::new(AtomicU64::new(0));

        let sink = Arc::clone(&count);
        dispatcher.register::<DriveCmd, _>(move |_| {
            sink.fetch_add(1, Ordering::Relaxed);
        });

        dispatcher.push_bytes(&drive_packet(&[DriveCmd::new(0.1, 0.0, 100)]));
        dispatcher.unregister_handler(DriveCmd::TYPE_ID);
        dispatcher.push_bytes(&drive_packet(&[DriveCmd::new(0.2, 0.0, 100)]));

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(dispatcher.unrouted_packet_count(), 1);
    }

    #[test]
    fn test_parse_errors_counted_and_reported() {
        let dispatcher = dispatcher();
        let errors = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&errors);
        dispatcher.set_error_handler(move |info| sink.lock().push(*info));

        dispatcher.push_bytes(&[0xFF; 16]);

        assert!(dispatcher.parse_error_count() > 0);
        assert_eq!(dispatcher.parse_error_count(), errors.lock().len() as u64);
    }

    #[test]
    fn test_connection_tracking() {
        let dispatcher = dispatcher();
        let now = Instant::now();
        assert!(!dispatcher.is_connected(now));
        assert!(dispatcher.last_receive_time().is_none());

        dispatcher.push_bytes(&drive_packet(&[DriveCmd::new(0.1, 0.0, 100)]));
        let rx = dispatcher.last_receive_time().expect("packet stamped");
        assert!(dispatcher.is_connected(rx));
        assert!(!dispatcher.is_connected(rx + Duration::from_millis(201)));
    }

    #[test]
    fn test_concurrent_push_bytes() {
        let dispatcher = Arc::new(dispatcher());
        let count = Arc::new(AtomicU64::new(0));

        let sink = Arc::clone(&count);
        dispatcher.register::<DriveCmd, _>(move |view| {
            sink.fetch_add(view.header.message_count as u64, Ordering::Relaxed);
        });

        let bytes = drive_packet(&[DriveCmd::new(0.1, 0.0, 100)]);
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                let bytes = bytes.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        dispatcher.push_bytes(&bytes);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(count.load(Ordering::Relaxed), 200);
        assert_eq!(dispatcher.parse_error_count(), 0);
    }

    #[test]
    fn test_reset_parser_discards_partial_frame() {
        let dispatcher = dispatcher();
        let count = Arc::new(AtomicU64::new(0));

        let sink = Arc::clone(&count);
        dispatcher.register::<DriveCmd, _>(move |_| {
            sink.fetch_add(1, Ordering::Relaxed);
        });

        let bytes = drive_packet(&[DriveCmd::new(0.1, 0.0, 100)]);
        dispatcher.push_bytes(&bytes[..10]); // stale half frame
        dispatcher.reset_parser(true);
        dispatcher.push_bytes(&bytes);

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(dispatcher.parse_error_count(), 0);
    }
}
