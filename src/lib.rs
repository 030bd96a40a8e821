//! # BCNP
//!
//! Binary Control Network Protocol: a low-latency, duration-timed command
//! and telemetry protocol between a planner (driver station) and a robot
//! controller over an unreliable or reliable byte transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Application / Robot Code                │
//! ├─────────────────────────────────────────────────────────────┤
//! │   Timed Queues (per message type)   │  Telemetry Batching   │
//! ├─────────────────────────────────────────────────────────────┤
//! │           Dispatcher (type id → handler routing)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │      Stream Parser (resync framing over a ring buffer)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │   Wire Codec (header ‖ payload ‖ CRC32)  │  Registry/Hash   │
//! ├─────────────────────────────────────────────────────────────┤
//! │        Transport Adapters (TCP / UDP / loopback)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Receive path: transport bytes → poll driver → parser → dispatcher →
//! per-type handler → timed queue → control loop reads the active message.
//! Send path: typed packet → codec → transport adapter.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::cast_possible_truncation)] // Message counts are bounded at u16
#![allow(clippy::doc_markdown)] // ASCII diagrams in docs
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::return_self_not_must_use)] // Builder methods don't need must_use
#![allow(clippy::option_if_let_else)] // More readable in context
#![allow(clippy::significant_drop_tightening)] // Lock scopes are intentional
#![allow(clippy::use_self)] // Explicit type names in matches

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod parser;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod telemetry;
pub mod transport;
pub mod types;
pub mod util;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{MessageTypeId, SchemaHash};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol major version; the parser rejects any other.
pub const PROTOCOL_MAJOR: u8 = 3;

/// Protocol minor version; the parser rejects any other.
pub const PROTOCOL_MINOR: u8 = 0;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::controller::{CommandLimits, Controller, ControllerConfig};
    pub use crate::dispatcher::{Dispatcher, DispatcherConfig};
    pub use crate::error::{Error, Result};
    pub use crate::handshake::{HandshakeState, HANDSHAKE_SIZE};
    pub use crate::parser::{ParserConfig, StreamParser};
    pub use crate::protocol::{
        encode_packet, encode_packet_to_vec, PacketFlags, PacketView, TimedMessage, TypedPacket,
        WireMessage,
    };
    pub use crate::queue::{QueueConfig, TimedQueue};
    pub use crate::registry::MessageRegistry;
    pub use crate::schema::{DriveCmd, DrivetrainState, EncoderData};
    pub use crate::storage::StackVec;
    pub use crate::telemetry::TelemetryAccumulator;
    pub use crate::transport::{
        ByteStream, ByteWriter, Duplex, LoopbackAdapter, PollDriver, TcpAdapter, UdpAdapter,
    };
    pub use crate::types::{MessageTypeId, SchemaHash};
}
