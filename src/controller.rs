//! Controller facade.
//!
//! Convenience wiring for the receiving side of a drive link: a dispatcher,
//! a drive-command queue, and per-field range clamping between them. Robots
//! with more subsystems build the same wiring themselves, one queue per
//! message type.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::error::Result;
use crate::queue::{QueueConfig, TimedQueue};
use crate::schema::{self, DriveCmd};

/// Per-field command limits.
///
/// Defaults are all zero, which clamps every command to a standstill:
/// limits must be set explicitly before the robot will move.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CommandLimits {
    pub vx_min: f32,
    pub vx_max: f32,
    pub omega_min: f32,
    pub omega_max: f32,
    pub duration_min: u16,
    pub duration_max: u16,
}

impl CommandLimits {
    /// Clamp a command into range, field by field.
    pub fn clamp(&self, cmd: DriveCmd) -> DriveCmd {
        let duration_ms = if self.duration_max < self.duration_min {
            self.duration_min
        } else {
            cmd.duration_ms.clamp(self.duration_min, self.duration_max)
        };
        DriveCmd {
            vx: clamp_f32(cmd.vx, self.vx_min, self.vx_max),
            omega: clamp_f32(cmd.omega, self.omega_min, self.omega_max),
            duration_ms,
        }
    }
}

fn clamp_f32(value: f32, min: f32, max: f32) -> f32 {
    if max < min {
        return min;
    }
    value.clamp(min, max)
}

/// Controller configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Dispatcher and parser settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Drive queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Drive command limits.
    #[serde(default)]
    pub limits: CommandLimits,
}

/// Receive-side engine for drive commands.
pub struct Controller {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<TimedQueue<DriveCmd>>,
}

impl Controller {
    /// Build a controller over the built-in schema.
    pub fn new(config: ControllerConfig) -> Result<Self> {
        let registry = Arc::new(schema::build_registry()?);
        let dispatcher = Arc::new(Dispatcher::new(config.dispatcher, registry));
        let queue = Arc::new(TimedQueue::new(config.queue));
        let limits = config.limits;

        let handler_queue = Arc::clone(&queue);
        dispatcher.register::<DriveCmd, _>(move |view| {
            let now = Instant::now();
            {
                let mut tx = handler_queue.begin_transaction();
                if view.header.flags.clear_queue() {
                    tx.clear();
                }
                for cmd in view.messages::<DriveCmd>() {
                    tx.push(limits.clamp(cmd));
                }
            }
            handler_queue.notify_received(now);
        });

        Ok(Self { dispatcher, queue })
    }

    /// Feed raw transport bytes.
    pub fn push_bytes(&self, data: &[u8]) {
        self.dispatcher.push_bytes(data);
    }

    /// Advance playback and return the command to execute right now.
    pub fn current_command(&self, now: Instant) -> Option<DriveCmd> {
        self.queue.update(now);
        self.queue.active_message()
    }

    /// Whether drive packets arrived within the queue's timeout.
    pub fn is_connected(&self, now: Instant) -> bool {
        self.queue.is_connected(now)
    }

    /// The drive queue.
    pub fn queue(&self) -> &Arc<TimedQueue<DriveCmd>> {
        &self.queue
    }

    /// The dispatcher, for registering more subsystem handlers.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}
