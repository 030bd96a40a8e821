//! Built-in message schema for the reference robot.
//!
//! Applications with their own schemas define `WireMessage` types elsewhere
//! and register them the same way; the protocol engine only sees type ids,
//! wire sizes, and validators.

use byteorder::{BigEndian, ByteOrder};

use crate::error::Result;
use crate::protocol::{TimedMessage, WireMessage};
use crate::registry::MessageRegistry;
use crate::types::MessageTypeId;

/// Drive base velocity command, played back for `duration_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DriveCmd {
    /// Linear velocity, m/s.
    pub vx: f32,
    /// Angular velocity, rad/s.
    pub omega: f32,
    /// Playback duration in milliseconds.
    pub duration_ms: u16,
}

impl DriveCmd {
    pub fn new(vx: f32, omega: f32, duration_ms: u16) -> Self {
        Self {
            vx,
            omega,
            duration_ms,
        }
    }

    /// The all-stop command.
    pub fn stop() -> Self {
        Self::default()
    }
}

impl WireMessage for DriveCmd {
    const TYPE_ID: MessageTypeId = MessageTypeId(1);
    const WIRE_SIZE: usize = 10;

    fn encode(&self, dst: &mut [u8]) -> bool {
        if !self.vx.is_finite() || !self.omega.is_finite() {
            return false;
        }
        BigEndian::write_f32(&mut dst[0..4], self.vx);
        BigEndian::write_f32(&mut dst[4..8], self.omega);
        BigEndian::write_u16(&mut dst[8..10], self.duration_ms);
        true
    }

    fn decode(src: &[u8]) -> Option<Self> {
        let vx = BigEndian::read_f32(&src[0..4]);
        let omega = BigEndian::read_f32(&src[4..8]);
        if !vx.is_finite() || !omega.is_finite() {
            return None;
        }
        Some(Self {
            vx,
            omega,
            duration_ms: BigEndian::read_u16(&src[8..10]),
        })
    }
}

impl TimedMessage for DriveCmd {
    fn duration_ms(&self) -> u16 {
        self.duration_ms
    }
}

/// Drivetrain state snapshot sent back to the planner.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DrivetrainState {
    /// Measured linear velocity, m/s.
    pub vx_actual: f32,
    /// Measured angular velocity, rad/s.
    pub omega_actual: f32,
    /// Left encoder position, m.
    pub left_pos: f32,
    /// Right encoder position, m.
    pub right_pos: f32,
    /// Sample timestamp, ms since controller boot.
    pub timestamp_ms: u32,
}

impl WireMessage for DrivetrainState {
    const TYPE_ID: MessageTypeId = MessageTypeId(2);
    const WIRE_SIZE: usize = 20;

    fn encode(&self, dst: &mut [u8]) -> bool {
        let fields = [
            self.vx_actual,
            self.omega_actual,
            self.left_pos,
            self.right_pos,
        ];
        if fields.iter().any(|f| !f.is_finite()) {
            return false;
        }
        for (i, field) in fields.iter().enumerate() {
            BigEndian::write_f32(&mut dst[i * 4..i * 4 + 4], *field);
        }
        BigEndian::write_u32(&mut dst[16..20], self.timestamp_ms);
        true
    }

    fn decode(src: &[u8]) -> Option<Self> {
        let mut fields = [0f32; 4];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = BigEndian::read_f32(&src[i * 4..i * 4 + 4]);
            if !field.is_finite() {
                return None;
            }
        }
        Some(Self {
            vx_actual: fields[0],
            omega_actual: fields[1],
            left_pos: fields[2],
            right_pos: fields[3],
            timestamp_ms: BigEndian::read_u32(&src[16..20]),
        })
    }
}

/// Single encoder channel sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EncoderData {
    /// Shaft position, rotations.
    pub position: f32,
    /// Shaft velocity, rotations/s.
    pub velocity: f32,
    /// Sample timestamp, ms since controller boot.
    pub timestamp_ms: u32,
}

impl WireMessage for EncoderData {
    const TYPE_ID: MessageTypeId = MessageTypeId(3);
    const WIRE_SIZE: usize = 12;

    fn encode(&self, dst: &mut [u8]) -> bool {
        if !self.position.is_finite() || !self.velocity.is_finite() {
            return false;
        }
        BigEndian::write_f32(&mut dst[0..4], self.position);
        BigEndian::write_f32(&mut dst[4..8], self.velocity);
        BigEndian::write_u32(&mut dst[8..12], self.timestamp_ms);
        true
    }

    fn decode(src: &[u8]) -> Option<Self> {
        let position = BigEndian::read_f32(&src[0..4]);
        let velocity = BigEndian::read_f32(&src[4..8]);
        if !position.is_finite() || !velocity.is_finite() {
            return None;
        }
        Some(Self {
            position,
            velocity,
            timestamp_ms: BigEndian::read_u32(&src[8..12]),
        })
    }
}

/// Build a registry containing the built-in schema.
pub fn build_registry() -> Result<MessageRegistry> {
    Ok(MessageRegistry::builder()
        .register::<DriveCmd>()?
        .register::<DrivetrainState>()?
        .register::<EncoderData>()?
        .build())
}
