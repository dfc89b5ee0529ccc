// Feetech STS serial bus servo protocol
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Status format: [0xFF, 0xFF, ID, Length, Error, Params..., Checksum]
//
// Steer servos run in position or velocity mode, drive servos in velocity mode.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 20;

/// Encoder ticks per output revolution
pub const POSITION_RESOLUTION: u16 = 4096;

/// Largest goal velocity the servo accepts (steps/s)
pub const MAX_VELOCITY: i16 = 3400;

/// Steps/s² per unit of the acceleration register (0 means no ramp)
pub const ACCELERATION_UNIT: f64 = 100.0;

/// Broadcast id used by sync write
const BROADCAST_ID: u8 = 0xFE;

const HEADER: [u8; 2] = [0xFF, 0xFF];

#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    SyncWrite = 0x83,
}

/// Control table entries used by the swerve runtime
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    ModelNumber = 3,      // 2 bytes, read-only
    OperatingMode = 33,   // 1 byte
    TorqueEnable = 40,    // 1 byte
    Acceleration = 41,    // 1 byte, units of ACCELERATION_UNIT
    GoalPosition = 42,    // 2 bytes
    GoalVelocity = 46,    // 2 bytes, sign-magnitude
    Lock = 55,            // 1 byte
    PresentPosition = 56, // 2 bytes
    PresentVelocity = 58, // 2 bytes, sign-magnitude
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
}

#[derive(Debug, thiserror::Error)]
pub enum FeetechError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from motor {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for motor {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Motor {id} returned error status: 0x{status:02X}")]
    MotorError { id: u8, status: u8 },

    #[error("Timeout waiting for response from motor {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, FeetechError>;

/// Sum checksum over everything after the header
fn checksum(data: &[u8]) -> u8 {
    let sum: u32 = data.iter().map(|&b| b as u32).sum();
    !(sum as u8)
}

/// Encode an instruction packet
pub fn encode_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(6 + params.len());
    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push((params.len() + 2) as u8);
    packet.push(instruction as u8);
    packet.extend_from_slice(params);
    let sum = checksum(&packet[2..]);
    packet.push(sum);
    packet
}

/// Validate the body of a status packet (everything after `Length`)
///
/// Returns the parameter bytes.
pub fn decode_status(id: u8, body: &[u8]) -> Result<&[u8]> {
    // error byte + checksum at minimum
    if body.len() < 2 {
        return Err(FeetechError::InvalidResponse {
            id,
            reason: format!("status body too short ({} bytes)", body.len()),
        });
    }

    let (payload, received) = body.split_at(body.len() - 1);
    let mut summed = vec![id, body.len() as u8];
    summed.extend_from_slice(payload);
    if checksum(&summed) != received[0] {
        return Err(FeetechError::ChecksumMismatch { id });
    }

    if payload[0] != 0 {
        return Err(FeetechError::MotorError {
            id,
            status: payload[0],
        });
    }

    Ok(&payload[1..])
}

/// Feetech uses sign-magnitude: bit 15 = negative, bits 0-14 = magnitude
/// Register values for a position-mode motion profile
///
/// # Arguments
/// * `cruise_velocity` - Steps/s, clamped to 1..=MAX_VELOCITY
/// * `acceleration` - Steps/s², rounded to the register unit and kept non-zero
pub fn position_profile(cruise_velocity: f64, acceleration: f64) -> (u8, u16) {
    let accel = (acceleration / ACCELERATION_UNIT).round().clamp(1.0, 254.0) as u8;
    let speed = cruise_velocity.round().clamp(1.0, MAX_VELOCITY as f64) as u16;
    (accel, speed)
}

fn encode_sign_magnitude(value: i16) -> u16 {
    let magnitude = value.unsigned_abs().min(0x7FFF);
    if value < 0 { 0x8000 | magnitude } else { magnitude }
}

fn decode_sign_magnitude(raw: u16) -> i16 {
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 { -magnitude } else { magnitude }
}

/// Serial connection to a chain of Feetech servos
pub struct FeetechBus {
    port: Box<dyn SerialPort>,
}

impl FeetechBus {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        Ok(Self { port })
    }

    fn send(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(&mut self, id: u8) -> Result<Vec<u8>> {
        let mut head = [0u8; 4];
        self.port.read_exact(&mut head).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                FeetechError::Timeout { id }
            } else {
                FeetechError::Io(e)
            }
        })?;

        if head[..2] != HEADER {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("bad header {:02X?}", &head[..2]),
            });
        }
        if head[2] != id {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("answer came from motor {}", head[2]),
            });
        }

        let mut body = vec![0u8; head[3] as usize];
        self.port.read_exact(&mut body)?;
        decode_status(id, &body).map(|params| params.to_vec())
    }

    fn transact(&mut self, id: u8, instruction: Instruction, params: &[u8]) -> Result<Vec<u8>> {
        let packet = encode_packet(id, instruction, params);
        self.send(&packet)?;
        self.receive(id)
    }

    /// `Ok(false)` when the servo does not answer
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        match self.transact(id, Instruction::Ping, &[]) {
            Ok(_) => Ok(true),
            Err(FeetechError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        debug!("motor {} {:?} <- {}", id, register, value);
        self.transact(id, Instruction::Write, &[register as u8, value])
            .map(|_| ())
    }

    pub fn write_u16(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        debug!("motor {} {:?} <- {}", id, register, value);
        let [lo, hi] = value.to_le_bytes();
        self.transact(id, Instruction::Write, &[register as u8, lo, hi])
            .map(|_| ())
    }

    pub fn read_u8(&mut self, id: u8, register: Register) -> Result<u8> {
        let params = self.transact(id, Instruction::Read, &[register as u8, 1])?;
        params.first().copied().ok_or(FeetechError::InvalidResponse {
            id,
            reason: "expected 1 byte, got none".to_string(),
        })
    }

    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        let params = self.transact(id, Instruction::Read, &[register as u8, 2])?;
        match params.as_slice() {
            [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(FeetechError::InvalidResponse {
                id,
                reason: format!("expected 2 bytes, got {}", params.len()),
            }),
        }
    }

    /// Write the same 2-byte register on several servos in one packet (no reply)
    pub fn sync_write_u16(&mut self, register: Register, data: &[(u8, u16)]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut params = Vec::with_capacity(2 + 3 * data.len());
        params.push(register as u8);
        params.push(2);
        for &(id, value) in data {
            params.push(id);
            params.extend_from_slice(&value.to_le_bytes());
        }
        debug!("sync write {:?} to {} motors", register, data.len());
        self.send(&encode_packet(BROADCAST_ID, Instruction::SyncWrite, &params))
    }

    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)?;
        self.write_u8(id, Register::Lock, 1)
    }

    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)?;
        self.write_u8(id, Register::Lock, 0)
    }

    /// Torque must be off while switching modes
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, mode as u8)
    }

    /// Running speed and ramp used to reach goal positions
    pub fn set_position_profile(&mut self, id: u8, acceleration: u8, speed: u16) -> Result<()> {
        self.write_u8(id, Register::Acceleration, acceleration)?;
        self.write_u16(id, Register::GoalVelocity, speed)
    }

    pub fn model_number(&mut self, id: u8) -> Result<u16> {
        self.read_u16(id, Register::ModelNumber)
    }

    /// Single-turn position, 0..POSITION_RESOLUTION
    pub fn get_position(&mut self, id: u8) -> Result<u16> {
        self.read_u16(id, Register::PresentPosition)
    }

    /// Goal position, wrapped into one turn
    pub fn set_position(&mut self, id: u8, ticks: i64) -> Result<()> {
        let wrapped = ticks.rem_euclid(POSITION_RESOLUTION as i64) as u16;
        self.write_u16(id, Register::GoalPosition, wrapped)
    }

    pub fn set_velocity(&mut self, id: u8, velocity: i16) -> Result<()> {
        self.write_u16(id, Register::GoalVelocity, encode_sign_magnitude(velocity))
    }

    pub fn get_velocity(&mut self, id: u8) -> Result<i16> {
        let raw = self.read_u16(id, Register::PresentVelocity)?;
        Ok(decode_sign_magnitude(raw))
    }

    /// Set goal velocities on several servos at once
    pub fn sync_set_velocity(&mut self, data: &[(u8, i16)]) -> Result<()> {
        let encoded: Vec<(u8, u16)> = data
            .iter()
            .map(|&(id, v)| (id, encode_sign_magnitude(v)))
            .collect();
        self.sync_write_u16(Register::GoalVelocity, &encoded)
    }
}
