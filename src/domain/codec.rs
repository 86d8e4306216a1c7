//! Vehicle Command Protocol
//!
//! Every command is a single ASCII byte written to the link, with no framing,
//! delimiter or acknowledgment.
//!
//! | Intent                         | Byte            |
//! |--------------------------------|-----------------|
//! | Forward/Backward/Left/Right/Stop | `F` `B` `L` `R` `S` |
//! | Speed level 0-9                | `'0'`-`'9'`     |
//! | Speed level 10 (max)           | `'q'`           |
//! | Servo bucket 1-10              | `'a'`-`'j'`     |

use crate::domain::models::Movement;

/// Highest speed level; it has its own wire code instead of a digit.
pub const MAX_SPEED_LEVEL: u8 = 10;

/// Servo travel in degrees.
pub const MAX_ANGLE: f32 = 180.0;

/// Wire code sent for an out-of-range speed step.
const FALLBACK_SPEED_CODE: u8 = b'5';

/// Inclusive upper bounds of the first nine servo buckets (`'a'..='i'`).
const ANGLE_THRESHOLDS: [f32; 9] = [18.0, 36.0, 54.0, 72.0, 90.0, 108.0, 126.0, 144.0, 162.0];

impl Movement {
    pub fn wire_code(self) -> u8 {
        match self {
            Self::Forward => b'F',
            Self::Backward => b'B',
            Self::Left => b'L',
            Self::Right => b'R',
            Self::Stop => b'S',
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Forward => "Moving Forward",
            Self::Backward => "Moving Backward",
            Self::Left => "Turning Left",
            Self::Right => "Turning Right",
            Self::Stop => "Stopped",
        }
    }
}

/// Speed step for a normalized speed, or `None` when the step falls outside
/// `0..=MAX_SPEED_LEVEL` (including NaN and infinities).
pub fn speed_step(p: f32) -> Option<u8> {
    let step = (p * 10.0).floor();
    if step.is_finite() && (0.0..=f32::from(MAX_SPEED_LEVEL)).contains(&step) {
        Some(step as u8)
    } else {
        None
    }
}

/// Wire code for a normalized speed `p` in `[0, 1]`.
pub fn speed_code(p: f32) -> u8 {
    match speed_step(p) {
        Some(MAX_SPEED_LEVEL) => b'q',
        Some(step) => b'0' + step,
        None => FALLBACK_SPEED_CODE,
    }
}

/// Clamps an angle into servo travel. Non-finite input maps to the centre.
pub fn clamp_angle(a: f32) -> f32 {
    if a.is_finite() {
        a.clamp(0.0, MAX_ANGLE)
    } else {
        MAX_ANGLE / 2.0
    }
}

/// Wire code for a servo angle in degrees.
pub fn angle_code(a: f32) -> u8 {
    let a = clamp_angle(a);
    ANGLE_THRESHOLDS
        .iter()
        .position(|threshold| a <= *threshold)
        .map_or(b'j', |bucket| b'a' + bucket as u8)
}

/// A command the controller can put on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Move(Movement),
    /// Normalized speed, 0.0..=1.0
    Speed(f32),
    /// Servo angle in degrees, 0..=180
    Angle(f32),
}

impl Command {
    pub fn wire_code(&self) -> u8 {
        match *self {
            Self::Move(movement) => movement.wire_code(),
            Self::Speed(p) => speed_code(p),
            Self::Angle(a) => angle_code(a),
        }
    }

    /// Status text shown once the byte has been written.
    pub fn describe(&self) -> String {
        match *self {
            Self::Move(movement) => movement.describe().to_string(),
            Self::Speed(p) => match speed_step(p) {
                Some(MAX_SPEED_LEVEL) => "Speed set to max".to_string(),
                Some(step) => format!("Speed set to {}", step),
                None => "Speed set to 5".to_string(),
            },
            Self::Angle(a) => format!("Steering set to {:.0}°", clamp_angle(a)),
        }
    }
}
