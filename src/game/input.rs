//! Control intents shared by human viewers and the AI

use serde::{Deserialize, Serialize};

use crate::game::constants::input_flags;
use crate::util::vec2::Vec2;

/// Viewer (client connection) identifier assigned by the session layer
pub type ViewerId = u32;

/// Synthetic control record
///
/// A human client and the AI produce exactly the same shape, so the physics
/// phase never needs to know who is driving an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Inputs {
    pub flags: u32,
    /// Movement direction in radians
    pub movement_angle: f32,
    /// 0..=1
    pub movement_magnitude: f32,
    /// Aim point in world coordinates
    pub mouse: Vec2,
}

impl Inputs {
    #[inline]
    pub fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    #[inline]
    pub fn attempting_shot(&self) -> bool {
        self.has(input_flags::LEFT_CLICK)
    }

    #[inline]
    pub fn attempting_repel(&self) -> bool {
        self.has(input_flags::RIGHT_CLICK)
    }

    /// Desired movement as a vector of length <= 1
    ///
    /// An explicit angle/magnitude wins; otherwise the direction keys are
    /// combined (up/left/down/right).
    pub fn movement(&self) -> Vec2 {
        if self.movement_magnitude > 0.0 {
            return Vec2::from_angle(self.movement_angle) * self.movement_magnitude;
        }

        let mut direction = Vec2::ZERO;
        if self.has(input_flags::UP) {
            direction.y -= 1.0;
        }
        if self.has(input_flags::DOWN) {
            direction.y += 1.0;
        }
        if self.has(input_flags::LEFT) {
            direction.x -= 1.0;
        }
        if self.has(input_flags::RIGHT) {
            direction.x += 1.0;
        }
        direction.normalize()
    }

    /// Reject values no client could legitimately send
    pub fn validate(&self) -> Result<(), InputError> {
        if !self.movement_angle.is_finite() {
            return Err(InputError::NonFinite("movement_angle"));
        }
        if !self.movement_magnitude.is_finite() {
            return Err(InputError::NonFinite("movement_magnitude"));
        }
        if !self.mouse.is_finite() {
            return Err(InputError::NonFinite("mouse"));
        }
        if !(0.0..=1.0).contains(&self.movement_magnitude) {
            return Err(InputError::MagnitudeOutOfRange(self.movement_magnitude));
        }
        if self.flags & !input_flags::ALL != 0 {
            return Err(InputError::UnknownFlags(self.flags));
        }
        Ok(())
    }
}

/// Input message from a viewer connection
#[derive(Debug, Clone)]
pub struct InputMessage {
    pub viewer: ViewerId,
    pub inputs: Inputs,
}

/// Malformed input frame
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
    #[error("movement magnitude {0} outside 0..=1")]
    MagnitudeOutOfRange(f32),
    #[error("unknown input flags {0:#x}")]
    UnknownFlags(u32),
}

/// Who drives an entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Controller {
    /// Not controllable on its own (projectiles, decorations)
    #[default]
    None,
    /// Driven by a connected viewer
    Player(ViewerId),
    /// Driven by the entity's own AI state machine
    Ai,
}

impl Controller {
    #[inline]
    pub fn is_some(&self) -> bool {
        !matches!(self, Controller::None)
    }
}
