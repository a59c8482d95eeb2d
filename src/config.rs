//! Game configuration, modes, and engine constants.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Probability that a trial past the lag window is overwritten with a
/// deliberate n-back match, per channel.
pub const MATCH_INJECTION_PROBABILITY: f64 = 0.3;

/// Every active channel must reach this accuracy for a promote suggestion.
pub const PROMOTION_THRESHOLD: f64 = 0.8;

/// Any active channel below this accuracy yields a demote suggestion.
pub const DEMOTION_THRESHOLD: f64 = 0.5;

pub const DEFAULT_BLOCK_SIZE: u32 = 20;
pub const DEFAULT_ISI_SECONDS: f64 = 2.5;

pub const MIN_N_LEVEL: u32 = 1;
pub const MAX_N_LEVEL: u32 = 10;
pub const MAX_BLOCK_SIZE: u32 = 500;

/// Fixed 20-consonant alphabet for the letter channel.
pub const CONSONANTS: [char; 20] = [
    'B', 'C', 'D', 'F', 'G', 'H', 'J', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'V', 'W', 'X',
    'Z',
];

/// 3x3 grid for the position channel.
pub const GRID_CELLS: u32 = 9;

/// Palette size for the color channel and tone count for the tone channel.
/// Indices map to the presentation layer's palette / tone table.
pub const COLOR_COUNT: u32 = 9;
pub const TONE_COUNT: u32 = 9;
pub const SHAPE_COUNT: u32 = 9;

/// One stimulus modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Position,
    Letter,
    Color,
    Tone,
    Shape,
}

impl Channel {
    pub fn label(self) -> &'static str {
        match self {
            Channel::Position => "position",
            Channel::Letter => "letter",
            Channel::Color => "color",
            Channel::Tone => "tone",
            Channel::Shape => "shape",
        }
    }
}

/// Which channel set a session runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Dual,
    Quad,
    Penta,
}

impl Mode {
    pub fn channels(self) -> &'static [Channel] {
        match self {
            Mode::Dual => &[Channel::Position, Channel::Letter],
            Mode::Quad => &[
                Channel::Position,
                Channel::Letter,
                Channel::Color,
                Channel::Tone,
            ],
            Mode::Penta => &[
                Channel::Position,
                Channel::Letter,
                Channel::Color,
                Channel::Tone,
                Channel::Shape,
            ],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Mode::Dual => "dual",
            Mode::Quad => "quad",
            Mode::Penta => "penta",
        }
    }
}

/// Immutable per-session configuration. The n-level is fixed for the lifetime
/// of one block; adjustment suggestions apply to the *next* session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    pub mode: Mode,
    pub n_level: u32,
    pub block_size: u32,
    /// Inter-stimulus interval in seconds. Zero means unpaced delivery
    /// (test mode); negative or non-finite values are rejected.
    pub isi_seconds: f64,
}

impl GameConfig {
    pub fn new(mode: Mode, n_level: u32) -> Self {
        Self {
            mode,
            n_level,
            block_size: DEFAULT_BLOCK_SIZE,
            isi_seconds: DEFAULT_ISI_SECONDS,
        }
    }

    /// Rejects malformed configs synchronously, before any session state is
    /// created.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.n_level < MIN_N_LEVEL || self.n_level > MAX_N_LEVEL {
            return Err(EngineError::Validation(format!(
                "n_level must be in {}..={}, got {}",
                MIN_N_LEVEL, MAX_N_LEVEL, self.n_level
            )));
        }
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(EngineError::Validation(format!(
                "block_size must be in 1..={}, got {}",
                MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.n_level >= self.block_size {
            return Err(EngineError::Validation(format!(
                "n_level ({}) must be smaller than block_size ({})",
                self.n_level, self.block_size
            )));
        }
        if !self.isi_seconds.is_finite() || self.isi_seconds < 0.0 {
            return Err(EngineError::Validation(format!(
                "isi_seconds must be finite and >= 0, got {}",
                self.isi_seconds
            )));
        }
        Ok(())
    }

    pub fn isi_ms(&self) -> u64 {
        (self.isi_seconds * 1000.0).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_channel_sets() {
        assert_eq!(Mode::Dual.channels().len(), 2);
        assert_eq!(Mode::Quad.channels().len(), 4);
        assert_eq!(Mode::Penta.channels().len(), 5);
        assert!(Mode::Penta.channels().contains(&Channel::Shape));
    }

    #[test]
    fn validate_rejects_bad_configs() {
        let mut c = GameConfig::new(Mode::Dual, 2);
        assert!(c.validate().is_ok());

        c.n_level = 0;
        assert!(matches!(c.validate(), Err(EngineError::Validation(_))));

        c.n_level = 11;
        assert!(matches!(c.validate(), Err(EngineError::Validation(_))));

        c = GameConfig::new(Mode::Dual, 2);
        c.block_size = 0;
        assert!(matches!(c.validate(), Err(EngineError::Validation(_))));

        c = GameConfig::new(Mode::Dual, 5);
        c.block_size = 5;
        assert!(matches!(c.validate(), Err(EngineError::Validation(_))));

        c = GameConfig::new(Mode::Dual, 2);
        c.isi_seconds = -1.0;
        assert!(matches!(c.validate(), Err(EngineError::Validation(_))));

        c.isi_seconds = f64::NAN;
        assert!(matches!(c.validate(), Err(EngineError::Validation(_))));

        // Unpaced test mode is explicitly allowed.
        c.isi_seconds = 0.0;
        assert!(c.validate().is_ok());
    }
}
