//! Stimulus packets and user responses.

use serde::{Deserialize, Serialize};

use crate::config::Channel;

/// One channel's value for one trial.
///
/// Positions, colors, tones and shapes are indices into fixed tables owned by
/// the presentation layer; letters are drawn from the consonant alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelValue {
    Position(u32),
    Letter(char),
    Color(u32),
    Tone(u32),
    Shape(u32),
}

impl ChannelValue {
    pub fn channel(&self) -> Channel {
        match self {
            ChannelValue::Position(_) => Channel::Position,
            ChannelValue::Letter(_) => Channel::Letter,
            ChannelValue::Color(_) => Channel::Color,
            ChannelValue::Tone(_) => Channel::Tone,
            ChannelValue::Shape(_) => Channel::Shape,
        }
    }
}

/// One trial's stimuli across all active channels. Immutable once generated;
/// the full ordered sequence for a session is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusPacket {
    /// Ordinal in `0..block_size`.
    pub index: u32,
    /// One value per active channel, in the mode's channel order.
    pub values: Vec<ChannelValue>,
    /// Delivery hint: `session_start_ms + index * isi_ms`. The delivery loop's
    /// own pacing is authoritative, not this timestamp.
    pub scheduled_ts_ms: u64,
}

impl StimulusPacket {
    pub fn value_for(&self, channel: Channel) -> Option<ChannelValue> {
        self.values.iter().copied().find(|v| v.channel() == channel)
    }
}

/// A match/no-match claim for one (trial, channel).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserResponse {
    pub channel: Channel,
    pub is_match: bool,
    pub reaction_time_ms: u32,
    pub trial_index: u32,
    /// Wall-clock receipt time, set by the boundary that accepted the
    /// response.
    #[serde(default)]
    pub received_ts_ms: u64,
}
