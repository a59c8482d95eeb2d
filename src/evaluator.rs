//! Response scoring against the trailing lag window.
//!
//! Responses are kept in a per-channel map keyed by trial index, built
//! incrementally as they arrive, so evaluation never scans the response log.
//! A later response for the same (trial, channel) key overwrites the earlier
//! claim.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::config::Channel;
use crate::stimulus::{StimulusPacket, UserResponse};

/// Incremental per-channel claim maps for one session.
#[derive(Debug, Clone, Default)]
pub struct ResponseLedger {
    claims: HashMap<Channel, HashMap<u32, bool>>,
}

impl ResponseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins for a duplicate (trial, channel) key.
    pub fn record(&mut self, response: &UserResponse) {
        self.claims
            .entry(response.channel)
            .or_default()
            .insert(response.trial_index, response.is_match);
    }

    pub fn claim(&self, channel: Channel, trial_index: u32) -> Option<bool> {
        self.claims.get(&channel)?.get(&trial_index).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelAccuracy {
    pub channel: Channel,
    pub accuracy: f64,
}

/// Per-channel and combined accuracy, each in [0,1] rounded to 2 decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub channels: Vec<ChannelAccuracy>,
    pub combined: f64,
}

impl AccuracyReport {
    pub fn channel(&self, channel: Channel) -> Option<f64> {
        self.channels
            .iter()
            .find(|c| c.channel == channel)
            .map(|c| c.accuracy)
    }

    pub fn empty(channels: &[Channel]) -> Self {
        Self {
            channels: channels
                .iter()
                .map(|&channel| ChannelAccuracy {
                    channel,
                    accuracy: 0.0,
                })
                .collect(),
            combined: 0.0,
        }
    }
}

/// Scores all active channels over trials `n_level..upto_trial`.
///
/// Only trials past the lag window have ground truth. A missing claim for a
/// scorable trial counts as an implicit no-match. Returns all zeros (never a
/// division by zero) when no trial is scorable yet.
pub fn evaluate(
    sequence: &[StimulusPacket],
    ledger: &ResponseLedger,
    n_level: u32,
    channels: &[Channel],
    upto_trial: u32,
) -> AccuracyReport {
    let upto = (upto_trial as usize).min(sequence.len());
    let start = n_level as usize;

    let mut report = AccuracyReport {
        channels: Vec::with_capacity(channels.len()),
        combined: 0.0,
    };

    let mut sum = 0.0;
    for &channel in channels {
        let mut correct = 0u32;
        let mut scorable = 0u32;
        for i in start..upto {
            let truth = sequence[i].value_for(channel)
                == sequence[i - n_level as usize].value_for(channel);
            let claim = ledger.claim(channel, i as u32).unwrap_or(false);
            scorable += 1;
            if claim == truth {
                correct += 1;
            }
        }
        let accuracy = if scorable == 0 {
            0.0
        } else {
            round2(correct as f64 / scorable as f64)
        };
        sum += accuracy;
        report.channels.push(ChannelAccuracy { channel, accuracy });
    }

    report.combined = if channels.is_empty() {
        0.0
    } else {
        round2(sum / channels.len() as f64)
    };
    report
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
