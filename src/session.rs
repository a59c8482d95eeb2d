//! Per-session lifecycle state machine.
//!
//! One `GameSession` is exclusively owned by whoever drives it (the daemon
//! wraps it in a per-session mutex); the registry refers to it by id only.
//! Delivery (timer-driven) and responses (channel-driven) both mutate the
//! session through that single owner, so the two cursors here never race.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::adjudicator::{suggest_adjustment, Adjustment};
use crate::config::{Channel, GameConfig};
use crate::error::EngineError;
use crate::evaluator::{evaluate, AccuracyReport, ResponseLedger};
use crate::generator;
use crate::stimulus::{StimulusPacket, UserResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Running,
    Paused,
    Completed,
    Ended,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Ended)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Attached to the final response of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub session_id: String,
    pub accuracy: AccuracyReport,
    pub suggestion: Adjustment,
}

/// What `respond` hands back while the block is still in flight or on the
/// trial that completes it.
#[derive(Debug, Clone, PartialEq)]
pub struct RespondOutcome {
    pub accuracy: AccuracyReport,
    pub trial: u32,
    pub next_stimulus: Option<StimulusPacket>,
    pub completion: Option<CompletionResult>,
}

/// Durable record counts for one finished session, in the shape the sync
/// boundary persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub config: GameConfig,
    pub state: SessionState,
    pub started_at_ms: u64,
    pub ended_at_ms: Option<u64>,
    pub trials_completed: u32,
    pub correct_responses: u32,
    pub false_alarms: u32,
    pub misses: u32,
    pub accuracy: AccuracyReport,
    pub average_reaction_time_ms: f64,
}

#[derive(Debug)]
pub struct GameSession {
    id: String,
    config: GameConfig,
    sequence: Vec<StimulusPacket>,
    ledger: ResponseLedger,
    responses: Vec<UserResponse>,
    /// Stimuli handed to the delivery channel so far.
    delivered: u32,
    /// Trials closed by an accepted response.
    trial_cursor: u32,
    state: SessionState,
    started_at_ms: u64,
    ended_at_ms: Option<u64>,
}

impl GameSession {
    /// Validates the config and fixes the full stimulus sequence up front;
    /// nothing is re-randomized mid-session. The session starts in `Created`
    /// and delivers nothing until `start`.
    pub fn new<R: Rng>(
        config: GameConfig,
        rng: &mut R,
        now_ms: u64,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let id = new_session_id(rng);
        let sequence = generator::generate(&config, rng, now_ms);
        Ok(Self {
            id,
            config,
            sequence,
            ledger: ResponseLedger::new(),
            responses: Vec::with_capacity(config.block_size as usize),
            delivered: 0,
            trial_cursor: 0,
            state: SessionState::Created,
            started_at_ms: now_ms,
            ended_at_ms: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channels(&self) -> &'static [Channel] {
        self.config.mode.channels()
    }

    pub fn sequence(&self) -> &[StimulusPacket] {
        &self.sequence
    }

    pub fn responses(&self) -> &[UserResponse] {
        &self.responses
    }

    pub fn delivered(&self) -> u32 {
        self.delivered
    }

    pub fn trial_cursor(&self) -> u32 {
        self.trial_cursor
    }

    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    pub fn ended_at_ms(&self) -> Option<u64> {
        self.ended_at_ms
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state != SessionState::Created {
            return Err(EngineError::InvalidTransition {
                from: self.state,
                op: "start",
            });
        }
        self.state = SessionState::Running;
        Ok(())
    }

    /// The next undelivered packet, in strict index order. `None` once the
    /// whole block went out or while the session is not running.
    pub fn next_to_deliver(&self) -> Option<&StimulusPacket> {
        if self.state != SessionState::Running {
            return None;
        }
        self.sequence.get(self.delivered as usize)
    }

    /// Called by the delivery loop after a packet actually went out, so a
    /// cancelled loop can never double-deliver.
    pub fn mark_delivered(&mut self) {
        debug_assert!(self.delivered < self.config.block_size);
        self.delivered = (self.delivered + 1).min(self.config.block_size);
    }

    /// Records one response, advances the trial cursor, re-evaluates, and
    /// completes the block when the cursor reaches `block_size`.
    pub fn respond(&mut self, mut response: UserResponse, now_ms: u64) -> Result<RespondOutcome, EngineError> {
        if self.state != SessionState::Running {
            return Err(EngineError::SessionNotActive { state: self.state });
        }
        if response.trial_index >= self.config.block_size {
            return Err(EngineError::Validation(format!(
                "trial_index {} outside block of {} trials",
                response.trial_index, self.config.block_size
            )));
        }
        if !self.channels().contains(&response.channel) {
            return Err(EngineError::Validation(format!(
                "channel {} not active in {} mode",
                response.channel.label(),
                self.config.mode.label()
            )));
        }

        response.received_ts_ms = now_ms;
        self.ledger.record(&response);
        self.responses.push(response);
        self.trial_cursor += 1;

        if self.trial_cursor >= self.config.block_size {
            // Completes exactly once: respond rejects anything after this.
            self.state = SessionState::Completed;
            self.ended_at_ms = Some(now_ms);
            let accuracy = self.evaluate_upto(self.config.block_size);
            let suggestion = suggest_adjustment(&accuracy);
            return Ok(RespondOutcome {
                accuracy: accuracy.clone(),
                trial: self.trial_cursor,
                next_stimulus: None,
                completion: Some(CompletionResult {
                    session_id: self.id.clone(),
                    accuracy,
                    suggestion,
                }),
            });
        }

        let accuracy = self.evaluate_upto(self.trial_cursor);
        let next_stimulus = self.sequence.get(self.trial_cursor as usize).cloned();
        Ok(RespondOutcome {
            accuracy,
            trial: self.trial_cursor,
            next_stimulus,
            completion: None,
        })
    }

    /// Records an additional claim for an already-open trial without
    /// advancing the trial cursor. Used for the second and later per-channel
    /// keypresses inside one trial window; the same (trial, channel) key
    /// overwrites.
    pub fn record_claim(&mut self, mut response: UserResponse, now_ms: u64) -> Result<(), EngineError> {
        if self.state != SessionState::Running {
            return Err(EngineError::SessionNotActive { state: self.state });
        }
        if response.trial_index >= self.config.block_size {
            return Err(EngineError::Validation(format!(
                "trial_index {} outside block of {} trials",
                response.trial_index, self.config.block_size
            )));
        }
        if !self.channels().contains(&response.channel) {
            return Err(EngineError::Validation(format!(
                "channel {} not active in {} mode",
                response.channel.label(),
                self.config.mode.label()
            )));
        }
        response.received_ts_ms = now_ms;
        self.ledger.record(&response);
        self.responses.push(response);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), EngineError> {
        if self.state != SessionState::Running {
            return Err(EngineError::InvalidTransition {
                from: self.state,
                op: "pause",
            });
        }
        self.state = SessionState::Paused;
        Ok(())
    }

    /// Resumes delivery from the exact cursor; nothing is recomputed.
    pub fn resume(&mut self) -> Result<(), EngineError> {
        if self.state != SessionState::Paused {
            return Err(EngineError::InvalidTransition {
                from: self.state,
                op: "resume",
            });
        }
        self.state = SessionState::Running;
        Ok(())
    }

    pub fn end(&mut self, now_ms: u64) -> Result<(), EngineError> {
        if self.state.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: self.state,
                op: "end",
            });
        }
        self.state = SessionState::Ended;
        self.ended_at_ms = Some(now_ms);
        Ok(())
    }

    /// Running accuracy over the trials closed so far.
    pub fn current_accuracy(&self) -> AccuracyReport {
        self.evaluate_upto(self.trial_cursor)
    }

    fn evaluate_upto(&self, upto: u32) -> AccuracyReport {
        evaluate(
            &self.sequence,
            &self.ledger,
            self.config.n_level,
            self.channels(),
            upto,
        )
    }

    /// Snapshot for the management surface and the sync boundary.
    pub fn summary(&self) -> SessionSummary {
        let n = self.config.n_level as usize;
        let upto = (self.trial_cursor as usize).min(self.sequence.len());

        let mut correct = 0u32;
        let mut false_alarms = 0u32;
        let mut misses = 0u32;
        for &channel in self.channels() {
            for i in n..upto {
                let truth = self.sequence[i].value_for(channel)
                    == self.sequence[i - n].value_for(channel);
                match self.ledger.claim(channel, i as u32) {
                    Some(claim) => {
                        if claim == truth {
                            correct += 1;
                        } else if claim {
                            false_alarms += 1;
                        }
                    }
                    None => {
                        if truth {
                            misses += 1;
                        } else {
                            correct += 1;
                        }
                    }
                }
            }
        }

        let average_reaction_time_ms = if self.responses.is_empty() {
            0.0
        } else {
            self.responses
                .iter()
                .map(|r| r.reaction_time_ms as f64)
                .sum::<f64>()
                / self.responses.len() as f64
        };

        SessionSummary {
            session_id: self.id.clone(),
            config: self.config,
            state: self.state,
            started_at_ms: self.started_at_ms,
            ended_at_ms: self.ended_at_ms,
            trials_completed: self.trial_cursor,
            correct_responses: correct,
            false_alarms,
            misses,
            accuracy: self.evaluate_upto(self.trial_cursor),
            average_reaction_time_ms,
        }
    }
}

/// Opaque unique token; 32 hex chars from the injected random source.
fn new_session_id<R: Rng>(rng: &mut R) -> String {
    format!("{:032x}", rng.random::<u128>())
}
