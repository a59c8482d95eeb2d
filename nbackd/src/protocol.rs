//! Wire protocol: closed tagged-variant message sets.
//!
//! JSON lines over the connection; every inbound and outbound message carries
//! a `type` tag, one variant per event, so handling is exhaustively checked at
//! compile time.

use serde::{Deserialize, Serialize};

use nback::adjudicator::Adjustment;
use nback::config::{GameConfig, Mode};
use nback::evaluator::AccuracyReport;
use nback::stimulus::{StimulusPacket, UserResponse};

use crate::store::SessionRecord;

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    10
}

/// Client -> daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    // Realtime game channel
    StartGame {
        mode: Mode,
        n_level: u32,
        #[serde(default)]
        block_size: Option<u32>,
        #[serde(default)]
        isi_seconds: Option<f64>,
    },
    /// Closes one trial: each accepted `UserResponse` consumes one of the
    /// block's `block_size` cursor advances.
    UserResponse {
        #[serde(flatten)]
        response: UserResponse,
    },
    /// Extra claim for another channel of the trial a `UserResponse` opens
    /// (e.g. both position and letter in one dual-mode window). Does not
    /// consume a cursor advance.
    RecordClaim {
        #[serde(flatten)]
        response: UserResponse,
    },
    PauseGame,
    ResumeGame,
    EndGame,

    // Non-realtime session management
    CreateSession {
        mode: Mode,
        n_level: u32,
        #[serde(default)]
        block_size: Option<u32>,
        #[serde(default)]
        isi_seconds: Option<f64>,
    },
    GetSession {
        session_id: String,
    },
    EndSession {
        session_id: String,
    },

    // Persisted-session sync boundary
    SyncSession {
        session_id: String,
    },
    ListSessions {
        #[serde(default = "default_page")]
        page: u32,
        #[serde(default = "default_limit")]
        limit: u32,
    },

    Health,
}

/// Daemon -> client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[allow(clippy::large_enum_variant)]
pub enum Event {
    SessionStart {
        session_id: String,
        config: GameConfig,
        total_trials: u32,
    },
    Stimulus {
        packet: StimulusPacket,
    },
    ScoreUpdate {
        accuracy: AccuracyReport,
        trial: u32,
    },
    BlockEnd {
        accuracy: AccuracyReport,
        suggestion: Adjustment,
        session_id: String,
    },
    SessionEnd {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accuracy: Option<AccuracyReport>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggestion: Option<Adjustment>,
    },

    SessionCreated {
        session_id: String,
        config: GameConfig,
        total_trials: u32,
    },
    SessionInfo {
        summary: nback::session::SessionSummary,
    },

    SessionSynced {
        session_id: String,
    },
    SessionList {
        records: Vec<SessionRecord>,
        page: u32,
        limit: u32,
        total: u32,
    },

    Health {
        connected_clients: u32,
        active_sessions: u32,
        tracked_sessions: u32,
        stored_sessions: u32,
    },

    Success {
        message: String,
    },
    /// Structured failure; never a raw internal error.
    Error {
        code: String,
        message: String,
    },
}
