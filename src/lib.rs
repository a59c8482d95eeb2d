//! n-back training engine.
//!
//! Pure, synchronous game logic: stimulus sequence generation with controlled
//! match injection, response scoring against a trailing lag window, adaptive
//! difficulty suggestions, and the per-session state machine. No I/O and no
//! timers live here; pacing and delivery belong to the daemon (`nbackd`).

pub mod adjudicator;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod generator;
pub mod session;
pub mod stimulus;

pub use adjudicator::{suggest_adjustment, Adjustment};
pub use config::{Channel, GameConfig, Mode};
pub use error::EngineError;
pub use evaluator::AccuracyReport;
pub use session::{CompletionResult, GameSession, RespondOutcome, SessionState};
pub use stimulus::{ChannelValue, StimulusPacket, UserResponse};
