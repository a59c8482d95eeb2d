//! Session registry and delivery channel.
//!
//! Maps connection identity to at most one bound session, owns the per-session
//! delivery tasks, and reconciles disconnects. Each session lives behind its
//! own mutex; the registry map itself only needs insert/remove/lookup
//! atomicity, so sessions proceed in parallel with no shared mutable state
//! beyond the lookup table.
//!
//! Cancellation discipline: a session's delivery task is cancelled *and
//! joined* before any new task for the same session is armed, so pause/resume
//! can never leave two delivery loops racing on one session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nback::config::{GameConfig, Mode};
use nback::error::EngineError;
use nback::session::{GameSession, SessionSummary};
use nback::stimulus::UserResponse;

use crate::protocol::Event;

pub type EventSender = mpsc::UnboundedSender<Event>;
pub type ConnectionId = u64;

/// Terminal sessions older than this are removed by the sweep.
pub const RETENTION_MS: u64 = 24 * 60 * 60 * 1000;
/// How often the sweep runs.
pub const SWEEP_INTERVAL_SECS: u64 = 60 * 60;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct DeliveryTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct SessionEntry {
    session: Arc<Mutex<GameSession>>,
    delivery: Option<DeliveryTask>,
    owner: Option<ConnectionId>,
}

struct ConnectionEntry {
    tx: EventSender,
    session_id: Option<String>,
}

#[derive(Default)]
struct Inner {
    next_conn_id: ConnectionId,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    sessions: HashMap<String, SessionEntry>,
}

pub struct Registry {
    inner: Mutex<Inner>,
    rng: std::sync::Mutex<StdRng>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            rng: std::sync::Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic sequences and session ids, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            rng: std::sync::Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn new_session(&self, config: GameConfig, now: u64) -> Result<GameSession, EngineError> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        GameSession::new(config, &mut *rng, now)
    }

    // ── Connection lifecycle ──────────────────────────────────────────────

    pub async fn on_connect(&self, tx: EventSender) -> ConnectionId {
        let mut inner = self.inner.lock().await;
        inner.next_conn_id += 1;
        let id = inner.next_conn_id;
        inner.connections.insert(
            id,
            ConnectionEntry {
                tx,
                session_id: None,
            },
        );
        id
    }

    /// Ends any owned active session and releases its delivery task. No event
    /// is emitted; the receiver is gone.
    pub async fn on_disconnect(&self, conn_id: ConnectionId) {
        let mut inner = self.inner.lock().await;
        let Some(conn) = inner.connections.remove(&conn_id) else {
            return;
        };
        if let Some(session_id) = conn.session_id {
            Self::teardown_session(&mut inner, &session_id, now_ms()).await;
            info!(conn_id, session_id, "Ended session on disconnect");
        }
    }

    // ── Realtime game channel ─────────────────────────────────────────────

    /// Creates, binds, announces and starts delivering a new session for the
    /// connection. A previously bound session is ended first so its timer can
    /// never outlive the binding.
    pub async fn on_start(
        &self,
        conn_id: ConnectionId,
        mode: Mode,
        n_level: u32,
        block_size: Option<u32>,
        isi_seconds: Option<f64>,
    ) -> Result<(), EngineError> {
        let now = now_ms();
        let mut config = GameConfig::new(mode, n_level);
        if let Some(b) = block_size {
            config.block_size = b;
        }
        if let Some(isi) = isi_seconds {
            config.isi_seconds = isi;
        }

        // Validation happens before any state changes.
        let mut session = self.new_session(config, now)?;
        session.start()?;
        let session_id = session.id().to_string();
        let total_trials = config.block_size;

        let mut inner = self.inner.lock().await;
        let tx = {
            let conn = inner
                .connections
                .get(&conn_id)
                .ok_or_else(|| EngineError::DeliveryFailure("unknown connection".to_string()))?;
            conn.tx.clone()
        };

        if let Some(old_id) = inner
            .connections
            .get_mut(&conn_id)
            .and_then(|c| c.session_id.take())
        {
            warn!(conn_id, old_id, "Replacing still-bound session");
            Self::teardown_session(&mut inner, &old_id, now).await;
        }

        let session = Arc::new(Mutex::new(session));
        let _ = tx.send(Event::SessionStart {
            session_id: session_id.clone(),
            config,
            total_trials,
        });

        let delivery = spawn_delivery(Arc::clone(&session), tx);
        inner.sessions.insert(
            session_id.clone(),
            SessionEntry {
                session,
                delivery: Some(delivery),
                owner: Some(conn_id),
            },
        );
        if let Some(conn) = inner.connections.get_mut(&conn_id) {
            conn.session_id = Some(session_id.clone());
        }

        info!(conn_id, session_id, "Game started");
        Ok(())
    }

    /// Forwards a response to the bound session; emits `ScoreUpdate`, and on
    /// block completion `BlockEnd` then `SessionEnd`.
    pub async fn on_response(
        &self,
        conn_id: ConnectionId,
        response: UserResponse,
    ) -> Result<(), EngineError> {
        let (session, session_id, tx) = self.bound_session(conn_id).await?;

        let outcome = {
            let mut s = session.lock().await;
            s.respond(response, now_ms())?
        };

        let _ = tx.send(Event::ScoreUpdate {
            accuracy: outcome.accuracy.clone(),
            trial: outcome.trial,
        });

        if let Some(done) = outcome.completion {
            let _ = tx.send(Event::BlockEnd {
                accuracy: done.accuracy.clone(),
                suggestion: done.suggestion,
                session_id: session_id.clone(),
            });
            let _ = tx.send(Event::SessionEnd {
                reason: "Completed successfully".to_string(),
                accuracy: Some(done.accuracy),
                suggestion: Some(done.suggestion),
            });

            let mut inner = self.inner.lock().await;
            if let Some(conn) = inner.connections.get_mut(&conn_id) {
                conn.session_id = None;
            }
            if let Some(entry) = inner.sessions.get_mut(&session_id) {
                entry.owner = None;
                Self::stop_delivery(entry).await;
            }
            info!(conn_id, session_id, "Block completed");
        }
        Ok(())
    }

    /// Records an extra channel claim for the trial a `UserResponse` already
    /// opened, without advancing the trial cursor, and reports the running
    /// accuracy.
    pub async fn on_claim(
        &self,
        conn_id: ConnectionId,
        response: UserResponse,
    ) -> Result<(), EngineError> {
        let (session, _session_id, tx) = self.bound_session(conn_id).await?;
        let (accuracy, trial) = {
            let mut s = session.lock().await;
            s.record_claim(response, now_ms())?;
            (s.current_accuracy(), s.trial_cursor())
        };
        let _ = tx.send(Event::ScoreUpdate { accuracy, trial });
        Ok(())
    }

    /// Cancels the pending delivery without touching cursor or state.
    pub async fn on_pause(&self, conn_id: ConnectionId) -> Result<(), EngineError> {
        let (session, session_id, _tx) = self.bound_session(conn_id).await?;
        session.lock().await.pause()?;

        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.sessions.get_mut(&session_id) {
            Self::stop_delivery(entry).await;
        }
        info!(conn_id, session_id, "Game paused");
        Ok(())
    }

    /// Re-arms delivery from the exact cursor. The paused task was already
    /// joined; a stale one is joined again here before the new task is
    /// spawned.
    pub async fn on_resume(&self, conn_id: ConnectionId) -> Result<(), EngineError> {
        let (session, session_id, tx) = self.bound_session(conn_id).await?;
        session.lock().await.resume()?;

        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.sessions.get_mut(&session_id) {
            Self::stop_delivery(entry).await;
            entry.delivery = Some(spawn_delivery(Arc::clone(&entry.session), tx));
        }
        info!(conn_id, session_id, "Game resumed");
        Ok(())
    }

    /// Explicit termination: ends the session, releases its timer, unbinds
    /// the connection, and reports the end.
    pub async fn on_end(&self, conn_id: ConnectionId) -> Result<(), EngineError> {
        let (session, session_id, tx) = self.bound_session(conn_id).await?;
        session.lock().await.end(now_ms())?;

        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.sessions.get_mut(&session_id) {
            entry.owner = None;
            Self::stop_delivery(entry).await;
        }
        if let Some(conn) = inner.connections.get_mut(&conn_id) {
            conn.session_id = None;
        }
        drop(inner);

        let _ = tx.send(Event::SessionEnd {
            reason: "Manual termination".to_string(),
            accuracy: None,
            suggestion: None,
        });
        info!(conn_id, session_id, "Game ended");
        Ok(())
    }

    // ── Non-realtime management surface ───────────────────────────────────

    /// Creates an unbound session with no delivery; it stays in `Created`
    /// until a caller drives it.
    pub async fn create_session(
        &self,
        mode: Mode,
        n_level: u32,
        block_size: Option<u32>,
        isi_seconds: Option<f64>,
    ) -> Result<(String, GameConfig, u32), EngineError> {
        let mut config = GameConfig::new(mode, n_level);
        if let Some(b) = block_size {
            config.block_size = b;
        }
        if let Some(isi) = isi_seconds {
            config.isi_seconds = isi;
        }
        let session = self.new_session(config, now_ms())?;
        let session_id = session.id().to_string();

        let mut inner = self.inner.lock().await;
        inner.sessions.insert(
            session_id.clone(),
            SessionEntry {
                session: Arc::new(Mutex::new(session)),
                delivery: None,
                owner: None,
            },
        );
        info!(session_id, "Session created");
        Ok((session_id, config, config.block_size))
    }

    pub async fn session_summary(&self, session_id: &str) -> Result<SessionSummary, EngineError> {
        let session = {
            let inner = self.inner.lock().await;
            let entry = inner
                .sessions
                .get(session_id)
                .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
            Arc::clone(&entry.session)
        };
        let s = session.lock().await;
        Ok(s.summary())
    }

    /// Ends a session by id. If a connection owns it, that connection is
    /// unbound and notified.
    pub async fn end_session(&self, session_id: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        let owner = {
            let entry = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
            entry.session.lock().await.end(now_ms())?;
            Self::stop_delivery(entry).await;
            entry.owner.take()
        };
        let owner_tx = owner.and_then(|conn_id| {
            let conn = inner.connections.get_mut(&conn_id)?;
            conn.session_id = None;
            Some(conn.tx.clone())
        });
        drop(inner);

        if let Some(tx) = owner_tx {
            let _ = tx.send(Event::SessionEnd {
                reason: "Manual termination".to_string(),
                accuracy: None,
                suggestion: None,
            });
        }
        info!(session_id, "Session ended by id");
        Ok(())
    }

    /// The session's full trial log, for the sync boundary.
    pub async fn session_record(
        &self,
        session_id: &str,
    ) -> Result<crate::store::SessionRecord, EngineError> {
        let session = {
            let inner = self.inner.lock().await;
            let entry = inner
                .sessions
                .get(session_id)
                .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
            Arc::clone(&entry.session)
        };
        let s = session.lock().await;
        Ok(crate::store::SessionRecord {
            summary: s.summary(),
            stimuli: s.sequence().to_vec(),
            responses: s.responses().to_vec(),
        })
    }

    // ── Maintenance ───────────────────────────────────────────────────────

    /// Removes terminal sessions older than `retention_ms`; active sessions
    /// are never removed regardless of age.
    pub async fn sweep(&self, now: u64, retention_ms: u64) -> usize {
        let mut inner = self.inner.lock().await;

        let mut expired = Vec::new();
        for (id, entry) in inner.sessions.iter() {
            let s = entry.session.lock().await;
            if !s.state().is_terminal() {
                continue;
            }
            let ended = s.ended_at_ms().unwrap_or(s.started_at_ms());
            if ended.saturating_add(retention_ms) <= now {
                expired.push(id.clone());
            }
        }

        for id in &expired {
            if let Some(mut entry) = inner.sessions.remove(id) {
                Self::stop_delivery(&mut entry).await;
            }
            debug!(session_id = id.as_str(), "Swept terminal session");
        }
        if !expired.is_empty() {
            info!("Swept {} terminal sessions", expired.len());
        }
        expired.len()
    }

    pub async fn counts(&self) -> (u32, u32, u32) {
        let inner = self.inner.lock().await;
        let mut active = 0u32;
        for entry in inner.sessions.values() {
            if !entry.session.lock().await.state().is_terminal() {
                active += 1;
            }
        }
        (
            inner.connections.len() as u32,
            active,
            inner.sessions.len() as u32,
        )
    }

    // ── Internals ─────────────────────────────────────────────────────────

    async fn bound_session(
        &self,
        conn_id: ConnectionId,
    ) -> Result<(Arc<Mutex<GameSession>>, String, EventSender), EngineError> {
        let inner = self.inner.lock().await;
        let conn = inner
            .connections
            .get(&conn_id)
            .ok_or_else(|| EngineError::DeliveryFailure("unknown connection".to_string()))?;
        let session_id = conn
            .session_id
            .clone()
            .ok_or_else(|| EngineError::SessionNotFound("no session bound".to_string()))?;
        let entry = inner
            .sessions
            .get(&session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;
        Ok((Arc::clone(&entry.session), session_id, conn.tx.clone()))
    }

    /// Idempotent: cancels and joins the entry's delivery task if one is
    /// armed. Callers must not hold the session lock here, or the join could
    /// wait on a loop iteration that needs it.
    async fn stop_delivery(entry: &mut SessionEntry) {
        if let Some(task) = entry.delivery.take() {
            task.token.cancel();
            if task.handle.await.is_err() {
                warn!("Delivery task ended with a panic");
            }
        }
    }

    /// Ends a session (if still active) and releases its delivery task.
    async fn teardown_session(inner: &mut Inner, session_id: &str, now: u64) {
        if let Some(entry) = inner.sessions.get_mut(session_id) {
            {
                let mut s = entry.session.lock().await;
                if !s.state().is_terminal() {
                    // Double-end is impossible here; ignore the race anyway.
                    let _ = s.end(now);
                }
            }
            entry.owner = None;
            Self::stop_delivery(entry).await;
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// One paced delivery loop per running session. Holds the session lock across
/// peek/send/mark so a packet can never be delivered twice, sleeps the ISI
/// between packets, and exits when cancelled, when the session stops running,
/// or when the whole block has gone out. An ISI of zero delivers back-to-back
/// (test mode).
fn spawn_delivery(session: Arc<Mutex<GameSession>>, tx: EventSender) -> DeliveryTask {
    let token = CancellationToken::new();
    let child = token.clone();
    let handle = tokio::spawn(async move {
        loop {
            if child.is_cancelled() {
                break;
            }

            let isi_ms = {
                let mut s = session.lock().await;
                let Some(packet) = s.next_to_deliver().cloned() else {
                    break;
                };
                if tx.send(Event::Stimulus { packet }).is_err() {
                    // Receiver gone while the read half may still be open:
                    // treat it like a disconnect. Ending here makes the
                    // session terminal so the sweep can reclaim it.
                    let _ = s.end(now_ms());
                    warn!(
                        session_id = s.id(),
                        "Delivery channel closed mid-session; session ended"
                    );
                    break;
                }
                s.mark_delivered();
                s.config().isi_ms()
            };

            if isi_ms > 0 {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(isi_ms)) => {}
                }
            }
        }
    });
    DeliveryTask { token, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nback::adjudicator::{suggest_adjustment, Adjustment};
    use nback::config::Channel;
    use nback::stimulus::StimulusPacket;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn response(channel: Channel, is_match: bool, trial_index: u32) -> UserResponse {
        UserResponse {
            channel,
            is_match,
            reaction_time_ms: 300,
            trial_index,
            received_ts_ms: 0,
        }
    }

    async fn recv(rx: &mut UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn start_unpaced(
        registry: &Registry,
        rx: &mut UnboundedReceiver<Event>,
        conn: ConnectionId,
        n_level: u32,
        block_size: u32,
    ) -> (String, Vec<StimulusPacket>) {
        registry
            .on_start(conn, Mode::Dual, n_level, Some(block_size), Some(0.0))
            .await
            .unwrap();

        let session_id = match recv(rx).await {
            Event::SessionStart {
                session_id,
                total_trials,
                ..
            } => {
                assert_eq!(total_trials, block_size);
                session_id
            }
            other => panic!("expected SessionStart, got {other:?}"),
        };

        let mut packets = Vec::new();
        while packets.len() < block_size as usize {
            match recv(rx).await {
                Event::Stimulus { packet } => packets.push(packet),
                other => panic!("expected Stimulus, got {other:?}"),
            }
        }
        (session_id, packets)
    }

    fn ground_truth(packets: &[StimulusPacket], channel: Channel, i: usize, n: usize) -> bool {
        i >= n && packets[i].value_for(channel) == packets[i - n].value_for(channel)
    }

    #[tokio::test]
    async fn stimuli_deliver_in_order_without_gaps_or_duplicates() {
        let registry = Registry::with_seed(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.on_connect(tx).await;

        let (_id, packets) = start_unpaced(&registry, &mut rx, conn, 2, 20).await;
        for (i, p) in packets.iter().enumerate() {
            assert_eq!(p.index, i as u32);
        }
    }

    #[tokio::test]
    async fn full_block_emits_block_end_then_session_end() {
        let registry = Registry::with_seed(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.on_connect(tx).await;

        let (session_id, packets) = start_unpaced(&registry, &mut rx, conn, 2, 20).await;

        // Play the position channel against ground truth from the delivered
        // packets; the letter channel is left to implicit no-match claims.
        for i in 0..20usize {
            let truth = ground_truth(&packets, Channel::Position, i, 2);
            registry
                .on_response(conn, response(Channel::Position, truth, i as u32))
                .await
                .unwrap();
        }

        // 19 running ScoreUpdates, then the completion triple.
        let mut score_updates = 0;
        let final_accuracy = loop {
            match recv(&mut rx).await {
                Event::ScoreUpdate { .. } => score_updates += 1,
                Event::BlockEnd {
                    accuracy,
                    suggestion,
                    session_id: sid,
                } => {
                    assert_eq!(sid, session_id);
                    assert_eq!(suggestion, suggest_adjustment(&accuracy));
                    assert_eq!(accuracy.channel(Channel::Position), Some(1.0));
                    break accuracy;
                }
                other => panic!("unexpected event {other:?}"),
            }
        };
        assert_eq!(score_updates, 20);

        match recv(&mut rx).await {
            Event::SessionEnd {
                reason, accuracy, ..
            } => {
                assert_eq!(reason, "Completed successfully");
                assert_eq!(accuracy, Some(final_accuracy));
            }
            other => panic!("expected SessionEnd, got {other:?}"),
        }

        // Completed is terminal: a late response is a typed failure. The
        // connection is already unbound, so it reads as session-not-found.
        let err = registry
            .on_response(conn, response(Channel::Position, true, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn pause_resume_neither_skips_nor_redelivers() {
        let registry = Registry::with_seed(3);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.on_connect(tx).await;

        registry
            .on_start(conn, Mode::Dual, 2, Some(10), Some(0.05))
            .await
            .unwrap();
        match recv(&mut rx).await {
            Event::SessionStart { .. } => {}
            other => panic!("expected SessionStart, got {other:?}"),
        }

        // Let a couple of packets through, then pause.
        let mut seen = Vec::new();
        while seen.len() < 2 {
            if let Event::Stimulus { packet } = recv(&mut rx).await {
                seen.push(packet.index);
            }
        }
        registry.on_pause(conn).await.unwrap();

        // Drain anything already in flight at pause time.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        while let Ok(ev) = rx.try_recv() {
            if let Event::Stimulus { packet } = ev {
                seen.push(packet.index);
            }
        }
        let paused_at = *seen.last().unwrap();

        // Paused: no further delivery while we wait.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());

        registry.on_resume(conn).await.unwrap();
        let next = loop {
            if let Event::Stimulus { packet } = recv(&mut rx).await {
                break packet.index;
            }
        };
        assert_eq!(next, paused_at + 1);

        // Double resume is a typed failure.
        let err = registry.on_resume(conn).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn disconnect_releases_timer_and_terminates_session() {
        let registry = Registry::with_seed(4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.on_connect(tx).await;

        registry
            .on_start(conn, Mode::Dual, 2, Some(50), Some(0.05))
            .await
            .unwrap();
        let session_id = match recv(&mut rx).await {
            Event::SessionStart { session_id, .. } => session_id,
            other => panic!("expected SessionStart, got {other:?}"),
        };

        registry.on_disconnect(conn).await;

        // The delivery task was joined inside on_disconnect; whatever was
        // sent before that is already buffered, and nothing more arrives.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());

        let summary = registry.session_summary(&session_id).await.unwrap();
        assert!(summary.state.is_terminal());
    }

    #[tokio::test]
    async fn perfect_dual_block_promotes_at_the_boundary() {
        let registry = Registry::with_seed(8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.on_connect(tx).await;

        let (session_id, packets) = start_unpaced(&registry, &mut rx, conn, 2, 20).await;

        // Both channels played to ground truth: an extra claim for the letter
        // channel inside each trial window, then the cursor-advancing
        // position response.
        for i in 0..20usize {
            let letter = ground_truth(&packets, Channel::Letter, i, 2);
            registry
                .on_claim(conn, response(Channel::Letter, letter, i as u32))
                .await
                .unwrap();
            let position = ground_truth(&packets, Channel::Position, i, 2);
            registry
                .on_response(conn, response(Channel::Position, position, i as u32))
                .await
                .unwrap();
        }

        loop {
            match recv(&mut rx).await {
                Event::ScoreUpdate { .. } => {}
                Event::BlockEnd {
                    accuracy,
                    suggestion,
                    session_id: sid,
                } => {
                    assert_eq!(sid, session_id);
                    assert_eq!(accuracy.channel(Channel::Position), Some(1.0));
                    assert_eq!(accuracy.channel(Channel::Letter), Some(1.0));
                    assert_eq!(accuracy.combined, 1.0);
                    assert_eq!(suggestion, Adjustment::Promote);
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        match recv(&mut rx).await {
            Event::SessionEnd {
                reason, suggestion, ..
            } => {
                assert_eq!(reason, "Completed successfully");
                assert_eq!(suggestion, Some(Adjustment::Promote));
            }
            other => panic!("expected SessionEnd, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dead_event_channel_ends_the_session() {
        let registry = Registry::with_seed(9);
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = registry.on_connect(tx).await;
        drop(rx);

        registry
            .on_start(conn, Mode::Dual, 2, Some(20), Some(0.0))
            .await
            .unwrap();

        // The first failed send ends the session in place; it must not stay
        // active behind a dead channel.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let (_, active, tracked) = registry.counts().await;
        assert_eq!(active, 0);
        assert_eq!(tracked, 1);

        // Terminal now, so the sweep can reclaim it.
        let removed = registry
            .sweep(now_ms() + RETENTION_MS + 1_000, RETENTION_MS)
            .await;
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn sweep_removes_only_old_terminal_sessions() {
        let registry = Registry::with_seed(5);
        let (old_id, _, _) = registry
            .create_session(Mode::Dual, 2, Some(20), Some(0.0))
            .await
            .unwrap();
        let (active_id, _, _) = registry
            .create_session(Mode::Dual, 2, Some(20), Some(0.0))
            .await
            .unwrap();
        registry.end_session(&old_id).await.unwrap();

        // Active (created, non-terminal) sessions survive any age; the
        // terminal one goes once past retention.
        let far_future = now_ms() + RETENTION_MS + 1_000;
        let removed = registry.sweep(far_future, RETENTION_MS).await;
        assert_eq!(removed, 1);
        assert!(matches!(
            registry.session_summary(&old_id).await,
            Err(EngineError::SessionNotFound(_))
        ));
        assert!(registry.session_summary(&active_id).await.is_ok());

        // Recent terminal sessions stay.
        registry.end_session(&active_id).await.unwrap();
        let removed = registry.sweep(now_ms(), RETENTION_MS).await;
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn management_surface_reports_not_found() {
        let registry = Registry::with_seed(6);
        assert!(matches!(
            registry.session_summary("nope").await,
            Err(EngineError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.end_session("nope").await,
            Err(EngineError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn validation_rejects_before_any_state_is_created() {
        let registry = Registry::with_seed(7);
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = registry.on_connect(tx).await;

        let err = registry
            .on_start(conn, Mode::Dual, 0, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let (_, active, tracked) = registry.counts().await;
        assert_eq!(active, 0);
        assert_eq!(tracked, 0);
    }
}
