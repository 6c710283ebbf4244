//! Session-scoped progress broadcasting.
//!
//! Long-running collection/enrichment runs report phase, percentage, and a
//! human-readable message through a per-session broadcast channel. The
//! emitter buffers the latest event per phase so a subscriber that races the
//! first emissions still sees where the run stands, clamps percentages to be
//! monotonically non-decreasing within a phase, and delivers a terminal
//! event (`complete` or `error`) exactly once before tearing the session
//! down.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

/// Buffered events per session channel before lagging receivers drop
const CHANNEL_CAPACITY: usize = 256;

/// Pipeline phase tags, in rough execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Resolving,
    Fetching,
    Processing,
    Complete,
    Error,
}

impl Phase {
    /// Terminal phases end the session's event stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Error)
    }
}

/// One progress update within a session.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub session_id: String,
    pub phase: Phase,
    /// 0–100; `None` means indeterminate
    pub percent: Option<f32>,
    pub message: String,
    /// Total record count, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

struct SessionChannel {
    tx: broadcast::Sender<ProgressEvent>,
    /// Latest event per phase, ordered by first occurrence of each phase
    buffered: Vec<ProgressEvent>,
    high_water: HashMap<Phase, f32>,
}

impl SessionChannel {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            buffered: Vec::new(),
            high_water: HashMap::new(),
        }
    }
}

/// Single-producer/multi-consumer progress fan-out keyed by session ID.
#[derive(Default)]
pub struct ProgressEmitter {
    sessions: Mutex<HashMap<String, SessionChannel>>,
}

impl ProgressEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an event into a session.
    ///
    /// Creates the session buffer on first use, so emissions that race the
    /// subscriber are not lost. A terminal event closes the session: its
    /// entry is removed and in-flight receivers observe the channel closing
    /// after the final event.
    pub fn emit(
        &self,
        session_id: &str,
        phase: Phase,
        percent: Option<f32>,
        message: impl Into<String>,
        total: Option<usize>,
    ) {
        let Ok(mut sessions) = self.sessions.lock() else {
            return;
        };
        let channel = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionChannel::new);

        // Percent never moves backwards within one phase.
        let percent = percent.map(|p| {
            let p = p.clamp(0.0, 100.0);
            let high = channel.high_water.entry(phase).or_insert(p);
            *high = high.max(p);
            *high
        });

        let event = ProgressEvent {
            session_id: session_id.to_string(),
            phase,
            percent,
            message: message.into(),
            total,
        };

        match channel.buffered.iter_mut().find(|e| e.phase == phase) {
            Some(slot) => *slot = event.clone(),
            None => channel.buffered.push(event.clone()),
        }

        // A send error just means nobody is listening yet; the buffer keeps
        // the event for late subscribers.
        let receivers = channel.tx.send(event).unwrap_or(0);
        debug!(
            session = session_id,
            phase = ?phase,
            receivers = receivers,
            "Progress event"
        );

        if phase.is_terminal() {
            sessions.remove(session_id);
        }
    }

    /// Attach to a session's event stream.
    ///
    /// Returns the buffered snapshot (latest event per phase, in phase
    /// first-seen order) plus a live receiver. Both are produced under one
    /// lock, so no event can fall between snapshot and subscription.
    pub fn subscribe(
        &self,
        session_id: &str,
    ) -> (Vec<ProgressEvent>, broadcast::Receiver<ProgressEvent>) {
        let Ok(mut sessions) = self.sessions.lock() else {
            let (tx, rx) = broadcast::channel(1);
            drop(tx);
            return (Vec::new(), rx);
        };
        let channel = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionChannel::new);
        (channel.buffered.clone(), channel.tx.subscribe())
    }

    /// Drop a session without a terminal event (caller went away mid-run).
    pub fn drop_session(&self, session_id: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(session_id);
        }
    }

    /// Number of live (non-terminal) sessions, for diagnostics.
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}
