//! Per-session state and the concurrent session store.
//!
//! DNS gives the server no connections, only datagrams, so everything a
//! conversation needs lives in one place keyed by the short session id:
//! the inbound reassembly buffer, the conversation history, the outbound
//! chunk array and the turn state machine. The wire handler and the
//! orchestrator mutate the same entry from different tasks; the store
//! hands out `Arc<Mutex<Session>>` entries so compound operations like
//! chunk recording stay atomic per session without serializing sessions
//! against each other.
//!
//! Turn state machine:
//!
//! ```text
//! Idle -> Receiving -> Generating -> Complete
//!                                 \-> Failed
//! ```
//!
//! A new turn (the next `msg` chunk) re-arms a session only from a
//! terminal state; chunk conflicts park it in `Failed` until then.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex, RwLock};
use warren_wire::command::TurnPhase;

use crate::server::llm::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenState {
    Idle,
    Receiving,
    Generating,
    Complete,
    Failed,
}

impl GenState {
    fn phase(self) -> TurnPhase {
        match self {
            GenState::Complete => TurnPhase::Complete,
            GenState::Failed => TurnPhase::Error,
            // Anything non-terminal reads as "still working" on the wire.
            GenState::Idle | GenState::Receiving | GenState::Generating => TurnPhase::Generating,
        }
    }
}

/// Result of recording one inbound chunk.
#[derive(Debug, PartialEq)]
pub enum InboundOutcome {
    /// Stored; more chunks outstanding.
    Pending,
    /// This chunk completed the message; the reassembled envelope is
    /// returned exactly once and the inbound buffer is cleared.
    Complete(Vec<u8>),
    /// Same (sid, idx) seen with different bytes, or the advertised
    /// total changed mid-message. The session is now `Failed`.
    Conflict,
    /// A generation is still running; new requests must wait for a
    /// terminal state.
    Busy,
}

/// Result of a non-blocking outbound read.
#[derive(Debug, PartialEq)]
pub enum ReadOutcome {
    Chunk(String),
    NotYet,
    PastEnd,
}

struct Session {
    inbound: HashMap<u16, Vec<u8>>,
    inbound_total: Option<u16>,
    history: Vec<ChatMessage>,
    outbound: Vec<String>,
    state: GenState,
    last_touch: Instant,
    cancel: watch::Sender<bool>,
}

impl Session {
    fn new() -> Self {
        Session {
            inbound: HashMap::new(),
            inbound_total: None,
            history: Vec::new(),
            outbound: Vec::new(),
            state: GenState::Idle,
            last_touch: Instant::now(),
            cancel: watch::channel(false).0,
        }
    }

    /// Start a fresh turn: drop both buffers, keep the history, and
    /// replace the cancellation channel so a stale signal from the
    /// previous turn cannot leak into the next one.
    fn arm_turn(&mut self) {
        self.inbound.clear();
        self.inbound_total = None;
        self.outbound.clear();
        self.cancel = watch::channel(false).0;
        self.state = GenState::Receiving;
    }
}

/// Concurrent map from session id to session.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Lookup-or-create, the `touch` primitive every wire command goes
    /// through.
    async fn entry(&self, sid: &str) -> Arc<Mutex<Session>> {
        if let Some(entry) = self.sessions.read().await.get(sid) {
            return Arc::clone(entry);
        }
        let mut map = self.sessions.write().await;
        Arc::clone(
            map.entry(sid.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Session::new()))),
        )
    }

    /// Lookup without creating; `None` means the session was evicted or
    /// never existed. Orchestrator-side operations use this so a dead
    /// session is not resurrected by its own leftover task.
    async fn lookup(&self, sid: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(sid).map(Arc::clone)
    }

    pub async fn contains(&self, sid: &str) -> bool {
        self.sessions.read().await.contains_key(sid)
    }

    /// Record inbound chunk `idx` of `total`, atomically against any
    /// concurrent read of the same session.
    ///
    /// Duplicate deliveries of identical bytes are accepted silently (a
    /// resolver may retransmit); a payload mismatch or a change of
    /// `total` poisons the session. Completion is reported exactly once
    /// per turn, when the last missing index lands.
    pub async fn record_inbound(
        &self,
        sid: &str,
        idx: u16,
        total: u16,
        payload: Vec<u8>,
    ) -> InboundOutcome {
        let entry = self.entry(sid).await;
        let mut session = entry.lock().await;
        session.last_touch = Instant::now();

        match session.state {
            GenState::Generating => return InboundOutcome::Busy,
            GenState::Complete | GenState::Failed => session.arm_turn(),
            GenState::Idle => session.state = GenState::Receiving,
            GenState::Receiving => {}
        }

        match session.inbound_total {
            Some(expected) if expected != total => {
                session.state = GenState::Failed;
                session.inbound.clear();
                session.inbound_total = None;
                return InboundOutcome::Conflict;
            }
            Some(_) => {}
            None => session.inbound_total = Some(total),
        }

        match session.inbound.get(&idx) {
            Some(existing) if *existing == payload => {}
            Some(_) => {
                session.state = GenState::Failed;
                session.inbound.clear();
                session.inbound_total = None;
                return InboundOutcome::Conflict;
            }
            None => {
                session.inbound.insert(idx, payload);
            }
        }

        if session.inbound.len() == total as usize {
            let mut assembled = Vec::new();
            for index in 0..total {
                if let Some(part) = session.inbound.remove(&index) {
                    assembled.extend(part);
                }
            }
            session.inbound_total = None;
            InboundOutcome::Complete(assembled)
        } else {
            InboundOutcome::Pending
        }
    }

    /// Claim the session for one generation. Returns a cancellation
    /// receiver on success, `None` if the session is not ready (no
    /// completed request, or a generation already running).
    pub async fn begin_generation(&self, sid: &str) -> Option<watch::Receiver<bool>> {
        let entry = self.entry(sid).await;
        let mut session = entry.lock().await;
        if session.state != GenState::Receiving {
            return None;
        }
        session.state = GenState::Generating;
        session.last_touch = Instant::now();
        Some(session.cancel.subscribe())
    }

    /// Append one outbound chunk; returns its index, or `None` if the
    /// session is gone or no longer generating.
    pub async fn append_outbound(&self, sid: &str, chunk: String) -> Option<usize> {
        let entry = self.lookup(sid).await?;
        let mut session = entry.lock().await;
        if session.state != GenState::Generating {
            return None;
        }
        session.outbound.push(chunk);
        session.last_touch = Instant::now();
        Some(session.outbound.len() - 1)
    }

    /// Non-blocking outbound read for `get`.
    pub async fn read_outbound(&self, sid: &str, idx: u16) -> ReadOutcome {
        let entry = self.entry(sid).await;
        let mut session = entry.lock().await;
        session.last_touch = Instant::now();
        if let Some(chunk) = session.outbound.get(idx as usize) {
            return ReadOutcome::Chunk(chunk.clone());
        }
        match session.state {
            GenState::Complete | GenState::Failed => ReadOutcome::PastEnd,
            _ => ReadOutcome::NotYet,
        }
    }

    /// Produced count plus wire phase for `cnt`.
    pub async fn status(&self, sid: &str) -> (usize, TurnPhase) {
        let entry = self.entry(sid).await;
        let mut session = entry.lock().await;
        session.last_touch = Instant::now();
        (session.outbound.len(), session.state.phase())
    }

    /// Close the running generation with a terminal state.
    pub async fn finish(&self, sid: &str, ok: bool) {
        if let Some(entry) = self.lookup(sid).await {
            let mut session = entry.lock().await;
            if session.state == GenState::Generating {
                session.state = if ok {
                    GenState::Complete
                } else {
                    GenState::Failed
                };
                session.last_touch = Instant::now();
            }
        }
    }

    /// Drop history and both buffers; the sid stays registered. An
    /// in-flight generation is cancelled first.
    pub async fn clear(&self, sid: &str) {
        let entry = self.entry(sid).await;
        let mut session = entry.lock().await;
        let _ = session.cancel.send(true);
        session.history.clear();
        session.inbound.clear();
        session.inbound_total = None;
        session.outbound.clear();
        session.cancel = watch::channel(false).0;
        session.state = GenState::Idle;
        session.last_touch = Instant::now();
    }

    /// In-band `/clear` acknowledgement: wipe the conversation and leave
    /// exactly one outbound chunk behind, with the turn complete.
    pub async fn acknowledge_clear(&self, sid: &str, chunk: String) {
        if let Some(entry) = self.lookup(sid).await {
            let mut session = entry.lock().await;
            session.history.clear();
            session.inbound.clear();
            session.inbound_total = None;
            session.outbound = vec![chunk];
            session.state = GenState::Complete;
            session.last_touch = Instant::now();
        }
    }

    pub async fn append_history(&self, sid: &str, message: ChatMessage) {
        if let Some(entry) = self.lookup(sid).await {
            let mut session = entry.lock().await;
            session.history.push(message);
        }
    }

    /// Snapshot of the conversation history.
    pub async fn history(&self, sid: &str) -> Vec<ChatMessage> {
        match self.lookup(sid).await {
            Some(entry) => entry.lock().await.history.clone(),
            None => Vec::new(),
        }
    }

    /// Evict sessions idle past the timeout, cancelling any in-flight
    /// generation. Entries locked by another task are in use and are
    /// skipped until the next pass.
    pub async fn sweep(&self) {
        let mut map = self.sessions.write().await;
        map.retain(|sid, entry| match entry.try_lock() {
            Ok(session) => {
                if session.last_touch.elapsed() > self.idle_timeout {
                    log::info!("evicting idle session {}", sid);
                    let _ = session.cancel.send(true);
                    false
                } else {
                    true
                }
            }
            Err(_) => true,
        });
    }

    /// Run [`sweep`](Self::sweep) forever on a background task.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        let period = (store.idle_timeout / 2)
            .max(Duration::from_millis(500))
            .min(Duration::from_secs(60));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                store.sweep().await;
            }
        })
    }
}
