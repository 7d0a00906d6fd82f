//! Session registry: session id → orchestration handle, with atomic
//! get-or-create/get/remove over an `RwLock<HashMap<..>>`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::AudioFrame;

/// A control-plane message the boundary can send into a running session.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    End,
}

/// The handle a session task publishes into the registry so the boundary
/// (and the idle-timeout sweeper) can reach it without touching its
/// internal orchestration state directly.
pub struct SessionHandle {
    pub id: Uuid,
    pub created_at_ms: i64,
    last_activity_ms: AtomicI64,
    pub frame_tx: mpsc::Sender<AudioFrame>,
    pub control_tx: mpsc::Sender<ControlMessage>,
}

impl SessionHandle {
    pub fn new(
        id: Uuid,
        now_ms: i64,
        frame_tx: mpsc::Sender<AudioFrame>,
        control_tx: mpsc::Sender<ControlMessage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            created_at_ms: now_ms,
            last_activity_ms: AtomicI64::new(now_ms),
            frame_tx,
            control_tx,
        })
    }

    pub fn touch(&self, now_ms: i64) {
        self.last_activity_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self, now_ms: i64, idle_timeout_ms: u64) -> bool {
        now_ms - self.last_activity_ms() >= idle_timeout_ms as i64
    }
}

/// The process-wide session map. All operations are atomic with respect to
/// each other; no session is ever observed half-constructed.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Idempotent session start: if `id` is already registered, the
    /// existing handle is returned and `handle` is dropped; otherwise
    /// `handle` is inserted and returned. First caller wins.
    pub fn start(&self, handle: Arc<SessionHandle>) -> Arc<SessionHandle> {
        let mut sessions = self.sessions.write().unwrap();
        sessions
            .entry(handle.id)
            .or_insert(handle)
            .clone()
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.read().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.write().unwrap().remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of sessions that have exceeded the idle timeout as of `now_ms`.
    /// Callers run the end-session path for each and then `remove` it.
    pub fn expired(&self, now_ms: i64, idle_timeout_ms: u64) -> Vec<Uuid> {
        self.sessions
            .read()
            .unwrap()
            .values()
            .filter(|h| h.is_idle(now_ms, idle_timeout_ms))
            .map(|h| h.id)
            .collect()
    }
}
