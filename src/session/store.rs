//! The ephemeral session store.
//!
//! One live [`Session`] per [`SessionKey`]. `ACTIVE` is the only state held
//! here; saved, cancelled and expired sessions are simply absent. Expiry is
//! checked on every access, so a session past `expires_at` is unreadable
//! whether or not the background reaper has run yet.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::clock::Clock;
use super::model::{Message, ModelDraft, Session};
use super::key::SessionKey;
use crate::config::MAX_SESSION_TTL_HOURS;
use crate::error::{EngineError, EngineResult};
use crate::schema::{SchemaSnapshot, SchemaWarning};

struct Slot {
    session: Session,
    /// Serializes conversational turns on this session.
    turn: Arc<Mutex<()>>,
}

pub struct SessionStore {
    sessions: DashMap<SessionKey, Slot>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionStore {
    /// `ttl` is clamped to the 24 hour ceiling.
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        let ceiling = Duration::hours(i64::from(MAX_SESSION_TTL_HOURS));
        Self {
            sessions: DashMap::new(),
            clock,
            ttl: ttl.min(ceiling),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Return the live session for `key`, or create one from `schema`.
    ///
    /// The boolean is `true` when an existing session was restored; the
    /// snapshot passed in is then ignored.
    pub fn initialize(
        &self,
        key: SessionKey,
        schema: SchemaSnapshot,
        warnings: Vec<SchemaWarning>,
    ) -> (Session, bool) {
        let now = self.clock.now();

        let fresh = |key: SessionKey| Session {
            id: Uuid::new_v4(),
            cross_source: schema.cross_source,
            schema: schema.clone(),
            messages: Vec::new(),
            draft: ModelDraft::default(),
            warnings: warnings.clone(),
            created_at: now,
            expires_at: now + self.ttl,
            key,
        };

        match self.sessions.entry(key.clone()) {
            Entry::Occupied(mut entry) if entry.get().session.is_expired(now) => {
                let session = fresh(key);
                info!(key = %session.key, id = %session.id, "session expired, starting a new one");
                entry.insert(Slot {
                    session: session.clone(),
                    turn: Arc::new(Mutex::new(())),
                });
                (session, false)
            }
            Entry::Occupied(entry) => {
                let session = entry.get().session.clone();
                info!(key = %session.key, id = %session.id, "session restored");
                (session, true)
            }
            Entry::Vacant(entry) => {
                let session = fresh(key);
                info!(key = %session.key, id = %session.id, "session created");
                entry.insert(Slot {
                    session: session.clone(),
                    turn: Arc::new(Mutex::new(())),
                });
                (session, false)
            }
        }
    }

    /// Mutable access to a live session, purging it first if expired.
    fn live(&self, key: &SessionKey) -> EngineResult<RefMut<'_, SessionKey, Slot>> {
        let now = self.clock.now();
        if self
            .sessions
            .remove_if(key, |_, slot| slot.session.is_expired(now))
            .is_some()
        {
            info!(%key, "session expired");
        }
        self.sessions
            .get_mut(key)
            .ok_or_else(|| EngineError::no_active_session(key))
    }

    pub fn get(&self, key: &SessionKey) -> EngineResult<Session> {
        self.live(key).map(|slot| slot.session.clone())
    }

    /// Append to the history of the live session.
    ///
    /// With `expected` set, the append only lands on that session instance:
    /// if the key was cancelled (or replaced) meanwhile it fails with
    /// [`EngineError::NoActiveSession`] instead of reviving anything.
    pub fn append_message(
        &self,
        key: &SessionKey,
        expected: Option<Uuid>,
        message: Message,
    ) -> EngineResult<()> {
        let mut slot = self.live(key)?;
        if expected.is_some_and(|id| id != slot.session.id) {
            return Err(EngineError::no_active_session(key));
        }
        slot.session.messages.push(message);
        Ok(())
    }

    /// Replace the draft. There is no partial merge.
    pub fn update_draft(&self, key: &SessionKey, draft: ModelDraft) -> EngineResult<()> {
        let mut slot = self.live(key)?;
        slot.session.draft = draft;
        debug!(%key, "draft replaced");
        Ok(())
    }

    /// Drop the session. Succeeds whether or not one exists.
    pub fn cancel(&self, key: &SessionKey) -> bool {
        let removed = self.sessions.remove(key).is_some();
        if removed {
            info!(%key, "session cancelled");
        }
        removed
    }

    /// Remove the session only if it is still the instance `id`.
    pub fn remove_if_id(&self, key: &SessionKey, id: Uuid) -> bool {
        self.sessions
            .remove_if(key, |_, slot| slot.session.id == id)
            .is_some()
    }

    /// Session id and turn lock for a live session.
    ///
    /// Holders of the lock are the only writers of conversational turns, so
    /// concurrent sends on one key are applied in the order they acquire it.
    pub fn turn_handle(&self, key: &SessionKey) -> EngineResult<(Uuid, Arc<Mutex<()>>)> {
        let slot = self.live(key)?;
        Ok((slot.session.id, slot.turn.clone()))
    }

    /// Remove every expired session. Returns how many were removed.
    pub fn reap_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, slot| !slot.session.is_expired(now));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            info!(removed, "reaped expired sessions");
        }
        removed
    }

    /// Number of stored sessions, including expired ones not yet reaped.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Start a background task that reaps expired sessions every `every`.
    pub fn spawn_reaper(self: &Arc<Self>, every: StdDuration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let store = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        store.reap_expired();
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("session reaper stopping");
                        break;
                    }
                }
            }
        });

        ReaperHandle {
            shutdown_tx,
            task,
        }
    }
}

/// Stops the reaper when shut down or dropped.
pub struct ReaperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}
