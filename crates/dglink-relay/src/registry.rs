//! Session registry and binding state machine.
//!
//! Owns every live session, keyed by its issued identifier. Binding is a
//! symmetric relation stored on both sessions; every transition happens inside
//! one `&mut self` call so a binding is never observed half-established.
//!
//! ## States
//!
//! - `Unbound`: freshly registered, or torn down by the peer
//! - `AwaitingBind`: confirmed its identity with a target-less bind and is
//!   waiting for a peer; behaves like `Unbound` everywhere else
//! - `Bound { peer }`: paired with exactly one other session
//!
//! ## Policy
//!
//! First bind wins. Binding to a session that is bound elsewhere, or binding
//! while already bound to someone else, fails with `AlreadyBound`; an explicit
//! unbind is required first.

use std::collections::HashMap;

use dglink_protocol::ProtocolError;

// ─── Constants ───────────────────────────────────────────────────────

/// Identifier generation attempts before giving up with `RegistryExhausted`.
pub const MAX_ID_ATTEMPTS: u32 = 8;

// ─── Binding State ───────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub enum BindingState {
    #[default]
    Unbound,
    AwaitingBind,
    Bound { peer: String },
}

impl BindingState {
    pub fn peer(&self) -> Option<&str> {
        match self {
            Self::Bound { peer } => Some(peer),
            _ => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound { .. })
    }
}

// ─── Session ─────────────────────────────────────────────────────────

/// One registered endpoint. `handle` is whatever the transport needs to reach
/// the connection (a queue sender in the server, a plain value in tests).
#[derive(Debug, Clone)]
pub struct Session<H> {
    pub id: String,
    pub state: BindingState,
    pub registered_at_ms: u64,
    pub last_seen_ms: u64,
    pub handle: H,
}

// ─── Outcomes ────────────────────────────────────────────────────────

/// Result of a successful `bind` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome<H> {
    /// Target-less bind: identity confirmed, nothing paired.
    Registered,
    /// Already bound to this very target; nothing changed.
    Unchanged,
    /// New binding established. The target must be told about it.
    Bound { target_id: String, target: H },
}

/// The other side of a binding that was just torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Teardown<H> {
    pub peer_id: String,
    pub peer: H,
}

/// A session removed from the registry, plus its former peer if it was bound.
#[derive(Debug, Clone)]
pub struct Removed<H> {
    pub session: Session<H>,
    pub teardown: Option<Teardown<H>>,
}

type IdGenerator = Box<dyn FnMut() -> String + Send>;

// ─── Registry ────────────────────────────────────────────────────────

pub struct SessionRegistry<H> {
    sessions: HashMap<String, Session<H>>,
    id_gen: IdGenerator,
}

impl<H: Clone> SessionRegistry<H> {
    /// Registry issuing random UUID v4 identifiers.
    pub fn new() -> Self {
        Self::with_id_generator(|| uuid::Uuid::new_v4().to_string())
    }

    /// Registry with a custom identifier source. Collisions are retried up to
    /// [`MAX_ID_ATTEMPTS`] times.
    pub fn with_id_generator(id_gen: impl FnMut() -> String + Send + 'static) -> Self {
        Self {
            sessions: HashMap::new(),
            id_gen: Box::new(id_gen),
        }
    }

    /// Create an `Unbound` session and return its identifier.
    pub fn register(&mut self, handle: H, now_ms: u64) -> Result<String, ProtocolError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = (self.id_gen)();
            if id.is_empty() || self.sessions.contains_key(&id) {
                continue;
            }
            self.sessions.insert(
                id.clone(),
                Session {
                    id: id.clone(),
                    state: BindingState::Unbound,
                    registered_at_ms: now_ms,
                    last_seen_ms: now_ms,
                    handle,
                },
            );
            return Ok(id);
        }
        Err(ProtocolError::RegistryExhausted {
            attempts: MAX_ID_ATTEMPTS,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Session<H>> {
        self.sessions.get(id)
    }

    pub fn lookup(&self, id: &str) -> Result<&Session<H>, ProtocolError> {
        self.sessions
            .get(id)
            .ok_or_else(|| ProtocolError::NotFound(id.to_owned()))
    }

    /// Record activity. Returns `false` if the session is unknown.
    pub fn touch(&mut self, id: &str, now_ms: u64) -> bool {
        if let Some(session) = self.sessions.get_mut(id) {
            session.last_seen_ms = now_ms;
            true
        } else {
            false
        }
    }

    /// Bind `self_id` to `target_id`, or confirm identity when no target is given.
    pub fn bind(
        &mut self,
        self_id: &str,
        target_id: Option<&str>,
    ) -> Result<BindOutcome<H>, ProtocolError> {
        let own_state = self.lookup(self_id)?.state.clone();

        let Some(target_id) = target_id else {
            if own_state == BindingState::Unbound {
                self.set_state(self_id, BindingState::AwaitingBind);
            }
            return Ok(BindOutcome::Registered);
        };

        if target_id == self_id {
            return Err(ProtocolError::SelfBind);
        }
        let target = self.lookup(target_id)?;

        if let Some(peer) = own_state.peer() {
            if peer == target_id {
                return Ok(BindOutcome::Unchanged);
            }
            return Err(ProtocolError::AlreadyBound);
        }
        if target.state.is_bound() {
            return Err(ProtocolError::AlreadyBound);
        }

        let target_handle = target.handle.clone();
        self.set_state(
            self_id,
            BindingState::Bound {
                peer: target_id.to_owned(),
            },
        );
        self.set_state(
            target_id,
            BindingState::Bound {
                peer: self_id.to_owned(),
            },
        );

        Ok(BindOutcome::Bound {
            target_id: target_id.to_owned(),
            target: target_handle,
        })
    }

    /// Tear down the binding of `id`. Both sides return to `Unbound`.
    pub fn unbind(&mut self, id: &str) -> Result<Teardown<H>, ProtocolError> {
        let peer_id = self
            .lookup(id)?
            .state
            .peer()
            .map(str::to_owned)
            .ok_or(ProtocolError::NotBound)?;

        self.set_state(id, BindingState::Unbound);
        let peer = self.release_peer(&peer_id).ok_or(ProtocolError::NotBound)?;
        Ok(Teardown { peer_id, peer })
    }

    /// Remove a session. If it was bound, its peer is returned to `Unbound`
    /// before the identifier is freed.
    pub fn remove(&mut self, id: &str) -> Option<Removed<H>> {
        let session = self.sessions.remove(id)?;
        let teardown = session.state.peer().and_then(|peer_id| {
            self.release_peer(peer_id).map(|peer| Teardown {
                peer_id: peer_id.to_owned(),
                peer,
            })
        });
        Some(Removed { session, teardown })
    }

    /// The peer of a bound session, as (`peer_id`, `handle`).
    pub fn peer_of(&self, id: &str) -> Result<(String, H), ProtocolError> {
        let peer_id = self
            .lookup(id)?
            .state
            .peer()
            .ok_or(ProtocolError::NotBound)?;
        let peer = self.sessions.get(peer_id).ok_or(ProtocolError::NotBound)?;
        Ok((peer.id.clone(), peer.handle.clone()))
    }

    /// Sessions whose last activity is older than `timeout_ms`.
    pub fn expired(&self, now_ms: u64, timeout_ms: u64) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.last_seen_ms.saturating_add(timeout_ms) < now_ms)
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Remove every session, returning them for final notification.
    pub fn drain(&mut self) -> Vec<Session<H>> {
        let mut sessions: Vec<Session<H>> = self.sessions.drain().map(|(_, s)| s).collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    /// All sessions sorted by id.
    pub fn list(&self) -> Vec<&Session<H>> {
        let mut sessions: Vec<&Session<H>> = self.sessions.values().collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of bound sessions (two per binding).
    pub fn bound_count(&self) -> usize {
        self.sessions.values().filter(|s| s.state.is_bound()).count()
    }

    fn set_state(&mut self, id: &str, state: BindingState) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.state = state;
        }
    }

    fn release_peer(&mut self, peer_id: &str) -> Option<H> {
        let peer = self.sessions.get_mut(peer_id)?;
        peer.state = BindingState::Unbound;
        Some(peer.handle.clone())
    }
}

impl<H: Clone> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> std::fmt::Debug for SessionRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
