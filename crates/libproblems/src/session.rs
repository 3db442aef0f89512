use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use rand::distributions::Alphanumeric;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use problems_protocol::ObjectPath;

use crate::error::{ProblemsError, Result};

/// Connection identity as reported by the transport layer.
pub type BusId = String;

pub const TOKEN_LEN: usize = 16;

/// Authorization state of a session.
///
/// `Pending` means an agent round trip is in flight; the session behaves as
/// anonymous until it resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Pending,
    Authorized,
}

#[derive(Debug)]
struct Token {
    value: String,
    expires_at: Option<Instant>,
}

/// Per-connection session: authorization state plus outstanding delegation
/// tokens.
#[derive(Debug)]
pub struct Session {
    pub path: ObjectPath,
    pub bus_id: BusId,
    pub uid: u32,
    state: AuthState,
    /// Bumped on every state change so a stale agent answer is never applied.
    auth_generation: u64,
    tokens: Vec<Token>,
}

impl Session {
    fn new(bus_id: BusId, uid: u32) -> Self {
        // Root needs no agent round trip
        let state = if uid == 0 {
            AuthState::Authorized
        } else {
            AuthState::Anonymous
        };
        Self {
            path: session_path(&bus_id),
            bus_id,
            uid,
            state,
            auth_generation: 0,
            tokens: Vec::new(),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn is_authorized(&self) -> bool {
        self.state == AuthState::Authorized
    }

    /// Uid used for access decisions: an authorized session acts as root.
    pub fn effective_uid(&self) -> u32 {
        if self.is_authorized() { 0 } else { self.uid }
    }

    /// Move to `Pending` and return the generation the in-flight agent
    /// request must present to apply its result.
    pub fn begin_pending(&mut self) -> u64 {
        self.state = AuthState::Pending;
        self.auth_generation += 1;
        self.auth_generation
    }

    /// Apply an agent decision. Returns false when the session moved on in
    /// the meantime (revoked, closed and recreated, re-requested).
    pub fn resolve_pending(&mut self, generation: u64, granted: bool) -> bool {
        if self.auth_generation != generation || self.state != AuthState::Pending {
            return false;
        }
        self.auth_generation += 1;
        self.state = if granted {
            AuthState::Authorized
        } else {
            AuthState::Anonymous
        };
        true
    }

    /// Authorize directly, as happens on successful token delegation.
    pub fn grant(&mut self) {
        self.auth_generation += 1;
        self.state = AuthState::Authorized;
    }

    /// Drop authorization. Returns false when nothing changed: root never
    /// leaves the authorized state, and revoking an anonymous session is a
    /// no-op (the call itself is idempotent, not an error).
    pub fn revoke(&mut self) -> bool {
        if self.uid == 0 || self.state == AuthState::Anonymous {
            return false;
        }
        self.auth_generation += 1;
        self.state = AuthState::Anonymous;
        true
    }

    /// Mint a single-use delegation token. `lifetime_secs == 0` means the
    /// token never times out; it still dies with the session.
    pub fn generate_token(&mut self, lifetime_secs: u64) -> Result<String> {
        if !self.is_authorized() {
            return Err(ProblemsError::AuthFailure(
                "Cannot generate token: Session is not authorized".to_string(),
            ));
        }
        let now = Instant::now();
        self.tokens
            .retain(|t| t.expires_at.is_none_or(|at| at > now));

        let value: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        let expires_at = (lifetime_secs > 0).then(|| now + Duration::from_secs(lifetime_secs));
        self.tokens.push(Token {
            value: value.clone(),
            expires_at,
        });
        info!(session = %self.path, "delegation token generated");
        Ok(value)
    }

    /// Redeem a token, removing it either way once it has been looked at.
    pub fn consume_token(&mut self, value: &str) -> Result<()> {
        self.consume_token_at(value, Instant::now())
    }

    fn consume_token_at(&mut self, value: &str, now: Instant) -> Result<()> {
        let idx = self
            .tokens
            .iter()
            .position(|t| t.value == value)
            .ok_or_else(|| ProblemsError::AuthFailure("No such token".to_string()))?;
        let token = self.tokens.remove(idx);
        if token.expires_at.is_some_and(|at| at <= now) {
            return Err(ProblemsError::AuthFailure(
                "Token has already expired".to_string(),
            ));
        }
        Ok(())
    }

    /// Forget an unconsumed token. Unknown values only get a log line.
    pub fn revoke_token(&mut self, value: &str) {
        let before = self.tokens.len();
        self.tokens.retain(|t| t.value != value);
        if self.tokens.len() == before {
            warn!(session = %self.path, "attempt to revoke an unknown token");
        }
    }
}

/// Derive the externally visible session handle from the connection identity.
pub fn session_path(bus_id: &str) -> ObjectPath {
    let digest = Sha256::digest(bus_id.as_bytes());
    format!("/problems/session/{}", hex::encode(&digest[..8]))
}

/// All live sessions, keyed by connection identity.
pub struct SessionRegistry {
    sessions: HashMap<BusId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Look up the caller's session, creating it on first use. Creation is
    /// subject to the per-uid open-session ceiling.
    pub fn get_or_create(&mut self, bus_id: &str, uid: u32, max_open: usize) -> Result<&mut Session> {
        let open = self.open_count_for_uid(uid);
        match self.sessions.entry(bus_id.to_string()) {
            std::collections::hash_map::Entry::Occupied(e) => {
                let session = e.into_mut();
                if session.uid != uid {
                    error!(
                        bus = %bus_id,
                        recorded_uid = session.uid,
                        caller_uid = uid,
                        "session identity mismatch"
                    );
                    return Err(ProblemsError::AuthFailure(
                        "Your session is broken. Check daemon logs for more details.".to_string(),
                    ));
                }
                Ok(session)
            }
            std::collections::hash_map::Entry::Vacant(v) => {
                if max_open > 0 && open >= max_open {
                    return Err(ProblemsError::CapacityExceeded);
                }
                let session = Session::new(bus_id.to_string(), uid);
                info!(session = %session.path, uid, "session created");
                Ok(v.insert(session))
            }
        }
    }

    pub fn get(&self, bus_id: &str) -> Option<&Session> {
        self.sessions.get(bus_id)
    }

    pub fn get_mut(&mut self, bus_id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(bus_id)
    }

    /// Find a live session by its connection identity, for token delegation.
    pub fn peer(&mut self, peer_bus: &str) -> Result<&mut Session> {
        self.sessions.get_mut(peer_bus).ok_or_else(|| {
            ProblemsError::AuthFailure(format!("No peer session for bus '{peer_bus}'"))
        })
    }

    pub fn remove(&mut self, bus_id: &str) -> Option<Session> {
        let session = self.sessions.remove(bus_id);
        if let Some(s) = &session {
            info!(session = %s.path, "session closed");
        }
        session
    }

    pub fn open_count_for_uid(&self, uid: u32) -> usize {
        self.sessions.values().filter(|s| s.uid == uid).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
