//! Reconnection session bookkeeping.
//!
//! The token is a non-cryptographic digest of the private id and the wall
//! clock. It only lets the same client resume its identity after a dropped
//! connection and carries no security guarantee.

use std::time::{Duration, Instant};

use pulse::net::{hash_with_time, unix_nanos};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub private_id: String,
    pub session_token: String,
    pub created_at: Instant,
    pub last_connected_at: Instant,
}

impl Session {
    pub fn is_valid(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_connected_at) <= timeout
    }
}

pub fn derive_session_token(private_id: &str, unix_nanos: u128) -> String {
    format!("{:016x}", hash_with_time(private_id, unix_nanos))
}

#[derive(Debug)]
pub struct SessionManager {
    session: Option<Session>,
    enabled: bool,
    session_timeout: Duration,
}

impl SessionManager {
    pub fn new(enabled: bool, session_timeout: Duration) -> Self {
        Self {
            session: None,
            enabled,
            session_timeout,
        }
    }

    /// Replaces any stored session. Does nothing while resume is disabled.
    pub fn store_session(
        &mut self,
        username: &str,
        private_id: &str,
        now: Instant,
    ) -> Option<&Session> {
        if !self.enabled {
            return None;
        }

        let session_token = derive_session_token(private_id, unix_nanos());
        log::debug!("Stored session for '{}'", username);

        self.session = Some(Session {
            username: username.to_string(),
            private_id: private_id.to_string(),
            session_token,
            created_at: now,
            last_connected_at: now,
        });
        self.session.as_ref()
    }

    pub fn clear_session(&mut self) {
        if self.session.take().is_some() {
            log::debug!("Session cleared");
        }
    }

    /// Marks the session as still backed by a live connection.
    pub fn touch(&mut self, now: Instant) {
        if let Some(session) = &mut self.session {
            session.last_connected_at = now;
        }
    }

    pub fn valid_session(&self, now: Instant) -> Option<&Session> {
        if !self.enabled {
            return None;
        }
        self.session
            .as_ref()
            .filter(|s| s.is_valid(now, self.session_timeout))
    }

    /// Whether a reconnect should try session resume instead of a full handshake.
    pub fn should_resume(&self, now: Instant) -> bool {
        self.valid_session(now).is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.clear_session();
        }
    }
}
