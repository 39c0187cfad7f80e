use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use glam::Vec3;

use pulse::net::random_hex_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    AwaitingUsername,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub addr: SocketAddr,
    pub phase: ClientPhase,
    pub private_id: String,
    pub public_id: String,
    pub username: Option<String>,
    pub color_hex: Option<String>,
    pub position: Vec3,
    pub last_position_timestamp: f64,
    pub last_seen: Instant,
}

impl ClientRecord {
    fn pending(addr: SocketAddr, now: Instant) -> Self {
        Self {
            addr,
            phase: ClientPhase::AwaitingUsername,
            private_id: String::new(),
            public_id: String::new(),
            username: None,
            color_hex: None,
            position: Vec3::ZERO,
            last_position_timestamp: f64::NEG_INFINITY,
            last_seen: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase == ClientPhase::Connected
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Identity of a client that dropped off, kept so it can be resumed.
#[derive(Debug, Clone)]
pub struct RetainedIdentity {
    pub public_id: String,
    pub color_hex: Option<String>,
    pub position: Vec3,
    pub lost_at: Instant,
}

pub struct ClientRegistry {
    clients: HashMap<SocketAddr, ClientRecord>,
    retained: HashMap<String, RetainedIdentity>,
    max_clients: usize,
    timeout: Duration,
    session_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(max_clients: usize, timeout: Duration, session_timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            retained: HashMap::new(),
            max_clients,
            timeout,
            session_timeout,
        }
    }

    /// Starts (or restarts) the handshake for `addr`. A connected client
    /// asking again is left untouched.
    pub fn get_or_create_pending(
        &mut self,
        addr: SocketAddr,
        now: Instant,
    ) -> Result<&mut ClientRecord, &'static str> {
        let exists = self.clients.contains_key(&addr);
        if !exists && self.clients.len() >= self.max_clients {
            return Err("Server full");
        }

        let record = self
            .clients
            .entry(addr)
            .or_insert_with(|| ClientRecord::pending(addr, now));
        record.touch(now);
        Ok(record)
    }

    /// Assigns fresh ids and marks the client connected.
    pub fn promote(&mut self, addr: &SocketAddr, username: &str) -> Option<&ClientRecord> {
        let record = self.clients.get_mut(addr)?;
        record.phase = ClientPhase::Connected;
        record.private_id = random_hex_id();
        record.public_id = random_hex_id();
        record.username = Some(username.to_string());
        Some(record)
    }

    /// Rebinds a known identity to `addr` with a new private id. The old
    /// record, if still live, is returned so the caller can announce it.
    pub fn resume(
        &mut self,
        addr: SocketAddr,
        username: &str,
        now: Instant,
    ) -> Option<(&ClientRecord, Option<ClientRecord>)> {
        let live_addr = self
            .clients
            .values()
            .find(|c| c.is_connected() && c.username.as_deref() == Some(username))
            .map(|c| c.addr);

        let (public_id, color_hex, position, replaced) = match live_addr {
            Some(old_addr) => {
                let old = self.clients.remove(&old_addr)?;
                (old.public_id.clone(), old.color_hex.clone(), old.position, Some(old))
            }
            None => {
                let identity = self.retained.remove(username)?;
                (identity.public_id, identity.color_hex, identity.position, None)
            }
        };

        let record = ClientRecord {
            addr,
            phase: ClientPhase::Connected,
            private_id: random_hex_id(),
            public_id,
            username: Some(username.to_string()),
            color_hex,
            position,
            last_position_timestamp: f64::NEG_INFINITY,
            last_seen: now,
        };
        self.clients.insert(addr, record);
        let record = self.clients.get(&addr)?;
        Some((record, replaced))
    }

    /// Whether `username` is held by a live client or a retained identity.
    pub fn is_username_taken(&self, username: &str) -> bool {
        let lower = username.to_ascii_lowercase();
        self.retained
            .keys()
            .any(|name| name.to_ascii_lowercase() == lower)
            || self.clients.values().any(|c| {
                c.username
                    .as_deref()
                    .is_some_and(|name| name.to_ascii_lowercase() == lower)
            })
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&ClientRecord> {
        self.clients.get(addr)
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut ClientRecord> {
        self.clients.get_mut(addr)
    }

    pub fn connected(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.values().filter(|c| c.is_connected())
    }

    /// Drops silent clients. Connected ones keep their identity for the
    /// session timeout; expired identities are forgotten.
    pub fn cleanup_timed_out(&mut self, now: Instant) -> Vec<ClientRecord> {
        let timed_out: Vec<SocketAddr> = self
            .clients
            .values()
            .filter(|c| c.is_timed_out(now, self.timeout))
            .map(|c| c.addr)
            .collect();

        let mut removed = Vec::with_capacity(timed_out.len());
        for addr in timed_out {
            let Some(record) = self.clients.remove(&addr) else {
                continue;
            };
            if let (ClientPhase::Connected, Some(username)) = (record.phase, &record.username) {
                self.retained.insert(
                    username.clone(),
                    RetainedIdentity {
                        public_id: record.public_id.clone(),
                        color_hex: record.color_hex.clone(),
                        position: record.position,
                        lost_at: now,
                    },
                );
            }
            removed.push(record);
        }

        let session_timeout = self.session_timeout;
        self.retained
            .retain(|_, identity| now.saturating_duration_since(identity.lost_at) <= session_timeout);

        removed
    }

    pub fn connected_count(&self) -> usize {
        self.connected().count()
    }

    pub fn total_count(&self) -> usize {
        self.clients.len()
    }

    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn registry() -> ClientRegistry {
        ClientRegistry::new(2, Duration::from_secs(15), Duration::from_secs(30))
    }

    #[test]
    fn test_pending_then_promote() {
        let now = Instant::now();
        let mut registry = registry();
        registry.get_or_create_pending(addr(1), now).unwrap();
        assert_eq!(registry.connected_count(), 0);

        let record = registry.promote(&addr(1), "Alice").unwrap();
        assert_eq!(record.private_id.len(), 16);
        assert_ne!(record.private_id, record.public_id);
        assert_eq!(registry.connected_count(), 1);
        assert!(registry.is_username_taken("alice"));
    }

    #[test]
    fn test_server_full() {
        let now = Instant::now();
        let mut registry = registry();
        registry.get_or_create_pending(addr(1), now).unwrap();
        registry.get_or_create_pending(addr(2), now).unwrap();
        assert!(registry.get_or_create_pending(addr(3), now).is_err());
        // Known addresses are still served.
        assert!(registry.get_or_create_pending(addr(1), now).is_ok());
    }

    #[test]
    fn test_timeout_retains_identity_for_resume() {
        let now = Instant::now();
        let mut registry = registry();
        registry.get_or_create_pending(addr(1), now).unwrap();
        let public_id = registry.promote(&addr(1), "Alice").unwrap().public_id.clone();

        let later = now + Duration::from_secs(16);
        let removed = registry.cleanup_timed_out(later);
        assert_eq!(removed.len(), 1);
        assert_eq!(registry.retained_count(), 1);
        assert!(registry.is_username_taken("Alice"));

        let (record, replaced) = registry.resume(addr(5), "Alice", later).unwrap();
        assert_eq!(record.public_id, public_id);
        assert!(record.is_connected());
        assert!(replaced.is_none());
        assert_eq!(registry.retained_count(), 0);
    }

    #[test]
    fn test_retained_identity_expires() {
        let now = Instant::now();
        let mut registry = registry();
        registry.get_or_create_pending(addr(1), now).unwrap();
        registry.promote(&addr(1), "Alice");

        registry.cleanup_timed_out(now + Duration::from_secs(16));
        registry.cleanup_timed_out(now + Duration::from_secs(47));

        assert_eq!(registry.retained_count(), 0);
        assert!(!registry.is_username_taken("Alice"));
        assert!(registry.resume(addr(5), "Alice", now).is_none());
    }

    #[test]
    fn test_resume_replaces_live_record() {
        let now = Instant::now();
        let mut registry = registry();
        registry.get_or_create_pending(addr(1), now).unwrap();
        let old_private = registry.promote(&addr(1), "Alice").unwrap().private_id.clone();

        let (record, replaced) = registry.resume(addr(2), "Alice", now).unwrap();
        assert_ne!(record.private_id, old_private);
        assert_eq!(replaced.map(|r| r.addr), Some(addr(1)));
        assert!(registry.get(&addr(1)).is_none());
        assert_eq!(registry.connected_count(), 1);
    }

    #[test]
    fn test_pending_clients_are_not_retained() {
        let now = Instant::now();
        let mut registry = registry();
        registry.get_or_create_pending(addr(1), now).unwrap();

        registry.cleanup_timed_out(now + Duration::from_secs(16));
        assert_eq!(registry.total_count(), 0);
        assert_eq!(registry.retained_count(), 0);
    }
}
