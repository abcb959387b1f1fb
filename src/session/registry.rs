//! Live session registry
//!
//! Holds a summary and a kick signal per connection. Session internals stay
//! with the owning task; the registry only sees what the shell copies into it.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

use super::{Protocol, Session, SessionState};

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub protocol: &'static str,
    pub peer: String,
    pub account: Option<String>,
    pub state: SessionState,
    pub connected_at: DateTime<Utc>,
    pub messages: u64,
    pub latency_ms: Option<u32>,
}

struct RegistryEntry {
    summary: SessionSummary,
    kick: Arc<Notify>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, RegistryEntry>,
    connections_by_ip: DashMap<IpAddr, usize>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection. The entry lives as long as the
    /// returned handle.
    pub fn register(self: &Arc<Self>, protocol: Protocol, peer: SocketAddr) -> SessionHandle {
        let id = Uuid::new_v4();
        let kick = Arc::new(Notify::new());
        self.sessions.insert(
            id,
            RegistryEntry {
                summary: SessionSummary {
                    id,
                    protocol: protocol.name(),
                    peer: peer.to_string(),
                    account: None,
                    state: SessionState::Initial,
                    connected_at: Utc::now(),
                    messages: 0,
                    latency_ms: None,
                },
                kick: kick.clone(),
            },
        );
        self.connections_by_ip
            .entry(peer.ip())
            .and_modify(|c| *c += 1)
            .or_insert(1);

        SessionHandle {
            id,
            ip: peer.ip(),
            registry: self.clone(),
            kick,
        }
    }

    fn unregister(&self, id: Uuid, ip: IpAddr) {
        self.sessions.remove(&id);
        if let Some(mut count) = self.connections_by_ip.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                drop(count);
                self.connections_by_ip.remove(&ip);
            }
        }
    }

    /// Get total connection count.
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Get connection count for an IP.
    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.connections_by_ip.get(ip).map(|r| *r).unwrap_or(0)
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> =
            self.sessions.iter().map(|e| e.summary.clone()).collect();
        sessions.sort_by_key(|s| s.connected_at);
        sessions
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionSummary> {
        self.sessions.get(id).map(|e| e.summary.clone())
    }

    /// Signal one session to close. Returns false if it is already gone.
    pub fn kick(&self, id: &Uuid) -> bool {
        match self.sessions.get(id) {
            Some(entry) => {
                entry.kick.notify_one();
                true
            }
            None => false,
        }
    }

    /// Signal every session logged in as `account`. Returns how many were hit.
    pub fn kick_account(&self, account: &str) -> usize {
        let mut kicked = 0;
        for entry in self.sessions.iter() {
            let matches = entry
                .summary
                .account
                .as_deref()
                .map(|name| name.eq_ignore_ascii_case(account))
                .unwrap_or(false);
            if matches {
                entry.kick.notify_one();
                kicked += 1;
            }
        }
        kicked
    }

    pub fn authenticated_count(&self, protocol: Protocol) -> usize {
        self.sessions
            .iter()
            .filter(|e| e.summary.protocol == protocol.name() && e.summary.state.is_authenticated())
            .count()
    }
}

/// Owned by the connection task; unregisters on drop.
pub struct SessionHandle {
    id: Uuid,
    ip: IpAddr,
    registry: Arc<SessionRegistry>,
    kick: Arc<Notify>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Copy the session's visible fields into the registry.
    pub fn refresh<S: Session>(&self, session: &S, messages: u64) {
        if let Some(mut entry) = self.registry.sessions.get_mut(&self.id) {
            entry.summary.account = session.account().map(str::to_string);
            entry.summary.state = session.state();
            entry.summary.messages = messages;
            entry.summary.latency_ms = session.latency_ms();
        }
    }

    /// Resolves once someone calls [`SessionRegistry::kick`] for this session.
    pub async fn kicked(&self) {
        self.kick.notified().await
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.registry.unregister(self.id, self.ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::ScriptedSession;

    fn addr(last: u8, port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], port))
    }

    #[test]
    fn test_register_and_drop() {
        let registry = Arc::new(SessionRegistry::new());
        let first = registry.register(Protocol::Logon, addr(1, 5000));
        let second = registry.register(Protocol::World, addr(1, 5001));

        assert_eq!(registry.connection_count(), 2);
        assert_eq!(registry.ip_connection_count(&addr(1, 0).ip()), 2);

        drop(first);
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.ip_connection_count(&addr(1, 0).ip()), 1);

        drop(second);
        assert_eq!(registry.ip_connection_count(&addr(1, 0).ip()), 0);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_refresh_copies_state() {
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.register(Protocol::Logon, addr(2, 5000));
        let session = ScriptedSession::new(SessionState::Authenticated);

        handle.refresh(&session, 3);

        let summary = registry.get(&handle.id()).unwrap();
        assert_eq!(summary.state, SessionState::Authenticated);
        assert_eq!(summary.messages, 3);
        assert_eq!(summary.protocol, "logon");
        assert_eq!(registry.authenticated_count(Protocol::Logon), 1);
        assert_eq!(registry.authenticated_count(Protocol::World), 0);
    }

    #[tokio::test]
    async fn test_kick_wakes_handle() {
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.register(Protocol::World, addr(3, 5000));

        assert!(registry.kick(&handle.id()));
        tokio::time::timeout(std::time::Duration::from_secs(1), handle.kicked())
            .await
            .unwrap();

        assert!(!registry.kick(&Uuid::new_v4()));
    }
}
