//! Session bookkeeping for the UDP transport.
//!
//! This module tracks which network address belongs to which session and
//! which room that session was admitted to:
//! - Session lifecycle (connect, consented disconnect, heartbeat timeout)
//! - Address lookup for routing outgoing packets
//! - Capacity enforcement
//!
//! Game state never lives here. A session is only a transport handle; the
//! player it drives is owned by its room and survives a lost connection for
//! the grace period.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected session.
#[derive(Debug, Clone)]
pub struct Client {
    /// Session id assigned by the server, unique for the process lifetime
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Persistent identity the session joined as
    pub identity: String,
    /// Map key of the room the session was routed to
    pub map: String,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, identity: &str, map: &str) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            identity: identity.to_string(),
            map: map.to_string(),
        }
    }

    /// Returns true if nothing has arrived from this client within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected sessions.
///
/// Session ids are never reused, so a stale id held by a room after a
/// reconnect can never address the wrong client.
pub struct ClientManager {
    /// Connected clients indexed by their session id
    clients: HashMap<u32, Client>,
    /// Next available session id
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a new session. Returns None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr, identity: &str, map: &str) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!(
            "Session {} ({}) connected from {} for map {}",
            client_id, identity, addr, map
        );
        self.clients
            .insert(client_id, Client::new(client_id, addr, identity, map));

        Some(client_id)
    }

    /// Removes a session and returns it, if it existed.
    pub fn remove_client(&mut self, client_id: &u32) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        info!("Session {} closed", client.id);
        Some(client)
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, client_id: u32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn get_addr(&self, client_id: u32) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|c| c.addr)
    }

    /// Refreshes the session's activity time. Returns false for unknown ids.
    pub fn touch(&mut self, client_id: u32) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Removes and returns every session silent for longer than `timeout`.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<Client> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        timed_out
            .iter()
            .filter_map(|id| self.clients.remove(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_client_creation() {
        let addr = test_addr();
        let client = Client::new(1, addr, "id-1", "meadow");

        assert_eq!(client.id, 1);
        assert_eq!(client.addr, addr);
        assert_eq!(client.identity, "id-1");
        assert_eq!(client.map, "meadow");
    }

    #[test]
    fn test_client_timeout() {
        let mut client = Client::new(1, test_addr(), "id-1", "meadow");
        assert!(!client.is_timed_out(Duration::from_secs(1)));

        client.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(5);
        assert_eq!(manager.max_clients, 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = ClientManager::new(3);
        let client_id1 = manager.add_client(test_addr(), "a", "meadow").unwrap();
        let client_id2 = manager.add_client(test_addr2(), "b", "wilds").unwrap();

        assert_eq!(client_id1, 1);
        assert_eq!(client_id2, 2);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get(client_id2).unwrap().map, "wilds");
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);

        assert!(manager.add_client(test_addr(), "a", "meadow").is_some());
        assert!(manager.add_client(test_addr2(), "b", "meadow").is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_session_ids_not_reused() {
        let mut manager = ClientManager::new(2);
        let first = manager.add_client(test_addr(), "a", "meadow").unwrap();
        manager.remove_client(&first);
        let second = manager.add_client(test_addr(), "a", "meadow").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_remove_client() {
        let mut manager = ClientManager::new(2);
        let client_id = manager.add_client(test_addr(), "a", "meadow").unwrap();

        let removed = manager.remove_client(&client_id).unwrap();
        assert_eq!(removed.identity, "a");
        assert!(manager.is_empty());
        assert!(manager.remove_client(&client_id).is_none());
    }

    #[test]
    fn test_find_client_by_addr() {
        let mut manager = ClientManager::new(2);
        let client_id1 = manager.add_client(test_addr(), "a", "meadow").unwrap();
        let _client_id2 = manager.add_client(test_addr2(), "b", "meadow").unwrap();

        assert_eq!(manager.find_client_by_addr(test_addr()), Some(client_id1));
        assert_eq!(manager.get_addr(client_id1), Some(test_addr()));

        let unknown: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(manager.find_client_by_addr(unknown), None);
    }

    #[test]
    fn test_check_timeouts_returns_sessions() {
        let mut manager = ClientManager::new(2);
        let stale = manager.add_client(test_addr(), "a", "meadow").unwrap();
        let fresh = manager.add_client(test_addr2(), "b", "meadow").unwrap();
        manager.clients.get_mut(&stale).unwrap().last_seen =
            Instant::now() - Duration::from_secs(10);

        let timed_out = manager.check_timeouts(Duration::from_secs(5));
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].identity, "a");
        assert!(manager.get(stale).is_none());
        assert!(manager.touch(fresh));
        assert!(!manager.touch(stale));
    }
}
