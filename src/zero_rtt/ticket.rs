//! 0-RTT session ticket cache (§4.11): remembers a server's ticket and
//! the transport parameters it advertised so a later connection can send
//! early data before the handshake completes.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

const TICKET_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct SessionTicket {
    pub ticket: Vec<u8>,
    pub server_transport_parameters: Vec<u8>,
    pub max_early_data_size: u32,
    issued_at: SystemTime,
}

impl SessionTicket {
    pub fn new(ticket: Vec<u8>, server_transport_parameters: Vec<u8>, max_early_data_size: u32) -> Self {
        Self { ticket, server_transport_parameters, max_early_data_size, issued_at: SystemTime::now() }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        now.duration_since(self.issued_at).map(|age| age >= TICKET_TTL).unwrap_or(false)
    }
}

#[derive(Default)]
pub struct TicketCache {
    tickets: HashMap<String, SessionTicket>,
}

impl TicketCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, server_name: String, ticket: SessionTicket) {
        self.tickets.insert(server_name, ticket);
    }

    /// Returns the cached ticket for `server_name` if present and not
    /// expired, evicting it if it has aged out.
    pub fn get(&mut self, server_name: &str) -> Option<&SessionTicket> {
        if self.tickets.get(server_name).is_some_and(|t| t.is_expired(SystemTime::now())) {
            self.tickets.remove(server_name);
        }
        self.tickets.get(server_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_ticket_is_retrievable_before_expiry() {
        let mut cache = TicketCache::new();
        cache.store("example.com".to_string(), SessionTicket::new(vec![1, 2, 3], vec![], 16384));
        assert!(cache.get("example.com").is_some());
    }

    #[test]
    fn expired_ticket_is_evicted_on_lookup() {
        let mut cache = TicketCache::new();
        let mut ticket = SessionTicket::new(vec![1], vec![], 0);
        ticket.issued_at = SystemTime::now() - Duration::from_secs(8 * 24 * 60 * 60);
        cache.store("example.com".to_string(), ticket);
        assert!(cache.get("example.com").is_none());
    }
}
