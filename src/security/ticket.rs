//! One-time connection tickets.
//!
//! A ticket is issued over an authenticated request and consumed by the
//! real-time handshake. Consumption is an atomic take on the shared store,
//! so a ticket authenticates at most one connection.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use tracing::{info, warn};

use crate::store::KvStore;

const TICKET_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedTicket {
    pub ticket: String,
    /// Seconds until the ticket lapses.
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TicketService {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

/// Loggable prefix of a ticket.
fn redact(ticket: &str) -> String {
    let prefix: String = ticket.chars().take(8).collect();
    format!("{prefix}...")
}

fn generate_token() -> String {
    let mut bytes = [0u8; TICKET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .fold(String::with_capacity(TICKET_BYTES * 2), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
}

impl TicketService {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    fn key(ticket: &str) -> String {
        format!("ws_ticket:{ticket}")
    }

    /// # Errors
    ///
    /// Fails if the shared store rejects the write.
    pub async fn issue(&self, user_id: &str) -> anyhow::Result<IssuedTicket> {
        let ticket = generate_token();
        self.kv
            .set(&Self::key(&ticket), user_id.to_string(), Some(self.ttl))
            .await?;

        let expires_at = Utc::now() + chrono::Duration::from_std(self.ttl)?;
        info!(name: "ticket.issued", user_id, ticket = %redact(&ticket), "Ticket issued");
        metrics::counter!("simulation_tickets_issued_total").increment(1);

        Ok(IssuedTicket {
            ticket,
            expires_in: self.ttl.as_secs(),
            expires_at,
        })
    }

    /// Redeem `ticket`, returning the user it was issued to. A ticket that
    /// was never issued, has expired, or was already redeemed yields `None`.
    ///
    /// # Errors
    ///
    /// Fails if the shared store is unavailable.
    pub async fn consume(&self, ticket: &str) -> anyhow::Result<Option<String>> {
        if ticket.is_empty() {
            return Ok(None);
        }
        let user_id = self.kv.take(&Self::key(ticket)).await?;
        match &user_id {
            Some(user_id) => {
                info!(name: "ticket.consumed", user_id = %user_id, ticket = %redact(ticket), "Ticket consumed");
            }
            None => {
                warn!(name: "ticket.rejected", ticket = %redact(ticket), "Ticket invalid or expired");
            }
        }
        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    fn service(ttl_secs: u64) -> TicketService {
        TicketService::new(Arc::new(MemoryKvStore::new()), Duration::from_secs(ttl_secs))
    }

    #[test]
    fn test_token_shape() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(redact(&a).len(), 11);
    }

    #[tokio::test]
    async fn test_ticket_is_single_use() {
        let tickets = service(30);
        let issued = tickets.issue("u1").await.unwrap();
        assert_eq!(issued.expires_in, 30);

        assert_eq!(
            tickets.consume(&issued.ticket).await.unwrap().as_deref(),
            Some("u1")
        );
        assert!(tickets.consume(&issued.ticket).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticket_expires_unused() {
        let tickets = service(30);
        let issued = tickets.issue("u1").await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(tickets.consume(&issued.ticket).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unredeemed_tickets_are_reclaimed() {
        let kv = MemoryKvStore::new();
        let shutdown = tokio_util::sync::CancellationToken::new();
        kv.spawn_sweeper(Duration::from_secs(10), shutdown.clone());
        let tickets = TicketService::new(Arc::new(kv.clone()), Duration::from_secs(30));

        for _ in 0..20 {
            tickets.issue("u1").await.unwrap();
        }
        assert_eq!(kv.stored(), 20);

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(kv.stored(), 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unknown_and_empty_tickets() {
        let tickets = service(30);
        assert!(tickets.consume("deadbeef").await.unwrap().is_none());
        assert!(tickets.consume("").await.unwrap().is_none());
    }
}
