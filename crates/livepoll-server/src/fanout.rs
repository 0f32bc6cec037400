//! Audience-addressed delivery on top of the client registry.

use std::fmt;
use std::sync::Arc;

use livepoll_core::ids::ConnectionId;
use livepoll_core::protocol::{AckFrame, ServerEvent};
use livepoll_core::roster::Role;
use serde::Serialize;

use crate::client::ClientRegistry;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Audience {
    /// Every open connection, joined or not.
    All,
    Teachers,
    Connection(ConnectionId),
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Teachers => f.write_str("teachers"),
            Self::Connection(id) => write!(f, "conn:{id}"),
        }
    }
}

#[derive(Clone)]
pub struct Fanout {
    clients: Arc<ClientRegistry>,
}

impl Fanout {
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self { clients }
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Serialize once and queue for every member of `audience`. Returns the
    /// number of connections the event was queued for.
    pub fn publish(&self, audience: &Audience, event: &ServerEvent) -> usize {
        let Some(text) = encode(event) else {
            return 0;
        };
        let delivered = match audience {
            Audience::All => self.clients.send_where(|_| true, &text),
            Audience::Teachers => self
                .clients
                .send_where(|c| c.role() == Some(Role::Teacher), &text),
            Audience::Connection(id) => usize::from(self.clients.send_to(id, text)),
        };
        tracing::debug!(event = event.name(), %audience, delivered, "fanout");
        delivered
    }

    pub fn reply(&self, conn: &ConnectionId, ack: &AckFrame) -> bool {
        encode(ack).is_some_and(|text| self.clients.send_to(conn, text))
    }

    pub fn set_role(&self, conn: &ConnectionId, role: Role) {
        self.clients.set_role(conn, role);
    }
}

fn encode(value: &impl Serialize) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode outbound frame");
            None
        }
    }
}
