use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use livepoll_core::ids::ConnectionId;
use livepoll_core::roster::Role;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::session::SessionHandle;

/// A connected WebSocket client.
pub struct Client {
    pub id: ConnectionId,
    tx: mpsc::Sender<String>,
    role: RwLock<Option<Role>>,
    connected: AtomicBool,
    last_pong: AtomicU64,
    timeout: Duration,
}

impl Client {
    fn new(id: ConnectionId, tx: mpsc::Sender<String>, timeout: Duration) -> Self {
        Self {
            id,
            tx,
            role: RwLock::new(None),
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
            timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// `None` until the connection sends a join event.
    pub fn role(&self) -> Option<Role> {
        *self.role.read()
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < self.timeout.as_secs()
    }

    fn try_send(&self, message: String) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                // mpsc can't evict the oldest entry, so the new frame is lost.
                tracing::warn!(
                    conn = %self.id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, Arc<Client>>,
    max_send_queue: usize,
    client_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize, client_timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
            client_timeout,
        }
    }

    /// Register a new client and return its id plus the receiving end of its
    /// outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let client = Arc::new(Client::new(id.clone(), tx, self.client_timeout));
        let _ = self.clients.insert(id.clone(), client);
        (id, rx)
    }

    /// Remove a client. Dropping its sender closes the writer side.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        match self.clients.remove(id) {
            Some((_, client)) => {
                client.connected.store(false, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn set_role(&self, id: &ConnectionId, role: Role) {
        if let Some(client) = self.clients.get(id) {
            *client.role.write() = Some(role);
        }
    }

    pub fn record_pong(&self, id: &ConnectionId) {
        if let Some(client) = self.clients.get(id) {
            client.record_pong();
        }
    }

    /// Queue a message for one client. Never waits; a full queue drops it.
    pub fn send_to(&self, id: &ConnectionId, message: String) -> bool {
        match self.clients.get(id) {
            Some(client) if client.is_connected() => client.try_send(message),
            _ => false,
        }
    }

    /// Queue a message for every connected client matching `filter`.
    /// Returns how many queues accepted it.
    pub fn send_where(&self, filter: impl Fn(&Client) -> bool, message: &str) -> usize {
        self.clients
            .iter()
            .filter(|entry| entry.is_connected() && filter(entry.value().as_ref()))
            .filter(|entry| entry.try_send(message.to_string()))
            .count()
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.clients
            .iter()
            .filter(|entry| entry.role() == Some(role))
            .count()
    }

    /// Remove clients that haven't answered a ping within the timeout.
    pub fn cleanup_dead_clients(&self) -> Vec<ConnectionId> {
        let dead: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|entry| !entry.is_alive())
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            let _ = self.unregister(id);
            tracing::info!(conn = %id, "cleaned up dead client");
        }
        dead
    }
}

/// Drive one WebSocket: a writer task drains the outbound queue and pings,
/// a reader task forwards text frames to the session in arrival order.
/// When either side ends the connection is unregistered and the session is
/// told about the disconnect.
pub async fn handle_ws_connection(
    socket: WebSocket,
    conn: ConnectionId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    heartbeat: Duration,
    session: SessionHandle,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_conn = conn.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(conn = %writer_conn, "sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_conn = conn.clone();
    let reader_registry = Arc::clone(&registry);
    let reader_session = session.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if !reader_session.frame(reader_conn.clone(), text.to_string()).await {
                        break;
                    }
                }
                WsMessage::Pong(_) => reader_registry.record_pong(&reader_conn),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    let _ = registry.unregister(&conn);
    session.disconnect(conn.clone()).await;
    tracing::info!(conn = %conn, "websocket client disconnected");
}

/// Periodically drop clients whose pongs stopped arriving.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            let _ = ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if !removed.is_empty() {
                tracing::info!(removed = removed.len(), "dead client cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(queue: usize) -> ClientRegistry {
        ClientRegistry::new(queue, Duration::from_secs(90))
    }

    #[test]
    fn register_and_unregister() {
        let registry = registry(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_eq!(registry.count(), 2);
        assert!(id1.as_str().starts_with("conn_"));

        assert!(registry.unregister(&id1));
        assert!(!registry.unregister(&id1));
        assert_eq!(registry.count(), 1);

        assert!(registry.unregister(&id2));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn send_to_specific_client() {
        let registry = registry(32);
        let (id, mut rx) = registry.register();

        assert!(registry.send_to(&id, "test message".into()));
        assert_eq!(rx.recv().await.unwrap(), "test message");
    }

    #[test]
    fn send_to_nonexistent_client() {
        let registry = registry(32);
        assert!(!registry.send_to(&ConnectionId::new(), "test".into()));
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let registry = registry(2);
        let (id, _rx) = registry.register();

        assert!(registry.send_to(&id, "msg1".into()));
        assert!(registry.send_to(&id, "msg2".into()));
        assert!(!registry.send_to(&id, "msg3".into()));
    }

    #[test]
    fn send_where_filters_by_role() {
        let registry = registry(32);
        let (teacher, mut teacher_rx) = registry.register();
        let (student, mut student_rx) = registry.register();
        let (_anon, mut anon_rx) = registry.register();
        registry.set_role(&teacher, Role::Teacher);
        registry.set_role(&student, Role::Student);

        let sent = registry.send_where(|c| c.role() == Some(Role::Teacher), "t");
        assert_eq!(sent, 1);
        assert_eq!(teacher_rx.try_recv().unwrap(), "t");
        assert!(student_rx.try_recv().is_err());

        assert_eq!(registry.send_where(|_| true, "all"), 3);
        assert_eq!(anon_rx.try_recv().unwrap(), "all");
        assert_eq!(registry.count_role(Role::Student), 1);
    }

    #[test]
    fn unregister_closes_queue() {
        let registry = registry(4);
        let (id, mut rx) = registry.register();
        let _ = registry.unregister(&id);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn client_pong_tracking() {
        let (tx, _rx) = mpsc::channel(1);
        let client = Client::new(ConnectionId::new(), tx, Duration::from_secs(90));
        assert!(client.is_alive());

        client.record_pong();
        assert!(client.is_alive());
    }

    #[test]
    fn cleanup_dead_clients_removes_expired() {
        let registry = registry(32);
        let (id, _rx) = registry.register();
        let (_live, _rx2) = registry.register();

        if let Some(client) = registry.clients.get(&id) {
            client.last_pong.store(0, Ordering::Relaxed);
        }

        let removed = registry.cleanup_dead_clients();
        assert_eq!(removed, vec![id]);
        assert_eq!(registry.count(), 1);
    }
}
