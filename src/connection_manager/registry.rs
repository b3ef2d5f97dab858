use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::metrics::ConnectionMetrics;
use crate::websocket::OutboundMessage;

use super::stats::ConnectionStats;
use super::types::{generate_socket_id, Connection, ConnectionState};

/// Manages all WebSocket connections of this process
pub struct ConnectionManager {
    /// socket_id -> Connection
    connections: DashMap<String, Arc<Connection>>,
    /// Frames buffered per connection
    outbound_buffer: usize,
}

impl ConnectionManager {
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            connections: DashMap::new(),
            outbound_buffer: outbound_buffer.max(1),
        }
    }

    /// Register a new connection under a fresh socket_id.
    ///
    /// Returns the handle and the receiving end of its send path.
    pub fn register(&self) -> (Arc<Connection>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(self.outbound_buffer);

        loop {
            let socket_id = generate_socket_id();
            if let Entry::Vacant(entry) = self.connections.entry(socket_id.clone()) {
                let connection = Arc::new(Connection::new(socket_id, tx));
                entry.insert(Arc::clone(&connection));

                ConnectionMetrics::record_opened();
                tracing::info!(socket_id = %connection.socket_id(), "Connection registered");
                return (connection, rx);
            }
        }
    }

    pub fn unregister(&self, socket_id: &str) {
        if self.connections.remove(socket_id).is_some() {
            ConnectionMetrics::record_closed();
            tracing::info!(socket_id = %socket_id, "Connection unregistered");
        }
    }

    pub fn get(&self, socket_id: &str) -> Option<Arc<Connection>> {
        self.connections.get(socket_id).map(|c| Arc::clone(c.value()))
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn stats(&self) -> ConnectionStats {
        let established = self
            .connections
            .iter()
            .filter(|c| c.state() == ConnectionState::Established)
            .count();

        ConnectionStats {
            total_connections: self.connections.len(),
            established_connections: established,
        }
    }
}
