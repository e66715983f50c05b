//! Grid replication over network transports.
//!
//! Concrete servers and clients (WebSocket, plain socket) live outside this
//! crate; the runtime only depends on the [`GridServer`] and [`GridClient`]
//! contracts. The [`GridBridge`] replicates device changes:
//!
//! - own `DeviceChanged` messages are broadcast/sent to peers;
//! - `DeviceChanged` received from another node is re-posted locally with
//!   `is_own = false`, so it is adopted but never echoed back.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::bus::{EventBus, MessageListener};
use crate::message::{Message, MessageKind, Payload};
use crate::types::{NodeId, Result};

/// What travels between grid nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridEnvelope {
    /// Node that produced the message.
    pub node: NodeId,
    pub message: Message,
}

impl GridEnvelope {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Connection events reported by servers and clients.
pub trait TransportListener: Send + Sync {
    fn on_connected(&self, peer: &str);

    fn on_disconnected(&self, peer: &str);

    fn on_received(&self, peer: &str, envelope: GridEnvelope);

    fn on_error(&self, peer: Option<&str>, error: &str);
}

#[async_trait]
pub trait GridServer: Send + Sync {
    /// Bind and accept peers. `config` is transport specific.
    async fn start(&self, config: &serde_json::Value) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Queue `envelope` for every connected peer without waiting.
    fn broadcast(&self, envelope: &GridEnvelope) -> Result<()>;

    fn is_running(&self) -> bool;

    fn has_clients(&self) -> bool;

    fn add(&self, listener: Arc<dyn TransportListener>);

    fn remove(&self, listener: &Arc<dyn TransportListener>) -> bool;
}

#[async_trait]
pub trait GridClient: Send + Sync {
    async fn connect(&self, config: &serde_json::Value) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Queue `envelope` for the server without waiting.
    fn send(&self, envelope: &GridEnvelope) -> Result<()>;

    fn add(&self, listener: Arc<dyn TransportListener>);

    fn remove(&self, listener: &Arc<dyn TransportListener>) -> bool;
}

/// Replicates device changes between this node and its peers.
pub struct GridBridge {
    node: NodeId,
    bus: EventBus,
    server: RwLock<Option<Arc<dyn GridServer>>>,
    client: RwLock<Option<Arc<dyn GridClient>>>,
}

impl fmt::Debug for GridBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridBridge")
            .field("node", &self.node)
            .field("server", &self.server.read().is_some())
            .field("client", &self.client.read().is_some())
            .finish()
    }
}

impl GridBridge {
    pub fn new(node: NodeId, bus: EventBus) -> Arc<Self> {
        let bridge = Arc::new(Self {
            node,
            bus,
            server: RwLock::new(None),
            client: RwLock::new(None),
        });
        let listener: Arc<dyn MessageListener> = bridge.clone();
        bridge
            .bus
            .add_filtered(listener, &[MessageKind::DeviceChanged]);
        bridge
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn attach_server(self: &Arc<Self>, server: Arc<dyn GridServer>) {
        let listener: Arc<dyn TransportListener> = self.clone();
        server.add(listener);
        if let Some(previous) = self.server.write().replace(server) {
            previous.remove(&(self.clone() as Arc<dyn TransportListener>));
        }
    }

    pub fn attach_client(self: &Arc<Self>, client: Arc<dyn GridClient>) {
        let listener: Arc<dyn TransportListener> = self.clone();
        client.add(listener);
        if let Some(previous) = self.client.write().replace(client) {
            previous.remove(&(self.clone() as Arc<dyn TransportListener>));
        }
    }

    /// Unhook from the bus and every transport.
    pub fn detach(self: &Arc<Self>) {
        let listener: Arc<dyn TransportListener> = self.clone();
        if let Some(server) = self.server.write().take() {
            server.remove(&listener);
        }
        if let Some(client) = self.client.write().take() {
            client.remove(&listener);
        }
        self.bus.remove(self);
    }

    fn replicate(&self, message: &Message) -> Result<()> {
        let envelope = GridEnvelope {
            node: self.node.clone(),
            message: message.clone(),
        };
        if let Some(server) = self.server.read().as_ref() {
            if server.is_running() && server.has_clients() {
                server.broadcast(&envelope)?;
            }
        }
        if let Some(client) = self.client.read().as_ref() {
            if client.is_connected() {
                client.send(&envelope)?;
            }
        }
        Ok(())
    }
}

impl MessageListener for GridBridge {
    fn on_message(&self, message: &Message) -> Result<()> {
        if message.kind() == MessageKind::DeviceChanged && message.is_own() {
            self.replicate(message)?;
        }
        Ok(())
    }
}

impl TransportListener for GridBridge {
    fn on_connected(&self, peer: &str) {
        tracing::info!(peer, "grid peer connected");
    }

    fn on_disconnected(&self, peer: &str) {
        tracing::info!(peer, "grid peer disconnected");
    }

    fn on_received(&self, peer: &str, envelope: GridEnvelope) {
        if envelope.node == self.node {
            return;
        }
        let Payload::DeviceChanged { name, value, .. } = envelope.message.payload else {
            tracing::debug!(peer, node = %envelope.node, "ignoring non-device grid message");
            return;
        };
        if let Err(e) = self.bus.post(Message::device_changed(name, value, false)) {
            tracing::error!(peer, error = %e, "replicated change dropped");
        }
    }

    fn on_error(&self, peer: Option<&str>, error: &str) {
        tracing::warn!(peer = peer.unwrap_or("-"), error, "grid transport error");
    }
}
