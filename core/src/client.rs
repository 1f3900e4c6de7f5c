//! Local client connection handle

use crate::{Error, Result};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Write side of a local connection.
///
/// The socket engine owns the receiving half and flushes queued lines to the peer.
/// Cloning is cheap; channel memberships keep a clone for broadcasting.
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique connection ID
    pub id: Uuid,
    /// Remote address as reported by the socket engine
    pub remote_addr: String,
    /// Line sender for writing to the client
    sender: mpsc::UnboundedSender<String>,
}

impl Client {
    /// Create a new client
    pub fn new(remote_addr: impl Into<String>, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr: remote_addr.into(),
            sender,
        }
    }

    /// Create a client together with the receiver the socket engine drains
    pub fn channel(remote_addr: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(remote_addr, sender), receiver)
    }

    /// Queue one protocol line for the client
    pub fn send_line(&self, line: impl Into<String>) -> Result<()> {
        self.sender
            .send(line.into())
            .map_err(|_| Error::Connection("Failed to send line to client".to_string()))
    }

    /// Whether the socket engine has dropped the receiving side
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
