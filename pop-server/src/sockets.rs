//! Subscribers attached to a channel.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A client connection as seen by channels: an id and its outbound queue.
#[derive(Debug, Clone)]
pub struct Socket {
    id: String,
    tx: mpsc::Sender<String>,
}

impl Socket {
    pub fn new(id: impl Into<String>, tx: mpsc::Sender<String>) -> Self {
        Self { id: id.into(), tx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a line for this client without blocking.
    ///
    /// Returns false when the queue is full or the connection is gone.
    pub fn send(&self, line: String) -> bool {
        match self.tx.try_send(line) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(socket = %self.id, "Send buffer full or closed: {e}");
                false
            }
        }
    }
}

/// Socket set of one channel, keyed by socket id.
#[derive(Debug, Default)]
pub struct Sockets {
    store: Mutex<HashMap<String, Socket>>,
}

impl Sockets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a socket, replacing any previous entry with the same id.
    pub fn upsert(&self, socket: Socket) {
        self.store.lock().insert(socket.id.clone(), socket);
    }

    /// Remove a socket. Returns false if it was not present.
    pub fn delete(&self, id: &str) -> bool {
        self.store.lock().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.store.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// Send the same line to every socket.
    pub fn send_to_all(&self, line: &str) {
        for socket in self.store.lock().values() {
            socket.send(line.to_string());
        }
    }
}
