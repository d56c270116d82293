//! Borrow/return pool of peer clients.
//!
//! One pool per peer. Borrowing pops an idle client or dials a new one; a
//! freshly dialed client authenticates first when a password is
//! configured. Returning pushes the client back for reuse. A client whose
//! connection died simply fails its requests; callers drop it instead of
//! returning it.

use crate::cluster::client::PeerClient;
use crate::protocol::cmd_line;
use std::io;
use tokio::sync::Mutex;
use tracing::warn;

pub struct ClientPool {
    peer: String,
    require_pass: String,
    idle: Mutex<Vec<PeerClient>>,
}

impl ClientPool {
    pub fn new(peer: String, require_pass: String) -> Self {
        Self {
            peer,
            require_pass,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Pops an idle client or dials (and authenticates) a new one.
    pub async fn borrow(&self) -> io::Result<PeerClient> {
        if let Some(client) = self.idle.lock().await.pop() {
            return Ok(client);
        }

        let client = PeerClient::connect(&self.peer).await?;
        if !self.require_pass.is_empty() {
            let reply = client.send(cmd_line(&["AUTH", &self.require_pass])).await;
            if reply.is_error() {
                warn!(peer = %self.peer, reply = %reply, "peer AUTH failed");
            }
        }
        Ok(client)
    }

    /// Returns a client for reuse.
    pub async fn give_back(&self, client: PeerClient) {
        self.idle.lock().await.push(client);
    }

    /// Closes every idle client.
    pub async fn close(&self) {
        for client in self.idle.lock().await.drain(..) {
            client.close();
        }
    }
}
