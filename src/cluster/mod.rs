//! Cluster facade.
//!
//! A cluster node embeds a full standalone [`MultiDb`] and routes each
//! command by a router table: single-key commands relay to the node the
//! consistent-hash ring picks for their first key (possibly this node),
//! `FLUSHDB`/`FLUSHALL` broadcast to every node, and maintenance commands
//! run locally. Relayed commands travel over pooled [`PeerClient`]
//! connections and are prefixed with a `SELECT` for the caller's database.
//!
//! `MULTI`/`EXEC`/`DISCARD` are not supported in cluster mode and say so
//! explicitly; `SELECT` is applied to the local session only, which is
//! sufficient because every relay re-selects on the peer connection.

pub mod client;
pub mod pool;
pub mod ring;

pub use client::PeerClient;
pub use pool::ClientPool;
pub use ring::HashRing;

use crate::config::ServerConfig;
use crate::connection::Session;
use crate::database::{sys, MultiDb};
use crate::protocol::RespFrame;
use bytes::Bytes;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use tracing::info;

/// Virtual nodes per physical peer on the hash ring.
const REPLICAS: usize = 3;

/// How the router table treats a command.
enum Route {
    /// Relay to the node owning the first key argument.
    SingleKey,
    /// Relay to every node and merge the replies.
    Broadcast,
    /// Execute on the embedded engine only.
    Local,
}

static ROUTER: Lazy<HashMap<&'static str, Route>> = Lazy::new(|| {
    let mut table = HashMap::new();
    let single: &[&str] = &[
        "get", "set", "del", "exists", "expire", "pexpire", "expireat", "pexpireat", "ttl",
        "pttl", "persist", "type", "lindex", "llen", "lpop", "lpush", "lpushx", "lrange",
        "lrem", "lset", "rpop", "rpoplpush", "rpush", "rpushx", "sadd", "sismember", "srem",
        "spop", "scard", "smembers", "srandmember", "sinter", "sinterstore", "sunion",
        "sunionstore", "sdiff", "sdiffstore",
    ];
    for name in single {
        table.insert(*name, Route::SingleKey);
    }
    for name in ["flushdb", "flushall"] {
        table.insert(name, Route::Broadcast);
    }
    for name in ["ping", "bgrewriteaof", "rewriteaof"] {
        table.insert(name, Route::Local);
    }
    table
});

/// One node of the cluster.
pub struct Cluster {
    self_addr: String,
    nodes: Vec<String>,
    ring: HashRing,
    pools: HashMap<String, ClientPool>,
    db: MultiDb,
    config: Arc<ServerConfig>,
}

impl Cluster {
    /// Builds this node: the embedded engine, the ring over peers + self,
    /// and one connection pool per peer.
    pub fn new(config: Arc<ServerConfig>) -> io::Result<Self> {
        let db = MultiDb::new(Arc::clone(&config))?;

        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(config.peers.len() + 1);
        for peer in &config.peers {
            if seen.insert(peer.clone()) {
                nodes.push(peer.clone());
            }
        }
        if seen.insert(config.self_addr.clone()) {
            nodes.push(config.self_addr.clone());
        }

        let mut ring = HashRing::new(REPLICAS);
        ring.add_nodes(&nodes);

        let mut pools = HashMap::new();
        for peer in &config.peers {
            if *peer != config.self_addr && !pools.contains_key(peer) {
                pools.insert(
                    peer.clone(),
                    ClientPool::new(peer.clone(), config.require_pass.clone()),
                );
            }
        }

        info!(self_addr = %config.self_addr, nodes = nodes.len(), "cluster node ready");
        Ok(Self {
            self_addr: config.self_addr.clone(),
            nodes,
            ring,
            pools,
            db,
            config,
        })
    }

    /// Routes one command line for `session`.
    pub async fn exec(&self, session: &Session, cmd_line: &[Bytes]) -> RespFrame {
        if cmd_line.is_empty() {
            return RespFrame::error("ERR empty command");
        }
        let name = String::from_utf8_lossy(&cmd_line[0]).to_ascii_lowercase();

        if name == "auth" {
            return sys::auth(&self.config, session, &cmd_line[1..]);
        }
        if !sys::is_authenticated(&self.config, session) {
            return RespFrame::error("NOAUTH Authentication required");
        }

        match name.as_str() {
            "multi" | "exec" | "discard" => {
                return RespFrame::error(format!(
                    "ERR {} is not supported in cluster mode",
                    name
                ));
            }
            // local bookkeeping only; relays re-select per request
            "select" => return self.db.exec(session, cmd_line),
            _ => {}
        }

        match ROUTER.get(name.as_str()) {
            None => RespFrame::error(format!(
                "ERR unknown command '{}', or not supported in cluster mode",
                name
            )),
            Some(Route::Local) => self.db.exec(session, cmd_line),
            Some(Route::SingleKey) => {
                let key = match cmd_line.get(1) {
                    Some(key) => String::from_utf8_lossy(key).into_owned(),
                    None => return RespFrame::arg_num_error(&name),
                };
                match self.ring.pick_node(&key) {
                    Some(node) => {
                        let node = node.to_string();
                        self.relay(&node, session, cmd_line).await
                    }
                    None => self.db.exec(session, cmd_line),
                }
            }
            Some(Route::Broadcast) => {
                let replies = self.broadcast(session, cmd_line).await;
                for (node, reply) in &replies {
                    if reply.is_error() {
                        return RespFrame::error(format!(
                            "ERR broadcast to {} failed: {}",
                            node, reply
                        ));
                    }
                }
                RespFrame::ok()
            }
        }
    }

    /// Executes locally when `node` is this node, otherwise forwards over
    /// a pooled connection with a `SELECT` prefix.
    async fn relay(&self, node: &str, session: &Session, cmd_line: &[Bytes]) -> RespFrame {
        if node == self.self_addr {
            return self.db.exec(session, cmd_line);
        }

        let pool = match self.pools.get(node) {
            Some(pool) => pool,
            None => return RespFrame::error("ERR connection pool not found"),
        };
        let client = match pool.borrow().await {
            Ok(client) => client,
            Err(e) => return RespFrame::error(format!("ERR {}", e)),
        };

        let select = crate::protocol::cmd_line(&["SELECT", &session.db_index().to_string()]);
        client.send(select).await;
        let reply = client.send(cmd_line.to_vec()).await;
        pool.give_back(client).await;
        reply
    }

    /// Relays to every node, collecting per-node replies.
    pub async fn broadcast(
        &self,
        session: &Session,
        cmd_line: &[Bytes],
    ) -> HashMap<String, RespFrame> {
        let mut replies = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let reply = self.relay(node, session, cmd_line).await;
            replies.insert(node.clone(), reply);
        }
        replies
    }

    /// Shuts down the embedded engine and every peer pool.
    pub async fn close(&self) {
        self.db.close();
        for pool in self.pools.values() {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cmd_line;

    /// A single-node cluster: self is the only ring member, so every
    /// command executes locally.
    fn lone_node() -> Cluster {
        let config = Arc::new(ServerConfig {
            append_only: false,
            self_addr: "127.0.0.1:16399".to_string(),
            ..ServerConfig::default()
        });
        Cluster::new(config).unwrap()
    }

    #[tokio::test]
    async fn pools_are_registered_for_every_peer() {
        let config = Arc::new(ServerConfig {
            append_only: false,
            self_addr: "127.0.0.1:7001".to_string(),
            peers: vec![
                "127.0.0.1:7002".to_string(),
                "127.0.0.1:7003".to_string(),
                "127.0.0.1:7002".to_string(),
            ],
            ..ServerConfig::default()
        });
        let cluster = Cluster::new(config).unwrap();
        assert_eq!(cluster.pools.len(), 2);
        assert_eq!(cluster.nodes.len(), 3);
        cluster.close().await;
    }

    #[tokio::test]
    async fn lone_node_serves_locally() {
        let cluster = lone_node();
        let session = Session::new();
        assert_eq!(
            cluster.exec(&session, &cmd_line(&["SET", "k", "v"])).await,
            RespFrame::ok()
        );
        assert_eq!(
            cluster.exec(&session, &cmd_line(&["GET", "k"])).await,
            RespFrame::bulk(Bytes::from("v"))
        );
        assert_eq!(
            cluster.exec(&session, &cmd_line(&["PING"])).await,
            RespFrame::status("PONG")
        );
        cluster.close().await;
    }

    #[tokio::test]
    async fn transactions_are_rejected_explicitly() {
        let cluster = lone_node();
        let session = Session::new();
        for name in ["MULTI", "EXEC", "DISCARD"] {
            let reply = cluster.exec(&session, &cmd_line(&[name])).await;
            assert_eq!(
                reply,
                RespFrame::error(format!(
                    "ERR {} is not supported in cluster mode",
                    name.to_lowercase()
                ))
            );
        }
        cluster.close().await;
    }

    #[tokio::test]
    async fn select_applies_locally() {
        let cluster = lone_node();
        let session = Session::new();
        assert_eq!(
            cluster.exec(&session, &cmd_line(&["SELECT", "3"])).await,
            RespFrame::ok()
        );
        assert_eq!(session.db_index(), 3);
        cluster.close().await;
    }

    #[tokio::test]
    async fn unrouted_commands_are_rejected() {
        let cluster = lone_node();
        let session = Session::new();
        assert_eq!(
            cluster.exec(&session, &cmd_line(&["KEYS", "*"])).await,
            RespFrame::error("ERR unknown command 'keys', or not supported in cluster mode")
        );
        cluster.close().await;
    }

    #[tokio::test]
    async fn flush_broadcast_on_lone_node() {
        let cluster = lone_node();
        let session = Session::new();
        cluster.exec(&session, &cmd_line(&["SET", "k", "v"])).await;
        assert_eq!(
            cluster.exec(&session, &cmd_line(&["FLUSHALL"])).await,
            RespFrame::ok()
        );
        assert_eq!(
            cluster.exec(&session, &cmd_line(&["GET", "k"])).await,
            RespFrame::Null
        );
        cluster.close().await;
    }
}
