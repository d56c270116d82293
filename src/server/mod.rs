//! TCP Server
//!
//! Accepts connections and runs one task per client:
//!
//! ```text
//! ┌─────────────┐  accept   ┌──────────────────────────────────────┐
//! │ TcpListener │──────────>│ connection task                      │
//! └─────┬───────┘           │  read → parse RESP → engine.exec →   │
//!       │ signal            │  serialize reply → write             │
//!       ▼                   └──────────────────────────────────────┘
//! ┌─────────────┐
//! │  shutdown   │  close listener → notify tasks → drain (≤10s)
//! └─────────────┘  → engine.close()
//! ```
//!
//! The engine behind `exec` is either the standalone [`MultiDb`] or the
//! [`Cluster`] facade, chosen from the configuration at startup.
//!
//! Protocol errors reply `-ERR protocol error: ...`, drop the buffered
//! bytes, and keep the connection; I/O errors and EOF close it. Shutdown
//! (SIGINT/SIGTERM/SIGHUP/SIGQUIT) stops the accept loop, closes active
//! connections, and drains the AOF writer before returning.

use crate::cluster::Cluster;
use crate::config::ServerConfig;
use crate::connection::{ConnectionStats, Session};
use crate::database::MultiDb;
use crate::protocol::{RespFrame, RespParser};
use bytes::{Buf, BytesMut};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Initial capacity of each connection's read buffer.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// How long shutdown waits for in-flight replies to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The command engine serving this process.
pub enum Engine {
    Standalone(MultiDb),
    Cluster(Cluster),
}

impl Engine {
    /// Picks cluster or standalone mode from the configuration.
    pub fn build(config: Arc<ServerConfig>) -> io::Result<Self> {
        if config.cluster_enabled() {
            Ok(Engine::Cluster(Cluster::new(config)?))
        } else {
            Ok(Engine::Standalone(MultiDb::new(config)?))
        }
    }

    pub async fn exec(&self, session: &Session, cmd_line: &[bytes::Bytes]) -> RespFrame {
        match self {
            Engine::Standalone(db) => db.exec(session, cmd_line),
            Engine::Cluster(cluster) => cluster.exec(session, cmd_line).await,
        }
    }

    pub async fn close(&self) {
        match self {
            Engine::Standalone(db) => db.close(),
            Engine::Cluster(cluster) => cluster.close().await,
        }
    }
}

/// Binds the configured address and serves until a termination signal.
pub async fn serve(config: Arc<ServerConfig>) -> anyhow::Result<()> {
    serve_with_shutdown(config, shutdown_signal()).await
}

/// Like [`serve`], with a caller-supplied shutdown future (used by tests).
pub async fn serve_with_shutdown(
    config: Arc<ServerConfig>,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_address()).await?;
    let engine = Arc::new(Engine::build(Arc::clone(&config))?);
    let stats = Arc::new(ConnectionStats::new());
    let (notify_tx, notify_rx) = watch::channel(false);

    info!(addr = %config.bind_address(), "listening");

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping server");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if config.max_clients > 0 && stats.active() >= config.max_clients as u64 {
                        warn!(client = %addr, "maxclients reached, refusing connection");
                        drop(stream);
                        continue;
                    }
                    tokio::spawn(handle_connection(
                        stream,
                        addr,
                        Arc::clone(&engine),
                        Arc::clone(&stats),
                        notify_rx.clone(),
                    ));
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                }
            }
        }
    }

    // stop accepting, tell every connection task, then drain
    drop(listener);
    let _ = notify_tx.send(true);
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while stats.active() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    engine.close().await;
    info!("server shutdown complete");
    Ok(())
}

/// One client's read→parse→execute→reply loop.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    engine: Arc<Engine>,
    stats: Arc<ConnectionStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    stats.connection_opened();
    info!(client = %addr, "client connected");

    let session = Session::new();
    let mut stream = BufWriter::new(stream);
    let mut buffer = BytesMut::with_capacity(INITIAL_BUFFER_SIZE);
    let mut parser = RespParser::new();

    'conn: loop {
        // drain every complete frame already buffered (pipelining)
        loop {
            match parser.parse(&buffer) {
                Ok(Some((frame, used))) => {
                    buffer.advance(used);
                    let cmd_line = match frame.into_cmd_line() {
                        Some(cmd_line) => cmd_line,
                        None => {
                            debug!(client = %addr, "non-command frame ignored");
                            continue;
                        }
                    };
                    debug!(
                        client = %addr,
                        cmd = %String::from_utf8_lossy(&cmd_line[0]),
                        "command"
                    );

                    let reply = engine.exec(&session, &cmd_line).await;
                    stats.command_processed();

                    let data = reply.serialize();
                    if write_reply(&mut stream, &data).await.is_err() {
                        break 'conn;
                    }
                    stats.add_bytes_written(data.len());
                }
                Ok(None) => break,
                Err(e) => {
                    // connection-local recovery: report, drop the bad
                    // bytes, keep serving
                    warn!(client = %addr, error = %e, "protocol error");
                    let data = RespFrame::error(e.to_string()).serialize();
                    if write_reply(&mut stream, &data).await.is_err() {
                        break 'conn;
                    }
                    buffer.clear();
                }
            }
        }

        tokio::select! {
            _ = shutdown.changed() => break 'conn,
            read = stream.get_mut().read_buf(&mut buffer) => match read {
                Ok(0) => break 'conn,
                Ok(n) => stats.add_bytes_read(n),
                Err(e) => {
                    debug!(client = %addr, error = %e, "read failed");
                    break 'conn;
                }
            }
        }
    }

    stats.connection_closed();
    info!(client = %addr, "client disconnected");
}

async fn write_reply(stream: &mut BufWriter<TcpStream>, data: &[u8]) -> io::Result<()> {
    stream.write_all(data).await?;
    stream.flush().await
}

/// Resolves when any of SIGINT/SIGTERM/SIGHUP/SIGQUIT arrives.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut interrupt =
        signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut hangup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
    let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
        _ = hangup.recv() => {}
        _ = quit.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
