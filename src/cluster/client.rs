//! Outbound client for one peer connection.
//!
//! Requests are pipelined over a single TCP connection: a writer task
//! serializes command lines onto the socket and queues the reply slot, a
//! reader task parses the peer's reply stream and completes the slots in
//! FIFO order. Callers get their reply through a oneshot, bounded by a 3s
//! timeout. A heartbeat task pings the peer every 10s to keep the
//! connection warm and detect silent failure.

use crate::protocol::{cmd_line, encode_cmd_line, CmdLine, RespFrame, RespParser};
use bytes::{Buf, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Overall budget for one request, queueing included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Interval between keep-alive pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Depth of the outbound request queue.
const REQUEST_QUEUE: usize = 256;

struct Request {
    args: CmdLine,
    reply_tx: oneshot::Sender<RespFrame>,
}

/// A pipelined client for a single peer.
pub struct PeerClient {
    req_tx: mpsc::Sender<Request>,
    tasks: Vec<JoinHandle<()>>,
}

impl PeerClient {
    /// Dials `addr` and starts the read/write/heartbeat tasks.
    pub async fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        let (req_tx, req_rx) = mpsc::channel(REQUEST_QUEUE);
        let (slot_tx, slot_rx) = mpsc::unbounded_channel();

        let tasks = vec![
            tokio::spawn(write_loop(write_half, req_rx, slot_tx)),
            tokio::spawn(read_loop(read_half, slot_rx)),
            tokio::spawn(heartbeat_loop(req_tx.clone())),
        ];

        debug!(peer = %addr, "peer client connected");
        Ok(Self { req_tx, tasks })
    }

    /// Sends one command and waits for its reply.
    pub async fn send(&self, args: CmdLine) -> RespFrame {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .req_tx
            .send(Request { args, reply_tx })
            .await
            .is_err()
        {
            return RespFrame::error("request failed");
        }
        match timeout(REQUEST_TIMEOUT, reply_rx).await {
            Err(_) => RespFrame::error("server timeout"),
            Ok(Err(_)) => RespFrame::error("request failed"),
            Ok(Ok(reply)) => reply,
        }
    }

    /// Tears down the connection tasks.
    pub fn close(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn write_loop(
    mut socket: OwnedWriteHalf,
    mut req_rx: mpsc::Receiver<Request>,
    slot_tx: mpsc::UnboundedSender<oneshot::Sender<RespFrame>>,
) {
    while let Some(request) = req_rx.recv().await {
        let data = encode_cmd_line(&request.args);
        if let Err(e) = socket.write_all(&data).await {
            warn!(error = %e, "peer write failed");
            let _ = request.reply_tx.send(RespFrame::error("request failed"));
            return;
        }
        if slot_tx.send(request.reply_tx).is_err() {
            return;
        }
    }
}

async fn read_loop(
    mut socket: OwnedReadHalf,
    mut slot_rx: mpsc::UnboundedReceiver<oneshot::Sender<RespFrame>>,
) {
    let mut parser = RespParser::new();
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        loop {
            match parser.parse(&buffer) {
                Ok(Some((frame, used))) => {
                    buffer.advance(used);
                    match slot_rx.recv().await {
                        Some(reply_tx) => {
                            let _ = reply_tx.send(frame);
                        }
                        None => return,
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "peer sent malformed reply");
                    buffer.clear();
                    break;
                }
            }
        }

        match socket.read_buf(&mut buffer).await {
            // EOF: in-flight slots drop, completing their senders with
            // "request failed"
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "peer read failed");
                return;
            }
        }
    }
}

async fn heartbeat_loop(req_tx: mpsc::Sender<Request>) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.tick().await; // the first tick is immediate; skip it
    loop {
        ticker.tick().await;
        let (reply_tx, reply_rx) = oneshot::channel();
        let ping = Request {
            args: cmd_line(&["PING"]),
            reply_tx,
        };
        if req_tx.send(ping).await.is_err() {
            return;
        }
        if timeout(REQUEST_TIMEOUT, reply_rx).await.is_err() {
            warn!("peer heartbeat timed out");
        }
    }
}
