//! Process-value sinks: the hardware side of the feedback loop
//!
//! The controller never talks to the detector directly. Adjusters produce a
//! `(pv, value)` pair and a [`ProcessValueSink`] carries it to the hardware,
//! a control gateway, or just the log.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Process-value write failures
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("write rejected for {pv}: {reason}")]
    Rejected { pv: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract `set_process_value(identifier, value)` primitive.
///
/// Implementations must be safe to call from several dispatch workers at
/// once; ordering per process variable is the caller's job.
#[async_trait]
pub trait ProcessValueSink: Send + Sync + 'static {
    async fn set_process_value(&self, pv: &str, value: f64) -> Result<(), SinkError>;

    /// Human-readable name for logging (e.g. "log", "tcp").
    fn sink_name(&self) -> &str;
}

// ============================================================================
// Log Sink (dry run)
// ============================================================================

/// Logs every write instead of performing it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl ProcessValueSink for LogSink {
    async fn set_process_value(&self, pv: &str, value: f64) -> Result<(), SinkError> {
        info!(pv = %pv, value, "[dry-run] set process value");
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "log"
    }
}

// ============================================================================
// TCP Sink (JSON lines to a control gateway)
// ============================================================================

#[derive(Serialize)]
struct SetValueCommand<'a> {
    pv: &'a str,
    value: f64,
}

/// One pending write, owned by the connection task until it is acked.
struct WriteRequest {
    pv: String,
    line: Vec<u8>,
    ack: oneshot::Sender<Result<(), SinkError>>,
}

/// Sends `{"pv": ..., "value": ...}` lines to a control gateway over TCP.
///
/// The gateway owns the real channel-access / PV-access write and its
/// retry policy. The socket is owned by a connection task fed over mpsc and
/// each caller waits on a oneshot ack. Requests whose caller has already
/// gone are skipped. A line abandoned mid-write poisons the connection: it
/// is closed with no further bytes and re-opened on the next request.
pub struct TcpSink {
    request_tx: mpsc::Sender<WriteRequest>,
}

impl TcpSink {
    /// Connect to a gateway and return a ready sink.
    pub async fn connect(addr: &str) -> Result<Self, SinkError> {
        let stream = open_stream(addr).await?;
        info!(addr = %addr, "Connected to process-value gateway");

        let (request_tx, request_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let connection = GatewayConnection {
            addr: addr.to_string(),
            stream: Some(stream),
            request_rx,
        };
        tokio::spawn(connection.run());
        Ok(Self { request_tx })
    }
}

const WRITE_QUEUE_CAPACITY: usize = 32;

async fn open_stream(addr: &str) -> Result<TcpStream, SinkError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| SinkError::Connection(format!("{addr}: {e}")))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Connection task: sole owner of the gateway socket.
struct GatewayConnection {
    addr: String,
    stream: Option<TcpStream>,
    request_rx: mpsc::Receiver<WriteRequest>,
}

impl GatewayConnection {
    async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            self.handle(request).await;
        }
        debug!(addr = %self.addr, "Gateway connection task stopped");
    }

    async fn handle(&mut self, mut request: WriteRequest) {
        if request.ack.is_closed() {
            debug!(pv = %request.pv, "Dropping write abandoned before it started");
            return;
        }

        if self.stream.is_none() {
            let opened = tokio::select! {
                opened = open_stream(&self.addr) => opened,
                () = request.ack.closed() => return,
            };
            match opened {
                Ok(stream) => {
                    info!(addr = %self.addr, "Reconnected to process-value gateway");
                    self.stream = Some(stream);
                }
                Err(e) => {
                    let _ = request.ack.send(Err(e));
                    return;
                }
            }
        }
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let written = tokio::select! {
            written = stream.write_all(&request.line) => Some(written),
            () = request.ack.closed() => None,
        };
        let result = match written {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => {
                self.stream = None;
                Err(SinkError::from(e))
            }
            None => {
                warn!(
                    addr = %self.addr,
                    pv = %request.pv,
                    "Write abandoned mid-line, dropping gateway connection"
                );
                self.stream = None;
                return;
            }
        };

        if request.ack.send(result).is_err() {
            warn!(pv = %request.pv, "Write completed after the caller gave up");
        }
    }
}

#[async_trait]
impl ProcessValueSink for TcpSink {
    async fn set_process_value(&self, pv: &str, value: f64) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&SetValueCommand { pv, value }).map_err(|e| {
            SinkError::Rejected {
                pv: pv.to_string(),
                reason: e.to_string(),
            }
        })?;
        line.push(b'\n');

        let closed = || SinkError::Connection("gateway connection task stopped".to_string());
        let (ack, ack_rx) = oneshot::channel();
        self.request_tx
            .send(WriteRequest {
                pv: pv.to_string(),
                line,
                ack,
            })
            .await
            .map_err(|_| closed())?;
        ack_rx.await.map_err(|_| closed())?
    }

    fn sink_name(&self) -> &str {
        "tcp"
    }
}

// ============================================================================
// Recording Sink
// ============================================================================

/// Records every write in memory. Can be told to fail or stall on given PVs.
#[derive(Debug, Default)]
pub struct RecordingSink {
    writes: Mutex<Vec<(String, f64)>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write to `pv` (the attempt is still recorded).
    pub fn failing_on(mut self, pv: impl Into<String>) -> Self {
        self.failing.insert(pv.into());
        self
    }

    /// Sleep before completing each write.
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Snapshot of the attempted writes, in completion order.
    pub fn writes(&self) -> Vec<(String, f64)> {
        self.writes
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProcessValueSink for RecordingSink {
    async fn set_process_value(&self, pv: &str, value: f64) -> Result<(), SinkError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut writes) = self.writes.lock() {
            writes.push((pv.to_string(), value));
        }
        if self.failing.contains(pv) {
            return Err(SinkError::Rejected {
                pv: pv.to_string(),
                reason: "configured to fail".to_string(),
            });
        }
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn recording_sink_records_and_fails_on_request() {
        let sink = RecordingSink::new().failing_on("bad:pv");
        assert!(sink.set_process_value("good:pv", 1.5).await.is_ok());
        assert!(sink.set_process_value("bad:pv", 2.5).await.is_err());
        assert_eq!(
            sink.writes(),
            vec![("good:pv".to_string(), 1.5), ("bad:pv".to_string(), 2.5)]
        );
    }

    #[tokio::test]
    async fn tcp_sink_writes_json_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut lines = tokio::io::BufReader::new(stream).lines();
            lines.next_line().await.expect("read").expect("line")
        });

        let sink = TcpSink::connect(&addr).await.expect("connect");
        sink.set_process_value("13SIM1:cam1:AcquireTime", 0.25)
            .await
            .expect("write");

        let line = server.await.expect("join");
        let json: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(json["pv"], "13SIM1:cam1:AcquireTime");
        assert_eq!(json["value"], 0.25);
    }

    #[tokio::test]
    async fn abandoned_write_never_reaches_a_stalled_gateway() {
        use tokio::io::AsyncReadExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let sink = TcpSink::connect(&addr).await.expect("connect");
        let (mut stalled, _) = listener.accept().await.expect("accept");

        // Large lines fill the socket buffers quickly while nobody reads
        let pv = "X".repeat(8192);
        let mut abandoned = None;
        for i in 0..100_000u32 {
            let attempt = tokio::time::timeout(
                Duration::from_millis(20),
                sink.set_process_value(&pv, f64::from(i)),
            )
            .await;
            match attempt {
                Ok(result) => result.expect("write"),
                Err(_) => {
                    abandoned = Some(i);
                    break;
                }
            }
        }
        let abandoned = abandoned.expect("gateway never stalled");

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), stalled.read_to_end(&mut received))
            .await
            .expect("poisoned connection must be closed")
            .expect("read");

        let text = String::from_utf8_lossy(&received);
        let mut lines: Vec<&str> = text.split('\n').collect();
        let trailing = lines.pop().unwrap_or_default();
        let fragment_parses = serde_json::from_str::<serde_json::Value>(trailing).is_ok();
        assert!(trailing.is_empty() || !fragment_parses);
        assert_eq!(lines.len(), abandoned as usize);
        for (i, line) in lines.iter().enumerate() {
            let json: serde_json::Value = serde_json::from_str(line).expect("complete line");
            assert_eq!(json["value"], f64::from(i as u32));
        }

        // The next write goes out on a fresh connection
        sink.set_process_value("13SIM1:cam1:AcquireTime", 0.5)
            .await
            .expect("write after reconnect");
        let (fresh, _) = listener.accept().await.expect("accept");
        let line = tokio::io::BufReader::new(fresh)
            .lines()
            .next_line()
            .await
            .expect("read")
            .expect("line");
        let json: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(json["value"], 0.5);
    }

    #[tokio::test]
    async fn tcp_sink_reports_connection_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        drop(listener);
        let err = TcpSink::connect(&addr).await.err().expect("must fail");
        assert!(matches!(err, SinkError::Connection(_)));
    }
}
