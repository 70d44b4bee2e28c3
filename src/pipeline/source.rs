//! Frame source abstraction for detector frame ingestion.
//!
//! Provides a unified trait for reading frames from different feeds:
//! replay files, stdin, and a TCP frame server, all speaking JSON lines:
//!
//! ```text
//! {"key": "image", "frame_id": 7, "shape": [2, 2], "pixels": [...], "attributes": {"acq_time": 0.5}}
//! {"key": "end"}
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::types::{FrameObservation, WireFrame};

/// Events produced by a frame source.
#[derive(Debug)]
pub enum FrameEvent {
    /// A decoded frame with its auxiliary readings.
    Frame(FrameObservation),
    /// Feed reached end of data (EOF, or an explicit end message).
    Eof,
}

/// Unrecoverable feed failures. The controller shuts down on any of these.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot connect to frame server {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("feed producer disconnected without an end-of-stream notification")]
    Disconnected,

    #[error("feed consumer is gone")]
    ReceiverClosed,

    #[error("feed is full, frame {frame_id} dropped")]
    Backpressure { frame_id: u64 },

    #[error("feed producer reported: {0}")]
    Upstream(String),
}

/// Trait abstracting where frames come from.
///
/// Implementations handle wire parsing and pacing internally. The controller
/// calls [`next_frame`](FrameSource::next_frame) in a `select!` with
/// cancellation, and [`close`](FrameSource::close) exactly once on shutdown.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Read the next frame.
    ///
    /// Returns `FrameEvent::Eof` when no more data is available.
    /// Returns `Err` on unrecoverable errors.
    async fn next_frame(&mut self) -> Result<FrameEvent, FeedError>;

    /// Human-readable name for logging (e.g. "replay", "stdin", "tcp").
    fn source_name(&self) -> &str;

    /// Release the feed. Called once when the controller stops.
    async fn close(&mut self) {}
}

/// One line of the wire protocol.
#[derive(Debug, Deserialize)]
#[serde(tag = "key", rename_all = "lowercase")]
enum FeedMessage {
    Image(WireFrame),
    End,
}

/// Decode one wire line. Malformed lines are logged and yield `None`.
fn decode_line(
    line: &str,
    pvs: &HashMap<String, String>,
    source: &str,
) -> Option<FrameEvent> {
    match serde_json::from_str::<FeedMessage>(line) {
        Ok(FeedMessage::Image(wire)) => match wire.into_observation(pvs) {
            Ok(frame) => Some(FrameEvent::Frame(frame)),
            Err(e) => {
                warn!(source, error = %e, "Dropping malformed frame");
                None
            }
        },
        Ok(FeedMessage::End) => Some(FrameEvent::Eof),
        Err(e) => {
            warn!(source, error = %e, "Failed to parse feed message");
            None
        }
    }
}

// ============================================================================
// JSON Lines Source (replay / stdin / tcp)
// ============================================================================

/// Reads JSON-lines frame messages from any buffered async reader.
///
/// Wire attributes are paired with process variables through `pvs`;
/// attributes with no mapping are dropped.
pub struct JsonLinesSource<R> {
    reader: R,
    line_buffer: String,
    pvs: Arc<HashMap<String, String>>,
    delay: Option<Duration>,
    yielded_first: bool,
    name: &'static str,
}

pub type ReplaySource = JsonLinesSource<BufReader<tokio::fs::File>>;
pub type StdinSource = JsonLinesSource<BufReader<tokio::io::Stdin>>;
pub type TcpSource = JsonLinesSource<BufReader<tokio::net::TcpStream>>;

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn from_reader(reader: R, name: &'static str, pvs: Arc<HashMap<String, String>>) -> Self {
        Self {
            reader,
            line_buffer: String::with_capacity(4096),
            pvs,
            delay: None,
            yielded_first: false,
            name,
        }
    }

    /// Pause between frames (not before the first one).
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = (delay_ms > 0).then(|| Duration::from_millis(delay_ms));
        self
    }
}

impl ReplaySource {
    /// Open a recorded feed file for replay.
    pub async fn open(
        path: &Path,
        pvs: Arc<HashMap<String, String>>,
        delay_ms: u64,
    ) -> Result<Self, FeedError> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::from_reader(BufReader::new(file), "replay", pvs).with_delay(delay_ms))
    }
}

impl StdinSource {
    /// Used with an external frame producer:
    /// `frame-producer | dq-controller --stdin`
    pub fn stdin(pvs: Arc<HashMap<String, String>>) -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()), "stdin", pvs)
    }
}

impl TcpSource {
    /// Connect to a frame server and return a ready source.
    pub async fn connect(addr: &str, pvs: Arc<HashMap<String, String>>) -> Result<Self, FeedError> {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|source| FeedError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        debug!(addr, "Connected to frame server");
        Ok(Self::from_reader(BufReader::new(stream), "tcp", pvs))
    }
}

#[async_trait]
impl<R> FrameSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn next_frame(&mut self) -> Result<FrameEvent, FeedError> {
        if self.yielded_first {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
        }
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(FrameEvent::Eof);
            }
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            // Skip malformed lines and keep reading
            if let Some(event) = decode_line(line, &self.pvs, self.name) {
                self.yielded_first = true;
                return Ok(event);
            }
        }
    }

    fn source_name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ACQ_TIME;
    use std::io::Cursor;

    fn pvs() -> Arc<HashMap<String, String>> {
        Arc::new(HashMap::from([(
            ACQ_TIME.to_string(),
            "13SIM1:cam1:AcquireTime".to_string(),
        )]))
    }

    fn source(text: &str) -> JsonLinesSource<Cursor<Vec<u8>>> {
        JsonLinesSource::from_reader(Cursor::new(text.as_bytes().to_vec()), "test", pvs())
    }

    #[tokio::test]
    async fn reads_frames_until_end_message() {
        let mut src = source(concat!(
            r#"{"key":"image","frame_id":1,"shape":[1,2],"pixels":[1.0,2.0],"attributes":{"acq_time":0.5,"gain":3.0}}"#,
            "\n\n",
            r#"{"key":"end"}"#,
            "\n",
            r#"{"key":"image","frame_id":2,"shape":[1,1],"pixels":[1.0]}"#,
            "\n"
        ));

        let FrameEvent::Frame(frame) = src.next_frame().await.unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(frame.frame_id, 1);
        assert_eq!(frame.slice.dim(), (1, 2));
        let acq = frame.acq_time().unwrap();
        assert_eq!(acq.pv, "13SIM1:cam1:AcquireTime");
        assert_eq!(acq.value, 0.5);
        assert!(frame.reading("gain").is_none(), "unmapped attribute dropped");

        assert!(matches!(src.next_frame().await.unwrap(), FrameEvent::Eof));
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let mut src = source(concat!(
            "not json\n",
            r#"{"key":"image","frame_id":4,"shape":[2,2],"pixels":[1.0]}"#,
            "\n",
            r#"{"key":"image","frame_id":5,"shape":[1,1],"pixels":[9.0]}"#,
            "\n"
        ));
        let FrameEvent::Frame(frame) = src.next_frame().await.unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(frame.frame_id, 5);
        assert!(matches!(src.next_frame().await.unwrap(), FrameEvent::Eof));
    }

    #[tokio::test]
    async fn replay_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"key":"image","frame_id":1,"shape":[1,1],"pixels":[1.0]}"#,
                "\n",
                r#"{"key":"image","frame_id":2,"shape":[1,1],"pixels":[2.0]}"#,
                "\n"
            ),
        )
        .unwrap();

        let mut src = ReplaySource::open(&path, pvs(), 1).await.unwrap();
        assert_eq!(src.source_name(), "replay");
        let mut ids = Vec::new();
        while let FrameEvent::Frame(f) = src.next_frame().await.unwrap() {
            ids.push(f.frame_id);
        }
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn missing_replay_file_is_io_error() {
        let result = ReplaySource::open(Path::new("/nonexistent/feed.jsonl"), pvs(), 0).await;
        assert!(matches!(result, Err(FeedError::Io(_))));
    }
}
