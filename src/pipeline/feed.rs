//! Callback-style feed channel: a producer pushes frames, the controller
//! pulls them as a [`FrameSource`].
//!
//! The receiver is not `Clone`, so a feed has exactly one consumer.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::source::{FeedError, FrameEvent, FrameSource};
use crate::types::FrameObservation;

enum FeedItem {
    Frame(FrameObservation),
    End,
    Error(FeedError),
}

/// Create a bounded feed with room for `capacity` undelivered frames.
pub fn feed_channel(capacity: usize) -> (FeedSender, FeedReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        FeedSender { tx },
        FeedReceiver {
            rx,
            finished: false,
        },
    )
}

/// Producer half. Clone it to feed from several tasks.
#[derive(Clone)]
pub struct FeedSender {
    tx: mpsc::Sender<FeedItem>,
}

impl FeedSender {
    /// Deliver a frame, waiting for room.
    pub async fn on_frame(&self, frame: FrameObservation) -> Result<(), FeedError> {
        self.tx
            .send(FeedItem::Frame(frame))
            .await
            .map_err(|_| FeedError::ReceiverClosed)
    }

    /// Deliver a frame without waiting; a full feed drops the frame.
    pub fn try_on_frame(&self, frame: FrameObservation) -> Result<(), FeedError> {
        let frame_id = frame.frame_id;
        self.tx
            .try_send(FeedItem::Frame(frame))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => FeedError::Backpressure { frame_id },
                mpsc::error::TrySendError::Closed(_) => FeedError::ReceiverClosed,
            })
    }

    /// Signal a clean end of stream.
    pub async fn on_end(&self) -> Result<(), FeedError> {
        self.tx
            .send(FeedItem::End)
            .await
            .map_err(|_| FeedError::ReceiverClosed)
    }

    /// Report an unrecoverable producer failure; the controller shuts down.
    pub async fn on_error(&self, error: FeedError) -> Result<(), FeedError> {
        self.tx
            .send(FeedItem::Error(error))
            .await
            .map_err(|_| FeedError::ReceiverClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, handed to the controller.
pub struct FeedReceiver {
    rx: mpsc::Receiver<FeedItem>,
    finished: bool,
}

#[async_trait]
impl FrameSource for FeedReceiver {
    async fn next_frame(&mut self) -> Result<FrameEvent, FeedError> {
        if self.finished {
            return Ok(FrameEvent::Eof);
        }
        match self.rx.recv().await {
            Some(FeedItem::Frame(frame)) => Ok(FrameEvent::Frame(frame)),
            Some(FeedItem::End) => {
                self.finished = true;
                Ok(FrameEvent::Eof)
            }
            Some(FeedItem::Error(e)) => {
                self.finished = true;
                Err(e)
            }
            None => {
                self.finished = true;
                Err(FeedError::Disconnected)
            }
        }
    }

    fn source_name(&self) -> &str {
        "feed-channel"
    }

    async fn close(&mut self) {
        self.rx.close();
        debug!("Feed channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn frame(id: u64) -> FrameObservation {
        FrameObservation::new(id, Array2::zeros((1, 1)))
    }

    #[tokio::test]
    async fn frames_arrive_in_order_then_end() {
        let (tx, mut rx) = feed_channel(4);
        tx.on_frame(frame(1)).await.unwrap();
        tx.on_frame(frame(2)).await.unwrap();
        tx.on_end().await.unwrap();

        let mut ids = Vec::new();
        while let FrameEvent::Frame(f) = rx.next_frame().await.unwrap() {
            ids.push(f.frame_id);
        }
        assert_eq!(ids, vec![1, 2]);
        // Stays at end of stream
        assert!(matches!(rx.next_frame().await.unwrap(), FrameEvent::Eof));
    }

    #[tokio::test]
    async fn dropped_producer_is_disconnect() {
        let (tx, mut rx) = feed_channel(4);
        tx.on_frame(frame(1)).await.unwrap();
        drop(tx);
        assert!(matches!(rx.next_frame().await.unwrap(), FrameEvent::Frame(_)));
        assert!(matches!(rx.next_frame().await, Err(FeedError::Disconnected)));
    }

    #[tokio::test]
    async fn producer_error_is_propagated() {
        let (tx, mut rx) = feed_channel(4);
        tx.on_error(FeedError::Upstream("detector offline".into()))
            .await
            .unwrap();
        match rx.next_frame().await {
            Err(FeedError::Upstream(msg)) => assert_eq!(msg, "detector offline"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn try_on_frame_reports_backpressure() {
        let (tx, _rx) = feed_channel(1);
        tx.try_on_frame(frame(1)).unwrap();
        assert!(matches!(
            tx.try_on_frame(frame(2)),
            Err(FeedError::Backpressure { frame_id: 2 })
        ));
    }

    #[tokio::test]
    async fn closed_receiver_rejects_frames() {
        let (tx, mut rx) = feed_channel(1);
        rx.close().await;
        assert!(tx.is_closed());
        assert!(matches!(tx.on_frame(frame(1)).await, Err(FeedError::ReceiverClosed)));
    }
}
