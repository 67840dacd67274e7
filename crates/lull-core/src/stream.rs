//! Change source abstraction and an in-memory implementation

use crate::{LullError, RawMessage, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Source of raw change messages, polled with a bounded wait
#[async_trait]
pub trait ChangeSource: Send {
    /// Wait at most `timeout` for the next message.
    ///
    /// `Ok(None)` is an empty poll, not an error. [`LullError::SourceClosed`]
    /// means no further message will ever arrive.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<RawMessage>>;
}

/// Channel-backed source for tests and embedding
pub struct ChannelSource {
    rx: mpsc::Receiver<RawMessage>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<RawMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl ChangeSource for ChannelSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<RawMessage>> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(LullError::SourceClosed),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_channel_source_delivers_in_order() {
        let (tx, mut source) = ChannelSource::new(4);
        tx.send(RawMessage::new("a", b"1".to_vec(), Utc::now())).await.unwrap();
        tx.send(RawMessage::new("b", b"2".to_vec(), Utc::now())).await.unwrap();

        let first = source.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        let second = source.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(first.topic, "a");
        assert_eq!(second.topic, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_poll_is_not_an_error() {
        let (_tx, mut source) = ChannelSource::new(1);
        assert!(source.poll(Duration::from_secs(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_source() {
        let (tx, mut source) = ChannelSource::new(1);
        drop(tx);
        let err = source.poll(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, LullError::SourceClosed));
    }
}
