//! Snapshot inbox between the network side and the frame loop
//!
//! The network task decodes text frames and pushes them here; the frame loop
//! drains whatever has arrived before each frame. A message is therefore
//! fully applied before the next frame reads it, and the two never run
//! interleaved.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, warn};

use super::protocol::{ProtocolError, ServerMsg};

/// Messages buffered before the network side waits on the frame loop
pub const DEFAULT_CAPACITY: usize = 64;

/// Inbox errors
#[derive(Debug, thiserror::Error)]
pub enum InboxError {
    #[error("Inbox closed")]
    Closed,

    #[error("Failed to read feed: {0}")]
    Io(#[from] std::io::Error),
}

/// Create a connected sender/inbox pair
pub fn channel(capacity: usize) -> (FeedSender, Inbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FeedSender { tx }, Inbox { rx, closed: false })
}

/// Network-side handle
#[derive(Debug, Clone)]
pub struct FeedSender {
    tx: mpsc::Sender<ServerMsg>,
}

impl FeedSender {
    /// Decode one text frame and queue it. Frames that do not decode are
    /// logged and dropped; returns whether the frame was queued.
    pub async fn push_text(&self, text: &str) -> Result<bool, InboxError> {
        match ServerMsg::decode(text) {
            Ok(msg) => {
                self.tx.send(msg).await.map_err(|_| InboxError::Closed)?;
                Ok(true)
            }
            Err(ProtocolError::UnsupportedMessage(kind)) => {
                debug!(kind = %kind, "Ignoring message outside the simulation");
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse server message");
                Ok(false)
            }
        }
    }

    pub async fn push(&self, msg: ServerMsg) -> Result<(), InboxError> {
        self.tx.send(msg).await.map_err(|_| InboxError::Closed)
    }
}

/// Frame-loop side
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<ServerMsg>,
    closed: bool,
}

impl Inbox {
    /// Take everything queued so far without waiting
    pub fn drain(&mut self) -> Vec<ServerMsg> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Take the oldest queued message, if any, without waiting
    pub fn try_next(&mut self) -> Option<ServerMsg> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    /// Wait for the next message; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<ServerMsg> {
        let msg = self.rx.recv().await;
        if msg.is_none() {
            self.closed = true;
        }
        msg
    }

    /// True once all senders dropped and the buffer was emptied
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Push newline-delimited frames from `reader` until EOF. Returns the number
/// of frames queued.
pub async fn pump_lines<R>(reader: R, sender: FeedSender) -> Result<usize, InboxError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut queued = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if sender.push_text(line).await? {
            queued += 1;
        }
    }
    debug!(queued, "Feed exhausted");
    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn drain_returns_messages_in_order() {
        let (sender, mut inbox) = channel(8);
        assert!(assert_ok!(sender.push_text(r#"{"type":"pong","timestamp":1}"#).await));
        assert!(assert_ok!(sender.push_text(r#"{"type":"snapshot","tick":2}"#).await));
        assert!(!assert_ok!(sender.push_text(r#"{"type":"lobby_update"}"#).await));
        assert!(!assert_ok!(sender.push_text("{broken").await));

        let messages = inbox.drain();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ServerMsg::Pong { timestamp: 1 });
        assert!(matches!(&messages[1], ServerMsg::Snapshot(s) if s.tick == Some(2)));
        assert!(inbox.drain().is_empty());
        assert!(!inbox.is_closed());
    }

    #[tokio::test]
    async fn pump_reads_until_eof() {
        let (sender, mut inbox) = channel(DEFAULT_CAPACITY);
        let feed = "{\"type\":\"snapshot\",\"tick\":1}\n\n{\"type\":\"pong\"}\nnot json\n";
        let queued = assert_ok!(pump_lines(feed.as_bytes(), sender).await);
        assert_eq!(queued, 2);

        assert_eq!(inbox.drain().len(), 2);
        assert!(inbox.is_closed());
        assert!(inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_fails_once_inbox_is_dropped() {
        let (sender, inbox) = channel(1);
        drop(inbox);
        assert!(matches!(
            sender.push(ServerMsg::Pong { timestamp: 0 }).await,
            Err(InboxError::Closed)
        ));
    }
}
