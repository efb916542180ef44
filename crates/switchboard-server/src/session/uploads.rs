//! Client-to-server upload streams.
//!
//! The read loop pushes `StreamItem` values into a bounded channel; the hub
//! method consumes them through [`UploadStream`]. How the stream ended is
//! recorded in a shared slot so the consumer sees exactly one terminal
//! signal after the buffered items.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::StreamError;

/// How an upload stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UploadEnd {
    Open,
    Completed,
    Failed(String),
    Canceled,
}

/// Producer half held by the invocation table.
#[derive(Debug)]
pub(crate) struct UploadSlot {
    tx: mpsc::Sender<Value>,
    end: Arc<Mutex<UploadEnd>>,
    cancel: CancellationToken,
    pub(crate) owner: u64,
}

impl UploadSlot {
    /// Create a slot and its consumer.
    pub(crate) fn open(id: String, owner: u64, capacity: usize) -> (Self, UploadStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let end = Arc::new(Mutex::new(UploadEnd::Open));
        let slot = Self {
            tx,
            end: end.clone(),
            cancel: CancellationToken::new(),
            owner,
        };
        let stream = UploadStream {
            id,
            rx,
            end,
            finished: false,
        };
        (slot, stream)
    }

    /// Sender and cancel token for pushing one item outside the table lock.
    pub(crate) fn feeder(&self) -> (mpsc::Sender<Value>, CancellationToken) {
        (self.tx.clone(), self.cancel.clone())
    }

    /// Record the end state. Dropping the slot afterwards closes the channel.
    pub(crate) fn finish(self, end: UploadEnd) {
        {
            let mut slot = self.end.lock();
            if *slot == UploadEnd::Open {
                *slot = end;
            }
        }
        self.cancel.cancel();
    }
}

/// Items a client streams to a hub method.
///
/// Yields each item as `Ok(value)`. Ends with `None` when the client
/// completes the stream, or with exactly one `Err` first when the client
/// completes it with an error or the owning invocation goes away.
#[derive(Debug)]
pub struct UploadStream {
    id: String,
    rx: mpsc::Receiver<Value>,
    end: Arc<Mutex<UploadEnd>>,
    finished: bool,
}

impl UploadStream {
    /// Client-assigned stream id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next item, or the terminal signal.
    pub async fn recv(&mut self) -> Option<Result<Value, StreamError>> {
        futures::StreamExt::next(self).await
    }

    /// Drain the stream into a vector, failing on the terminal error.
    pub async fn collect_values(mut self) -> Result<Vec<Value>, StreamError> {
        let mut values = Vec::new();
        while let Some(item) = self.recv().await {
            values.push(item?);
        }
        Ok(values)
    }
}

impl Stream for UploadStream {
    type Item = Result<Value, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if let Some(value) = ready!(this.rx.poll_recv(cx)) {
            return Poll::Ready(Some(Ok(value)));
        }
        this.finished = true;
        let end = this.end.lock().clone();
        Poll::Ready(match end {
            UploadEnd::Completed => None,
            UploadEnd::Failed(message) => Some(Err(StreamError::Client(message))),
            UploadEnd::Open | UploadEnd::Canceled => Some(Err(StreamError::Canceled)),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
