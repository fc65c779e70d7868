//! Cancellable event stream handed to discovery consumers
//!
//! [`discovery_channel`] returns the two halves: the [`Emitter`] an engine
//! pushes into from its background task, and the [`DiscoveryStream`] the
//! caller polls. Cancelling (or dropping) the stream runs the engine's cancel
//! handler synchronously, exactly once.

use crate::error::DiscoveryError;
use crate::types::DiscoveryEvent;
use futures::Stream;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

type CancelFn = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    handler: Mutex<Option<CancelFn>>,
}

/// Shared cancellation flag plus the handler to run on cancellation
#[derive(Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl CancelHandle {
    /// Cancels the stream. Only the first call runs the handler.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let handler = self.inner.handler.lock().take();
        if let Some(handler) = handler {
            handler();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    fn set_handler(&self, handler: CancelFn) {
        let mut slot = self.inner.handler.lock();
        if self.is_cancelled() {
            drop(slot);
            handler();
            return;
        }
        *slot = Some(handler);
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Producer half of a discovery stream
pub struct Emitter {
    events: mpsc::Sender<DiscoveryEvent>,
    error: oneshot::Sender<DiscoveryError>,
    cancel: CancelHandle,
}

impl Emitter {
    /// Delivers an event, waiting while the consumer's buffer is full.
    ///
    /// Returns false once the stream is cancelled or dropped.
    pub async fn on_next(&self, event: DiscoveryEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.events.send(event).await.is_ok()
    }

    /// Delivers a terminal error; the stream ends after yielding it
    pub fn on_error(self, error: DiscoveryError) {
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.error.send(error);
    }

    /// Installs the handler run on cancellation.
    ///
    /// If the stream was already cancelled the handler runs immediately.
    pub fn set_cancel_handler<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel.set_handler(Box::new(handler));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// Consumer half: a stream of discovery events ending with at most one error
pub struct DiscoveryStream {
    events: ReceiverStream<DiscoveryEvent>,
    error: Option<oneshot::Receiver<DiscoveryError>>,
    cancel: CancelHandle,
    done: bool,
}

impl DiscoveryStream {
    /// Stops discovery for this stream. Repeated calls are no-ops.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Handle that cancels this stream from elsewhere
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl Stream for DiscoveryStream {
    type Item = Result<DiscoveryEvent, DiscoveryError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if let Some(error) = this.error.as_mut() {
            match Pin::new(error).poll(cx) {
                Poll::Ready(Ok(err)) => {
                    this.error = None;
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(Err(_)) => this.error = None,
                Poll::Pending => {}
            }
        }

        match Pin::new(&mut this.events).poll_next(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for DiscoveryStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for DiscoveryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryStream")
            .field("cancel", &self.cancel)
            .field("done", &self.done)
            .finish()
    }
}

/// Creates a connected emitter/stream pair buffering up to `capacity` events
pub fn discovery_channel(capacity: usize) -> (Emitter, DiscoveryStream) {
    let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
    let (error_tx, error_rx) = oneshot::channel();
    let cancel = CancelHandle::default();

    let emitter = Emitter {
        events: events_tx,
        error: error_tx,
        cancel: cancel.clone(),
    };
    let stream = DiscoveryStream {
        events: ReceiverStream::new(events_rx),
        error: Some(error_rx),
        cancel,
        done: false,
    };

    (emitter, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceDescriptorBuilder;
    use futures::StreamExt;
    use std::sync::atomic::AtomicUsize;

    fn added(name: &str) -> DiscoveryEvent {
        DiscoveryEvent::Added(ServiceDescriptorBuilder::new(name, "_http._tcp.local.").build())
    }

    #[tokio::test]
    async fn test_events_then_completion() {
        let (emitter, mut stream) = discovery_channel(4);
        assert!(emitter.on_next(added("a")).await);
        assert!(emitter.on_next(added("b")).await);
        drop(emitter);

        assert_eq!(stream.next().await.unwrap().unwrap(), added("a"));
        assert_eq!(stream.next().await.unwrap().unwrap(), added("b"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_error_terminates_stream() {
        let (emitter, mut stream) = discovery_channel(4);
        emitter.on_error(DiscoveryError::AlreadyStarted);

        assert!(matches!(
            stream.next().await,
            Some(Err(DiscoveryError::AlreadyStarted))
        ));
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_runs_handler_once() {
        let (emitter, stream) = discovery_channel(4);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        emitter.set_cancel_handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        stream.cancel();
        stream.cancel();
        drop(stream);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(emitter.is_cancelled());
        assert!(!emitter.on_next(added("late")).await);
    }

    #[test]
    fn test_handler_set_after_cancel_runs_immediately() {
        let (emitter, stream) = discovery_channel(1);
        drop(stream);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        emitter.set_cancel_handler(move || flag.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }
}
