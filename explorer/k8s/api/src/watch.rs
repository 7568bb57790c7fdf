use futures::prelude::*;
pub use kube::runtime::watcher::{Event, Result};
use std::pin::Pin;
use tokio::{sync::watch, time};
use tracing::{info, Instrument};

/// Wraps a watch event stream, retrying through errors.
///
/// Errors are logged and reported through an optional health channel; the stream is polled again
/// after a one second backoff.
pub struct Watch<T> {
    initialized: bool,
    span: tracing::Span,
    healthy: Option<watch::Sender<bool>>,
    rx: Pin<Box<dyn Stream<Item = Result<Event<T>>> + Send + 'static>>,
}

const BACKOFF: time::Duration = time::Duration::from_secs(1);

// === impl Watch ===

impl<T, W> From<W> for Watch<T>
where
    W: Stream<Item = Result<Event<T>>> + Send + 'static,
{
    fn from(watch: W) -> Self {
        Self::new(watch.boxed())
    }
}

impl<T> Watch<T> {
    pub fn new(rx: Pin<Box<dyn Stream<Item = Result<Event<T>>> + Send + 'static>>) -> Watch<T> {
        Self {
            rx,
            initialized: false,
            healthy: None,
            span: tracing::Span::current(),
        }
    }

    pub fn instrument(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Publishes `false` whenever the stream fails and `true` once it yields events again.
    pub fn with_health(mut self, healthy: watch::Sender<bool>) -> Self {
        self.healthy = Some(healthy);
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Receives the next event in the stream, or `None` if the stream has ended.
    pub async fn recv(&mut self) -> Option<Event<T>> {
        loop {
            let ev = self.rx.next().instrument(self.span.clone()).await?;

            match ev {
                Ok(ev) => {
                    self.initialized = true;
                    self.set_healthy(true);
                    return Some(ev);
                }
                Err(error) => {
                    info!(parent: &self.span, %error, "Failed");
                    self.set_healthy(false);

                    // TODO: the backoff is not honored if `recv` is canceled mid-sleep; track
                    // the deadline on the `Watch` itself.
                    time::sleep(BACKOFF).await;
                    info!(parent: &self.span, "Restarting");
                }
            }
        }
    }

    fn set_healthy(&self, healthy: bool) {
        if let Some(tx) = self.healthy.as_ref() {
            tx.send_if_modified(|current| {
                let changed = *current != healthy;
                *current = healthy;
                changed
            });
        }
    }
}
