//! Device discovery events

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::arbiter::DeviceFound;

pin_project! {
    /// Stream of [`DeviceFound`] events. Ends when the arbiter stops.
    ///
    /// A subscriber that falls behind skips the events it missed; the full set of devices is
    /// always available from [`Arbiter::discovered_devices`](crate::Arbiter::discovered_devices).
    pub struct DeviceEvents {
        #[pin]
        inner: BroadcastStream<DeviceFound>,
    }
}

impl DeviceEvents {
    pub(crate) fn new(rx: broadcast::Receiver<DeviceFound>) -> Self {
        Self { inner: BroadcastStream::new(rx) }
    }
}

impl Stream for DeviceEvents {
    type Item = DeviceFound;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(event)) => return Poll::Ready(Some(event)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "Device event subscriber lagged");
                }
                None => return Poll::Ready(None),
            }
        }
    }
}
