//! Periodic batches of accumulated samples

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_stream::wrappers::IntervalStream;

use crate::accumulator::Sample;
use crate::device::Device;
use crate::types::RegisterKey;

pin_project! {
    /// Yields the samples a register's accumulator gained since the previous batch.
    ///
    /// Checks once per period and skips periods with nothing new. Ends when the register
    /// stops being accumulated.
    pub struct SampleStream {
        #[pin]
        ticks: IntervalStream,
        device: Device,
        key: RegisterKey,
        watermark: Option<Instant>,
    }
}

impl SampleStream {
    pub(crate) fn new(device: Device, key: RegisterKey, period: Duration) -> Self {
        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { ticks: IntervalStream::new(ticks), device, key, watermark: None }
    }

    /// Timestamp of the newest sample yielded so far.
    pub fn watermark(&self) -> Option<Instant> {
        self.watermark
    }
}

impl Stream for SampleStream {
    type Item = Vec<Sample>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if ready!(this.ticks.as_mut().poll_next(cx)).is_none() {
                return Poll::Ready(None);
            }

            match this.device.samples_since(*this.key, *this.watermark) {
                None => return Poll::Ready(None),
                Some(batch) if batch.is_empty() => continue,
                Some(batch) => {
                    *this.watermark = batch.last().map(|sample| sample.timestamp);
                    return Poll::Ready(Some(batch));
                }
            }
        }
    }
}
