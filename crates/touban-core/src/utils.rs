//! Timing utilities for the scheduler loop.

use futures::Stream;
use pin_project_lite::pin_project;

pin_project! {
    /// Fixed-period stream driving the scheduler tick.
    ///
    /// Fires once after the initial delay, then at the configured period.
    /// The delay is reset on ready, so a stalled consumer slips the grid
    /// instead of bursting to catch up.
    pub struct Ticker {
        #[pin]
        inner: futures_timer::Delay,
        period: std::time::Duration,
    }
}

impl Ticker {
    pub(crate) fn with_initial_delay(
        initial_delay: std::time::Duration,
        period: std::time::Duration,
    ) -> Self {
        Self {
            inner: futures_timer::Delay::new(initial_delay),
            period,
        }
    }
}

impl Stream for Ticker {
    type Item = ();

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let mut this = self.project();
        let poll = this.inner.as_mut().poll(cx);
        if poll.is_ready() {
            this.inner.reset(*this.period);
        }
        poll.map(Some)
    }
}
