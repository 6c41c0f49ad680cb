//! The background refill loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::gate::Waiter;

/// State owned by a single refill loop.
///
/// Nothing outside of [`Refill::run`] has access to `count`, which makes the
/// loop the only writer.
pub(crate) struct Refill {
    /// Permits handed out per interval.
    limit: usize,
    /// Permits remaining in the current interval.
    count: usize,
    /// Ticks once per interval.
    interval: Interval,
    /// Callers waiting for a permit.
    waiters: mpsc::Receiver<Waiter>,
    /// Supplied by the creator of the limiter, permanent once fired.
    external: CancellationToken,
    /// Stops this loop instance only.
    internal: CancellationToken,
}

impl Refill {
    pub(crate) fn new(
        limit: usize,
        period: Duration,
        waiters: mpsc::Receiver<Waiter>,
        external: CancellationToken,
        internal: CancellationToken,
    ) -> Self {
        // The bucket starts out full, so the first refill is one period out.
        let start = Instant::now()
            .checked_add(period)
            .unwrap_or_else(Instant::now);

        let mut interval = time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Self {
            limit,
            count: limit,
            interval,
            waiters,
            external,
            internal,
        }
    }

    /// Dispense permits until one of the cancellation tokens fires or every
    /// gate has been dropped.
    pub(crate) async fn run(mut self) {
        debug!(limit = self.limit, "refill loop started");

        loop {
            if self.count == 0 {
                tokio::select! {
                    biased;
                    _ = self.external.cancelled() => break,
                    _ = self.internal.cancelled() => break,
                    _ = self.interval.tick() => {
                        self.refill();
                    }
                }

                // A zero limit stays empty across refills.
                continue;
            }

            tokio::select! {
                biased;
                _ = self.external.cancelled() => break,
                _ = self.internal.cancelled() => break,
                _ = self.interval.tick() => {
                    self.refill();
                }
                waiter = self.waiters.recv() => {
                    let waiter = match waiter {
                        Some(waiter) => waiter,
                        None => break,
                    };

                    // A waiter that went away before receiving its permit
                    // does not consume one.
                    if waiter.send(()).is_ok() {
                        self.count -= 1;
                        trace!(remaining = self.count, "permit dispensed");
                    }
                }
            }
        }

        // Waiters still queued observe the closed channel once the receiver
        // is dropped.
        self.waiters.close();
        debug!(
            external = self.external.is_cancelled(),
            internal = self.internal.is_cancelled(),
            "refill loop stopped"
        );
    }

    fn refill(&mut self) {
        // Capacity is reset, never accumulated.
        self.count = self.limit;
        trace!(count = self.count, "refilled");
    }
}
