#![deny(missing_docs)]
//! A token-bucket rate limiter which hands out a burst of up to `max` permits
//! per interval.
//!
//! Permits are dispensed by a background refill loop spawned on the tokio
//! runtime. A caller asks for a permit through [`Limiter::take`], which
//! suspends until the refill loop hands one over. Once `max` permits have been
//! handed out, callers wait for the next interval. Unused permits do not roll
//! over, an idle limiter never offers more than `max` permits in one interval.
//!
//! The limiter can be reconfigured while running through
//! [`Limiter::sleep_and_reset`], which tears down the current refill loop,
//! pauses for a cooldown and starts over with a new limit and interval.
//!
//! ## Example
//!
//! ```
//! use burst_limiter::{CancellationToken, Limiter};
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), burst_limiter::Error> {
//!     let limiter = Limiter::new(CancellationToken::new(), 3, Duration::from_millis(100))?;
//!
//!     // A burst of three permits is available right away.
//!     for _ in 0..3 {
//!         limiter.take().await?;
//!     }
//!
//!     // The fourth one waits for the next interval.
//!     limiter.take().await?;
//!
//!     limiter.stop();
//!     assert!(limiter.take().await.is_err());
//!     Ok(())
//! }
//! ```
//!
//! ## Cancellation
//!
//! Every limiter is bound to a [`CancellationToken`] supplied at construction.
//! Cancelling it shuts the limiter down for good, after which [`Limiter::take`]
//! fails with [`Error::Closed`]. The same happens after [`Limiter::stop`] or
//! once the limiter is dropped.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time;

pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "tracing")]
macro_rules! debug {
    ($($tt:tt)*) => { ::tracing::debug!($($tt)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($tt:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! trace {
    ($($tt:tt)*) => { ::tracing::trace!($($tt)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($tt:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! warn {
    ($($tt:tt)*) => { ::tracing::warn!($($tt)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn {
    ($($tt:tt)*) => {};
}

mod gate;
mod refill;

use self::gate::Gate;
use self::refill::Refill;

const DEFAULT_MAX: usize = 1;
const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);
const UNLIMITED_INTERVAL: Duration = Duration::from_millis(1);

/// Error type for the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// The token gate was closed before a permit could be handed out.
    ///
    /// This happens when the limiter is stopped, reconfigured or cancelled
    /// while waiting.
    #[error("Token gate is closed")]
    Closed,
    /// The limiter was configured with a zero interval.
    #[error("Refill interval must be non-zero")]
    ZeroInterval,
    /// Tried to reconfigure a limiter which has been stopped.
    #[error("Rate limiter has been stopped")]
    Stopped,
}

/// Builder for a [`Limiter`].
///
/// Constructed through [`Limiter::builder`].
#[derive(Debug)]
pub struct Builder {
    max: usize,
    interval: Duration,
    cancellation: Option<CancellationToken>,
}

impl Builder {
    /// Set the number of permits handed out per interval.
    ///
    /// This defaults to `1`.
    #[inline(always)]
    pub fn max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    /// Set the interval after which the permits are refilled.
    ///
    /// This defaults to 100 milliseconds.
    #[inline(always)]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Bind the limiter to an external cancellation token.
    ///
    /// Cancelling the token permanently shuts the limiter down. If none is
    /// provided, the limiter only stops through [`Limiter::stop`] or when it's
    /// dropped.
    #[inline(always)]
    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Construct and start the limiter.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ZeroInterval`] if the configured interval is zero.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn build(self) -> Result<Limiter, Error> {
        if self.interval.is_zero() {
            return Err(Error::ZeroInterval);
        }

        let external = self
            .cancellation
            .unwrap_or_else(CancellationToken::new);
        Ok(Limiter::start(external, self.max, self.interval))
    }
}

/// State replaced wholesale on every reconfiguration.
struct State {
    limit: usize,
    interval: Duration,
    gate: Gate,
    /// Stops the current refill loop.
    internal: CancellationToken,
    task: Option<JoinHandle<()>>,
    stopped: bool,
}

impl State {
    /// Spawn a new refill loop and return the state tracking it.
    fn start(limit: usize, interval: Duration, external: &CancellationToken) -> Self {
        let (gate, waiters) = Gate::new();
        let internal = CancellationToken::new();

        let refill = Refill::new(limit, interval, waiters, external.clone(), internal.clone());
        let task = tokio::spawn(refill.run());

        Self {
            limit,
            interval,
            gate,
            internal,
            task: Some(task),
            stopped: false,
        }
    }

    /// Stop the current refill loop and close its gate.
    fn halt(&mut self) -> Option<JoinHandle<()>> {
        self.internal.cancel();
        self.gate.close();
        self.task.take()
    }
}

/// A token-bucket rate limiter.
///
/// See the [crate documentation](crate) for an overview.
pub struct Limiter {
    /// Supplied by the creator, never replaced.
    external: CancellationToken,
    state: Mutex<State>,
    /// Serializes reconfigurations.
    reconfigure: tokio::sync::Mutex<()>,
}

impl Limiter {
    /// Construct a new limiter through a builder.
    pub fn builder() -> Builder {
        Builder {
            max: DEFAULT_MAX,
            interval: DEFAULT_INTERVAL,
            cancellation: None,
        }
    }

    /// Construct a limiter handing out `max` permits every `interval`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ZeroInterval`] if `interval` is zero.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new(
        cancellation: CancellationToken,
        max: usize,
        interval: Duration,
    ) -> Result<Self, Error> {
        Self::builder()
            .max(max)
            .interval(interval)
            .cancellation(cancellation)
            .build()
    }

    /// Construct a limiter which effectively doesn't limit.
    ///
    /// The limit is `usize::MAX` permits refilled every millisecond, so the
    /// only cost of [`Limiter::take`] is the hand-off with the refill loop.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn unlimited(cancellation: CancellationToken) -> Self {
        Self::start(cancellation, usize::MAX, UNLIMITED_INTERVAL)
    }

    fn start(external: CancellationToken, limit: usize, interval: Duration) -> Self {
        let state = State::start(limit, interval, &external);

        Self {
            external,
            state: Mutex::new(state),
            reconfigure: tokio::sync::Mutex::new(()),
        }
    }

    /// Take a single permit, waiting for the next interval if the current one
    /// has been exhausted.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Closed`] if the limiter is stopped, cancelled or
    /// reconfigured before a permit is handed out. Once stopped or cancelled,
    /// every call fails immediately.
    ///
    /// # Example
    ///
    /// ```
    /// use burst_limiter::{CancellationToken, Error, Limiter};
    /// use std::time::Duration;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), Error> {
    /// let cancellation = CancellationToken::new();
    /// let limiter = Limiter::new(cancellation.clone(), 2, Duration::from_secs(1))?;
    ///
    /// limiter.take().await?;
    /// cancellation.cancel();
    /// assert_eq!(limiter.take().await, Err(Error::Closed));
    /// # Ok(()) }
    /// ```
    pub async fn take(&self) -> Result<(), Error> {
        let gate = self.state.lock().gate.clone();
        gate.pass().await
    }

    /// Get the number of permits handed out per interval.
    ///
    /// This reflects the most recent construction or reconfiguration.
    #[inline]
    pub fn limit(&self) -> usize {
        self.state.lock().limit
    }

    /// Get the interval at which permits are refilled.
    #[inline]
    pub fn interval(&self) -> Duration {
        self.state.lock().interval
    }

    /// Test if the limiter has been stopped.
    ///
    /// This does not account for the external cancellation token.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Stop the current refill loop, sleep for `sleep` and start over handing
    /// out `limit` permits every `interval`.
    ///
    /// Callers waiting in [`Limiter::take`] when this is called, and callers
    /// arriving while it sleeps, fail with [`Error::Closed`]. Once it returns
    /// a full burst of `limit` permits is available.
    ///
    /// Concurrent reconfigurations are applied one after another.
    ///
    /// If the external cancellation token has fired the new limit is still
    /// recorded, but no permits will be handed out.
    ///
    /// # Cancel safety
    ///
    /// If the returned future is dropped after the current refill loop has
    /// been torn down, the new configuration is started right away and the
    /// rest of the sleep is skipped. The limiter is never left without a
    /// refill loop unless it has been stopped.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ZeroInterval`] without touching the limiter if
    /// `interval` is zero, and with [`Error::Stopped`] if the limiter has been
    /// stopped before or during the call.
    pub async fn sleep_and_reset(
        &self,
        sleep: Duration,
        limit: usize,
        interval: Duration,
    ) -> Result<(), Error> {
        if interval.is_zero() {
            return Err(Error::ZeroInterval);
        }

        let _guard = self.reconfigure.lock().await;

        let task = {
            let mut state = self.state.lock();

            if state.stopped {
                return Err(Error::Stopped);
            }

            state.halt()
        };

        let restart = Restart {
            limiter: self,
            limit,
            interval,
            armed: true,
        };

        // Wait for the old loop to exit so that it can't dispense anything
        // past this point.
        if let Some(task) = task {
            if let Err(_error) = task.await {
                warn!(error = %_error, "refill loop failed");
            }
        }

        debug!(?sleep, limit, ?interval, "reconfiguring");
        time::sleep(sleep).await;
        restart.finish()
    }

    /// Permanently stop the limiter.
    ///
    /// Every caller waiting in [`Limiter::take`] is released with
    /// [`Error::Closed`], as is every later call. Stopping a stopped limiter
    /// does nothing.
    pub fn stop(&self) {
        let mut state = self.state.lock();

        if state.stopped {
            return;
        }

        state.stopped = true;
        // The loop exits on its own, no need to wait for it.
        drop(state.halt());
        debug!("limiter stopped");
    }
}

/// Starts the new refill loop of a reconfiguration, even if the future driving
/// it is dropped halfway.
struct Restart<'a> {
    limiter: &'a Limiter,
    limit: usize,
    interval: Duration,
    armed: bool,
}

impl Restart<'_> {
    fn finish(mut self) -> Result<(), Error> {
        self.armed = false;
        self.start()
    }

    fn start(&self) -> Result<(), Error> {
        let mut state = self.limiter.state.lock();

        if state.stopped {
            return Err(Error::Stopped);
        }

        *state = State::start(self.limit, self.interval, &self.limiter.external);
        Ok(())
    }
}

impl Drop for Restart<'_> {
    fn drop(&mut self) {
        // Spawning the refill loop needs a runtime.
        if !self.armed || tokio::runtime::Handle::try_current().is_err() {
            return;
        }

        if self.start().is_ok() {
            debug!(limit = self.limit, "reconfiguration interrupted, restarted early");
        }
    }
}

impl Drop for Limiter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct("Limiter")
            .field("limit", &state.limit)
            .field("interval", &state.interval)
            .field("stopped", &state.stopped)
            .finish()
    }
}
