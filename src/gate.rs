//! The token gate through which the refill loop hands permits to callers.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::Error;

/// A caller waiting for a single permit.
///
/// The refill loop completes the waiter when it dispenses a permit to it.
pub(crate) type Waiter = oneshot::Sender<()>;

/// Sending half of the token gate.
///
/// Cloning the gate is cheap. Every clone observes the same closure.
#[derive(Debug, Clone)]
pub(crate) struct Gate {
    /// Queue of waiters, drained by the refill loop.
    waiters: mpsc::Sender<Waiter>,
    /// Cancelled once the gate is closed.
    closed: CancellationToken,
}

impl Gate {
    /// Construct a fresh, open gate together with the receiving half which
    /// is handed to the refill loop.
    pub(crate) fn new() -> (Self, mpsc::Receiver<Waiter>) {
        // A single slot, the refill loop must actively pick up waiters for
        // the queue to make progress.
        let (waiters, rx) = mpsc::channel(1);

        let gate = Self {
            waiters,
            closed: CancellationToken::new(),
        };

        (gate, rx)
    }

    /// Close the gate, releasing every caller waiting on it.
    ///
    /// Closing an already closed gate does nothing.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }

    /// Wait until the refill loop hands over a permit.
    ///
    /// Fails with [`Error::Closed`] if the gate is closed or the refill loop
    /// has terminated, whichever is observed first.
    pub(crate) async fn pass(&self) -> Result<(), Error> {
        let (waiter, permit) = oneshot::channel();

        let handoff = async {
            self.waiters.send(waiter).await.map_err(|_| Error::Closed)?;
            permit.await.map_err(|_| Error::Closed)
        };

        // Closure wins even over a permit already sent, which is then lost.
        // The gate only closes while its refill loop is being torn down.
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::Closed),
            result = handoff => result,
        }
    }
}
