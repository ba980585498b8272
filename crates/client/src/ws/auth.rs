//! Post-connect credential exchange.

use std::time::Duration;

use archive_shared::ClientFrame;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::AuthError;

/// The one outstanding `authenticate` request of an epoch.
#[derive(Debug)]
pub(crate) struct PendingAuth {
    epoch: u64,
    deadline: Instant,
    timer: Option<AbortHandle>,
}

/// Sends `authenticate` and matches the server's `authenticated` reply (or the
/// deadline) against the epoch that sent it.
#[derive(Debug)]
pub(crate) struct AuthHandshake {
    timeout: Duration,
    pending: Option<PendingAuth>,
}

impl AuthHandshake {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: None,
        }
    }

    /// Open the exchange for `epoch`. Returns the frame to send and the
    /// deadline the caller must arm a timer for.
    pub(crate) fn begin(&mut self, epoch: u64, token: &str) -> (ClientFrame, Instant) {
        self.cancel();
        let deadline = Instant::now() + self.timeout;
        self.pending = Some(PendingAuth {
            epoch,
            deadline,
            timer: None,
        });
        let frame = ClientFrame::Authenticate {
            token: token.to_string(),
        };
        (frame, deadline)
    }

    pub(crate) fn arm(&mut self, timer: AbortHandle) {
        match self.pending.as_mut() {
            Some(pending) => pending.timer = Some(timer),
            None => timer.abort(),
        }
    }

    pub(crate) fn is_pending(&self, epoch: u64) -> bool {
        self.pending.as_ref().is_some_and(|p| p.epoch == epoch)
    }

    /// Resolve with the server's reply. `None` if nothing is pending for `epoch`.
    pub(crate) fn on_ack(&mut self, epoch: u64, success: bool) -> Option<Result<(), AuthError>> {
        if !self.is_pending(epoch) {
            return None;
        }
        self.cancel();
        Some(if success {
            Ok(())
        } else {
            Err(AuthError::Rejected)
        })
    }

    /// Resolve an expired deadline. `None` if the exchange already completed or
    /// the deadline has not actually passed.
    pub(crate) fn on_deadline(&mut self, epoch: u64) -> Option<AuthError> {
        let pending = self.pending.as_ref()?;
        if pending.epoch != epoch || Instant::now() < pending.deadline {
            return None;
        }
        self.cancel();
        Some(AuthError::Timeout(self.timeout))
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
        }
    }
}
