//! Routes inbound replies to the single caller waiting on their identity.
//!
//! A caller registers before it publishes and receives a [`PendingWait`].
//! The broker listener hands every parsed reply to [`ReplyCorrelator::route`],
//! which removes the matching registration and fulfils it. Replies nobody is
//! waiting for (late, redelivered or foreign) are logged and dropped.
//!
//! [`ReplyCorrelator::fail_all`] also closes the correlator: a wait registered
//! afterwards resolves at once with the same reason.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::envelope::ReplyEnvelope;
use crate::identity::RequestIdentity;

type WaitResult = Result<ReplyEnvelope, WaitError>;

/// Why a wait ended without a reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("no reply within {}s", .0.as_secs_f64())]
    TimedOut(Duration),
    #[error("broker connection lost while waiting for a reply")]
    ConnectionLost,
    #[error("broker client shut down while waiting for a reply")]
    Shutdown,
    #[error("wait was dropped by the correlator")]
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("a wait is already registered for {identity}")]
pub struct DuplicateRegistration {
    pub identity: RequestIdentity,
}

/// What happened to a routed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Delivered,
    /// No wait registered under the reply's identity.
    Unmatched,
    /// The wait was registered but its receiver was already gone.
    ReceiverGone,
}

struct Registration {
    ticket: u64,
    slot: oneshot::Sender<WaitResult>,
}

#[derive(Default)]
struct Table {
    waiters: HashMap<RequestIdentity, Registration>,
    closed: Option<WaitError>,
}

#[derive(Default)]
pub struct ReplyCorrelator {
    table: Mutex<Table>,
    next_ticket: AtomicU64,
}

impl ReplyCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(
        self: &Arc<Self>,
        identity: RequestIdentity,
    ) -> Result<PendingWait, DuplicateRegistration> {
        let mut table = self.table();
        if table.waiters.contains_key(&identity) {
            return Err(DuplicateRegistration { identity });
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (slot, rx) = oneshot::channel();
        if let Some(reason) = &table.closed {
            debug!(file_id = %identity, reason = %reason, "Correlator closed, failing wait");
            let _ = slot.send(Err(reason.clone()));
        } else {
            table.waiters.insert(identity.clone(), Registration { ticket, slot });
            debug!(file_id = %identity, "Registered reply wait");
        }

        Ok(PendingWait {
            identity,
            ticket,
            rx,
            correlator: Arc::clone(self),
        })
    }

    /// Never blocks and never fails the caller.
    pub fn route(&self, reply: ReplyEnvelope) -> Routed {
        let Some(registration) = self.table().waiters.remove(&reply.identity) else {
            info!(
                file_id = %reply.identity,
                outcome = %reply.outcome,
                "Dropping reply with no registered wait"
            );
            return Routed::Unmatched;
        };

        let identity = reply.identity.clone();
        if registration.slot.send(Ok(reply)).is_err() {
            warn!(file_id = %identity, "Reply arrived after the waiter went away");
            return Routed::ReceiverGone;
        }
        debug!(file_id = %identity, "Delivered reply");
        Routed::Delivered
    }

    /// Removes a wait the caller gave up on. Returns whether one was removed.
    pub fn deregister(&self, identity: &RequestIdentity) -> bool {
        self.table().waiters.remove(identity).is_some()
    }

    /// Fulfils every outstanding wait with `reason` and closes the correlator.
    /// Returns how many were failed. The first reason sticks.
    pub fn fail_all(&self, reason: WaitError) -> usize {
        let drained: Vec<_> = {
            let mut table = self.table();
            table.closed.get_or_insert_with(|| reason.clone());
            table.waiters.drain().collect()
        };
        let failed = drained.len();
        for (identity, registration) in drained {
            debug!(file_id = %identity, reason = %reason, "Failing outstanding wait");
            let _ = registration.slot.send(Err(reason.clone()));
        }
        failed
    }

    pub fn pending(&self) -> usize {
        self.table().waiters.len()
    }

    pub fn is_registered(&self, identity: &RequestIdentity) -> bool {
        self.table().waiters.contains_key(identity)
    }

    pub fn is_closed(&self) -> bool {
        self.table().closed.is_some()
    }

    fn release(&self, identity: &RequestIdentity, ticket: u64) {
        let mut table = self.table();
        if table.waiters.get(identity).is_some_and(|r| r.ticket == ticket) {
            table.waiters.remove(identity);
        }
    }
}

/// Single-use handle for one registered wait.
///
/// Dropping it releases the registration, so a cancelled or aborted caller
/// never leaves an entry behind.
pub struct PendingWait {
    identity: RequestIdentity,
    ticket: u64,
    rx: oneshot::Receiver<WaitResult>,
    correlator: Arc<ReplyCorrelator>,
}

impl PendingWait {
    pub fn identity(&self) -> &RequestIdentity {
        &self.identity
    }

    /// Waits at most `deadline` for the reply. On expiry the registration is
    /// removed before returning, so a late reply is dropped by [`ReplyCorrelator::route`].
    pub async fn wait(mut self, deadline: Duration) -> Result<ReplyEnvelope, WaitError> {
        match tokio::time::timeout(deadline, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WaitError::Abandoned),
            Err(_) => {
                self.correlator.release(&self.identity, self.ticket);
                Err(WaitError::TimedOut(deadline))
            }
        }
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        self.correlator.release(&self.identity, self.ticket);
    }
}
