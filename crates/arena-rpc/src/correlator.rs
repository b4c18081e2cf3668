//! Request correlation: matching responses to pending calls by id.
//!
//! The correlator is owned by the connection task. Each registered call
//! gets its own timer task; when a timer fires it sends the id back over an
//! unbounded channel, and the owning task calls [`RequestCorrelator::expire`].
//! That keeps every mutation of the pending map on one task.

use std::collections::HashMap;
use std::time::Duration;

use arena_rpc_protocol::{Outcome, RequestId};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::RpcError;

/// Where a call's result is delivered.
pub type Reply = oneshot::Sender<Result<Value, RpcError>>;

/// One outstanding call.
struct PendingCall {
    /// The id this entry was registered under. Compared against the
    /// response id on settlement.
    id: RequestId,
    method: String,
    created_at: Instant,
    timeout: Duration,
    timer: JoinHandle<()>,
    reply: Reply,
}

/// Tracks outstanding calls until they are answered, time out, or are
/// rejected en masse when the connection drops.
pub struct RequestCorrelator {
    pending: HashMap<RequestId, PendingCall>,
    expired_tx: mpsc::UnboundedSender<RequestId>,
}

impl RequestCorrelator {
    /// Creates an empty correlator and the receiver its timers report to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RequestId>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        (
            Self {
                pending: HashMap::new(),
                expired_tx,
            },
            expired_rx,
        )
    }

    /// Stores a pending call and starts its timer.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// A duplicate id fails with [`RpcError::DuplicateRequestId`]; the new
    /// `reply` receives the same error and the existing entry is kept.
    pub fn register(
        &mut self,
        id: RequestId,
        method: impl Into<String>,
        timeout: Duration,
        reply: Reply,
    ) -> Result<(), RpcError> {
        if self.pending.contains_key(&id) {
            let _ = reply.send(Err(RpcError::DuplicateRequestId(id)));
            return Err(RpcError::DuplicateRequestId(id));
        }

        let expired_tx = self.expired_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = expired_tx.send(id);
        });

        self.pending.insert(
            id,
            PendingCall {
                id,
                method: method.into(),
                created_at: Instant::now(),
                timeout,
                timer,
                reply,
            },
        );
        Ok(())
    }

    /// Resolves the call registered under `response_id`.
    ///
    /// A server error object rejects the call with [`RpcError::Server`].
    ///
    /// # Errors
    /// - [`RpcError::NoMatchingRequest`]: nothing is pending under that id.
    /// - [`RpcError::IdMismatch`]: the entry's own id differs; the entry
    ///   stays pending and its timer keeps running.
    pub fn settle(&mut self, response_id: RequestId, outcome: Outcome) -> Result<(), RpcError> {
        let Some(entry) = self.pending.get(&response_id) else {
            return Err(RpcError::NoMatchingRequest { id: response_id });
        };
        if entry.id != response_id {
            return Err(RpcError::IdMismatch {
                expected: entry.id,
                received: response_id,
            });
        }

        let Some(call) = self.pending.remove(&response_id) else {
            return Err(RpcError::NoMatchingRequest { id: response_id });
        };
        call.timer.abort();
        tracing::debug!(
            id = %call.id,
            method = %call.method,
            elapsed_ms = call.created_at.elapsed().as_millis() as u64,
            "call settled"
        );
        let result = outcome.into_result().map_err(RpcError::from);
        // The caller may have stopped waiting; that is not an error here.
        let _ = call.reply.send(result);
        Ok(())
    }

    /// Rejects the call with a timeout. Unknown ids (already settled) are
    /// ignored.
    ///
    /// Returns a copy of the error the caller received, for reporting.
    pub fn expire(&mut self, id: RequestId) -> Option<RpcError> {
        let call = self.pending.remove(&id)?;
        tracing::warn!(%id, method = %call.method, timeout_ms = call.timeout.as_millis() as u64, "call timed out");
        let timeout_error = || RpcError::Timeout {
            id: call.id,
            method: call.method.clone(),
            after: call.timeout,
        };
        let _ = call.reply.send(Err(timeout_error()));
        Some(timeout_error())
    }

    /// Rejects every pending call with [`RpcError::ConnectionClosed`] and
    /// returns how many there were.
    pub fn reject_all(&mut self, reason: &str) -> usize {
        let count = self.pending.len();
        for (_, call) in self.pending.drain() {
            call.timer.abort();
            let _ = call
                .reply
                .send(Err(RpcError::ConnectionClosed(reason.to_owned())));
        }
        if count > 0 {
            tracing::debug!(count, reason, "rejected pending calls");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Rewrites the stored id of a pending entry, simulating corrupted
    /// bookkeeping.
    #[cfg(test)]
    pub(crate) fn corrupt_id(&mut self, key: RequestId, stored: RequestId) {
        if let Some(call) = self.pending.get_mut(&key) {
            call.id = stored;
        }
    }
}

impl Drop for RequestCorrelator {
    fn drop(&mut self) {
        for call in self.pending.values() {
            call.timer.abort();
        }
    }
}
