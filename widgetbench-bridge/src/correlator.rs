//! Call correlation across the async boundary
//!
//! Each registered call gets an id and a future that settles exactly once:
//! by `resolve`, by `reject`, or by `reject_all` at teardown. Settling an
//! unknown id is a no-op because responses can race a teardown.

use crate::error::{BridgeError, BridgeResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Opaque call identifier, unique for the lifetime of one correlator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(String);

impl CallId {
    /// Timestamp, per-correlator sequence number and a random suffix
    fn generate(seq: u64) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}-{}", Utc::now().timestamp_millis(), seq, &suffix[..9]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CallId> for String {
    fn from(id: CallId) -> Self {
        id.0
    }
}

/// A call awaiting its response
#[derive(Debug)]
pub struct PendingCall<T> {
    pub created_at: DateTime<Utc>,
    settle: oneshot::Sender<BridgeResult<T>>,
}

/// Future side of a registered call
#[derive(Debug)]
pub struct PendingReply<T> {
    rx: oneshot::Receiver<BridgeResult<T>>,
}

impl<T> Future for PendingReply<T> {
    type Output = BridgeResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the correlator itself went away.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(BridgeError::Detached)))
    }
}

#[derive(Debug)]
struct CorrelatorState<T> {
    pending: HashMap<CallId, PendingCall<T>>,
    next_seq: u64,
    closed: Option<BridgeError>,
}

/// Tracks in-flight calls by id
#[derive(Debug)]
pub struct CallCorrelator<T> {
    state: Mutex<CorrelatorState<T>>,
}

impl<T> Default for CallCorrelator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CallCorrelator<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CorrelatorState {
                pending: HashMap::new(),
                next_seq: 1,
                closed: None,
            }),
        }
    }

    /// Register a new call. After `reject_all` the returned reply is
    /// already rejected with the teardown error.
    pub fn register(&self) -> (CallId, PendingReply<T>) {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        let id = CallId::generate(state.next_seq);
        state.next_seq += 1;

        if let Some(err) = &state.closed {
            let _ = tx.send(Err(err.clone()));
        } else {
            state.pending.insert(
                id.clone(),
                PendingCall {
                    created_at: Utc::now(),
                    settle: tx,
                },
            );
        }
        (id, PendingReply { rx })
    }

    fn settle(&self, id: &str, outcome: BridgeResult<T>) -> bool {
        let call = self.state.lock().pending.remove(&CallId(id.to_string()));
        match call {
            // The receiver may have been dropped by an impatient caller.
            Some(call) => {
                let _ = call.settle.send(outcome);
                true
            }
            None => {
                tracing::debug!(call_id = id, "settle for unknown call ignored");
                false
            }
        }
    }

    /// Resolve a pending call. Returns false if the id is unknown.
    pub fn resolve(&self, id: &str, value: T) -> bool {
        self.settle(id, Ok(value))
    }

    /// Reject a pending call. Returns false if the id is unknown.
    pub fn reject(&self, id: &str, err: BridgeError) -> bool {
        self.settle(id, Err(err))
    }

    /// Reject every pending call and refuse new ones. Only the first
    /// invocation has an effect; it returns how many calls it rejected.
    pub fn reject_all(&self, err: BridgeError) -> usize {
        let drained: Vec<PendingCall<T>> = {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                return 0;
            }
            state.closed = Some(err.clone());
            state.pending.drain().map(|(_, call)| call).collect()
        };
        let count = drained.len();
        for call in drained {
            let _ = call.settle.send(Err(err.clone()));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }
}
