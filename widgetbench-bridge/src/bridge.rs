//! Message bridge between the host and one guest frame
//!
//! The bridge listens to the frame, dispatches `METHOD_CALL`s into its
//! handler set and answers each with a `METHOD_RESPONSE`. In the other
//! direction it pushes globals: the full snapshot first, then only the keys
//! that changed. Detaching rejects every call still in flight.

use crate::correlator::CallCorrelator;
use crate::error::{BridgeError, BridgeResult};
use crate::frame::{FrameId, FrameReceiver, HostFrame};
use crate::handlers::{dispatch, MethodHandlers};
use crate::protocol::{Envelope, Method, MethodCall};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use widgetbench_types::GlobalsSnapshot;

static NEXT_BRIDGE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a bridge instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BridgeId(u64);

impl BridgeId {
    fn next() -> Self {
        Self(NEXT_BRIDGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bridge-{}", self.0)
    }
}

struct BridgeShared {
    id: BridgeId,
    handlers: RwLock<Arc<dyn MethodHandlers>>,
    inflight: CallCorrelator<Value>,
    /// Last globals map the guest received
    last_sent: Mutex<Option<Map<String, Value>>>,
    /// Handler tasks still running; `None` once detached
    dispatches: Mutex<Option<Vec<JoinHandle<()>>>>,
}

struct Attachment {
    frame: HostFrame,
    listener: JoinHandle<()>,
}

/// Legacy bridge for one frame
pub struct MessageBridge {
    shared: Arc<BridgeShared>,
    attachment: Mutex<Option<Attachment>>,
    detached: AtomicBool,
}

impl fmt::Debug for MessageBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBridge")
            .field("id", &self.shared.id)
            .field("frame", &self.frame_id())
            .field("pending", &self.pending_calls())
            .finish()
    }
}

impl MessageBridge {
    pub fn new(handlers: Arc<dyn MethodHandlers>) -> Self {
        Self {
            shared: Arc::new(BridgeShared {
                id: BridgeId::next(),
                handlers: RwLock::new(handlers),
                inflight: CallCorrelator::new(),
                last_sent: Mutex::new(None),
                dispatches: Mutex::new(Some(Vec::new())),
            }),
            attachment: Mutex::new(None),
            detached: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> BridgeId {
        self.shared.id
    }

    pub fn frame_id(&self) -> Option<FrameId> {
        self.attachment.lock().as_ref().map(|a| a.frame.id())
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.lock().is_some()
    }

    /// Calls dispatched to handlers and not yet answered
    pub fn pending_calls(&self) -> usize {
        self.shared.inflight.pending_count()
    }

    /// Replace the handler set. Calls already dispatched keep the old one.
    pub fn set_handlers(&self, handlers: Arc<dyn MethodHandlers>) {
        *self.shared.handlers.write() = handlers;
    }

    /// Start listening to a frame. Attaching the same frame twice is a
    /// no-op; a bridge never moves to a different frame.
    pub fn attach(&self, frame: HostFrame) -> BridgeResult<()> {
        if self.detached.load(Ordering::SeqCst) {
            return Err(BridgeError::Detached);
        }

        let mut attachment = self.attachment.lock();
        if let Some(current) = attachment.as_ref() {
            if current.frame.id() == frame.id() {
                return Ok(());
            }
            return Err(BridgeError::AlreadyAttached(current.frame.id().as_u64()));
        }

        let inbound = frame.subscribe();
        let listener = tokio::spawn(listen(Arc::clone(&self.shared), frame.clone(), inbound));
        tracing::debug!(bridge = %self.shared.id, frame = %frame.id(), "bridge attached");
        *attachment = Some(Attachment { frame, listener });
        Ok(())
    }

    /// Stop listening, cancel running handlers and reject every pending
    /// call. Returns how many were rejected; later calls return 0.
    pub fn detach(&self) -> usize {
        if self.detached.swap(true, Ordering::SeqCst) {
            return 0;
        }
        if let Some(attachment) = self.attachment.lock().take() {
            attachment.listener.abort();
        }
        // Dropping an aborted handler future releases whatever it holds,
        // such as the active tool call slot.
        let aborted = self
            .shared
            .dispatches
            .lock()
            .take()
            .map(|tasks| {
                tasks
                    .into_iter()
                    .filter(|task| !task.is_finished())
                    .inspect(JoinHandle::abort)
                    .count()
            })
            .unwrap_or(0);
        let rejected = self.shared.inflight.reject_all(BridgeError::Detached);
        tracing::debug!(bridge = %self.shared.id, rejected, aborted, "bridge detached");
        rejected
    }

    /// Push globals to the guest. The first successful push carries the
    /// full snapshot, later ones only the changed top-level keys. Returns
    /// false when nothing was sent.
    pub fn send_globals(&self, globals: &GlobalsSnapshot) -> BridgeResult<bool> {
        let frame = match self.attachment.lock().as_ref() {
            Some(attachment) => attachment.frame.clone(),
            None => return Ok(false),
        };

        let current = globals.to_map();
        let mut last_sent = self.shared.last_sent.lock();
        let payload = match last_sent.as_ref() {
            None => current.clone(),
            Some(previous) => changed_keys(previous, &current),
        };
        if payload.is_empty() {
            return Ok(false);
        }

        let keys = payload.len();
        frame.post(Envelope::SetGlobals { globals: payload }.to_value())?;
        tracing::trace!(bridge = %self.shared.id, keys, full = last_sent.is_none(), "globals pushed");
        *last_sent = Some(current);
        Ok(true)
    }
}

impl Drop for MessageBridge {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Entries of `current` whose value differs from `previous`
pub fn changed_keys(previous: &Map<String, Value>, current: &Map<String, Value>) -> Map<String, Value> {
    current
        .iter()
        .filter(|(key, value)| previous.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

async fn listen(shared: Arc<BridgeShared>, frame: HostFrame, mut inbound: FrameReceiver) {
    while let Some(message) = inbound.recv().await {
        handle_inbound(&shared, &frame, message);
    }
}

fn handle_inbound(shared: &Arc<BridgeShared>, frame: &HostFrame, message: Value) {
    match Envelope::parse(&message) {
        Some(Envelope::MethodCall { id, method, args }) => on_method_call(shared, frame, id, &method, &args),
        Some(other) => {
            tracing::debug!(bridge = %shared.id, message = ?other, "unexpected envelope from guest");
        }
        None => {}
    }
}

fn on_method_call(shared: &Arc<BridgeShared>, frame: &HostFrame, guest_id: String, method: &str, args: &[Value]) {
    let call = method
        .parse::<Method>()
        .and_then(|method| MethodCall::parse(method, args));
    let call = match call {
        Ok(call) => call,
        Err(err) => {
            tracing::warn!(bridge = %shared.id, method, error = %err, "rejected method call");
            respond(frame, guest_id, Err(err));
            return;
        }
    };

    let mut dispatches = shared.dispatches.lock();
    let Some(running) = dispatches.as_mut() else {
        respond(frame, guest_id, Err(BridgeError::Detached));
        return;
    };

    let (call_id, reply) = shared.inflight.register();
    tracing::debug!(bridge = %shared.id, method, call = %call_id, "method call");

    let handlers = Arc::clone(&*shared.handlers.read());
    let worker = Arc::clone(shared);
    running.retain(|task| !task.is_finished());
    running.push(tokio::spawn(async move {
        match dispatch(handlers.as_ref(), call).await {
            Ok(value) => worker.inflight.resolve(call_id.as_str(), value),
            Err(err) => worker.inflight.reject(call_id.as_str(), err),
        };
    }));
    drop(dispatches);

    let frame = frame.clone();
    tokio::spawn(async move {
        respond(&frame, guest_id, reply.await);
    });
}

fn respond(frame: &HostFrame, guest_id: String, outcome: BridgeResult<Value>) {
    if let Err(err) = frame.post(Envelope::response(guest_id.clone(), outcome).to_value()) {
        tracing::debug!(frame = %frame.id(), call = %guest_id, error = %err, "response dropped");
    }
}
