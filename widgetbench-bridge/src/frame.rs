//! In-process stand-in for a sandboxed frame and its message channel
//!
//! A frame has two ends. The host end posts into the guest and listens to
//! what the guest posts; the guest end does the reverse. Every listener gets
//! its own unbounded queue, like `addEventListener("message")`, so the legacy
//! bridge and the standard adapter can share one frame. Delivery is in post
//! order and nothing is dropped while the listener lives. Messages are plain
//! JSON values: anything can be posted, validation happens at the listener.

use crate::error::{BridgeError, BridgeResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Inbound side of one frame listener
pub type FrameReceiver = mpsc::UnboundedReceiver<Value>;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one guest execution context. A reload yields a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    fn next() -> Self {
        Self(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame-{}", self.0)
    }
}

/// Listeners on one direction of a frame
#[derive(Default)]
struct Listeners {
    senders: Mutex<Vec<mpsc::UnboundedSender<Value>>>,
}

impl Listeners {
    fn subscribe(&self) -> FrameReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        rx
    }

    /// Fan a message out to every live listener, pruning the dropped ones.
    /// The lock is held across the fan-out so concurrent posts reach every
    /// listener in the same order.
    fn post(&self, message: Value) -> BridgeResult<()> {
        let mut senders = self.senders.lock();
        senders.retain(|sender| sender.send(message.clone()).is_ok());
        if senders.is_empty() {
            // Like a postMessage into a window whose script has not run yet.
            return Err(BridgeError::FrameClosed);
        }
        Ok(())
    }
}

struct FrameChannels {
    id: FrameId,
    to_guest: Listeners,
    to_host: Listeners,
    loaded: watch::Sender<bool>,
}

/// Create a fresh frame, returning its host and guest ends
pub fn frame_pair() -> (HostFrame, GuestFrame) {
    let channels = Arc::new(FrameChannels {
        id: FrameId::next(),
        to_guest: Listeners::default(),
        to_host: Listeners::default(),
        loaded: watch::channel(false).0,
    });
    (
        HostFrame {
            channels: Arc::clone(&channels),
        },
        GuestFrame { channels },
    )
}

/// Host-side end of a frame
#[derive(Clone)]
pub struct HostFrame {
    channels: Arc<FrameChannels>,
}

impl HostFrame {
    pub fn id(&self) -> FrameId {
        self.channels.id
    }

    /// Post a message into the guest
    pub fn post(&self, message: Value) -> BridgeResult<()> {
        self.channels.to_guest.post(message)
    }

    /// Listen to messages posted by the guest
    pub fn subscribe(&self) -> FrameReceiver {
        self.channels.to_host.subscribe()
    }

    /// Whether the guest execution context has finished loading
    pub fn is_loaded(&self) -> bool {
        *self.channels.loaded.borrow()
    }

    /// Watch for the guest's load event
    pub fn load_events(&self) -> watch::Receiver<bool> {
        self.channels.loaded.subscribe()
    }
}

impl fmt::Debug for HostFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFrame")
            .field("id", &self.channels.id)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Guest-side end of a frame
#[derive(Clone)]
pub struct GuestFrame {
    channels: Arc<FrameChannels>,
}

impl GuestFrame {
    pub fn id(&self) -> FrameId {
        self.channels.id
    }

    /// Post a message to the host
    pub fn post(&self, message: Value) -> BridgeResult<()> {
        self.channels.to_host.post(message)
    }

    /// Listen to messages posted by the host
    pub fn subscribe(&self) -> FrameReceiver {
        self.channels.to_guest.subscribe()
    }

    /// Fire the load event. Idempotent.
    pub fn mark_loaded(&self) {
        self.channels.loaded.send_if_modified(|loaded| {
            let changed = !*loaded;
            *loaded = true;
            changed
        });
    }
}

impl fmt::Debug for GuestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestFrame")
            .field("id", &self.channels.id)
            .finish()
    }
}
