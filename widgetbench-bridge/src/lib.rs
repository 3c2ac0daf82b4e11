//! Widgetbench Bridge - host/guest message bridge for widget previews
//!
//! This crate lets an untrusted widget run as though it were embedded in a
//! tool-calling assistant surface, with no live backend behind it.
//! It includes:
//!
//! - **Frames**: in-process stand-in for a sandboxed frame and its message channel
//! - **Protocol**: `SET_GLOBALS` / `METHOD_CALL` / `METHOD_RESPONSE` envelopes
//! - **Call correlator**: per-id futures that settle exactly once
//! - **Message bridge**: method dispatch and diff-based globals pushes
//! - **Handlers**: host-side implementation of every bridge method
//! - **Simulation**: deterministic tool-call results (variants, overrides, hang)
//! - **Standard bridge**: the MCP Apps JSON-RPC contract on the same frame
//! - **Widget host / guest**: session lifecycle on both sides of the frame
//!
//! ## Architecture
//!
//! Each preview owns one [`WorkbenchStore`]. The [`WidgetHost`] mounts a
//! frame, creates a [`MessageBridge`] for it and keeps that bridge for as
//! long as the frame identity is unchanged; store revisions are pushed
//! through it as globals diffs. Guest calls flow through the bridge into
//! [`MethodHandlers`], and `callTool` lands in the [`ToolCallSimulator`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use widgetbench_bridge::{frame_pair, HostOptions, WidgetGuest, WidgetHost, WorkbenchStore};
//!
//! # async fn demo() -> Result<(), widgetbench_bridge::BridgeError> {
//! let store = Arc::new(WorkbenchStore::new());
//! let host = WidgetHost::new(Arc::clone(&store), HostOptions::default());
//!
//! let (host_frame, guest_frame) = frame_pair();
//! let guest = WidgetGuest::connect(guest_frame);
//! host.mount(host_frame);
//! guest.ready().await;
//!
//! let response = guest.call_tool("search", serde_json::json!({ "query": "x" })).await?;
//! assert!(!response.is_error());
//! assert!(store.is_known_tool("search"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure model
//!
//! Nothing here panics or throws across the message boundary. Malformed
//! messages are ignored, unknown methods and handler failures become error
//! responses, and detaching rejects every call still pending.

pub mod bridge;
pub mod config;
pub mod console;
pub mod correlator;
pub mod display_mode;
pub mod error;
pub mod files;
pub mod frame;
pub mod guest;
pub mod handlers;
pub mod host;
pub mod protocol;
pub mod simulation;
pub mod standard;
pub mod store;

// Re-export main types
pub use bridge::{BridgeId, MessageBridge};

pub use config::{ConfigError, WorkbenchConfig};

pub use console::{ConsoleEntry, ConsoleEntryType, ConsoleLog};

pub use correlator::{CallCorrelator, CallId, PendingReply};

pub use display_mode::{DisplayModeController, TransitionEnvironment, ViewTransition};

pub use error::{BridgeError, BridgeResult};

pub use files::FileStore;

pub use frame::{frame_pair, FrameId, FrameReceiver, GuestFrame, HostFrame};

pub use guest::{GlobalsChange, WidgetGuest};

pub use handlers::{dispatch, LogNavigator, MethodHandlers, Navigator, WorkbenchHandlers};

pub use host::{HostOptions, WidgetHost};

pub use protocol::{Envelope, FileUpload, Method, MethodCall, ModalOptions};

pub use simulation::{Branch, SimulationTimings, ToolCallSimulator};

pub use standard::StandardHostBridge;

pub use store::{ActiveToolCall, CancelHandle, SafeAreaPatch, WorkbenchState, WorkbenchStore};

#[cfg(test)]
mod tests;
