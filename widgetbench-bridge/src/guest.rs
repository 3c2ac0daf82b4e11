//! Guest-side shim
//!
//! What runs inside the frame: it keeps the guest's full copy of the
//! globals, merges every `SET_GLOBALS` push into it and publishes a change
//! event only when some key actually changed. Outbound method calls are
//! correlated by id and settled by `METHOD_RESPONSE`.

use crate::bridge::changed_keys;
use crate::correlator::CallCorrelator;
use crate::error::{BridgeError, BridgeResult};
use crate::frame::{FrameId, FrameReceiver, GuestFrame};
use crate::protocol::{Envelope, FileUpload, Method, ModalOptions};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use widgetbench_types::{CallToolResponse, DisplayMode, GlobalsSnapshot};

/// Keys that changed in one globals push, with the merged result
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalsChange {
    pub keys: Vec<String>,
    pub globals: Map<String, Value>,
}

struct GuestShared {
    calls: CallCorrelator<Value>,
    globals: RwLock<Map<String, Value>>,
    changes: broadcast::Sender<GlobalsChange>,
    ready: watch::Sender<bool>,
}

/// The widget's view of its host
pub struct WidgetGuest {
    frame: GuestFrame,
    shared: Arc<GuestShared>,
    listener: JoinHandle<()>,
}

impl std::fmt::Debug for WidgetGuest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetGuest")
            .field("frame", &self.frame.id())
            .field("pending", &self.shared.calls.pending_count())
            .finish()
    }
}

impl WidgetGuest {
    /// Start listening on the frame and fire its load event
    pub fn connect(frame: GuestFrame) -> Self {
        let shared = Arc::new(GuestShared {
            calls: CallCorrelator::new(),
            globals: RwLock::new(Map::new()),
            changes: broadcast::channel(64).0,
            ready: watch::channel(false).0,
        });
        let listener = tokio::spawn(listen(Arc::clone(&shared), frame.subscribe()));
        frame.mark_loaded();
        Self {
            frame,
            shared,
            listener,
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame.id()
    }

    /// Wait until the host has pushed the initial globals
    pub async fn ready(&self) {
        let mut ready = self.shared.ready.subscribe();
        // The sender lives as long as `self`.
        let _ = ready.wait_for(|ready| *ready).await;
    }

    pub fn globals_map(&self) -> Map<String, Value> {
        self.shared.globals.read().clone()
    }

    /// Typed globals, once a full snapshot has arrived
    pub fn globals(&self) -> Option<GlobalsSnapshot> {
        GlobalsSnapshot::from_map(self.globals_map()).ok()
    }

    /// Change events, one per push that changed something
    pub fn subscribe_globals(&self) -> broadcast::Receiver<GlobalsChange> {
        self.shared.changes.subscribe()
    }

    pub fn pending_calls(&self) -> usize {
        self.shared.calls.pending_count()
    }

    /// Call a host method by name
    pub async fn call(&self, method: &str, args: Vec<Value>) -> BridgeResult<Value> {
        let (id, reply) = self.shared.calls.register();
        let message = Envelope::MethodCall {
            id: id.to_string(),
            method: method.to_string(),
            args,
        };
        if let Err(err) = self.frame.post(message.to_value()) {
            self.shared.calls.reject(id.as_str(), err);
        }
        reply.await
    }

    async fn call_method(&self, method: Method, args: Vec<Value>) -> BridgeResult<Value> {
        self.call(method.as_str(), args).await
    }

    pub async fn call_tool(&self, name: &str, args: Value) -> BridgeResult<CallToolResponse> {
        let result = self.call_method(Method::CallTool, vec![json!(name), args]).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn set_widget_state(&self, state: Value) -> BridgeResult<()> {
        self.call_method(Method::SetWidgetState, vec![state]).await.map(|_| ())
    }

    pub async fn request_display_mode(&self, mode: DisplayMode) -> BridgeResult<DisplayMode> {
        let result = self
            .call_method(Method::RequestDisplayMode, vec![json!({ "mode": mode })])
            .await?;
        let mode = result.get("mode").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(mode)?)
    }

    pub async fn send_follow_up_message(&self, prompt: &str) -> BridgeResult<()> {
        self.call_method(Method::SendFollowUpMessage, vec![json!({ "prompt": prompt })])
            .await
            .map(|_| ())
    }

    pub async fn request_close(&self) -> BridgeResult<()> {
        self.call_method(Method::RequestClose, vec![]).await.map(|_| ())
    }

    pub async fn open_external(&self, href: &str) -> BridgeResult<()> {
        self.call_method(Method::OpenExternal, vec![json!({ "href": href })])
            .await
            .map(|_| ())
    }

    pub async fn notify_intrinsic_height(&self, height: f64) -> BridgeResult<()> {
        self.call_method(Method::NotifyIntrinsicHeight, vec![json!(height)])
            .await
            .map(|_| ())
    }

    pub async fn request_modal(&self, options: ModalOptions) -> BridgeResult<()> {
        self.call_method(Method::RequestModal, vec![serde_json::to_value(options)?])
            .await
            .map(|_| ())
    }

    /// Returns the file id assigned by the host
    pub async fn upload_file(&self, file: FileUpload) -> BridgeResult<String> {
        let result = self
            .call_method(Method::UploadFile, vec![serde_json::to_value(file)?])
            .await?;
        string_field(&result, "fileId")
    }

    pub async fn get_file_download_url(&self, file_id: &str) -> BridgeResult<String> {
        let result = self
            .call_method(Method::GetFileDownloadUrl, vec![json!({ "fileId": file_id })])
            .await?;
        string_field(&result, "downloadUrl")
    }
}

impl Drop for WidgetGuest {
    fn drop(&mut self) {
        self.listener.abort();
        self.shared.calls.reject_all(BridgeError::Detached);
    }
}

fn string_field(value: &Value, key: &str) -> BridgeResult<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BridgeError::Serialization(format!("missing `{key}` in response")))
}

async fn listen(shared: Arc<GuestShared>, mut inbound: FrameReceiver) {
    while let Some(message) = inbound.recv().await {
        match Envelope::parse(&message) {
            Some(Envelope::SetGlobals { globals }) => merge_globals(&shared, globals),
            Some(Envelope::MethodResponse { id, result, error }) => {
                match error {
                    Some(error) => shared.calls.reject(&id, BridgeError::Remote(error)),
                    None => shared.calls.resolve(&id, result.unwrap_or(Value::Null)),
                };
            }
            Some(Envelope::MethodCall { .. }) | None => {}
        }
    }
}

fn merge_globals(shared: &GuestShared, update: Map<String, Value>) {
    let change = {
        let mut globals = shared.globals.write();
        let changed = changed_keys(&globals, &update);
        globals.extend(update);
        GlobalsChange {
            keys: changed.keys().cloned().collect(),
            globals: globals.clone(),
        }
    };
    shared.ready.send_if_modified(|ready| !std::mem::replace(ready, true));
    if !change.keys.is_empty() {
        // No subscriber is fine.
        let _ = shared.changes.send(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::frame_pair;
    use std::time::Duration;

    #[tokio::test]
    async fn test_merge_publishes_only_real_changes() {
        let (host, guest_frame) = frame_pair();
        let guest = WidgetGuest::connect(guest_frame);
        let mut changes = guest.subscribe_globals();

        let full = GlobalsSnapshot::default().to_map();
        host.post(Envelope::SetGlobals { globals: full.clone() }.to_value()).unwrap();
        guest.ready().await;
        let first = changes.recv().await.unwrap();
        assert_eq!(first.keys.len(), full.len());

        // Same values again: merged, but no change event.
        let mut partial = Map::new();
        partial.insert("theme".to_string(), json!("light"));
        host.post(Envelope::SetGlobals { globals: partial }.to_value()).unwrap();

        let mut dark = Map::new();
        dark.insert("theme".to_string(), json!("dark"));
        host.post(Envelope::SetGlobals { globals: dark }.to_value()).unwrap();

        let next = changes.recv().await.unwrap();
        assert_eq!(next.keys, vec!["theme".to_string()]);
        assert_eq!(guest.globals().unwrap().theme, widgetbench_types::Theme::Dark);
    }

    #[tokio::test]
    async fn test_response_settles_call() {
        let (host, guest_frame) = frame_pair();
        let mut from_guest = host.subscribe();
        let guest = Arc::new(WidgetGuest::connect(guest_frame));

        let caller = tokio::spawn({
            let guest = Arc::clone(&guest);
            async move { guest.call("requestClose", vec![]).await }
        });

        let call = from_guest.recv().await.unwrap();
        let id = call["id"].as_str().unwrap().to_string();
        host.post(Envelope::response(id, Err(BridgeError::Remote("nope".into()))).to_value())
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), caller).await.unwrap().unwrap();
        assert_eq!(outcome, Err(BridgeError::Remote("nope".to_string())));
    }

    #[tokio::test]
    async fn test_drop_rejects_pending_calls() {
        let (host, guest_frame) = frame_pair();
        let _from_guest = host.subscribe();
        let guest = WidgetGuest::connect(guest_frame);
        let shared = Arc::clone(&guest.shared);

        let (_, reply) = shared.calls.register();
        drop(guest);
        assert_eq!(reply.await, Err(BridgeError::Detached));
    }
}
