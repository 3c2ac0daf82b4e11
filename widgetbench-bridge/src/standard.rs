//! Standard host bridge (MCP Apps over JSON-RPC 2.0)
//!
//! Runs next to the legacy bridge on the same frame and exposes a narrower,
//! platform-neutral contract: tool input and result pushes, host context,
//! link opening, display mode negotiation, logging, conversation messages
//! and size changes. Messages without `"jsonrpc": "2.0"` are not ours.

use crate::console::ConsoleEntryType;
use crate::error::BridgeError;
use crate::frame::{FrameReceiver, HostFrame};
use crate::handlers::MethodHandlers;
use crate::protocol::clamp_height;
use crate::store::WorkbenchStore;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use widgetbench_types::{CallToolResponse, DeviceType, DisplayMode, GlobalsSnapshot};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2025-06-18";
pub const HOST_NAME: &str = "widgetbench";

pub const INVALID_PARAMS: i64 = -32602;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INTERNAL_ERROR: i64 = -32603;

pub const TOOL_INPUT: &str = "ui/notifications/tool-input";
pub const TOOL_RESULT: &str = "ui/notifications/tool-result";
pub const HOST_CONTEXT_CHANGED: &str = "ui/notifications/host-context-changed";

/// Host context object handed to the guest
pub fn build_host_context(globals: &GlobalsSnapshot) -> Value {
    let platform = match globals.user_agent.device.device_type {
        DeviceType::Mobile | DeviceType::Tablet => "mobile",
        DeviceType::Desktop => "web",
    };
    json!({
        "theme": globals.theme,
        "locale": globals.locale,
        "displayMode": globals.display_mode,
        "availableDisplayModes": DisplayMode::ALL,
        "containerDimensions": { "maxHeight": globals.max_height },
        "platform": platform,
        "deviceCapabilities": globals.user_agent.capabilities,
        "safeAreaInsets": globals.safe_area.insets,
        "userAgent": HOST_NAME,
    })
}

/// Map a tool response to MCP `CallToolResult` params. Only text content
/// blocks survive.
pub fn to_mcp_tool_result(response: &CallToolResponse) -> Value {
    let content: Vec<Value> = response
        .content
        .as_ref()
        .map(|content| content.text_blocks())
        .unwrap_or_default()
        .into_iter()
        .map(|text| json!({ "type": "text", "text": text }))
        .collect();

    let mut params = Map::new();
    params.insert("content".to_string(), Value::Array(content));
    if let Some(structured) = &response.structured_content {
        params.insert("structuredContent".to_string(), structured.clone());
    }
    if let Some(is_error) = response.is_error {
        params.insert("isError".to_string(), Value::Bool(is_error));
    }
    if let Some(meta) = &response.meta {
        params.insert("_meta".to_string(), Value::Object(meta.clone()));
    }
    Value::Object(params)
}

fn tool_result_from_globals(globals: &GlobalsSnapshot) -> Option<Value> {
    let output = globals.tool_output.clone()?;
    let response = CallToolResponse {
        structured_content: Some(output),
        meta: globals
            .tool_response_metadata
            .as_ref()
            .and_then(Value::as_object)
            .cloned(),
        ..CallToolResponse::default()
    };
    Some(to_mcp_tool_result(&response))
}

#[derive(Debug, Default)]
struct Pushed {
    host_context: Option<Value>,
    tool_input: Option<Value>,
    tool_result: Option<Value>,
}

struct StandardShared {
    frame: HostFrame,
    store: Arc<WorkbenchStore>,
    handlers: RwLock<Arc<dyn MethodHandlers>>,
    initialized: AtomicBool,
    pushed: Mutex<Pushed>,
    /// Request tasks still running; `None` once closed
    requests: Mutex<Option<Vec<JoinHandle<()>>>>,
}

/// JSON-RPC adapter for one frame
pub struct StandardHostBridge {
    shared: Arc<StandardShared>,
    listener: JoinHandle<()>,
}

impl std::fmt::Debug for StandardHostBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardHostBridge")
            .field("frame", &self.shared.frame.id())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl StandardHostBridge {
    /// Start serving the standard protocol on a frame
    pub fn connect(frame: HostFrame, store: Arc<WorkbenchStore>, handlers: Arc<dyn MethodHandlers>) -> Self {
        let inbound = frame.subscribe();
        let shared = Arc::new(StandardShared {
            frame,
            store,
            handlers: RwLock::new(handlers),
            initialized: AtomicBool::new(false),
            pushed: Mutex::new(Pushed::default()),
            requests: Mutex::new(Some(Vec::new())),
        });
        let listener = tokio::spawn(listen(Arc::clone(&shared), inbound));
        Self { shared, listener }
    }

    /// Whether the guest acknowledged initialization
    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    pub fn set_handlers(&self, handlers: Arc<dyn MethodHandlers>) {
        *self.shared.handlers.write() = handlers;
    }

    /// Push whatever changed since the last sync. Nothing is pushed before
    /// the guest has initialized; initialization pushes the current state.
    pub fn sync(&self, globals: &GlobalsSnapshot) {
        if !self.is_initialized() {
            return;
        }
        let shared = &self.shared;
        let mut pushed = shared.pushed.lock();

        let context = build_host_context(globals);
        if pushed.host_context.as_ref() != Some(&context) && shared.notify(HOST_CONTEXT_CHANGED, context.clone()) {
            pushed.host_context = Some(context);
        }

        let input = globals.tool_input.clone();
        if pushed.tool_input.as_ref() != Some(&input) && shared.notify(TOOL_INPUT, json!({ "arguments": input })) {
            pushed.tool_input = Some(input);
        }

        if let Some(result) = tool_result_from_globals(globals) {
            if pushed.tool_result.as_ref() != Some(&result) && shared.notify(TOOL_RESULT, result.clone()) {
                pushed.tool_result = Some(result);
            }
        }
    }

    /// Stop listening and cancel requests still being served
    pub fn close(&self) {
        self.listener.abort();
        self.shared.initialized.store(false, Ordering::SeqCst);
        if let Some(requests) = self.shared.requests.lock().take() {
            for request in requests {
                request.abort();
            }
        }
    }
}

impl Drop for StandardHostBridge {
    fn drop(&mut self) {
        self.close();
    }
}

impl StandardShared {
    fn post(&self, message: Value) -> bool {
        match self.frame.post(message) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(frame = %self.frame.id(), error = %err, "standard bridge message dropped");
                false
            }
        }
    }

    fn notify(&self, method: &str, params: Value) -> bool {
        tracing::trace!(method, "standard bridge notification");
        self.post(json!({ "jsonrpc": JSONRPC_VERSION, "method": method, "params": params }))
    }

    fn reply(&self, id: Value, outcome: Result<Value, (i64, String)>) {
        let message = match outcome {
            Ok(result) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result }),
            Err((code, message)) => json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": id,
                "error": { "code": code, "message": message },
            }),
        };
        self.post(message);
    }

    fn log_event(&self, method: String, args: Value) {
        self.store.console().push(ConsoleEntryType::Event, method, Some(args), None);
    }

    fn on_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        let globals = self.store.globals();
        let mut pushed = self.pushed.lock();

        // The context handed out by `ui/initialize` may be stale by now.
        let context = build_host_context(&globals);
        if pushed.host_context.as_ref() != Some(&context) && self.notify(HOST_CONTEXT_CHANGED, context.clone()) {
            pushed.host_context = Some(context);
        }

        // Re-push unconditionally: earlier pushes may have been dropped.
        let input = globals.tool_input.clone();
        if self.notify(TOOL_INPUT, json!({ "arguments": input })) {
            pushed.tool_input = Some(input);
        }
        if let Some(result) = tool_result_from_globals(&globals) {
            if self.notify(TOOL_RESULT, result.clone()) {
                pushed.tool_result = Some(result);
            }
        }
        tracing::debug!(frame = %self.frame.id(), "standard bridge initialized");
    }

    fn on_notification(&self, method: &str, params: &Value) {
        match method {
            "ui/notifications/initialized" => self.on_initialized(),
            "notifications/message" => {
                let logger = params.get("logger").and_then(Value::as_str).unwrap_or("widget");
                self.log_event(
                    format!("notifications/message ({logger})"),
                    json!({ "level": params.get("level"), "data": params.get("data") }),
                );
            }
            "ui/notifications/size-changed" => {
                self.store.set_intrinsic_height(clamp_height(params.get("height")));
            }
            other => tracing::debug!(method = other, "ignored standard notification"),
        }
    }

    async fn on_request(&self, method: &str, params: Value) -> Result<Value, (i64, String)> {
        let handlers = Arc::clone(&*self.handlers.read());
        let internal = |err: BridgeError| (INTERNAL_ERROR, err.to_string());

        match method {
            "ui/initialize" => {
                let context = build_host_context(&self.store.globals());
                self.pushed.lock().host_context = Some(context.clone());
                Ok(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "hostInfo": { "name": HOST_NAME, "version": env!("CARGO_PKG_VERSION") },
                    "hostCapabilities": {
                        "openLinks": {},
                        "serverTools": {},
                        "logging": {},
                        "message": { "text": {}, "structuredContent": {} },
                        "updateModelContext": { "text": {}, "structuredContent": {} },
                    },
                    "hostContext": context,
                }))
            }
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or((INVALID_PARAMS, "tools/call requires a tool name".to_string()))?
                    .to_string();
                let args = params
                    .get("arguments")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let response = handlers.call_tool(name, args).await.map_err(internal)?;
                Ok(to_mcp_tool_result(&response))
            }
            "ui/open-link" => {
                let url = params
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or((INVALID_PARAMS, "ui/open-link requires a url".to_string()))?;
                handlers.open_external(url.to_string()).await.map_err(internal)?;
                Ok(json!({}))
            }
            "ui/request-display-mode" => {
                let mode: DisplayMode = params
                    .get("mode")
                    .cloned()
                    .and_then(|mode| serde_json::from_value(mode).ok())
                    .ok_or((INVALID_PARAMS, "unknown display mode".to_string()))?;
                let granted = handlers.request_display_mode(mode).await.map_err(internal)?;
                Ok(json!({ "mode": granted }))
            }
            "ui/message" => {
                self.log_event(
                    "ui/message".to_string(),
                    json!({ "role": params.get("role"), "content": params.get("content") }),
                );
                Ok(json!({}))
            }
            "ui/update-model-context" => {
                self.log_event(
                    "ui/update-model-context".to_string(),
                    json!({
                        "content": params.get("content"),
                        "structuredContent": params.get("structuredContent"),
                    }),
                );
                Ok(json!({}))
            }
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        }
    }
}

async fn listen(shared: Arc<StandardShared>, mut inbound: FrameReceiver) {
    while let Some(message) = inbound.recv().await {
        if message.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            continue;
        }
        let Some(method) = message.get("method").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match message.get("id").cloned() {
            Some(id) => {
                let mut requests = shared.requests.lock();
                let Some(running) = requests.as_mut() else {
                    break;
                };
                let worker = Arc::clone(&shared);
                running.retain(|request| !request.is_finished());
                running.push(tokio::spawn(async move {
                    let outcome = worker.on_request(&method, params).await;
                    if let Err((code, reason)) = &outcome {
                        tracing::debug!(method = %method, code, reason = %reason, "standard request failed");
                    }
                    worker.reply(id, outcome);
                }));
            }
            None => shared.on_notification(&method, &params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use widgetbench_types::ToolContent;

    #[test]
    fn test_host_context_platform() {
        let mut globals = GlobalsSnapshot::default();
        assert_eq!(build_host_context(&globals)["platform"], "web");

        globals.user_agent = widgetbench_types::UserAgent::for_device(DeviceType::Tablet);
        let context = build_host_context(&globals);
        assert_eq!(context["platform"], "mobile");
        assert_eq!(context["availableDisplayModes"], json!(["pip", "inline", "fullscreen"]));
        assert_eq!(context["containerDimensions"]["maxHeight"], json!(600.0));
    }

    #[test]
    fn test_tool_result_keeps_text_blocks_only() {
        let response = CallToolResponse {
            content: Some(ToolContent::Blocks(vec![
                json!({ "type": "text", "text": "hi" }),
                json!({ "type": "image", "data": "..." }),
            ])),
            is_error: Some(false),
            ..CallToolResponse::default()
        };
        assert_eq!(
            to_mcp_tool_result(&response),
            json!({ "content": [{ "type": "text", "text": "hi" }], "isError": false })
        );
    }

    #[test]
    fn test_tool_result_from_globals_needs_output() {
        let mut globals = GlobalsSnapshot::default();
        assert!(tool_result_from_globals(&globals).is_none());

        globals.tool_output = Some(json!({ "n": 1 }));
        globals.tool_response_metadata = Some(json!({ "k": "v" }));
        assert_eq!(
            tool_result_from_globals(&globals),
            Some(json!({ "content": [], "structuredContent": { "n": 1 }, "_meta": { "k": "v" } }))
        );
    }
}
