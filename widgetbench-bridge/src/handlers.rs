//! Method handler set
//!
//! `MethodHandlers` is the table the bridge dispatches into: one async
//! method per recognized method name. `WorkbenchHandlers` is the stock
//! implementation backed by a `WorkbenchStore`.

use crate::console::ConsoleEntryType;
use crate::display_mode::DisplayModeController;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{FileUpload, MethodCall, ModalOptions};
use crate::simulation::ToolCallSimulator;
use crate::store::WorkbenchStore;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use widgetbench_types::{CallToolResponse, DisplayMode, View, ViewMode};

/// Host-side implementation of every bridge method
#[async_trait]
pub trait MethodHandlers: Send + Sync {
    async fn call_tool(&self, name: String, args: Map<String, Value>) -> BridgeResult<CallToolResponse>;

    async fn set_widget_state(&self, state: Option<Value>) -> BridgeResult<()>;

    /// Returns the mode actually granted
    async fn request_display_mode(&self, mode: DisplayMode) -> BridgeResult<DisplayMode>;

    async fn send_follow_up_message(&self, prompt: String) -> BridgeResult<()>;

    async fn request_close(&self) -> BridgeResult<()>;

    async fn open_external(&self, href: String) -> BridgeResult<()>;

    async fn notify_intrinsic_height(&self, height: Option<f64>) -> BridgeResult<()>;

    async fn request_modal(&self, options: ModalOptions) -> BridgeResult<()>;

    /// Returns the id of the stored file
    async fn upload_file(&self, file: FileUpload) -> BridgeResult<String>;

    async fn get_file_download_url(&self, file_id: String) -> BridgeResult<String>;
}

/// Run a decoded call against a handler set and shape the wire result
pub async fn dispatch(handlers: &dyn MethodHandlers, call: MethodCall) -> BridgeResult<Value> {
    match call {
        MethodCall::CallTool { name, args } => {
            let response = handlers.call_tool(name, args).await?;
            Ok(serde_json::to_value(response)?)
        }
        MethodCall::SetWidgetState(state) => handlers.set_widget_state(state).await.map(|_| Value::Null),
        MethodCall::RequestDisplayMode(mode) => {
            let granted = handlers.request_display_mode(mode).await?;
            Ok(json!({ "mode": granted }))
        }
        MethodCall::SendFollowUpMessage { prompt } => {
            handlers.send_follow_up_message(prompt).await.map(|_| Value::Null)
        }
        MethodCall::RequestClose => handlers.request_close().await.map(|_| Value::Null),
        MethodCall::OpenExternal { href } => handlers.open_external(href).await.map(|_| Value::Null),
        MethodCall::NotifyIntrinsicHeight(height) => {
            handlers.notify_intrinsic_height(height).await.map(|_| Value::Null)
        }
        MethodCall::RequestModal(options) => handlers.request_modal(options).await.map(|_| Value::Null),
        MethodCall::UploadFile(file) => {
            let file_id = handlers.upload_file(file).await?;
            Ok(json!({ "fileId": file_id }))
        }
        MethodCall::GetFileDownloadUrl { file_id } => {
            let url = handlers.get_file_download_url(file_id).await?;
            Ok(json!({ "downloadUrl": url }))
        }
    }
}

/// Opens links on behalf of the guest
pub trait Navigator: Send + Sync {
    fn open(&self, href: &str);
}

/// Records navigation requests in the log instead of opening anything
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn open(&self, href: &str) {
        tracing::info!(href, "open external link");
    }
}

/// Handlers backed by a workbench store
#[derive(Clone)]
pub struct WorkbenchHandlers {
    store: Arc<WorkbenchStore>,
    simulator: ToolCallSimulator,
    display: DisplayModeController,
    navigator: Arc<dyn Navigator>,
}

impl WorkbenchHandlers {
    pub fn new(
        store: Arc<WorkbenchStore>,
        simulator: ToolCallSimulator,
        display: DisplayModeController,
    ) -> Self {
        Self {
            store,
            simulator,
            display,
            navigator: Arc::new(LogNavigator),
        }
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn store(&self) -> &Arc<WorkbenchStore> {
        &self.store
    }

    pub fn simulator(&self) -> &ToolCallSimulator {
        &self.simulator
    }

    fn log(&self, entry_type: ConsoleEntryType, method: String, args: Option<Value>, result: Option<Value>) {
        self.store.console().push(entry_type, method, args, result);
    }
}

#[async_trait]
impl MethodHandlers for WorkbenchHandlers {
    async fn call_tool(&self, name: String, args: Map<String, Value>) -> BridgeResult<CallToolResponse> {
        self.simulator.call_tool(&name, args).await
    }

    async fn set_widget_state(&self, state: Option<Value>) -> BridgeResult<()> {
        self.log(ConsoleEntryType::SetWidgetState, "setWidgetState".to_string(), state.clone(), None);
        self.store.set_widget_state(state);
        Ok(())
    }

    async fn request_display_mode(&self, mode: DisplayMode) -> BridgeResult<DisplayMode> {
        self.log(
            ConsoleEntryType::RequestDisplayMode,
            format!("requestDisplayMode(\"{mode}\")"),
            Some(json!({ "mode": mode })),
            None,
        );
        Ok(self.display.request(mode))
    }

    async fn send_follow_up_message(&self, prompt: String) -> BridgeResult<()> {
        self.log(
            ConsoleEntryType::SendFollowUpMessage,
            "sendFollowUpMessage".to_string(),
            Some(json!({ "prompt": prompt })),
            None,
        );
        Ok(())
    }

    async fn request_close(&self) -> BridgeResult<()> {
        self.log(ConsoleEntryType::RequestClose, "requestClose".to_string(), None, None);
        self.store.set_widget_closed(true);
        Ok(())
    }

    async fn open_external(&self, href: String) -> BridgeResult<()> {
        self.log(
            ConsoleEntryType::OpenExternal,
            format!("openExternal(\"{href}\")"),
            Some(json!({ "href": href })),
            None,
        );
        self.navigator.open(&href);
        Ok(())
    }

    async fn notify_intrinsic_height(&self, height: Option<f64>) -> BridgeResult<()> {
        let label = height.map_or_else(|| "null".to_string(), |h| h.to_string());
        self.log(
            ConsoleEntryType::NotifyIntrinsicHeight,
            format!("notifyIntrinsicHeight({label})"),
            Some(json!({ "height": height })),
            None,
        );
        self.store.set_intrinsic_height(height);
        Ok(())
    }

    async fn request_modal(&self, options: ModalOptions) -> BridgeResult<()> {
        self.log(
            ConsoleEntryType::RequestModal,
            format!("requestModal(\"{}\")", options.title.as_deref().unwrap_or("Modal")),
            serde_json::to_value(&options).ok(),
            None,
        );
        self.store.set_view(Some(View {
            mode: ViewMode::Modal,
            params: options.params,
        }));
        Ok(())
    }

    async fn upload_file(&self, file: FileUpload) -> BridgeResult<String> {
        let method = format!("uploadFile(\"{}\")", file.name);
        let args = json!({ "name": file.name, "size": file.size, "type": file.mime_type });
        let file_id = self.store.files().store(file);
        self.log(ConsoleEntryType::UploadFile, method, Some(args), Some(json!({ "fileId": file_id })));
        Ok(file_id)
    }

    async fn get_file_download_url(&self, file_id: String) -> BridgeResult<String> {
        let url = self.store.files().url(&file_id);
        self.log(
            ConsoleEntryType::GetFileDownloadUrl,
            format!("getFileDownloadUrl(\"{file_id}\")"),
            Some(json!({ "fileId": file_id })),
            Some(match &url {
                Some(url) => json!({ "downloadUrl": url }),
                None => json!({ "error": "File not found" }),
            }),
        );
        url.ok_or(BridgeError::FileNotFound(file_id))
    }
}
