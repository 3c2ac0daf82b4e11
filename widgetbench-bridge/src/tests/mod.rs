//! Integration tests for the raw bridge protocol

#[cfg(test)]
mod integration_tests {
    use crate::{
        bridge::MessageBridge,
        error::{BridgeError, BridgeResult},
        frame::{frame_pair, FrameReceiver, GuestFrame, HostFrame},
        handlers::MethodHandlers,
        protocol::{FileUpload, ModalOptions},
    };
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use widgetbench_types::{CallToolResponse, DisplayMode, GlobalsSnapshot, Theme};

    /// Answers every method with a fixed value tagged by `label`
    struct StubHandlers {
        label: &'static str,
    }

    #[async_trait]
    impl MethodHandlers for StubHandlers {
        async fn call_tool(&self, name: String, _args: Map<String, Value>) -> BridgeResult<CallToolResponse> {
            Ok(CallToolResponse::structured(json!({ "tool": name, "by": self.label })))
        }

        async fn set_widget_state(&self, _state: Option<Value>) -> BridgeResult<()> {
            Ok(())
        }

        async fn request_display_mode(&self, mode: DisplayMode) -> BridgeResult<DisplayMode> {
            Ok(mode)
        }

        async fn send_follow_up_message(&self, _prompt: String) -> BridgeResult<()> {
            Ok(())
        }

        async fn request_close(&self) -> BridgeResult<()> {
            Ok(())
        }

        async fn open_external(&self, _href: String) -> BridgeResult<()> {
            Ok(())
        }

        async fn notify_intrinsic_height(&self, _height: Option<f64>) -> BridgeResult<()> {
            Ok(())
        }

        async fn request_modal(&self, _options: ModalOptions) -> BridgeResult<()> {
            Ok(())
        }

        async fn upload_file(&self, _file: FileUpload) -> BridgeResult<String> {
            Ok("file_stub".to_string())
        }

        async fn get_file_download_url(&self, file_id: String) -> BridgeResult<String> {
            Err(BridgeError::FileNotFound(file_id))
        }
    }

    fn attached(label: &'static str) -> (MessageBridge, HostFrame, GuestFrame, FrameReceiver) {
        let (host, guest) = frame_pair();
        let inbox = guest.subscribe();
        let bridge = MessageBridge::new(Arc::new(StubHandlers { label }));
        bridge.attach(host.clone()).unwrap();
        (bridge, host, guest, inbox)
    }

    async fn next(inbox: &mut FrameReceiver) -> Value {
        tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .expect("no message within a second")
            .expect("channel closed")
    }

    fn call(id: &str, method: &str, args: Value) -> Value {
        json!({ "type": "METHOD_CALL", "id": id, "method": method, "args": args })
    }

    #[tokio::test]
    async fn test_noise_is_ignored() {
        let (_bridge, _host, guest, mut inbox) = attached("stub");

        guest.post(json!("webpack hot update")).unwrap();
        guest.post(json!({ "source": "react-devtools" })).unwrap();
        guest.post(json!({ "type": "METHOD_CALL" })).unwrap();
        guest.post(call("1", "requestClose", json!([]))).unwrap();

        let response = next(&mut inbox).await;
        assert_eq!(response, json!({ "type": "METHOD_RESPONSE", "id": "1", "result": null }));
    }

    #[tokio::test]
    async fn test_unknown_method_is_rejected_explicitly() {
        let (_bridge, _host, guest, mut inbox) = attached("stub");
        guest.post(call("7", "launchMissiles", json!([]))).unwrap();

        let response = next(&mut inbox).await;
        assert_eq!(response["id"], "7");
        assert_eq!(response["error"], "Unsupported method: launchMissiles");
        assert!(response.get("result").is_none());
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_rejected() {
        let (_bridge, _host, guest, mut inbox) = attached("stub");
        guest.post(call("m", "requestDisplayMode", json!([{ "mode": "huge" }]))).unwrap();

        let response = next(&mut inbox).await;
        let error = response["error"].as_str().unwrap();
        assert!(error.starts_with("Invalid arguments for requestDisplayMode"), "{error}");
    }

    #[tokio::test]
    async fn test_handler_error_isolated_to_its_call() {
        let (_bridge, _host, guest, mut inbox) = attached("stub");
        guest.post(call("a", "getFileDownloadUrl", json!([{ "fileId": "nope" }]))).unwrap();
        guest.post(call("b", "callTool", json!(["search", {}]))).unwrap();

        let mut responses = vec![next(&mut inbox).await, next(&mut inbox).await];
        responses.sort_by_key(|r| r["id"].as_str().unwrap_or_default().to_string());
        assert_eq!(responses[0]["error"], "File not found: nope");
        assert_eq!(responses[1]["result"]["structuredContent"]["tool"], "search");
    }

    #[tokio::test]
    async fn test_globals_push_full_then_diff() {
        let (bridge, _host, _guest, mut inbox) = attached("stub");
        let mut globals = GlobalsSnapshot::default();

        assert!(bridge.send_globals(&globals).unwrap());
        let first = next(&mut inbox).await;
        assert_eq!(first["type"], "SET_GLOBALS");
        assert_eq!(first["globals"].as_object().unwrap().len(), globals.to_map().len());

        assert!(!bridge.send_globals(&globals).unwrap());

        globals.theme = Theme::Dark;
        assert!(bridge.send_globals(&globals).unwrap());
        let second = next(&mut inbox).await;
        assert_eq!(second["globals"], json!({ "theme": "dark" }));
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_attach_rules() {
        let (bridge, host, _guest, _inbox) = attached("stub");
        assert!(bridge.attach(host).is_ok());

        let (other, _other_guest) = frame_pair();
        assert!(matches!(bridge.attach(other.clone()), Err(BridgeError::AlreadyAttached(_))));

        bridge.detach();
        assert_eq!(bridge.attach(other), Err(BridgeError::Detached));
        assert!(!bridge.is_attached());
    }

    #[tokio::test]
    async fn test_set_handlers_applies_to_new_calls() {
        let (bridge, _host, guest, mut inbox) = attached("first");
        guest.post(call("1", "callTool", json!(["t"]))).unwrap();
        assert_eq!(next(&mut inbox).await["result"]["structuredContent"]["by"], "first");

        bridge.set_handlers(Arc::new(StubHandlers { label: "second" }));
        guest.post(call("2", "callTool", json!(["t"]))).unwrap();
        assert_eq!(next(&mut inbox).await["result"]["structuredContent"]["by"], "second");
    }

    #[tokio::test]
    async fn test_send_globals_before_attach_is_noop() {
        let bridge = MessageBridge::new(Arc::new(StubHandlers { label: "stub" }));
        assert_eq!(bridge.send_globals(&GlobalsSnapshot::default()), Ok(false));
    }
}
