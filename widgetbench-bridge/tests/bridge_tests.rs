//! Integration tests for a full host/guest preview session

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use widgetbench_bridge::{
    frame_pair, BridgeError, FileUpload, FrameReceiver, HostOptions, TransitionEnvironment,
    ViewTransition, WidgetGuest, WidgetHost, WorkbenchStore,
};
use widgetbench_types::{
    CallToolResponse, DisplayMode, MockVariant, SimulationMode, Theme, ToolMockConfig,
    ToolSimulation,
};

struct Session {
    store: Arc<WorkbenchStore>,
    host: WidgetHost,
    guest: Arc<WidgetGuest>,
}

async fn open_with(options: HostOptions) -> Session {
    let store = Arc::new(WorkbenchStore::new());
    let host = WidgetHost::new(Arc::clone(&store), options);
    let (host_frame, guest_frame) = frame_pair();
    let guest = Arc::new(WidgetGuest::connect(guest_frame));
    host.mount(host_frame);
    guest.ready().await;
    Session { store, host, guest }
}

async fn open() -> Session {
    open_with(HostOptions::default()).await
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

fn variant_tool(name: &str, delay_ms: u64, structured: Value) -> ToolMockConfig {
    let mut config = ToolMockConfig::new(name);
    config.variants.push(
        MockVariant::new("fixed", "fixed", CallToolResponse::structured(structured)).with_delay(delay_ms),
    );
    config.active_variant_id = Some("fixed".to_string());
    config
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_responses_match_by_id() {
    let session = open().await;
    session
        .store
        .set_tool_mock_config("slow", variant_tool("slow", 2000, json!({ "from": "slow" })));
    session
        .store
        .set_tool_mock_config("fast", variant_tool("fast", 100, json!({ "from": "fast" })));

    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let spawn_call = |tool: &'static str| {
        let guest = Arc::clone(&session.guest);
        let order = Arc::clone(&order);
        tokio::spawn(async move {
            let response = guest.call_tool(tool, json!({})).await;
            order.lock().push(tool);
            response
        })
    };
    let slow = spawn_call("slow");
    let fast = spawn_call("fast");

    let slow = slow.await.unwrap().unwrap();
    let fast = fast.await.unwrap().unwrap();
    assert_eq!(slow.structured_content, Some(json!({ "from": "slow" })));
    assert_eq!(fast.structured_content, Some(json!({ "from": "fast" })));
    assert_eq!(*order.lock(), vec!["fast", "slow"]);
}

#[tokio::test]
async fn test_call_burst_settles_every_call() {
    let session = open().await;

    let calls: Vec<_> = (0..300)
        .map(|n| {
            let guest = Arc::clone(&session.guest);
            tokio::spawn(async move { guest.set_widget_state(json!({ "n": n })).await })
        })
        .collect();

    let settled = tokio::time::timeout(Duration::from_secs(10), async {
        for call in calls {
            call.await.unwrap().unwrap();
        }
    })
    .await;
    assert!(settled.is_ok(), "some calls never settled");
    assert_eq!(session.guest.pending_calls(), 0);
    assert_eq!(session.host.bridge().unwrap().pending_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_detach_rejects_every_pending_call_once() {
    let session = open().await;
    for tool in ["a", "b", "c"] {
        session
            .store
            .set_simulation(tool, ToolSimulation::new(SimulationMode::Hang));
    }
    let bridge = session.host.bridge().unwrap();

    let calls: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|tool| {
            let guest = Arc::clone(&session.guest);
            tokio::spawn(async move { guest.call_tool(tool, json!({})).await })
        })
        .collect();
    wait_until(|| bridge.pending_calls() == 3).await;

    assert_eq!(session.host.unmount(), 3);
    assert_eq!(bridge.detach(), 0);
    for call in calls {
        let outcome = call.await.unwrap();
        assert_eq!(outcome, Err(BridgeError::Remote("bridge detached".to_string())));
    }
    assert_eq!(bridge.pending_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reload_does_not_touch_new_session() {
    let session = open().await;
    session
        .store
        .set_simulation("stuck", ToolSimulation::new(SimulationMode::Hang));
    let first_bridge = session.host.bridge().unwrap();

    let stale = {
        let guest = Arc::clone(&session.guest);
        tokio::spawn(async move { guest.call_tool("stuck", json!({})).await })
    };
    wait_until(|| first_bridge.pending_calls() == 1).await;

    // Reload: a new frame identity replaces the old one.
    let (host_frame, guest_frame) = frame_pair();
    let reloaded = WidgetGuest::connect(guest_frame);
    let second_bridge = session.host.mount(host_frame);
    reloaded.ready().await;

    assert_ne!(first_bridge.id(), second_bridge.id());
    assert_eq!(
        stale.await.unwrap(),
        Err(BridgeError::Remote("bridge detached".to_string()))
    );

    let fresh = reloaded.call_tool("search", json!({})).await.unwrap();
    assert!(!fresh.is_error());
    assert_eq!(second_bridge.pending_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unmount_releases_hanging_call_slot() {
    let session = open().await;
    session
        .store
        .set_simulation("stuck", ToolSimulation::new(SimulationMode::Hang));

    let call = {
        let guest = Arc::clone(&session.guest);
        tokio::spawn(async move { guest.call_tool("stuck", json!({})).await })
    };
    wait_until(|| session.store.active_tool_call().is_some_and(|active| active.is_hanging)).await;

    assert_eq!(session.host.unmount(), 1);
    assert_eq!(
        call.await.unwrap(),
        Err(BridgeError::Remote("bridge detached".to_string()))
    );
    // Well before the hang would time out on its own.
    wait_until(|| session.store.active_tool_call().is_none()).await;
}

#[tokio::test(start_paused = true)]
async fn test_unmount_stops_delayed_call_from_writing_output() {
    let session = open().await;
    session
        .store
        .set_tool_mock_config("lookup", variant_tool("lookup", 2000, json!({ "late": true })));
    let bridge = session.host.bridge().unwrap();

    let call = {
        let guest = Arc::clone(&session.guest);
        tokio::spawn(async move { guest.call_tool("lookup", json!({})).await })
    };
    wait_until(|| bridge.pending_calls() == 1).await;

    assert_eq!(session.host.unmount(), 1);
    assert!(call.await.unwrap().is_err());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(session.store.snapshot().tool_output, None);
    assert!(session.store.active_tool_call().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_bridge_survives_state_changes() {
    let session = open().await;
    session
        .store
        .set_tool_mock_config("lookup", variant_tool("lookup", 1000, json!({ "ok": true })));
    let bridge = session.host.bridge().unwrap();

    let call = {
        let guest = Arc::clone(&session.guest);
        tokio::spawn(async move { guest.call_tool("lookup", json!({})).await })
    };
    wait_until(|| bridge.pending_calls() == 1).await;

    session.store.set_theme(Theme::Dark);
    session.store.set_locale("ja-JP");
    session.store.set_widget_state(Some(json!({ "step": 2 })));
    session.store.set_max_height(900.0);

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.structured_content, Some(json!({ "ok": true })));

    let current = session.host.bridge().unwrap();
    assert!(Arc::ptr_eq(&bridge, &current));
    wait_until(|| session.guest.globals().map(|g| g.locale) == Some("ja-JP".to_string())).await;
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_globals_are_not_pushed() {
    let store = Arc::new(WorkbenchStore::new());
    let host = WidgetHost::new(Arc::clone(&store), HostOptions::default());
    let (host_frame, guest_frame) = frame_pair();
    let mut raw = guest_frame.subscribe();
    let guest = WidgetGuest::connect(guest_frame);
    host.mount(host_frame);
    guest.ready().await;

    let first = raw.recv().await.unwrap();
    assert_eq!(first["type"], "SET_GLOBALS");
    assert_eq!(first["globals"]["locale"], "en-US");

    // Store churn that leaves the globals alone.
    store.register_tool("unrelated");
    store.set_intrinsic_height(Some(120.0));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(matches!(raw.try_recv(), Err(TryRecvError::Empty)));

    store.set_theme(Theme::Dark);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let diff = raw.try_recv().unwrap();
    assert_eq!(diff["globals"], json!({ "theme": "dark" }));
}

#[tokio::test(start_paused = true)]
async fn test_search_scenario() {
    let session = open().await;
    assert!(!session.store.is_known_tool("search"));

    let first = session
        .guest
        .call_tool("search", json!({ "query": "x" }))
        .await
        .unwrap();
    assert!(!first.is_error());
    assert!(first.structured_content.is_some());
    assert!(session.store.is_known_tool("search"));

    let mut config = session.store.tool_mock_config("search").unwrap();
    config.variants.push(MockVariant::new(
        "v1",
        "v1",
        CallToolResponse::structured(json!({ "hits": 3 })),
    ));
    config.active_variant_id = Some("v1".to_string());
    session.store.set_tool_mock_config("search", config);

    let second = session
        .guest
        .call_tool("search", json!({ "query": "x" }))
        .await
        .unwrap();
    assert_eq!(second.structured_content, Some(json!({ "hits": 3 })));
    assert_eq!(second.mock_variant.as_deref(), Some("v1"));
}

#[tokio::test(start_paused = true)]
async fn test_simulation_override_beats_active_variant() {
    let session = open().await;
    session
        .store
        .set_tool_mock_config("search", variant_tool("search", 0, json!({ "hits": 3 })));
    session.store.set_simulation(
        "search",
        ToolSimulation::new(SimulationMode::Success)
            .with_data(serde_json::Map::from_iter([("hits".to_string(), json!(99))])),
    );

    let response = session.guest.call_tool("search", json!({})).await.unwrap();
    assert_eq!(response.structured_content, Some(json!({ "hits": 99 })));
    assert_eq!(response.mock_variant, None);

    session.store.clear_simulation("search");
    let response = session.guest.call_tool("search", json!({})).await.unwrap();
    assert_eq!(response.mock_variant.as_deref(), Some("fixed"));
}

#[tokio::test(start_paused = true)]
async fn test_hang_cancel_rejects_and_clears() {
    let session = open().await;
    session
        .store
        .set_simulation("slow", ToolSimulation::new(SimulationMode::Hang));

    let call = {
        let guest = Arc::clone(&session.guest);
        tokio::spawn(async move { guest.call_tool("slow", json!({})).await })
    };
    let store = Arc::clone(&session.store);
    wait_until(|| store.active_tool_call().map(|c| c.is_hanging) == Some(true)).await;

    assert!(session.store.cancel_active_tool_call());
    assert_eq!(
        call.await.unwrap(),
        Err(BridgeError::Remote("Hang simulation cancelled".to_string()))
    );
    assert!(session.store.active_tool_call().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_hang_times_out_at_ceiling() {
    let session = open().await;
    session
        .store
        .set_simulation("slow", ToolSimulation::new(SimulationMode::Hang));

    let started = tokio::time::Instant::now();
    let outcome = session.guest.call_tool("slow", json!({})).await;
    assert_eq!(
        outcome,
        Err(BridgeError::Remote(
            "Simulated hang timed out after 30 seconds".to_string()
        ))
    );
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(session.store.active_tool_call().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_file_upload_and_download() {
    let session = open().await;
    let file_id = session
        .guest
        .upload_file(FileUpload {
            name: "report.pdf".to_string(),
            size: 1024,
            mime_type: "application/pdf".to_string(),
            data: None,
        })
        .await
        .unwrap();

    let url = session.guest.get_file_download_url(&file_id).await.unwrap();
    assert!(!url.is_empty());

    let missing = session.guest.get_file_download_url("file_unknown").await;
    assert_eq!(
        missing,
        Err(BridgeError::Remote("File not found: file_unknown".to_string()))
    );
}

#[derive(Default)]
struct CountingTransition {
    started: AtomicUsize,
}

impl ViewTransition for CountingTransition {
    fn begin(&self, _from: DisplayMode, _to: DisplayMode) -> Result<(), String> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_fullscreen_requested_twice() {
    let primitive = Arc::new(CountingTransition::default());
    let session = open_with(HostOptions {
        transitions: TransitionEnvironment {
            primitive: Some(primitive.clone() as Arc<dyn ViewTransition>),
            ..TransitionEnvironment::default()
        },
        ..HostOptions::default()
    })
    .await;

    let first = session.guest.request_display_mode(DisplayMode::Fullscreen).await;
    assert!(session.store.is_transitioning());
    let second = session.guest.request_display_mode(DisplayMode::Fullscreen).await;

    assert_eq!(first, Ok(DisplayMode::Fullscreen));
    assert_eq!(second, Ok(DisplayMode::Fullscreen));
    assert_eq!(primitive.started.load(Ordering::SeqCst), 1);
    assert_eq!(session.store.display_mode(), DisplayMode::Fullscreen);
    assert_eq!(session.store.snapshot().previous_display_mode, Some(DisplayMode::Inline));

    let store = Arc::clone(&session.store);
    wait_until(|| !store.is_transitioning()).await;
}

#[tokio::test(start_paused = true)]
async fn test_attach_runs_immediately_for_loaded_frame() {
    let store = Arc::new(WorkbenchStore::new());
    let host = WidgetHost::new(Arc::clone(&store), HostOptions::default());

    let (host_frame, guest_frame) = frame_pair();
    let _guest = WidgetGuest::connect(guest_frame);
    let bridge = host.mount(host_frame);
    assert!(bridge.is_attached());

    // Not loaded yet: the handshake waits for the load event.
    let (host_frame, guest_frame) = frame_pair();
    let bridge = host.mount(host_frame);
    assert!(!bridge.is_attached());
    let guest = WidgetGuest::connect(guest_frame);
    guest.ready().await;
    assert!(bridge.is_attached());
}

#[tokio::test(start_paused = true)]
async fn test_mounting_same_frame_keeps_bridge() {
    let store = Arc::new(WorkbenchStore::new());
    let host = WidgetHost::new(Arc::clone(&store), HostOptions::default());
    let (host_frame, guest_frame) = frame_pair();
    let _guest = WidgetGuest::connect(guest_frame);

    let first = host.mount(host_frame.clone());
    let again = host.mount(host_frame);
    assert!(Arc::ptr_eq(&first, &again));
}

#[tokio::test(start_paused = true)]
async fn test_widget_outputs_reach_store() {
    let session = open().await;
    let guest = &session.guest;

    guest.set_widget_state(json!({ "selected": 2 })).await.unwrap();
    guest.notify_intrinsic_height(480.0).await.unwrap();
    guest.send_follow_up_message("tell me more").await.unwrap();
    guest.open_external("https://example.com").await.unwrap();
    guest.request_close().await.unwrap();

    assert_eq!(session.store.widget_state(), Some(json!({ "selected": 2 })));
    assert_eq!(session.store.intrinsic_height(), Some(480.0));
    assert!(session.store.is_widget_closed());
    assert!(session.store.console().len() >= 5);

    wait_until(|| guest.globals().and_then(|g| g.widget_state) == Some(json!({ "selected": 2 }))).await;
}

mod standard {
    use super::*;

    async fn next_rpc(inbox: &mut FrameReceiver, matches: impl Fn(&Value) -> bool) -> Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
                .await
                .expect("no JSON-RPC message")
                .expect("channel closed");
            if message.get("jsonrpc").is_some() && matches(&message) {
                return message;
            }
        }
    }

    fn method_is(name: &'static str) -> impl Fn(&Value) -> bool {
        move |message: &Value| message["method"] == name
    }

    fn id_is(id: i64) -> impl Fn(&Value) -> bool {
        move |message: &Value| message["id"] == id
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_and_pushes() {
        let store = Arc::new(WorkbenchStore::new());
        let host = WidgetHost::new(Arc::clone(&store), HostOptions::default());
        let (host_frame, guest_frame) = frame_pair();
        let mut inbox = guest_frame.subscribe();
        let guest = WidgetGuest::connect(guest_frame.clone());
        host.mount(host_frame);
        guest.ready().await;

        guest_frame
            .post(json!({ "jsonrpc": "2.0", "id": 1, "method": "ui/initialize", "params": {} }))
            .unwrap();
        let init = next_rpc(&mut inbox, id_is(1)).await;
        assert_eq!(init["result"]["hostContext"]["platform"], "web");
        assert_eq!(init["result"]["hostContext"]["theme"], "light");

        // Pushed before acknowledgement: dropped, then re-sent on initialized.
        store.set_tool_input(json!({ "q": "early" }));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!host.standard().unwrap().is_initialized());

        guest_frame
            .post(json!({ "jsonrpc": "2.0", "method": "ui/notifications/initialized" }))
            .unwrap();
        let input = next_rpc(&mut inbox, method_is("ui/notifications/tool-input")).await;
        assert_eq!(input["params"]["arguments"], json!({ "q": "early" }));

        store.set_theme(Theme::Dark);
        let context = next_rpc(&mut inbox, method_is("ui/notifications/host-context-changed")).await;
        assert_eq!(context["params"]["theme"], "dark");

        guest_frame
            .post(json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": { "name": "search", "arguments": { "q": 1 } }
            }))
            .unwrap();
        // The reply and the tool-result push race; take them in either order.
        let (mut result, mut pushed) = (None, None);
        while result.is_none() || pushed.is_none() {
            let message = next_rpc(&mut inbox, |m| {
                m["id"] == 2 || m["method"] == "ui/notifications/tool-result"
            })
            .await;
            if message["id"] == 2 {
                result = Some(message);
            } else {
                pushed = Some(message);
            }
        }
        let (result, pushed) = (result.unwrap(), pushed.unwrap());
        assert_eq!(result["result"]["content"][0]["text"], "Mock response for search");
        assert!(result["result"]["_meta"]["openai/widgetSessionId"].is_string());
        assert_eq!(pushed["params"]["structuredContent"]["tool"], "search");
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_change_before_initialized_is_pushed() {
        let store = Arc::new(WorkbenchStore::new());
        let host = WidgetHost::new(Arc::clone(&store), HostOptions::default());
        let (host_frame, guest_frame) = frame_pair();
        let mut inbox = guest_frame.subscribe();
        let guest = WidgetGuest::connect(guest_frame.clone());
        host.mount(host_frame);
        guest.ready().await;

        guest_frame
            .post(json!({ "jsonrpc": "2.0", "id": 1, "method": "ui/initialize", "params": {} }))
            .unwrap();
        let init = next_rpc(&mut inbox, id_is(1)).await;
        assert_eq!(init["result"]["hostContext"]["theme"], "light");

        store.set_theme(Theme::Dark);
        tokio::time::sleep(Duration::from_millis(10)).await;

        guest_frame
            .post(json!({ "jsonrpc": "2.0", "method": "ui/notifications/initialized" }))
            .unwrap();
        let context = next_rpc(&mut inbox, method_is("ui/notifications/host-context-changed")).await;
        assert_eq!(context["params"]["theme"], "dark");

        // Already in sync: a later unrelated change pushes no context.
        store.set_tool_input(json!({ "q": 2 }));
        loop {
            let message = next_rpc(&mut inbox, |m: &Value| m.get("method").is_some()).await;
            assert_ne!(message["method"], "ui/notifications/host-context-changed");
            if message["params"]["arguments"] == json!({ "q": 2 }) {
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_and_notifications() {
        let store = Arc::new(WorkbenchStore::new());
        let host = WidgetHost::new(Arc::clone(&store), HostOptions::default());
        let (host_frame, guest_frame) = frame_pair();
        let mut inbox = guest_frame.subscribe();
        let guest = WidgetGuest::connect(guest_frame.clone());
        host.mount(host_frame);
        guest.ready().await;

        guest_frame
            .post(json!({ "jsonrpc": "2.0", "id": 3, "method": "ui/teleport" }))
            .unwrap();
        let unknown = next_rpc(&mut inbox, id_is(3)).await;
        assert_eq!(unknown["error"]["code"], -32601);

        guest_frame
            .post(json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "ui/request-display-mode",
                "params": { "mode": "pip" }
            }))
            .unwrap();
        let mode = next_rpc(&mut inbox, id_is(4)).await;
        assert_eq!(mode["result"]["mode"], "pip");
        assert_eq!(store.display_mode(), DisplayMode::Pip);

        guest_frame
            .post(json!({
                "jsonrpc": "2.0",
                "method": "ui/notifications/size-changed",
                "params": { "height": -5 }
            }))
            .unwrap();
        guest_frame
            .post(json!({
                "jsonrpc": "2.0",
                "method": "notifications/message",
                "params": { "level": "info", "data": "hello" }
            }))
            .unwrap();
        guest_frame
            .post(json!({
                "jsonrpc": "2.0",
                "id": 5,
                "method": "ui/message",
                "params": { "role": "user", "content": [{ "type": "text", "text": "hi" }] }
            }))
            .unwrap();
        next_rpc(&mut inbox, id_is(5)).await;

        assert_eq!(store.intrinsic_height(), Some(0.0));
        let events: Vec<String> = store
            .console()
            .entries_of(widgetbench_bridge::ConsoleEntryType::Event)
            .into_iter()
            .map(|entry| entry.method)
            .collect();
        assert_eq!(events, vec!["notifications/message (widget)", "ui/message"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_adapter() {
        let store = Arc::new(WorkbenchStore::new());
        let host = WidgetHost::new(
            Arc::clone(&store),
            HostOptions {
                standard_bridge: false,
                ..HostOptions::default()
            },
        );
        let (host_frame, guest_frame) = frame_pair();
        let _guest = WidgetGuest::connect(guest_frame);
        host.mount(host_frame);
        assert!(host.standard().is_none());
    }
}
