//! Tool-call simulation engine
//!
//! Answers `callTool` without a backend. Per call exactly one branch runs,
//! picked in this order:
//!
//! 1. a tester-set simulation override (`success`, `error` or `hang`)
//! 2. the tool's active mock variant, after the variant's delay
//! 3. the tool's direct `mockResponse`, after the default delay
//! 4. a synthesized success response; the tool becomes known
//!
//! Every branch occupies the store's active tool call slot for as long as
//! the call is pending and clears it on every exit.

use crate::console::ConsoleEntryType;
use crate::error::{describe_timeout, BridgeError, BridgeResult};
use crate::store::{CancelHandle, WorkbenchStore};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use widgetbench_types::{CallToolResponse, SimulationMode, ToolContent};

pub const DEFAULT_DELAY: Duration = Duration::from_millis(300);
pub const HANG_TIMEOUT: Duration = Duration::from_secs(30);

pub const WIDGET_SESSION_META: &str = "openai/widgetSessionId";
pub const CLOSE_WIDGET_META: &str = "openai/closeWidget";

/// Timers used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationTimings {
    /// Latency of simulated and non-variant responses
    pub default_delay: Duration,
    /// Ceiling after which a hanging call fails
    pub hang_timeout: Duration,
}

impl Default for SimulationTimings {
    fn default() -> Self {
        Self {
            default_delay: DEFAULT_DELAY,
            hang_timeout: HANG_TIMEOUT,
        }
    }
}

/// Which resolution path answered a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Simulated(SimulationMode),
    Variant,
    MockResponse,
    Default,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Simulated(mode) => write!(f, "simulated:{}", mode.as_str()),
            Branch::Variant => f.write_str("variant"),
            Branch::MockResponse => f.write_str("mock_response"),
            Branch::Default => f.write_str("default"),
        }
    }
}

/// Produces `callTool` results from the store's mock and simulation config
#[derive(Debug, Clone)]
pub struct ToolCallSimulator {
    store: Arc<WorkbenchStore>,
    timings: SimulationTimings,
}

impl ToolCallSimulator {
    pub fn new(store: Arc<WorkbenchStore>, timings: SimulationTimings) -> Self {
        Self { store, timings }
    }

    pub fn timings(&self) -> SimulationTimings {
        self.timings
    }

    /// Run one tool call through the resolution order
    pub async fn call_tool(&self, name: &str, args: Map<String, Value>) -> BridgeResult<CallToolResponse> {
        let console = self.store.console();
        console.push(
            ConsoleEntryType::CallTool,
            format!("callTool(\"{name}\")"),
            Some(Value::Object(args.clone())),
            None,
        );
        self.store.register_sim_tool(name);

        let simulation = self
            .store
            .simulation_for(name)
            .filter(|simulation| simulation.mode != SimulationMode::Normal);

        let (branch, outcome) = match simulation {
            Some(simulation) if simulation.mode == SimulationMode::Hang => {
                (Branch::Simulated(SimulationMode::Hang), Err(self.hang(name).await))
            }
            Some(simulation) => {
                let response = {
                    let _active = self
                        .store
                        .begin_tool_call(name, self.timings.default_delay, None);
                    tokio::time::sleep(self.timings.default_delay).await;
                    simulated_response(simulation.mode, simulation.response_data)
                };
                (Branch::Simulated(simulation.mode), Ok(response))
            }
            None => {
                let (branch, response) = self.mock_response(name, args).await;
                (branch, Ok(response))
            }
        };

        match outcome {
            Ok(response) => {
                let response = self.finish(name, branch, response);
                tracing::info!(
                    method = "callTool",
                    tool = name,
                    %branch,
                    is_error = response.is_error(),
                    "tool call settled"
                );
                Ok(response)
            }
            Err(err) => {
                tracing::info!(method = "callTool", tool = name, %branch, error = %err, "tool call settled");
                Err(err)
            }
        }
    }

    async fn mock_response(&self, name: &str, args: Map<String, Value>) -> (Branch, CallToolResponse) {
        if self.store.register_tool(name) {
            tracing::debug!(tool = name, "registered new tool");
        }

        let config = self.store.mock_config();
        let tool = config.tools.get(name);
        let variant = tool
            .filter(|_| config.global_enabled)
            .and_then(|tool| tool.active_variant())
            .cloned();

        if let Some(variant) = variant {
            let delay = Duration::from_millis(variant.delay);
            let _active = self.store.begin_tool_call(name, delay, None);
            tokio::time::sleep(delay).await;
            let mut response = variant.response;
            response.mock_variant = Some(variant.name);
            return (Branch::Variant, response);
        }

        let _active = self
            .store
            .begin_tool_call(name, self.timings.default_delay, None);
        tokio::time::sleep(self.timings.default_delay).await;

        match tool.and_then(|tool| tool.mock_response.clone()) {
            Some(response) => (Branch::MockResponse, response),
            None => (Branch::Default, default_response(name, args)),
        }
    }

    /// Hold the call until cancelled or timed out. Always fails.
    async fn hang(&self, name: &str) -> BridgeError {
        let timeout = self.timings.hang_timeout;
        self.store.console().push(
            ConsoleEntryType::CallTool,
            format!("callTool(\"{name}\") → [SIMULATED: HANG]"),
            None,
            Some(json!({
                "_note": format!("Response withheld to test loading state ({} timeout)", describe_timeout(&timeout))
            })),
        );

        let (cancel, cancelled) = CancelHandle::new();
        let _active = self
            .store
            .begin_tool_call(name, timeout, Some(cancel.clone()));

        let (err, label) = tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                (BridgeError::HangTimeout(timeout), "hang timeout")
            }
            Ok(()) = cancelled => (BridgeError::HangCancelled, "hang cancelled"),
        };

        self.store.console().push(
            ConsoleEntryType::CallTool,
            format!("callTool(\"{name}\") → [SIMULATED: {label}]"),
            None,
            Some(json!({ "_note": err.to_string() })),
        );
        err
    }

    fn finish(&self, name: &str, branch: Branch, mut response: CallToolResponse) -> CallToolResponse {
        response
            .meta
            .get_or_insert_with(Map::new)
            .insert(WIDGET_SESSION_META.to_string(), Value::String(self.store.widget_session_id()));

        let label = match (&branch, &response.mock_variant) {
            (Branch::Simulated(mode), _) => format!("[SIMULATED: {}]", mode.as_str().to_uppercase()),
            (_, Some(variant)) => format!("[MOCK: {variant}]"),
            _ => "response".to_string(),
        };
        self.store.console().push(
            ConsoleEntryType::CallTool,
            format!("callTool(\"{name}\") → {label}"),
            None,
            serde_json::to_value(&response).ok(),
        );

        self.store.set_tool_output(response.structured_content.clone());
        self.store
            .set_tool_response_metadata(response.meta.clone().map(Value::Object));
        if response.meta_flag(CLOSE_WIDGET_META) {
            self.store.set_widget_closed(true);
        }
        response
    }
}

fn simulated_response(mode: SimulationMode, data: Map<String, Value>) -> CallToolResponse {
    match mode {
        SimulationMode::Error => {
            let message = data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Simulated error");
            CallToolResponse::error(message)
        }
        _ => CallToolResponse::structured(Value::Object(data)),
    }
}

fn default_response(name: &str, args: Map<String, Value>) -> CallToolResponse {
    CallToolResponse {
        content: Some(ToolContent::Text(format!("Mock response for {name}"))),
        structured_content: Some(json!({
            "success": true,
            "tool": name,
            "arguments": args,
        })),
        ..CallToolResponse::default()
    }
}
