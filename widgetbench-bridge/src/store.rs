//! Workbench state behind a preview
//!
//! One `WorkbenchStore` exists per preview and is shared by reference with
//! every handler of that preview's bridge. Each mutation bumps a revision on
//! a watch channel; the widget host listens to it to push globals.

use crate::console::ConsoleLog;
use crate::files::FileStore;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use widgetbench_types::{
    CallToolResponse, DeviceType, DisplayMode, GlobalsSnapshot, MockConfigState, SafeArea,
    SafeAreaInsets, Theme, ToolMockConfig, ToolSimulation, UserAgent, View,
};

/// Host-side state a preview renders from
#[derive(Debug, Clone, PartialEq)]
pub struct WorkbenchState {
    pub theme: Theme,
    pub locale: String,
    pub display_mode: DisplayMode,
    pub previous_display_mode: Option<DisplayMode>,
    pub is_transitioning: bool,
    pub max_height: f64,
    pub device_type: DeviceType,
    pub safe_area_insets: SafeAreaInsets,
    pub tool_input: Value,
    pub tool_output: Option<Value>,
    pub tool_response_metadata: Option<Value>,
    pub widget_state: Option<Value>,
    pub view: Option<View>,
    pub user_location: Option<Value>,
    pub intrinsic_height: Option<f64>,
    pub widget_closed: bool,
    pub mock_config: MockConfigState,
    pub simulation: BTreeMap<String, ToolSimulation>,
    /// Tools seen by the simulation panel
    pub sim_tools: BTreeSet<String>,
    pub widget_session_id: String,
}

impl Default for WorkbenchState {
    fn default() -> Self {
        let globals = GlobalsSnapshot::default();
        Self {
            theme: globals.theme,
            locale: globals.locale,
            display_mode: globals.display_mode,
            previous_display_mode: None,
            is_transitioning: false,
            max_height: globals.max_height,
            device_type: DeviceType::Desktop,
            safe_area_insets: SafeAreaInsets::default(),
            tool_input: globals.tool_input,
            tool_output: None,
            tool_response_metadata: None,
            widget_state: None,
            view: None,
            user_location: None,
            intrinsic_height: None,
            widget_closed: false,
            mock_config: MockConfigState::default(),
            simulation: BTreeMap::new(),
            sim_tools: BTreeSet::new(),
            widget_session_id: format!("ws_{}", uuid::Uuid::new_v4().simple()),
        }
    }
}

impl WorkbenchState {
    /// The complete globals snapshot this state produces
    pub fn globals(&self) -> GlobalsSnapshot {
        GlobalsSnapshot {
            theme: self.theme,
            locale: self.locale.clone(),
            display_mode: self.display_mode,
            previous_display_mode: self.previous_display_mode,
            max_height: self.max_height,
            tool_input: self.tool_input.clone(),
            tool_output: self.tool_output.clone(),
            tool_response_metadata: self.tool_response_metadata.clone(),
            widget_state: self.widget_state.clone(),
            user_agent: UserAgent::for_device(self.device_type),
            safe_area: SafeArea {
                insets: self.safe_area_insets,
            },
            view: self.view.clone(),
            user_location: self.user_location.clone(),
        }
    }
}

/// Partial safe-area update; missing sides keep their value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SafeAreaPatch {
    pub top: Option<f64>,
    pub bottom: Option<f64>,
    pub left: Option<f64>,
    pub right: Option<f64>,
}

/// Cancels one hanging call. Clones share the same trigger.
#[derive(Clone)]
pub struct CancelHandle {
    trigger: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl CancelHandle {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                trigger: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Fire the cancellation. Returns false if it already fired or the
    /// call settled.
    pub fn cancel(&self) -> bool {
        match self.trigger.lock().take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("armed", &self.trigger.lock().is_some())
            .finish()
    }
}

/// The call currently driving the pending indicator
#[derive(Debug, Clone)]
pub struct ActiveToolCall {
    ticket: u64,
    pub tool_name: String,
    pub delay: Duration,
    pub started_at: Instant,
    pub is_hanging: bool,
    pub cancel: Option<CancelHandle>,
}

/// Clears the active tool call slot when dropped, unless a later call has
/// taken the slot since.
#[must_use = "dropping the guard clears the active tool call"]
pub struct ActiveCallGuard {
    store: Arc<WorkbenchStore>,
    ticket: u64,
}

impl Drop for ActiveCallGuard {
    fn drop(&mut self) {
        self.store.clear_active_tool_call(self.ticket);
    }
}

/// Shared state object for one preview
pub struct WorkbenchStore {
    state: RwLock<WorkbenchState>,
    active_call: Mutex<Option<ActiveToolCall>>,
    next_ticket: AtomicU64,
    revision: watch::Sender<u64>,
    console: ConsoleLog,
    files: FileStore,
}

impl Default for WorkbenchStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkbenchStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkbenchStore")
            .field("revision", &self.revision())
            .field("state", &*self.state.read())
            .finish()
    }
}

impl WorkbenchStore {
    pub fn new() -> Self {
        Self::with_state(WorkbenchState::default())
    }

    pub fn with_state(state: WorkbenchState) -> Self {
        Self {
            state: RwLock::new(state),
            active_call: Mutex::new(None),
            next_ticket: AtomicU64::new(1),
            revision: watch::channel(0).0,
            console: ConsoleLog::new(),
            files: FileStore::new(),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut WorkbenchState) -> R) -> R {
        let result = f(&mut *self.state.write());
        self.bump();
        result
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn read<R>(&self, f: impl FnOnce(&WorkbenchState) -> R) -> R {
        f(&*self.state.read())
    }

    /// Watch store revisions
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn snapshot(&self) -> WorkbenchState {
        self.read(WorkbenchState::clone)
    }

    pub fn globals(&self) -> GlobalsSnapshot {
        self.read(WorkbenchState::globals)
    }

    pub fn console(&self) -> &ConsoleLog {
        &self.console
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    // ===== Environment =====

    pub fn set_theme(&self, theme: Theme) {
        self.update(|s| s.theme = theme);
    }

    pub fn set_locale(&self, locale: impl Into<String>) {
        let locale = locale.into();
        self.update(|s| s.locale = locale);
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.read(|s| s.display_mode)
    }

    /// Set the display mode, remembering the previous one on change
    pub fn set_display_mode(&self, mode: DisplayMode) {
        self.update(|s| {
            if s.display_mode != mode {
                s.previous_display_mode = Some(s.display_mode);
                s.display_mode = mode;
            }
        });
    }

    /// Switch to `mode` unless it is already current or a transition is in
    /// flight, raising the transitioning flag too when `animate` is set.
    /// Test and set happen under one write lock. Returns the mode in effect
    /// afterwards, and the mode switched away from if this call switched.
    pub fn switch_display_mode(&self, mode: DisplayMode, animate: bool) -> (DisplayMode, Option<DisplayMode>) {
        let outcome = {
            let mut state = self.state.write();
            if state.display_mode == mode || state.is_transitioning {
                (state.display_mode, None)
            } else {
                let previous = state.display_mode;
                state.previous_display_mode = Some(previous);
                state.display_mode = mode;
                state.is_transitioning = animate;
                (mode, Some(previous))
            }
        };
        if outcome.1.is_some() {
            self.bump();
        }
        outcome
    }

    pub fn is_transitioning(&self) -> bool {
        self.read(|s| s.is_transitioning)
    }

    pub fn set_transitioning(&self, transitioning: bool) {
        self.update(|s| s.is_transitioning = transitioning);
    }

    pub fn set_max_height(&self, max_height: f64) {
        self.update(|s| s.max_height = max_height);
    }

    /// Change the emulated device without touching the height limit
    pub fn set_device_type(&self, device_type: DeviceType) {
        self.update(|s| s.device_type = device_type);
    }

    pub fn set_safe_area_insets(&self, patch: SafeAreaPatch) {
        self.update(|s| {
            let insets = &mut s.safe_area_insets;
            insets.top = patch.top.unwrap_or(insets.top);
            insets.bottom = patch.bottom.unwrap_or(insets.bottom);
            insets.left = patch.left.unwrap_or(insets.left);
            insets.right = patch.right.unwrap_or(insets.right);
        });
    }

    pub fn set_user_location(&self, location: Option<Value>) {
        self.update(|s| s.user_location = location);
    }

    // ===== Tool data =====

    pub fn set_tool_input(&self, input: Value) {
        self.update(|s| s.tool_input = input);
    }

    pub fn set_tool_output(&self, output: Option<Value>) {
        self.update(|s| s.tool_output = output);
    }

    pub fn set_tool_response_metadata(&self, metadata: Option<Value>) {
        self.update(|s| s.tool_response_metadata = metadata);
    }

    pub fn widget_session_id(&self) -> String {
        self.read(|s| s.widget_session_id.clone())
    }

    // ===== Widget outputs =====

    pub fn widget_state(&self) -> Option<Value> {
        self.read(|s| s.widget_state.clone())
    }

    pub fn set_widget_state(&self, state: Option<Value>) {
        self.update(|s| s.widget_state = state);
    }

    pub fn view(&self) -> Option<View> {
        self.read(|s| s.view.clone())
    }

    pub fn set_view(&self, view: Option<View>) {
        self.update(|s| s.view = view);
    }

    pub fn intrinsic_height(&self) -> Option<f64> {
        self.read(|s| s.intrinsic_height)
    }

    pub fn set_intrinsic_height(&self, height: Option<f64>) {
        self.update(|s| s.intrinsic_height = height);
    }

    pub fn is_widget_closed(&self) -> bool {
        self.read(|s| s.widget_closed)
    }

    pub fn set_widget_closed(&self, closed: bool) {
        self.update(|s| s.widget_closed = closed);
    }

    // ===== Mock configuration =====

    pub fn mock_config(&self) -> MockConfigState {
        self.read(|s| s.mock_config.clone())
    }

    pub fn tool_mock_config(&self, tool: &str) -> Option<ToolMockConfig> {
        self.read(|s| s.mock_config.tools.get(tool).cloned())
    }

    pub fn is_known_tool(&self, tool: &str) -> bool {
        self.read(|s| s.mock_config.tools.contains_key(tool))
    }

    /// Register a tool with default variants. Returns true if it was new.
    pub fn register_tool(&self, tool: &str) -> bool {
        if self.is_known_tool(tool) {
            return false;
        }
        self.update(|s| {
            s.mock_config
                .tools
                .entry(tool.to_string())
                .or_insert_with(|| ToolMockConfig::new(tool));
        });
        true
    }

    pub fn set_tool_mock_config(&self, tool: &str, config: ToolMockConfig) {
        self.update(|s| {
            s.mock_config.tools.insert(tool.to_string(), config);
        });
    }

    /// Select (or clear) the active variant of a tool, registering it first
    pub fn set_active_variant(&self, tool: &str, variant_id: Option<String>) {
        self.update(|s| {
            s.mock_config
                .tools
                .entry(tool.to_string())
                .or_insert_with(|| ToolMockConfig::new(tool))
                .active_variant_id = variant_id;
        });
    }

    pub fn set_mock_response(&self, tool: &str, response: Option<CallToolResponse>) {
        self.update(|s| {
            s.mock_config
                .tools
                .entry(tool.to_string())
                .or_insert_with(|| ToolMockConfig::new(tool))
                .mock_response = response;
        });
    }

    pub fn set_mocks_enabled(&self, enabled: bool) {
        self.update(|s| s.mock_config.global_enabled = enabled);
    }

    // ===== Simulation overrides =====

    pub fn register_sim_tool(&self, tool: &str) {
        if self.read(|s| s.sim_tools.contains(tool)) {
            return;
        }
        self.update(|s| {
            s.sim_tools.insert(tool.to_string());
        });
    }

    pub fn sim_tools(&self) -> Vec<String> {
        self.read(|s| s.sim_tools.iter().cloned().collect())
    }

    pub fn simulation_for(&self, tool: &str) -> Option<ToolSimulation> {
        self.read(|s| s.simulation.get(tool).cloned())
    }

    pub fn set_simulation(&self, tool: &str, simulation: ToolSimulation) {
        self.update(|s| {
            s.simulation.insert(tool.to_string(), simulation);
        });
    }

    pub fn clear_simulation(&self, tool: &str) {
        self.update(|s| {
            s.simulation.remove(tool);
        });
    }

    // ===== Active tool call =====

    /// Occupy the active tool call slot (last writer wins). The slot is
    /// cleared when the returned guard drops.
    pub fn begin_tool_call(
        self: &Arc<Self>,
        tool_name: &str,
        delay: Duration,
        cancel: Option<CancelHandle>,
    ) -> ActiveCallGuard {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        *self.active_call.lock() = Some(ActiveToolCall {
            ticket,
            tool_name: tool_name.to_string(),
            delay,
            started_at: Instant::now(),
            is_hanging: cancel.is_some(),
            cancel,
        });
        self.bump();
        ActiveCallGuard {
            store: Arc::clone(self),
            ticket,
        }
    }

    fn clear_active_tool_call(&self, ticket: u64) {
        let cleared = {
            let mut slot = self.active_call.lock();
            match slot.as_ref() {
                Some(call) if call.ticket == ticket => {
                    *slot = None;
                    true
                }
                _ => false,
            }
        };
        if cleared {
            self.bump();
        }
    }

    pub fn active_tool_call(&self) -> Option<ActiveToolCall> {
        self.active_call.lock().clone()
    }

    /// Invoke the cancel function of the active call, if it has one
    pub fn cancel_active_tool_call(&self) -> bool {
        let handle = self
            .active_call
            .lock()
            .as_ref()
            .and_then(|call| call.cancel.clone());
        handle.map(|handle| handle.cancel()).unwrap_or(false)
    }
}
