//! Shared types for widgetbench
//!
//! This crate provides the value objects exchanged between the host and a
//! previewed widget: the globals snapshot pushed to the guest, tool call
//! responses, and the mock/simulation records that drive fabricated tool
//! results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Color theme of the host surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

/// How the widget is presented by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Inline,
    Pip,
    Fullscreen,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 3] = [DisplayMode::Pip, DisplayMode::Inline, DisplayMode::Fullscreen];

    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayMode::Inline => "inline",
            DisplayMode::Pip => "pip",
            DisplayMode::Fullscreen => "fullscreen",
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device class the host is emulating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    #[default]
    Desktop,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(rename = "type")]
    pub device_type: DeviceType,
}

/// Input capabilities of the emulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub hover: bool,
    pub touch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAgent {
    pub device: DeviceInfo,
    pub capabilities: DeviceCapabilities,
}

impl UserAgent {
    /// Derive the user agent for a device class. Touch devices never hover.
    pub fn for_device(device_type: DeviceType) -> Self {
        let touch = matches!(device_type, DeviceType::Mobile | DeviceType::Tablet);
        Self {
            device: DeviceInfo { device_type },
            capabilities: DeviceCapabilities {
                hover: !touch,
                touch,
            },
        }
    }
}

impl Default for UserAgent {
    fn default() -> Self {
        Self::for_device(DeviceType::Desktop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SafeAreaInsets {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SafeArea {
    pub insets: SafeAreaInsets,
}

/// Which surface the widget is currently rendered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Inline,
    Modal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub mode: ViewMode,
    pub params: Option<Value>,
}

/// Host-provided environment state observed by the guest.
///
/// Always a complete object: every field is serialized, nullable ones as
/// `null`, so the guest can merge partial pushes against its last full copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalsSnapshot {
    pub theme: Theme,
    pub locale: String,
    pub display_mode: DisplayMode,
    pub previous_display_mode: Option<DisplayMode>,
    pub max_height: f64,
    pub tool_input: Value,
    pub tool_output: Option<Value>,
    pub tool_response_metadata: Option<Value>,
    pub widget_state: Option<Value>,
    pub user_agent: UserAgent,
    pub safe_area: SafeArea,
    pub view: Option<View>,
    pub user_location: Option<Value>,
}

impl Default for GlobalsSnapshot {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            locale: "en-US".to_string(),
            display_mode: DisplayMode::Inline,
            previous_display_mode: None,
            max_height: 600.0,
            tool_input: Value::Object(Map::new()),
            tool_output: None,
            tool_response_metadata: None,
            widget_state: None,
            user_agent: UserAgent::default(),
            safe_area: SafeArea::default(),
            view: None,
            user_location: None,
        }
    }
}

impl GlobalsSnapshot {
    /// Top-level keys as they appear on the wire
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Rebuild a snapshot from a full key map
    pub fn from_map(map: Map<String, Value>) -> serde_json::Result<Self> {
        serde_json::from_value(Value::Object(map))
    }
}

/// Tool response content: either a plain string or a list of content blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl ToolContent {
    /// Text blocks only, in order. Non-text blocks are skipped.
    pub fn text_blocks(&self) -> Vec<String> {
        match self {
            ToolContent::Text(text) if text.is_empty() => Vec::new(),
            ToolContent::Text(text) => vec![text.clone()],
            ToolContent::Blocks(blocks) => blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Structured result of a `callTool` invocation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ToolContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
    /// Name of the mock variant that produced this response, if any
    #[serde(rename = "_mockVariant", default, skip_serializing_if = "Option::is_none")]
    pub mock_variant: Option<String>,
}

impl CallToolResponse {
    pub fn structured(value: Value) -> Self {
        Self {
            structured_content: Some(value),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: Some(ToolContent::Text(message.into())),
            is_error: Some(true),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    pub fn meta_flag(&self, key: &str) -> bool {
        self.meta
            .as_ref()
            .and_then(|meta| meta.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Kind of canned response a variant represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockVariantType {
    Success,
    Empty,
    Error,
    Slow,
    #[default]
    Custom,
}

/// A named, pre-recorded response for one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockVariant {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: MockVariantType,
    #[serde(default)]
    pub response: CallToolResponse,
    /// Simulated latency in milliseconds
    #[serde(default)]
    pub delay: u64,
}

impl MockVariant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, response: CallToolResponse) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: MockVariantType::Custom,
            response,
            delay: 0,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = delay_ms;
        self
    }
}

/// Per-tool mock configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMockConfig {
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub variants: Vec<MockVariant>,
    #[serde(default)]
    pub active_variant_id: Option<String>,
    /// Direct override used when no variant is active
    #[serde(default)]
    pub mock_response: Option<CallToolResponse>,
}

impl ToolMockConfig {
    /// A config seeded with the default success/empty/error/slow variants
    pub fn new(tool_name: impl Into<String>) -> Self {
        let tool_name = tool_name.into();
        let variants = vec![
            MockVariant {
                id: "success".to_string(),
                name: "Success".to_string(),
                kind: MockVariantType::Success,
                response: CallToolResponse::structured(serde_json::json!({ "success": true })),
                delay: 300,
            },
            MockVariant {
                id: "empty".to_string(),
                name: "Empty Result".to_string(),
                kind: MockVariantType::Empty,
                response: CallToolResponse::structured(serde_json::json!({ "results": [] })),
                delay: 300,
            },
            MockVariant {
                id: "error".to_string(),
                name: "Error".to_string(),
                kind: MockVariantType::Error,
                response: CallToolResponse::error(format!("{tool_name} failed")),
                delay: 300,
            },
            MockVariant {
                id: "slow".to_string(),
                name: "Slow Response".to_string(),
                kind: MockVariantType::Slow,
                response: CallToolResponse::structured(serde_json::json!({ "success": true })),
                delay: 3000,
            },
        ];
        Self {
            tool_name,
            variants,
            active_variant_id: None,
            mock_response: None,
        }
    }

    /// The active variant, if one is selected and still present
    pub fn active_variant(&self) -> Option<&MockVariant> {
        let id = self.active_variant_id.as_deref()?;
        self.variants.iter().find(|variant| variant.id == id)
    }
}

fn default_true() -> bool {
    true
}

/// Mock configuration for every known tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockConfigState {
    #[serde(default = "default_true")]
    pub global_enabled: bool,
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolMockConfig>,
}

impl Default for MockConfigState {
    fn default() -> Self {
        Self {
            global_enabled: true,
            server_url: None,
            tools: BTreeMap::new(),
        }
    }
}

/// Manual override set by a tester for one tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationMode {
    #[default]
    Normal,
    Success,
    Error,
    Hang,
}

impl SimulationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationMode::Normal => "normal",
            SimulationMode::Success => "success",
            SimulationMode::Error => "error",
            SimulationMode::Hang => "hang",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSimulation {
    #[serde(default, rename = "responseMode")]
    pub mode: SimulationMode,
    #[serde(default)]
    pub response_data: Map<String, Value>,
}

impl ToolSimulation {
    pub fn new(mode: SimulationMode) -> Self {
        Self {
            mode,
            response_data: Map::new(),
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.response_data = data;
        self
    }
}
