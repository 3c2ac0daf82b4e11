//! Workbench configuration (`widgetbench.yml`)

use crate::display_mode::TransitionEnvironment;
use crate::host::HostOptions;
use crate::simulation::SimulationTimings;
use crate::store::{WorkbenchState, WorkbenchStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use widgetbench_types::{
    DeviceType, DisplayMode, MockConfigState, SafeAreaInsets, Theme, ToolSimulation,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Main configuration struct matching the widgetbench.yml schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbenchConfig {
    #[serde(default)]
    pub globals: GlobalsConfig,

    /// Mock records in the same shape the workbench exports them
    #[serde(default)]
    pub mocks: MockConfigState,

    #[serde(default)]
    pub simulation: BTreeMap<String, ToolSimulation>,

    #[serde(default)]
    pub timings: TimingsConfig,

    #[serde(default)]
    pub reduced_motion: bool,

    /// Serve the standard JSON-RPC bridge next to the legacy one
    #[serde(default = "default_true")]
    pub standard_bridge: bool,

    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_locale() -> String {
    String::from("en-US")
}

fn default_max_height() -> f64 {
    600.0
}

fn default_tool_input() -> Value {
    Value::Object(Map::new())
}

/// Initial environment of the preview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalsConfig {
    #[serde(default)]
    pub theme: Theme,

    #[serde(default = "default_locale")]
    pub locale: String,

    #[serde(default)]
    pub display_mode: DisplayMode,

    #[serde(default = "default_max_height")]
    pub max_height: f64,

    #[serde(default)]
    pub device_type: DeviceType,

    #[serde(default)]
    pub safe_area: SafeAreaInsets,

    #[serde(default = "default_tool_input")]
    pub tool_input: Value,

    #[serde(default)]
    pub tool_output: Option<Value>,

    #[serde(default)]
    pub tool_response_metadata: Option<Value>,

    #[serde(default)]
    pub widget_state: Option<Value>,

    #[serde(default)]
    pub user_location: Option<Value>,
}

impl Default for GlobalsConfig {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            locale: default_locale(),
            display_mode: DisplayMode::default(),
            max_height: default_max_height(),
            device_type: DeviceType::default(),
            safe_area: SafeAreaInsets::default(),
            tool_input: default_tool_input(),
            tool_output: None,
            tool_response_metadata: None,
            widget_state: None,
            user_location: None,
        }
    }
}

fn default_delay_ms() -> u64 {
    300
}

fn default_hang_timeout_ms() -> u64 {
    30_000
}

fn default_transition_ms() -> u64 {
    400
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingsConfig {
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,

    #[serde(default = "default_hang_timeout_ms")]
    pub hang_timeout_ms: u64,

    #[serde(default = "default_transition_ms")]
    pub transition_ms: u64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: default_delay_ms(),
            hang_timeout_ms: default_hang_timeout_ms(),
            transition_ms: default_transition_ms(),
        }
    }
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            globals: GlobalsConfig::default(),
            mocks: MockConfigState::default(),
            simulation: BTreeMap::new(),
            timings: TimingsConfig::default(),
            reduced_motion: false,
            standard_bridge: true,
            config_path: None,
        }
    }
}

impl WorkbenchConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&contents)?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: WorkbenchConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Path the config was loaded from, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Resolve a path relative to the config file location
    pub fn resolve_relative(&self, path: &Path) -> PathBuf {
        match self.config_path.as_ref().and_then(|p| p.parent()) {
            Some(parent) if !path.is_absolute() => parent.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let max_height = self.globals.max_height;
        if !max_height.is_finite() || max_height < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "globals.max_height".to_string(),
                reason: format!("expected a non-negative number, got {max_height}"),
            });
        }
        if self.globals.locale.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "globals.locale".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn simulation_timings(&self) -> SimulationTimings {
        SimulationTimings {
            default_delay: Duration::from_millis(self.timings.default_delay_ms),
            hang_timeout: Duration::from_millis(self.timings.hang_timeout_ms),
        }
    }

    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            standard_bridge: self.standard_bridge,
            transitions: TransitionEnvironment {
                reduced_motion: self.reduced_motion,
                primitive: None,
                duration: Duration::from_millis(self.timings.transition_ms),
            },
            timings: self.simulation_timings(),
        }
    }

    /// Initial store state described by this config
    pub fn initial_state(&self) -> WorkbenchState {
        let globals = &self.globals;
        let mut mock_config = self.mocks.clone();
        for (name, tool) in mock_config.tools.iter_mut() {
            if tool.tool_name.is_empty() {
                tool.tool_name = name.clone();
            }
        }
        WorkbenchState {
            theme: globals.theme,
            locale: globals.locale.clone(),
            display_mode: globals.display_mode,
            max_height: globals.max_height,
            device_type: globals.device_type,
            safe_area_insets: globals.safe_area,
            tool_input: globals.tool_input.clone(),
            tool_output: globals.tool_output.clone(),
            tool_response_metadata: globals.tool_response_metadata.clone(),
            widget_state: globals.widget_state.clone(),
            user_location: globals.user_location.clone(),
            sim_tools: self.simulation.keys().cloned().collect(),
            simulation: self.simulation.clone(),
            mock_config,
            ..WorkbenchState::default()
        }
    }

    pub fn build_store(&self) -> WorkbenchStore {
        WorkbenchStore::with_state(self.initial_state())
    }
}
