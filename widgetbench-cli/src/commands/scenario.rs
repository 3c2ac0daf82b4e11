//! Scripted preview sessions.
//!
//! A scenario file is a YAML list of steps run in order against one
//! preview session:
//!
//! ```yaml
//! name: search flow
//! steps:
//!   - call_tool: { tool: search, args: { query: coffee } }
//!   - call_tool: { tool: slow_tool, background: true }
//!   - cancel_hang
//!   - request_display_mode: fullscreen
//!   - upload_file: { name: notes.txt, size: 12, type: text/plain }
//!   - download_file: {}
//!   - set_theme: dark
//!   - wait: 500
//!   - reload
//! ```

use super::{print_console, Preview};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use widgetbench_bridge::{BridgeResult, ConsoleEntry, FileUpload, WidgetGuest, WorkbenchConfig};
use widgetbench_types::{CallToolResponse, DisplayMode, GlobalsSnapshot, Theme};

/// How long `cancel_hang` waits for a hanging call to show up
const CANCEL_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    CallTool {
        tool: String,
        #[serde(default)]
        args: Map<String, Value>,
        /// Start the call and move on without waiting for it
        #[serde(default)]
        background: bool,
    },
    SetWidgetState(Value),
    RequestDisplayMode(DisplayMode),
    UploadFile(FileUpload),
    /// Defaults to the most recently uploaded file
    DownloadFile {
        #[serde(default)]
        file_id: Option<String>,
    },
    SetTheme(Theme),
    CancelHang,
    /// Milliseconds
    Wait(u64),
    Reload,
}

impl Step {
    fn label(&self) -> String {
        match self {
            Step::CallTool { tool, background, .. } if *background => format!("callTool({tool}) [background]"),
            Step::CallTool { tool, .. } => format!("callTool({tool})"),
            Step::SetWidgetState(_) => "setWidgetState".to_string(),
            Step::RequestDisplayMode(mode) => format!("requestDisplayMode({mode})"),
            Step::UploadFile(file) => format!("uploadFile({})", file.name),
            Step::DownloadFile { .. } => "getFileDownloadUrl".to_string(),
            Step::SetTheme(theme) => format!("setTheme({})", theme.as_str()),
            Step::CancelHang => "cancelHang".to_string(),
            Step::Wait(ms) => format!("wait({ms}ms)"),
            Step::Reload => "reload".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepReport {
    fn new(index: usize, step: String, outcome: Result<Value>) -> Self {
        match outcome {
            Ok(result) => Self {
                index,
                step,
                result: Some(result),
                error: None,
            },
            Err(err) => Self {
                index,
                step,
                result: None,
                error: Some(format!("{err:#}")),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub steps: Vec<StepReport>,
    pub background: Vec<StepReport>,
    pub globals: GlobalsSnapshot,
    pub console: Vec<ConsoleEntry>,
}

struct BackgroundCall {
    index: usize,
    label: String,
    handle: JoinHandle<BridgeResult<CallToolResponse>>,
}

struct Runner {
    preview: Preview,
    last_file: Option<String>,
    background: Vec<BackgroundCall>,
}

impl Runner {
    async fn run(&mut self, index: usize, step: &Step) -> Result<Value> {
        let guest = Arc::clone(&self.preview.guest);
        match step {
            Step::CallTool { tool, args, background } => {
                let args = Value::Object(args.clone());
                if *background {
                    let tool = tool.clone();
                    let handle = tokio::spawn(async move { guest.call_tool(&tool, args).await });
                    self.background.push(BackgroundCall {
                        index,
                        label: step.label(),
                        handle,
                    });
                    return Ok(json!({ "started": true }));
                }
                let response = guest.call_tool(tool, args).await?;
                Ok(serde_json::to_value(response)?)
            }
            Step::SetWidgetState(state) => {
                guest.set_widget_state(state.clone()).await?;
                Ok(Value::Null)
            }
            Step::RequestDisplayMode(mode) => {
                let granted = guest.request_display_mode(*mode).await?;
                Ok(json!({ "mode": granted }))
            }
            Step::UploadFile(file) => {
                let file_id = guest.upload_file(file.clone()).await?;
                self.last_file = Some(file_id.clone());
                Ok(json!({ "fileId": file_id }))
            }
            Step::DownloadFile { file_id } => {
                let file_id = file_id
                    .clone()
                    .or_else(|| self.last_file.clone())
                    .ok_or_else(|| anyhow!("no file has been uploaded yet"))?;
                let url = guest.get_file_download_url(&file_id).await?;
                Ok(json!({ "downloadUrl": url }))
            }
            Step::SetTheme(theme) => {
                self.preview.store.set_theme(*theme);
                Ok(json!({ "theme": theme }))
            }
            Step::CancelHang => {
                let cancelled = self.cancel_hang().await;
                Ok(json!({ "cancelled": cancelled }))
            }
            Step::Wait(ms) => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(Value::Null)
            }
            Step::Reload => {
                let orphaned = self.preview.reload().await?;
                Ok(json!({
                    "frame": self.preview.guest.frame_id().as_u64(),
                    "pendingOnOldFrame": orphaned,
                }))
            }
        }
    }

    async fn cancel_hang(&self) -> bool {
        let store = &self.preview.store;
        let deadline = tokio::time::Instant::now() + CANCEL_WAIT;
        while !store.active_tool_call().is_some_and(|call| call.is_hanging) {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("no hanging tool call to cancel");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        store.cancel_active_tool_call()
    }

    async fn settle_background(&mut self) -> Vec<StepReport> {
        let mut reports = Vec::with_capacity(self.background.len());
        for call in self.background.drain(..) {
            let outcome = match call.handle.await {
                Ok(Ok(response)) => serde_json::to_value(response).map_err(Into::into),
                Ok(Err(err)) => Err(err.into()),
                Err(join) => Err(anyhow!("background call panicked: {join}")),
            };
            reports.push(StepReport::new(call.index, call.label, outcome));
        }
        reports
    }
}

pub async fn run_scenario(config: &WorkbenchConfig, file: &Path, json: bool) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read scenario {}", file.display()))?;
    let scenario: Scenario = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse scenario {}", file.display()))?;

    let mut runner = Runner {
        preview: Preview::open(config).await?,
        last_file: None,
        background: Vec::new(),
    };

    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (offset, step) in scenario.steps.iter().enumerate() {
        let index = offset + 1;
        let outcome = runner.run(index, step).await;
        tracing::debug!(index, step = %step.label(), ok = outcome.is_ok(), "scenario step finished");
        steps.push(StepReport::new(index, step.label(), outcome));
    }
    let background = runner.settle_background().await;

    let store = &runner.preview.store;
    let report = ScenarioReport {
        name: scenario.name,
        steps,
        background,
        globals: store.globals(),
        console: store.console().entries(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if let Some(name) = &report.name {
        println!("Scenario: {name}");
    }
    for step in &report.steps {
        print_step(step);
    }
    if !report.background.is_empty() {
        println!("\nBackground calls:");
        for step in &report.background {
            print_step(step);
        }
    }
    println!(
        "\nFinal: theme {}, display mode {}",
        report.globals.theme.as_str(),
        report.globals.display_mode
    );
    println!();
    print_console(&report.console);
    Ok(())
}

fn print_step(step: &StepReport) {
    match (&step.result, &step.error) {
        (_, Some(error)) => println!("{:>3}. {} → error: {}", step.index, step.step, error),
        (Some(Value::Null), None) | (None, None) => println!("{:>3}. {} → ok", step.index, step.step),
        (Some(result), None) => println!("{:>3}. {} → {}", step.index, step.step, result),
    }
}
