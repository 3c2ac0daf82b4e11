//! Run a single simulated tool call end to end.

use super::{print_console, Preview};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;
use widgetbench_bridge::{ConsoleEntry, WorkbenchConfig};
use widgetbench_types::CallToolResponse;

#[derive(Serialize)]
pub struct CallReport {
    pub tool: String,
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CallToolResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub console: Vec<ConsoleEntry>,
}

pub async fn call_tool(config: &WorkbenchConfig, tool: &str, args: &str, json: bool) -> Result<()> {
    let arguments: Value = serde_json::from_str(args).context("--args is not valid JSON")?;
    if !arguments.is_object() {
        bail!("--args must be a JSON object, got {arguments}");
    }

    let preview = Preview::open(config).await?;
    let outcome = preview.guest.call_tool(tool, arguments.clone()).await;
    tracing::debug!(tool, ok = outcome.is_ok(), "tool call settled");

    let (result, error) = match outcome {
        Ok(response) => (Some(response), None),
        Err(err) => (None, Some(err.to_string())),
    };
    let report = CallReport {
        tool: tool.to_string(),
        arguments,
        result,
        error,
        console: preview.store.console().entries(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match (&report.result, &report.error) {
        (Some(response), _) => {
            let status = if response.is_error() { "error result" } else { "ok" };
            println!("callTool({tool}) → {status}");
            if let Some(variant) = &response.mock_variant {
                println!("variant: {variant}");
            }
            if let Some(content) = &response.content {
                for text in content.text_blocks() {
                    println!("text: {text}");
                }
            }
            if let Some(structured) = &response.structured_content {
                println!("structured: {}", serde_json::to_string_pretty(structured)?);
            }
        }
        (None, Some(error)) => println!("callTool({tool}) → rejected: {error}"),
        (None, None) => {}
    }
    println!();
    print_console(&report.console);
    Ok(())
}
