//! Dump the globals snapshot a config produces.

use anyhow::Result;
use widgetbench_bridge::WorkbenchConfig;

pub fn show_globals(config: &WorkbenchConfig, json: bool) -> Result<()> {
    let store = config.build_store();
    let globals = store.globals();

    if json {
        println!("{}", serde_json::to_string_pretty(&globals)?);
        return Ok(());
    }

    println!("theme:         {}", globals.theme.as_str());
    println!("locale:        {}", globals.locale);
    println!("display mode:  {}", globals.display_mode);
    println!("max height:    {}", globals.max_height);
    println!("device:        {}", globals.user_agent.device.device_type.as_str());
    let insets = &globals.safe_area.insets;
    println!(
        "safe area:     top {} bottom {} left {} right {}",
        insets.top, insets.bottom, insets.left, insets.right
    );
    println!("tool input:    {}", globals.tool_input);
    if let Some(output) = &globals.tool_output {
        println!("tool output:   {output}");
    }
    if let Some(state) = &globals.widget_state {
        println!("widget state:  {state}");
    }

    let mocks = store.mock_config();
    if !mocks.tools.is_empty() {
        println!("\nMocked tools ({}):", if mocks.global_enabled { "enabled" } else { "disabled" });
        for (name, tool) in &mocks.tools {
            println!(
                "- {} [{}]",
                name,
                tool.active_variant().map(|v| v.name.as_str()).unwrap_or("default")
            );
        }
    }
    let simulated = store.sim_tools();
    if !simulated.is_empty() {
        println!("\nSimulated tools:");
        for name in simulated {
            let mode = store
                .simulation_for(&name)
                .map(|sim| sim.mode.as_str())
                .unwrap_or("normal");
            println!("- {name} [{mode}]");
        }
    }
    Ok(())
}
