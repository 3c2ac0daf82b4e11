//! CLI command implementations.

pub mod call;
pub mod globals;
pub mod scenario;

pub use call::call_tool;
pub use globals::show_globals;
pub use scenario::run_scenario;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use widgetbench_bridge::{frame_pair, ConsoleEntry, WidgetGuest, WidgetHost, WorkbenchConfig, WorkbenchStore};

const DEFAULT_CONFIG: &str = "widgetbench.yml";

/// How long a freshly mounted widget may take to receive its globals
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Load the config file, or the built-in defaults when no file was named
/// and `widgetbench.yml` does not exist.
pub fn load_config(path: Option<&Path>) -> Result<WorkbenchConfig> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG).exists() => Path::new(DEFAULT_CONFIG),
        None => {
            tracing::debug!("no {DEFAULT_CONFIG} found, using defaults");
            return Ok(WorkbenchConfig::default());
        }
    };
    WorkbenchConfig::from_file(path).with_context(|| format!("failed to load config {}", path.display()))
}

/// An in-process preview: one store, one host and the widget in its frame
pub struct Preview {
    pub store: Arc<WorkbenchStore>,
    pub host: WidgetHost,
    pub guest: Arc<WidgetGuest>,
}

impl Preview {
    pub async fn open(config: &WorkbenchConfig) -> Result<Self> {
        let store = Arc::new(config.build_store());
        let host = WidgetHost::new(Arc::clone(&store), config.host_options());
        let guest = mount_guest(&host).await?;
        Ok(Self { store, host, guest })
    }

    /// Replace the frame with a fresh one, as a page reload would
    pub async fn reload(&mut self) -> Result<usize> {
        let previous = self.guest.pending_calls();
        self.guest = mount_guest(&self.host).await?;
        Ok(previous)
    }
}

async fn mount_guest(host: &WidgetHost) -> Result<Arc<WidgetGuest>> {
    let (host_frame, guest_frame) = frame_pair();
    let guest = Arc::new(WidgetGuest::connect(guest_frame));
    host.mount(host_frame);
    tokio::time::timeout(READY_TIMEOUT, guest.ready())
        .await
        .context("widget never received its globals")?;
    Ok(guest)
}

pub fn print_console(entries: &[ConsoleEntry]) {
    println!("Console:");
    for entry in entries {
        println!("  {} {}", entry.timestamp.format("%H:%M:%S%.3f"), entry.method);
    }
}
