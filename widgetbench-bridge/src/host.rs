//! Widget host lifecycle
//!
//! `WidgetHost` owns the bridge (and the standard adapter) for whichever
//! frame is currently mounted. State changes never recreate the bridge; a
//! store-watch task pushes them through the live one. Only mounting a frame
//! with a new identity tears the old session down.

use crate::bridge::MessageBridge;
use crate::display_mode::{DisplayModeController, TransitionEnvironment};
use crate::frame::{FrameId, HostFrame};
use crate::handlers::{MethodHandlers, WorkbenchHandlers};
use crate::simulation::{SimulationTimings, ToolCallSimulator};
use crate::standard::StandardHostBridge;
use crate::store::WorkbenchStore;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// How a host serves its frames
#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Serve the standard JSON-RPC bridge next to the legacy one
    pub standard_bridge: bool,
    pub transitions: TransitionEnvironment,
    pub timings: SimulationTimings,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            standard_bridge: true,
            transitions: TransitionEnvironment::default(),
            timings: SimulationTimings::default(),
        }
    }
}

struct Session {
    frame: FrameId,
    bridge: Arc<MessageBridge>,
    standard: Option<Arc<StandardHostBridge>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn teardown(self) -> usize {
        for task in &self.tasks {
            task.abort();
        }
        if let Some(standard) = &self.standard {
            standard.close();
        }
        let rejected = self.bridge.detach();
        tracing::info!(frame = %self.frame, bridge = %self.bridge.id(), rejected, "preview session closed");
        rejected
    }
}

/// Hosts one previewed widget at a time
pub struct WidgetHost {
    store: Arc<WorkbenchStore>,
    handlers: RwLock<Arc<dyn MethodHandlers>>,
    options: HostOptions,
    session: Mutex<Option<Session>>,
}

impl WidgetHost {
    /// Host backed by the stock handlers over `store`
    pub fn new(store: Arc<WorkbenchStore>, options: HostOptions) -> Self {
        let handlers = WorkbenchHandlers::new(
            Arc::clone(&store),
            ToolCallSimulator::new(Arc::clone(&store), options.timings),
            DisplayModeController::new(Arc::clone(&store), options.transitions.clone()),
        );
        Self::with_handlers(store, options, Arc::new(handlers))
    }

    pub fn with_handlers(store: Arc<WorkbenchStore>, options: HostOptions, handlers: Arc<dyn MethodHandlers>) -> Self {
        Self {
            store,
            handlers: RwLock::new(handlers),
            options,
            session: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<WorkbenchStore> {
        &self.store
    }

    /// Bridge of the mounted frame
    pub fn bridge(&self) -> Option<Arc<MessageBridge>> {
        self.session.lock().as_ref().map(|s| Arc::clone(&s.bridge))
    }

    pub fn standard(&self) -> Option<Arc<StandardHostBridge>> {
        self.session.lock().as_ref().and_then(|s| s.standard.clone())
    }

    /// Mount a frame and return its bridge. Mounting the frame that is
    /// already mounted returns the existing bridge unchanged.
    pub fn mount(&self, frame: HostFrame) -> Arc<MessageBridge> {
        let mut session = self.session.lock();
        if let Some(current) = session.as_ref() {
            if current.frame == frame.id() {
                return Arc::clone(&current.bridge);
            }
        }
        if let Some(previous) = session.take() {
            previous.teardown();
        }

        let handlers = Arc::clone(&*self.handlers.read());
        let bridge = Arc::new(MessageBridge::new(Arc::clone(&handlers)));
        let standard = self.options.standard_bridge.then(|| {
            Arc::new(StandardHostBridge::connect(
                frame.clone(),
                Arc::clone(&self.store),
                handlers,
            ))
        });

        let mut tasks = Vec::with_capacity(2);
        if frame.is_loaded() {
            handshake(&bridge, frame.clone(), &self.store);
        } else {
            let bridge = Arc::clone(&bridge);
            let store = Arc::clone(&self.store);
            let frame = frame.clone();
            tasks.push(tokio::spawn(async move {
                let mut loads = frame.load_events();
                if loads.wait_for(|loaded| *loaded).await.is_ok() {
                    handshake(&bridge, frame, &store);
                }
            }));
        }
        tasks.push(tokio::spawn(sync_globals(
            Arc::clone(&bridge),
            standard.clone(),
            Arc::clone(&self.store),
        )));

        tracing::info!(frame = %frame.id(), bridge = %bridge.id(), "preview session opened");
        *session = Some(Session {
            frame: frame.id(),
            bridge: Arc::clone(&bridge),
            standard,
            tasks,
        });
        bridge
    }

    /// Swap the handler set without touching the bridge
    pub fn set_handlers(&self, handlers: Arc<dyn MethodHandlers>) {
        *self.handlers.write() = Arc::clone(&handlers);
        if let Some(session) = self.session.lock().as_ref() {
            session.bridge.set_handlers(Arc::clone(&handlers));
            if let Some(standard) = &session.standard {
                standard.set_handlers(handlers);
            }
        }
    }

    /// Push the current globals now instead of waiting for the next change
    pub fn refresh(&self) {
        let Some((bridge, standard)) = self
            .session
            .lock()
            .as_ref()
            .map(|s| (Arc::clone(&s.bridge), s.standard.clone()))
        else {
            return;
        };
        push(&bridge, standard.as_deref(), &self.store);
    }

    /// Tear down the mounted session. Returns how many calls were rejected.
    pub fn unmount(&self) -> usize {
        self.session.lock().take().map(Session::teardown).unwrap_or(0)
    }
}

impl Drop for WidgetHost {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn handshake(bridge: &MessageBridge, frame: HostFrame, store: &WorkbenchStore) {
    let frame_id = frame.id();
    if let Err(err) = bridge.attach(frame) {
        tracing::warn!(frame = %frame_id, bridge = %bridge.id(), error = %err, "attach failed");
        return;
    }
    if let Err(err) = bridge.send_globals(&store.globals()) {
        tracing::warn!(frame = %frame_id, error = %err, "initial globals push failed");
    }
}

fn push(bridge: &MessageBridge, standard: Option<&StandardHostBridge>, store: &WorkbenchStore) {
    let globals = store.globals();
    if let Err(err) = bridge.send_globals(&globals) {
        tracing::debug!(bridge = %bridge.id(), error = %err, "globals push failed");
    }
    if let Some(standard) = standard {
        standard.sync(&globals);
    }
}

async fn sync_globals(
    bridge: Arc<MessageBridge>,
    standard: Option<Arc<StandardHostBridge>>,
    store: Arc<WorkbenchStore>,
) {
    let mut revisions = store.subscribe();
    while revisions.changed().await.is_ok() {
        push(&bridge, standard.as_deref(), &store);
    }
}
