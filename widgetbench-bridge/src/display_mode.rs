//! Display mode transitions
//!
//! A guest asks for `inline`, `pip` or `fullscreen`; the host grants it.
//! At most one animated transition runs at a time and the transitioning flag
//! always clears after the configured duration.

use crate::store::WorkbenchStore;
use std::sync::Arc;
use std::time::Duration;
use widgetbench_types::DisplayMode;

/// Default length of an animated transition
pub const DEFAULT_TRANSITION: Duration = Duration::from_millis(400);

/// Animation primitive of the host surface
pub trait ViewTransition: Send + Sync {
    /// Start animating between two modes
    fn begin(&self, from: DisplayMode, to: DisplayMode) -> Result<(), String>;
}

/// What the host surface can do when switching modes
#[derive(Clone)]
pub struct TransitionEnvironment {
    pub reduced_motion: bool,
    pub primitive: Option<Arc<dyn ViewTransition>>,
    pub duration: Duration,
}

impl Default for TransitionEnvironment {
    fn default() -> Self {
        Self {
            reduced_motion: false,
            primitive: None,
            duration: DEFAULT_TRANSITION,
        }
    }
}

impl std::fmt::Debug for TransitionEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionEnvironment")
            .field("reduced_motion", &self.reduced_motion)
            .field("primitive", &self.primitive.is_some())
            .field("duration", &self.duration)
            .finish()
    }
}

impl TransitionEnvironment {
    fn animates(&self) -> bool {
        !self.reduced_motion && self.primitive.is_some()
    }
}

/// Grants display mode requests against one store
#[derive(Debug, Clone)]
pub struct DisplayModeController {
    store: Arc<WorkbenchStore>,
    env: TransitionEnvironment,
}

impl DisplayModeController {
    pub fn new(store: Arc<WorkbenchStore>, env: TransitionEnvironment) -> Self {
        Self { store, env }
    }

    pub fn environment(&self) -> &TransitionEnvironment {
        &self.env
    }

    /// Handle a mode request and return the mode in effect afterwards.
    ///
    /// Must be called from within a tokio runtime when transitions animate.
    pub fn request(&self, requested: DisplayMode) -> DisplayMode {
        let primitive = match (&self.env.primitive, self.env.animates()) {
            (Some(primitive), true) => Some(Arc::clone(primitive)),
            _ => None,
        };

        let (granted, previous) = self.store.switch_display_mode(requested, primitive.is_some());
        let Some(previous) = previous else {
            if granted != requested {
                tracing::debug!(current = %granted, %requested, "transition in flight, request not started");
            }
            return granted;
        };
        let Some(primitive) = primitive else {
            return granted;
        };

        // Mode and flag are already set while the animation starts.
        if let Err(err) = primitive.begin(previous, requested) {
            tracing::warn!(from = %previous, %requested, error = %err, "view transition failed to start");
        }

        let store = Arc::clone(&self.store);
        let duration = self.env.duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            store.set_transitioning(false);
        });

        granted
    }
}
