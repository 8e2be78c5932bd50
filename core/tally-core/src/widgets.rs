//! Passive-surface refresh.
//!
//! Widgets and complications render straight from the shared region; they
//! only need to be told that it changed. The platform scheduler decides when
//! timelines are actually recomputed.

use std::sync::Arc;

use tracing::debug;

/// OS-level scheduler for widget/complication timelines.
pub trait TimelineScheduler: Send + Sync {
    /// Fire-and-forget. Failures are platform-managed and not observable.
    fn reload_all_timelines(&self);
}

/// Scheduler for hosts with no passive surfaces (CLI, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

impl TimelineScheduler for NoopScheduler {
    fn reload_all_timelines(&self) {}
}

/// Called after every mutation a passive surface renders.
#[derive(Clone)]
pub struct WidgetRefreshTrigger {
    scheduler: Arc<dyn TimelineScheduler>,
}

impl WidgetRefreshTrigger {
    pub fn new(scheduler: Arc<dyn TimelineScheduler>) -> Self {
        Self { scheduler }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopScheduler))
    }

    pub fn notify_changed(&self, reason: &'static str) {
        debug!(reason, "Reloading widget timelines");
        self.scheduler.reload_all_timelines();
    }
}

impl std::fmt::Debug for WidgetRefreshTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetRefreshTrigger").finish_non_exhaustive()
    }
}
