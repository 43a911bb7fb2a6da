//! Timing configuration for scale decisions

use std::time::Duration;

use kube::runtime::controller::Action;

/// Default wait while a control plane Machine is being deleted
pub const DEFAULT_DELETE_REQUEUE_AFTER: Duration = Duration::from_secs(30);

/// Default wait after preflight checks fail
pub const DEFAULT_PREFLIGHT_FAILED_REQUEUE_AFTER: Duration = Duration::from_secs(15);

/// Default delay for "requeue as soon as possible"
pub const DEFAULT_REQUEUE_SOON: Duration = Duration::from_secs(1);

/// Default delay after a retryable reconcile error
pub const DEFAULT_ERROR_REQUEUE_AFTER: Duration = Duration::from_secs(5);

/// Backoff settings passed to the preflight gate and scale engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScaleConfig {
    /// Wait while any member is being deleted
    pub delete_requeue_after: Duration,
    /// Wait after members fail their health checks
    pub preflight_failed_requeue_after: Duration,
    /// Delay used when another pass should follow right away
    pub requeue_soon: Duration,
    /// Delay after a retryable reconcile error
    pub error_requeue_after: Duration,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            delete_requeue_after: DEFAULT_DELETE_REQUEUE_AFTER,
            preflight_failed_requeue_after: DEFAULT_PREFLIGHT_FAILED_REQUEUE_AFTER,
            requeue_soon: DEFAULT_REQUEUE_SOON,
            error_requeue_after: DEFAULT_ERROR_REQUEUE_AFTER,
        }
    }
}

/// What the caller should do after a scale step
///
/// This is a declarative instruction, never an in-process sleep: a fresh
/// trigger for the same control plane supersedes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleOutcome {
    /// Nothing left to do until something changes
    Done,
    /// Another pass should run as soon as possible
    RequeueSoon,
    /// Try again after the given delay
    RequeueAfter(Duration),
}

impl ScaleOutcome {
    /// Translate into a controller action
    pub fn into_action(self, config: &ScaleConfig) -> Action {
        match self {
            Self::Done => Action::await_change(),
            Self::RequeueSoon => Action::requeue(config.requeue_soon),
            Self::RequeueAfter(after) => Action::requeue(after),
        }
    }
}
