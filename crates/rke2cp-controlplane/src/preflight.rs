//! Stability gate run before every scale operation
//!
//! The control plane is considered stable when no member is being deleted
//! and every member reports its required health conditions as true. An
//! unstable control plane is not an error: the caller is told to come back
//! after a fixed delay.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::events::EventType;
use tracing::info;

use rke2cp_common::crd::{ConditionStatus, Machine, AGENT_HEALTHY_CONDITION};
use rke2cp_common::events::{actions, reasons, EventPublisher};
use rke2cp_common::{AggregateError, Error};

use crate::config::{ScaleConfig, ScaleOutcome};
use crate::control_plane::ControlPlane;
use crate::view::ControlPlaneView;

/// Conditions every member must report as true
pub const REQUIRED_MACHINE_CONDITIONS: &[&str] = &[AGENT_HEALTHY_CONDITION];

/// Result of a preflight check
#[derive(Debug)]
pub enum PreflightResult {
    /// Safe to scale
    Passed,
    /// Members are still being deleted
    WaitingForDeletion {
        /// Names of the deleting members
        machines: Vec<String>,
        /// When to check again
        requeue_after: Duration,
    },
    /// Members fail their health checks
    Unhealthy {
        /// One entry per failed condition
        failures: AggregateError,
        /// When to check again
        requeue_after: Duration,
    },
}

impl PreflightResult {
    /// What the caller should do instead of scaling, if anything
    pub fn blocking_outcome(&self) -> Option<ScaleOutcome> {
        match self {
            Self::Passed => None,
            Self::WaitingForDeletion { requeue_after, .. }
            | Self::Unhealthy { requeue_after, .. } => {
                Some(ScaleOutcome::RequeueAfter(*requeue_after))
            }
        }
    }
}

/// Runs the preflight checks and reports failures as events
#[derive(Clone)]
pub struct PreflightGate {
    config: ScaleConfig,
    events: Arc<dyn EventPublisher>,
}

impl PreflightGate {
    /// Create a gate using the backoffs in `config`
    pub fn new(config: ScaleConfig, events: Arc<dyn EventPublisher>) -> Self {
        Self { config, events }
    }

    /// Check whether the control plane is stable enough to scale
    ///
    /// Members in `exclude` are skipped entirely, so a member about to be
    /// removed cannot block its own removal.
    pub async fn check(&self, cp: &ControlPlane, exclude: &[&Machine]) -> PreflightResult {
        let machines = cp.machines();
        if machines.is_empty() {
            return PreflightResult::Passed;
        }

        let excluded: ControlPlaneView = exclude.iter().map(|m| (*m).clone()).collect();
        let checked = machines.filter(|m| !excluded.contains(m));

        if checked.has_deleting_member() {
            let names: Vec<String> = checked
                .filter(Machine::is_deleting)
                .names()
                .into_iter()
                .map(String::from)
                .collect();
            info!(machines = %names.join(", "), "waiting for machines to be deleted");
            return PreflightResult::WaitingForDeletion {
                machines: names,
                requeue_after: self.config.delete_requeue_after,
            };
        }

        let failures: Vec<Error> = checked
            .iter()
            .flat_map(|m| {
                REQUIRED_MACHINE_CONDITIONS
                    .iter()
                    .filter_map(move |c| check_condition("machine", m, c))
            })
            .collect();

        let Some(failures) = AggregateError::from_vec(failures) else {
            return PreflightResult::Passed;
        };

        self.events
            .publish(
                &cp.object_ref(),
                EventType::Warning,
                reasons::CONTROL_PLANE_UNHEALTHY,
                actions::PREFLIGHT,
                Some(format!(
                    "Waiting for control plane to pass preflight checks to continue reconciliation: {}",
                    failures
                )),
            )
            .await;
        info!(failures = %failures, "waiting for control plane to pass preflight checks");

        PreflightResult::Unhealthy {
            failures,
            requeue_after: self.config.preflight_failed_requeue_after,
        }
    }
}

/// Error describing why `condition` on `machine` is not true, if it is not
pub fn check_condition(kind: &str, machine: &Machine, condition: &str) -> Option<Error> {
    let name = machine.name();
    let Some(c) = machine.condition(condition) else {
        return Some(Error::condition_check(
            kind,
            name,
            condition,
            format!("does not have {} condition", condition),
        ));
    };
    let message = c.message.as_deref().unwrap_or_default();
    match c.status {
        ConditionStatus::True => None,
        ConditionStatus::False => Some(Error::condition_check(
            kind,
            name,
            condition,
            format!(
                "reports {} condition is false ({}, {})",
                condition,
                c.severity.map(|s| s.to_string()).unwrap_or_default(),
                message
            ),
        )),
        ConditionStatus::Unknown => Some(Error::condition_check(
            kind,
            name,
            condition,
            format!("reports {} condition is unknown ({})", condition, message),
        )),
    }
}
