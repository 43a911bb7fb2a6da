//! Initialize, scale up and scale down a control plane
//!
//! Nothing is remembered between passes. Every call looks at a fresh
//! [`ControlPlane`] scope and decides what single step moves it closer to
//! the desired state: at most one member is created or deleted per pass.

use std::sync::Arc;

use kube::runtime::events::EventType;
use tracing::{error, info, instrument};

use rke2cp_common::events::{actions, reasons, EventPublisher};
use rke2cp_common::{Error, Result};

use crate::config::{ScaleConfig, ScaleOutcome};
use crate::control_plane::ControlPlane;
use crate::filters;
use crate::preflight::PreflightGate;
use crate::provisioner::Provisioner;
use crate::selector::select_machine_for_scale_down;
use crate::store::Store;
use crate::view::ControlPlaneView;

/// The step a reconcile pass takes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleAction {
    /// Create the first member
    Initialize,
    /// Add a member
    ScaleUp,
    /// Remove a member, preferring outdated ones when `rollout` is set
    ScaleDown {
        /// A rollout is in progress
        rollout: bool,
    },
    /// Membership matches the spec
    Stable,
}

/// Decide what a pass should do for `cp`
///
/// While members are outdated the control plane first grows by one and
/// then removes an outdated member, so it never drops below the desired
/// size during a rollout.
pub fn plan(cp: &ControlPlane) -> ScaleAction {
    let current = cp.machines().len();
    let desired = cp.desired_replicas();

    if current == 0 {
        return if desired > 0 {
            ScaleAction::Initialize
        } else {
            ScaleAction::Stable
        };
    }

    if !cp.machines_needing_rollout().is_empty() {
        return if current <= desired {
            ScaleAction::ScaleUp
        } else {
            ScaleAction::ScaleDown { rollout: true }
        };
    }

    match current.cmp(&desired) {
        std::cmp::Ordering::Less => ScaleAction::ScaleUp,
        std::cmp::Ordering::Greater => ScaleAction::ScaleDown { rollout: false },
        std::cmp::Ordering::Equal => ScaleAction::Stable,
    }
}

/// Drives membership changes through the store
#[derive(Clone)]
pub struct ScaleEngine {
    store: Arc<dyn Store>,
    events: Arc<dyn EventPublisher>,
    preflight: PreflightGate,
    provisioner: Provisioner,
}

impl ScaleEngine {
    /// Create an engine with the given backoffs
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventPublisher>, config: ScaleConfig) -> Self {
        Self {
            preflight: PreflightGate::new(config, events.clone()),
            provisioner: Provisioner::new(store.clone()),
            store,
            events,
        }
    }

    /// Take the step [`plan`] picks for `cp`
    pub async fn reconcile(&self, cp: &ControlPlane) -> Result<ScaleOutcome> {
        match plan(cp) {
            ScaleAction::Initialize => self.initialize(cp).await,
            ScaleAction::ScaleUp => self.scale_up(cp).await,
            ScaleAction::ScaleDown { rollout } => {
                let outdated = if rollout {
                    cp.machines_needing_rollout()
                } else {
                    ControlPlaneView::default()
                };
                self.scale_down(cp, &outdated).await
            }
            ScaleAction::Stable => Ok(ScaleOutcome::Done),
        }
    }

    /// Create the first member
    ///
    /// The watch cache said there are no members. That is double-checked
    /// against the API server first: creating a second initial member
    /// would bootstrap a second, separate cluster.
    #[instrument(skip(self, cp), fields(control_plane = %cp.name(), cluster = %cp.cluster_name()))]
    pub async fn initialize(&self, cp: &ControlPlane) -> Result<ScaleOutcome> {
        let namespace = cp.namespace();
        let cluster_name = cp.cluster_name();

        let owned = self
            .store
            .list_machines_uncached(&namespace, &cluster_name)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to perform an uncached read of control plane machines");
                e
            })?
            .into_iter()
            .filter(filters::owned_by(cp.rcp()))
            .count();
        if owned > 0 {
            return Err(Error::invariant(
                "initialize",
                format!(
                    "control plane has already been initialized, found {} owned machine for cluster {}/{}: controller cache or management cluster is misbehaving",
                    owned, namespace, cluster_name
                ),
            ));
        }

        let bootstrap = cp.initial_control_plane_config();
        let fd = cp.next_failure_domain_for_scale_up();
        match self
            .provisioner
            .clone_configs_and_generate_machine(cp, bootstrap, fd)
            .await
        {
            Ok(machine) => {
                self.publish(
                    cp,
                    EventType::Normal,
                    reasons::MACHINE_CREATED,
                    actions::INITIALIZE,
                    format!("Created initial control plane Machine {}", machine.name()),
                )
                .await;
                Ok(ScaleOutcome::RequeueSoon)
            }
            Err(e) => {
                error!(error = %e, "failed to create initial control plane Machine");
                self.publish(
                    cp,
                    EventType::Warning,
                    reasons::FAILED_INITIALIZATION,
                    actions::INITIALIZE,
                    format!(
                        "Failed to create initial control plane Machine for cluster {}/{} control plane: {}",
                        namespace, cluster_name, e
                    ),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Add one member once the control plane is stable
    #[instrument(skip(self, cp), fields(control_plane = %cp.name(), cluster = %cp.cluster_name()))]
    pub async fn scale_up(&self, cp: &ControlPlane) -> Result<ScaleOutcome> {
        let preflight = self.preflight.check(cp, &[]).await;
        if let Some(wait) = preflight.blocking_outcome() {
            return Ok(wait);
        }

        let bootstrap = cp.join_control_plane_config();
        let fd = cp.next_failure_domain_for_scale_up();
        info!(
            current = cp.machines().len(),
            desired = cp.desired_replicas(),
            failure_domain = fd.as_deref().unwrap_or_default(),
            "scaling up control plane"
        );
        self.publish(
            cp,
            EventType::Normal,
            reasons::SCALING_UP,
            actions::SCALE,
            format!(
                "Scaling up control plane from {} to {} replicas",
                cp.machines().len(),
                cp.desired_replicas()
            ),
        )
        .await;

        match self
            .provisioner
            .clone_configs_and_generate_machine(cp, bootstrap, fd)
            .await
        {
            Ok(machine) => {
                self.publish(
                    cp,
                    EventType::Normal,
                    reasons::MACHINE_CREATED,
                    actions::SCALE,
                    format!("Created control plane Machine {}", machine.name()),
                )
                .await;
                Ok(ScaleOutcome::RequeueSoon)
            }
            Err(e) => {
                error!(error = %e, "failed to create additional control plane Machine");
                self.publish(
                    cp,
                    EventType::Warning,
                    reasons::FAILED_SCALE_UP,
                    actions::SCALE,
                    format!(
                        "Failed to create additional control plane Machine for cluster {}/{} control plane: {}",
                        cp.namespace(),
                        cp.cluster_name(),
                        e
                    ),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Remove one member once the rest of the control plane is stable
    #[instrument(skip(self, cp, outdated), fields(control_plane = %cp.name(), cluster = %cp.cluster_name()))]
    pub async fn scale_down(
        &self,
        cp: &ControlPlane,
        outdated: &ControlPlaneView,
    ) -> Result<ScaleOutcome> {
        let candidate = select_machine_for_scale_down(cp, outdated)
            .map_err(|e| e.wrap("failed to select machine for scale down"))?;

        let exclude = [&candidate];
        let preflight = self.preflight.check(cp, &exclude).await;
        if let Some(wait) = preflight.blocking_outcome() {
            return Ok(wait);
        }

        // TODO: move etcd leadership off the candidate and remove its etcd
        // member before deleting the Machine.
        info!(
            machine = %candidate.name(),
            failure_domain = candidate.failure_domain().unwrap_or_default(),
            "scaling down control plane"
        );
        self.publish(
            cp,
            EventType::Normal,
            reasons::SCALING_DOWN,
            actions::SCALE,
            format!("Removing control plane Machine {}", candidate.name()),
        )
        .await;

        match self.store.delete(&candidate.resource_ref()).await {
            Ok(()) => {
                self.publish(
                    cp,
                    EventType::Normal,
                    reasons::MACHINE_DELETED,
                    actions::SCALE,
                    format!("Deleted control plane Machine {}", candidate.name()),
                )
                .await;
            }
            Err(e) if e.is_not_found() => {
                info!(machine = %candidate.name(), "control plane Machine already gone");
            }
            Err(e) => {
                error!(machine = %candidate.name(), error = %e, "failed to delete control plane Machine");
                self.publish(
                    cp,
                    EventType::Warning,
                    reasons::FAILED_SCALE_DOWN,
                    actions::SCALE,
                    format!(
                        "Failed to delete control plane Machine {} for cluster {}/{} control plane: {}",
                        candidate.name(),
                        cp.namespace(),
                        cp.cluster_name(),
                        e
                    ),
                )
                .await;
                return Err(e.wrap(format!(
                    "failed to delete control plane Machine {}",
                    candidate.name()
                )));
            }
        }

        Ok(ScaleOutcome::RequeueSoon)
    }

    async fn publish(
        &self,
        cp: &ControlPlane,
        type_: EventType,
        reason: &str,
        action: &str,
        note: String,
    ) {
        self.events
            .publish(&cp.object_ref(), type_, reason, action, Some(note))
            .await;
    }
}
