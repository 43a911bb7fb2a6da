//! RKE2ControlPlane reconciliation
//!
//! Each pass resolves the owning Cluster, snapshots the owned Machines,
//! publishes status and hands the snapshot to the [`ScaleEngine`].

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use rke2cp_common::crd::{
    set_condition, Condition, ConditionSeverity, RKE2ControlPlane, RKE2ControlPlaneStatus,
    AGENT_HEALTHY_CONDITION, AVAILABLE_CONDITION, RESIZED_CONDITION,
};
use rke2cp_common::events::{actions, reasons, EventPublisher};
use rke2cp_common::kube_utils::owner_name;
use rke2cp_common::Error;

use crate::config::ScaleConfig;
use crate::control_plane::ControlPlane;
use crate::scale::ScaleEngine;
use crate::store::Store;

/// Controller context shared by all reconcile passes
pub struct Context {
    /// Object store (trait object for testability)
    pub store: Arc<dyn Store>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Backoff settings
    pub config: ScaleConfig,
    engine: ScaleEngine,
}

impl Context {
    /// Create a context
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventPublisher>, config: ScaleConfig) -> Self {
        let engine = ScaleEngine::new(store.clone(), events.clone(), config.clone());
        Self {
            store,
            events,
            config,
            engine,
        }
    }
}

/// Reconcile one RKE2ControlPlane
#[instrument(skip(rcp, ctx), fields(control_plane = %rcp.name_any(), namespace = %rcp.namespace().unwrap_or_default()))]
pub async fn reconcile(rcp: Arc<RKE2ControlPlane>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = rcp.name_any();
    debug!("reconciling control plane");

    // Machines and children carry owner references and are collected by
    // the garbage collector.
    if rcp.metadata.deletion_timestamp.is_some() {
        info!("control plane is being deleted");
        return Ok(Action::await_change());
    }

    if let Err(e) = rcp.spec.validate(&name) {
        warn!(error = %e, "control plane validation failed");
        ctx.events
            .publish(
                &rcp.object_ref(&()),
                EventType::Warning,
                reasons::VALIDATION_FAILED,
                actions::RECONCILE,
                Some(e.to_string()),
            )
            .await;
        return Ok(Action::await_change());
    }

    let namespace = rcp.namespace().unwrap_or_default();
    let Some(cluster_name) = owner_name(&rcp.metadata, "Cluster") else {
        info!("waiting for the Cluster controller to set an owner reference");
        return Ok(Action::await_change());
    };

    let Some(cluster) = ctx.store.get_cluster(&namespace, cluster_name).await? else {
        info!(cluster = %cluster_name, "owner Cluster not found");
        return Ok(Action::await_change());
    };

    if cluster.spec.paused {
        info!(cluster = %cluster_name, "reconciliation is paused for this cluster");
        return Ok(Action::await_change());
    }

    let machines = ctx.store.list_machines(&namespace, cluster_name).await?;
    let cp = ControlPlane::new(rcp.clone(), cluster, machines);

    let status = compute_status(&cp);
    if rcp.status.as_ref() != Some(&status) {
        ctx.store.patch_status(&rcp, &status).await?;
    }

    let outcome = ctx.engine.reconcile(&cp).await?;
    debug!(?outcome, "scale step finished");
    Ok(outcome.into_action(&ctx.config))
}

/// Decide how to retry after a failed pass
///
/// Errors that need a change to the cluster state before they can succeed
/// (invariant violations, validation, serialization) wait for that change
/// instead of retrying on a timer. API server failures, throttling and
/// conflicts included, come back after `error_requeue_after`.
pub fn error_policy(rcp: Arc<RKE2ControlPlane>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        control_plane = %rcp.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    if error.is_retryable() {
        Action::requeue(ctx.config.error_requeue_after)
    } else {
        Action::await_change()
    }
}

/// Status derived from the current members
///
/// Conditions already on the object are kept; `Available` and `Resized`
/// are updated in place.
pub fn compute_status(cp: &ControlPlane) -> RKE2ControlPlaneStatus {
    let rcp = cp.rcp();
    let previous = rcp.status.clone().unwrap_or_default();

    let replicas = count(cp.machines().len());
    let updated_replicas = count(cp.up_to_date_machines().len());
    let ready_replicas = count(
        cp.machines()
            .iter()
            .filter(|m| m.condition(AGENT_HEALTHY_CONDITION).is_some_and(Condition::is_true))
            .count(),
    );
    let desired = count(cp.desired_replicas());
    let ready = ready_replicas > 0;

    let mut conditions = previous.conditions;
    set_condition(
        &mut conditions,
        if ready {
            Condition::true_(AVAILABLE_CONDITION)
        } else {
            Condition::false_(
                AVAILABLE_CONDITION,
                "WaitingForAvailableMachines",
                ConditionSeverity::Info,
                "no control plane Machine reports a healthy agent",
            )
        },
    );
    set_condition(
        &mut conditions,
        match replicas.cmp(&desired) {
            std::cmp::Ordering::Equal => Condition::true_(RESIZED_CONDITION),
            std::cmp::Ordering::Less => Condition::false_(
                RESIZED_CONDITION,
                "ScalingUp",
                ConditionSeverity::Warning,
                format!("Scaling up control plane to {} replicas (actual {})", desired, replicas),
            ),
            std::cmp::Ordering::Greater => Condition::false_(
                RESIZED_CONDITION,
                "ScalingDown",
                ConditionSeverity::Warning,
                format!("Scaling down control plane to {} replicas (actual {})", desired, replicas),
            ),
        },
    );

    RKE2ControlPlaneStatus {
        observed_generation: rcp.metadata.generation,
        replicas,
        updated_replicas,
        ready_replicas,
        unavailable_replicas: replicas - ready_replicas,
        initialized: previous.initialized || ready,
        ready,
        conditions,
    }
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
