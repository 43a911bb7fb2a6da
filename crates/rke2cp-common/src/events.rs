//! Kubernetes Events about scaling decisions
//!
//! Initialization, scale up, scale down and preflight failures are reported
//! on the RKE2ControlPlane so they show up in `kubectl describe rcp`.
//! Publishing never fails a reconcile pass: a rejected Event is logged and
//! dropped.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Sink for Events about a control plane
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Record an Event on `resource_ref`
    ///
    /// `reason` is one of [`reasons`], `action` one of [`actions`], `note`
    /// the human-readable message.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publishes through the API server with a `kube` [`Recorder`]
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Report Events as `controller_name`
    ///
    /// The pod name from `POD_NAME` (downward API) is used as the reporting
    /// instance when set.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                object = resource_ref.name.as_deref().unwrap_or_default(),
                reason,
                error = %e,
                "dropping control plane event"
            );
        }
    }
}

/// Discards every Event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons (the REASON column of `kubectl get events`)
pub mod reasons {
    /// The first control plane Machine could not be created
    pub const FAILED_INITIALIZATION: &str = "FailedInitialization";
    /// An additional control plane Machine could not be created
    pub const FAILED_SCALE_UP: &str = "FailedScaleUp";
    /// A control plane Machine could not be deleted
    pub const FAILED_SCALE_DOWN: &str = "FailedScaleDown";
    /// Preflight checks blocked a scale operation
    pub const CONTROL_PLANE_UNHEALTHY: &str = "ControlPlaneUnhealthy";
    /// A control plane Machine was created
    pub const MACHINE_CREATED: &str = "MachineCreated";
    /// A control plane Machine was deleted
    pub const MACHINE_DELETED: &str = "MachineDeleted";
    /// A control plane Machine is being added
    pub const SCALING_UP: &str = "ScalingUp";
    /// A control plane Machine is being removed
    pub const SCALING_DOWN: &str = "ScalingDown";
    /// Spec validation failed
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
}

/// Event actions (the ACTION column of `kubectl get events`)
pub mod actions {
    /// A reconcile pass outside any scale step
    pub const RECONCILE: &str = "Reconcile";
    /// Creating the first control plane member
    pub const INITIALIZE: &str = "Initialize";
    /// Adding or removing control plane members
    pub const SCALE: &str = "Scale";
    /// Checking control plane stability
    pub const PREFLIGHT: &str = "Preflight";
}
