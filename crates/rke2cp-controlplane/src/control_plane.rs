//! Per-pass scope: one RKE2ControlPlane, its Cluster, and the Machines it owns

use std::sync::Arc;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{Resource, ResourceExt};
use rke2cp_common::crd::{AgentConfig, Cluster, Machine, RKE2ControlPlane};
use rke2cp_common::{Error, Result};

use crate::filters;
use crate::view::ControlPlaneView;

/// Everything a scale decision needs, captured once per reconcile pass
#[derive(Clone, Debug)]
pub struct ControlPlane {
    rcp: Arc<RKE2ControlPlane>,
    cluster: Cluster,
    machines: ControlPlaneView,
}

impl ControlPlane {
    /// Build the scope, keeping only Machines controlled by `rcp`
    pub fn new(
        rcp: Arc<RKE2ControlPlane>,
        cluster: Cluster,
        machines: impl IntoIterator<Item = Machine>,
    ) -> Self {
        let machines = ControlPlaneView::new(machines).filter(filters::owned_by(&rcp));
        Self {
            rcp,
            cluster,
            machines,
        }
    }

    /// The control plane object
    pub fn rcp(&self) -> &RKE2ControlPlane {
        &self.rcp
    }

    /// Owned Machines
    pub fn machines(&self) -> &ControlPlaneView {
        &self.machines
    }

    /// Name of the control plane object
    pub fn name(&self) -> String {
        self.rcp.name_any()
    }

    /// Namespace of the control plane object
    pub fn namespace(&self) -> String {
        self.rcp.namespace().unwrap_or_default()
    }

    /// Name of the owning Cluster
    pub fn cluster_name(&self) -> String {
        self.cluster.name_any()
    }

    /// Replica count the control plane should converge to
    pub fn desired_replicas(&self) -> usize {
        usize::try_from(self.rcp.spec.desired_replicas()).unwrap_or(0)
    }

    /// Failure domains eligible for control plane Machines, sorted by id
    pub fn failure_domains(&self) -> Vec<String> {
        self.cluster.control_plane_failure_domains()
    }

    /// Domain for the next new Machine
    ///
    /// Picks the eligible domain with the fewest up-to-date Machines, ties
    /// broken by id. `None` when the Cluster reports no eligible domains.
    pub fn next_failure_domain_for_scale_up(&self) -> Option<String> {
        self.up_to_date_machines()
            .failure_domain_with_fewest_members(&self.failure_domains())
    }

    /// Domain to remove a Machine from, among `machines`
    ///
    /// Machines outside every eligible domain go first: the domain of the
    /// oldest such Machine is returned (`None` if it has no domain).
    /// Otherwise the eligible domain holding the most of `machines`.
    pub fn failure_domain_with_most_machines(&self, machines: &ControlPlaneView) -> Option<String> {
        let domains = self.failure_domains();
        let outside = machines.filter(|m| !filters::in_failure_domains(&domains)(m));
        if let Some(oldest) = outside.oldest() {
            return oldest.spec.failure_domain.clone();
        }
        machines.failure_domain_with_most_members(&domains)
    }

    /// Oldest Machine in the domain picked by [`Self::failure_domain_with_most_machines`]
    pub fn machine_in_failure_domain_with_most_machines(
        &self,
        machines: &ControlPlaneView,
    ) -> Result<Machine> {
        let fd = self.failure_domain_with_most_machines(machines);
        machines
            .members_in_failure_domain(fd.as_deref())
            .oldest()
            .cloned()
            .ok_or_else(|| {
                Error::invariant(
                    "scale-down",
                    "failed to pick control plane Machine to mark",
                )
            })
    }

    /// Machines of `machines` marked for preferential removal
    pub fn machines_with_delete_annotation(&self, machines: &ControlPlaneView) -> ControlPlaneView {
        machines.filter(filters::has_delete_annotation)
    }

    /// Machines whose version or server configuration no longer matches the spec
    ///
    /// Machines already being deleted are left out.
    pub fn machines_needing_rollout(&self) -> ControlPlaneView {
        let up_to_date = filters::up_to_date(&self.rcp);
        self.machines
            .filter(|m| !filters::has_deletion_timestamp(m) && !up_to_date(m))
    }

    /// Machines matching the current spec
    pub fn up_to_date_machines(&self) -> ControlPlaneView {
        self.machines.filter(filters::up_to_date(&self.rcp))
    }

    /// Agent payload for the first member
    pub fn initial_control_plane_config(&self) -> AgentConfig {
        self.rcp.spec.agent_config.clone()
    }

    /// Agent payload for members joining an initialized control plane
    ///
    /// The bootstrap provider derives the join address from the Cluster,
    /// so the payload itself is the same as for the first member.
    pub fn join_control_plane_config(&self) -> AgentConfig {
        self.rcp.spec.agent_config.clone()
    }

    /// JSON snapshot of the server configuration stored on new Machines
    pub fn server_config_annotation(&self) -> Result<String> {
        serde_json::to_string(&self.rcp.spec.server_config).map_err(|e| {
            Error::serialization_for_kind(
                "RKE2ControlPlane",
                format!("failed to marshal server configuration: {}", e),
            )
        })
    }

    /// Reference used when publishing events about the control plane
    pub fn object_ref(&self) -> ObjectReference {
        self.rcp.object_ref(&())
    }
}
