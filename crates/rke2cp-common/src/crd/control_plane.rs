//! RKE2ControlPlane Custom Resource Definition
//!
//! An RKE2ControlPlane declares how many control plane Machines a Cluster API
//! cluster should run, which RKE2 version they run, and the server and agent
//! configuration handed to each new member.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ResourceRef};

/// Specification for an RKE2ControlPlane
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "controlplane.cluster.x-k8s.io",
    version = "v1alpha1",
    kind = "RKE2ControlPlane",
    plural = "rke2controlplanes",
    shortname = "rcp",
    status = "RKE2ControlPlaneStatus",
    namespaced,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RKE2ControlPlaneSpec {
    /// Desired number of control plane Machines (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// RKE2 release to run (e.g. "v1.29.4+rke2r1")
    pub version: String,

    /// Agent configuration copied into each member's bootstrap config
    #[serde(default)]
    pub agent_config: AgentConfig,

    /// Server configuration shared by every control plane member
    #[serde(default)]
    pub server_config: ServerConfig,

    /// Infrastructure machine template cloned for each new member
    pub infrastructure_ref: ResourceRef,

    /// How long to wait for a node to drain before deleting its Machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_drain_timeout: Option<String>,
}

impl RKE2ControlPlaneSpec {
    /// Desired replica count, defaulting to a single member
    pub fn desired_replicas(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }

    /// Validate the control plane specification
    pub fn validate(&self, name: &str) -> Result<(), crate::Error> {
        if self.desired_replicas() < 0 {
            return Err(crate::Error::validation_for_field(
                name,
                "spec.replicas",
                "replicas cannot be negative",
            ));
        }
        if self.version.trim().is_empty() {
            return Err(crate::Error::validation_for_field(
                name,
                "spec.version",
                "version cannot be empty",
            ));
        }
        if self.infrastructure_ref.kind.is_empty() || self.infrastructure_ref.name.is_empty() {
            return Err(crate::Error::validation_for_field(
                name,
                "spec.infrastructureRef",
                "infrastructure template must have a kind and a name",
            ));
        }
        Ok(())
    }
}

/// RKE2 agent settings applied to every node
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Labels registered on the node (`key=value`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_labels: Vec<String>,

    /// Taints registered on the node (`key=value:effect`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_taints: Vec<String>,

    /// Extra kubelet arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kubelet_args: Vec<String>,

    /// Extra kube-proxy arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kube_proxy_args: Vec<String>,

    /// External container runtime socket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_runtime_endpoint: Option<String>,

    /// CIS profile to validate the node against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cis_profile: Option<String>,

    /// Enable SELinux in containerd
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub selinux: bool,

    /// Refuse to start if kernel tunables differ from kubelet defaults
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub protect_kernel_defaults: bool,
}

/// RKE2 server settings shared by all control plane members
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Additional subject alternative names on the API server certificate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls_san: Vec<String>,

    /// CNI plugin to deploy (e.g. "canal", "cilium", "none")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cni: Option<String>,

    /// Cluster DNS domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_domain: Option<String>,

    /// Cloud provider name passed to the kubelet and controller manager
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider_name: Option<String>,

    /// Components RKE2 should not deploy
    #[serde(default)]
    pub disable_components: DisableComponents,

    /// Embedded etcd settings
    #[serde(default)]
    pub etcd: EtcdConfig,
}

/// Components RKE2 should not deploy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisableComponents {
    /// Core Kubernetes components (e.g. "scheduler")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kubernetes_components: Vec<String>,

    /// Packaged plugins (e.g. "rke2-ingress-nginx")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugin_components: Vec<String>,
}

/// Embedded etcd settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdConfig {
    /// Expose etcd metrics on all interfaces
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expose_metrics: bool,

    /// Snapshot settings
    #[serde(default)]
    pub backup_config: EtcdBackupConfig,

    /// Extra etcd arguments
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_config: BTreeMap<String, String>,
}

/// Etcd snapshot settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdBackupConfig {
    /// Cron schedule for snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_cron_spec: Option<String>,

    /// Number of snapshots to keep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<String>,

    /// Directory snapshots are written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// Observed state of an RKE2ControlPlane
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RKE2ControlPlaneStatus {
    /// The generation of the spec last processed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Number of control plane Machines owned by this control plane
    #[serde(default)]
    pub replicas: i32,

    /// Number of Machines matching the current spec
    #[serde(default)]
    pub updated_replicas: i32,

    /// Number of Machines whose agent reports healthy
    #[serde(default)]
    pub ready_replicas: i32,

    /// Number of Machines not yet healthy
    #[serde(default)]
    pub unavailable_replicas: i32,

    /// Whether the first control plane member has come up
    #[serde(default)]
    pub initialized: bool,

    /// Whether at least one member is healthy
    #[serde(default)]
    pub ready: bool,

    /// Conditions representing the control plane state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
