//! RKE2Config bootstrap resource
//!
//! One RKE2Config is created per control plane Machine. The bootstrap
//! provider renders it into cloud-init data for the node.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::control_plane::AgentConfig;

/// Specification of an RKE2Config
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "bootstrap.cluster.x-k8s.io",
    version = "v1alpha1",
    kind = "RKE2Config",
    plural = "rke2configs",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RKE2ConfigSpec {
    /// Agent settings for the node this config bootstraps
    #[serde(default)]
    pub agent_config: AgentConfig,
}
