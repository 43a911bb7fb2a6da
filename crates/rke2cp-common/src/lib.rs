//! Common types for the RKE2 control-plane provider: CRDs, errors, events, and utilities

#![deny(missing_docs)]

use std::collections::BTreeMap;

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;

pub use error::{AggregateError, Error};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "rke2-control-plane-controller";

/// Label carrying the owning Cluster API cluster name
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label marking a Machine as part of a control plane
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// Annotation a user (or remediation) sets to request a Machine be removed first
pub const DELETE_MACHINE_ANNOTATION: &str = "cluster.x-k8s.io/delete-machine";

/// Annotation holding the JSON server configuration a Machine was created with
///
/// Bootstrap configs of joining members do not carry the full server
/// configuration, so the snapshot lives on the Machine for drift detection.
pub const SERVER_CONFIGURATION_ANNOTATION: &str =
    "controlplane.cluster.x-k8s.io/rke2-server-configuration";

/// Annotation recording the template an infrastructure object was cloned from
pub const CLONED_FROM_NAME_ANNOTATION: &str = "cluster.x-k8s.io/cloned-from-name";

/// Annotation recording the group/kind of the template an object was cloned from
pub const CLONED_FROM_GROUP_KIND_ANNOTATION: &str = "cluster.x-k8s.io/cloned-from-groupkind";

/// Labels applied to every control plane Machine and its children
pub fn control_plane_labels_for_cluster(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string()),
        (CONTROL_PLANE_LABEL.to_string(), String::new()),
    ])
}

/// Label selector matching the control plane Machines of a cluster
pub fn control_plane_selector_for_cluster(cluster_name: &str) -> String {
    format!("{}={},{}", CLUSTER_NAME_LABEL, cluster_name, CONTROL_PLANE_LABEL)
}
