//! Predicates over Machines, for use with [`ControlPlaneView::filter`]
//!
//! [`ControlPlaneView::filter`]: crate::view::ControlPlaneView::filter

use kube::Resource;
use rke2cp_common::crd::{Machine, RKE2ControlPlane, ServerConfig};
use rke2cp_common::kube_utils::is_controlled_by;
use rke2cp_common::SERVER_CONFIGURATION_ANNOTATION;

use crate::version::to_kube_version;

/// Machines controlled by the given control plane
pub fn owned_by(rcp: &RKE2ControlPlane) -> impl Fn(&Machine) -> bool + '_ {
    move |m| {
        rcp.metadata.uid.as_deref().is_some_and(|uid| {
            is_controlled_by(&m.metadata, &RKE2ControlPlane::kind(&()), uid)
        })
    }
}

/// Machines with a deletion timestamp
pub fn has_deletion_timestamp(m: &Machine) -> bool {
    m.is_deleting()
}

/// Machines carrying the delete-machine annotation
pub fn has_delete_annotation(m: &Machine) -> bool {
    m.has_delete_annotation()
}

/// Machines placed in one of the listed domains
pub fn in_failure_domains(domains: &[String]) -> impl Fn(&Machine) -> bool + '_ {
    move |m| {
        m.failure_domain()
            .is_some_and(|fd| domains.iter().any(|d| d == fd))
    }
}

/// Machines running the Kubernetes version derived from `version`
///
/// A Machine without a recorded version never matches.
pub fn matches_version(version: &str) -> impl Fn(&Machine) -> bool {
    let want = to_kube_version(version).into_owned();
    move |m| m.spec.version.as_deref() == Some(want.as_str())
}

/// Machines created from the given server configuration
///
/// Machines without the snapshot annotation are assumed to match: they
/// predate the annotation and rolling them for that reason alone would
/// churn the whole control plane.
pub fn matches_server_config(config: &ServerConfig) -> impl Fn(&Machine) -> bool + '_ {
    move |m| match m.annotation(SERVER_CONFIGURATION_ANNOTATION) {
        None => true,
        Some(raw) => serde_json::from_str::<ServerConfig>(raw)
            .map(|recorded| &recorded == config)
            .unwrap_or(false),
    }
}

/// Machines that match the control plane's version and server configuration
pub fn up_to_date(rcp: &RKE2ControlPlane) -> impl Fn(&Machine) -> bool + '_ {
    let version = matches_version(&rcp.spec.version);
    let config = matches_server_config(&rcp.spec.server_config);
    move |m| version(m) && config(m)
}
