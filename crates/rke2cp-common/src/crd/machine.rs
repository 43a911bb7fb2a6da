//! Cluster API Machine, as seen by the control plane controller
//!
//! Only the fields the controller reads or writes are modelled; unknown
//! fields from newer Cluster API releases are ignored on deserialization.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{find_condition, Condition, ResourceRef};
use crate::DELETE_MACHINE_ANNOTATION;

/// Specification of a Cluster API Machine
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    plural = "machines",
    status = "MachineStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the Cluster API cluster this Machine belongs to
    pub cluster_name: String,

    /// Bootstrap configuration reference
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Infrastructure object backing this Machine
    pub infrastructure_ref: ResourceRef,

    /// Kubernetes version the node runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Failure domain the Machine is placed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,

    /// How long to wait for the node to drain on deletion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_drain_timeout: Option<String>,
}

/// Bootstrap data source for a Machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Bootstrap config object (e.g. an RKE2Config)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<ResourceRef>,

    /// Secret holding rendered bootstrap data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

/// Observed state of a Machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Lifecycle phase reported by Cluster API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Health conditions, populated by external health reporters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Machine {
    /// Name of the Machine (empty if unset)
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Namespace of the Machine (empty if unset)
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Failure domain the Machine is placed in
    pub fn failure_domain(&self) -> Option<&str> {
        self.spec.failure_domain.as_deref()
    }

    /// True once deletion has been requested from the API server
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// True if the Machine is marked for preferential removal
    pub fn has_delete_annotation(&self) -> bool {
        self.annotation(DELETE_MACHINE_ANNOTATION).is_some()
    }

    /// Value of an annotation
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Health conditions (empty when no status has been reported)
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// Look up a health condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        find_condition(self.conditions(), type_)
    }

    /// Reference to this Machine for dynamic deletion
    pub fn resource_ref(&self) -> ResourceRef {
        use kube::Resource;
        ResourceRef {
            api_version: Machine::api_version(&()).to_string(),
            kind: Machine::kind(&()).to_string(),
            namespace: self.metadata.namespace.clone(),
            name: self.name().to_string(),
            uid: self.metadata.uid.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ConditionStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::collections::BTreeMap;

    fn machine() -> Machine {
        Machine {
            metadata: ObjectMeta {
                name: Some("cp-abcde".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: MachineSpec {
                cluster_name: "prod".to_string(),
                failure_domain: Some("az-1".to_string()),
                ..Default::default()
            },
            status: None,
        }
    }

    #[test]
    fn accessors_read_metadata() {
        let m = machine();
        assert_eq!(m.name(), "cp-abcde");
        assert_eq!(m.namespace(), "default");
        assert_eq!(m.failure_domain(), Some("az-1"));
        assert!(!m.is_deleting());
        assert!(!m.has_delete_annotation());
        assert!(m.conditions().is_empty());
    }

    #[test]
    fn deletion_markers_are_detected() {
        let mut m = machine();
        m.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        m.metadata.annotations = Some(BTreeMap::from([(
            DELETE_MACHINE_ANNOTATION.to_string(),
            String::new(),
        )]));
        assert!(m.is_deleting());
        assert!(m.has_delete_annotation());
    }

    #[test]
    fn resource_ref_points_at_machine_kind() {
        let r = machine().resource_ref();
        assert_eq!(r.api_version, "cluster.x-k8s.io/v1beta1");
        assert_eq!(r.kind, "Machine");
        assert_eq!(r.namespace.as_deref(), Some("default"));
        assert_eq!(r.name, "cp-abcde");
    }

    #[test]
    fn conditions_come_from_status() {
        let mut m = machine();
        m.status = Some(MachineStatus {
            phase: Some("Running".to_string()),
            conditions: vec![Condition::true_("AgentHealthy")],
        });
        assert_eq!(
            m.condition("AgentHealthy").map(|c| c.status),
            Some(ConditionStatus::True)
        );
        assert!(m.condition("Ready").is_none());
    }
}
