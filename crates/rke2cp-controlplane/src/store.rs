//! Access to the API server for the scale logic
//!
//! The [`Store`] trait is the only way the control plane logic reads or
//! writes objects, so tests can swap in mocks or an in-memory fake.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::reflector;
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use rke2cp_common::crd::{
    Cluster, Machine, RKE2Config, RKE2ControlPlane, RKE2ControlPlaneStatus, ResourceRef,
};
use rke2cp_common::kube_utils::build_api_resource;
use rke2cp_common::{
    control_plane_selector_for_cluster, Error, Result, CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL,
    FIELD_MANAGER,
};

/// Object store operations used by the control plane logic
///
/// Deleting an object that does not exist fails with an error for which
/// [`Error::is_not_found`] is true; callers decide whether that matters.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Control plane Machines of a cluster, from the watch cache
    async fn list_machines(&self, namespace: &str, cluster_name: &str) -> Result<Vec<Machine>>;

    /// Control plane Machines of a cluster, read straight from the API server
    async fn list_machines_uncached(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<Machine>>;

    /// A Machine by name, read straight from the API server
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>>;

    /// A Cluster by name
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>>;

    /// Any object by reference
    async fn get_object(&self, reference: &ResourceRef) -> Result<DynamicObject>;

    /// Create any object; its `types` must be set
    async fn create_object(&self, obj: DynamicObject) -> Result<DynamicObject>;

    /// Create a bootstrap config
    async fn create_bootstrap_config(&self, config: &RKE2Config) -> Result<RKE2Config>;

    /// Create a Machine
    async fn create_machine(&self, machine: &Machine) -> Result<Machine>;

    /// Delete any object by reference
    async fn delete(&self, reference: &ResourceRef) -> Result<()>;

    /// Merge `status` into the status subresource of a control plane
    async fn patch_status(
        &self,
        rcp: &RKE2ControlPlane,
        status: &RKE2ControlPlaneStatus,
    ) -> Result<()>;
}

/// [`Store`] backed by the API server and a Machine reflector
pub struct KubeStore {
    client: Client,
    machines: reflector::Store<Machine>,
}

impl KubeStore {
    /// Create a store reading Machines from `machines` on the cached path
    pub fn new(client: Client, machines: reflector::Store<Machine>) -> Self {
        Self { client, machines }
    }

    fn dynamic_api(&self, reference: &ResourceRef) -> Api<DynamicObject> {
        let ar = reference.api_resource();
        match reference.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn is_control_plane_machine_of(m: &Machine, namespace: &str, cluster_name: &str) -> bool {
    let labels = m.labels();
    m.namespace() == namespace
        && labels.get(CLUSTER_NAME_LABEL).map(String::as_str) == Some(cluster_name)
        && labels.contains_key(CONTROL_PLANE_LABEL)
}

fn not_found_or(e: kube::Error, kind: &str, name: &str) -> Error {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(kind, name),
        e => e.into(),
    }
}

#[async_trait]
impl Store for KubeStore {
    async fn list_machines(&self, namespace: &str, cluster_name: &str) -> Result<Vec<Machine>> {
        Ok(self
            .machines
            .state()
            .iter()
            .filter(|m| is_control_plane_machine_of(m, namespace, cluster_name))
            .map(|m| m.as_ref().clone())
            .collect())
    }

    async fn list_machines_uncached(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<Machine>> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&control_plane_selector_for_cluster(cluster_name));
        Ok(api.list(&lp).await?.items)
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_object(&self, reference: &ResourceRef) -> Result<DynamicObject> {
        self.dynamic_api(reference)
            .get(&reference.name)
            .await
            .map_err(|e| not_found_or(e, &reference.kind, &reference.name))
    }

    async fn create_object(&self, obj: DynamicObject) -> Result<DynamicObject> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| Error::serialization("object to create has no apiVersion/kind"))?;
        let ar = build_api_resource(&types.api_version, &types.kind);
        let api: Api<DynamicObject> = match obj.metadata.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        Ok(api.create(&PostParams::default(), &obj).await?)
    }

    async fn create_bootstrap_config(&self, config: &RKE2Config) -> Result<RKE2Config> {
        let ns = config.namespace().unwrap_or_default();
        let api: Api<RKE2Config> = Api::namespaced(self.client.clone(), &ns);
        Ok(api.create(&PostParams::default(), config).await?)
    }

    async fn create_machine(&self, machine: &Machine) -> Result<Machine> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), machine.namespace());
        Ok(api.create(&PostParams::default(), machine).await?)
    }

    async fn delete(&self, reference: &ResourceRef) -> Result<()> {
        self.dynamic_api(reference)
            .delete(&reference.name, &DeleteParams::background())
            .await
            .map_err(|e| not_found_or(e, &reference.kind, &reference.name))?;
        debug!(object = %reference, "delete requested");
        Ok(())
    }

    async fn patch_status(
        &self,
        rcp: &RKE2ControlPlane,
        status: &RKE2ControlPlaneStatus,
    ) -> Result<()> {
        let ns = rcp.namespace().unwrap_or_default();
        let api: Api<RKE2ControlPlane> = Api::namespaced(self.client.clone(), &ns);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            &rcp.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{control_plane, machine};
    use std::collections::BTreeMap;

    #[test]
    fn cache_filter_matches_cluster_and_role() {
        let rcp = control_plane("cp", 3);
        let m = machine(&rcp, "cp-a", None, 0);
        assert!(is_control_plane_machine_of(&m, "default", "prod"));
        assert!(!is_control_plane_machine_of(&m, "default", "staging"));
        assert!(!is_control_plane_machine_of(&m, "other", "prod"));

        let mut worker = m.clone();
        worker.metadata.labels = Some(BTreeMap::from([(
            CLUSTER_NAME_LABEL.to_string(),
            "prod".to_string(),
        )]));
        assert!(!is_control_plane_machine_of(&worker, "default", "prod"));
    }

    #[test]
    fn api_404_becomes_not_found() {
        let err = not_found_or(
            kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "machines \"cp-a\" not found".to_string(),
                reason: "NotFound".to_string(),
                code: 404,
            }),
            "Machine",
            "cp-a",
        );
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(err.is_not_found());
    }

    #[test]
    fn other_api_errors_pass_through() {
        let err = not_found_or(
            kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "forbidden".to_string(),
                reason: "Forbidden".to_string(),
                code: 403,
            }),
            "Machine",
            "cp-a",
        );
        assert!(matches!(err, Error::Kube { .. }));
        assert!(!err.is_not_found());
    }
}
