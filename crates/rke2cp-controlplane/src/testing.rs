//! Fixtures and fakes shared by the unit tests of this crate

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use kube::api::DynamicObject;
use kube::runtime::events::EventType;
use kube::ResourceExt;

use rke2cp_common::crd::{
    Cluster, ClusterSpec, ClusterStatus, Condition, FailureDomainSpec, Machine, MachineSpec,
    MachineStatus, RKE2Config, RKE2ControlPlane, RKE2ControlPlaneSpec, RKE2ControlPlaneStatus,
    ResourceRef, AGENT_HEALTHY_CONDITION,
};
use rke2cp_common::events::EventPublisher;
use rke2cp_common::kube_utils::{build_api_resource, owner_reference};
use rke2cp_common::{
    control_plane_labels_for_cluster, Error, Result, SERVER_CONFIGURATION_ANNOTATION,
};

use crate::store::Store;
use crate::version::to_kube_version;

pub const NAMESPACE: &str = "default";
pub const CLUSTER_NAME: &str = "prod";
pub const CLUSTER_UID: &str = "cluster-uid";
pub const RCP_UID: &str = "rcp-uid";
pub const RKE2_VERSION: &str = "v1.29.4+rke2r1";
pub const TEMPLATE_API_VERSION: &str = "infrastructure.cluster.x-k8s.io/v1beta1";
pub const TEMPLATE_KIND: &str = "DockerMachineTemplate";
pub const TEMPLATE_NAME: &str = "cp-template";

/// Control plane owned by the `prod` Cluster
pub fn control_plane(name: &str, replicas: i32) -> RKE2ControlPlane {
    let mut rcp = RKE2ControlPlane::new(
        name,
        RKE2ControlPlaneSpec {
            replicas: Some(replicas),
            version: RKE2_VERSION.to_string(),
            infrastructure_ref: ResourceRef::new(
                TEMPLATE_API_VERSION,
                TEMPLATE_KIND,
                Some(NAMESPACE),
                TEMPLATE_NAME,
            ),
            ..Default::default()
        },
    );
    rcp.metadata.namespace = Some(NAMESPACE.to_string());
    rcp.metadata.uid = Some(RCP_UID.to_string());
    rcp.metadata.generation = Some(1);
    rcp.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "cluster.x-k8s.io/v1beta1".to_string(),
        kind: "Cluster".to_string(),
        name: CLUSTER_NAME.to_string(),
        uid: CLUSTER_UID.to_string(),
        controller: None,
        block_owner_deletion: None,
    }]);
    rcp
}

/// Healthy, up-to-date Machine controlled by `rcp`, created `age_secs` before a fixed instant
pub fn machine(
    rcp: &RKE2ControlPlane,
    name: &str,
    failure_domain: Option<&str>,
    age_secs: i64,
) -> Machine {
    let base = Utc
        .timestamp_opt(1_700_000_000, 0)
        .single()
        .expect("valid timestamp");
    let mut m = Machine::new(
        name,
        MachineSpec {
            cluster_name: CLUSTER_NAME.to_string(),
            infrastructure_ref: ResourceRef::new(
                TEMPLATE_API_VERSION,
                "DockerMachine",
                Some(NAMESPACE),
                format!("{}-infra", name),
            ),
            version: Some(to_kube_version(&rcp.spec.version).into_owned()),
            failure_domain: failure_domain.map(String::from),
            ..Default::default()
        },
    );
    m.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        uid: Some(format!("{}-uid", name)),
        labels: Some(control_plane_labels_for_cluster(CLUSTER_NAME)),
        annotations: Some(BTreeMap::from([(
            SERVER_CONFIGURATION_ANNOTATION.to_string(),
            serde_json::to_string(&rcp.spec.server_config).expect("serialize server config"),
        )])),
        owner_references: Some(vec![owner_reference(rcp, true).expect("rcp has uid")]),
        creation_timestamp: Some(Time(base - chrono::Duration::seconds(age_secs))),
        ..Default::default()
    };
    m.status = Some(MachineStatus {
        phase: Some("Running".to_string()),
        conditions: vec![Condition::true_(AGENT_HEALTHY_CONDITION)],
    });
    m
}

/// Replace a Machine's health conditions
pub fn with_conditions(mut m: Machine, conditions: Vec<Condition>) -> Machine {
    m.status.get_or_insert_with(Default::default).conditions = conditions;
    m
}

/// Cluster whose listed failure domains all accept control plane Machines
pub fn cluster_with_domains(name: &str, domains: &[&str]) -> Cluster {
    let mut cluster = Cluster::new(name, ClusterSpec::default());
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.metadata.uid = Some(CLUSTER_UID.to_string());
    cluster.status = Some(ClusterStatus {
        failure_domains: domains
            .iter()
            .map(|d| {
                (
                    d.to_string(),
                    FailureDomainSpec {
                        control_plane: true,
                        attributes: BTreeMap::new(),
                    },
                )
            })
            .collect(),
        phase: Some("Provisioned".to_string()),
    });
    cluster
}

/// Error the API server returns with the given status code
pub fn api_error(code: u16) -> Error {
    Error::from(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected status {}", code),
        reason: match code {
            409 => "Conflict",
            429 => "TooManyRequests",
            _ => "InternalError",
        }
        .to_string(),
        code,
    }))
}

/// Infrastructure template referenced by [`control_plane`]
pub fn infra_template() -> DynamicObject {
    let ar = build_api_resource(TEMPLATE_API_VERSION, TEMPLATE_KIND);
    let mut obj = DynamicObject::new(TEMPLATE_NAME, &ar).within(NAMESPACE);
    obj.metadata.uid = Some("template-uid".to_string());
    obj.data = serde_json::json!({
        "spec": {
            "template": {
                "metadata": {
                    "labels": {"tier": "control-plane"},
                    "annotations": {"example.com/owner": "platform"}
                },
                "spec": {"customImage": "kindest/node:v1.29.4"}
            }
        }
    });
    obj
}

/// Which store call should fail
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fail {
    CreateObject,
    CreateBootstrapConfig,
    CreateMachine,
    ListUncached,
    /// Deleting the object with this name
    Delete(String),
    /// Deleting anything
    DeleteAny,
}

#[derive(Default)]
struct State {
    machines: BTreeMap<(String, String), Machine>,
    cached: Option<Vec<Machine>>,
    objects: BTreeMap<(String, String, String), DynamicObject>,
    bootstrap_configs: BTreeMap<(String, String), RKE2Config>,
    clusters: BTreeMap<(String, String), Cluster>,
    failures: BTreeSet<Fail>,
    api_status: Option<u16>,
    created: Vec<ResourceRef>,
    deleted: Vec<ResourceRef>,
    statuses: Vec<RKE2ControlPlaneStatus>,
    next_uid: u64,
}

impl State {
    fn uid(&mut self) -> String {
        self.next_uid += 1;
        format!("uid-{}", self.next_uid)
    }

    fn fail(&self, f: Fail) -> Result<()> {
        if !self.failures.contains(&f) {
            return Ok(());
        }
        Err(match self.api_status {
            Some(code) => api_error(code),
            None => Error::internal_with_context("store", format!("injected {:?} failure", f)),
        })
    }
}

/// In-memory [`Store`] with a separately controllable watch cache
///
/// By default the cached path sees exactly what the API server sees.
/// [`InMemoryStore::with_stale_cache`] pins the cache to a fixed list.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding the `prod` Cluster and the infrastructure template
    pub fn seeded(domains: &[&str]) -> Self {
        let store = Self::new();
        store.put_cluster(cluster_with_domains(CLUSTER_NAME, domains));
        store.put_object(infra_template());
        store
    }

    pub fn with_machines(self, machines: impl IntoIterator<Item = Machine>) -> Self {
        for m in machines {
            self.put_machine(m);
        }
        self
    }

    pub fn with_stale_cache(self, cached: Vec<Machine>) -> Self {
        self.lock().cached = Some(cached);
        self
    }

    pub fn failing(self, f: Fail) -> Self {
        self.lock().failures.insert(f);
        self
    }

    /// Injected failures come back as API server errors with this code
    pub fn with_api_status(self, code: u16) -> Self {
        self.lock().api_status = Some(code);
        self
    }

    pub fn put_machine(&self, m: Machine) {
        self.lock()
            .machines
            .insert((m.namespace().to_string(), m.name().to_string()), m);
    }

    pub fn put_cluster(&self, c: Cluster) {
        self.lock()
            .clusters
            .insert((c.namespace().unwrap_or_default(), c.name_any()), c);
    }

    pub fn put_object(&self, obj: DynamicObject) {
        let kind = obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
        self.lock().objects.insert(
            (kind, obj.namespace().unwrap_or_default(), obj.name_any()),
            obj,
        );
    }

    /// Every object created through the store, in order
    pub fn created(&self) -> Vec<ResourceRef> {
        self.lock().created.clone()
    }

    /// Every object successfully deleted through the store, in order
    pub fn deleted(&self) -> Vec<ResourceRef> {
        self.lock().deleted.clone()
    }

    /// Names of created objects of `kind`
    pub fn created_of_kind(&self, kind: &str) -> Vec<String> {
        self.created()
            .into_iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.name)
            .collect()
    }

    /// Names of Machines currently stored
    pub fn machine_names(&self) -> Vec<String> {
        self.lock().machines.values().map(|m| m.name().to_string()).collect()
    }

    /// Number of objects (other than Machines and Clusters) currently stored
    pub fn object_count(&self) -> usize {
        let state = self.lock();
        state.objects.len() + state.bootstrap_configs.len()
    }

    /// Status patches in the order they were made
    pub fn statuses(&self) -> Vec<RKE2ControlPlaneStatus> {
        self.lock().statuses.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("store lock poisoned")
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn list_machines(&self, namespace: &str, cluster_name: &str) -> Result<Vec<Machine>> {
        let state = self.lock();
        let machines: Vec<Machine> = match &state.cached {
            Some(cached) => cached.clone(),
            None => state.machines.values().cloned().collect(),
        };
        Ok(machines
            .into_iter()
            .filter(|m| m.namespace() == namespace && m.spec.cluster_name == cluster_name)
            .collect())
    }

    async fn list_machines_uncached(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<Machine>> {
        let state = self.lock();
        state.fail(Fail::ListUncached)?;
        Ok(state
            .machines
            .values()
            .filter(|m| m.namespace() == namespace && m.spec.cluster_name == cluster_name)
            .cloned()
            .collect())
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>> {
        Ok(self
            .lock()
            .machines
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>> {
        Ok(self
            .lock()
            .clusters
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_object(&self, reference: &ResourceRef) -> Result<DynamicObject> {
        let key = (
            reference.kind.clone(),
            reference.namespace.clone().unwrap_or_default(),
            reference.name.clone(),
        );
        self.lock()
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(&reference.kind, &reference.name))
    }

    async fn create_object(&self, mut obj: DynamicObject) -> Result<DynamicObject> {
        let mut state = self.lock();
        state.fail(Fail::CreateObject)?;
        obj.metadata.uid = Some(state.uid());
        let reference = ResourceRef::from_dynamic(&obj)
            .ok_or_else(|| Error::serialization("object to create has no apiVersion/kind"))?;
        state.objects.insert(
            (
                reference.kind.clone(),
                reference.namespace.clone().unwrap_or_default(),
                reference.name.clone(),
            ),
            obj.clone(),
        );
        state.created.push(reference);
        Ok(obj)
    }

    async fn create_bootstrap_config(&self, config: &RKE2Config) -> Result<RKE2Config> {
        let mut state = self.lock();
        state.fail(Fail::CreateBootstrapConfig)?;
        let mut created = config.clone();
        created.metadata.uid = Some(state.uid());
        let ns = created.namespace().unwrap_or_default();
        state.created.push(ResourceRef::new(
            "bootstrap.cluster.x-k8s.io/v1alpha1",
            "RKE2Config",
            Some(&ns),
            created.name_any(),
        ));
        state
            .bootstrap_configs
            .insert((ns, created.name_any()), created.clone());
        Ok(created)
    }

    async fn create_machine(&self, machine: &Machine) -> Result<Machine> {
        let mut state = self.lock();
        state.fail(Fail::CreateMachine)?;
        let mut created = machine.clone();
        created.metadata.uid = Some(state.uid());
        state.created.push(created.resource_ref());
        state.machines.insert(
            (created.namespace().to_string(), created.name().to_string()),
            created.clone(),
        );
        Ok(created)
    }

    async fn delete(&self, reference: &ResourceRef) -> Result<()> {
        let mut state = self.lock();
        state.fail(Fail::Delete(reference.name.clone()))?;
        state.fail(Fail::DeleteAny)?;
        let ns = reference.namespace.clone().unwrap_or_default();
        let name = reference.name.clone();
        let removed = match reference.kind.as_str() {
            "Machine" => state.machines.remove(&(ns, name)).is_some(),
            "RKE2Config" => state.bootstrap_configs.remove(&(ns, name)).is_some(),
            kind => state
                .objects
                .remove(&(kind.to_string(), ns, name))
                .is_some(),
        };
        if !removed {
            return Err(Error::not_found(&reference.kind, &reference.name));
        }
        state.deleted.push(reference.clone());
        Ok(())
    }

    async fn patch_status(
        &self,
        _rcp: &RKE2ControlPlane,
        status: &RKE2ControlPlaneStatus,
    ) -> Result<()> {
        self.lock().statuses.push(status.clone());
        Ok(())
    }
}

/// A published event, as seen by [`RecordingEventPublisher`]
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub note: Option<String>,
}

/// Event publisher that keeps every event for later assertions
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("events lock poisoned").clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events
            .lock()
            .expect("events lock poisoned")
            .push(RecordedEvent {
                warning: matches!(type_, EventType::Warning),
                reason: reason.to_string(),
                note,
            });
    }
}
