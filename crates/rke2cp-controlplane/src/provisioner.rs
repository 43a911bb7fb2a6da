//! Materializing a new control plane member from its templates
//!
//! A member is three objects: an infrastructure object cloned from the
//! control plane's template, an RKE2Config with the agent payload, and the
//! Machine tying the two together. They are created in that order. If the
//! bootstrap config or the Machine cannot be created, everything created
//! so far is deleted again before the error is returned, so a failed
//! attempt never leaves orphans behind.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use rke2cp_common::crd::{
    AgentConfig, Bootstrap, Machine, MachineSpec, RKE2Config, RKE2ConfigSpec, ResourceRef,
};
use rke2cp_common::kube_utils::{build_api_resource, generate_name, owner_reference};
use rke2cp_common::{
    control_plane_labels_for_cluster, Error, Result, CLONED_FROM_GROUP_KIND_ANNOTATION,
    CLONED_FROM_NAME_ANNOTATION, SERVER_CONFIGURATION_ANNOTATION,
};

use crate::control_plane::ControlPlane;
use crate::store::Store;
use crate::version::to_kube_version;

/// Suffix infrastructure template kinds carry
const TEMPLATE_SUFFIX: &str = "Template";

/// Creates control plane members and rolls back partial creations
#[derive(Clone)]
pub struct Provisioner {
    store: Arc<dyn Store>,
}

impl Provisioner {
    /// Create a provisioner writing through `store`
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create one new member with the given agent payload and placement
    ///
    /// Returns the created Machine. On failure no object created by this
    /// call survives; the error lists the creation failure followed by any
    /// cleanup failures.
    #[instrument(skip(self, cp, bootstrap), fields(control_plane = %cp.name()))]
    pub async fn clone_configs_and_generate_machine(
        &self,
        cp: &ControlPlane,
        bootstrap: AgentConfig,
        failure_domain: Option<String>,
    ) -> Result<Machine> {
        let infra_ref = self
            .clone_infrastructure_template(cp)
            .await
            .map_err(|e| e.wrap("failed to clone infrastructure template"))?;

        let mut errs = Vec::new();

        let bootstrap_ref = match self.generate_bootstrap_config(cp, bootstrap).await {
            Ok(r) => Some(r),
            Err(e) => {
                errs.push(e.wrap("failed to generate bootstrap config"));
                None
            }
        };

        if let Some(bootstrap_ref) = &bootstrap_ref {
            match self
                .generate_machine(cp, &infra_ref, bootstrap_ref, failure_domain)
                .await
            {
                Ok(machine) => return Ok(machine),
                Err(e) => errs.push(e.wrap("failed to create Machine")),
            }
        }

        warn!(
            infrastructure = %infra_ref,
            "member creation failed, cleaning up generated resources"
        );
        let created: Vec<&ResourceRef> = std::iter::once(&infra_ref)
            .chain(bootstrap_ref.as_ref())
            .collect();
        if let Err(e) = self.cleanup_from_generation(created).await {
            errs.push(e.wrap("failed to cleanup generated resources"));
        }

        Err(Error::from_errors(errs).unwrap_or_else(|| {
            Error::internal_with_context("provisioner", "member creation failed")
        }))
    }

    /// Clone the control plane's infrastructure template
    pub async fn clone_infrastructure_template(&self, cp: &ControlPlane) -> Result<ResourceRef> {
        let template_ref = cp
            .rcp()
            .spec
            .infrastructure_ref
            .clone()
            .in_namespace(&cp.namespace());
        let template = self.store.get_object(&template_ref).await?;
        let clone = build_infrastructure_clone(&template, &template_ref, cp)?;
        let created = self.store.create_object(clone).await?;
        let created_ref = ResourceRef::from_dynamic(&created).ok_or_else(|| {
            Error::internal_with_context("provisioner", "created infrastructure object has no type")
        })?;
        debug!(infrastructure = %created_ref, template = %template_ref, "cloned infrastructure template");
        Ok(created_ref)
    }

    /// Create the RKE2Config for a new member
    pub async fn generate_bootstrap_config(
        &self,
        cp: &ControlPlane,
        agent_config: AgentConfig,
    ) -> Result<ResourceRef> {
        let config = build_bootstrap_config(cp, agent_config)?;
        let created = self
            .store
            .create_bootstrap_config(&config)
            .await
            .map_err(|e| e.wrap("failed to create bootstrap configuration"))?;

        Ok(ResourceRef {
            api_version: RKE2Config::api_version(&()).to_string(),
            kind: RKE2Config::kind(&()).to_string(),
            namespace: created.namespace(),
            name: created.name_any(),
            uid: created.uid(),
        })
    }

    /// Create the Machine referencing both children
    pub async fn generate_machine(
        &self,
        cp: &ControlPlane,
        infra_ref: &ResourceRef,
        bootstrap_ref: &ResourceRef,
        failure_domain: Option<String>,
    ) -> Result<Machine> {
        let machine = build_machine(cp, infra_ref, bootstrap_ref, failure_domain)?;
        let created = self
            .store
            .create_machine(&machine)
            .await
            .map_err(|e| e.wrap("failed to create machine"))?;
        info!(
            machine = %created.name(),
            version = created.spec.version.as_deref().unwrap_or_default(),
            failure_domain = created.failure_domain().unwrap_or_default(),
            "created control plane Machine"
        );
        Ok(created)
    }

    /// Delete objects created by a failed attempt
    ///
    /// Objects that are already gone are fine. Every other failure is
    /// collected rather than stopping the cleanup.
    pub async fn cleanup_from_generation<'a>(
        &self,
        refs: impl IntoIterator<Item = &'a ResourceRef>,
    ) -> Result<()> {
        let mut errs = Vec::new();
        for r in refs {
            match self.store.delete(r).await {
                Ok(()) => debug!(object = %r, "removed generated resource"),
                Err(e) if e.is_not_found() => {}
                Err(e) => errs.push(e.wrap("failed to cleanup generated resources after error")),
            }
        }
        match Error::from_errors(errs) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Build the infrastructure object a template describes
///
/// The clone takes `spec.template.spec` of the template, drops the
/// `Template` suffix from the kind, gets the template's labels and
/// annotations plus the control plane labels and the cloned-from
/// annotations, and a non-controller owner reference to the control
/// plane: the Machine controller adopts it later.
pub fn build_infrastructure_clone(
    template: &DynamicObject,
    template_ref: &ResourceRef,
    cp: &ControlPlane,
) -> Result<DynamicObject> {
    let resource = template_ref.to_string();
    let inner = template
        .data
        .get("spec")
        .and_then(|s| s.get("template"))
        .ok_or_else(|| {
            Error::validation_for_field(&resource, "spec.template", "template has no spec.template")
        })?;

    let kind = template_ref
        .kind
        .strip_suffix(TEMPLATE_SUFFIX)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            Error::validation_for(
                &resource,
                format!("kind {} does not end in {}", template_ref.kind, TEMPLATE_SUFFIX),
            )
        })?;

    let ar = build_api_resource(&template_ref.api_version, kind);
    let name = generate_name(&format!("{}-", template_ref.name));
    let mut obj = DynamicObject::new(&name, &ar).within(&cp.namespace());

    let mut labels: BTreeMap<String, String> = string_map(inner.pointer("/metadata/labels"));
    labels.extend(control_plane_labels_for_cluster(&cp.cluster_name()));

    let mut annotations: BTreeMap<String, String> =
        string_map(inner.pointer("/metadata/annotations"));
    annotations.insert(
        CLONED_FROM_NAME_ANNOTATION.to_string(),
        template_ref.name.clone(),
    );
    annotations.insert(
        CLONED_FROM_GROUP_KIND_ANNOTATION.to_string(),
        template_ref.group_kind(),
    );

    obj.metadata.labels = Some(labels);
    obj.metadata.annotations = Some(annotations);
    obj.metadata.owner_references = Some(vec![control_plane_owner(cp, false)?]);
    obj.data = serde_json::json!({
        "spec": inner.get("spec").cloned().unwrap_or_else(|| serde_json::json!({})),
    });
    Ok(obj)
}

/// Build the RKE2Config for a new member
pub fn build_bootstrap_config(cp: &ControlPlane, agent_config: AgentConfig) -> Result<RKE2Config> {
    let mut config = RKE2Config::new(
        &generate_name(&format!("{}-", cp.name())),
        RKE2ConfigSpec { agent_config },
    );
    config.metadata.namespace = Some(cp.namespace());
    config.metadata.labels = Some(control_plane_labels_for_cluster(&cp.cluster_name()));
    config.metadata.owner_references = Some(vec![control_plane_owner(cp, false)?]);
    Ok(config)
}

/// Build the Machine for a new member
///
/// The Machine is controlled by the control plane, runs the Kubernetes
/// version derived from the RKE2 version and records the server
/// configuration it was created with.
pub fn build_machine(
    cp: &ControlPlane,
    infra_ref: &ResourceRef,
    bootstrap_ref: &ResourceRef,
    failure_domain: Option<String>,
) -> Result<Machine> {
    let rcp = cp.rcp();
    let version = to_kube_version(&rcp.spec.version).into_owned();
    debug!(rke2_version = %rcp.spec.version, machine_version = %version, "translated version");

    let mut machine = Machine::new(
        &generate_name(&format!("{}-", cp.name())),
        MachineSpec {
            cluster_name: cp.cluster_name(),
            bootstrap: Bootstrap {
                config_ref: Some(bootstrap_ref.clone()),
                data_secret_name: None,
            },
            infrastructure_ref: infra_ref.clone(),
            version: Some(version),
            failure_domain,
            node_drain_timeout: rcp.spec.node_drain_timeout.clone(),
        },
    );
    machine.metadata.namespace = Some(cp.namespace());
    machine.metadata.labels = Some(control_plane_labels_for_cluster(&cp.cluster_name()));
    machine.metadata.owner_references = Some(vec![control_plane_owner(cp, true)?]);
    machine.metadata.annotations = Some(BTreeMap::from([(
        SERVER_CONFIGURATION_ANNOTATION.to_string(),
        cp.server_config_annotation()?,
    )]));
    Ok(machine)
}

fn control_plane_owner(
    cp: &ControlPlane,
    controller: bool,
) -> Result<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference> {
    owner_reference(cp.rcp(), controller).ok_or_else(|| {
        Error::internal_with_context(
            "provisioner",
            format!("control plane {} has no name or uid", cp.name()),
        )
    })
}

fn string_map(value: Option<&serde_json::Value>) -> BTreeMap<String, String> {
    value
        .and_then(|v| v.as_object())
        .map(|o| {
            o.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
