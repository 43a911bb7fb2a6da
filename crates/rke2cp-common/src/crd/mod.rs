//! Custom Resource Definitions read and written by the control plane controller

mod bootstrap;
mod cluster;
mod control_plane;
mod machine;
mod types;

pub use bootstrap::{RKE2Config, RKE2ConfigSpec};
pub use cluster::{Cluster, ClusterSpec, ClusterStatus, FailureDomainSpec};
pub use control_plane::{
    AgentConfig, DisableComponents, EtcdBackupConfig, EtcdConfig, RKE2ControlPlane,
    RKE2ControlPlaneSpec, RKE2ControlPlaneStatus, ServerConfig,
};
pub use machine::{Bootstrap, Machine, MachineSpec, MachineStatus};
pub use types::{
    find_condition, set_condition, Condition, ConditionSeverity, ConditionStatus, ResourceRef,
};

/// Machine condition reporting whether the RKE2 agent on the node is healthy
pub const AGENT_HEALTHY_CONDITION: &str = "AgentHealthy";

/// Control plane condition summarising member availability
pub const AVAILABLE_CONDITION: &str = "Available";

/// Control plane condition reporting replica convergence
pub const RESIZED_CONDITION: &str = "Resized";
