//! RKE2 control plane scaling
//!
//! This crate provides:
//! - ControlPlaneView and ControlPlane scopes over the owned Machines
//! - PreflightGate stability checks run before any membership change
//! - ScaleEngine for initialize, scale up and scale down
//! - Provisioner creating infrastructure, bootstrap config and Machine together
//! - The RKE2ControlPlane reconciler and its error policy

#![deny(missing_docs)]

pub mod config;
pub mod control_plane;
pub mod controller;
pub mod filters;
pub mod preflight;
pub mod provisioner;
pub mod scale;
pub mod selector;
pub mod store;
pub mod version;
pub mod view;

#[cfg(test)]
mod testing;

pub use config::{ScaleConfig, ScaleOutcome};
pub use control_plane::ControlPlane;
pub use controller::{error_policy, reconcile, Context};
pub use preflight::{PreflightGate, PreflightResult};
pub use provisioner::Provisioner;
pub use scale::{plan, ScaleAction, ScaleEngine};
pub use selector::select_machine_for_scale_down;
pub use store::{KubeStore, Store};
pub use version::to_kube_version;
pub use view::{ControlPlaneView, MemberKey};

#[cfg(test)]
pub use store::MockStore;
