//! Choosing which member to remove on scale down

use rke2cp_common::crd::Machine;
use rke2cp_common::Result;

use crate::control_plane::ControlPlane;
use crate::view::ControlPlaneView;

/// Pick the member to delete
///
/// The first non-empty set wins:
/// 1. outdated members marked for deletion
/// 2. any member marked for deletion
/// 3. outdated members
/// 4. all members
///
/// Within that set the oldest member of the most populated failure domain
/// is chosen (members outside every known domain first).
pub fn select_machine_for_scale_down(
    cp: &ControlPlane,
    outdated: &ControlPlaneView,
) -> Result<Machine> {
    let annotated_outdated = cp.machines_with_delete_annotation(outdated);
    let annotated = cp.machines_with_delete_annotation(cp.machines());

    let candidates = if !annotated_outdated.is_empty() {
        annotated_outdated
    } else if !annotated.is_empty() {
        annotated
    } else if !outdated.is_empty() {
        outdated.clone()
    } else {
        cp.machines().clone()
    };

    cp.machine_in_failure_domain_with_most_machines(&candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cluster_with_domains, control_plane, machine, CLUSTER_NAME};
    use rke2cp_common::DELETE_MACHINE_ANNOTATION;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const DOMAINS: &[&str] = &["az-1", "az-2", "az-3"];

    fn annotated(mut m: Machine) -> Machine {
        m.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(DELETE_MACHINE_ANNOTATION.to_string(), "yes".to_string());
        m
    }

    fn outdated(mut m: Machine) -> Machine {
        m.spec.version = Some("v1.28.9".to_string());
        m
    }

    /// A: annotated + outdated, B: annotated, C: outdated, D: plain.
    /// Each lives in its own domain with D's domain the most crowded, so
    /// only the precedence can explain which one is picked.
    fn members(include: &[&str]) -> Vec<Machine> {
        let rcp = control_plane("cp", 3);
        let all = vec![
            ("a", annotated(outdated(machine(&rcp, "cp-a", Some("az-1"), 10)))),
            ("b", annotated(machine(&rcp, "cp-b", Some("az-2"), 20))),
            ("c", outdated(machine(&rcp, "cp-c", Some("az-3"), 30))),
            ("d", machine(&rcp, "cp-d", Some("az-3"), 40)),
            ("e", machine(&rcp, "cp-e", Some("az-3"), 50)),
        ];
        all.into_iter()
            .filter(|(k, _)| include.contains(k))
            .map(|(_, m)| m)
            .collect()
    }

    fn pick(include: &[&str]) -> String {
        let cp = ControlPlane::new(
            Arc::new(control_plane("cp", 3)),
            cluster_with_domains(CLUSTER_NAME, DOMAINS),
            members(include),
        );
        let outdated = cp.machines_needing_rollout();
        select_machine_for_scale_down(&cp, &outdated)
            .expect("candidate")
            .name()
            .to_string()
    }

    #[test]
    fn annotated_outdated_member_wins() {
        assert_eq!(pick(&["a", "b", "c", "d", "e"]), "cp-a");
    }

    #[test]
    fn annotated_member_wins_without_annotated_outdated() {
        assert_eq!(pick(&["b", "c", "d", "e"]), "cp-b");
    }

    #[test]
    fn outdated_member_wins_without_annotations() {
        assert_eq!(pick(&["c", "d", "e"]), "cp-c");
    }

    #[test]
    fn falls_back_to_oldest_in_most_populated_domain() {
        assert_eq!(pick(&["d", "e"]), "cp-e");
    }

    #[test]
    fn empty_control_plane_is_an_invariant_violation() {
        let cp = ControlPlane::new(
            Arc::new(control_plane("cp", 3)),
            cluster_with_domains(CLUSTER_NAME, DOMAINS),
            vec![],
        );
        let err = select_machine_for_scale_down(&cp, &ControlPlaneView::default()).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn caller_supplied_outdated_set_is_honored() {
        let cp = ControlPlane::new(
            Arc::new(control_plane("cp", 3)),
            cluster_with_domains(CLUSTER_NAME, DOMAINS),
            members(&["d", "e"]),
        );
        let only_d = cp.machines().filter(|m| m.name() == "cp-d");
        let picked = select_machine_for_scale_down(&cp, &only_d).expect("candidate");
        assert_eq!(picked.name(), "cp-d");
    }
}
