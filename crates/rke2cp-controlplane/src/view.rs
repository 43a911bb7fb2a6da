//! Read-only snapshot over a control plane's Machines
//!
//! A [`ControlPlaneView`] is built fresh for every reconcile pass and never
//! mutated afterwards. Filtering and selection return new views, so a
//! predicate can be applied to the same snapshot any number of times
//! without the result depending on evaluation order.

use std::collections::BTreeMap;
use std::fmt;

use rke2cp_common::crd::Machine;

/// Unique identity of a Machine within the API server
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberKey {
    /// Namespace of the Machine
    pub namespace: String,
    /// Name of the Machine
    pub name: String,
}

impl MemberKey {
    /// Key of the given Machine
    pub fn of(machine: &Machine) -> Self {
        Self {
            namespace: machine.namespace().to_string(),
            name: machine.name().to_string(),
        }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Immutable, ordered set of control plane Machines keyed by identity
#[derive(Clone, Debug, Default)]
pub struct ControlPlaneView {
    members: BTreeMap<MemberKey, Machine>,
}

impl ControlPlaneView {
    /// Build a view; a later duplicate of the same identity replaces an earlier one
    pub fn new(machines: impl IntoIterator<Item = Machine>) -> Self {
        Self {
            members: machines
                .into_iter()
                .map(|m| (MemberKey::of(&m), m))
                .collect(),
        }
    }

    /// Members matching `predicate`
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Machine) -> bool,
    {
        Self {
            members: self
                .members
                .iter()
                .filter(|(_, m)| predicate(m))
                .map(|(k, m)| (k.clone(), m.clone()))
                .collect(),
        }
    }

    /// Machine names in identity order
    pub fn names(&self) -> Vec<&str> {
        self.members.values().map(Machine::name).collect()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when there are no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in identity order
    pub fn iter(&self) -> impl Iterator<Item = &Machine> {
        self.members.values()
    }

    /// True if `machine` is part of this view
    pub fn contains(&self, machine: &Machine) -> bool {
        self.members.contains_key(&MemberKey::of(machine))
    }

    /// True if any member has a deletion timestamp
    pub fn has_deleting_member(&self) -> bool {
        self.iter().any(Machine::is_deleting)
    }

    /// Members placed in `domain`
    pub fn members_in_failure_domain(&self, domain: Option<&str>) -> Self {
        self.filter(|m| m.failure_domain() == domain)
    }

    /// Member count per failure domain (Machines without one are not counted)
    pub fn failure_domain_histogram(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for fd in self.iter().filter_map(Machine::failure_domain) {
            *counts.entry(fd).or_insert(0) += 1;
        }
        counts
    }

    /// The candidate domain holding the most members
    ///
    /// Candidates are considered in the order given and the first one wins
    /// a tie. Domains without any member are never returned.
    pub fn failure_domain_with_most_members(&self, candidates: &[String]) -> Option<String> {
        let counts = self.failure_domain_histogram();
        let mut best: Option<(&String, usize)> = None;
        for fd in candidates {
            let count = counts.get(fd.as_str()).copied().unwrap_or(0);
            if count > 0 && best.map_or(true, |(_, most)| count > most) {
                best = Some((fd, count));
            }
        }
        best.map(|(fd, _)| fd.clone())
    }

    /// The candidate domain holding the fewest members, ties broken by id
    pub fn failure_domain_with_fewest_members(&self, candidates: &[String]) -> Option<String> {
        let counts = self.failure_domain_histogram();
        candidates
            .iter()
            .min_by(|a, b| {
                let ca = counts.get(a.as_str()).copied().unwrap_or(0);
                let cb = counts.get(b.as_str()).copied().unwrap_or(0);
                ca.cmp(&cb).then_with(|| a.cmp(b))
            })
            .cloned()
    }

    /// The member created first, ties broken by name
    pub fn oldest(&self) -> Option<&Machine> {
        self.iter().min_by(|a, b| {
            let ta = a.metadata.creation_timestamp.as_ref().map(|t| t.0);
            let tb = b.metadata.creation_timestamp.as_ref().map(|t| t.0);
            ta.cmp(&tb).then_with(|| a.name().cmp(b.name()))
        })
    }
}

impl FromIterator<Machine> for ControlPlaneView {
    fn from_iter<I: IntoIterator<Item = Machine>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a ControlPlaneView {
    type Item = &'a Machine;
    type IntoIter = std::collections::btree_map::Values<'a, MemberKey, Machine>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.values()
    }
}
