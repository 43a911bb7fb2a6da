//! Mapping from RKE2 release strings to Kubernetes versions
//!
//! RKE2 releases look like `v1.29.4+rke2r1`; Machines record the plain
//! Kubernetes version `v1.29.4`.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

static DISTRIBUTION_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v(\d+)\.(\d+)\.(\d+)\+[A-Za-z0-9]+r\d+$")
        .expect("distribution version pattern is valid")
});

/// Strip the distribution suffix from a version string
///
/// Input that does not look like `v<major>.<minor>.<patch>+<distro>r<N>` is
/// returned unchanged; callers that need strict validation must check the
/// format themselves.
pub fn to_kube_version(version: &str) -> Cow<'_, str> {
    DISTRIBUTION_VERSION.replace(version, "v${1}.${2}.${3}")
}
