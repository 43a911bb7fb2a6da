//! Small helpers around kube-rs metadata and dynamic resources

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::discovery::ApiResource;
use kube::Resource;
use rand::Rng;

/// Characters used for generated name suffixes (no vowels, no lookalikes)
const NAME_SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Length of the random suffix appended by [`generate_name`]
const NAME_SUFFIX_LEN: usize = 5;

/// Maximum length of a generated object name
const MAX_NAME_LEN: usize = 63;

/// Kinds whose plural is not a simple suffix
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("ingress", "ingresses"),
    ("networkpolicy", "networkpolicies"),
];

/// Split an apiVersion into (group, version)
///
/// Core resources ("v1") have an empty group.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Lowercase plural resource name for a kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Build an ApiResource from a known apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Generate a unique object name from a prefix, like `metadata.generateName`
///
/// The prefix is truncated so the result always fits in a DNS label.
pub fn generate_name(prefix: &str) -> String {
    let max_prefix = MAX_NAME_LEN - NAME_SUFFIX_LEN;
    let prefix = if prefix.len() > max_prefix {
        &prefix[..max_prefix]
    } else {
        prefix
    };

    let mut rng = rand::thread_rng();
    let suffix: String = (0..NAME_SUFFIX_LEN)
        .map(|_| NAME_SUFFIX_ALPHABET[rng.gen_range(0..NAME_SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Owner reference pointing at `owner`
///
/// With `controller` set the reference also blocks owner deletion, which is
/// what a Machine gets. Children cloned before their Machine exists get a
/// plain reference so the Machine controller can adopt them later.
pub fn owner_reference<K>(owner: &K, controller: bool) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    let meta = owner.meta();
    Some(OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: meta.name.clone()?,
        uid: meta.uid.clone()?,
        controller: controller.then_some(true),
        block_owner_deletion: controller.then_some(true),
    })
}

/// True if `meta` has a controller reference to the object with `owner_uid`
pub fn is_controlled_by(meta: &ObjectMeta, owner_kind: &str, owner_uid: &str) -> bool {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|r| r.controller == Some(true) && r.kind == owner_kind && r.uid == owner_uid)
}

/// Name of the owner of a given kind, if any
pub fn owner_name<'a>(meta: &'a ObjectMeta, owner_kind: &str) -> Option<&'a str> {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|r| r.kind == owner_kind)
        .map(|r| r.name.as_str())
}
