//! ObjectMeta merging
//!
//! Merges the metadata an operator requires into metadata that already
//! exists on the cluster, keeping everything the operator does not set
//! (default-class annotations, labels added by administrators, ...).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

/// Merge `required` into `existing`.
///
/// Name and namespace are taken from `required` when set. Labels and
/// annotations are merged key by key with `required` winning; a required key
/// ending in `-` removes the key without the suffix. Owner references are
/// added by UID. `modified` is set when `existing` changed.
pub fn ensure_object_meta(modified: &mut bool, existing: &mut ObjectMeta, required: &ObjectMeta) {
    set_string_if_set(modified, &mut existing.name, &required.name);
    set_string_if_set(modified, &mut existing.namespace, &required.namespace);
    merge_map(modified, &mut existing.labels, &required.labels);
    merge_map(modified, &mut existing.annotations, &required.annotations);
    merge_owner_refs(modified, &mut existing.owner_references, &required.owner_references);
}

/// Clear fields the API server owns so the metadata can be used to create
/// a fresh object.
pub fn clear_server_fields(meta: &mut ObjectMeta) {
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
    meta.generation = None;
    meta.managed_fields = None;
    meta.self_link = None;
}

fn set_string_if_set(modified: &mut bool, existing: &mut Option<String>, required: &Option<String>) {
    if let Some(required) = required.as_ref().filter(|r| !r.is_empty()) {
        if existing.as_ref() != Some(required) {
            *existing = Some(required.clone());
            *modified = true;
        }
    }
}

fn merge_map(
    modified: &mut bool,
    existing: &mut Option<BTreeMap<String, String>>,
    required: &Option<BTreeMap<String, String>>,
) {
    let Some(required) = required else {
        return;
    };
    for (key, value) in required {
        if let Some(removed) = key.strip_suffix('-') {
            if let Some(map) = existing.as_mut() {
                if map.remove(removed).is_some() {
                    *modified = true;
                }
            }
            continue;
        }
        let map = existing.get_or_insert_with(BTreeMap::new);
        if map.get(key) != Some(value) {
            map.insert(key.clone(), value.clone());
            *modified = true;
        }
    }
}

fn merge_owner_refs(
    modified: &mut bool,
    existing: &mut Option<Vec<OwnerReference>>,
    required: &Option<Vec<OwnerReference>>,
) {
    let Some(required) = required else {
        return;
    };
    for owner in required {
        let refs = existing.get_or_insert_with(Vec::new);
        match refs.iter_mut().find(|r| r.uid == owner.uid) {
            Some(current) if current != owner => {
                *current = owner.clone();
                *modified = true;
            }
            Some(_) => {}
            None => {
                refs.push(owner.clone());
                *modified = true;
            }
        }
    }
}
