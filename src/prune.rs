use std::collections::{BTreeSet, HashSet};

use crate::index::{contains_feature, find_target_path};
use crate::model::{Child, Document, NodeId};

/// Reduces a city object to the paths leading to `targets`.
///
/// Children on a path are kept and rewritten recursively, text and subtrees
/// without any feature node are kept untouched, and every other child (an
/// unrelated sibling feature) is dropped. Returns `false` without touching the
/// tree when no target occurs below `city_object`.
pub fn prune_to_targets(doc: &mut Document, city_object: NodeId, targets: &BTreeSet<String>) -> bool {
    let keep: HashSet<NodeId> = targets
        .iter()
        .filter_map(|target| find_target_path(doc, city_object, target))
        .flatten()
        .collect();

    if keep.is_empty() {
        return false;
    }

    let mut pending = vec![city_object];
    while let Some(id) = pending.pop() {
        let children = std::mem::take(&mut doc.element_mut(id).children);
        let mut retained = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Child::Text(_) => retained.push(child),
                Child::Element(child_id) if keep.contains(&child_id) => {
                    pending.push(child_id);
                    retained.push(child);
                }
                Child::Element(child_id) if !contains_feature(doc, child_id) => {
                    retained.push(child);
                }
                Child::Element(_) => {}
            }
        }
        doc.element_mut(id).children = retained;
    }

    true
}
