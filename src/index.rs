use std::collections::BTreeSet;

use crate::model::{Document, NodeId};

/// Every `gml:id` on `id` and all of its descendants.
pub fn collect_gml_ids(doc: &Document, id: NodeId) -> BTreeSet<String> {
    doc.descendants(id)
        .flat_map(|node| doc.element(node).gml_ids())
        .map(str::to_string)
        .collect()
}

/// True if `id` or anything below it is a feature node.
pub fn contains_feature(doc: &Document, id: NodeId) -> bool {
    doc.descendants(id).any(|node| doc.element(node).is_feature())
}

/// Chain of elements from `root` down to the first element (pre-order) whose
/// `gml:id` equals `target`, both ends included.
///
/// Ids are not checked for uniqueness; when an id repeats, the earliest
/// occurrence in document order wins.
pub fn find_target_path(doc: &Document, root: NodeId, target: &str) -> Option<Vec<NodeId>> {
    let mut path = Vec::new();
    if search(doc, root, target, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn search(doc: &Document, id: NodeId, target: &str, path: &mut Vec<NodeId>) -> bool {
    path.push(id);
    if doc.element(id).gml_ids().any(|gml_id| gml_id == target) {
        return true;
    }
    for child in doc.child_elements(id) {
        if search(doc, child, target, path) {
            return true;
        }
    }
    path.pop();
    false
}
