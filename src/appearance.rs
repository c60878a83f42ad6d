use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::error::{FilterError, Result};
use crate::model::{attr_values, Child, Document, NodeId};

pub const APPEARANCE_MEMBER: &str = "app:appearanceMember";
pub const APPEARANCE: &str = "app:Appearance";
pub const SURFACE_DATA_MEMBER: &str = "app:surfaceDataMember";
pub const TARGET: &str = "app:target";
pub const IMAGE_URI: &str = "app:imageURI";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppearanceReport {
    pub kept_targets: usize,
    pub removed_targets: usize,
    pub removed_surface_data: usize,
    /// `app:imageURI` values of surface data that still has a target.
    pub referred_images: BTreeSet<String>,
}

/// Drops `app:target` references to ids outside `referred_ids`, removes surface
/// data left without targets and collects the textures still in use.
pub fn filter_appearances(doc: &mut Document, referred_ids: &BTreeSet<String>) -> Result<AppearanceReport> {
    let mut report = AppearanceReport::default();
    let members: Vec<NodeId> = doc
        .child_elements(doc.root())
        .filter(|&id| doc.element(id).tag == APPEARANCE_MEMBER)
        .collect();

    for member in members {
        let appearance = doc.only_element_child(member)?;
        if doc.element(appearance).tag != APPEARANCE {
            return Err(FilterError::structure(format!(
                "unexpected <{}> in {}",
                doc.element(appearance).tag,
                APPEARANCE_MEMBER
            )));
        }
        filter_appearance(doc, appearance, referred_ids, &mut report)?;
    }

    info!(
        "<{}> kept: {} removed: {}",
        TARGET, report.kept_targets, report.removed_targets
    );
    info!(
        "<{}> removed: {}",
        SURFACE_DATA_MEMBER, report.removed_surface_data
    );
    for image in &report.referred_images {
        debug!("referred image: {}", image);
    }
    Ok(report)
}

fn filter_appearance(
    doc: &mut Document,
    appearance: NodeId,
    referred_ids: &BTreeSet<String>,
    report: &mut AppearanceReport,
) -> Result<()> {
    let children = doc.element(appearance).children.clone();
    let mut retained = Vec::with_capacity(children.len());

    for child in children {
        let Child::Element(member) = child else {
            return Err(FilterError::structure(format!(
                "<{}> has a text child",
                APPEARANCE
            )));
        };
        if doc.element(member).tag != SURFACE_DATA_MEMBER {
            retained.push(child);
            continue;
        }

        let surface_data = doc.only_element_child(member)?;
        if filter_surface_data(doc, surface_data, referred_ids, report)? {
            retained.push(child);
        } else {
            report.removed_surface_data += 1;
        }
    }

    doc.element_mut(appearance).children = retained;
    Ok(())
}

/// Filters the targets of one `ParameterizedTexture`/`X3DMaterial`/...
/// Returns whether any target survived.
fn filter_surface_data(
    doc: &mut Document,
    surface_data: NodeId,
    referred_ids: &BTreeSet<String>,
    report: &mut AppearanceReport,
) -> Result<bool> {
    let children = doc.element(surface_data).children.clone();
    let mut retained = Vec::with_capacity(children.len());
    let mut images = Vec::new();
    let mut kept = 0;

    for child in children {
        let Child::Element(id) = child else {
            return Err(FilterError::structure(format!(
                "<{}> has a text child",
                doc.element(surface_data).tag
            )));
        };
        match doc.element(id).tag.as_str() {
            TARGET => {
                let reference = target_reference(doc, id)?;
                let referred = reference.strip_prefix('#').unwrap_or(&reference);
                if referred_ids.contains(referred) {
                    kept += 1;
                    retained.push(child);
                } else {
                    report.removed_targets += 1;
                }
            }
            IMAGE_URI => {
                images.push(doc.only_text_child(id)?.to_string());
                retained.push(child);
            }
            _ => retained.push(child),
        }
    }

    report.kept_targets += kept;
    if kept > 0 {
        report.referred_images.extend(images);
    }
    doc.element_mut(surface_data).children = retained;
    Ok(kept > 0)
}

/// `uri="#id"` when present, otherwise the `#id` text content.
fn target_reference(doc: &Document, target: NodeId) -> Result<String> {
    let element = doc.element(target);
    match attr_values(&element.attrs, "uri").next() {
        Some(uri) => Ok(uri.to_string()),
        None => Ok(doc.only_text_child(target)?.to_string()),
    }
}
