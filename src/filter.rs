//! Two-round CityGML filtering.
//!
//! Round 1 keeps the `core:cityObjectMember` entries that reach a target id and
//! prunes unrelated sub-features from them. Round 2 rewrites appearance data so
//! it only refers to ids that survived round 1.

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::appearance::{filter_appearances, AppearanceReport};
use crate::error::{FilterError, Result};
use crate::index::collect_gml_ids;
use crate::model::{Child, Document};
use crate::parser::parse_document;
use crate::prune::prune_to_targets;
use crate::verify::ensure_well_formed;
use crate::writer::GmlWriter;

pub const CITY_MODEL: &str = "core:CityModel";
pub const CITY_OBJECT_MEMBER: &str = "core:cityObjectMember";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberReport {
    pub kept: usize,
    pub removed: usize,
    /// Every `gml:id` inside the kept members, after pruning.
    pub referred_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilterOptions {
    /// Re-read the serialized output with `quick-xml` before returning it.
    pub verify_output: bool,
}

#[derive(Debug, Clone)]
pub struct FilteredGml {
    pub content: Vec<u8>,
    pub referred_images: BTreeSet<String>,
    pub members: MemberReport,
    pub appearances: AppearanceReport,
}

/// Round 1: filters the direct children of the city model in place.
pub fn filter_members(doc: &mut Document, targets: &BTreeSet<String>) -> Result<MemberReport> {
    let root = doc.root();
    if doc.element(root).tag != CITY_MODEL {
        return Err(FilterError::structure(format!(
            "unexpected root tag: {}",
            doc.element(root).tag
        )));
    }

    let mut report = MemberReport::default();
    let toplevels = std::mem::take(&mut doc.element_mut(root).children);
    let mut retained = Vec::with_capacity(toplevels.len());

    for toplevel in toplevels {
        let Child::Element(member) = toplevel else {
            return Err(FilterError::structure(format!(
                "<{}> has a text child",
                CITY_MODEL
            )));
        };
        if doc.element(member).tag != CITY_OBJECT_MEMBER {
            retained.push(toplevel);
            continue;
        }

        let city_object = doc.only_element_child(member)?;
        let targeted = doc
            .element(city_object)
            .gml_ids()
            .any(|id| targets.contains(id));

        if targeted || prune_to_targets(doc, city_object, targets) {
            report.kept += 1;
            report.referred_ids.extend(collect_gml_ids(doc, city_object));
            retained.push(toplevel);
        } else {
            report.removed += 1;
        }
    }

    doc.element_mut(root).children = retained;
    info!(
        "<{}> kept: {} removed: {}",
        CITY_OBJECT_MEMBER, report.kept, report.removed
    );
    info!("referred gml:ids: {}", report.referred_ids.len());
    Ok(report)
}

/// Filters one GML entry down to the members reachable from `targets`.
///
/// Returns the re-serialized document together with the texture images that
/// remain referenced. Any parse or structure problem aborts the whole call.
pub fn filter_gml_content(
    content: &[u8],
    targets: &BTreeSet<String>,
    options: FilterOptions,
) -> Result<FilteredGml> {
    let text = std::str::from_utf8(content)?;
    let mut doc = parse_document(text)?;
    debug!(
        "header: {:?} root: <{}>",
        doc.header(),
        doc.element(doc.root()).tag
    );

    let members = filter_members(&mut doc, targets)?;
    for missing in targets.iter().filter(|id| !members.referred_ids.contains(*id)) {
        warn!("gml:id not found: {}", missing);
    }

    let appearances = filter_appearances(&mut doc, &members.referred_ids)?;

    let output = GmlWriter::new().write(&doc);
    if options.verify_output {
        ensure_well_formed(&output)?;
    }

    Ok(FilteredGml {
        content: output.into_bytes(),
        referred_images: appearances.referred_images.clone(),
        members,
        appearances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    const SCENARIO_A: &str = r#"<core:CityModel><core:cityObjectMember><bldg:Building gml:id="B1"><bldg:lod2Solid><gml:Solid gml:id="S1">x</gml:Solid></bldg:lod2Solid><bldg:consistsOfBuildingPart><bldg:BuildingPart gml:id="B1_P1">y</bldg:BuildingPart></bldg:consistsOfBuildingPart></bldg:Building></core:cityObjectMember></core:CityModel>"#;

    const CITY: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<core:CityModel xmlns:core="http://www.opengis.net/citygml/2.0">
  <gml:boundedBy><gml:Envelope srsName="EPSG:6697"><gml:lowerCorner>0 0 0</gml:lowerCorner></gml:Envelope></gml:boundedBy>
  <core:cityObjectMember>
    <bldg:Building gml:id="B1">
      <bldg:lod2Solid><gml:Solid gml:id="B1_S"><gml:exterior>a</gml:exterior></gml:Solid></bldg:lod2Solid>
    </bldg:Building>
  </core:cityObjectMember>
  <core:cityObjectMember>
    <bldg:Building gml:id="B2">
      <bldg:lod2Solid><gml:Solid gml:id="B2_S"><gml:exterior>b</gml:exterior></gml:Solid></bldg:lod2Solid>
    </bldg:Building>
  </core:cityObjectMember>
  <app:appearanceMember>
    <app:Appearance>
      <app:surfaceDataMember>
        <app:ParameterizedTexture>
          <app:imageURI>tex/a.jpg</app:imageURI>
          <app:target uri="#B1_S">c</app:target>
          <app:target uri="#B2_S">c</app:target>
        </app:ParameterizedTexture>
      </app:surfaceDataMember>
      <app:surfaceDataMember>
        <app:ParameterizedTexture>
          <app:imageURI>tex/b.jpg</app:imageURI>
          <app:target uri="#B2_S">c</app:target>
        </app:ParameterizedTexture>
      </app:surfaceDataMember>
    </app:Appearance>
  </app:appearanceMember>
</core:CityModel>
"##;

    #[test]
    fn test_nested_target_retains_member() {
        let mut doc = parse_document(SCENARIO_A).unwrap();
        let report = filter_members(&mut doc, &ids(&["B1_P1"])).unwrap();

        assert_eq!(report.kept, 1);
        assert_eq!(report.removed, 0);
        assert_eq!(report.referred_ids, ids(&["B1", "S1", "B1_P1"]));

        let out = GmlWriter::new().write(&doc);
        assert!(out.contains("<bldg:lod2Solid>\n<gml:Solid gml:id=\"S1\">x</gml:Solid>\n</bldg:lod2Solid>"));
        assert!(out.contains("<bldg:consistsOfBuildingPart>\n<bldg:BuildingPart gml:id=\"B1_P1\">y</bldg:BuildingPart>"));
    }

    #[test]
    fn test_direct_target_keeps_member_unpruned() {
        let xml = r#"<core:CityModel><core:cityObjectMember><bldg:Building gml:id="B1"><bldg:consistsOfBuildingPart><bldg:BuildingPart gml:id="P1"/></bldg:consistsOfBuildingPart><bldg:consistsOfBuildingPart><bldg:BuildingPart gml:id="P2"/></bldg:consistsOfBuildingPart></bldg:Building></core:cityObjectMember></core:CityModel>"#;
        let mut doc = parse_document(xml).unwrap();
        let report = filter_members(&mut doc, &ids(&["B1", "P1"])).unwrap();

        assert_eq!(report.referred_ids, ids(&["B1", "P1", "P2"]));
    }

    #[test]
    fn test_any_of_several_ids_targets_member() {
        let xml = r#"<core:CityModel><core:cityObjectMember><bldg:Building gml:id="X" gml:id="B1"><bldg:consistsOfBuildingPart><bldg:BuildingPart gml:id="P1"/></bldg:consistsOfBuildingPart></bldg:Building></core:cityObjectMember></core:CityModel>"#;
        let mut doc = parse_document(xml).unwrap();
        let report = filter_members(&mut doc, &ids(&["B1"])).unwrap();

        assert_eq!(report.kept, 1);
        assert!(report.referred_ids.contains("P1"));
    }

    #[test]
    fn test_unmatched_member_dropped() {
        let mut doc = parse_document(CITY).unwrap();
        let report = filter_members(&mut doc, &ids(&["B2"])).unwrap();
        assert_eq!(report.kept, 1);
        assert_eq!(report.removed, 1);
        assert!(!report.referred_ids.contains("B1"));
        assert!(!report.referred_ids.contains("B1_S"));

        let mut doc = parse_document(CITY).unwrap();
        let report = filter_members(&mut doc, &BTreeSet::new()).unwrap();
        assert_eq!(report.kept, 0);
        assert_eq!(report.removed, 2);
        assert!(report.referred_ids.is_empty());
        // boundedBy and appearanceMember pass through round 1
        assert_eq!(doc.element(doc.root()).children.len(), 2);
    }

    #[test]
    fn test_wrong_root_is_fatal() {
        let mut doc = parse_document("<gml:FeatureCollection/>").unwrap();
        let err = filter_members(&mut doc, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, FilterError::Structure(_)));
    }

    #[test]
    fn test_member_arity_is_fatal() {
        let xml = "<core:CityModel><core:cityObjectMember><a gml:id=\"1\"/><b gml:id=\"2\"/></core:cityObjectMember></core:CityModel>";
        let mut doc = parse_document(xml).unwrap();
        assert!(filter_members(&mut doc, &ids(&["1"])).is_err());

        let xml = "<core:CityModel><core:cityObjectMember/></core:CityModel>";
        let mut doc = parse_document(xml).unwrap();
        assert!(filter_members(&mut doc, &ids(&["1"])).is_err());
    }

    #[test]
    fn test_filter_gml_content_end_to_end() {
        let result = filter_gml_content(
            CITY.as_bytes(),
            &ids(&["B1", "missing"]),
            FilterOptions {
                verify_output: true,
            },
        )
        .unwrap();

        assert_eq!(result.referred_images, ids(&["tex/a.jpg"]));
        assert_eq!(result.members.kept, 1);
        assert_eq!(result.appearances.kept_targets, 1);
        assert_eq!(result.appearances.removed_targets, 2);
        assert_eq!(result.appearances.removed_surface_data, 1);

        let out = String::from_utf8(result.content).unwrap();
        assert!(out.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(out.contains(r#"gml:id="B1""#));
        assert!(!out.contains(r#"gml:id="B2""#));
        assert!(!out.contains("#B2_S"));
        assert!(!out.contains("tex/b.jpg"));
        assert!(out.contains("<gml:lowerCorner>0 0 0</gml:lowerCorner>"));
    }

    #[test]
    fn test_refiltering_is_idempotent() {
        let targets = ids(&["B2_S"]);
        let first = filter_gml_content(CITY.as_bytes(), &targets, FilterOptions::default()).unwrap();
        let second =
            filter_gml_content(&first.content, &targets, FilterOptions::default()).unwrap();

        assert_eq!(first.members.referred_ids, second.members.referred_ids);
        assert_eq!(first.referred_images, second.referred_images);
        assert_eq!(first.content, second.content);
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        let err = filter_gml_content(&[0xff, 0xfe, b'<'], &BTreeSet::new(), FilterOptions::default())
            .unwrap_err();
        assert!(matches!(err, FilterError::Encoding(_)));

        let err = filter_gml_content(
            b"<core:CityModel><core:cityObjectMember>",
            &BTreeSet::new(),
            FilterOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::Parse(_)));
    }
}
