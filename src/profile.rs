use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Testcase profile. Sections used by other tools (comparison settings etc.)
/// are ignored here.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub citygml_zip_name: String,
    #[serde(default)]
    pub filter: FilterSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterSection {
    #[serde(default)]
    pub tree: FilterTree,
}

pub type FilterTree = BTreeMap<String, TreeEntry>;

/// A `filter.tree` value. Only lists of strings mean anything: for a GML path
/// they are target gml:ids, for a directory prefix they are path prefixes to copy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TreeEntry {
    Items(Vec<String>),
    Other(toml::Value),
}

impl TreeEntry {
    pub fn items(&self) -> Option<&[String]> {
        match self {
            TreeEntry::Items(items) => Some(items),
            TreeEntry::Other(_) => None,
        }
    }
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid profile: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse profile TOML")
    }
}

/// Target ids for an archive entry, if the tree lists it explicitly.
pub fn gml_targets(tree: &FilterTree, path: &str) -> Option<BTreeSet<String>> {
    tree.get(path)
        .and_then(TreeEntry::items)
        .map(|items| items.iter().cloned().collect())
}

/// True if some `prefix = [items...]` entry covers `path`, i.e. `path` starts
/// with `prefix` and the remainder starts with one of the items.
pub fn should_include_path(path: &str, tree: &FilterTree) -> bool {
    tree.iter().any(|(prefix, entry)| {
        let Some(items) = entry.items() else {
            return false;
        };
        path.strip_prefix(prefix.as_str())
            .is_some_and(|rest| items.iter().any(|item| rest.starts_with(item.as_str())))
    })
}

/// Testcase name for a profile: its directory relative to `testcases_root`
/// ("area/bldg_lod2"), or just the directory name when it lives elsewhere.
pub fn testcase_name(profile_path: &Path, testcases_root: &Path) -> Option<String> {
    let parent = profile_path.parent()?;
    if let Ok(relative) = parent.strip_prefix(testcases_root) {
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if !parts.is_empty() {
            return Some(parts.join("/"));
        }
    }
    parent.file_name().map(|name| name.to_string_lossy().into_owned())
}
