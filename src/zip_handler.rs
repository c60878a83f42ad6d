use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

use crate::filter::{filter_gml_content, FilterOptions};
use crate::profile::{gml_targets, should_include_path, FilterTree};

/// Where extracted files go: shared codelists/schemas under the artifact
/// directory, the fixture itself under the testcase directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub artifact_dir: PathBuf,
    pub testcase_dir: PathBuf,
}

impl OutputLayout {
    /// `<artifacts>/citymodel/<zip stem>` and `<testcases>/<name>/citymodel`.
    pub fn new(artifacts_root: &Path, testcases_root: &Path, zip_path: &Path, name: &str) -> Self {
        let stem = zip_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("citymodel");
        Self {
            artifact_dir: artifacts_root.join("citymodel").join(stem),
            testcase_dir: testcases_root.join(name).join("citymodel"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub artifacts: usize,
    pub copied: usize,
    pub filtered: usize,
    pub images: usize,
}

/// Archive entry picked during the first pass; contents are read later.
struct SelectedEntry {
    index: usize,
    path: String,
    relative: PathBuf,
}

struct GmlJob {
    path: String,
    relative: PathBuf,
    content: Vec<u8>,
    targets: BTreeSet<String>,
}

/// Sibling directory the fixture is assembled in. It replaces the testcase
/// directory only on [`StagingDir::commit`]; otherwise it is removed on drop.
struct StagingDir {
    path: PathBuf,
    committed: bool,
}

impl StagingDir {
    fn create(target: &Path) -> Result<Self> {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "citymodel".to_string());
        let path = target.with_file_name(format!(".{}.partial", name));
        remove_dir_if_exists(&path)?;
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
        Ok(Self {
            path,
            committed: false,
        })
    }

    fn commit(mut self, target: &Path) -> Result<()> {
        remove_dir_if_exists(target)?;
        fs::rename(&self.path, target).with_context(|| {
            format!(
                "Failed to move {} to {}",
                self.path.display(),
                target.display()
            )
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

pub struct ZipHandler {
    zip_path: PathBuf,
}

impl ZipHandler {
    pub fn new(zip_path: impl AsRef<Path>) -> Self {
        Self {
            zip_path: zip_path.as_ref().to_path_buf(),
        }
    }

    /// Builds the testcase from the archive. Nothing is left in the testcase
    /// directory unless every selected entry was processed successfully.
    pub fn extract(
        &self,
        tree: &FilterTree,
        layout: &OutputLayout,
        options: FilterOptions,
    ) -> Result<ExtractSummary> {
        let file = File::open(&self.zip_path)
            .with_context(|| format!("Failed to open ZIP file: {}", self.zip_path.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("Failed to read ZIP archive: {}", self.zip_path.display()))?;

        remove_dir_if_exists(&layout.testcase_dir)?;

        let mut artifacts = Vec::new();
        let mut gml_entries = Vec::new();
        let mut copies = Vec::new();

        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .with_context(|| format!("Failed to read ZIP entry #{}", index))?;
            if entry.is_dir() {
                continue;
            }
            let path = entry.name().to_string();
            let relative = entry
                .enclosed_name()
                .ok_or_else(|| anyhow!("Unsafe path in ZIP archive: {}", path))?;
            let targets = gml_targets(tree, &path);
            let selected = SelectedEntry {
                index,
                path,
                relative,
            };

            // codelists/ と schemas/ はテストケース間で共有する
            if selected.path.starts_with("codelists/") || selected.path.starts_with("schemas/") {
                artifacts.push(selected);
            } else if let Some(targets) = targets {
                gml_entries.push((selected, targets));
            } else if should_include_path(&selected.path, tree) {
                copies.push(selected);
            }
        }

        let staging = StagingDir::create(&layout.testcase_dir)?;
        let mut summary = ExtractSummary::default();
        info!("Filtering {} GML files", gml_entries.len());

        // 各GMLのフィルタリングは独立しているので並列で処理する。
        // 同時にメモリに載せるのはスレッド数分のエントリまで
        let batch_size = rayon::current_num_threads().max(1);
        for batch in gml_entries.chunks(batch_size) {
            let mut jobs = Vec::with_capacity(batch.len());
            for (selected, targets) in batch {
                jobs.push(GmlJob {
                    path: selected.path.clone(),
                    relative: selected.relative.clone(),
                    content: read_entry(&mut archive, selected)?,
                    targets: targets.clone(),
                });
            }

            let outputs = jobs
                .into_par_iter()
                .map(|job| {
                    let filtered = filter_gml_content(&job.content, &job.targets, options)
                        .with_context(|| format!("Failed to filter GML: {}", job.path))?;
                    Ok((job.path, job.relative, filtered))
                })
                .collect::<Result<Vec<_>>>()?;

            for (path, relative, filtered) in outputs {
                for image in &filtered.referred_images {
                    let image_path = sibling_path(&path, image);
                    extract_by_name(&mut archive, &image_path, &staging.path)?;
                    summary.images += 1;
                }
                write_file(&staging.path.join(&relative), &filtered.content)?;
                info!(
                    "Written filtered GML: {} ({} members, {} images)",
                    path,
                    filtered.members.kept,
                    filtered.referred_images.len()
                );
                summary.filtered += 1;
            }
        }

        for selected in &copies {
            let mut entry = archive
                .by_index(selected.index)
                .with_context(|| format!("Failed to read ZIP entry: {}", selected.path))?;
            copy_entry(&mut entry, &staging.path.join(&selected.relative))?;
            summary.copied += 1;
        }

        fs::create_dir_all(&layout.artifact_dir).with_context(|| {
            format!("Failed to create directory: {}", layout.artifact_dir.display())
        })?;
        for selected in &artifacts {
            let mut entry = archive
                .by_index(selected.index)
                .with_context(|| format!("Failed to read ZIP entry: {}", selected.path))?;
            copy_entry_atomic(&mut entry, &layout.artifact_dir.join(&selected.relative))?;
            summary.artifacts += 1;
        }

        staging.commit(&layout.testcase_dir)?;
        debug!("Committed testcase: {:?}", layout.testcase_dir);
        Ok(summary)
    }
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    selected: &SelectedEntry,
) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_index(selected.index)
        .with_context(|| format!("Failed to read ZIP entry: {}", selected.path))?;
    let mut content = Vec::new();
    entry
        .read_to_end(&mut content)
        .with_context(|| format!("Failed to read ZIP entry: {}", selected.path))?;
    Ok(content)
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("Removed directory: {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to clear directory: {}", path.display()))
        }
    }
}

/// Resolves an `app:imageURI` against the directory of the GML entry.
fn sibling_path(gml_path: &str, image: &str) -> String {
    match gml_path.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, image),
        None => image.to_string(),
    }
}

fn extract_by_name<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
    dest_dir: &Path,
) -> Result<()> {
    let mut entry = archive
        .by_name(path)
        .with_context(|| format!("Referred image not found in ZIP: {}", path))?;
    let relative = entry
        .enclosed_name()
        .ok_or_else(|| anyhow!("Unsafe path in ZIP archive: {}", path))?;
    copy_entry(&mut entry, &dest_dir.join(relative))
}

fn copy_entry(reader: &mut impl Read, output_path: &Path) -> Result<()> {
    create_parent(output_path)?;
    let mut out = File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;
    io::copy(reader, &mut out)
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;
    Ok(())
}

/// Shared artifacts are written under a temporary name and renamed into place,
/// so a failed run never leaves a truncated codelist or schema behind.
fn copy_entry_atomic(reader: &mut impl Read, output_path: &Path) -> Result<()> {
    let mut partial = output_path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);
    copy_entry(reader, &partial)?;
    fs::rename(&partial, output_path)
        .with_context(|| format!("Failed to write file: {}", output_path.display()))
}

fn write_file(output_path: &Path, data: &[u8]) -> Result<()> {
    create_parent(output_path)?;
    fs::write(output_path, data)
        .with_context(|| format!("Failed to write file: {}", output_path.display()))
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}
