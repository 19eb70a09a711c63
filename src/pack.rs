use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::writer::PatchWriter;

/// Bundler byproducts that never ship inside an update package.
const EXCLUDED_NAMES: &[&str] = &["index.bundlejs.map"];

pub struct PackSummary {
    pub files: usize,
    pub dirs: usize,
}

/// Zip a bundle output directory into an update package archive.
///
/// Directory entries are emitted parent-before-child (walk order), paths use
/// forward slashes, and the archive is staged and renamed into place like a
/// patch package.
pub fn pack_bundle(dir: &Path, output: &Path) -> Result<PackSummary> {
    let root = dir
        .canonicalize()
        .with_context(|| format!("Bundle directory not found: {}", dir.display()))?;

    let mut writer = PatchWriter::create(output)?;
    let mut summary = PackSummary { files: 0, dirs: 0 };

    for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
        let entry = entry
            .with_context(|| format!("Failed to read bundle directory: {}", root.display()))?;

        let name = entry.file_name().to_str().unwrap_or("");
        if EXCLUDED_NAMES.contains(&name) {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(&root)
            .context("Failed to compute relative path")?
            .to_str()
            .with_context(|| format!("Non-UTF8 path: {}", entry.path().display()))?
            .replace('\\', "/");

        if entry.file_type().is_dir() {
            debug!(path = %rel, "Packing directory");
            writer.add_empty_dir(&format!("{rel}/"))?;
            summary.dirs += 1;
        } else {
            debug!(path = %rel, "Packing file");
            let mut file = std::fs::File::open(entry.path())
                .with_context(|| format!("Failed to open: {}", entry.path().display()))?;
            writer.add_file_streamed(&rel, &mut file)?;
            summary.files += 1;
        }
    }

    writer.finish()?;
    info!(output = %output.display(), "Update package written");
    Ok(summary)
}
