use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::manifest::{PatchManifest, MANIFEST_NAME};
use crate::snapshot::Snapshot;

/// Assembles an output archive in a single forward pass.
///
/// All writes go to a staging temp file next to the final path; the archive
/// only appears at `output` once `finish` has completed every prior step, so
/// a crash mid-write never leaves a half-built patch behind.
pub struct PatchWriter {
    zip: ZipWriter<File>,
    staging: TempPath,
    output: PathBuf,
    added_dirs: HashSet<String>,
}

impl PatchWriter {
    pub fn create(output: &Path) -> Result<Self> {
        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => {
                std::fs::create_dir_all(p).with_context(|| {
                    format!("Failed to create output directory: {}", p.display())
                })?;
                p
            }
            _ => Path::new("."),
        };

        let staging = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create staging file for patch package")?;
        let (file, temp_path) = staging.into_parts();

        Ok(Self {
            zip: ZipWriter::new(file),
            staging: temp_path,
            output: output.to_path_buf(),
            added_dirs: HashSet::new(),
        })
    }

    fn options() -> SimpleFileOptions {
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
    }

    /// Add one empty-directory marker, deduplicated. `dir` carries its
    /// trailing slash.
    pub fn add_empty_dir(&mut self, dir: &str) -> Result<()> {
        if !self.added_dirs.insert(dir.to_string()) {
            return Ok(());
        }
        debug!(path = dir, "Adding directory");
        self.zip
            .add_directory(dir.trim_end_matches('/'), Self::options())
            .with_context(|| format!("Failed to add directory: {dir}"))?;
        Ok(())
    }

    /// Emit every ancestor of `dir` (and `dir` itself) that the old snapshot
    /// does not already have, shortest prefix first so parents land before
    /// children.
    pub fn ensure_dir_chain(&mut self, dir: &str, old: Option<&Snapshot>) -> Result<()> {
        let mut idx = 0;
        while let Some(pos) = dir[idx..].find('/') {
            let end = idx + pos + 1;
            let prefix = &dir[..end];
            idx = end;

            if self.added_dirs.contains(prefix) {
                continue;
            }
            if old.is_some_and(|snap| snap.has_dir(prefix)) {
                continue;
            }
            let owned = prefix.to_string();
            self.add_empty_dir(&owned)?;
        }
        Ok(())
    }

    /// Ensure the directory skeleton above a file path exists in the output.
    pub fn ensure_parent_dirs(&mut self, file_path: &str, old: Option<&Snapshot>) -> Result<()> {
        if let Some(parent) = parent_dir(file_path) {
            let owned = parent.to_string();
            self.ensure_dir_chain(&owned, old)?;
        }
        Ok(())
    }

    pub fn add_file_streamed(&mut self, path: &str, reader: &mut dyn Read) -> Result<u64> {
        debug!(path, "Adding file");
        self.zip
            .start_file(path, Self::options())
            .with_context(|| format!("Failed to start file entry: {path}"))?;
        match std::io::copy(reader, &mut self.zip) {
            Ok(written) => Ok(written),
            Err(err) => {
                // Roll the started entry back out so a skipped source leaves
                // no half-written trace in the archive.
                self.zip
                    .abort_file()
                    .with_context(|| format!("Failed to roll back file entry: {path}"))?;
                Err(err).with_context(|| format!("Failed to write file entry: {path}"))
            }
        }
    }

    /// Number of empty-directory markers written so far.
    pub fn dirs_added(&self) -> usize {
        self.added_dirs.len()
    }

    pub fn add_bytes(&mut self, path: &str, bytes: &[u8]) -> Result<()> {
        self.add_file_streamed(path, &mut std::io::Cursor::new(bytes))?;
        Ok(())
    }

    /// Write the manifest as the archive's last entry, then finalize.
    pub fn finish_with_manifest(mut self, manifest: &PatchManifest) -> Result<()> {
        let json = manifest.to_json()?;
        self.add_bytes(MANIFEST_NAME, &json)?;
        self.finish()
    }

    /// Close the archive and move it to the final output path.
    pub fn finish(self) -> Result<()> {
        self.zip
            .finish()
            .context("Failed to finalize patch package")?;
        self.staging
            .persist(&self.output)
            .with_context(|| format!("Failed to move patch package to: {}", self.output.display()))?;
        Ok(())
    }
}

/// Parent directory of a logical path, trailing slash included:
/// `assets/icon.png` -> `assets/`, `a/b/` -> `a/`, `top.txt` -> None.
pub fn parent_dir(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    Some(&path[..=idx])
}
