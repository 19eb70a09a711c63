use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::archive;
use crate::delta::{self, DeltaKind};
use crate::manifest::{delta_entry_name, PatchManifest};
use crate::snapshot::{PackageSpec, Snapshot, BUNDLE_PAYLOADS};
use crate::util;
use crate::writer::PatchWriter;

/// How the old side of the diff was obtained. The classification algorithm
/// is the same either way; the mode decides what lands in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
    /// Old side is a previous update package. Unchanged entries are left
    /// implicit and removed paths are tracked as deletes.
    BundleToBundle,
    /// Old side is a platform-native app package the client has installed.
    /// Unchanged entries get an explicit same-path copy marker (the applier
    /// must still materialize them out of the native package), and nothing
    /// is deleted.
    PackageToBundle,
}

pub struct DiffRequest<'a> {
    pub old: &'a Path,
    pub new: &'a Path,
    pub output: &'a Path,
    pub algorithm: DeltaKind,
    /// Payload location and path transform for the old package.
    pub old_spec: PackageSpec,
    pub mode: DiffMode,
}

#[derive(Debug, Default)]
pub struct DiffSummary {
    pub copies: usize,
    pub deletes: usize,
    pub files_added: usize,
    pub dirs_added: usize,
    pub delta_size: usize,
}

/// Compare two packages and write a patch package to `req.output`.
///
/// The old package is indexed into a full [`Snapshot`]; the new package is
/// streamed entry by entry, each one classified and acted on immediately, so
/// only the payload bytes are ever held in memory whole.
pub fn diff_packages(req: &DiffRequest) -> Result<DiffSummary> {
    // Capability and precondition checks come before the staging file is
    // created, so nothing ever appears on disk for a doomed invocation.
    let algo = delta::resolve(req.algorithm)?;
    util::check_input_archive(req.old)?;
    util::check_input_archive(req.new)?;

    info!(old = %req.old.display(), new = %req.new.display(), algo = algo.name(), "Indexing old package");
    let mut old = Snapshot::scan(req.old, &req.old_spec)?;
    let old_payload = old.take_payload(req.old, &req.old_spec)?;

    let mut writer = PatchWriter::create(req.output)?;
    let track_deletes = req.mode == DiffMode::BundleToBundle;
    // Bundle-to-bundle manifests always carry the deletes field, empty or
    // not; package-mode manifests never do.
    let mut manifest = PatchManifest {
        copies: BTreeMap::new(),
        deletes: track_deletes.then(BTreeSet::new),
    };
    let mut summary = DiffSummary::default();
    let mut seen_new: HashSet<String> = HashSet::new();

    archive::walk_entries(req.new, &mut |meta, reader| {
        if track_deletes {
            seen_new.insert(meta.path.clone());
        }

        if meta.is_dir {
            match req.mode {
                DiffMode::BundleToBundle => {
                    if !old.has_dir(&meta.path) {
                        writer.ensure_dir_chain(&meta.path, Some(&old))?;
                    }
                }
                DiffMode::PackageToBundle => writer.add_empty_dir(&meta.path)?,
            }
            return Ok(());
        }

        // The payload always goes through the delta encoder, changed or not;
        // the applier re-derives it unconditionally.
        if BUNDLE_PAYLOADS.contains(&meta.path.as_str()) {
            let mut new_bytes = Vec::with_capacity(meta.size as usize);
            reader
                .read_to_end(&mut new_bytes)
                .with_context(|| format!("Failed to read new payload: {}", meta.path))?;

            debug!(path = %meta.path, "Encoding payload delta");
            let blob = algo.delta(&old_payload.bytes, &new_bytes)?;
            summary.delta_size = blob.len();
            return writer.add_bytes(&delta_entry_name(&meta.path), &blob);
        }

        // Unchanged in place: nothing to transmit. Bundle mode leaves it
        // implicit; package mode records the same-path marker.
        if old.fingerprint_of(&meta.path) == Some(meta.fingerprint) {
            if req.mode == DiffMode::PackageToBundle {
                manifest.copies.insert(meta.path.clone(), String::new());
            }
            return Ok(());
        }

        // Same content elsewhere in the old package: record the move. Moves
        // resolve per destination, so a path that is also an unchanged entry
        // in its own right can still serve as a copy source.
        if let Some(src) = old.path_with_fingerprint(meta.fingerprint) {
            let src = src.to_string();
            if req.mode == DiffMode::BundleToBundle {
                writer.ensure_parent_dirs(&meta.path, Some(&old))?;
            }
            debug!(dest = %meta.path, src = %src, "Copy");
            manifest.copies.insert(meta.path.clone(), src);
            return Ok(());
        }

        // Genuinely new content: carry the bytes in the patch itself.
        if req.mode == DiffMode::BundleToBundle {
            writer.ensure_parent_dirs(&meta.path, Some(&old))?;
        }
        writer.add_file_streamed(&meta.path, reader)?;
        summary.files_added += 1;
        Ok(())
    })?;

    if let Some(deletes) = manifest.deletes.as_mut() {
        for path in old.all_paths() {
            if !seen_new.contains(path) {
                debug!(path, "Delete");
                deletes.insert(path.to_string());
            }
        }
    }

    summary.copies = manifest.copies.len();
    summary.deletes = manifest.deletes.as_ref().map_or(0, BTreeSet::len);
    summary.dirs_added = writer.dirs_added();

    writer.finish_with_manifest(&manifest)?;
    info!(output = %req.output.display(), "Patch package written");
    Ok(summary)
}
