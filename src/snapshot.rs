use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use crate::archive;
use crate::error::DiffError;

/// Bundle payload names used by update packages; the old side of a diff may
/// override these per platform package type.
pub const BUNDLE_PAYLOADS: &[&str] = &["index.bundlejs", "bundle.harmony.js"];

/// Caller-supplied path rewrite applied while indexing a platform package,
/// e.g. stripping the `Payload/<App>.app/` root of an iOS archive. Returning
/// `None` drops the entry from the snapshot.
pub type PathTransform = fn(&str) -> Option<&str>;

/// How to locate the payload and name entries inside one package type.
#[derive(Clone, Copy)]
pub struct PackageSpec {
    /// Logical paths that designate the main bundle payload.
    pub payload_paths: &'static [&'static str],
    pub transform: Option<PathTransform>,
    /// Whether the payload may sit inside a flattened nested container, in
    /// which case it is matched by its inner path under the container prefix.
    pub nested_payload: bool,
}

impl PackageSpec {
    /// Plain update package (.ppk): payload at the archive root.
    pub fn bundle() -> Self {
        Self {
            payload_paths: BUNDLE_PAYLOADS,
            transform: None,
            nested_payload: false,
        }
    }

    /// Android package: payload under the assets root.
    pub fn apk() -> Self {
        Self {
            payload_paths: &["assets/index.android.bundle"],
            transform: None,
            nested_payload: false,
        }
    }

    /// HarmonyOS package: payload under the raw-resource root of a module,
    /// which ships as a nested .hap inside the .app archive.
    pub fn harmony_app() -> Self {
        Self {
            payload_paths: &["resources/rawfile/bundle.harmony.js"],
            transform: None,
            nested_payload: true,
        }
    }

    /// iOS package: payload inside the .app directory, addressed with the
    /// `Payload/<App>.app/` root stripped.
    pub fn ipa() -> Self {
        Self {
            payload_paths: &["main.jsbundle"],
            transform: Some(strip_ipa_root),
            nested_payload: false,
        }
    }

    fn rewrite<'a>(&self, name: &'a str) -> Option<&'a str> {
        match self.transform {
            Some(f) => f(name),
            None => Some(name),
        }
    }

    /// Whether a logical entry path designates the payload. Nested-payload
    /// packages match the inner path behind any container prefix, e.g.
    /// `entry.hap/resources/rawfile/bundle.harmony.js`.
    fn is_payload(&self, logical: &str) -> bool {
        self.payload_paths.iter().any(|p| {
            if logical == *p {
                return true;
            }
            self.nested_payload
                && logical.ends_with(p)
                && logical[..logical.len() - p.len()].ends_with('/')
        })
    }
}

/// Strip `Payload/<App>.app/` from an iOS package path. Paths outside the
/// app directory are dropped.
pub fn strip_ipa_root(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("Payload/")?;
    let slash = rest.find('/')?;
    let inner = &rest[slash + 1..];
    (!inner.is_empty()).then_some(inner)
}

/// Point-in-time content inventory of one package: path to fingerprint, a
/// reverse fingerprint index for move detection, directory paths for
/// existence checks, and the captured payload bytes.
#[derive(Default)]
pub struct Snapshot {
    files: HashMap<String, u32>,
    dirs: HashSet<String>,
    /// fingerprint -> representative path; last writer wins on collisions,
    /// one move source is all the planner needs.
    by_fingerprint: HashMap<u32, String>,
    payload: Option<Payload>,
}

pub struct Payload {
    pub path: String,
    pub bytes: Vec<u8>,
}

impl Snapshot {
    /// Index one package. The payload entry is the only one whose bytes are
    /// retained; everything else streams through.
    pub fn scan(path: &Path, spec: &PackageSpec) -> Result<Self> {
        let mut snap = Snapshot::default();

        archive::walk_entries(path, &mut |meta, reader| {
            let Some(logical) = spec.rewrite(&meta.path) else {
                return Ok(());
            };
            if meta.is_dir {
                snap.dirs.insert(logical.to_string());
                return Ok(());
            }
            snap.files.insert(logical.to_string(), meta.fingerprint);
            snap.by_fingerprint
                .insert(meta.fingerprint, logical.to_string());

            if spec.is_payload(logical) {
                let mut bytes = Vec::with_capacity(meta.size as usize);
                // A failed payload read leaves the entry out of the snapshot;
                // the missing-payload precondition check reports it later.
                if let Err(err) = reader.read_to_end(&mut bytes) {
                    warn!(path = logical, error = %err, "Failed to read payload entry");
                    snap.files.remove(logical);
                    snap.by_fingerprint.remove(&meta.fingerprint);
                    return Ok(());
                }
                debug!(path = logical, size = bytes.len(), "Captured payload");
                snap.payload = Some(Payload {
                    path: logical.to_string(),
                    bytes,
                });
            }
            Ok(())
        })?;

        Ok(snap)
    }

    /// The captured payload, or the precondition failure for a package that
    /// does not carry one.
    pub fn take_payload(&mut self, archive: &Path, spec: &PackageSpec) -> Result<Payload, DiffError> {
        self.payload.take().ok_or_else(|| DiffError::PayloadMissing {
            archive: archive.display().to_string(),
            expected: spec.payload_paths.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn fingerprint_of(&self, path: &str) -> Option<u32> {
        self.files.get(path).copied()
    }

    /// Representative old path for a fingerprint (move detection).
    pub fn path_with_fingerprint(&self, fingerprint: u32) -> Option<&str> {
        self.by_fingerprint.get(&fingerprint).map(String::as_str)
    }

    pub fn has_dir(&self, dir: &str) -> bool {
        self.dirs.contains(dir)
    }

    /// Every path in the snapshot, files and directories.
    pub fn all_paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str).chain(self.dirs.iter().map(String::as_str))
    }
}
