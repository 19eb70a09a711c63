use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Reserved manifest entry name inside a patch package. Leading underscores
/// keep it out of the way of real application paths.
pub const MANIFEST_NAME: &str = "__diff.json";

/// Suffix appended to the payload entry name for its delta blob.
pub const DELTA_SUFFIX: &str = ".patch";

/// The structural-change record a patch applier consumes.
///
/// `copies` maps each destination path in the new snapshot to the old
/// snapshot path it should be materialized from; an empty string means "same
/// path, no move". `deletes` lists old paths with no counterpart in the new
/// snapshot; bundle-to-bundle patches always carry the field, empty or not,
/// while native-package patches omit it entirely (nothing is ever deleted
/// out of an installed package). Added files and the payload delta are not
/// listed; the applier finds them in the patch archive by convention.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PatchManifest {
    pub copies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletes: Option<BTreeSet<String>>,
}

impl PatchManifest {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize patch manifest")
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("Failed to parse patch manifest")
    }
}

/// Patch entry name for a given payload path, e.g. `index.bundlejs.patch`.
pub fn delta_entry_name(payload_path: &str) -> String {
    format!("{payload_path}{DELTA_SUFFIX}")
}
