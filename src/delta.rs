use anyhow::Result;

use crate::block_diff;
use crate::error::DiffError;

/// Delta algorithm selected by the caller. The patch applier must be told
/// which algorithm produced a blob, so there is no silent fallback between
/// them: an unavailable selection is a fatal capability error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DeltaKind {
    /// Byte-level binary diff (bsdiff).
    Bsdiff,
    /// Block-level structural diff (rolling-hash block matcher).
    Block,
}

/// One delta computation: `delta` of (old, new) plus `old` must be enough to
/// reconstruct `new` exactly.
pub trait DeltaAlgorithm: Sync {
    fn name(&self) -> &'static str;
    fn delta(&self, old: &[u8], new: &[u8]) -> Result<Vec<u8>>;
    fn apply(&self, old: &[u8], delta: &[u8]) -> Result<Vec<u8>>;
}

/// Look up the implementation for a selected algorithm.
///
/// The registry is fixed at compile time; resolution happens once per
/// invocation, before any output is created.
pub fn resolve(kind: DeltaKind) -> Result<&'static dyn DeltaAlgorithm, DiffError> {
    match kind {
        DeltaKind::Block => Ok(&BlockDelta),
        DeltaKind::Bsdiff => {
            #[cfg(feature = "bsdiff")]
            {
                Ok(&BsdiffDelta)
            }
            #[cfg(not(feature = "bsdiff"))]
            {
                Err(DiffError::AlgorithmUnavailable("bsdiff"))
            }
        }
    }
}

struct BlockDelta;

impl DeltaAlgorithm for BlockDelta {
    fn name(&self) -> &'static str {
        "block"
    }

    fn delta(&self, old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
        block_diff::encode(old, new)
    }

    fn apply(&self, old: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
        block_diff::apply(old, delta)
    }
}

#[cfg(feature = "bsdiff")]
struct BsdiffDelta;

/// Raw bsdiff control/diff/extra streams are highly compressible, so the blob
/// carries them zstd-compressed behind a magic header, mirroring the block
/// delta container.
#[cfg(feature = "bsdiff")]
const BSDIFF_MAGIC: &[u8; 8] = b"PPKBSD01";

#[cfg(feature = "bsdiff")]
impl DeltaAlgorithm for BsdiffDelta {
    fn name(&self) -> &'static str {
        "bsdiff"
    }

    fn delta(&self, old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
        use anyhow::Context;

        let mut patch = Vec::new();
        bsdiff::diff(old, new, &mut patch).context("bsdiff encoding failed")?;
        let compressed =
            zstd::bulk::compress(&patch, 3).context("Failed to compress bsdiff delta")?;

        let mut blob = Vec::with_capacity(BSDIFF_MAGIC.len() + compressed.len());
        blob.extend_from_slice(BSDIFF_MAGIC);
        blob.extend_from_slice(&compressed);
        Ok(blob)
    }

    fn apply(&self, old: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
        use anyhow::Context;

        anyhow::ensure!(
            delta.len() >= BSDIFF_MAGIC.len() && &delta[..BSDIFF_MAGIC.len()] == BSDIFF_MAGIC,
            "Invalid bsdiff delta: missing magic header"
        );
        let patch = zstd::decode_all(&delta[BSDIFF_MAGIC.len()..])
            .context("Failed to decompress bsdiff delta")?;
        let mut new = Vec::new();
        bsdiff::patch(old, &mut patch.as_slice(), &mut new).context("bsdiff patch failed")?;
        Ok(new)
    }
}
