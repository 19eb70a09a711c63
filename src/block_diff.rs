use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::rolling_hash::RollingChecksum;

/// Self-describing header of a block delta blob. An applier that sees this
/// magic knows the blob is a zstd-compressed bincode chunk list.
pub const MAGIC: &[u8; 8] = b"PPKBLK01";

pub const BLOCK_SIZE: usize = 4096;

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum DeltaChunk {
    /// Take `length` bytes from `offset` in the old payload.
    Copy { offset: u64, length: u64 },
    /// Literal bytes present only in the new payload.
    Insert { data: Vec<u8> },
}

struct BlockSignature {
    rolling: u32,
    strong: blake3::Hash,
    offset: u64,
}

/// Encode a reversible delta from `old` to `new` as one self-contained blob.
///
/// Block-matching scheme (rsync-like):
/// 1. Split the old payload into fixed-size blocks and sign each one
/// 2. Index signatures by rolling checksum
/// 3. Slide a window over the new payload, probing the index
/// 4. Emit Copy chunks for matches, Insert chunks for everything else
pub fn encode(old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
    let chunks = compute_chunks(old, new);
    let encoded = bincode::serialize(&chunks).context("Failed to serialize block delta")?;
    let compressed =
        zstd::bulk::compress(&encoded, ZSTD_LEVEL).context("Failed to compress block delta")?;

    let mut blob = Vec::with_capacity(MAGIC.len() + compressed.len());
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&compressed);
    Ok(blob)
}

/// Reconstruct the new payload from the old payload and a blob produced by
/// [`encode`].
pub fn apply(old: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < MAGIC.len() || &blob[..MAGIC.len()] != MAGIC {
        bail!("Invalid block delta: missing magic header");
    }
    let decoded = zstd::decode_all(&blob[MAGIC.len()..])
        .context("Failed to decompress block delta")?;
    let chunks: Vec<DeltaChunk> =
        bincode::deserialize(&decoded).context("Failed to deserialize block delta")?;

    let estimated: u64 = chunks
        .iter()
        .map(|c| match c {
            DeltaChunk::Copy { length, .. } => *length,
            DeltaChunk::Insert { data } => data.len() as u64,
        })
        .sum();
    let mut out = Vec::with_capacity(estimated as usize);

    for chunk in &chunks {
        match chunk {
            DeltaChunk::Copy { offset, length } => {
                let start = *offset as usize;
                let end = start
                    .checked_add(*length as usize)
                    .filter(|&e| e <= old.len())
                    .context("Block delta copy range exceeds old payload")?;
                out.extend_from_slice(&old[start..end]);
            }
            DeltaChunk::Insert { data } => out.extend_from_slice(data),
        }
    }

    Ok(out)
}

fn compute_chunks(old: &[u8], new: &[u8]) -> Vec<DeltaChunk> {
    if old.is_empty() {
        if new.is_empty() {
            return vec![];
        }
        return vec![DeltaChunk::Insert { data: new.to_vec() }];
    }

    let signatures = build_signatures(old);
    let mut table: HashMap<u32, Vec<usize>> = HashMap::with_capacity(signatures.len());
    for (idx, sig) in signatures.iter().enumerate() {
        table.entry(sig.rolling).or_default().push(idx);
    }

    match_blocks(old, new, &table, &signatures)
}

fn build_signatures(data: &[u8]) -> Vec<BlockSignature> {
    // Signature hashing is the CPU-heavy part of encoding; blocks are
    // independent, so hash them in parallel.
    data.par_chunks(BLOCK_SIZE)
        .enumerate()
        .map(|(i, block)| BlockSignature {
            rolling: RollingChecksum::from_block(block).digest(),
            strong: blake3::hash(block),
            offset: (i * BLOCK_SIZE) as u64,
        })
        .collect()
}

fn match_blocks(
    old: &[u8],
    new: &[u8],
    table: &HashMap<u32, Vec<usize>>,
    signatures: &[BlockSignature],
) -> Vec<DeltaChunk> {
    if new.len() < BLOCK_SIZE {
        return vec![DeltaChunk::Insert { data: new.to_vec() }];
    }

    let mut chunks: Vec<DeltaChunk> = Vec::new();
    let mut insert_buf: Vec<u8> = Vec::new();
    let mut rolling = RollingChecksum::from_block(&new[..BLOCK_SIZE]);
    let mut pos: usize = 0;

    while pos + BLOCK_SIZE <= new.len() {
        let window = &new[pos..pos + BLOCK_SIZE];

        if let Some((offset, length)) = find_match(rolling.digest(), window, old, table, signatures)
        {
            if !insert_buf.is_empty() {
                chunks.push(DeltaChunk::Insert {
                    data: std::mem::take(&mut insert_buf),
                });
            }
            chunks.push(DeltaChunk::Copy { offset, length });

            pos += length as usize;
            if pos + BLOCK_SIZE <= new.len() {
                rolling = RollingChecksum::from_block(&new[pos..pos + BLOCK_SIZE]);
            }
        } else {
            insert_buf.push(new[pos]);
            pos += 1;
            if pos + BLOCK_SIZE <= new.len() {
                rolling.slide(new[pos - 1], new[pos + BLOCK_SIZE - 1]);
            }
        }
    }

    if pos < new.len() {
        insert_buf.extend_from_slice(&new[pos..]);
    }
    if !insert_buf.is_empty() {
        chunks.push(DeltaChunk::Insert { data: insert_buf });
    }

    chunks
}

/// Probe the signature index for the current window. Returns
/// `(old_offset, length)` when a block with the same strong hash exists.
fn find_match(
    rolling_digest: u32,
    window: &[u8],
    old: &[u8],
    table: &HashMap<u32, Vec<usize>>,
    signatures: &[BlockSignature],
) -> Option<(u64, u64)> {
    let candidates = table.get(&rolling_digest)?;
    let strong = blake3::hash(window);

    for &idx in candidates {
        let sig = &signatures[idx];
        if sig.strong == strong {
            let end = (sig.offset as usize + BLOCK_SIZE).min(old.len());
            return Some((sig.offset, (end - sig.offset as usize) as u64));
        }
    }
    None
}
