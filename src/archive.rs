use anyhow::{Context, Result};
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use tempfile::TempPath;
use tracing::warn;
use zip::ZipArchive;

use crate::util;

/// Containers that get flattened into the enclosing package's path space.
const NESTED_EXTENSIONS: &[&str] = &["hap"];

/// Defensive cap on container-in-container nesting. Frames past this depth
/// are treated as opaque files rather than descended into.
pub const MAX_NESTING: usize = 4;

/// One item of a package, as seen after flattening nested containers.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    /// Logical forward-slash path; nested entries carry their container's
    /// path as a prefix. Directories keep their trailing slash.
    pub path: String,
    pub is_dir: bool,
    /// CRC32 of the entry content, straight from the central directory.
    pub fingerprint: u32,
    pub size: u64,
}

trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// One level of the traversal: an open container plus the logical prefix its
/// entries live under. The temp path (for nested containers) is removed when
/// the frame is popped, whatever happened inside it.
struct Frame {
    archive: ZipArchive<Box<dyn ReadSeek>>,
    prefix: String,
    next_index: usize,
    _temp: Option<TempPath>,
}

/// Why one enumeration step failed. Entry-level trouble (bad local header,
/// failed nested extraction, a CRC or decompression error while the visitor
/// consumes the entry) is recovered by skipping the entry; an error the
/// visitor raises on its own aborts the whole enumeration, since visitors do
/// the output writing.
enum StepError {
    Entry(anyhow::Error),
    Visitor(anyhow::Error),
}

/// Reader wrapper that remembers whether the underlying source failed, so a
/// visitor error caused by a bad entry can be told apart from an
/// output-write failure.
struct TrackedReader<'a> {
    inner: &'a mut dyn Read,
    failed: bool,
}

impl Read for TrackedReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let res = self.inner.read(buf);
        if res.is_err() {
            self.failed = true;
        }
        res
    }
}

fn visit_tracked(
    visit: &mut dyn FnMut(&EntryMeta, &mut dyn Read) -> Result<()>,
    meta: &EntryMeta,
    reader: &mut dyn Read,
) -> Result<(), StepError> {
    let mut tracked = TrackedReader {
        inner: reader,
        failed: false,
    };
    visit(meta, &mut tracked).map_err(|err| {
        if tracked.failed {
            StepError::Entry(err)
        } else {
            StepError::Visitor(err)
        }
    })
}

/// Enumerate every entry of `path`, calling `visit` once per entry in the
/// container's native index order.
///
/// The visitor is driven strictly one entry at a time; the next entry is not
/// touched until the visitor returns, which bounds open handles and in-flight
/// temp extractions to the nesting depth. Entries with a recognized nested
/// container extension are materialized to a temp file, visited as a file
/// themselves, then descended into with their path as a prefix.
///
/// A container that cannot be opened at the top level is fatal, as is any
/// error the visitor raises on its own. A failure reading one entry,
/// including a read failure surfacing while the visitor consumes it, is
/// logged and skipped so a single bad entry cannot abort the whole diff.
pub fn walk_entries(
    path: &Path,
    visit: &mut dyn FnMut(&EntryMeta, &mut dyn Read) -> Result<()>,
) -> Result<()> {
    let map = util::mmap_file(path)?;
    let reader: Box<dyn ReadSeek> = Box::new(Cursor::new(map));
    let archive = ZipArchive::new(reader)
        .with_context(|| format!("Failed to open package: {}", path.display()))?;

    let mut stack = vec![Frame {
        archive,
        prefix: String::new(),
        next_index: 0,
        _temp: None,
    }];

    loop {
        let depth = stack.len();
        let Some(top) = stack.last_mut() else {
            break;
        };
        if top.next_index >= top.archive.len() {
            stack.pop();
            continue;
        }
        let index = top.next_index;
        top.next_index += 1;

        match visit_entry(top, index, depth, visit) {
            Ok(Some(frame)) => stack.push(frame),
            Ok(None) => {}
            Err(StepError::Entry(err)) => {
                warn!(entry = index, "Skipping unreadable entry: {err:#}");
            }
            Err(StepError::Visitor(err)) => return Err(err),
        }
    }

    Ok(())
}

fn visit_entry(
    frame: &mut Frame,
    index: usize,
    depth: usize,
    visit: &mut dyn FnMut(&EntryMeta, &mut dyn Read) -> Result<()>,
) -> Result<Option<Frame>, StepError> {
    let mut entry = frame
        .archive
        .by_index(index)
        .map_err(|e| StepError::Entry(e.into()))?;
    let meta = EntryMeta {
        path: format!("{}{}", frame.prefix, entry.name()),
        is_dir: entry.is_dir(),
        fingerprint: entry.crc32(),
        size: entry.size(),
    };

    if !meta.is_dir && has_nested_extension(entry.name()) {
        if depth >= MAX_NESTING {
            warn!(path = %meta.path, "Nested container depth cap reached; treating as opaque file");
            visit_tracked(visit, &meta, &mut entry)?;
            return Ok(None);
        }

        // Materialize the nested container privately; the temp file lives
        // exactly as long as its frame.
        let mut tmp = tempfile::NamedTempFile::new()
            .context("Failed to create temp file for nested container")
            .map_err(StepError::Entry)?;
        std::io::copy(&mut entry, tmp.as_file_mut())
            .with_context(|| format!("Failed to extract nested container: {}", meta.path))
            .map_err(StepError::Entry)?;
        drop(entry);
        let temp_path = tmp.into_temp_path();

        // The container entry is itself part of the snapshot; hand the
        // visitor its materialized bytes before descending.
        let mut reader = std::fs::File::open(&temp_path)
            .map_err(|e| StepError::Entry(e.into()))?;
        visit_tracked(visit, &meta, &mut reader)?;
        drop(reader);

        let nested: Box<dyn ReadSeek> = Box::new(
            std::fs::File::open(&temp_path).map_err(|e| StepError::Entry(e.into()))?,
        );
        let archive = ZipArchive::new(nested)
            .with_context(|| format!("Failed to open nested container: {}", meta.path))
            .map_err(StepError::Entry)?;

        return Ok(Some(Frame {
            archive,
            prefix: format!("{}/", meta.path),
            next_index: 0,
            _temp: Some(temp_path),
        }));
    }

    visit_tracked(visit, &meta, &mut entry)?;
    Ok(None)
}

fn has_nested_extension(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    NESTED_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}
