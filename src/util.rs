use anyhow::{Context, Result};
use memmap2::Mmap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    // SAFETY: We only read from this mapping; no concurrent modification of these files.
    unsafe {
        Mmap::map(&file)
            .with_context(|| format!("Failed to memory-map file: {}", path.display()))
    }
}

/// Replace every `${time}` token in an output path with the current Unix-epoch
/// milliseconds, so repeated invocations get distinct file names.
pub fn expand_output_path(output: &str) -> String {
    if !output.contains("${time}") {
        return output.to_string();
    }
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    output.replace("${time}", &millis.to_string())
}

/// Validate that an input archive exists and is non-empty.
pub fn check_input_archive(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("Input package not found: {}", path.display()))?;
    anyhow::ensure!(
        meta.is_file() && meta.len() > 0,
        "Input package is empty or not a file: {}",
        path.display()
    );
    Ok(())
}
