use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

/// Write `data` to `path` through a hidden sibling tempfile that is renamed
/// into place, so the push tool never reads a half-written config.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => {
            std::fs::create_dir_all(p)?;
            p
        }
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".cogship-")
        .suffix(".partial")
        .tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a private scratch directory for a single model's push run.
///
/// The directory and everything in it is removed when the returned guard
/// is dropped.
pub fn run_dir(model_id: &str) -> Result<TempDir> {
    let dir = tempfile::Builder::new()
        .prefix(&format!("cogship-{model_id}-"))
        .tempdir()?;
    Ok(dir)
}

/// Keep the last `max_chars` characters of `text`, trimmed.
pub fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    let skipped: String = trimmed.chars().skip(count - max_chars).collect();
    format!("\u{2026}{skipped}")
}
