use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "cogship.yaml";

/// Name of the rendered configuration inside a run directory when the
/// template path has no usable file name.
pub const DEFAULT_RENDERED_NAME: &str = "cog-safe-push.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Resolve a path from `cogship.yaml` against the project root.
/// Absolute paths are returned unchanged.
pub fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// File name the rendered config gets inside a run directory.
/// A trailing `.template` / `.tmpl` suffix on the source is dropped.
pub fn rendered_file_name(template: &Path) -> String {
    let Some(name) = template.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return DEFAULT_RENDERED_NAME.to_string();
    };
    for suffix in [".template", ".tmpl"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            if !stripped.is_empty() {
                return stripped.to_string();
            }
        }
    }
    name
}
