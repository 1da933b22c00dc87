use cogship_core::paths::CONFIG_FILE;
use std::path::{Path, PathBuf};

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `COGSHIP_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `cogship.yaml`
/// 3. Walk upward from `cwd` looking for `.git/`
/// 4. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_upward(&cwd, |dir| dir.join(CONFIG_FILE).is_file())
        .or_else(|| find_upward(&cwd, |dir| dir.join(".git").is_dir()))
        .unwrap_or(cwd)
}

fn find_upward(start: &Path, found: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    start.ancestors().find(|dir| found(dir)).map(Path::to_path_buf)
}
