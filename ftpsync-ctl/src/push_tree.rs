use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// One file of a local tree and the remote path it replicates to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpload {
    pub local: PathBuf,
    pub remote: String,
}

/// Walks `local_root` and maps every regular file below it onto
/// `remote_prefix`, keeping the relative layout. Symlinks are not followed.
pub fn plan_tree(local_root: &Path, remote_prefix: &str) -> Result<Vec<PlannedUpload>> {
    let prefix = remote_prefix.trim_end_matches('/');
    let mut planned = Vec::new();
    for entry in WalkDir::new(local_root).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", local_root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(local_root)
            .with_context(|| format!("{} is outside the walked tree", entry.path().display()))?;
        let parts: Vec<String> = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy().into_owned())
            .collect();
        planned.push(PlannedUpload {
            local: entry.path().to_path_buf(),
            remote: format!("{prefix}/{}", parts.join("/")),
        });
    }
    Ok(planned)
}
