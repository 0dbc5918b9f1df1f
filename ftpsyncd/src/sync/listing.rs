use ftpsync_core::{EntryType, FtpError};

use super::folder_cache::FolderCache;
use super::paths::join_remote;
use super::session::RemoteSession;

/// Lists `root`, and with `recursive` every directory found below it.
///
/// Entries of one directory are reported together; subdirectories are then
/// expanded depth-first in the order they were listed. Symlinks and the
/// `.`/`..` pseudo-entries are skipped. Directories reported as entries of
/// a listing are remembered in `folders`; `root` itself is not, since many
/// servers answer `LIST` of a missing path or of a plain file with success.
///
/// A failure on `root` is returned. A failure on a nested directory is
/// logged and the directory skipped, unless the control connection itself
/// broke, in which case the error is returned as well.
pub async fn collect_tree(
    session: &mut dyn RemoteSession,
    folders: &mut FolderCache,
    root: &str,
    recursive: bool,
) -> Result<Vec<String>, FtpError> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_string()];

    while let Some(dir) = pending.pop() {
        let entries = match session.list(&dir).await {
            Ok(entries) => entries,
            Err(err) if dir == root || err.is_connection_error() => return Err(err),
            Err(err) => {
                tracing::warn!(path = %dir, "listing failed, skipping: {err}");
                continue;
            }
        };

        let mut subdirs = Vec::new();
        for entry in entries {
            if entry.name == "." || entry.name == ".." || entry.entry_type == EntryType::Link {
                continue;
            }
            let path = join_remote(&dir, &entry.name);
            if entry.entry_type == EntryType::Dir {
                folders.remember(path.clone());
                if recursive {
                    subdirs.push(path.clone());
                }
            }
            found.push(path);
        }
        pending.extend(subdirs.into_iter().rev());
    }

    Ok(found)
}
