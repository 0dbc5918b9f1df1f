use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("remote path is empty")]
    Empty,
    #[error("remote path is directory-shaped: {0}")]
    DirectoryShaped(String),
}

/// Rejects targets that cannot name a file.
pub fn validate_remote_target(remote: &str) -> Result<(), PathError> {
    if remote.is_empty() {
        return Err(PathError::Empty);
    }
    if remote.ends_with('/') {
        return Err(PathError::DirectoryShaped(remote.to_string()));
    }
    Ok(())
}

/// Strips one leading and one trailing separator; the result is relative to
/// the login directory.
pub fn normalize_remote_path(remote: &str) -> Result<String, PathError> {
    let trimmed = remote.strip_prefix('/').unwrap_or(remote);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(trimmed.to_string())
}

/// Absolute parent folder of a normalized path, `None` for top-level files.
pub fn parent_folder(normalized: &str) -> Option<String> {
    let (parent, _) = normalized.rsplit_once('/')?;
    let parent = parent.trim_matches('/');
    if parent.is_empty() {
        None
    } else {
        Some(format!("/{parent}"))
    }
}

/// Every ancestor of `folder` from the root down, `folder` included:
/// `/a/b` yields `/a`, `/a/b`.
pub fn folder_prefixes(folder: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut current = String::new();
    for part in folder.split('/').filter(|part| !part.is_empty()) {
        current.push('/');
        current.push_str(part);
        prefixes.push(current.clone());
    }
    prefixes
}

pub fn normalize_listing_root(folder: &str) -> String {
    if folder.len() > 1 {
        folder.strip_suffix('/').unwrap_or(folder).to_string()
    } else {
        folder.to_string()
    }
}

pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}
