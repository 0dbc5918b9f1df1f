//! Argument rules shared by the daemon's command boundary and the control
//! client, so malformed requests are rejected before they reach the bus.

use thiserror::Error;

pub const DEFAULT_PING_REPLY: &str = "PONG";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("local path is empty")]
    EmptyLocalPath,
    #[error("remote path is empty")]
    EmptyRemotePath,
    #[error("remote path must start with '/': {0}")]
    NotAbsolute(String),
    #[error("remote path must not end with '/': {0}")]
    DirectoryShaped(String),
    #[error("remote path contains control characters: {0:?}")]
    ControlCharacters(String),
}

fn reject_control_characters(remote: &str) -> Result<(), ParamError> {
    if remote.contains(['\r', '\n', '\0']) {
        return Err(ParamError::ControlCharacters(remote.to_string()));
    }
    Ok(())
}

/// SyncNow / SyncAsync: both paths present, remote not directory-shaped.
pub fn validate_transfer(local: &str, remote: &str) -> Result<(), ParamError> {
    if local.is_empty() {
        return Err(ParamError::EmptyLocalPath);
    }
    if remote.is_empty() {
        return Err(ParamError::EmptyRemotePath);
    }
    if remote.ends_with('/') {
        return Err(ParamError::DirectoryShaped(remote.to_string()));
    }
    reject_control_characters(remote)
}

/// ListFiles: an absolute folder.
pub fn validate_folder(folder: &str) -> Result<(), ParamError> {
    if folder.is_empty() {
        return Err(ParamError::EmptyRemotePath);
    }
    if !folder.starts_with('/') {
        return Err(ParamError::NotAbsolute(folder.to_string()));
    }
    reject_control_characters(folder)
}

/// Delete / Exists: an absolute, file-shaped path.
pub fn validate_remote_file(path: &str) -> Result<(), ParamError> {
    validate_folder(path)?;
    if path.ends_with('/') {
        return Err(ParamError::DirectoryShaped(path.to_string()));
    }
    Ok(())
}

pub fn ping_reply(message: &str) -> String {
    if message.is_empty() {
        DEFAULT_PING_REPLY.to_string()
    } else {
        message.to_string()
    }
}
