use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ftpsync_integrations::ids::{DBUS_ERROR_FAILED, DBUS_ERROR_INVALID_PARAMS};
use ftpsync_integrations::params::{
    ParamError, ping_reply, validate_folder, validate_remote_file, validate_transfer,
};
use thiserror::Error;
use zbus::interface;

use crate::sync::engine::{SyncEngine, SyncError};

pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum DbusServiceError {
    #[error("error params: {0}")]
    InvalidParams(String),
    #[error("{0}")]
    Failed(String),
}

impl From<ParamError> for DbusServiceError {
    fn from(err: ParamError) -> Self {
        DbusServiceError::InvalidParams(err.to_string())
    }
}

impl From<SyncError> for DbusServiceError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Path(_) | SyncError::EmptyLocalPath => {
                DbusServiceError::InvalidParams(err.to_string())
            }
            other => DbusServiceError::Failed(other.to_string()),
        }
    }
}

pub fn dbus_error_name(err: &DbusServiceError) -> &'static str {
    match err {
        DbusServiceError::InvalidParams(_) => DBUS_ERROR_INVALID_PARAMS,
        DbusServiceError::Failed(_) => DBUS_ERROR_FAILED,
    }
}

fn map_to_fdo(err: impl Into<DbusServiceError>) -> zbus::fdo::Error {
    let err = err.into();
    zbus::fdo::Error::Failed(format!("{}: {}", dbus_error_name(&err), err))
}

fn failed(message: impl Into<String>) -> zbus::fdo::Error {
    map_to_fdo(DbusServiceError::Failed(message.into()))
}

/// The agent's command boundary: thin argument checks in front of the
/// sync engine.
pub struct SyncDbusService {
    engine: Arc<SyncEngine>,
}

impl SyncDbusService {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

#[interface(name = "io.ftpsync.Sync1")]
impl SyncDbusService {
    async fn version(&self) -> zbus::fdo::Result<String> {
        Ok(AGENT_VERSION.to_string())
    }

    async fn ping(&self, message: &str) -> zbus::fdo::Result<String> {
        Ok(ping_reply(message))
    }

    async fn sync_async(&self, local: &str, remote: &str) -> zbus::fdo::Result<()> {
        validate_transfer(local, remote).map_err(map_to_fdo)?;
        let accepted = self
            .engine
            .sync_async(Path::new(local), remote, 1, Duration::ZERO)
            .map_err(map_to_fdo)?;
        if accepted {
            Ok(())
        } else {
            Err(failed(format!("sync {local} to {remote} was not queued")))
        }
    }

    async fn sync_now(&self, local: &str, remote: &str) -> zbus::fdo::Result<()> {
        validate_transfer(local, remote).map_err(map_to_fdo)?;
        let synced = self
            .engine
            .sync_now(Path::new(local), remote)
            .await
            .map_err(map_to_fdo)?;
        if synced {
            Ok(())
        } else {
            Err(failed(format!("sync {local} to {remote} failed")))
        }
    }

    async fn list_files(&self, folder: &str, recursive: bool) -> zbus::fdo::Result<Vec<String>> {
        validate_folder(folder).map_err(map_to_fdo)?;
        self.engine
            .list_remote(folder, recursive)
            .await
            .map_err(map_to_fdo)
    }

    /// With `detached` the delete runs in the background and the call
    /// answers `true` at once.
    async fn delete(&self, remote: &str, detached: bool) -> zbus::fdo::Result<bool> {
        validate_remote_file(remote).map_err(map_to_fdo)?;
        if detached {
            let engine = Arc::clone(&self.engine);
            let remote = remote.to_string();
            tokio::spawn(async move {
                engine.delete_remote(&remote).await;
            });
            return Ok(true);
        }
        Ok(self.engine.delete_remote(remote).await)
    }

    async fn exists(&self, remote: &str) -> zbus::fdo::Result<bool> {
        validate_remote_file(remote).map_err(map_to_fdo)?;
        Ok(self.engine.exists_remote(remote).await)
    }

    /// Connection state, cached folders, queued jobs, scheduled retries.
    async fn status(&self) -> zbus::fdo::Result<(String, u32, u32, u32)> {
        let status = self.engine.status().await;
        let count = |value: usize| u32::try_from(value).unwrap_or(u32::MAX);
        Ok((
            status.connection.as_str().to_string(),
            count(status.cached_folders),
            count(status.queued_jobs),
            count(status.scheduled_jobs),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::connection::ConnectionSettings;
    use crate::sync::engine::EngineConfig;
    use crate::sync::supervisor::ProcessSupervisor;
    use crate::sync::test_support::{FakeDialer, FakeRemote};

    fn service(remote: &FakeRemote) -> SyncDbusService {
        let config = EngineConfig {
            connection: ConnectionSettings {
                address: "ftp.test:21".into(),
                user: "sync".into(),
                password: String::new(),
                connect_timeout: Duration::from_secs(1),
                operation_timeout: Duration::from_secs(1),
                idle_timeout: Duration::from_secs(3600),
                max_connect_attempts: 1,
                connect_retry_delay: Duration::ZERO,
            },
            idle_check_interval: Duration::from_secs(10),
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(30),
            queue_capacity: 4,
        };
        let engine = SyncEngine::new(
            config,
            Arc::new(FakeDialer::new(remote.clone())),
            ProcessSupervisor::disabled(),
        );
        SyncDbusService::new(Arc::new(engine))
    }

    fn error_message(err: zbus::fdo::Error) -> String {
        match err {
            zbus::fdo::Error::Failed(message) => message,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn maps_errors_to_stable_dbus_names() {
        assert_eq!(
            dbus_error_name(&ParamError::EmptyLocalPath.into()),
            DBUS_ERROR_INVALID_PARAMS
        );
        assert_eq!(
            dbus_error_name(&DbusServiceError::Failed("x".into())),
            DBUS_ERROR_FAILED
        );
    }

    #[tokio::test]
    async fn version_and_ping() {
        let service = service(&FakeRemote::default());
        assert_eq!(service.version().await.unwrap(), AGENT_VERSION);
        assert_eq!(service.ping("").await.unwrap(), "PONG");
        assert_eq!(service.ping("hi").await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn directory_shaped_sync_is_invalid_params() {
        let remote = FakeRemote::default();
        let service = service(&remote);

        let now = error_message(service.sync_now("/a.txt", "a/b/").await.unwrap_err());
        let later = error_message(service.sync_async("/a.txt", "a/b/").await.unwrap_err());

        assert!(now.starts_with(DBUS_ERROR_INVALID_PARAMS));
        assert!(later.starts_with(DBUS_ERROR_INVALID_PARAMS));
        assert_eq!(remote.dials(), 0);
    }

    #[tokio::test]
    async fn sync_now_reports_transfer_failure() {
        let remote = FakeRemote::default();
        let service = service(&remote);
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.txt");
        std::fs::write(&local, b"abc").unwrap();
        let local = local.to_str().unwrap();

        service.sync_now(local, "/r/a.txt").await.unwrap();
        assert_eq!(remote.file("/r/a.txt").unwrap(), b"abc");

        let missing = dir.path().join("missing.txt");
        let message = error_message(
            service
                .sync_now(missing.to_str().unwrap(), "/r/missing.txt")
                .await
                .unwrap_err(),
        );
        assert!(message.starts_with(DBUS_ERROR_FAILED));
    }

    #[tokio::test]
    async fn list_and_exists_validate_absolute_paths() {
        let remote = FakeRemote::default();
        remote.update(|state| {
            state.add_dir("/data");
            state.add_file("/data/a", b"1");
        });
        let service = service(&remote);

        let relative = error_message(service.list_files("data", false).await.unwrap_err());
        assert!(relative.starts_with(DBUS_ERROR_INVALID_PARAMS));
        let shaped = error_message(service.exists("/data/").await.unwrap_err());
        assert!(shaped.starts_with(DBUS_ERROR_INVALID_PARAMS));

        assert_eq!(service.list_files("/data", true).await.unwrap(), vec!["/data/a"]);
        assert!(service.exists("/data/a").await.unwrap());
        assert!(!service.exists("/data/b").await.unwrap());
    }

    #[tokio::test]
    async fn smuggled_commands_are_invalid_params() {
        let remote = FakeRemote::default();
        remote.update(|state| state.add_file("/victim", b"keep"));
        let service = service(&remote);

        let exists = error_message(service.exists("/x\r\nDELE /victim").await.unwrap_err());
        let delete = error_message(service.delete("/x\nDELE /victim", false).await.unwrap_err());

        assert!(exists.starts_with(DBUS_ERROR_INVALID_PARAMS));
        assert!(delete.starts_with(DBUS_ERROR_INVALID_PARAMS));
        assert_eq!(remote.dials(), 0);
        assert!(remote.file("/victim").is_some());
    }

    #[tokio::test]
    async fn detached_delete_answers_immediately() {
        let remote = FakeRemote::default();
        remote.update(|state| state.add_file("/data/a", b"1"));
        let service = service(&remote);

        assert!(service.delete("/data/a", true).await.unwrap());
        for _ in 0..50 {
            if remote.file("/data/a").is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(remote.file("/data/a").is_none());
        assert!(!service.delete("/data/a", false).await.unwrap());
    }

    #[tokio::test]
    async fn status_reports_connection_state() {
        let remote = FakeRemote::default();
        let service = service(&remote);

        let (state, cached, queued, scheduled) = service.status().await.unwrap();
        assert_eq!(state, "disconnected");
        assert_eq!((cached, queued, scheduled), (0, 0, 0));

        service.sync_async("/tmp/a.txt", "/r/a.txt").await.unwrap();
        let (_, _, _, scheduled) = service.status().await.unwrap();
        assert_eq!(scheduled, 1);
    }
}
