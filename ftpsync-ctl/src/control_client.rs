use anyhow::{Context, Result};
use ftpsync_integrations::ids::{DBUS_INTERFACE_SYNC, DBUS_NAME_SYNC, DBUS_OBJECT_PATH_SYNC};
use serde::Serialize;
use zbus::blocking::{Connection, Proxy, connection::Builder};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub connection: String,
    pub cached_folders: u32,
    pub queued_jobs: u32,
    pub scheduled_jobs: u32,
}

pub struct SyncClient {
    connection: Connection,
}

impl SyncClient {
    /// Connects to `address` when given, the session bus otherwise.
    pub fn connect(address: Option<&str>) -> Result<Self> {
        let connection = match address {
            Some(address) => Builder::address(address)
                .with_context(|| format!("invalid D-Bus address {address}"))?
                .build()
                .with_context(|| format!("failed to connect to D-Bus at {address}"))?,
            None => Connection::session().context("failed to connect to session D-Bus")?,
        };
        Ok(Self { connection })
    }

    pub fn version(&self) -> Result<String> {
        self.proxy()?.call("Version", &()).context("Version failed")
    }

    pub fn ping(&self, message: &str) -> Result<String> {
        self.proxy()?
            .call("Ping", &(message,))
            .context("Ping failed")
    }

    pub fn sync_async(&self, local: &str, remote: &str) -> Result<()> {
        self.proxy()?
            .call::<_, _, ()>("SyncAsync", &(local, remote))
            .with_context(|| format!("SyncAsync {local} -> {remote} failed"))
    }

    pub fn sync_now(&self, local: &str, remote: &str) -> Result<()> {
        self.proxy()?
            .call::<_, _, ()>("SyncNow", &(local, remote))
            .with_context(|| format!("SyncNow {local} -> {remote} failed"))
    }

    pub fn list_files(&self, folder: &str, recursive: bool) -> Result<Vec<String>> {
        self.proxy()?
            .call("ListFiles", &(folder, recursive))
            .with_context(|| format!("ListFiles {folder} failed"))
    }

    pub fn delete(&self, remote: &str, detached: bool) -> Result<bool> {
        self.proxy()?
            .call("Delete", &(remote, detached))
            .with_context(|| format!("Delete {remote} failed"))
    }

    pub fn exists(&self, remote: &str) -> Result<bool> {
        self.proxy()?
            .call("Exists", &(remote,))
            .with_context(|| format!("Exists {remote} failed"))
    }

    pub fn status(&self) -> Result<StatusSnapshot> {
        let (connection, cached_folders, queued_jobs, scheduled_jobs): (String, u32, u32, u32) =
            self.proxy()?.call("Status", &()).context("Status failed")?;
        Ok(StatusSnapshot {
            connection,
            cached_folders,
            queued_jobs,
            scheduled_jobs,
        })
    }

    fn proxy(&self) -> Result<Proxy<'_>> {
        Proxy::new(
            &self.connection,
            DBUS_NAME_SYNC,
            DBUS_OBJECT_PATH_SYNC,
            DBUS_INTERFACE_SYNC,
        )
        .context("failed to create Sync1 proxy")
    }
}
