use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ftpsync_core::with_default_port;
use ftpsync_integrations::ids::{DBUS_NAME_SYNC, DBUS_OBJECT_PATH_SYNC};
use zbus::connection::Builder as ConnectionBuilder;

use crate::dbus_api::SyncDbusService;
use crate::sync::connection::ConnectionSettings;
use crate::sync::engine::{EngineConfig, SyncEngine};
use crate::sync::session::FtpDialer;
use crate::sync::supervisor::{HelperCommand, ProcessSupervisor};

const DEFAULT_USER: &str = "anonymous";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_IDLE_CHECK_SECS: u64 = 10;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_CONNECT_ATTEMPTS: u64 = 3;
const DEFAULT_CONNECT_RETRY_DELAY_SECS: u64 = 2;
const DEFAULT_MAX_RETRY_ATTEMPTS: u64 = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 30;
const DEFAULT_QUEUE_CAPACITY: u64 = 256;

/// Process-wide settings, read once at startup.
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub connection: ConnectionSettings,
    pub dbus_address: Option<String>,
    pub helper_command: Option<String>,
    pub idle_check_interval: Duration,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub queue_capacity: usize,
    pub log_file: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir();
        Self::from_lookup(|name| std::env::var(name).ok(), home.as_deref())
    }

    pub fn from_lookup<F>(lookup: F, home: Option<&Path>) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| read_string_var(&lookup, name);
        let secs = |name: &str, default: u64| Duration::from_secs(read_u64_var(&lookup, name, default));

        let server = read("FTPSYNC_SERVER").context("FTPSYNC_SERVER is not set")?;
        let connection = ConnectionSettings {
            address: with_default_port(&server),
            user: read("FTPSYNC_USER").unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: lookup("FTPSYNC_PASSWORD").unwrap_or_default(),
            connect_timeout: secs("FTPSYNC_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            operation_timeout: secs(
                "FTPSYNC_OPERATION_TIMEOUT_SECS",
                DEFAULT_OPERATION_TIMEOUT_SECS,
            ),
            idle_timeout: secs("FTPSYNC_IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS),
            max_connect_attempts: read_u32_var(
                &lookup,
                "FTPSYNC_MAX_CONNECT_ATTEMPTS",
                DEFAULT_MAX_CONNECT_ATTEMPTS,
            ),
            connect_retry_delay: secs(
                "FTPSYNC_CONNECT_RETRY_DELAY_SECS",
                DEFAULT_CONNECT_RETRY_DELAY_SECS,
            ),
        };

        Ok(Self {
            connection,
            dbus_address: read("FTPSYNC_DBUS_ADDRESS"),
            helper_command: read("FTPSYNC_HELPER_COMMAND"),
            idle_check_interval: secs("FTPSYNC_IDLE_CHECK_SECS", DEFAULT_IDLE_CHECK_SECS),
            max_retry_attempts: read_u32_var(
                &lookup,
                "FTPSYNC_MAX_RETRY_ATTEMPTS",
                DEFAULT_MAX_RETRY_ATTEMPTS,
            ),
            retry_delay: secs("FTPSYNC_RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY_SECS),
            queue_capacity: usize::try_from(read_u64_var(
                &lookup,
                "FTPSYNC_QUEUE_CAPACITY",
                DEFAULT_QUEUE_CAPACITY,
            ))
            .unwrap_or(usize::MAX),
            log_file: read("FTPSYNC_LOG_FILE").map(|value| match home {
                Some(home) => expand_with_home(&value, home),
                None => PathBuf::from(value),
            }),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            connection: self.connection.clone(),
            idle_check_interval: self.idle_check_interval,
            max_retry_attempts: self.max_retry_attempts,
            retry_delay: self.retry_delay,
            queue_capacity: self.queue_capacity,
        }
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: Arc<SyncEngine>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let supervisor = ProcessSupervisor::new(config.helper_command.clone().map(HelperCommand::new));
        let engine = Arc::new(SyncEngine::new(
            config.engine_config(),
            Arc::new(FtpDialer),
            supervisor,
        ));
        Ok(Self { config, engine })
    }

    pub fn engine(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.engine)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let builder = match self.config.dbus_address.as_deref() {
            Some(address) => ConnectionBuilder::address(address)
                .with_context(|| format!("invalid D-Bus address {address}"))?,
            None => ConnectionBuilder::session()?,
        };
        let dbus_connection = builder
            .name(DBUS_NAME_SYNC)?
            .serve_at(
                DBUS_OBJECT_PATH_SYNC,
                SyncDbusService::new(Arc::clone(&self.engine)),
            )?
            .build()
            .await
            .context("failed to start D-Bus object server")?;

        self.engine.start();
        tracing::info!(
            server = %self.config.connection.address,
            user = %self.config.connection.user,
            helper = self.config.helper_command.as_deref().unwrap_or("none"),
            bus_name = DBUS_NAME_SYNC,
            "ftpsyncd started"
        );

        let signal = wait_for_shutdown_signal().await?;
        tracing::info!(signal, "shutdown requested");
        if let Err(err) = dbus_connection.release_name(DBUS_NAME_SYNC).await {
            tracing::warn!("failed to release {DBUS_NAME_SYNC}: {err}");
        }
        if let Err(err) = dbus_connection
            .object_server()
            .remove::<SyncDbusService, _>(DBUS_OBJECT_PATH_SYNC)
            .await
        {
            tracing::warn!("failed to unregister the sync interface: {err}");
        }
        self.engine.stop().await;
        drop(dbus_connection);
        Ok(())
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
