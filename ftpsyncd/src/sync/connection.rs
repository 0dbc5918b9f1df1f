use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ftpsync_core::FtpError;
use tokio::time::Instant;

use super::folder_cache::FolderCache;
use super::session::{Dialer, RemoteSession};
use super::supervisor::ProcessSupervisor;

#[derive(Clone)]
pub struct ConnectionSettings {
    pub address: String,
    pub user: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_connect_attempts: u32,
    pub connect_retry_delay: Duration,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("operation_timeout", &self.operation_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_connect_attempts", &self.max_connect_attempts)
            .field("connect_retry_delay", &self.connect_retry_delay)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

enum Link {
    Disconnected,
    Connecting,
    Connected {
        session: Box<dyn RemoteSession>,
        deadline: Instant,
    },
}

/// Owns the single control connection together with the folder cache that
/// is only valid for it.
pub struct ConnectionManager {
    settings: ConnectionSettings,
    dialer: Arc<dyn Dialer>,
    supervisor: Arc<ProcessSupervisor>,
    link: Link,
    folders: FolderCache,
    closed: bool,
}

impl ConnectionManager {
    pub fn new(
        settings: ConnectionSettings,
        dialer: Arc<dyn Dialer>,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        Self {
            settings,
            dialer,
            supervisor,
            link: Link::Disconnected,
            folders: FolderCache::default(),
            closed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.link {
            Link::Disconnected => ConnectionState::Disconnected,
            Link::Connecting => ConnectionState::Connecting,
            Link::Connected { .. } => ConnectionState::Connected,
        }
    }

    pub fn folders(&self) -> &FolderCache {
        &self.folders
    }

    pub fn deadline(&self) -> Option<Instant> {
        match &self.link {
            Link::Connected { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    /// The live session and the folder cache, borrowed together.
    pub fn parts(&mut self) -> Option<(&mut dyn RemoteSession, &mut FolderCache)> {
        match &mut self.link {
            Link::Connected { session, .. } => {
                let session: &mut dyn RemoteSession = session.as_mut();
                Some((session, &mut self.folders))
            }
            _ => None,
        }
    }

    /// Checks the current connection or builds a new one. Never fails
    /// loudly: every problem is logged and reported as `false`.
    pub async fn ensure_live(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if self.supervisor.take_dependency_lost() && matches!(self.link, Link::Connected { .. }) {
            self.teardown("helper process exited");
        }

        if let Link::Connected { session, deadline } = &mut self.link {
            match session.noop().await {
                Ok(()) => {
                    *deadline = Instant::now() + self.settings.idle_timeout;
                    return true;
                }
                Err(err) => {
                    tracing::warn!(address = %self.settings.address, "liveness check failed: {err}");
                    self.teardown("liveness check failed");
                }
            }
        }

        if let Err(err) = self.supervisor.ensure_ready().await {
            tracing::warn!("helper process not ready: {err}");
        }

        self.link = Link::Connecting;
        let attempts = self.settings.max_connect_attempts.max(1);
        for attempt in 1..=attempts {
            match self.dial_once().await {
                Ok(mut session) => {
                    return match session.login(&self.settings.user, &self.settings.password).await {
                        Ok(()) => {
                            tracing::info!(address = %self.settings.address, "ftp server connected");
                            self.link = Link::Connected {
                                session,
                                deadline: Instant::now() + self.settings.idle_timeout,
                            };
                            true
                        }
                        Err(err) => {
                            tracing::error!(
                                address = %self.settings.address,
                                user = %self.settings.user,
                                "ftp login failed: {err}"
                            );
                            if let Err(err) = session.quit().await {
                                tracing::debug!("quit after failed login failed: {err}");
                            }
                            self.link = Link::Disconnected;
                            false
                        }
                    };
                }
                Err(err) => {
                    tracing::warn!(
                        address = %self.settings.address,
                        attempt,
                        attempts,
                        "ftp connect failed: {err}"
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.connect_retry_delay).await;
            }
        }

        self.link = Link::Disconnected;
        false
    }

    async fn dial_once(&self) -> Result<Box<dyn RemoteSession>, FtpError> {
        let connect_timeout = self.settings.connect_timeout;
        let dial = self.dialer.dial(
            &self.settings.address,
            connect_timeout,
            self.settings.operation_timeout,
        );
        match tokio::time::timeout(connect_timeout, dial).await {
            Ok(result) => result,
            Err(_) => Err(FtpError::Timeout {
                operation: "connect",
                after: connect_timeout,
            }),
        }
    }

    /// Drops the session without talking to the server and forgets every
    /// cached folder.
    pub fn teardown(&mut self, reason: &str) {
        if matches!(self.link, Link::Disconnected) {
            return;
        }
        tracing::info!(reason, cached = self.folders.len(), "ftp connection dropped");
        self.link = Link::Disconnected;
        self.folders.forget_all();
    }

    /// Tears down after errors that leave the control channel unusable.
    pub fn observe_error(&mut self, err: &FtpError) {
        if err.is_connection_error() {
            self.teardown("connection error");
        }
    }

    /// Says goodbye to the server, then tears down.
    pub async fn close(&mut self) {
        if let Link::Connected { session, .. } = &mut self.link
            && let Err(err) = session.quit().await
        {
            tracing::debug!("quit failed: {err}");
        }
        self.teardown("closed");
    }

    /// Closes the connection for good; later `ensure_live` calls refuse to
    /// dial.
    pub async fn shut_down(&mut self) {
        self.closed = true;
        self.close().await;
    }

    pub async fn try_idle_disconnect(&mut self) {
        match self.deadline() {
            Some(deadline) if Instant::now() >= deadline => {
                tracing::info!(address = %self.settings.address, "ftp connection idle, disconnecting");
                self.close().await;
                self.supervisor.terminate().await;
            }
            Some(_) => {
                tracing::debug!(
                    folders = ?self.folders.paths().collect::<Vec<_>>(),
                    "cached remote folders"
                );
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_support::{FakeDialer, FakeRemote};

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            address: "ftp.test:21".into(),
            user: "sync".into(),
            password: "secret".into(),
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(120),
            max_connect_attempts: 3,
            connect_retry_delay: Duration::from_secs(2),
        }
    }

    fn manager(remote: &FakeRemote) -> ConnectionManager {
        ConnectionManager::new(
            settings(),
            Arc::new(FakeDialer::new(remote.clone())),
            ProcessSupervisor::disabled(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn connects_then_checks_existing_connection() {
        let remote = FakeRemote::default();
        let mut manager = manager(&remote);

        assert!(manager.ensure_live().await);
        assert!(manager.ensure_live().await);

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(remote.dials(), 1);
        assert_eq!(remote.calls(), vec!["LOGIN sync", "NOOP"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_login_is_not_retried() {
        let remote = FakeRemote::default();
        remote.update(|state| state.reject_login = true);
        let mut manager = manager(&remote);

        assert!(!manager.ensure_live().await);

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(remote.dials(), 1);
        assert_eq!(remote.count("LOGIN"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dial_failures_use_every_attempt() {
        let remote = FakeRemote::default();
        remote.update(|state| state.refuse_dials = 10);
        let mut manager = manager(&remote);

        let started = Instant::now();
        assert!(!manager.ensure_live().await);

        assert_eq!(remote.dials(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_noop_reconnects_with_empty_cache() {
        let remote = FakeRemote::default();
        let mut manager = manager(&remote);
        assert!(manager.ensure_live().await);
        manager.parts().unwrap().1.remember("/data");

        remote.update(|state| state.fail_noop = true);
        assert!(manager.ensure_live().await);

        assert_eq!(remote.dials(), 2);
        assert!(manager.folders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn helper_exit_invalidates_live_connection() {
        let remote = FakeRemote::default();
        let supervisor = ProcessSupervisor::disabled();
        let mut manager = ConnectionManager::new(
            settings(),
            Arc::new(FakeDialer::new(remote.clone())),
            Arc::clone(&supervisor),
        );
        assert!(manager.ensure_live().await);
        manager.parts().unwrap().1.remember("/data");

        supervisor.mark_dependency_lost();
        assert!(manager.ensure_live().await);

        assert_eq!(remote.dials(), 2);
        assert_eq!(remote.count("NOOP"), 0, "no liveness check on an invalidated link");
        assert!(manager.folders().is_empty());
        assert!(!supervisor.take_dependency_lost());
    }

    #[tokio::test(start_paused = true)]
    async fn shut_down_manager_never_redials() {
        let remote = FakeRemote::default();
        let mut manager = manager(&remote);
        assert!(manager.ensure_live().await);

        manager.shut_down().await;
        assert!(!manager.ensure_live().await);

        assert_eq!(remote.dials(), 1);
        assert_eq!(remote.count("QUIT"), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn manager_can_be_shared_across_tasks() {
        fn assert_send<T: Send>(_: T) {}
        fn assert_sync<T: Sync>() {}
        assert_sync::<ConnectionManager>();

        let remote = FakeRemote::default();
        let mut manager = manager(&remote);
        assert_send(manager.ensure_live());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_expiry_closes_and_clears_cache() {
        let remote = FakeRemote::default();
        let mut manager = manager(&remote);
        assert!(manager.ensure_live().await);
        manager.parts().unwrap().1.remember("/data");

        tokio::time::advance(Duration::from_secs(60)).await;
        manager.try_idle_disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(manager.folders().knows("/data"));

        tokio::time::advance(Duration::from_secs(61)).await;
        manager.try_idle_disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.folders().is_empty());
        assert_eq!(remote.count("QUIT"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_noop_extends_deadline() {
        let remote = FakeRemote::default();
        let mut manager = manager(&remote);
        assert!(manager.ensure_live().await);
        let first = manager.deadline().unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(manager.ensure_live().await);

        assert_eq!(manager.deadline().unwrap(), first + Duration::from_secs(30));
    }
}
