use std::time::Duration;

use async_trait::async_trait;
use ftpsync_core::{Entry, FtpClient, FtpError};
use tokio::io::AsyncRead;

/// The remote operations the engine needs from one logged-in connection.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn login(&mut self, user: &str, password: &str) -> Result<(), FtpError>;
    async fn noop(&mut self) -> Result<(), FtpError>;
    async fn make_dir(&mut self, path: &str) -> Result<(), FtpError>;
    async fn store(
        &mut self,
        path: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, FtpError>;
    async fn list(&mut self, path: &str) -> Result<Vec<Entry>, FtpError>;
    async fn delete(&mut self, path: &str) -> Result<(), FtpError>;
    async fn size(&mut self, path: &str) -> Result<u64, FtpError>;
    async fn quit(&mut self) -> Result<(), FtpError>;
}

/// Opens new control connections; the only place that touches the network
/// directly.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        address: &str,
        connect_timeout: Duration,
        operation_timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, FtpError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FtpDialer;

#[async_trait]
impl Dialer for FtpDialer {
    async fn dial(
        &self,
        address: &str,
        connect_timeout: Duration,
        operation_timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, FtpError> {
        let client = FtpClient::connect(address, connect_timeout, operation_timeout).await?;
        tracing::debug!(address, "ftp control connection open");
        Ok(Box::new(client))
    }
}

#[async_trait]
impl RemoteSession for FtpClient {
    async fn login(&mut self, user: &str, password: &str) -> Result<(), FtpError> {
        FtpClient::login(self, user, password).await
    }

    async fn noop(&mut self) -> Result<(), FtpError> {
        FtpClient::noop(self).await
    }

    async fn make_dir(&mut self, path: &str) -> Result<(), FtpError> {
        FtpClient::make_dir(self, path).await
    }

    async fn store(
        &mut self,
        path: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, FtpError> {
        FtpClient::store(self, path, source).await
    }

    async fn list(&mut self, path: &str) -> Result<Vec<Entry>, FtpError> {
        FtpClient::list(self, path).await
    }

    async fn delete(&mut self, path: &str) -> Result<(), FtpError> {
        FtpClient::delete(self, path).await
    }

    async fn size(&mut self, path: &str) -> Result<u64, FtpError> {
        FtpClient::size(self, path).await
    }

    async fn quit(&mut self) -> Result<(), FtpError> {
        FtpClient::quit(self).await
    }
}
