use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_ftp::FtpStream;
use async_ftp::types::FileType;
use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};

use crate::listing::{Entry, parse_list_line};

pub const DEFAULT_PORT: u16 = 21;

#[derive(Debug, Error)]
pub enum FtpError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("server replied {code}: {message}")]
    Reply { code: u16, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid command argument: {0:?}")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    Auth,
    Transient,
    Permanent,
}

impl FtpError {
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            FtpError::Reply { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn classification(&self) -> Option<ReplyClass> {
        self.reply_code().map(classify_reply_code)
    }

    /// True when the control connection itself can no longer be trusted.
    pub fn is_connection_error(&self) -> bool {
        match self {
            FtpError::Io(_) | FtpError::Timeout { .. } | FtpError::Protocol(_) => true,
            FtpError::Reply { code, .. } => *code == 421,
            FtpError::InvalidArgument(_) => false,
        }
    }

    /// Servers disagree on how to report `MKD` of an existing directory;
    /// 521 is the RFC 959 answer, most Unix daemons send 550 with a
    /// "File exists" text instead.
    pub fn is_already_exists(&self) -> bool {
        match self {
            FtpError::Reply { code: 521, .. } => true,
            FtpError::Reply { code, message } if matches!(*code, 550 | 553) => {
                message.to_ascii_lowercase().contains("exist")
            }
            _ => false,
        }
    }
}

impl From<async_ftp::FtpError> for FtpError {
    fn from(err: async_ftp::FtpError) -> Self {
        match err {
            async_ftp::FtpError::ConnectionError(err) => FtpError::Io(err),
            async_ftp::FtpError::InvalidResponse(text) => match split_unexpected_reply(&text) {
                Some((code, message)) => FtpError::Reply {
                    code,
                    message: message.to_string(),
                },
                None => FtpError::Protocol(text),
            },
            other => FtpError::Protocol(other.to_string()),
        }
    }
}

fn classify_reply_code(code: u16) -> ReplyClass {
    if matches!(code, 530 | 532 | 332) {
        ReplyClass::Auth
    } else if (400..500).contains(&code) {
        ReplyClass::Transient
    } else {
        ReplyClass::Permanent
    }
}

/// Pulls the server's reply out of an "Expected code [..], got response:
/// 550 ..." error text.
fn split_unexpected_reply(text: &str) -> Option<(u16, &str)> {
    let (_, reply) = text.split_once("got response: ")?;
    let reply = reply.trim_end();
    let code = reply.get(..3)?.parse::<u16>().ok()?;
    let message = reply.get(4..).unwrap_or_default().trim_start();
    Some((code, message))
}

/// Command arguments end up on the control channel verbatim, so a line
/// break inside one would smuggle in a second command.
fn command_arg(arg: &str) -> Result<&str, FtpError> {
    if arg.contains(['\r', '\n', '\0']) {
        return Err(FtpError::InvalidArgument(arg.to_string()));
    }
    Ok(arg)
}

/// A single FTP control connection.
///
/// Every command is bounded by the operation timeout given at connect time.
pub struct FtpClient {
    stream: FtpStream,
    operation_timeout: Duration,
}

impl FtpClient {
    pub async fn connect(
        address: &str,
        connect_timeout: Duration,
        operation_timeout: Duration,
    ) -> Result<Self, FtpError> {
        let address = with_default_port(address);
        let stream = bounded(
            "connect",
            connect_timeout,
            FtpStream::connect(address.as_str()),
        )
        .await?;
        Ok(Self {
            stream,
            operation_timeout,
        })
    }

    /// Logs in and switches the session to binary transfers.
    pub async fn login(&mut self, user: &str, password: &str) -> Result<(), FtpError> {
        let (user, password) = (command_arg(user)?, command_arg(password)?);
        let after = self.operation_timeout;
        bounded("login", after, self.stream.login(user, password)).await?;
        bounded(
            "transfer type",
            after,
            self.stream.transfer_type(FileType::Binary),
        )
        .await
    }

    pub async fn noop(&mut self) -> Result<(), FtpError> {
        let after = self.operation_timeout;
        bounded("noop", after, self.stream.noop()).await
    }

    pub async fn make_dir(&mut self, path: &str) -> Result<(), FtpError> {
        let path = command_arg(path)?;
        let after = self.operation_timeout;
        bounded("mkdir", after, self.stream.mkdir(path)).await
    }

    pub async fn delete(&mut self, path: &str) -> Result<(), FtpError> {
        let path = command_arg(path)?;
        let after = self.operation_timeout;
        bounded("delete", after, self.stream.rm(path)).await
    }

    pub async fn size(&mut self, path: &str) -> Result<u64, FtpError> {
        let path = command_arg(path)?;
        let after = self.operation_timeout;
        match bounded("size", after, self.stream.size(path)).await? {
            Some(size) => Ok(size as u64),
            None => Err(FtpError::Protocol(format!("malformed SIZE reply for {path}"))),
        }
    }

    pub async fn list(&mut self, path: &str) -> Result<Vec<Entry>, FtpError> {
        let path = command_arg(path)?;
        let after = self.operation_timeout;
        let lines = bounded("list", after, self.stream.list(Some(path))).await?;
        Ok(lines.iter().filter_map(|line| parse_list_line(line)).collect())
    }

    /// Uploads `source` to `path`, returning the number of bytes sent.
    pub async fn store<R>(&mut self, path: &str, source: &mut R) -> Result<u64, FtpError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = command_arg(path)?;
        let after = self.operation_timeout;
        let mut counted = Counted {
            inner: source,
            bytes: 0,
        };
        bounded("store", after, self.stream.put(path, &mut counted)).await?;
        Ok(counted.bytes)
    }

    pub async fn quit(&mut self) -> Result<(), FtpError> {
        let after = self.operation_timeout;
        bounded("quit", after, self.stream.quit()).await
    }
}

/// Counts the bytes pulled through a reader.
struct Counted<'a, R: ?Sized> {
    inner: &'a mut R,
    bytes: u64,
}

impl<R: AsyncRead + Unpin + ?Sized> AsyncRead for Counted<'_, R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        let poll = Pin::new(&mut *this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            this.bytes += (buf.filled().len() - before) as u64;
        }
        poll
    }
}

/// Appends the standard FTP port when `address` has none.
pub fn with_default_port(address: &str) -> String {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return SocketAddr::new(ip, DEFAULT_PORT).to_string();
    }
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            address.to_string()
        }
        _ => format!("{address}:{DEFAULT_PORT}"),
    }
}

async fn bounded<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T, FtpError>
where
    F: Future<Output = Result<T, async_ftp::FtpError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(FtpError::Timeout { operation, after }),
    }
}
