//! In-memory stand-in for an FTP endpoint, shared by the sync tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ftpsync_core::{Entry, EntryType, FtpError};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::session::{Dialer, RemoteSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Dir,
    File(Vec<u8>),
    Link,
}

#[derive(Debug, Default)]
pub struct RemoteState {
    pub nodes: BTreeMap<String, Node>,
    pub calls: Vec<String>,
    pub dials: usize,
    pub refuse_dials: usize,
    pub reject_login: bool,
    pub fail_noop: bool,
    pub store_failures: usize,
    pub drop_on_store: bool,
    pub store_delay: Option<Duration>,
    pub fail_list: Option<String>,
    in_flight: usize,
    pub max_in_flight: usize,
}

impl RemoteState {
    pub fn add_dir(&mut self, path: &str) {
        self.nodes.insert(path.to_string(), Node::Dir);
    }

    pub fn add_file(&mut self, path: &str, body: &[u8]) {
        self.nodes.insert(path.to_string(), Node::File(body.to_vec()));
    }

    pub fn add_link(&mut self, path: &str) {
        self.nodes.insert(path.to_string(), Node::Link);
    }
}

fn absolute(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn reply(code: u16, message: &str) -> FtpError {
    FtpError::Reply {
        code,
        message: message.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl FakeRemote {
    pub fn update(&self, change: impl FnOnce(&mut RemoteState)) {
        change(&mut self.state.lock().unwrap());
    }

    pub fn read<T>(&self, view: impl FnOnce(&RemoteState) -> T) -> T {
        view(&self.state.lock().unwrap())
    }

    pub fn session(&self) -> FakeSession {
        FakeSession {
            state: Arc::clone(&self.state),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.read(|state| state.calls.clone())
    }

    /// Number of recorded calls starting with `verb`.
    pub fn count(&self, verb: &str) -> usize {
        self.read(|state| {
            state
                .calls
                .iter()
                .filter(|call| call.split(' ').next() == Some(verb))
                .count()
        })
    }

    pub fn dials(&self) -> usize {
        self.read(|state| state.dials)
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.read(|state| match state.nodes.get(path) {
            Some(Node::File(body)) => Some(body.clone()),
            _ => None,
        })
    }

    fn record(&self, call: String) {
        self.update(|state| state.calls.push(call));
    }
}

pub struct FakeDialer {
    remote: FakeRemote,
}

impl FakeDialer {
    pub fn new(remote: FakeRemote) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(
        &self,
        _address: &str,
        _connect_timeout: Duration,
        _operation_timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, FtpError> {
        let refused = {
            let mut state = self.remote.state.lock().unwrap();
            state.dials += 1;
            if state.refuse_dials > 0 {
                state.refuse_dials -= 1;
                true
            } else {
                false
            }
        };
        if refused {
            return Err(FtpError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(Box::new(self.remote.session()))
    }
}

pub struct FakeSession {
    state: Arc<Mutex<RemoteState>>,
}

impl FakeSession {
    fn remote(&self) -> FakeRemote {
        FakeRemote {
            state: Arc::clone(&self.state),
        }
    }

    fn with_state<T>(&self, view: impl FnOnce(&mut RemoteState) -> T) -> T {
        view(&mut self.state.lock().unwrap())
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn login(&mut self, user: &str, _password: &str) -> Result<(), FtpError> {
        self.remote().record(format!("LOGIN {user}"));
        if self.with_state(|state| state.reject_login) {
            return Err(reply(530, "Login incorrect."));
        }
        Ok(())
    }

    async fn noop(&mut self) -> Result<(), FtpError> {
        self.remote().record("NOOP".into());
        if self.with_state(|state| std::mem::take(&mut state.fail_noop)) {
            return Err(reply(421, "Timeout."));
        }
        Ok(())
    }

    async fn make_dir(&mut self, path: &str) -> Result<(), FtpError> {
        self.remote().record(format!("MKD {path}"));
        let path = absolute(path);
        self.with_state(|state| {
            if state.nodes.contains_key(&path) {
                Err(reply(550, "Create directory operation failed: File exists"))
            } else {
                state.nodes.insert(path, Node::Dir);
                Ok(())
            }
        })
    }

    async fn store(
        &mut self,
        path: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, FtpError> {
        self.remote().record(format!("STOR {path}"));
        let delay = self.with_state(|state| {
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.store_delay
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut body = Vec::new();
        let read = source.read_to_end(&mut body).await;
        let path = absolute(path);
        self.with_state(|state| {
            state.in_flight -= 1;
            if state.drop_on_store {
                return Err(FtpError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                )));
            }
            if state.store_failures > 0 {
                state.store_failures -= 1;
                return Err(reply(451, "Requested action aborted."));
            }
            read?;
            let size = body.len() as u64;
            state.nodes.insert(path, Node::File(body));
            Ok(size)
        })
    }

    async fn list(&mut self, path: &str) -> Result<Vec<Entry>, FtpError> {
        self.remote().record(format!("LIST {path}"));
        let dir = absolute(path);
        self.with_state(|state| {
            if state.fail_list.as_deref() == Some(dir.as_str()) {
                return Err(reply(550, "Failed to open directory."));
            }
            let prefix = if dir.ends_with('/') {
                dir.clone()
            } else {
                format!("{dir}/")
            };
            let entries = state
                .nodes
                .iter()
                .filter_map(|(path, node)| {
                    let name = path.strip_prefix(&prefix)?;
                    if name.is_empty() || name.contains('/') {
                        return None;
                    }
                    let (entry_type, size) = match node {
                        Node::Dir => (EntryType::Dir, None),
                        Node::File(body) => (EntryType::File, Some(body.len() as u64)),
                        Node::Link => (EntryType::Link, None),
                    };
                    Some(Entry {
                        name: name.to_string(),
                        entry_type,
                        size,
                    })
                })
                .collect();
            Ok(entries)
        })
    }

    async fn delete(&mut self, path: &str) -> Result<(), FtpError> {
        self.remote().record(format!("DELE {path}"));
        let path = absolute(path);
        self.with_state(|state| match state.nodes.get(&path) {
            Some(Node::File(_)) => {
                state.nodes.remove(&path);
                Ok(())
            }
            _ => Err(reply(550, "Delete operation failed.")),
        })
    }

    async fn size(&mut self, path: &str) -> Result<u64, FtpError> {
        self.remote().record(format!("SIZE {path}"));
        let path = absolute(path);
        self.with_state(|state| match state.nodes.get(&path) {
            Some(Node::File(body)) => Ok(body.len() as u64),
            _ => Err(reply(550, "Could not get file size.")),
        })
    }

    async fn quit(&mut self) -> Result<(), FtpError> {
        self.remote().record("QUIT".into());
        Ok(())
    }
}
