//! Scripted in-memory transport for tests
//!
//! Replies are queued per command text. A query with nothing queued falls
//! back to its `respond_always` reply, or stays silent, in which case the
//! read takes the simulated read timeout and returns nothing. Clones share
//! state so a test can keep a handle after handing the transport to a driver.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::TransportError;
use crate::serial::transport::Transport;

#[derive(Debug, Clone)]
pub enum Reply {
    Line(String),
    Bytes(Vec<u8>),
    Silence,
    /// Read fails with a broken pipe
    Fault,
}

impl Reply {
    pub fn line(text: &str) -> Self {
        Reply::Line(text.to_string())
    }
}

#[derive(Default)]
struct MockState {
    open: bool,
    read_timeout: Duration,
    scripts: HashMap<String, VecDeque<Reply>>,
    always: HashMap<String, Reply>,
    write_faults: HashMap<String, VecDeque<TransportError>>,
    pending: Option<Reply>,
    writes: Vec<String>,
    timeouts: Vec<Duration>,
}

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            state: Arc::new(Mutex::new(MockState {
                open: true,
                read_timeout: Duration::from_secs(2),
                ..Default::default()
            })),
        }
    }

    /// Queue replies for successive sends of `command`
    pub fn script<I>(&self, command: &str, replies: I)
    where
        I: IntoIterator<Item = Reply>,
    {
        let mut state = self.state.lock().unwrap();
        state
            .scripts
            .entry(command.to_string())
            .or_default()
            .extend(replies);
    }

    /// Reply used once the queue for `command` is empty
    pub fn respond_always(&self, command: &str, reply: Reply) {
        let mut state = self.state.lock().unwrap();
        state.always.insert(command.to_string(), reply);
    }

    pub fn fail_next_write(&self, command: &str, error: TransportError) {
        let mut state = self.state.lock().unwrap();
        state
            .write_faults
            .entry(command.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn set_open(&self, open: bool) {
        self.state.lock().unwrap().open = open;
    }

    pub fn is_closed(&self) -> bool {
        !self.state.lock().unwrap().open
    }

    /// Commands written so far, terminators stripped
    pub fn writes(&self) -> Vec<String> {
        self.raw_writes()
            .into_iter()
            .map(|w| w.trim_end().to_string())
            .collect()
    }

    pub fn raw_writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.writes().iter().filter(|w| *w == command).count()
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.state.lock().unwrap().timeouts.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(TransportError::NotOpen);
        }

        let raw = String::from_utf8_lossy(bytes).to_string();
        let command = raw.trim_end().to_string();
        state.writes.push(raw);
        state.pending = None;

        if let Some(error) = state
            .write_faults
            .get_mut(&command)
            .and_then(|faults| faults.pop_front())
        {
            return Err(error);
        }

        let scripted = state
            .scripts
            .get_mut(&command)
            .and_then(|queue| queue.pop_front());
        let fallback = state.always.get(&command).cloned();
        state.pending = scripted.or(fallback);
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Vec<u8>, TransportError> {
        let (reply, read_timeout) = {
            let mut state = self.state.lock().unwrap();
            if !state.open {
                return Err(TransportError::NotOpen);
            }
            (state.pending.take().unwrap_or(Reply::Silence), state.read_timeout)
        };

        match reply {
            Reply::Line(text) => Ok(format!("{}\n", text).into_bytes()),
            Reply::Bytes(bytes) => Ok(bytes),
            Reply::Silence => {
                tokio::time::sleep(read_timeout).await;
                Ok(Vec::new())
            }
            Reply::Fault => Err(TransportError::Io(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    async fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.read_timeout = timeout;
        state.timeouts.push(timeout);
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().open = false;
    }
}
