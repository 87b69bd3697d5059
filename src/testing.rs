//! In-memory connectors shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};

use crate::error::{Error, Result};
use crate::transport::{ByteStream, Connect, StreamRequest};

/// What the next connection attempt does.
pub enum Script {
    /// Fail before any response arrives.
    Fail(Error),
    /// Respond with these body fragments, then end.
    Body(Vec<Result<Bytes>>),
    /// Respond with whatever the test pushes into the channel.
    Channel(mpsc::UnboundedReceiver<Result<Bytes>>),
}

impl Script {
    pub fn lines(fragments: &[&str]) -> Self {
        Script::Body(
            fragments
                .iter()
                .map(|f| Ok(Bytes::from(f.to_string())))
                .collect(),
        )
    }

    pub fn refused() -> Self {
        Script::Fail(Error::connection("connection refused", None))
    }
}

/// Plays back scripts in order; once they run out every attempt is refused.
#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Connect for ScriptedConnector {
    async fn connect(&self, request: &StreamRequest) -> Result<ByteStream> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            None => Err(Error::connection("connection refused", None)),
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Body(chunks)) => Ok(Box::pin(stream::iter(chunks))),
            Some(Script::Channel(rx)) => Ok(rx.boxed()),
        }
    }
}

/// Creates a channel-backed body and the sender that feeds it.
pub fn channel_body() -> (mpsc::UnboundedSender<Result<Bytes>>, Script) {
    let (tx, rx) = mpsc::unbounded();
    (tx, Script::Channel(rx))
}

/// Sends one `data:` line through a channel-backed body.
pub fn send_line(tx: &mpsc::UnboundedSender<Result<Bytes>>, payload: &str) {
    tx.unbounded_send(Ok(Bytes::from(format!("data: {payload}\n"))))
        .unwrap();
}
