//! A push-channel client that reconnects after failures.
//!
//! The client holds one long-lived request open and forwards every event
//! payload to a [`PushListener`].  Failed attempts are retried after a fixed
//! delay until [`RetryPolicy::max_attempts`] consecutive attempts have failed.
//! An attempt that reaches the open state resets the count.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::StreamExt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::observability::{PUSH_CONNECT_ATTEMPTS, PUSH_EXHAUSTED, PUSH_RECONNECTS};
use crate::sse::decode;
use crate::transport::{ByteStream, Connect, StreamRequest};

/// Retry ceiling and delay of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RetryPolicyRepr {
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_base_delay_ms() -> u64 {
    RetryPolicy::default().base_delay.as_millis() as u64
}

impl Serialize for RetryPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RetryPolicyRepr {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay.as_millis() as u64,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RetryPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = RetryPolicyRepr::deserialize(deserializer)?;
        Ok(Self {
            max_attempts: repr.max_attempts,
            base_delay: Duration::from_millis(repr.base_delay_ms),
        })
    }
}

/// Lifecycle of a [`ReconnectingClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closing,
    Closed,
}

/// Why a [`ReconnectingClient`] closed.
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// `close()` was called or the parent session was stopped.
    Requested,
    /// The retry ceiling was reached; carries the final error.
    Exhausted(Error),
    /// The server ended the stream after it had opened.
    Ended,
}

/// Receives the events of a push channel.
pub trait PushListener: Send + 'static {
    /// An attempt reached the open state.
    fn on_open(&mut self) {}

    /// One event payload.
    fn on_message(&mut self, payload: String);

    /// An attempt failed; a retry may follow.
    fn on_error(&mut self, _error: &Error) {}

    /// The client closed.  Fires exactly once.
    fn on_close(&mut self, reason: &CloseReason);
}

#[derive(Debug)]
struct Status {
    state: ConnectionState,
    attempt: u32,
}

#[derive(Debug)]
struct Shared {
    status: Mutex<Status>,
    token: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `state` unless the client was closed.
    fn advance(&self, state: ConnectionState) -> bool {
        let mut status = self.lock();
        if status.state == ConnectionState::Closed || self.token.is_cancelled() {
            return false;
        }
        status.state = state;
        true
    }

    fn opened(&self) -> bool {
        let mut status = self.lock();
        if status.state == ConnectionState::Closed || self.token.is_cancelled() {
            return false;
        }
        status.state = ConnectionState::Open;
        status.attempt = 0;
        true
    }

    /// Counts a failure; returns `None` once the client was closed.
    fn failed(&self) -> Option<u32> {
        let mut status = self.lock();
        if status.state == ConnectionState::Closed || self.token.is_cancelled() {
            return None;
        }
        status.attempt += 1;
        Some(status.attempt)
    }

    fn finish(&self) {
        self.lock().state = ConnectionState::Closed;
    }
}

/// A push channel with bounded, fixed-delay reconnects.
#[derive(Debug)]
pub struct ReconnectingClient {
    shared: Arc<Shared>,
    task: JoinHandle<CloseReason>,
}

impl ReconnectingClient {
    /// Starts connecting in the background.
    pub fn spawn<L: PushListener>(
        connector: Arc<dyn Connect>,
        request: StreamRequest,
        policy: RetryPolicy,
        listener: L,
    ) -> Self {
        Self::spawn_with_token(connector, request, policy, listener, CancellationToken::new())
    }

    /// Starts connecting in the background; cancelling `token` closes the
    /// client like [`ReconnectingClient::close`].
    pub fn spawn_with_token<L: PushListener>(
        connector: Arc<dyn Connect>,
        request: StreamRequest,
        policy: RetryPolicy,
        listener: L,
        token: CancellationToken,
    ) -> Self {
        let shared = Arc::new(Shared {
            status: Mutex::new(Status {
                state: ConnectionState::Idle,
                attempt: 0,
            }),
            token,
        });
        let task = tokio::spawn(run(
            connector,
            request,
            policy,
            listener,
            Arc::clone(&shared),
        ));
        Self { shared, task }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.shared.lock().attempt
    }

    /// Closes the client for good.
    ///
    /// Cancels a pending reconnect and tears down the active connection.
    /// Returns true if this call performed the close.
    pub fn close(&self) -> bool {
        {
            let mut status = self.shared.lock();
            if status.state == ConnectionState::Closed {
                return false;
            }
            status.state = ConnectionState::Closed;
        }
        self.shared.token.cancel();
        tracing::debug!("push channel closed by request");
        true
    }

    /// Waits for the client to close.
    pub async fn join(self) -> CloseReason {
        match self.task.await {
            Ok(reason) => reason,
            Err(e) => CloseReason::Exhausted(Error::unknown(format!("push task failed: {e}"))),
        }
    }
}

enum Drained {
    Ended,
    Cancelled,
    Failed(Error),
}

async fn drain<L: PushListener>(
    stream: ByteStream,
    listener: &mut L,
    token: &CancellationToken,
) -> Drained {
    let events = decode(stream);
    futures::pin_mut!(events);
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Drained::Cancelled,
            next = events.next() => next,
        };
        match next {
            Some(Ok(payload)) => {
                if token.is_cancelled() {
                    return Drained::Cancelled;
                }
                listener.on_message(payload);
            }
            Some(Err(err)) => return Drained::Failed(err),
            None => return Drained::Ended,
        }
    }
}

async fn run<L: PushListener>(
    connector: Arc<dyn Connect>,
    request: StreamRequest,
    policy: RetryPolicy,
    mut listener: L,
    shared: Arc<Shared>,
) -> CloseReason {
    let token = shared.token.clone();
    let reason = loop {
        if !shared.advance(ConnectionState::Connecting) {
            break CloseReason::Requested;
        }
        PUSH_CONNECT_ATTEMPTS.click();
        let connected = tokio::select! {
            biased;
            _ = token.cancelled() => break CloseReason::Requested,
            connected = connector.connect(&request) => connected,
        };

        let failure = match connected {
            Ok(stream) => {
                if !shared.opened() {
                    break CloseReason::Requested;
                }
                tracing::debug!(url = %request.url, "push channel open");
                listener.on_open();
                match drain(stream, &mut listener, &token).await {
                    Drained::Ended => {
                        shared.advance(ConnectionState::Closing);
                        break CloseReason::Ended;
                    }
                    Drained::Cancelled => break CloseReason::Requested,
                    Drained::Failed(err) => err,
                }
            }
            Err(err) => err,
        };

        let Some(attempt) = shared.failed() else {
            break CloseReason::Requested;
        };
        listener.on_error(&failure);
        if attempt >= policy.max_attempts {
            PUSH_EXHAUSTED.click();
            tracing::warn!(attempt, error = %failure, "push channel giving up");
            break CloseReason::Exhausted(Error::reconnect_exhausted(
                attempt,
                failure.to_string(),
            ));
        }
        if !shared.advance(ConnectionState::Reconnecting) {
            break CloseReason::Requested;
        }
        PUSH_RECONNECTS.click();
        tracing::info!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = policy.base_delay.as_millis() as u64,
            error = %failure,
            "push channel reconnecting"
        );
        tokio::select! {
            biased;
            _ = token.cancelled() => break CloseReason::Requested,
            _ = tokio::time::sleep(policy.base_delay) => {}
        }
    };
    shared.finish();
    listener.on_close(&reason);
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    use crate::testing::{Script, ScriptedConnector, channel_body, send_line};
    use crate::transport::DeliveryMode;

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.events()
                .iter()
                .filter(|e| e.starts_with(prefix))
                .count()
        }
    }

    impl PushListener for Recorder {
        fn on_open(&mut self) {
            self.events.lock().unwrap().push("open".to_string());
        }

        fn on_message(&mut self, payload: String) {
            self.events.lock().unwrap().push(format!("message:{payload}"));
        }

        fn on_error(&mut self, _: &Error) {
            self.events.lock().unwrap().push("error".to_string());
        }

        fn on_close(&mut self, reason: &CloseReason) {
            let reason = match reason {
                CloseReason::Requested => "requested",
                CloseReason::Exhausted(_) => "exhausted",
                CloseReason::Ended => "ended",
            };
            self.events.lock().unwrap().push(format!("close:{reason}"));
        }
    }

    fn request() -> StreamRequest {
        StreamRequest::new(
            DeliveryMode::Get,
            "http://svc/push",
            json!({"nl_query": "q"}),
        )
        .unwrap()
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1000),
        }
    }

    async fn wait_for(client: &ReconnectingClient, state: ConnectionState) {
        while client.state() != state {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(1000));
    }

    #[test]
    fn policy_serde() {
        let policy: RetryPolicy = serde_json::from_value(json!({"base_delay_ms": 250})).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(
            serde_json::to_value(policy).unwrap(),
            json!({"max_attempts": 5, "base_delay_ms": 250})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let connector = Arc::new(ScriptedConnector::new(vec![]));
        let recorder = Recorder::default();
        let started = tokio::time::Instant::now();
        let client = ReconnectingClient::spawn(connector.clone(), request(), policy(5), recorder.clone());

        let reason = client.join().await;
        let CloseReason::Exhausted(err) = reason else {
            panic!("expected exhaustion, got {reason:?}");
        };
        assert!(err.is_reconnect_exhausted());
        assert_eq!(connector.attempts(), 5);
        assert_eq!(recorder.count("error"), 5);
        assert_eq!(recorder.count("close:exhausted"), 1);
        assert!(started.elapsed() >= Duration::from_millis(4000));
        assert!(started.elapsed() < Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_open_resets_attempts() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            Script::refused(),
            Script::refused(),
            Script::Body(vec![
                Ok(Bytes::from_static(b"data: a\n")),
                Err(Error::streaming("connection reset", None)),
            ]),
        ]));
        let recorder = Recorder::default();
        let client = ReconnectingClient::spawn(connector.clone(), request(), policy(3), recorder.clone());

        assert!(matches!(client.join().await, CloseReason::Exhausted(_)));
        // two failures, an open that resets the count, then three failures
        assert_eq!(connector.attempts(), 5);
        assert_eq!(recorder.count("open"), 1);
        assert_eq!(recorder.count("message:a"), 1);
        assert_eq!(recorder.count("close:"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_end_after_open() {
        let connector = Arc::new(ScriptedConnector::new(vec![Script::lines(&[
            "data: x\n\ndata: y\n",
        ])]));
        let recorder = Recorder::default();
        let client = ReconnectingClient::spawn(connector.clone(), request(), policy(5), recorder.clone());
        assert!(matches!(client.join().await, CloseReason::Ended));
        assert_eq!(
            recorder.events(),
            vec!["open", "message:x", "message:y", "close:ended"]
        );
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_backoff() {
        let connector = Arc::new(ScriptedConnector::new(vec![]));
        let recorder = Recorder::default();
        let client = ReconnectingClient::spawn(connector.clone(), request(), policy(5), recorder.clone());

        wait_for(&client, ConnectionState::Reconnecting).await;
        assert_eq!(client.attempt(), 1);
        assert!(client.close());
        assert!(!client.close());
        assert_eq!(client.state(), ConnectionState::Closed);

        assert!(matches!(client.join().await, CloseReason::Requested));
        assert_eq!(connector.attempts(), 1);
        assert_eq!(recorder.events(), vec!["error", "close:requested"]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_while_open_stops_delivery() {
        let (tx, body) = channel_body();
        let connector = Arc::new(ScriptedConnector::new(vec![body]));
        let recorder = Recorder::default();
        let client = ReconnectingClient::spawn(connector.clone(), request(), policy(5), recorder.clone());

        wait_for(&client, ConnectionState::Open).await;
        send_line(&tx, "one");
        while recorder.count("message:") == 0 {
            tokio::task::yield_now().await;
        }
        assert!(client.close());
        send_line(&tx, "two");

        assert!(matches!(client.join().await, CloseReason::Requested));
        assert_eq!(
            recorder.events(),
            vec!["open", "message:one", "close:requested"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn parent_token_cancellation_closes() {
        let connector = Arc::new(ScriptedConnector::new(vec![]));
        let recorder = Recorder::default();
        let token = CancellationToken::new();
        let client = ReconnectingClient::spawn_with_token(
            connector.clone(),
            request(),
            policy(5),
            recorder.clone(),
            token.child_token(),
        );
        wait_for(&client, ConnectionState::Reconnecting).await;
        token.cancel();
        assert!(matches!(client.join().await, CloseReason::Requested));
        assert_eq!(recorder.count("close:"), 1);
    }
}
