//! Transport sessions: one in-flight request to the generation endpoint.
//!
//! A [`Transport`] opens sessions in one of two delivery modes.  In
//! [`DeliveryMode::Post`] the JSON body is POSTed and the response body is the
//! event stream.  In [`DeliveryMode::Get`] the body is encoded into the query
//! string and the push channel is held open by a
//! [`ReconnectingClient`](crate::reconnect::ReconnectingClient).
//!
//! Either way the caller sees the same contract through [`StreamListener`]:
//! chunks in receipt order, then exactly one of `on_complete` or `on_error`,
//! or nothing at all once [`SessionHandle::stop`] was called.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{STREAM_BYTES, STREAM_CHUNKS, STREAM_DURATION, STREAM_ERRORS, STREAM_OPENS};
use crate::reconnect::{CloseReason, PushListener, ReconnectingClient, RetryPolicy};
use crate::sse::decode;

/// Default time allowed for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// A response body as a stream of byte fragments.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// How the request reaches the generation service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// POST the body; the response body streams events.
    #[default]
    Post,
    /// GET with the body in the query string; the server pushes events.
    Get,
}

impl std::str::FromStr for DeliveryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "post" => Ok(DeliveryMode::Post),
            "get" => Ok(DeliveryMode::Get),
            _ => Err(Error::validation(
                format!("unknown delivery mode {s:?}; expected post or get"),
                Some("delivery".to_string()),
            )),
        }
    }
}

/// A fully resolved request.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub mode: DeliveryMode,
    pub url: Url,
    /// The JSON body; for GET requests it is already encoded into `url`.
    pub body: Value,
    pub headers: Vec<(String, String)>,
}

impl StreamRequest {
    /// Resolves `endpoint` and `body` for the given mode.
    pub fn new(mode: DeliveryMode, endpoint: &str, body: Value) -> Result<Self> {
        let mut url = Url::parse(endpoint)?;
        if mode == DeliveryMode::Get {
            encode_query(&mut url, &body);
        }
        Ok(Self {
            mode,
            url,
            body,
            headers: Vec::new(),
        })
    }

    /// Adds extra request headers.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }
}

/// Appends each top-level body field as a query parameter.
///
/// Strings are sent verbatim; every other value is sent as compact JSON.
fn encode_query(url: &mut Url, body: &Value) {
    let Value::Object(fields) = body else {
        return;
    };
    if fields.is_empty() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (key, value) in fields {
        match value {
            Value::String(s) => pairs.append_pair(key, s),
            other => pairs.append_pair(key, &other.to_string()),
        };
    }
}

/// Opens the network side of a request.
#[async_trait::async_trait]
pub trait Connect: Send + Sync {
    /// Sends `request` and returns the response body once a success status
    /// arrived.
    async fn connect(&self, request: &StreamRequest) -> Result<ByteStream>;
}

/// [`Connect`] over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: ReqwestClient,
    connect_timeout: Duration,
}

impl HttpConnector {
    /// Creates a connector.
    ///
    /// Only connecting is bounded by `connect_timeout`; a response body may
    /// stream for as long as the server keeps it open.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = ReqwestClient::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self {
            client,
            connect_timeout,
        })
    }

    fn headers(request: &StreamRequest) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                Error::validation(format!("invalid header name {name:?}"), Some("headers".into()))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                Error::validation(
                    format!("invalid value for header {name}"),
                    Some("headers".into()),
                )
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Process an error response and convert it to our Error type.
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|val| val.to_str().ok())
            .map(String::from);

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {e}"),
                    Some(Box::new(e)),
                );
            }
        };
        let body = body.trim();
        let message = if body.is_empty() {
            format!("HTTP error! Status: {status_code}")
        } else {
            body.to_string()
        };
        Error::api(status_code, message, request_id)
    }
}

#[async_trait::async_trait]
impl Connect for HttpConnector {
    async fn connect(&self, request: &StreamRequest) -> Result<ByteStream> {
        let builder = match request.mode {
            DeliveryMode::Post => self.client.post(request.url.clone()).json(&request.body),
            DeliveryMode::Get => self.client.get(request.url.clone()),
        };

        let response = builder
            .headers(Self::headers(request)?)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(
                        format!("Request timed out: {e}"),
                        Some(self.connect_timeout.as_secs_f64()),
                    )
                } else if e.is_connect() {
                    Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
                } else {
                    Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        let stream = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });
        Ok(Box::pin(stream))
    }
}

/// Receives the events of one transport session.
pub trait StreamListener: Send + 'static {
    /// A raw event payload, in the order its bytes arrived.
    fn on_chunk(&mut self, chunk: String);

    /// The stream ended normally.
    fn on_complete(&mut self);

    /// The session failed; no further callbacks follow.
    fn on_error(&mut self, error: Error);
}

/// How a transport session ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed,
    Failed(Error),
    /// [`SessionHandle::stop`] was called first.
    Stopped,
}

impl Outcome {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Outcome::Stopped)
    }
}

/// Cancels and observes a running session.
#[derive(Debug)]
pub struct SessionHandle {
    token: CancellationToken,
    task: JoinHandle<Outcome>,
}

impl SessionHandle {
    /// Cooperatively cancels the session.
    ///
    /// The network operation is aborted and no further listener callback
    /// fires, including terminal ones.  Returns false when the session was
    /// already stopped.
    pub fn stop(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Returns true once [`SessionHandle::stop`] was called.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns true once the session task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the session to end.
    pub async fn outcome(self) -> Outcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(Error::unknown(format!("transport task failed: {e}"))),
        }
    }
}

/// Opens transport sessions against a connector.
#[derive(Clone)]
pub struct Transport {
    connector: Arc<dyn Connect>,
    mode: DeliveryMode,
    retry: RetryPolicy,
    headers: Vec<(String, String)>,
}

impl Transport {
    /// Creates an HTTP transport in POST mode.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        Ok(Self::with_connector(Arc::new(HttpConnector::new(
            connect_timeout,
        )?)))
    }

    /// Creates a transport over any connector.
    pub fn with_connector(connector: Arc<dyn Connect>) -> Self {
        Self {
            connector,
            mode: DeliveryMode::default(),
            retry: RetryPolicy::default(),
            headers: Vec::new(),
        }
    }

    /// Sets the delivery mode.
    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the retry policy of the push channel.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets extra headers sent with every request.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Returns the delivery mode.
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Opens a session and returns its handle.
    ///
    /// Must be called from within a Tokio runtime.  Failures, including an
    /// unparseable endpoint, are reported to `listener` and never returned.
    pub fn open<L: StreamListener>(&self, endpoint: &str, body: &Value, listener: L) -> SessionHandle {
        let token = CancellationToken::new();
        let request = StreamRequest::new(self.mode, endpoint, body.clone())
            .map(|r| r.with_headers(self.headers.clone()));
        let connector = Arc::clone(&self.connector);
        let retry = self.retry;
        let task_token = token.clone();
        STREAM_OPENS.click();
        tracing::debug!(endpoint, mode = ?self.mode, "opening generation stream");

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match request {
                Err(err) => {
                    let mut listener = listener;
                    fail(&mut listener, err)
                }
                Ok(request) => match request.mode {
                    DeliveryMode::Post => post_session(connector, request, listener, task_token).await,
                    DeliveryMode::Get => {
                        push_session(connector, request, retry, listener, task_token).await
                    }
                },
            };
            STREAM_DURATION.add(started.elapsed().as_secs_f64());
            tracing::debug!(?outcome, "generation stream ended");
            outcome
        });

        SessionHandle { token, task }
    }
}

async fn post_session<L: StreamListener>(
    connector: Arc<dyn Connect>,
    request: StreamRequest,
    mut listener: L,
    token: CancellationToken,
) -> Outcome {
    let connected = tokio::select! {
        biased;
        _ = token.cancelled() => return Outcome::Stopped,
        connected = connector.connect(&request) => connected,
    };
    match connected {
        Ok(stream) => pump(stream, &mut listener, &token).await,
        Err(err) => fail(&mut listener, err),
    }
}

async fn push_session<L: StreamListener>(
    connector: Arc<dyn Connect>,
    request: StreamRequest,
    retry: RetryPolicy,
    listener: L,
    token: CancellationToken,
) -> Outcome {
    let client = ReconnectingClient::spawn_with_token(
        connector,
        request,
        retry,
        PushAdapter { listener },
        token.child_token(),
    );
    match client.join().await {
        CloseReason::Requested => Outcome::Stopped,
        CloseReason::Ended => Outcome::Completed,
        CloseReason::Exhausted(err) => Outcome::Failed(err),
    }
}

/// Feeds a response body through the decoder into `listener`.
///
/// Returns once the body ends, fails, or `token` is cancelled.  A body that
/// ends without a single byte is reported as an error.
pub async fn pump<L: StreamListener + ?Sized>(
    stream: ByteStream,
    listener: &mut L,
    token: &CancellationToken,
) -> Outcome {
    let received = AtomicU64::new(0);
    let counted = stream.inspect(|fragment| {
        if let Ok(bytes) = fragment {
            received.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            STREAM_BYTES.count(bytes.len() as u64);
        }
    });
    let events = decode(counted);
    futures::pin_mut!(events);

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Outcome::Stopped,
            next = events.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                if token.is_cancelled() {
                    return Outcome::Stopped;
                }
                STREAM_CHUNKS.click();
                listener.on_chunk(chunk);
            }
            Some(Err(err)) => return fail(listener, err),
            None => break,
        }
    }

    // stop() may land between the end of the body and the terminal callback
    if token.is_cancelled() {
        return Outcome::Stopped;
    }
    if received.load(Ordering::Relaxed) == 0 {
        return fail(listener, Error::streaming("Response body is empty", None));
    }
    listener.on_complete();
    Outcome::Completed
}

fn fail<L: StreamListener + ?Sized>(listener: &mut L, err: Error) -> Outcome {
    STREAM_ERRORS.click();
    tracing::warn!(error = %err, "generation stream failed");
    listener.on_error(err.clone());
    Outcome::Failed(err)
}

/// Presents a push channel as a transport session.
struct PushAdapter<L> {
    listener: L,
}

impl<L: StreamListener> PushListener for PushAdapter<L> {
    fn on_message(&mut self, payload: String) {
        STREAM_CHUNKS.click();
        self.listener.on_chunk(payload);
    }

    fn on_error(&mut self, error: &Error) {
        tracing::debug!(error = %error, "push channel attempt failed");
    }

    fn on_close(&mut self, reason: &CloseReason) {
        match reason {
            CloseReason::Requested => {}
            CloseReason::Ended => self.listener.on_complete(),
            CloseReason::Exhausted(err) => {
                STREAM_ERRORS.click();
                self.listener.on_error(err.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;

    use crate::testing::{Script, ScriptedConnector, channel_body, send_line};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Chunk(String),
        Complete,
        Error(String),
    }

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    impl StreamListener for Recorder {
        fn on_chunk(&mut self, chunk: String) {
            self.events.lock().unwrap().push(Event::Chunk(chunk));
        }

        fn on_complete(&mut self) {
            self.events.lock().unwrap().push(Event::Complete);
        }

        fn on_error(&mut self, error: Error) {
            self.events.lock().unwrap().push(Event::Error(error.to_string()));
        }
    }

    fn transport(scripts: Vec<Script>) -> (Arc<ScriptedConnector>, Transport) {
        let connector = Arc::new(ScriptedConnector::new(scripts));
        let transport = Transport::with_connector(connector.clone());
        (connector, transport)
    }

    #[test]
    fn get_request_encodes_body_as_query() {
        let body = json!({"nl_query": "total orders", "dynamic_params": [], "limit": 5});
        let request = StreamRequest::new(DeliveryMode::Get, "http://svc/stream", body).unwrap();
        assert_eq!(
            request.url.as_str(),
            "http://svc/stream?nl_query=total+orders&dynamic_params=%5B%5D&limit=5"
        );

        let post = StreamRequest::new(DeliveryMode::Post, "http://svc/stream", json!({"a": 1}))
            .unwrap();
        assert_eq!(post.url.as_str(), "http://svc/stream");
    }

    #[test]
    fn delivery_mode_from_str() {
        assert_eq!("GET".parse::<DeliveryMode>().unwrap(), DeliveryMode::Get);
        assert_eq!("post".parse::<DeliveryMode>().unwrap(), DeliveryMode::Post);
        assert!("put".parse::<DeliveryMode>().unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn post_delivers_chunks_then_completes() {
        let (connector, transport) = transport(vec![Script::lines(&[
            "data: {\"content\":\"a\"}\nda",
            "ta: b\n\n",
            "data: c",
        ])]);
        let recorder = Recorder::default();
        let handle = transport.open("http://svc/stream", &json!({"nl_query": "q"}), recorder.clone());
        assert!(matches!(handle.outcome().await, Outcome::Completed));
        assert_eq!(
            recorder.events(),
            vec![
                Event::Chunk(r#"{"content":"a"}"#.to_string()),
                Event::Chunk("b".to_string()),
                Event::Chunk("c".to_string()),
                Event::Complete,
            ]
        );
        let requests = connector.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].mode, DeliveryMode::Post);
        assert_eq!(requests[0].body, json!({"nl_query": "q"}));
    }

    #[tokio::test]
    async fn connect_failure_reports_one_error() {
        let (_, transport) = transport(vec![Script::Fail(Error::api(
            503,
            "HTTP error! Status: 503",
            None,
        ))]);
        let recorder = Recorder::default();
        let handle = transport.open("http://svc/stream", &json!({}), recorder.clone());
        let outcome = handle.outcome().await;
        assert!(matches!(outcome, Outcome::Failed(Error::Api { status_code: 503, .. })));
        assert_eq!(
            recorder.events(),
            vec![Event::Error("API error (503): HTTP error! Status: 503".to_string())]
        );
    }

    #[tokio::test]
    async fn empty_body_is_an_error() {
        let (_, transport) = transport(vec![Script::Body(Vec::new())]);
        let recorder = Recorder::default();
        let handle = transport.open("http://svc/stream", &json!({}), recorder.clone());
        assert!(matches!(handle.outcome().await, Outcome::Failed(_)));
        assert_eq!(
            recorder.events(),
            vec![Event::Error("Streaming error: Response body is empty".to_string())]
        );
    }

    #[tokio::test]
    async fn body_failure_after_chunks() {
        let (_, transport) = transport(vec![Script::Body(vec![
            Ok(Bytes::from_static(b"data: one\n")),
            Err(Error::streaming("Error in HTTP stream: reset", None)),
        ])]);
        let recorder = Recorder::default();
        let handle = transport.open("http://svc/stream", &json!({}), recorder.clone());
        assert!(matches!(handle.outcome().await, Outcome::Failed(_)));
        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Event::Chunk("one".to_string()));
        assert!(matches!(events[1], Event::Error(_)));
    }

    #[tokio::test]
    async fn bad_endpoint_reports_error() {
        let (connector, transport) = transport(vec![]);
        let recorder = Recorder::default();
        let handle = transport.open("not a url", &json!({}), recorder.clone());
        assert!(matches!(handle.outcome().await, Outcome::Failed(Error::Url { .. })));
        assert_eq!(recorder.events().len(), 1);
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn stop_silences_the_session() {
        let (tx, body) = channel_body();
        let (_, transport) = transport(vec![body]);
        let recorder = Recorder::default();
        let handle = transport.open("http://svc/stream", &json!({}), recorder.clone());

        send_line(&tx, "first");
        while recorder.events().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(handle.stop());
        assert!(!handle.stop());
        send_line(&tx, "second");
        drop(tx);

        assert!(handle.outcome().await.is_stopped());
        assert_eq!(recorder.events(), vec![Event::Chunk("first".to_string())]);
    }

    #[tokio::test]
    async fn get_mode_streams_through_push_channel() {
        let (connector, transport) = transport(vec![Script::lines(&["data: x\n", "data: y\n"])]);
        let transport = transport.with_mode(DeliveryMode::Get);
        let recorder = Recorder::default();
        let handle = transport.open("http://svc/stream", &json!({"nl_query": "q"}), recorder.clone());
        assert!(matches!(handle.outcome().await, Outcome::Completed));
        assert_eq!(
            recorder.events(),
            vec![
                Event::Chunk("x".to_string()),
                Event::Chunk("y".to_string()),
                Event::Complete,
            ]
        );
        assert_eq!(connector.requests()[0].url.query(), Some("nl_query=q"));
    }

    #[tokio::test(start_paused = true)]
    async fn get_mode_exhaustion_is_one_error() {
        let (connector, transport) = transport(vec![]);
        let transport = transport.with_mode(DeliveryMode::Get).with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        });
        let recorder = Recorder::default();
        let handle = transport.open("http://svc/stream", &json!({}), recorder.clone());
        let outcome = handle.outcome().await;
        assert!(matches!(outcome, Outcome::Failed(Error::ReconnectExhausted { attempts: 3, .. })));
        assert_eq!(connector.attempts(), 3);
        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Error(_)));
    }

    #[tokio::test]
    async fn stop_at_end_of_body_suppresses_completion() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        let mut fragments = vec![Ok::<_, Error>(Bytes::from_static(b"data: last\n"))].into_iter();
        let body: ByteStream = Box::pin(futures::stream::poll_fn(move |_| {
            let next = fragments.next();
            if next.is_none() {
                canceller.cancel();
            }
            std::task::Poll::Ready(next)
        }));
        let mut recorder = Recorder::default();
        let outcome = pump(body, &mut recorder, &token).await;
        assert!(matches!(outcome, Outcome::Stopped));
        assert_eq!(recorder.events(), vec![Event::Chunk("last".to_string())]);
    }
}
