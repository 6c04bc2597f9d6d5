//! One request, from caller-supplied text to a decoded [`Response`].
//!
//! A [`Dispatcher`] walks `Built → Connecting → Sent → AwaitingResponse →
//! Completed`, dropping to `Failed` on the first error. It is consumed by
//! [`send`](Dispatcher::send) or [`then`](Dispatcher::then), so one
//! dispatcher serves exactly one request.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use bytes::Bytes;
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{debug, instrument, trace};
use url::Url;

use crate::{
    config::DispatchSettings,
    http::Method,
    transport::{Connection, OpenRequest, Transport, TransportFault},
    url::normalize,
    DispatchError, DispatchResult, HeaderSet, ParameterSet, Response,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Built,
    Connecting,
    Sent,
    AwaitingResponse,
    Completed,
    Failed,
}

/// Closes the wrapped connection when dropped, so every exit path
/// (including cancellation and task abort) releases it.
struct ConnectionGuard<C: Connection>(C);

impl<C: Connection> Deref for ConnectionGuard<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.0
    }
}

impl<C: Connection> DerefMut for ConnectionGuard<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.0
    }
}

impl<C: Connection> Drop for ConnectionGuard<C> {
    fn drop(&mut self) {
        self.0.close();
    }
}

type ConnectionSlot<T> = Option<ConnectionGuard<<T as Transport>::Connection>>;

#[derive(Debug)]
pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    settings: Arc<DispatchSettings>,
    method: Method,
    url: String,
    params: ParameterSet,
    headers: HeaderSet,
    state: State,
}

impl<T: Transport> Dispatcher<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        settings: Arc<DispatchSettings>,
        method: Method,
        url: String,
    ) -> Self {
        Self {
            transport,
            settings,
            method,
            url,
            params: ParameterSet::new(),
            headers: HeaderSet::new(),
            state: State::Built,
        }
    }

    pub fn params(mut self, params: ParameterSet) -> Self {
        self.params = params;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderSet) -> Self {
        self.headers = headers;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Runs the dispatch on the current task.
    ///
    /// Dropping the returned future aborts the request and closes the
    /// connection.
    pub async fn send(mut self) -> DispatchResult<Response> {
        let mut slot = None;
        let result = self.execute(&mut slot).await;
        drop(slot);
        self.finish(result)
    }

    /// Runs the dispatch on a spawned tokio task and calls `callback` exactly
    /// once with the outcome, on that task.
    pub fn then<F>(mut self, callback: F) -> DispatchHandle
    where
        F: FnOnce(DispatchResult<Response>) + Send + 'static,
    {
        let cancel = Arc::new(Notify::new());
        let cancelled = cancel.clone();
        let task = tokio::spawn(async move {
            let mut slot = None;
            let result = tokio::select! {
                biased;
                _ = cancelled.notified() => Err(DispatchError::Cancelled),
                result = self.execute(&mut slot) => result,
            };
            drop(slot);
            callback(self.finish(result));
        });
        DispatchHandle { cancel, task }
    }

    #[instrument(skip_all, fields(method = %self.method, url = %self.url))]
    async fn execute(&mut self, slot: &mut ConnectionSlot<T>) -> DispatchResult<Response> {
        let (request, body) = self.build()?;

        self.transition(State::Connecting);
        let connection = self
            .transport
            .open(&request)
            .await
            .map_err(|fault| DispatchError::Connection(cause(fault)))?;
        let connection = slot.insert(ConnectionGuard(connection));

        if let Some(body) = body {
            trace!(len = body.len(), "writing body");
            connection.write_body(body).await.map_err(classify)?;
        }
        self.transition(State::Sent);

        self.transition(State::AwaitingResponse);
        let head = connection.read_head().await.map_err(classify)?;
        let body = connection.read_body().await.map_err(classify)?;
        debug!(status = head.status, len = body.len(), "response received");
        Response::decode(head, body, self.settings.default_charset)
    }

    /// Everything that can be checked before touching the network.
    fn build(&mut self) -> DispatchResult<(OpenRequest, Option<Bytes>)> {
        let target = normalize(&self.url)?;
        let mut headers = std::mem::take(&mut self.headers);
        validate_headers(&headers)?;

        let encoded = std::mem::take(&mut self.params).encode_with(self.settings.request_charset);
        let mut url = target.url().clone();
        let body = if self.method.carries_body() {
            if !headers.contains("Content-Type") {
                headers.insert(
                    "Content-Type",
                    format!(
                        "application/x-www-form-urlencoded; charset={}",
                        self.settings.request_charset.name().to_ascii_lowercase()
                    ),
                );
            }
            Some(Bytes::from(encoded))
        } else {
            append_query(&mut url, &encoded);
            None
        };
        if let Some(agent) = &self.settings.user_agent {
            if !headers.contains("User-Agent") {
                headers.insert("User-Agent", agent.clone());
            }
        }
        Ok((
            OpenRequest {
                method: self.method.clone(),
                url,
                headers,
            },
            body,
        ))
    }

    fn transition(&mut self, next: State) {
        trace!(from = ?self.state, to = ?next, "dispatch state");
        self.state = next;
    }

    fn finish(&mut self, result: DispatchResult<Response>) -> DispatchResult<Response> {
        match &result {
            Ok(response) => {
                self.transition(State::Completed);
                debug!(status = response.status(), "dispatch completed");
            }
            Err(e) => {
                self.transition(State::Failed);
                debug!("dispatch failed: {}", e);
            }
        }
        result
    }
}

fn cause(fault: TransportFault) -> crate::BoxError {
    match fault {
        TransportFault::Connect(e) | TransportFault::Io(e) => e,
    }
}

fn classify(fault: TransportFault) -> DispatchError {
    match fault {
        TransportFault::Connect(e) => DispatchError::Connection(e),
        TransportFault::Io(e) => DispatchError::Transport(e),
    }
}

fn validate_headers(headers: &HeaderSet) -> DispatchResult<()> {
    for (name, value) in headers.iter() {
        http::HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| DispatchError::InvalidHeader(format!("bad name {:?}", name)))?;
        http::HeaderValue::from_str(value)
            .map_err(|_| DispatchError::InvalidHeader(format!("bad value for {}", name)))?;
    }
    Ok(())
}

/// Appends already-escaped parameters after any existing query.
fn append_query(url: &mut Url, encoded: &str) {
    if encoded.is_empty() {
        return;
    }
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, encoded),
        _ => encoded.to_string(),
    };
    url.set_query(Some(&query));
}

/// Handle to a dispatch started with [`Dispatcher::then`].
///
/// Dropping the handle lets the dispatch run to completion.
#[derive(Debug)]
pub struct DispatchHandle {
    cancel: Arc<Notify>,
    task: JoinHandle<()>,
}

impl DispatchHandle {
    /// Aborts the in-flight request; the callback then receives
    /// [`DispatchError::Cancelled`]. No effect once the dispatch finished.
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits until the callback has returned.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ClientConfig, transport::ResponseHead, HttpClient};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };
    use tokio::sync::oneshot;

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Respond,
        RefuseConnect,
        FailHead,
        FailBody,
        Hang,
    }

    #[derive(Debug, Default)]
    struct Record {
        opens: AtomicUsize,
        closes: AtomicUsize,
        requests: Mutex<Vec<OpenRequest>>,
        bodies: Mutex<Vec<Bytes>>,
    }

    #[derive(Debug)]
    struct MockTransport {
        behavior: Behavior,
        content_type: Option<&'static str>,
        body: &'static [u8],
        record: Arc<Record>,
    }

    impl MockTransport {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                content_type: Some("text/plain; charset=utf-8"),
                body: b"hello",
                record: Arc::new(Record::default()),
            }
        }
    }

    struct MockConnection {
        behavior: Behavior,
        content_type: Option<&'static str>,
        body: &'static [u8],
        record: Arc<Record>,
    }

    impl Transport for MockTransport {
        type Connection = MockConnection;

        async fn open(&self, request: &OpenRequest) -> Result<MockConnection, TransportFault> {
            self.record.opens.fetch_add(1, Ordering::SeqCst);
            self.record.requests.lock().unwrap().push(request.clone());
            if let Behavior::RefuseConnect = self.behavior {
                return Err(TransportFault::connect("connection refused"));
            }
            Ok(MockConnection {
                behavior: self.behavior,
                content_type: self.content_type,
                body: self.body,
                record: self.record.clone(),
            })
        }
    }

    impl Connection for MockConnection {
        async fn write_body(&mut self, body: Bytes) -> Result<(), TransportFault> {
            self.record.bodies.lock().unwrap().push(body);
            Ok(())
        }

        async fn read_head(&mut self) -> Result<ResponseHead, TransportFault> {
            match self.behavior {
                Behavior::Hang => std::future::pending().await,
                Behavior::FailHead => Err(TransportFault::io("reset by peer")),
                _ => {
                    let mut headers = HeaderSet::new();
                    if let Some(content_type) = self.content_type {
                        headers.insert("Content-Type", content_type);
                    }
                    Ok(ResponseHead {
                        status: 200,
                        status_text: "OK".to_string(),
                        headers,
                    })
                }
            }
        }

        async fn read_body(&mut self) -> Result<Bytes, TransportFault> {
            match self.behavior {
                Behavior::FailBody => Err(TransportFault::io("truncated body")),
                _ => Ok(Bytes::from_static(self.body)),
            }
        }

        fn close(&mut self) {
            self.record.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn client(transport: MockTransport) -> (HttpClient<MockTransport>, Arc<Record>) {
        let record = transport.record.clone();
        let client = HttpClient::with_transport(transport, &ClientConfig::default()).unwrap();
        (client, record)
    }

    async fn deliver(
        handle: DispatchHandle,
        rx: oneshot::Receiver<DispatchResult<Response>>,
    ) -> DispatchResult<Response> {
        handle.finished().await;
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_get_appends_query() {
        let (client, record) = client(MockTransport::new(Behavior::Respond));
        let response = client
            .get("http://localhost:8080/demo/base/add?x=0#top")
            .params(ParameterSet::new().add("value", "11 111").add("a", "&"))
            .header("token", "22222")
            .send()
            .await
            .unwrap();
        assert_eq!(response.data(), "hello");
        assert_eq!(response.status(), 200);

        let requests = record.requests.lock().unwrap();
        assert_eq!(
            requests[0].url.as_str(),
            "http://localhost:8080/demo/base/add?x=0&value=11%20111&a=%26#top"
        );
        assert_eq!(requests[0].method, Method::GET);
        assert_eq!(requests[0].headers.get("Token"), Some("22222"));
        assert!(record.bodies.lock().unwrap().is_empty());
        assert_eq!(record.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_post_writes_body() {
        let (client, record) = client(MockTransport::new(Behavior::Respond));
        client
            .post("http://localhost:8080/demo/base/remove")
            .param("name", "post Value")
            .header("token", "post token")
            .send()
            .await
            .unwrap();
        let bodies = record.bodies.lock().unwrap();
        assert_eq!(bodies[0], Bytes::from_static(b"name=post%20Value"));
        let requests = record.requests.lock().unwrap();
        assert_eq!(requests[0].url.as_str(), "http://localhost:8080/demo/base/remove");
        assert_eq!(
            requests[0].headers.content_type(),
            Some("application/x-www-form-urlencoded; charset=utf-8")
        );
    }

    #[tokio::test]
    async fn test_post_empty_params_sends_empty_body() {
        let (client, record) = client(MockTransport::new(Behavior::Respond));
        client
            .request(Method::PUT, "http://localhost/")
            .header("content-type", "text/plain")
            .send()
            .await
            .unwrap();
        assert_eq!(record.bodies.lock().unwrap()[0], Bytes::new());
        let requests = record.requests.lock().unwrap();
        assert_eq!(requests[0].headers.content_type(), Some("text/plain"));
        assert_eq!(requests[0].headers.len(), 1);
    }

    #[tokio::test]
    async fn test_user_agent_from_config() {
        let transport = MockTransport::new(Behavior::Respond);
        let record = transport.record.clone();
        let config = ClientConfig::default().with_user_agent("courier-test");
        let client = HttpClient::with_transport(transport, &config).unwrap();
        client.get("http://localhost/").send().await.unwrap();
        client
            .get("http://localhost/")
            .header("user-agent", "mine")
            .send()
            .await
            .unwrap();
        let requests = record.requests.lock().unwrap();
        assert_eq!(requests[0].headers.get("User-Agent"), Some("courier-test"));
        assert_eq!(requests[1].headers.get("User-Agent"), Some("mine"));
    }

    #[tokio::test]
    async fn test_invalid_url_never_opens() {
        let (client, record) = client(MockTransport::new(Behavior::Respond));
        for url in ["", "localhost:8080/demo", "http://exa mple.com/"] {
            let (tx, rx) = oneshot::channel();
            let handle = client.dispatch(
                url,
                Method::GET,
                ParameterSet::new(),
                HeaderSet::new(),
                move |result| {
                    let _ = tx.send(result);
                },
            );
            let result = deliver(handle, rx).await;
            assert!(matches!(result, Err(DispatchError::InvalidUrl(_))), "{url:?}");
        }
        assert_eq!(record.opens.load(Ordering::SeqCst), 0);
        assert_eq!(record.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_header_never_opens() {
        let (client, record) = client(MockTransport::new(Behavior::Respond));
        let result = client
            .get("http://localhost/")
            .header("bad header", "x")
            .send()
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidHeader(_))));
        let result = client
            .get("http://localhost/")
            .header("x-ok", "line\nbreak")
            .send()
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidHeader(_))));
        assert_eq!(record.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let (client, record) = client(MockTransport::new(Behavior::RefuseConnect));
        let result = client.get("http://localhost:1/").send().await;
        assert!(matches!(result, Err(DispatchError::Connection(_))));
        assert_eq!(record.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_failures_close_connection() {
        for behavior in [Behavior::FailHead, Behavior::FailBody] {
            let (client, record) = client(MockTransport::new(behavior));
            let result = client.get("http://localhost/").send().await;
            assert!(matches!(result, Err(DispatchError::Transport(_))), "{behavior:?}");
            assert_eq!(record.closes.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_decode_failure_closes_connection() {
        let mut transport = MockTransport::new(Behavior::Respond);
        transport.body = b"\xff\xfe\xfd";
        let (client, record) = client(transport);
        let result = client.get("http://localhost/").send().await;
        assert!(matches!(result, Err(DispatchError::Decode { .. })));
        assert_eq!(record.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_charset_when_undeclared() {
        let mut transport = MockTransport::new(Behavior::Respond);
        transport.content_type = None;
        transport.body = b"\xC4\xE3\xBA\xC3";
        let record = transport.record.clone();
        let config = ClientConfig::default().with_default_charset("gbk");
        let client = HttpClient::with_transport(transport, &config).unwrap();
        let response = client.get("http://localhost/").send().await.unwrap();
        assert_eq!(response.data(), "你好");
        assert_eq!(record.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_then_delivers_once() {
        let (client, _record) = client(MockTransport::new(Behavior::Respond));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (tx, rx) = oneshot::channel();
        let handle = client.get("http://localhost/").then(move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        });
        let response = deliver(handle, rx).await.unwrap();
        assert_eq!(response.data(), "hello");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let (client, record) = client(MockTransport::new(Behavior::Hang));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (tx, rx) = oneshot::channel();
        let handle = client.get("http://localhost/").then(move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        });
        while record.opens.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        handle.cancel();
        let result = deliver(handle, rx).await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(record.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let (client, _record) = client(MockTransport::new(Behavior::Respond));
        let (tx, rx) = oneshot::channel();
        let handle = client.get("http://localhost/").then(move |result| {
            let _ = tx.send(result);
        });
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        handle.cancel();
        assert!(deliver(handle, rx).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_handle_still_delivers() {
        let (client, _record) = client(MockTransport::new(Behavior::Respond));
        let (tx, rx) = oneshot::channel();
        drop(client.get("http://localhost/").then(move |result| {
            let _ = tx.send(result);
        }));
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (client, _record) = client(MockTransport::new(Behavior::Respond));
        let mut dispatcher = client.get("http://localhost/");
        assert_eq!(dispatcher.state(), State::Built);
        let mut slot = None;
        let result = dispatcher.execute(&mut slot).await;
        assert_eq!(dispatcher.state(), State::AwaitingResponse);
        drop(slot);
        assert!(dispatcher.finish(result).is_ok());
        assert_eq!(dispatcher.state(), State::Completed);

        let mut dispatcher = client.get("not a url");
        let mut slot = None;
        let result = dispatcher.execute(&mut slot).await;
        assert_eq!(dispatcher.state(), State::Built);
        assert!(dispatcher.finish(result).is_err());
        assert_eq!(dispatcher.state(), State::Failed);
    }

    #[test]
    fn test_append_query() {
        let mut url = Url::parse("http://h/p").unwrap();
        append_query(&mut url, "");
        assert_eq!(url.as_str(), "http://h/p");
        append_query(&mut url, "a=1");
        assert_eq!(url.as_str(), "http://h/p?a=1");
        append_query(&mut url, "b=2");
        assert_eq!(url.as_str(), "http://h/p?a=1&b=2");
    }
}
