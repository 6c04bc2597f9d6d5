//! The byte-moving side of a dispatch.
//!
//! A [`Transport`] opens one [`Connection`] per dispatch. The dispatcher
//! writes the body (if any), reads the status line and headers, reads the
//! body, and always calls [`Connection::close`], whatever the outcome.
//!
//! [`ReqwestTransport`] is the default implementation. Tests and embedders
//! can plug in their own.

use std::future::Future;

use bytes::Bytes;
use tracing::trace;
use url::Url;

use crate::{config::ClientConfig, http::Method, BoxError, HeaderSet, Result};

#[derive(Debug, thiserror::Error)]
pub enum TransportFault {
    /// No connection to the target could be established.
    #[error("connect: {0}")]
    Connect(#[source] BoxError),

    /// The connection was established but reading or writing failed.
    #[error("i/o: {0}")]
    Io(#[source] BoxError),
}

impl TransportFault {
    pub fn connect(cause: impl Into<BoxError>) -> Self {
        TransportFault::Connect(cause.into())
    }

    pub fn io(cause: impl Into<BoxError>) -> Self {
        TransportFault::Io(cause.into())
    }
}

/// What the transport needs to know to open a connection.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub method: Method,
    /// Final target, query included.
    pub url: Url,
    pub headers: HeaderSet,
}

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderSet,
}

pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    fn open(
        &self,
        request: &OpenRequest,
    ) -> impl Future<Output = std::result::Result<Self::Connection, TransportFault>> + Send;
}

pub trait Connection: Send + 'static {
    fn write_body(
        &mut self,
        body: Bytes,
    ) -> impl Future<Output = std::result::Result<(), TransportFault>> + Send;

    fn read_head(
        &mut self,
    ) -> impl Future<Output = std::result::Result<ResponseHead, TransportFault>> + Send;

    fn read_body(
        &mut self,
    ) -> impl Future<Output = std::result::Result<Bytes, TransportFault>> + Send;

    /// Releases the connection. Must be safe to call more than once.
    fn close(&mut self);
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wraps a caller-built client.
    ///
    /// The client must not keep idle connections (build it with
    /// `pool_max_idle_per_host(0)`), otherwise a finished dispatch hands its
    /// socket to the next one instead of closing it.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Builds a client that opens a fresh connection for every dispatch and
    /// drops it once the dispatch ends.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(0);
        if config.no_proxy {
            builder = builder.no_proxy();
        }
        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self::new(builder.build()?))
    }
}

impl Transport for ReqwestTransport {
    type Connection = ReqwestConnection;

    async fn open(
        &self,
        request: &OpenRequest,
    ) -> std::result::Result<ReqwestConnection, TransportFault> {
        let mut builder = self
            .client
            .request(request.method.clone().into_inner(), request.url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        Ok(ReqwestConnection {
            request: Some(builder),
            response: None,
        })
    }
}

/// A reqwest request in flight. The request goes out on the first
/// [`read_head`](Connection::read_head).
#[derive(Debug)]
pub struct ReqwestConnection {
    request: Option<reqwest::RequestBuilder>,
    response: Option<reqwest::Response>,
}

fn classify(error: reqwest::Error) -> TransportFault {
    if error.is_connect() {
        TransportFault::connect(error)
    } else {
        TransportFault::io(error)
    }
}

impl Connection for ReqwestConnection {
    async fn write_body(&mut self, body: Bytes) -> std::result::Result<(), TransportFault> {
        let request = self
            .request
            .take()
            .ok_or_else(|| TransportFault::io("request already sent"))?;
        self.request = Some(request.body(body));
        Ok(())
    }

    async fn read_head(&mut self) -> std::result::Result<ResponseHead, TransportFault> {
        let request = self
            .request
            .take()
            .ok_or_else(|| TransportFault::io("request already sent"))?;
        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        let head = ResponseHead {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
            headers: HeaderSet::from(response.headers()),
        };
        self.response = Some(response);
        Ok(head)
    }

    async fn read_body(&mut self) -> std::result::Result<Bytes, TransportFault> {
        let response = self
            .response
            .take()
            .ok_or_else(|| TransportFault::io("no response to read"))?;
        response.bytes().await.map_err(classify)
    }

    fn close(&mut self) {
        let pending_request = self.request.take().is_some();
        let pending_response = self.response.take().is_some();
        if pending_request || pending_response {
            trace!("connection closed before completion");
        }
    }
}
