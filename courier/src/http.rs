use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

use crate::{
    config::{ClientConfig, DispatchSettings},
    dispatch::{DispatchHandle, Dispatcher},
    transport::{ReqwestTransport, Transport},
    DispatchError, DispatchResult, HeaderSet, ParameterSet, Response, Result, StdResult,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Method(reqwest::Method);

impl Method {
    pub const GET: Method = Method(reqwest::Method::GET);
    pub const POST: Method = Method(reqwest::Method::POST);
    pub const PUT: Method = Method(reqwest::Method::PUT);
    pub const DELETE: Method = Method(reqwest::Method::DELETE);
    pub const HEAD: Method = Method(reqwest::Method::HEAD);
    pub const OPTIONS: Method = Method(reqwest::Method::OPTIONS);
    pub const PATCH: Method = Method(reqwest::Method::PATCH);
    pub const TRACE: Method = Method(reqwest::Method::TRACE);
    pub const CONNECT: Method = Method(reqwest::Method::CONNECT);

    pub fn from_bytes(s: &[u8]) -> DispatchResult<Self> {
        reqwest::Method::from_bytes(s)
            .map(Method)
            .map_err(|_| DispatchError::InvalidMethod(String::from_utf8_lossy(s).into_owned()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// POST, PUT and PATCH send parameters as the body; everything else
    /// appends them to the query.
    pub fn carries_body(&self) -> bool {
        self.0 == reqwest::Method::POST
            || self.0 == reqwest::Method::PUT
            || self.0 == reqwest::Method::PATCH
    }

    pub(crate) fn into_inner(self) -> reqwest::Method {
        self.0
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = DispatchError;

    fn from_str(s: &str) -> DispatchResult<Self> {
        Method::from_bytes(s.as_bytes())
    }
}

impl Serialize for Method {
    fn serialize<S>(&self, serializer: S) -> StdResult<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D>(deserializer: D) -> StdResult<Method, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Method::from_bytes(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// Entry point for building and dispatching requests.
///
/// Cloning is cheap; clones share the transport.
#[derive(Debug)]
pub struct HttpClient<T = ReqwestTransport> {
    transport: Arc<T>,
    settings: Arc<DispatchSettings>,
}

impl<T> Clone for HttpClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::from_config(&config)?;
        Self::with_transport(transport, &config)
    }
}

impl<T: Transport> HttpClient<T> {
    pub fn with_transport(transport: T, config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            transport: Arc::new(transport),
            settings: Arc::new(DispatchSettings::try_from(config)?),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn request(&self, method: Method, url: impl Into<String>) -> Dispatcher<T> {
        Dispatcher::new(
            self.transport.clone(),
            self.settings.clone(),
            method,
            url.into(),
        )
    }

    pub fn get(&self, url: impl Into<String>) -> Dispatcher<T> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: impl Into<String>) -> Dispatcher<T> {
        self.request(Method::POST, url)
    }

    /// Starts a dispatch in the background and hands its outcome to `callback`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch<F>(
        &self,
        url: impl Into<String>,
        method: Method,
        params: ParameterSet,
        headers: HeaderSet,
        callback: F,
    ) -> DispatchHandle
    where
        F: FnOnce(DispatchResult<Response>) + Send + 'static,
    {
        self.request(method, url)
            .params(params)
            .headers(headers)
            .then(callback)
    }
}
