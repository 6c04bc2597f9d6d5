use std::time::Duration;

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::{text::blank_to_default, Error, Result};

/// Client options. Every field is optional when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connect timeout in milliseconds. `None` leaves it to the transport.
    pub connect_timeout_ms: Option<u64>,
    /// Whole-request timeout in milliseconds, from connect to the last body byte.
    pub timeout_ms: Option<u64>,
    /// Used to decode bodies whose `Content-Type` names no usable charset.
    pub default_charset: String,
    /// Used to encode parameters before percent-escaping.
    pub request_charset: String,
    /// Sent as `User-Agent` unless the request sets one.
    pub user_agent: Option<String>,
    /// Ignore `HTTP_PROXY` and friends and always connect directly.
    pub no_proxy: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: None,
            timeout_ms: None,
            default_charset: "utf-8".to_string(),
            request_charset: "utf-8".to_string(),
            user_agent: None,
            no_proxy: false,
        }
    }
}

impl ClientConfig {
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn with_default_charset(mut self, label: impl Into<String>) -> Self {
        self.default_charset = label.into();
        self
    }

    pub fn with_request_charset(mut self, label: impl Into<String>) -> Self {
        self.request_charset = label.into();
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn with_no_proxy(mut self) -> Self {
        self.no_proxy = true;
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// The parts of [`ClientConfig`] the dispatcher needs, with labels resolved.
#[derive(Debug, Clone)]
pub(crate) struct DispatchSettings {
    pub default_charset: &'static Encoding,
    pub request_charset: &'static Encoding,
    pub user_agent: Option<String>,
}

impl TryFrom<&ClientConfig> for DispatchSettings {
    type Error = Error;

    fn try_from(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            default_charset: encoding_for(&config.default_charset)?,
            request_charset: encoding_for(&config.request_charset)?.output_encoding(),
            user_agent: config.user_agent.clone(),
        })
    }
}

/// A blank label means UTF-8.
fn encoding_for(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(blank_to_default(Some(label), "utf-8").as_bytes())
        .ok_or_else(|| Error::Config(format!("unknown charset: {}", label)))
}
