//! A small HTTP client facade.
//!
//! ```no_run
//! # async fn run() -> courier::Result<()> {
//! use courier::{ClientConfig, HeaderSet, HttpClient, ParameterSet};
//!
//! let client = HttpClient::new(ClientConfig::default())?;
//! let response = client
//!     .post("http://localhost:8080/demo/base/remove")
//!     .params(ParameterSet::new().add("name", "post Value"))
//!     .headers(HeaderSet::new().add("token", "post token"))
//!     .send()
//!     .await?;
//! println!("{} {}", response.status(), response.data());
//! # Ok(())
//! # }
//! ```

mod error;
mod headers;
mod params;
mod response;

pub mod config;
pub mod dispatch;
pub mod http;
pub mod text;
pub mod transport;
pub mod url;

pub use crate::config::ClientConfig;
pub use crate::dispatch::{DispatchHandle, Dispatcher, State};
pub use crate::http::{HttpClient, Method};
pub use crate::url::UrlSpec;
pub use error::*;
pub use headers::HeaderSet;
pub use params::ParameterSet;
pub use response::Response;
