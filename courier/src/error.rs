pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Client build error: {0}")]
    Build(#[from] reqwest::Error),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Everything that can be delivered in place of a [`Response`](crate::Response).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Connection failed: {0}")]
    Connection(#[source] BoxError),

    #[error("Transport failed: {0}")]
    Transport(#[source] BoxError),

    /// `offset` is where the first malformed byte sequence starts.
    #[error("Cannot decode body as {charset}: malformed sequence at byte {offset}")]
    Decode {
        charset: &'static str,
        offset: usize,
    },

    #[error("Dispatch cancelled")]
    Cancelled,
}

impl DispatchError {
    pub fn is_invalid_url(&self) -> bool {
        matches!(self, DispatchError::InvalidUrl(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }
}

pub type StdResult<T, E> = std::result::Result<T, E>;

pub type Result<T> = std::result::Result<T, Error>;

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
