use std::error::Error as StdError;

use toolmesh_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
    #[error(transparent)]
    TomlParse(#[from] toml::de::Error),
    #[error(transparent)]
    Transport(#[from] crate::types::McpTransportError),
    #[error(transparent)]
    Auth(#[from] toolmesh_oauth::Error),
    /// The primary endpoint could not be opened.
    #[error("failed to connect to primary endpoint '{endpoint}': {message}")]
    Connect { endpoint: String, message: String },
    #[error("not connected; call connect() first")]
    NotConnected,
    #[error("unknown tool '{name}'")]
    UnknownCapability { name: String },
    #[error("tool '{name}' timed out after {timeout_ms}ms")]
    InvocationTimeout { name: String, timeout_ms: u64 },
    #[error("tool execution failed for '{name}': {message}")]
    Execution { name: String, message: String },
    #[error("invalid configuration: {message}")]
    Config { message: String },
    #[error("{message}")]
    Message { message: String },
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Stable machine-readable kind, used in call outcomes.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::NotConnected => "not_connected",
            Self::UnknownCapability { .. } => "unknown_capability",
            Self::InvocationTimeout { .. } => "invocation_timeout",
            Self::Execution { .. } => "execution",
            Self::Auth(_) => "auth",
            Self::Config { .. } => "config",
            Self::Transport(_) | Self::Reqwest(_) => "transport",
            _ => "internal",
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

toolmesh_common::impl_context!();
