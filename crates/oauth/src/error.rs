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
    /// The user did not complete the browser login in time.
    #[error(
        "login was not completed within {seconds}s; if no browser opened, visit this URL and retry: {auth_url}"
    )]
    AuthTimeout { seconds: u64, auth_url: String },
    /// Another interactive login is already waiting for its callback.
    #[error("a login is already in progress; finish it in the browser or cancel it first")]
    LoginAlreadyInProgress,
    /// The login wait was cancelled by the caller (shutdown).
    #[error("login was cancelled")]
    LoginCancelled,
    /// The authorization server redirected back with `?error=`.
    #[error("authorization was denied: {reason}")]
    AuthorizationDenied { reason: String },
    /// A refresh-token grant was rejected; callers fall back to a full login.
    #[error("token refresh failed: {reason}")]
    TokenRefreshFailed { reason: String },
    /// The token or registration endpoint answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    HttpStatus {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
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
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

toolmesh_common::impl_context!();
