//! OAuth2 authorization-code + PKCE login, refresh and credential persistence
//! for a public client talking to one authorization server.

pub mod callback_server;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod presenter;
pub mod storage;
pub mod types;

pub use {
    callback_server::{CallbackServer, PendingAuthorization},
    discovery::{
        AuthorizationServerMetadata, ClientRegistrationResponse, fetch_as_metadata,
        register_client,
    },
    engine::{AuthEngine, AuthPhase, AuthSettings, AuthStatus},
    flow::{AuthorizationRequest, OAuthFlow},
    presenter::{BrowserPresenter, UrlPresenter},
    storage::{CredentialStore, StoredCredentials},
    types::{
        ClientRegistration, OAuthConfig, OAuthTokens, PkceChallenge, serialize_option_secret,
        serialize_secret,
    },
};

pub use error::{Error, Result};
