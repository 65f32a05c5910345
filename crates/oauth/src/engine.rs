//! Single-login authorization engine.
//!
//! Owns the credential store, decides between the cached token, a silent
//! refresh and a full browser login, and guarantees at most one login is
//! waiting for its callback at any time.

use std::{
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use {
    secrecy::ExposeSecret,
    serde::{Deserialize, Serialize},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    url::Url,
};

#[cfg(feature = "metrics")]
use toolmesh_metrics::{counter, oauth as oauth_metrics};

use crate::{
    Error, Result,
    callback_server::{CallbackServer, PendingAuthorization},
    discovery::{fetch_as_metadata, register_client},
    flow::OAuthFlow,
    presenter::{BrowserPresenter, UrlPresenter},
    storage::CredentialStore,
    types::{ClientRegistration, OAuthTokens},
};

// ── Settings ───────────────────────────────────────────────────────────────

/// Authorization settings, usually the `[auth]` table of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Authorization server base URL used for metadata discovery.
    pub issuer: Option<String>,
    pub client_name: String,
    pub scope: Option<String>,
    pub callback_port: u16,
    pub callback_path: String,
    pub login_timeout_secs: u64,
    /// Tokens expiring within this many seconds are refreshed before use.
    pub expiry_margin_secs: u64,
    /// Pre-registered public client. Skips dynamic registration.
    pub client_id: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            issuer: None,
            client_name: "toolmesh".into(),
            scope: Some("mcp:tools mcp:resources mcp:prompts".into()),
            callback_port: 8765,
            callback_path: "/callback".into(),
            login_timeout_secs: 120,
            expiry_margin_secs: 60,
            client_id: None,
            authorization_endpoint: None,
            token_endpoint: None,
        }
    }
}

impl AuthSettings {
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{}", self.callback_port, self.callback_path)
    }

    #[must_use]
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    fn issuer_url(&self) -> Result<Url> {
        let issuer = self
            .issuer
            .as_deref()
            .ok_or_else(|| Error::message("no authorization issuer configured"))?;
        Url::parse(issuer)
            .map_err(|source| Error::external(format!("invalid issuer URL: {issuer}"), source))
    }
}

// ── Phase ──────────────────────────────────────────────────────────────────

/// Observable phase of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    Idle,
    AwaitingUserLogin,
    ExchangingCode,
    Authorized,
    Refreshing,
    Failed,
}

/// Snapshot for `status` reporting.
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub phase: AuthPhase,
    pub client_id: Option<String>,
    pub has_tokens: bool,
    pub has_refresh_token: bool,
    pub expires_at: Option<u64>,
    pub credentials_path: String,
}

// ── Login slot ─────────────────────────────────────────────────────────────

/// Holds the cancellation token of the one pending login; cleared on drop.
struct LoginGuard<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
    cancel: CancellationToken,
}

impl<'a> LoginGuard<'a> {
    fn acquire(slot: &'a Mutex<Option<CancellationToken>>) -> Result<Self> {
        let mut current = slot.lock().unwrap_or_else(|e| e.into_inner());
        if current.is_some() {
            return Err(Error::LoginAlreadyInProgress);
        }
        let cancel = CancellationToken::new();
        *current = Some(cancel.clone());
        Ok(Self { slot, cancel })
    }
}

impl Drop for LoginGuard<'_> {
    fn drop(&mut self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

// ── Engine ─────────────────────────────────────────────────────────────────

pub struct AuthEngine {
    settings: AuthSettings,
    store: CredentialStore,
    http: reqwest::Client,
    presenter: Arc<dyn UrlPresenter>,
    phase: Mutex<AuthPhase>,
    tokens: RwLock<Option<OAuthTokens>>,
    refresh_lock: tokio::sync::Mutex<()>,
    login_slot: Mutex<Option<CancellationToken>>,
}

impl AuthEngine {
    /// Create an engine over `store`, loading any persisted token set.
    pub fn new(settings: AuthSettings, store: CredentialStore) -> Self {
        let tokens = store.load().tokens;
        let phase = if tokens.is_some() {
            AuthPhase::Authorized
        } else {
            AuthPhase::Idle
        };
        Self {
            settings,
            store,
            http: reqwest::Client::new(),
            presenter: Arc::new(BrowserPresenter),
            phase: Mutex::new(phase),
            tokens: RwLock::new(tokens),
            refresh_lock: tokio::sync::Mutex::new(()),
            login_slot: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_presenter(mut self, presenter: Arc<dyn UrlPresenter>) -> Self {
        self.presenter = presenter;
        self
    }

    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    #[must_use]
    pub fn phase(&self) -> AuthPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: AuthPhase) {
        let mut current = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *current != phase {
            debug!(from = ?*current, to = ?phase, "auth phase changed");
            *current = phase;
        }
    }

    fn cached_tokens(&self) -> Option<OAuthTokens> {
        self.tokens.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_tokens(&self, tokens: Option<OAuthTokens>) {
        *self.tokens.write().unwrap_or_else(|e| e.into_inner()) = tokens;
    }

    fn fresh_tokens(&self) -> Option<OAuthTokens> {
        let now = toolmesh_common::unix_now();
        self.cached_tokens()
            .filter(|t| !t.expires_within(now, self.settings.expiry_margin_secs))
    }

    /// Return a usable token set, refreshing or logging in only when needed.
    ///
    /// A token outside the expiry margin is returned without any network
    /// call. Otherwise a refresh is attempted, and a failed refresh falls
    /// through to a full interactive login.
    pub async fn ensure_valid_credentials(&self) -> Result<OAuthTokens> {
        if let Some(tokens) = self.fresh_tokens() {
            return Ok(tokens);
        }

        let _refresh = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(tokens) = self.fresh_tokens() {
            return Ok(tokens);
        }

        if let Some(current) = self.cached_tokens() {
            if let Some(refresh_token) = current.refresh_token.as_ref() {
                self.set_phase(AuthPhase::Refreshing);
                match self
                    .refresh_with(refresh_token.expose_secret(), &current)
                    .await
                {
                    Ok(tokens) => {
                        self.set_phase(AuthPhase::Authorized);
                        return Ok(tokens);
                    },
                    Err(e) => {
                        warn!(error = %e, "token refresh failed, falling back to login");
                    },
                }
            }
        }

        self.login().await
    }

    async fn refresh_with(&self, refresh_token: &str, current: &OAuthTokens) -> Result<OAuthTokens> {
        let registration = self.resolve_registration().await.map_err(|e| {
            Error::TokenRefreshFailed {
                reason: e.to_string(),
            }
        })?;
        let flow = OAuthFlow::with_client(
            registration.flow_config(&self.settings.redirect_uri()),
            self.http.clone(),
        );
        let mut tokens = flow.refresh(refresh_token).await?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = current.refresh_token.clone();
        }

        self.store.save_tokens(&tokens)?;
        self.set_tokens(Some(tokens.clone()));
        info!("access token refreshed");
        Ok(tokens)
    }

    /// Run the interactive browser login.
    ///
    /// Fails with [`Error::LoginAlreadyInProgress`] while another login is
    /// waiting for its callback.
    pub async fn login(&self) -> Result<OAuthTokens> {
        let guard = LoginGuard::acquire(&self.login_slot)?;
        let result = self.run_login(&guard.cancel).await;
        match &result {
            Ok(_) => self.set_phase(AuthPhase::Authorized),
            Err(e) => {
                warn!(error = %e, "login failed");
                self.set_phase(AuthPhase::Failed);
            },
        }
        result
    }

    async fn run_login(&self, cancel: &CancellationToken) -> Result<OAuthTokens> {
        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::FLOW_STARTS_TOTAL).increment(1);

        let redirect_uri = self.settings.redirect_uri();
        let registration = self.resolve_registration().await?;
        let flow = OAuthFlow::with_client(registration.flow_config(&redirect_uri), self.http.clone());
        let request = flow.start()?;
        let pending = PendingAuthorization {
            state: request.state.clone(),
            code_verifier: request.pkce.verifier.clone(),
            created_at: toolmesh_common::unix_now(),
        };

        let server = CallbackServer::bind(
            self.settings.callback_port,
            &self.settings.callback_path,
            pending.state.clone(),
        )
        .await?;

        self.set_phase(AuthPhase::AwaitingUserLogin);
        info!(redirect_uri = %redirect_uri, "waiting for browser login");
        if let Err(e) = self.presenter.present(&request.url) {
            warn!(error = %e, "could not present authorization URL; waiting for callback anyway");
        }

        let code = server
            .wait_for_code(self.settings.login_timeout(), cancel, &request.url)
            .await?;

        self.set_phase(AuthPhase::ExchangingCode);
        let tokens = flow.exchange(&code, &pending.code_verifier).await?;
        self.store.save_tokens(&tokens)?;
        self.set_tokens(Some(tokens.clone()));

        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::FLOW_COMPLETIONS_TOTAL).increment(1);

        info!(
            elapsed_secs = toolmesh_common::unix_now().saturating_sub(pending.created_at),
            "login complete"
        );
        Ok(tokens)
    }

    /// Cancel a login that is waiting for its callback. No-op when idle.
    pub fn cancel_login(&self) {
        if let Some(cancel) = self
            .login_slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            info!("cancelling pending login");
            cancel.cancel();
        }
    }

    #[must_use]
    pub fn login_pending(&self) -> bool {
        self.login_slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Mark `rejected` as unusable so the next call refreshes.
    ///
    /// Ignored when the cached token has already been replaced.
    pub fn invalidate_access_token(&self, rejected: &str) {
        let mut guard = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        if let Some(tokens) = guard.as_mut()
            && tokens.access_token.expose_secret() == rejected
        {
            debug!("access token rejected by server, forcing refresh");
            tokens.expires_at = Some(0);
        }
    }

    #[must_use]
    pub fn status(&self) -> AuthStatus {
        let stored = self.store.load();
        let tokens = self.cached_tokens().or(stored.tokens);
        AuthStatus {
            phase: self.phase(),
            client_id: self
                .settings
                .client_id
                .clone()
                .or(stored.client_info.map(|r| r.client_id)),
            has_tokens: tokens.is_some(),
            has_refresh_token: tokens.as_ref().is_some_and(|t| t.refresh_token.is_some()),
            expires_at: tokens.and_then(|t| t.expires_at),
            credentials_path: self.store.path().display().to_string(),
        }
    }

    /// Forget every stored credential, including the client registration.
    pub fn logout(&self) -> Result<()> {
        self.cancel_login();
        self.store.clear()?;
        self.set_tokens(None);
        self.set_phase(AuthPhase::Idle);
        info!("logged out");
        Ok(())
    }

    /// Resolve the client registration: configured static client, then the
    /// stored registration, then discovery plus dynamic registration.
    async fn resolve_registration(&self) -> Result<ClientRegistration> {
        let redirect_uri = self.settings.redirect_uri();

        if let Some(client_id) = &self.settings.client_id {
            let (authorization_endpoint, token_endpoint) = match (
                &self.settings.authorization_endpoint,
                &self.settings.token_endpoint,
            ) {
                (Some(auth), Some(token)) => (auth.clone(), token.clone()),
                (auth, token) => {
                    let meta = fetch_as_metadata(&self.http, &self.settings.issuer_url()?).await?;
                    (
                        auth.clone().unwrap_or(meta.authorization_endpoint),
                        token.clone().unwrap_or(meta.token_endpoint),
                    )
                },
            };
            return Ok(ClientRegistration {
                client_id: client_id.clone(),
                client_secret: None,
                redirect_uris: vec![redirect_uri],
                grant_types: default_grant_types(),
                scope: self.settings.scope.clone(),
                authorization_endpoint,
                token_endpoint,
                registered_at: 0,
            });
        }

        if let Some(stored) = self.store.load().client_info {
            if stored.redirect_uris.is_empty() || stored.redirect_uris.contains(&redirect_uri) {
                return Ok(stored);
            }
            warn!(
                client_id = %stored.client_id,
                redirect_uri = %redirect_uri,
                "stored client registration uses a different redirect URI, registering again"
            );
        }

        let meta = fetch_as_metadata(&self.http, &self.settings.issuer_url()?).await?;
        let endpoint = meta.registration_endpoint.as_deref().ok_or_else(|| {
            Error::message(
                "authorization server does not support dynamic client registration; configure auth.client_id",
            )
        })?;
        let response = register_client(
            &self.http,
            endpoint,
            &redirect_uri,
            &self.settings.client_name,
            self.settings.scope.as_deref(),
        )
        .await?;

        let registration = ClientRegistration {
            client_id: response.client_id,
            client_secret: response.client_secret.map(secrecy::Secret::new),
            redirect_uris: if response.redirect_uris.is_empty() {
                vec![redirect_uri]
            } else {
                response.redirect_uris
            },
            grant_types: if response.grant_types.is_empty() {
                default_grant_types()
            } else {
                response.grant_types
            },
            scope: response.scope.or_else(|| self.settings.scope.clone()),
            authorization_endpoint: meta.authorization_endpoint,
            token_endpoint: meta.token_endpoint,
            registered_at: toolmesh_common::unix_now(),
        };
        self.store.save_registration(&registration)?;
        Ok(registration)
    }
}

fn default_grant_types() -> Vec<String> {
    vec!["authorization_code".into(), "refresh_token".into()]
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {secrecy::Secret, std::sync::atomic::{AtomicUsize, Ordering}};

    use super::*;

    struct CountingPresenter(AtomicUsize);

    impl UrlPresenter for CountingPresenter {
        fn present(&self, _url: &str) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine_with(tokens: Option<OAuthTokens>) -> (tempfile::TempDir, AuthEngine) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("tokens.json"));
        if let Some(t) = &tokens {
            store.save_tokens(t).unwrap();
        }
        let engine = AuthEngine::new(AuthSettings::default(), store)
            .with_presenter(Arc::new(CountingPresenter(AtomicUsize::new(0))));
        (dir, engine)
    }

    fn tokens(access: &str, expires_at: u64) -> OAuthTokens {
        OAuthTokens {
            access_token: Secret::new(access.into()),
            refresh_token: None,
            token_type: "Bearer".into(),
            scope: None,
            expires_at: Some(expires_at),
        }
    }

    #[test]
    fn redirect_uri_uses_port_and_path() {
        let settings = AuthSettings {
            callback_port: 9999,
            callback_path: "/cb".into(),
            ..Default::default()
        };
        assert_eq!(settings.redirect_uri(), "http://localhost:9999/cb");
    }

    #[test]
    fn settings_parse_with_defaults() {
        let settings: AuthSettings =
            serde_json::from_str(r#"{"issuer":"https://auth.example.com"}"#).unwrap();
        assert_eq!(settings.callback_port, 8765);
        assert_eq!(settings.login_timeout_secs, 120);
        assert_eq!(settings.expiry_margin_secs, 60);
    }

    #[test]
    fn stored_tokens_start_authorized() {
        let far = toolmesh_common::unix_now() + 3600;
        let (_dir, engine) = engine_with(Some(tokens("at", far)));
        assert_eq!(engine.phase(), AuthPhase::Authorized);
        let (_dir, engine) = engine_with(None);
        assert_eq!(engine.phase(), AuthPhase::Idle);
    }

    #[test]
    fn invalidate_only_matching_token() {
        let far = toolmesh_common::unix_now() + 3600;
        let (_dir, engine) = engine_with(Some(tokens("current", far)));

        engine.invalidate_access_token("older");
        assert!(engine.fresh_tokens().is_some());

        engine.invalidate_access_token("current");
        assert!(engine.fresh_tokens().is_none());
    }

    #[test]
    fn second_login_slot_is_rejected() {
        let slot = Mutex::new(None);
        let first = LoginGuard::acquire(&slot).unwrap();
        assert!(matches!(
            LoginGuard::acquire(&slot),
            Err(Error::LoginAlreadyInProgress)
        ));
        drop(first);
        assert!(LoginGuard::acquire(&slot).is_ok());
    }

    #[test]
    fn logout_clears_everything() {
        let far = toolmesh_common::unix_now() + 3600;
        let (_dir, engine) = engine_with(Some(tokens("at", far)));
        engine.logout().unwrap();

        let status = engine.status();
        assert!(!status.has_tokens);
        assert_eq!(status.phase, AuthPhase::Idle);
        assert!(!std::path::Path::new(&status.credentials_path).exists());
    }
}
