//! Session management on top of the authenticated pipeline.
//!
//! `SessionManager` drives the session FSM through rehydration, login and
//! logout. Token renewal happens underneath it, in the pipeline; the manager
//! only observes the outcome through the shared [`SessionState`].

use crate::claims::{self, TokenUserInfo};
use crate::permissions::PermissionContext;
use crate::pipeline::ApiClient;
use crate::session_fsm::{
    RedirectReason, SessionMachineInput, SessionStateChanged, SessionStatus,
};
use crate::session_state::{SessionState, SessionView};
use crate::transport::{HttpRequest, ReqwestTransport, Transport};
use crate::types::{
    ApiEnvelope, CaptchaResponse, LoginRequest, LoginResponse, LogoutRequest, RegisterRequest,
    SessionSnapshot, UserSummary, ValidateResponse,
};
use crate::AuthResult;
use console_config_and_utils::{Config, Paths};
use console_storage::{create_token_store, now_millis, TokenStore};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const LOGIN_PATH: &str = "/auth/login";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const REGISTER_PATH: &str = "/auth/register";
pub const VALIDATE_PATH: &str = "/auth/validate";
pub const CAPTCHA_PATH: &str = "/auth/captcha";
pub const PROFILE_PATH: &str = "/users/profile";

/// Session manager with FSM-based state tracking.
///
/// Tokens live in the [`TokenStore`]; the FSM tracks what the application
/// should show. On startup the FSM is rehydrated from storage and then
/// verified against the server with [`SessionManager::check_auth`].
pub struct SessionManager {
    client: ApiClient,
    state: SessionState,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, tokens: TokenStore) -> Self {
        let state = SessionState::new(tokens, PermissionContext::new());
        let client = ApiClient::new(transport, state.clone());
        Self { client, state }
    }

    /// Build a manager over the reqwest transport and file-backed storage.
    pub fn from_config(config: &Config, paths: &Paths) -> AuthResult<Self> {
        paths.ensure_dirs()?;
        let transport = ReqwestTransport::from_config(config)?;
        let tokens = create_token_store(paths)?;
        debug!(base_url = %transport.base_url(), "Session manager configured");
        Ok(Self::new(Arc::new(transport), tokens))
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn permissions(&self) -> &PermissionContext {
        self.state.permissions()
    }

    pub fn tokens(&self) -> &TokenStore {
        self.state.tokens()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn view(&self) -> SessionView {
        self.state.view()
    }

    /// Set a callback to be notified of session state changes.
    pub fn set_state_callback<F>(&self, callback: F)
    where
        F: Fn(SessionStateChanged) + Send + Sync + 'static,
    {
        self.state.set_state_callback(Arc::new(callback));
    }

    /// Set a callback invoked whenever the application must return to login.
    pub fn set_redirect_callback<F>(&self, callback: F)
    where
        F: Fn(RedirectReason) + Send + Sync + 'static,
    {
        self.state.set_redirect_callback(Arc::new(callback));
    }

    /// Rehydrate the FSM from persisted state, without touching the network.
    ///
    /// A usable token pair (a valid access token, or a refresh token to
    /// renew it with) restores the session optimistically, with the user from
    /// the persisted snapshot. Anything left over is cleared.
    pub fn rehydrate(&self) -> AuthResult<SessionStatus> {
        let pair = self.tokens().snapshot()?;
        if pair.access_token.is_none() || !pair.has_usable_session_at(now_millis()) {
            if pair.access_token.is_some() {
                debug!("Stored session is no longer usable, clearing");
                self.tokens().clear()?;
            }
            return self.state.transition(&SessionMachineInput::NoSession);
        }
        let user = self
            .tokens()
            .load_session_snapshot::<SessionSnapshot>()?
            .and_then(|s| s.user);
        self.state.restore(user)
    }

    /// Verify the stored session on startup.
    ///
    /// - No access token: unauthenticated.
    /// - Expiring soon with a refresh token: renew first; a failed renewal
    ///   has already logged the session out.
    /// - Otherwise fetch the profile through the pipeline; success refreshes
    ///   the displayed user and loads permissions, failure clears the session.
    pub async fn check_auth(&self) -> AuthResult<SessionStatus> {
        self.state.set_loading(true);
        let result = self.verify_session().await;
        self.state.set_loading(false);
        result
    }

    async fn verify_session(&self) -> AuthResult<SessionStatus> {
        let pair = self.tokens().snapshot()?;
        if pair.access_token.is_none() {
            info!("No stored session");
            self.tokens().clear()?;
            return Ok(self.state.reset(&SessionMachineInput::NoSession));
        }

        if pair.is_expiring_soon_at(now_millis()) && pair.refresh_token.is_some() {
            info!("Access token expiring soon, renewing");
            if let Err(e) = self.client.renewal().renew_now().await {
                warn!(code = e.code, message = %e.message, "Startup renewal failed");
                return Ok(self.state.status());
            }
        }

        if matches!(
            self.state.status(),
            SessionStatus::Unknown | SessionStatus::Unauthenticated
        ) {
            let user = self
                .tokens()
                .load_session_snapshot::<SessionSnapshot>()?
                .and_then(|s| s.user);
            self.state.restore(user)?;
        }

        match self.fetch_profile().await {
            Ok(user) => {
                info!(user_id = user.id, username = %user.username, "Session verified");
                if !self.permissions().is_loaded() {
                    self.permissions().load(&self.client).await;
                }
                Ok(self.state.status())
            }
            Err(e) => {
                warn!(error = %e, "Session verification failed, clearing session");
                self.tokens().clear()?;
                Ok(self.state.reset(&SessionMachineInput::SessionRejected))
            }
        }
    }

    /// Fetch `/users/profile` and make it the displayed user.
    pub async fn fetch_profile(&self) -> AuthResult<UserSummary> {
        let user = self
            .client
            .get::<UserSummary>(PROFILE_PATH)
            .await?
            .into_data()?;
        self.state.update_user(user.clone())?;
        Ok(user)
    }

    /// Exchange credentials for a token pair.
    ///
    /// The token pair and the displayed session are committed together.
    /// Permissions are fetched afterwards; their failure leaves an empty
    /// permission set and does not undo the login.
    pub async fn login(&self, request: LoginRequest) -> AuthResult<UserSummary> {
        self.state.transition(&SessionMachineInput::LoginAttempt)?;
        self.state.set_loading(true);

        let response = self
            .client
            .post::<LoginResponse, _>(LOGIN_PATH, &request)
            .await
            .and_then(ApiEnvelope::into_data);

        let login = match response {
            Ok(login) => login,
            Err(e) => {
                warn!(username = %request.username, error = %e, "Login failed");
                self.state.set_loading(false);
                let _ = self.state.transition(&SessionMachineInput::LoginFailed);
                return Err(e);
            }
        };

        let committed = self.state.complete_login(&login);
        self.state.set_loading(false);
        committed?;

        if !self.permissions().load(&self.client).await {
            debug!("Continuing with an empty permission set");
        }
        Ok(login.user)
    }

    /// Log out. The server call is best effort; local state is always
    /// cleared and the redirect always fires.
    pub async fn logout(&self) -> AuthResult<()> {
        let requested = self
            .state
            .transition(&SessionMachineInput::LogoutRequested)
            .is_ok();

        let pair = self.tokens().snapshot()?;
        if pair.access_token.is_some() || pair.refresh_token.is_some() {
            let body = serde_json::to_value(LogoutRequest {
                refresh_token: pair.refresh_token,
            })?;
            let request = HttpRequest::post(LOGOUT_PATH)
                .with_json(body)
                .without_renewal();
            if let Err(e) = self.client.execute::<Value>(request).await {
                debug!(error = %e, "Logout request failed, ignoring");
            }
        }

        let cleared = self.tokens().clear();
        self.state.reset(if requested {
            &SessionMachineInput::LogoutComplete
        } else {
            &SessionMachineInput::NoSession
        });
        self.state.redirect(RedirectReason::LoggedOut);
        cleared?;

        info!("Logged out");
        Ok(())
    }

    /// Create an account. Never renews and never touches the session.
    pub async fn register(&self, request: RegisterRequest) -> AuthResult<UserSummary> {
        self.client
            .post::<UserSummary, _>(REGISTER_PATH, &request)
            .await?
            .into_data()
    }

    /// Ask the server whether the current access token is accepted.
    pub async fn validate_token(&self) -> AuthResult<bool> {
        let response = self
            .client
            .get::<ValidateResponse>(VALIDATE_PATH)
            .await?
            .into_data()?;
        Ok(response.valid)
    }

    pub async fn generate_captcha(&self) -> AuthResult<CaptchaResponse> {
        self.client
            .get::<CaptchaResponse>(CAPTCHA_PATH)
            .await?
            .into_data()
    }

    /// Claims of the stored access token, for display only.
    pub fn token_info(&self) -> AuthResult<Option<TokenUserInfo>> {
        Ok(self
            .tokens()
            .access_token()?
            .and_then(|token| claims::decode(&token))
            .map(|c| c.user_info()))
    }
}
