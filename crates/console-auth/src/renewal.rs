//! Single-flight access token renewal.
//!
//! The first caller to see an expired token becomes the leader and performs
//! the one `POST /auth/refresh`; everyone arriving while it is in flight
//! parks on a oneshot and is released, in arrival order, with the leader's
//! outcome.

use crate::error::ApiError;
use crate::session_state::SessionState;
use crate::transport::{HttpRequest, Transport};
use crate::types::{ApiEnvelope, RefreshRequest, RefreshResponse};
use crate::AuthError;
use console_storage::now_millis;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub const REFRESH_PATH: &str = "/auth/refresh";

type Waiter = oneshot::Sender<Result<String, ApiError>>;

#[derive(Default)]
struct RenewalState {
    refreshing: bool,
    waiters: Vec<Waiter>,
}

/// Owns the renewal flag and the queue of parked callers.
#[derive(Clone)]
pub struct RenewalCoordinator {
    transport: Arc<dyn Transport>,
    session: SessionState,
    state: Arc<Mutex<RenewalState>>,
}

impl RenewalCoordinator {
    pub fn new(transport: Arc<dyn Transport>, session: SessionState) -> Self {
        Self {
            transport,
            session,
            state: Arc::new(Mutex::new(RenewalState::default())),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.lock().refreshing
    }

    /// Number of callers parked behind the in-flight refresh.
    pub fn pending_waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Obtain a fresh access token after a 401.
    ///
    /// `sent_token` is the bearer the failed request carried. When the stored
    /// token already differs from it and is still valid, that token is
    /// returned without another refresh. `None` always refreshes.
    pub async fn renew(&self, sent_token: Option<&str>) -> Result<String, ApiError> {
        let parked = {
            let mut state = self.state.lock();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                debug!(queued = state.waiters.len(), "Renewal in flight, waiting");
                Some(rx)
            } else {
                if let Some(current) = self.renewed_since(sent_token) {
                    debug!("Token already renewed, reusing stored token");
                    return Ok(current);
                }
                state.refreshing = true;
                None
            }
        };

        if let Some(rx) = parked {
            return rx.await.unwrap_or_else(|_| Err(interrupted()));
        }

        let guard = RefreshGuard {
            state: &self.state,
            session: &self.session,
            settled: false,
        };
        let result = self.refresh().await;

        match &result {
            Ok(_) => guard.settle(&result),
            Err(e) => {
                warn!(code = e.code, message = %e.message, "Token renewal failed");
                guard.fail(&result);
            }
        }
        result
    }

    /// Proactive renewal ahead of expiry; shares the flag and queue.
    pub async fn renew_now(&self) -> Result<String, ApiError> {
        self.renew(None).await
    }

    fn renewed_since(&self, sent_token: Option<&str>) -> Option<String> {
        let sent = sent_token?;
        let pair = self.session.tokens().snapshot().ok()?;
        if !pair.is_access_token_valid_at(now_millis()) {
            return None;
        }
        pair.access_token.filter(|current| current != sent)
    }

    /// The refresh call goes straight to the transport; it never re-enters
    /// the pipeline.
    async fn refresh(&self) -> Result<String, ApiError> {
        let tokens = self.session.tokens();
        let refresh_token = tokens
            .refresh_token()
            .map_err(|e| AuthError::from(e).to_api_error())?
            .ok_or_else(|| ApiError::new(401, "No refresh token available"))?;

        let body = serde_json::to_value(RefreshRequest { refresh_token })
            .map_err(|e| AuthError::from(e).to_api_error())?;
        let request = HttpRequest::post(REFRESH_PATH)
            .with_json(body)
            .without_renewal();

        debug!("Refreshing access token");
        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| e.to_api_error())?;
        if !response.is_success() {
            return Err(ApiError::from_response(response.status, &response.body));
        }

        let envelope: ApiEnvelope<RefreshResponse> = serde_json::from_slice(&response.body)
            .map_err(|e| ApiError::new(500, format!("Invalid refresh response: {}", e)))?;
        let renewed = envelope.into_data().map_err(|e| e.to_api_error())?;

        tokens
            .apply_renewal(
                &renewed.access_token,
                renewed.expires_in,
                renewed.refresh_token.as_deref(),
            )
            .map_err(|e| AuthError::from(e).to_api_error())?;

        info!(
            expires_in = renewed.expires_in,
            rotated = renewed.refresh_token.is_some(),
            "Access token renewed"
        );
        Ok(renewed.access_token)
    }
}

fn interrupted() -> ApiError {
    ApiError::new(401, "Token renewal interrupted")
}

/// Clears the flag and releases parked callers however the leader exits.
///
/// A leader that panics or is dropped mid-flight counts as a failed renewal:
/// the session is logged out exactly as if the server had refused.
struct RefreshGuard<'a> {
    state: &'a Mutex<RenewalState>,
    session: &'a SessionState,
    settled: bool,
}

impl RefreshGuard<'_> {
    fn settle(mut self, result: &Result<String, ApiError>) {
        self.settled = true;
        self.release(result);
    }

    /// Clear credentials, release the queue in order, then expire the session.
    fn fail(mut self, result: &Result<String, ApiError>) {
        self.settled = true;
        self.force_logout(result);
    }

    fn force_logout(&self, result: &Result<String, ApiError>) {
        if let Err(e) = self.session.tokens().clear() {
            warn!(error = %e, "Failed to clear token store");
        }
        self.release(result);
        self.session.expire();
    }

    fn release(&self, result: &Result<String, ApiError>) {
        let waiters = {
            let mut state = self.state.lock();
            state.refreshing = false;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(
            waiters = self.state.lock().waiters.len(),
            "Renewal abandoned before completion"
        );
        self.force_logout(&Err(interrupted()));
    }
}
