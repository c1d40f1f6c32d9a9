//! Shared session state observed by the pipeline and the session manager.
//!
//! Holds the FSM, the displayed user and the loading overlay behind one lock.
//! Callbacks are always invoked after that lock is released.

use crate::permissions::PermissionContext;
use crate::session_fsm::{
    RedirectReason, SessionMachine, SessionMachineInput, SessionStateChanged, SessionStatus,
};
use crate::types::{LoginResponse, SessionSnapshot, UserSummary};
use crate::{AuthError, AuthResult};
use console_storage::TokenStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback type for session state change notifications.
pub type StateCallback = Arc<dyn Fn(SessionStateChanged) + Send + Sync>;

/// Callback type for "navigate to login" requests.
pub type RedirectCallback = Arc<dyn Fn(RedirectReason) + Send + Sync>;

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub status: SessionStatus,
    pub user: Option<UserSummary>,
    pub is_authenticated: bool,
    pub is_loading: bool,
}

struct Inner {
    fsm: SessionMachine,
    user: Option<UserSummary>,
    loading: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    tokens: TokenStore,
    permissions: PermissionContext,
    state_callback: Mutex<Option<StateCallback>>,
    redirect_callback: Mutex<Option<RedirectCallback>>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionState {
    shared: Arc<Shared>,
}

impl SessionState {
    pub fn new(tokens: TokenStore, permissions: PermissionContext) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    fsm: SessionMachine::new(),
                    user: None,
                    loading: false,
                }),
                tokens,
                permissions,
                state_callback: Mutex::new(None),
                redirect_callback: Mutex::new(None),
            }),
        }
    }

    pub fn set_state_callback(&self, callback: StateCallback) {
        *self.shared.state_callback.lock() = Some(callback);
    }

    pub fn set_redirect_callback(&self, callback: RedirectCallback) {
        *self.shared.redirect_callback.lock() = Some(callback);
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.shared.tokens
    }

    pub fn permissions(&self) -> &PermissionContext {
        &self.shared.permissions
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from(self.shared.inner.lock().fsm.state())
    }

    pub fn user(&self) -> Option<UserSummary> {
        self.shared.inner.lock().user.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.inner.lock().loading
    }

    pub fn set_loading(&self, loading: bool) {
        self.shared.inner.lock().loading = loading;
    }

    pub fn view(&self) -> SessionView {
        let inner = self.shared.inner.lock();
        let status = SessionStatus::from(inner.fsm.state());
        SessionView {
            status,
            user: inner.user.clone(),
            is_authenticated: status.is_authenticated(),
            is_loading: inner.loading,
        }
    }

    /// Transition the FSM and notify callback if state changed.
    pub fn transition(&self, input: &SessionMachineInput) -> AuthResult<SessionStatus> {
        self.apply(input, |_| {})
    }

    /// Consume `input` and apply `mutate` under the same lock.
    fn apply<F>(&self, input: &SessionMachineInput, mutate: F) -> AuthResult<SessionStatus>
    where
        F: FnOnce(&mut Inner),
    {
        let mut inner = self.shared.inner.lock();
        let old_state = SessionStatus::from(inner.fsm.state());

        inner.fsm.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                inner.fsm.state()
            ))
        })?;
        mutate(&mut inner);

        let new_state = SessionStatus::from(inner.fsm.state());
        let payload = SessionStateChanged {
            state: new_state,
            user_id: inner.user.as_ref().map(|u| u.id),
            username: inner.user.as_ref().map(|u| u.username.clone()),
        };
        drop(inner);

        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "Session state transition"
            );
            self.notify_state_change(payload);
        }

        Ok(new_state)
    }

    fn notify_state_change(&self, payload: SessionStateChanged) {
        let callback = self.shared.state_callback.lock().clone();
        if let Some(callback) = callback {
            callback(payload);
        }
    }

    /// Persist the token pair and mark the session authenticated as one
    /// step; no reader can observe tokens without the user or vice versa.
    pub fn complete_login(&self, login: &LoginResponse) -> AuthResult<SessionStatus> {
        let tokens = &self.shared.tokens;
        let user = login.user.clone();

        let mut stored: AuthResult<()> = Ok(());
        let result = self.apply(&SessionMachineInput::LoginSuccess, |inner| {
            stored = tokens
                .set_tokens(&login.access_token, &login.refresh_token, login.expires_in)
                .and_then(|_| {
                    tokens.save_session_snapshot(&SessionSnapshot {
                        user: Some(user.clone()),
                        is_authenticated: true,
                    })
                })
                .map_err(AuthError::from);
            if stored.is_ok() {
                inner.user = Some(user);
            }
        });

        // A storage failure leaves nothing half-written behind.
        if let Err(e) = stored {
            let _ = tokens.clear();
            let _ = self.apply(&SessionMachineInput::SessionRejected, |inner| {
                inner.user = None;
            });
            return Err(e);
        }
        let status = result?;

        info!(user_id = login.user.id, username = %login.user.username, "Logged in");
        Ok(status)
    }

    /// Optimistically mark the session authenticated from persisted state.
    pub fn restore(&self, user: Option<UserSummary>) -> AuthResult<SessionStatus> {
        self.apply(&SessionMachineInput::SessionRestored, |inner| {
            if user.is_some() {
                inner.user = user;
            }
        })
    }

    /// Replace the displayed user and its persisted snapshot.
    pub fn update_user(&self, user: UserSummary) -> AuthResult<()> {
        self.shared.tokens.save_session_snapshot(&SessionSnapshot {
            user: Some(user.clone()),
            is_authenticated: true,
        })?;
        self.shared.inner.lock().user = Some(user);
        Ok(())
    }

    /// Drop the in-memory session and dependent authorization data.
    ///
    /// Falls back to `SessionRejected`, which every state accepts, when
    /// `input` is not valid from the current state.
    pub fn reset(&self, input: &SessionMachineInput) -> SessionStatus {
        self.shared.permissions.clear();
        let clear = |inner: &mut Inner| {
            inner.user = None;
            inner.loading = false;
        };
        match self.apply(input, clear) {
            Ok(status) => status,
            Err(_) => self
                .apply(&SessionMachineInput::SessionRejected, clear)
                .unwrap_or(SessionStatus::Unauthenticated),
        }
    }

    /// Forced logout after renewal failure. Credentials are expected to be
    /// cleared and waiters drained before this is called.
    pub fn expire(&self) {
        warn!("Session expired, returning to login");
        self.reset(&SessionMachineInput::SessionRejected);
        self.redirect(RedirectReason::SessionExpired);
    }

    pub fn redirect(&self, reason: RedirectReason) {
        info!(reason = ?reason, "Redirecting to login");
        let callback = self.shared.redirect_callback.lock().clone();
        if let Some(callback) = callback {
            callback(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use console_storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_test_state() -> SessionState {
        let tokens = TokenStore::new(Arc::new(MemoryStorage::new()));
        SessionState::new(tokens, PermissionContext::new())
    }

    fn sample_login() -> LoginResponse {
        serde_json::from_value(serde_json::json!({
            "access_token": "a1",
            "refresh_token": "r1",
            "expires_in": 900,
            "refresh_expires_in": 604800,
            "token_type": "Bearer",
            "user": {"id": 1, "username": "admin", "email": "admin@example.com",
                     "role": "admin", "status": "active",
                     "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z"}
        }))
        .unwrap()
    }

    #[test]
    fn test_complete_login_is_atomic() {
        let state = create_test_state();
        state.transition(&SessionMachineInput::LoginAttempt).unwrap();

        state.complete_login(&sample_login()).unwrap();

        let view = state.view();
        assert!(view.is_authenticated);
        assert_eq!(view.user.unwrap().username, "admin");
        assert_eq!(state.tokens().access_token().unwrap().as_deref(), Some("a1"));
        let snapshot: SessionSnapshot = state.tokens().load_session_snapshot().unwrap().unwrap();
        assert!(snapshot.is_authenticated);
    }

    #[test]
    fn test_callback_sees_user_on_login() {
        let state = create_test_state();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        state.set_state_callback(Arc::new(move |payload| sink.lock().push(payload)));

        state.transition(&SessionMachineInput::LoginAttempt).unwrap();
        state.complete_login(&sample_login()).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].state, SessionStatus::LoggingIn);
        assert_eq!(seen[1].state, SessionStatus::Authenticated);
        assert_eq!(seen[1].user_id, Some(1));
    }

    #[test]
    fn test_callback_may_read_state() {
        let state = create_test_state();
        let reader = state.clone();
        let observed = Arc::new(Mutex::new(None));
        let sink = observed.clone();
        state.set_state_callback(Arc::new(move |_| *sink.lock() = Some(reader.status())));

        state.transition(&SessionMachineInput::NoSession).unwrap();
        assert_eq!(*observed.lock(), Some(SessionStatus::Unauthenticated));
    }

    #[test]
    fn test_expire_clears_and_redirects() {
        let state = create_test_state();
        let redirects = Arc::new(AtomicUsize::new(0));
        let counter = redirects.clone();
        state.set_redirect_callback(Arc::new(move |reason| {
            assert_eq!(reason, RedirectReason::SessionExpired);
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        state.restore(None).unwrap();
        state.set_loading(true);
        state.expire();

        let view = state.view();
        assert_eq!(view.status, SessionStatus::Unauthenticated);
        assert!(!view.is_loading);
        assert_eq!(redirects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_falls_back_on_invalid_input() {
        let state = create_test_state();
        // LogoutComplete is not valid from Unknown.
        let status = state.reset(&SessionMachineInput::LogoutComplete);
        assert_eq!(status, SessionStatus::Unauthenticated);
    }
}
