//! Authenticated client for the admin console backend.
//!
//! This crate provides:
//! - An HTTP pipeline that attaches the bearer token and recovers from 401s
//! - Single-flight access token renewal shared by every in-flight request
//! - Explicit FSM-based session state with change and redirect callbacks
//! - The signed-in user's permission context
//! - Best-effort decoding of access token claims

pub mod claims;
mod error;
mod permissions;
mod pipeline;
mod renewal;
mod session;
mod session_fsm;
mod session_state;
#[cfg(test)]
mod testing;
mod transport;
mod types;

pub use claims::{Claims, TokenUserInfo};
pub use error::{ApiError, AuthError, AuthResult, FALLBACK_ERROR_CODE, FALLBACK_ERROR_MESSAGE};
pub use permissions::PermissionContext;
pub use pipeline::ApiClient;
pub use renewal::{RenewalCoordinator, REFRESH_PATH};
pub use session::{
    SessionManager, CAPTCHA_PATH, LOGIN_PATH, LOGOUT_PATH, PROFILE_PATH, REGISTER_PATH,
    VALIDATE_PATH,
};
pub use session_fsm::session_machine;
pub use session_fsm::{
    RedirectReason, SessionMachine, SessionMachineInput, SessionMachineState,
    SessionStateChanged, SessionStatus,
};
pub use session_state::{RedirectCallback, SessionState, SessionView, StateCallback};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use types::{
    ApiEnvelope, CaptchaResponse, LoginRequest, LoginResponse, LogoutRequest, Menu, Pagination,
    RefreshRequest, RefreshResponse, RegisterRequest, SessionSnapshot, UserPermissions,
    UserSummary, ValidateResponse,
};
