//! Session state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//!            ┌─────────────┐
//!            │   Unknown   │ (initial, before rehydration)
//!            └──────┬──────┘
//!   SessionRestored │ NoSession / SessionRejected
//!          ┌────────┴──────────────┐
//!          ▼                       ▼
//! ┌─────────────────┐     ┌─────────────────┐  LoginAttempt  ┌─────────────┐
//! │  Authenticated  │◄────┤ Unauthenticated ├───────────────►│  LoggingIn  │
//! └────────┬────────┘     └─────────────────┘◄───────────────┴──────┬──────┘
//!          │ LogoutRequested        ▲          LoginFailed          │
//!          ▼                        │                               │
//! ┌─────────────────┐ LogoutComplete│              LoginSuccess     │
//! │   LoggingOut    ├───────────────┘   Authenticated ◄─────────────┘
//! └─────────────────┘
//! ```
//!
//! `SessionRejected` (renewal failure, profile rejection) moves any state to
//! `Unauthenticated`. The `Loading` overlay is tracked beside the machine,
//! not as a state of it.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Unknown)

    Unknown => {
        SessionRestored => Authenticated,
        NoSession => Unauthenticated,
        SessionRejected => Unauthenticated,
        LoginAttempt => LoggingIn
    },
    Unauthenticated => {
        SessionRestored => Authenticated,
        NoSession => Unauthenticated,
        SessionRejected => Unauthenticated,
        LoginAttempt => LoggingIn
    },
    LoggingIn => {
        LoginSuccess => Authenticated,
        LoginFailed => Unauthenticated,
        SessionRejected => Unauthenticated
    },
    Authenticated => {
        SessionRestored => Authenticated,
        LoginAttempt => LoggingIn,
        LogoutRequested => LoggingOut,
        NoSession => Unauthenticated,
        SessionRejected => Unauthenticated
    },
    LoggingOut => {
        LogoutComplete => Unauthenticated,
        SessionRejected => Unauthenticated
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session status for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Persisted state not yet rehydrated.
    Unknown,
    Authenticated,
    Unauthenticated,
    LoggingIn,
    LoggingOut,
}

impl SessionStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionStatus::Authenticated)
    }

    /// Returns true if the state is a transient/in-progress state.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionStatus::LoggingIn | SessionStatus::LoggingOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Unknown => "unknown",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Unauthenticated => "unauthenticated",
            SessionStatus::LoggingIn => "logging_in",
            SessionStatus::LoggingOut => "logging_out",
        }
    }
}

impl From<&SessionMachineState> for SessionStatus {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Unknown => SessionStatus::Unknown,
            SessionMachineState::Authenticated => SessionStatus::Authenticated,
            SessionMachineState::Unauthenticated => SessionStatus::Unauthenticated,
            SessionMachineState::LoggingIn => SessionStatus::LoggingIn,
            SessionMachineState::LoggingOut => SessionStatus::LoggingOut,
        }
    }
}

/// Payload for session state change notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStateChanged {
    pub state: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Why the application is being sent back to the login entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectReason {
    /// Explicit logout.
    LoggedOut,
    /// Renewal failed or no refresh token was available.
    SessionExpired,
}
