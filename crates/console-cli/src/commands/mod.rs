//! CLI command implementations.

mod api;
mod auth;

pub use api::get;
pub use auth::{captcha, login, logout, register, status, validate, whoami};

use crate::output::OutputFormat;
use anyhow::{Context as _, Result};
use console_auth::{AuthError, RedirectReason, SessionManager};
use console_config_and_utils::{Config, Paths};

/// Everything a command needs from the command line and environment.
pub struct Context {
    pub config: Config,
    pub paths: Paths,
    pub format: OutputFormat,
}

/// Build the session manager and rehydrate it from disk.
fn open_session(ctx: &Context) -> Result<SessionManager> {
    let manager = SessionManager::from_config(&ctx.config, &ctx.paths)
        .context("Failed to initialize session")?;
    manager.set_redirect_callback(|reason| {
        if reason == RedirectReason::SessionExpired {
            eprintln!("Session expired.");
        }
    });
    manager.rehydrate()?;
    Ok(manager)
}

/// Follow-up hint for errors that mean the stored session is gone.
pub fn login_hint(err: &anyhow::Error) -> Option<&'static str> {
    err.downcast_ref::<AuthError>()
        .filter(|e| e.is_auth_failure())
        .map(|_| "Run 'console login' to sign in again.")
}

/// Parse `key=value` query arguments.
fn parse_query(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| anyhow::anyhow!("Invalid query '{}', expected key=value", pair))
        })
        .collect()
}

/// Read a value from the terminal when it was not given as an argument.
fn prompt_if_missing(value: Option<String>, label: &str) -> Result<String> {
    use std::io::{self, Write};

    if let Some(value) = value {
        return Ok(value);
    }
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_string();
    if input.is_empty() {
        anyhow::bail!("{} is required", label);
    }
    Ok(input)
}

fn password_if_missing(value: Option<String>) -> Result<String> {
    let password = match value {
        Some(p) => p,
        None => rpassword::prompt_password("Password: ")?,
    };
    if password.is_empty() {
        anyhow::bail!("Password is required");
    }
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        let parsed = parse_query(&["page=2".into(), "keyword=a=b".into(), "empty=".into()]).unwrap();
        assert_eq!(
            parsed,
            vec![
                ("page".to_string(), "2".to_string()),
                ("keyword".to_string(), "a=b".to_string()),
                ("empty".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_parse_query_rejects_malformed() {
        assert!(parse_query(&["nokey".into()]).is_err());
        assert!(parse_query(&["=value".into()]).is_err());
    }

    #[test]
    fn test_login_hint_only_for_session_loss() {
        let err = anyhow::Error::from(AuthError::NotLoggedIn);
        assert!(login_hint(&err).is_some());

        let err = anyhow::Error::from(AuthError::RenewalFailed(console_auth::ApiError::new(
            401,
            "invalid refresh token",
        )))
        .context("request failed");
        assert!(login_hint(&err).is_some());

        assert!(login_hint(&anyhow::Error::from(AuthError::Timeout)).is_none());
        assert!(login_hint(&anyhow::anyhow!("Invalid query")).is_none());
    }

    #[test]
    fn test_prompt_skipped_when_given() {
        assert_eq!(prompt_if_missing(Some("admin".into()), "Username").unwrap(), "admin");
        assert_eq!(password_if_missing(Some("secret".into())).unwrap(), "secret");
        assert!(password_if_missing(Some(String::new())).is_err());
    }
}
