//! Authentication commands.

use super::{open_session, password_if_missing, prompt_if_missing, Context};
use crate::output::{self, print_row, OutputFormat};
use anyhow::Result;
use chrono::{DateTime, Utc};
use console_auth::{AuthError, LoginRequest, RegisterRequest, SessionStatus};
use console_storage::now_millis;

/// Login with username and password.
pub async fn login(
    ctx: &Context,
    username: Option<String>,
    password: Option<String>,
    captcha: Option<(String, String)>,
) -> Result<()> {
    let manager = open_session(ctx)?;
    let username = prompt_if_missing(username, "Username")?;
    let password = password_if_missing(password)?;

    let mut request = LoginRequest::new(username, password);
    if let Some((id, code)) = captcha {
        request = request.with_captcha(id, code);
    }

    let user = manager.login(request).await?;
    match ctx.format {
        OutputFormat::Text => {
            println!("Logged in as {} ({})", user.username, user.role);
            let permissions = manager.permissions();
            if !permissions.is_loaded() {
                println!("Permissions could not be loaded; continuing with none.");
            }
        }
        OutputFormat::Json => output::print_json(&serde_json::json!({
            "status": "success",
            "user": user,
            "permissions_loaded": manager.permissions().is_loaded(),
        })),
    }
    Ok(())
}

/// Logout and clear the stored session.
pub async fn logout(ctx: &Context) -> Result<()> {
    let manager = open_session(ctx)?;
    manager.logout().await?;
    output::print_success("Logged out successfully", &ctx.format);
    Ok(())
}

/// Show the locally stored session. `verify` also checks it with the server.
pub async fn status(ctx: &Context, verify: bool) -> Result<()> {
    let manager = open_session(ctx)?;
    if verify {
        manager.check_auth().await?;
    }

    let view = manager.view();
    let pair = manager.tokens().snapshot()?;
    let now = now_millis();
    let expires_at = pair
        .access_expires_at
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    match ctx.format {
        OutputFormat::Text => {
            print_row("Session", view.status.as_str());
            if let Some(user) = &view.user {
                print_row("User", &format!("{} (id {})", user.username, user.id));
            }
            match expires_at {
                Some(at) => {
                    let remaining = (at.timestamp_millis() - now) / 1000;
                    let note = if pair.is_access_token_valid_at(now) {
                        format!("in {}s", remaining)
                    } else {
                        "expired".to_string()
                    };
                    print_row("Expires", &format!("{} ({})", at.to_rfc3339(), note));
                }
                None => print_row("Expires", "unknown"),
            }
            print_row(
                "Refresh token",
                if pair.refresh_token.is_some() { "present" } else { "absent" },
            );
            if verify {
                print_row("Verified", if view.is_authenticated { "yes" } else { "no" });
            }
        }
        OutputFormat::Json => output::print_json(&serde_json::json!({
            "status": view.status,
            "is_authenticated": view.is_authenticated,
            "user": view.user,
            "access_expires_at": expires_at.map(|at| at.to_rfc3339()),
            "access_token_valid": pair.is_access_token_valid_at(now),
            "expiring_soon": pair.is_expiring_soon_at(now),
            "has_refresh_token": pair.refresh_token.is_some(),
            "verified": verify,
        })),
    }
    Ok(())
}

/// Verify the session and show the user, roles and permissions.
pub async fn whoami(ctx: &Context) -> Result<()> {
    let manager = open_session(ctx)?;
    if manager.check_auth().await? != SessionStatus::Authenticated {
        return Err(AuthError::NotLoggedIn.into());
    }

    let view = manager.view();
    let permissions = manager.permissions();
    let claims = manager.token_info()?;

    match ctx.format {
        OutputFormat::Text => {
            if let Some(user) = &view.user {
                print_row("Username", &user.username);
                print_row("User ID", &user.id.to_string());
                print_row("Email", &user.email);
                print_row("Role", &user.role);
                print_row("Status", &user.status);
            }
            print_row("Roles", &permissions.roles().join(", "));
            print_row("Permissions", &permissions.permissions().join(", "));
            let menus: Vec<String> = permissions
                .accessible_menus()
                .into_iter()
                .map(|m| if m.title.is_empty() { m.name } else { m.title })
                .collect();
            print_row("Menus", &menus.join(", "));
            if let Some(claims) = &claims {
                print_row("Token ID", &claims.jti);
            }
        }
        OutputFormat::Json => output::print_json(&serde_json::json!({
            "user": view.user,
            "roles": permissions.roles(),
            "permissions": permissions.permissions(),
            "menus": permissions.accessible_menus(),
            "token": claims,
        })),
    }
    Ok(())
}

/// Ask the server whether the stored access token is accepted.
pub async fn validate(ctx: &Context) -> Result<()> {
    let manager = open_session(ctx)?;
    let valid = manager.validate_token().await?;
    match ctx.format {
        OutputFormat::Text => println!("Token is {}", if valid { "valid" } else { "invalid" }),
        OutputFormat::Json => output::print_json(&serde_json::json!({ "valid": valid })),
    }
    Ok(())
}

/// Create a new account.
pub async fn register(
    ctx: &Context,
    username: String,
    email: String,
    password: Option<String>,
    role: Option<String>,
) -> Result<()> {
    let manager = open_session(ctx)?;
    let password = password_if_missing(password)?;
    let user = manager
        .register(RegisterRequest {
            username,
            email,
            password,
            role,
        })
        .await?;

    match ctx.format {
        OutputFormat::Text => println!("Registered {} (id {})", user.username, user.id),
        OutputFormat::Json => output::print_json(&user),
    }
    Ok(())
}

/// Fetch a login captcha.
pub async fn captcha(ctx: &Context) -> Result<()> {
    let manager = open_session(ctx)?;
    let captcha = manager.generate_captcha().await?;
    match ctx.format {
        OutputFormat::Text => {
            print_row("Captcha ID", &captcha.captcha_id);
            print_row("Image", &captcha.captcha_data);
        }
        OutputFormat::Json => output::print_json(&captcha),
    }
    Ok(())
}
