//! Authentication commands.

use super::Context;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use request_pipeline::SessionStatus;
use serde_json::json;
use std::io::{self, Write};

/// Login with username and password.
pub async fn login(ctx: &Context, username: Option<String>, format: &OutputFormat) -> Result<()> {
    if let SessionStatus::LoggedIn { user, .. } = ctx.pipeline.session_status() {
        output::print_success(&format!("Already logged in as {}", user.label()), format);
        return Ok(());
    }

    let username = match username {
        Some(username) => username,
        None => {
            print!("Username: ");
            io::stdout().flush()?;
            let mut username = String::new();
            io::stdin().read_line(&mut username)?;
            username.trim().to_string()
        }
    };
    if username.is_empty() {
        anyhow::bail!("Username is required");
    }

    // Prompt for password (hidden)
    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        anyhow::bail!("Password is required");
    }

    match ctx.pipeline.login(&username, &password).await {
        Ok(user) => {
            output::print_success(&format!("Logged in as {}", user.label()), format);
            Ok(())
        }
        Err(e) => anyhow::bail!("Login failed: {}", e.user_message()),
    }
}

/// Logout and clear the stored session.
pub fn logout(ctx: &Context, format: &OutputFormat) -> Result<()> {
    if ctx.pipeline.logout()? {
        output::print_success("Logged out successfully", format);
    } else {
        output::print_success("Not logged in", format);
    }
    Ok(())
}

/// Show authentication status.
pub fn status(ctx: &Context, format: &OutputFormat) -> Result<()> {
    let session = ctx.pipeline.session_status();

    match format {
        OutputFormat::Text => {
            output::print_row("API", &ctx.config.api_url);
            match &session {
                SessionStatus::LoggedIn {
                    user,
                    expires_at_hint,
                } => {
                    output::print_row("Auth", &format!("logged in as {}", user.label()));
                    if let Some(role) = &user.role {
                        output::print_row("Role", role);
                    }
                    if let Some(expires) = expires_at_hint {
                        output::print_row("Token expires", &expires.to_rfc3339());
                    }
                }
                SessionStatus::LoggedOut => output::print_row("Auth", "not logged in"),
            }
            output::print_row("Credentials", &ctx.paths.credentials_file().display().to_string());
        }
        OutputFormat::Json => {
            let value = match &session {
                SessionStatus::LoggedIn {
                    user,
                    expires_at_hint,
                } => json!({
                    "api_url": ctx.config.api_url,
                    "logged_in": true,
                    "user": user,
                    "expires_at_hint": expires_at_hint,
                }),
                SessionStatus::LoggedOut => json!({
                    "api_url": ctx.config.api_url,
                    "logged_in": false,
                }),
            };
            output::print_json(&value)?;
        }
    }

    Ok(())
}
