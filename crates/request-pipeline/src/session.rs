//! Login, logout and session status.

use crate::renewal_fsm::RenewalMachineInput;
use crate::{ApiRequest, ApiResult, RequestPipeline};
use chrono::{DateTime, Utc};
use credential_store::{Credential, Profile, SessionEndReason};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access: String,
    refresh: String,
    user: Profile,
}

/// Renewal endpoint request.
#[derive(Debug, Serialize)]
pub(crate) struct RenewRequest<'a> {
    pub refresh: &'a str,
}

/// Renewal endpoint response. `refresh` is present when the server rotates it.
#[derive(Debug, Deserialize)]
pub(crate) struct RenewResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Authentication status.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    LoggedIn {
        user: Profile,
        expires_at_hint: Option<DateTime<Utc>>,
    },
    LoggedOut,
}

impl SessionStatus {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, SessionStatus::LoggedIn { .. })
    }
}

impl RequestPipeline {
    /// Log in with username and password and store the issued credential.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<Profile> {
        debug!(username = %username, "Attempting login");

        let body = serde_json::to_value(LoginRequest { username, password })?;
        let request = ApiRequest::post(self.login_path().to_string())
            .json(body)
            .unauthenticated();

        let response: LoginResponse = self.send(request).await?.json()?;
        let user = response.user.clone();
        self.establish(Credential::new(response.access, response.refresh, response.user))?;

        info!(user_id = %user.id, "Logged in");
        Ok(user)
    }

    /// End the session locally. Returns whether a session existed.
    pub fn logout(&self) -> ApiResult<bool> {
        let removed = self.end_session(SessionEndReason::Logout, RenewalMachineInput::Cleared)?;
        if removed {
            info!("Logged out");
        }
        Ok(removed)
    }

    pub fn session_status(&self) -> SessionStatus {
        match self.credentials().get() {
            Some(credential) => SessionStatus::LoggedIn {
                user: credential.user,
                expires_at_hint: credential.expires_at_hint,
            },
            None => SessionStatus::LoggedOut,
        }
    }
}
