//! Credential and profile types.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Authenticated user descriptor returned by the login endpoint.
///
/// Fields the client does not model are kept in `extra` so they survive a
/// store round-trip.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: None,
            display_name: None,
            extra: Map::new(),
        }
    }

    /// Name for display, falling back to common server fields and then the id.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or_else(|| self.extra.get("username").and_then(Value::as_str))
            .or_else(|| self.extra.get("email").and_then(Value::as_str))
            .unwrap_or(&self.id)
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// The session credential.
#[derive(Clone, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Profile,
    /// Access token expiry, when the token carries one. Informational only.
    pub expires_at_hint: Option<DateTime<Utc>>,
}

impl Credential {
    /// Build a credential, deriving the expiry hint from the access token.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>, user: Profile) -> Self {
        let access_token = access_token.into();
        let expires_at_hint = jwt_expiry(&access_token);
        Self {
            access_token,
            refresh_token: refresh_token.into(),
            user,
            expires_at_hint,
        }
    }

    /// The credential after a renewal: new access token, refresh token
    /// rotated only when the server issued one.
    pub fn renewed(&self, access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self::new(
            access_token,
            refresh_token.unwrap_or_else(|| self.refresh_token.clone()),
            self.user.clone(),
        )
    }

    /// Whether the expiry hint lies in the past. `false` when unknown.
    pub fn looks_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at_hint.is_some_and(|exp| exp <= now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("user", &self.user)
            .field("expires_at_hint", &self.expires_at_hint)
            .finish()
    }
}

/// Read the `exp` claim of a JWT-shaped token without verifying it.
pub(crate) fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}
