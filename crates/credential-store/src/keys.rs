//! Storage key constants.

/// Storage keys used for the persisted credential.
pub struct StorageKeys;

impl StorageKeys {
    /// Bearer access token
    pub const ACCESS_TOKEN: &'static str = "access_token";

    /// Refresh token used for renewal
    pub const REFRESH_TOKEN: &'static str = "refresh_token";

    /// Authenticated user profile (JSON)
    pub const USER_PROFILE: &'static str = "user_profile";

    /// Access token expiry hint (RFC 3339)
    pub const EXPIRES_AT_HINT: &'static str = "expires_at_hint";

    /// Every key owned by the credential, in write order.
    pub const ALL: [&'static str; 4] = [
        Self::ACCESS_TOKEN,
        Self::REFRESH_TOKEN,
        Self::USER_PROFILE,
        Self::EXPIRES_AT_HINT,
    ];
}
