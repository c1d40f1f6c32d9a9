//! Storage key constants.

/// Keys under which session state is persisted
pub struct StorageKeys;

impl StorageKeys {
    /// Current access token
    pub const ACCESS_TOKEN: &'static str = "access-token";

    /// Current refresh token
    pub const REFRESH_TOKEN: &'static str = "refresh-token";

    /// Access token expiry (epoch milliseconds, decimal string)
    pub const TOKEN_EXPIRES_AT: &'static str = "token-expires-at";

    /// Session snapshot (JSON `{ user, is_authenticated }`)
    pub const AUTH_STORAGE: &'static str = "auth-storage";

    /// Every key owned by the session, cleared together on logout.
    pub const ALL: [&'static str; 4] = [
        Self::ACCESS_TOKEN,
        Self::REFRESH_TOKEN,
        Self::TOKEN_EXPIRES_AT,
        Self::AUTH_STORAGE,
    ];
}
