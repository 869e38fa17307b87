use serde::{Deserialize, Serialize};

use super::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef};

/// The access and refresh tokens for the current session
///
/// Either token may be absent. A pair with neither token represents an
/// unauthenticated session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access: Option<AccessToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh: Option<RefreshToken>,
}

impl CredentialPair {
    /// Constructs a pair holding both tokens
    pub fn new(access: AccessToken, refresh: RefreshToken) -> Self {
        Self {
            access: Some(access),
            refresh: Some(refresh),
        }
    }

    /// Constructs a pair from tokens that may each be absent
    pub fn from_parts(access: Option<AccessToken>, refresh: Option<RefreshToken>) -> Self {
        Self { access, refresh }
    }

    /// An unauthenticated pair
    pub const fn empty() -> Self {
        Self {
            access: None,
            refresh: None,
        }
    }

    /// Gets the access token, if available
    #[inline]
    pub fn access_token(&self) -> Option<&AccessTokenRef> {
        self.access.as_deref()
    }

    /// Gets the refresh token, if available
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh.as_deref()
    }

    /// Whether this pair holds no tokens at all
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }

    /// Keeps `previous` as the refresh token if this pair did not carry one
    ///
    /// Used when the authority does not rotate refresh tokens.
    pub fn or_refresh_token(mut self, previous: &RefreshTokenRef) -> Self {
        if self.refresh.is_none() {
            self.refresh = Some(previous.to_owned());
        }
        self
    }
}
