//! DTOs for interacting with the JWT authority

use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef, CredentialPair, Email, Password, RefreshTokenRef};

/// Body of a refresh request
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    /// The refresh token being exchanged
    pub refresh: &'a RefreshTokenRef,
}

/// Credentials a user signs in with
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoginCredentials {
    /// The user's email address
    pub email: Email,
    /// The user's password
    pub password: Password,
}

impl LoginCredentials {
    /// Constructs a new set of login credentials
    pub fn new(email: impl Into<Email>, password: impl Into<Password>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// A token pair as issued by the authority on login or refresh
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenPairResponse<'a> {
    /// The new access token
    #[serde(borrow)]
    pub access: &'a AccessTokenRef,
    /// The new refresh token, if the authority rotates refresh tokens
    #[serde(borrow, default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<&'a RefreshTokenRef>,
}

impl TokenPairResponse<'_> {
    /// Converts the response into an owned credential pair
    pub fn into_credentials(self) -> CredentialPair {
        CredentialPair::from_parts(
            Some(AccessToken::from(self.access.as_str())),
            self.refresh.map(ToOwned::to_owned),
        )
    }
}
