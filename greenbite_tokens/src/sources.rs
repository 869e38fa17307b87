//! Refresh sources

use crate::{CredentialPair, RefreshTokenRef};
use async_trait::async_trait;
use std::{error, sync::Arc};

#[cfg(feature = "jwt")]
pub mod jwt;

#[cfg(feature = "jwt")]
pub use jwt::{JwtRefreshInvoker, RefreshError};

/// A source that exchanges a refresh token for a new credential pair
///
/// Implementations perform exactly one exchange per call and do not retry.
#[async_trait]
pub trait RefreshInvoker: Send + Sync {
    /// Exchanges `refresh_token` for a new credential pair
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<CredentialPair, Box<dyn error::Error + Send + Sync + 'static>>;
}

#[async_trait]
impl<T: RefreshInvoker + ?Sized> RefreshInvoker for Arc<T> {
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<CredentialPair, Box<dyn error::Error + Send + Sync + 'static>> {
        (**self).refresh(refresh_token).await
    }
}
