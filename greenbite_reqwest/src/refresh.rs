//! Recovering from expired access tokens

use std::sync::Arc;

use greenbite_tokens::{AccessToken, CredentialPair, RefreshCoordinator};
use reqwest::{header, Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};

use crate::authenticate::{bearer_header, TokenAttached};
use crate::AuthError;

/// Marks a request that has already been replayed after a refresh
///
/// A request carrying this marker that is rejected as unauthorized fails with
/// [`AuthError::Unauthorized`] instead of triggering another refresh. Callers
/// may attach it up front to opt a request out of refreshing entirely.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthRetried;

/// A middleware that refreshes credentials when the backend rejects an access token
///
/// Must be placed ahead of [`AccessTokenMiddleware`][crate::AccessTokenMiddleware] in
/// the middleware stack so that replays pass back through it. When a request that
/// carried the stored access token comes back `401 Unauthorized`, the middleware
/// waits on the [`RefreshCoordinator`] for new credentials and replays the request
/// once with the refreshed access token.
///
/// A rejected request whose token has already been replaced in the store is
/// replayed with the stored credentials straight away, without a new refresh.
///
/// Responses to requests that were not authenticated from the store pass
/// through unchanged, as do requests whose bodies cannot be replayed.
#[derive(Clone, Debug)]
pub struct RefreshMiddleware {
    coordinator: RefreshCoordinator,
}

impl RefreshMiddleware {
    /// Construct a new middleware around a refresh coordinator
    pub fn new(coordinator: RefreshCoordinator) -> Self {
        Self { coordinator }
    }

    /// Obtains credentials to replay a request that was rejected with `sent`
    async fn credentials_after(&self, sent: &AccessToken) -> Result<Arc<CredentialPair>> {
        let current = self.coordinator.store().get();
        let rotated = current
            .access_token()
            .map_or(false, |token| token.as_str() != sent.as_str());
        if rotated {
            tracing::trace!("access token already refreshed, replaying with stored credentials");
            return Ok(current);
        }

        self.coordinator
            .refresh()
            .await
            .map_err(|error| AuthError::from(error).into_middleware())
    }
}

#[async_trait::async_trait]
impl Middleware for RefreshMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let replay = req.try_clone();
        let resp = next.clone().run(req, extensions).await?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }
        let Some(TokenAttached(sent)) = extensions.get::<TokenAttached>().cloned() else {
            return Ok(resp);
        };

        if extensions.get::<AuthRetried>().is_some() {
            tracing::debug!(url = %resp.url(), "replayed request rejected again");
            return Err(AuthError::Unauthorized.into_middleware());
        }

        let Some(mut replay) = replay else {
            tracing::warn!(url = %resp.url(), "access token rejected but request cannot be replayed");
            return Ok(resp);
        };

        tracing::debug!(url = %resp.url(), "access token rejected, waiting for refreshed credentials");
        extensions.insert(AuthRetried);

        let credentials = self.credentials_after(&sent).await?;

        let value = credentials
            .access_token()
            .and_then(bearer_header)
            .ok_or_else(|| AuthError::Unauthorized.into_middleware())?;
        replay.headers_mut().insert(header::AUTHORIZATION, value);

        tracing::trace!(url = %replay.url(), "replaying request with refreshed credentials");
        let resp = next.run(replay, extensions).await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!(url = %resp.url(), "replayed request rejected again");
            return Err(AuthError::Unauthorized.into_middleware());
        }

        Ok(resp)
    }
}
