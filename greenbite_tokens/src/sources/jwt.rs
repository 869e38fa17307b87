//! A refresh source backed by a JWT authority's refresh endpoint

use std::error;

use async_trait::async_trait;
use thiserror::Error;

use super::RefreshInvoker;
use crate::{CredentialPair, RefreshTokenRef};

pub mod dto;

/// Exchanges refresh tokens by posting them to the authority's refresh URL
///
/// The underlying client should not carry the authenticating middleware, so
/// that a rejected refresh can never trigger another refresh.
#[derive(Clone, Debug)]
pub struct JwtRefreshInvoker {
    client: reqwest::Client,
    refresh_url: reqwest::Url,
}

impl JwtRefreshInvoker {
    /// Constructs a new refresh source
    pub fn new(client: reqwest::Client, refresh_url: reqwest::Url) -> Self {
        Self {
            client,
            refresh_url,
        }
    }

    /// The URL refresh requests are sent to
    pub fn refresh_url(&self) -> &reqwest::Url {
        &self.refresh_url
    }

    /// Performs a single exchange against the authority
    pub async fn request_credentials(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<CredentialPair, RefreshError> {
        request_credentials(&self.client, self.refresh_url.clone(), refresh_token).await
    }
}

#[async_trait]
impl RefreshInvoker for JwtRefreshInvoker {
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<CredentialPair, Box<dyn error::Error + Send + Sync + 'static>> {
        Ok(self.request_credentials(refresh_token).await?)
    }
}

/// An error while attempting to exchange a refresh token
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The authority rejected the refresh token
    #[error("authority rejected refresh token with status {status}: {body}")]
    Rejected {
        /// The status code returned by the authority
        status: reqwest::StatusCode,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBody(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
    /// Unable to send a refresh request to the authority
    #[error("error sending refresh request to authority")]
    RequestSend(#[source] reqwest::Error),
}

#[tracing::instrument(err, skip(client, refresh_url, refresh_token), fields(refresh_url = %refresh_url))]
async fn request_credentials(
    client: &reqwest::Client,
    refresh_url: reqwest::Url,
    refresh_token: &RefreshTokenRef,
) -> Result<CredentialPair, RefreshError> {
    tracing::trace!("requesting new credentials from authority");

    let resp = client
        .post(refresh_url)
        .json(&dto::RefreshRequest {
            refresh: refresh_token,
        })
        .send()
        .await
        .map_err(RefreshError::RequestSend)?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received refresh response from authority"
    );

    if !status.is_success() {
        let body = resp.text().await.map_err(RefreshError::BodyRead)?;
        return Err(RefreshError::Rejected { status, body });
    }

    let body = resp.bytes().await.map_err(RefreshError::BodyRead)?;
    let resp: dto::TokenPairResponse = serde_json::from_slice(&body)?;

    tracing::info!(
        rotated_refresh_token = resp.refresh.is_some(),
        "received new access token"
    );

    Ok(resp.into_credentials().or_refresh_token(refresh_token))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{http::StatusCode, routing::post, Router};
    use tokio::net::TcpListener;

    use super::*;
    use crate::{AccessToken, RefreshToken};

    type Received = Arc<Mutex<Vec<String>>>;

    /// Starts an authority that answers every refresh with `status` and `body`
    async fn authority(status: StatusCode, body: &'static str) -> (JwtRefreshInvoker, Received) {
        let received = Received::default();
        let app = Router::new().route(
            "/auth/jwt/refresh/",
            post({
                let received = Arc::clone(&received);
                move |request: String| {
                    received.lock().unwrap().push(request);
                    async move { (status, body) }
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let url = reqwest::Url::parse(&format!("http://{}/auth/jwt/refresh/", addr)).unwrap();
        (JwtRefreshInvoker::new(reqwest::Client::new(), url), received)
    }

    fn refresh_token() -> &'static RefreshTokenRef {
        RefreshTokenRef::from_static("R1")
    }

    #[tokio::test]
    async fn posts_refresh_token_and_returns_rotated_pair() {
        let (invoker, received) =
            authority(StatusCode::OK, r#"{"access":"T2","refresh":"R2"}"#).await;

        let pair = invoker.request_credentials(refresh_token()).await.unwrap();

        assert_eq!(
            pair,
            CredentialPair::new(AccessToken::from("T2"), RefreshToken::from("R2"))
        );
        assert_eq!(*received.lock().unwrap(), vec![r#"{"refresh":"R1"}"#.to_owned()]);
        assert_eq!(invoker.refresh_url().path(), "/auth/jwt/refresh/");
    }

    #[tokio::test]
    async fn keeps_refresh_token_when_authority_does_not_rotate() {
        let (invoker, _) = authority(StatusCode::OK, r#"{"access":"T2"}"#).await;

        let pair = RefreshInvoker::refresh(&invoker, refresh_token()).await.unwrap();

        assert_eq!(
            pair,
            CredentialPair::new(AccessToken::from("T2"), RefreshToken::from("R1"))
        );
    }

    #[tokio::test]
    async fn rejected_refresh_token_reports_status_and_body() {
        let (invoker, _) = authority(
            StatusCode::UNAUTHORIZED,
            r#"{"detail":"Token is blacklisted","code":"token_not_valid"}"#,
        )
        .await;

        let error = invoker.request_credentials(refresh_token()).await.unwrap_err();

        match error {
            RefreshError::Rejected { status, body } => {
                assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
                assert!(body.contains("Token is blacklisted"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_token_body_is_a_decode_error() {
        let (invoker, _) = authority(StatusCode::OK, r#"{"token":"T2"}"#).await;

        let error = invoker.request_credentials(refresh_token()).await.unwrap_err();

        assert!(matches!(error, RefreshError::TokenBody(_)));
    }

    #[tokio::test]
    async fn unreachable_authority_is_a_send_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = reqwest::Url::parse(&format!("http://{}/auth/jwt/refresh/", addr)).unwrap();
        let invoker = JwtRefreshInvoker::new(reqwest::Client::new(), url);

        let error = invoker.request_credentials(refresh_token()).await.unwrap_err();

        assert!(matches!(error, RefreshError::RequestSend(_)));
    }
}
