use greenbite_tokens::RefreshFailed;
use thiserror::Error;

/// An error surfaced by the authenticated client
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request was rejected as unauthorized even after refreshing credentials
    #[error("request was rejected as unauthorized after credentials were refreshed")]
    Unauthorized,
    /// Credentials could not be refreshed; the session has been ended
    #[error("session expired")]
    RefreshFailed(#[from] RefreshFailed),
    /// The backend refused the supplied login credentials
    #[error("login rejected with status {status}: {body}")]
    LoginRejected {
        /// The status code returned by the backend
        status: reqwest::StatusCode,
        /// The body of the error
        body: String,
    },
    /// The backend answered with an unexpected status
    #[error("unexpected response status {status}: {body}")]
    UnexpectedStatus {
        /// The status code returned by the backend
        status: reqwest::StatusCode,
        /// The body of the error
        body: String,
    },
    /// Unable to send the request or receive a response
    #[error(transparent)]
    Middleware(reqwest_middleware::Error),
    /// Unable to read the response body
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
    /// Unable to deserialize the response body
    #[error("error deserializing response body")]
    Decode(#[from] serde_json::Error),
    /// Unable to build a request URL
    #[error("invalid request url")]
    Url(#[from] url::ParseError),
}

impl AuthError {
    /// Extracts an authentication error carried inside a middleware error
    ///
    /// Errors raised by the refresh middleware reach callers of
    /// [`ClientWithMiddleware`][reqwest_middleware::ClientWithMiddleware] wrapped in
    /// [`reqwest_middleware::Error::Middleware`].
    pub fn from_middleware_error(error: &reqwest_middleware::Error) -> Option<&AuthError> {
        match error {
            reqwest_middleware::Error::Middleware(inner) => inner.downcast_ref(),
            _ => None,
        }
    }

    /// Whether this error ended the user's session
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::RefreshFailed(_))
    }

    pub(crate) fn into_middleware(self) -> reqwest_middleware::Error {
        reqwest_middleware::Error::middleware(self)
    }
}

impl From<reqwest_middleware::Error> for AuthError {
    fn from(error: reqwest_middleware::Error) -> Self {
        match error {
            reqwest_middleware::Error::Middleware(inner) => match inner.downcast::<AuthError>() {
                Ok(auth) => auth,
                Err(inner) => Self::Middleware(reqwest_middleware::Error::Middleware(inner)),
            },
            other => Self::Middleware(other),
        }
    }
}
