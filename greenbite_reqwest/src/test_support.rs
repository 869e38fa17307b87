use std::{
    error,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use greenbite_tokens::{
    sources::RefreshInvoker, AccessToken, CredentialPair, RefreshToken, RefreshTokenRef,
};
use reqwest::{header, Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};

pub(crate) fn pair(access: &str, refresh: &str) -> CredentialPair {
    CredentialPair::new(AccessToken::from(access), RefreshToken::from(refresh))
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    http::Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .unwrap()
        .into()
}

/// Stands in for the backend at the end of the middleware chain
pub(crate) struct FakeBackend {
    valid_token: Mutex<String>,
    seen: Mutex<Vec<Option<String>>>,
}

impl FakeBackend {
    pub(crate) fn accepting(token: &str) -> Arc<Self> {
        Arc::new(Self {
            valid_token: Mutex::new(token.to_owned()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn accept(&self, token: &str) {
        *self.valid_token.lock().unwrap() = token.to_owned();
    }

    pub(crate) fn seen(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().clone()
    }

    pub(crate) fn seen_with(&self, authorization: &str) -> usize {
        self.seen()
            .iter()
            .filter(|s| s.as_deref() == Some(authorization))
            .count()
    }
}

#[async_trait::async_trait]
impl Middleware for FakeBackend {
    async fn handle(
        &self,
        req: Request,
        _: &mut http::Extensions,
        _: Next<'_>,
    ) -> Result<Response> {
        let authorization = req
            .headers()
            .get(header::AUTHORIZATION)
            .map(|v| v.to_str().unwrap().to_owned());
        self.seen.lock().unwrap().push(authorization.clone());

        let path = req.url().path();
        if path == "/slow/" {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        match path {
            "/auth/jwt/create/" => {
                let body: serde_json::Value = req
                    .body()
                    .and_then(|b| b.as_bytes())
                    .map(|b| serde_json::from_slice(b).unwrap())
                    .unwrap_or_default();

                if body["password"] == "correct horse" {
                    Ok(json_response(
                        StatusCode::OK,
                        serde_json::json!({ "access": "T1", "refresh": "R1" }),
                    ))
                } else {
                    Ok(json_response(
                        StatusCode::UNAUTHORIZED,
                        serde_json::json!({ "detail": "No active account found with the given credentials" }),
                    ))
                }
            }
            "/broken/" => Ok(json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "detail": "oops" }),
            )),
            _ => {
                let expected = format!("Bearer {}", self.valid_token.lock().unwrap());
                if authorization.as_deref() == Some(expected.as_str()) {
                    Ok(json_response(
                        StatusCode::OK,
                        serde_json::json!({
                            "id": 7,
                            "email": "eater@greenbite.test",
                            "username": "eater",
                            "is_staff": false,
                            "is_subscribed": true,
                            "community": { "seller_status": "ACTIVE", "display_name": "Green Eater" },
                            "avatar": null,
                        }),
                    ))
                } else {
                    Ok(json_response(
                        StatusCode::UNAUTHORIZED,
                        serde_json::json!({ "detail": "Given token not valid for any token type", "code": "token_not_valid" }),
                    ))
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid refresh credential")]
pub(crate) struct InvalidRefresh;

pub(crate) enum Behavior {
    Succeed(CredentialPair),
    Fail,
}

/// A refresh source that counts how often it is asked to refresh
pub(crate) struct FakeInvoker {
    calls: Arc<AtomicUsize>,
    delay: Duration,
    behavior: Behavior,
}

impl FakeInvoker {
    pub(crate) fn new(behavior: Behavior) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let invoker = Self {
            calls: Arc::clone(&calls),
            delay: Duration::from_millis(20),
            behavior,
        };
        (invoker, calls)
    }
}

#[async_trait::async_trait]
impl RefreshInvoker for FakeInvoker {
    async fn refresh(
        &self,
        _: &RefreshTokenRef,
    ) -> std::result::Result<CredentialPair, Box<dyn error::Error + Send + Sync + 'static>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match &self.behavior {
            Behavior::Succeed(pair) => Ok(pair.clone()),
            Behavior::Fail => Err(Box::new(InvalidRefresh)),
        }
    }
}
