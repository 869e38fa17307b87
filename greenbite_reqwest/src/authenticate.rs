//! Attaching the current access token to outgoing requests

use std::fmt;

use bytes::{BufMut, BytesMut};
use greenbite_tokens::{AccessToken, AccessTokenRef, CredentialStore};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

/// Marks a request that must be sent without the stored access token
///
/// Attach with [`RequestBuilder::with_extension()`][reqwest_middleware::RequestBuilder::with_extension()].
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuth;

/// Recorded in the request extensions when the middleware attached a token
///
/// Holds the token that was sent, so a rejection can be matched against the
/// token currently in the store.
#[derive(Clone, Debug)]
pub(crate) struct TokenAttached(pub(crate) AccessToken);

/// A middleware that injects the stored access token into outgoing requests
///
/// Requests are passed through untouched when the store holds no access token,
/// when the predicate rejects the request, when the request is marked with
/// [`NoAuth`], or when an `Authorization` header is already present.
#[derive(Clone, Debug)]
pub struct AccessTokenMiddleware<P> {
    store: CredentialStore,
    predicate: P,
}

impl AccessTokenMiddleware<HttpsOnly> {
    /// Construct a new middleware from a credential store
    ///
    /// By default, this middleware will only send its token if the request
    /// is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(store: CredentialStore) -> Self {
        Self {
            store,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<P> {
        AccessTokenMiddleware {
            store: self.store,
            predicate,
        }
    }
}

impl<P> AccessTokenMiddleware<P> {
    fn get_token_from_store(&self) -> Option<(header::HeaderValue, AccessToken)> {
        let credentials = self.store.borrow();
        let token = credentials.access_token()?;

        tracing::trace!(token = %token, "obtained access token");

        Some((bearer_header(token)?, token.to_owned()))
    }
}

/// Builds a sensitive `Bearer` authorization header value for `token`
pub(crate) fn bearer_header(token: &AccessTokenRef) -> Option<header::HeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    match header::HeaderValue::from_maybe_shared(header_value.freeze()) {
        Ok(mut value) => {
            value.set_sensitive(true);
            Some(value)
        }
        Err(_) => {
            tracing::warn!("access token contains bytes not valid in a header, sending request without it");
            None
        }
    }
}

#[async_trait::async_trait]
impl<P> Middleware for AccessTokenMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if extensions.get::<NoAuth>().is_none()
            && !req.headers().contains_key(header::AUTHORIZATION)
            && self.predicate.eval(&req)
        {
            if let Some((value, token)) = self.get_token_from_store() {
                req.headers_mut().insert(header::AUTHORIZATION, value);
                extensions.insert(TokenAttached(token));
            }
        }

        next.run(req, extensions).await
    }
}

/// Attach an access token to every request
#[derive(Clone, Copy, Debug)]
pub struct AnyRequest;

impl Predicate<Request> for AnyRequest {
    #[inline]
    fn eval(&self, _: &Request) -> bool {
        true
    }
}

impl reflection::PredicateReflection for AnyRequest {}
impl fmt::Display for AnyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any request")
    }
}

/// Describes which part of the request made a predicate disagree with `expected`
fn mismatch<'a, P>(
    predicate: &'a P,
    expected: bool,
    actual: bool,
    attribute: &'static str,
    observed: Option<&str>,
) -> Option<reflection::Case<'a>>
where
    P: reflection::PredicateReflection,
{
    if actual == expected {
        return None;
    }

    let reflected: &'a dyn reflection::PredicateReflection = predicate;
    let observed = observed.unwrap_or("<none>").to_owned();
    Some(
        reflection::Case::new(Some(reflected), actual)
            .add_product(reflection::Product::new(attribute, observed)),
    )
}

/// Only attach an access token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        mismatch(self, expected, self.eval(req), "scheme", Some(req.url().scheme()))
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("request uses https")
    }
}

/// Only attach an access token if the request is being sent to one host
///
/// Hosts are compared case-insensitively. Ports are ignored, so a backend
/// reachable on several ports of the same host receives the token on each.
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
    pub fn new<S>(host: S) -> Self
    where
        S: ToString,
    {
        Self {
            host: host.to_string().to_ascii_lowercase(),
        }
    }

    /// Construct a predicate matching the host of `url`
    ///
    /// Returns `None` for URLs without a host, such as `data:` URLs.
    pub fn for_url(url: &url::Url) -> Option<Self> {
        url.host_str().map(Self::new)
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url()
            .host_str()
            .map_or(false, |host| host.eq_ignore_ascii_case(&self.host))
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        mismatch(self, expected, self.eval(req), "host", req.url().host_str())
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request host is {}", self.host)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use greenbite_tokens::{AccessToken, CredentialPair, RefreshToken};
    use reqwest::Client;
    use reqwest_middleware::ClientBuilder;

    use super::*;

    const TEST_TOKEN: &str = "this-is-a-test-token";
    const BEARER_TEST_TOKEN: &str = "Bearer this-is-a-test-token";

    struct AuthChecker {
        expected_authorization: String,
        checked: AtomicBool,
    }

    impl AuthChecker {
        pub fn new(expected: impl Into<String>) -> Self {
            Self {
                expected_authorization: expected.into(),
                checked: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl Middleware for AuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            let authorization_header = req
                .headers()
                .get(header::AUTHORIZATION)
                .expect("no authorization header")
                .to_str()
                .expect("authorization header was not valid UTF-8");

            assert_eq!(authorization_header, self.expected_authorization);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    #[derive(Default)]
    struct NoAuthChecker {
        checked: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Middleware for NoAuthChecker {
        async fn handle(
            &self,
            req: Request,
            extensions: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            assert_eq!(req.headers().get(header::AUTHORIZATION), None);
            assert!(extensions.get::<TokenAttached>().is_none());
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    fn signed_in_store() -> CredentialStore {
        CredentialStore::with_credentials(CredentialPair::new(
            AccessToken::from(TEST_TOKEN),
            RefreshToken::from("refresh"),
        ))
    }

    fn prepare_middleware() -> AccessTokenMiddleware<HttpsOnly> {
        AccessTokenMiddleware::new(signed_in_store())
    }

    mod when_request_does_not_have_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_with_defaults_attaches_token_on_https_request() {
            let middleware = prepare_middleware();
            let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn middleware_with_defaults_skips_plain_http_request() {
            let middleware = prepare_middleware();
            let auth_checker = Arc::new(NoAuthChecker::default());

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client.get("http://example.com").send().await.unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn request_marked_no_auth_is_sent_without_token() {
            let middleware = prepare_middleware().with_predicate(AnyRequest);
            let auth_checker = Arc::new(NoAuthChecker::default());

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client
                .get("https://example.com")
                .with_extension(NoAuth)
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        mod and_store_is_empty {
            use super::*;

            #[tokio::test]
            async fn middleware_sends_request_unmodified() {
                let middleware =
                    AccessTokenMiddleware::new(CredentialStore::new()).with_predicate(AnyRequest);
                let auth_checker = Arc::new(NoAuthChecker::default());

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client.get("https://example.com").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }

        mod and_store_is_updated {
            use super::*;

            #[tokio::test]
            async fn middleware_uses_latest_token() {
                let store = signed_in_store();
                let middleware = AccessTokenMiddleware::new(store.clone()).with_predicate(AnyRequest);
                let auth_checker = Arc::new(AuthChecker::new("Bearer T2"));

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                store.set(CredentialPair::new(
                    AccessToken::from("T2"),
                    RefreshToken::from("R2"),
                ));
                let resp = client.get("http://example.com").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }

        mod and_predicate_evaluates_to_attach {
            use super::*;

            #[tokio::test]
            async fn middleware_attaches_access_token() {
                let middleware = prepare_middleware().with_predicate(predicate::always());
                let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client.get("https://example.com").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }

        mod and_predicate_evaluates_to_ignore {
            use super::*;

            #[tokio::test]
            async fn middleware_does_not_attach_access_token() {
                let middleware = prepare_middleware().with_predicate(predicate::never());
                let auth_checker = Arc::new(NoAuthChecker::default());

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client.get("https://example.com").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }
    }

    mod when_request_already_contains_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_does_not_attach_access_token() {
            const OVERRIDE_TOKEN: &str = "overridden!";
            // Reqwest uses a capital `B` bearer
            const BEARER_OVERRIDE_TOKEN: &str = "Bearer overridden!";

            let middleware = prepare_middleware();
            let auth_checker = Arc::new(AuthChecker::new(BEARER_OVERRIDE_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client
                .get("https://example.com")
                .bearer_auth(OVERRIDE_TOKEN)
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }
    }

    mod bearer_header {
        use super::*;

        #[test]
        fn is_marked_sensitive() {
            let value = bearer_header(AccessTokenRef::from_static("T1")).unwrap();
            assert_eq!(value.to_str().unwrap(), "Bearer T1");
            assert!(value.is_sensitive());
        }

        #[test]
        fn rejects_tokens_with_newlines() {
            assert!(bearer_header(AccessTokenRef::from_static("T1\nX-Evil: 1")).is_none());
        }
    }

    mod predicates {
        use super::*;

        fn get(url: &str) -> Request {
            Request::new(reqwest::Method::GET, url.parse().unwrap())
        }

        fn reported(case: Option<reflection::Case>) -> Vec<(String, String)> {
            case.expect("predicate disagreed with expectation")
                .products()
                .map(|p| (p.name().to_owned(), p.value().to_string()))
                .collect()
        }

        #[test]
        fn https_only_reports_scheme_of_plain_request() {
            let request = get("http://127.0.0.1:8000/auth/users/me/");

            assert!(HttpsOnly.find_case(false, &request).is_none());
            assert_eq!(
                reported(HttpsOnly.find_case(true, &request)),
                vec![("scheme".to_owned(), "http".to_owned())]
            );
        }

        #[test]
        fn exact_host_ignores_case_and_port() {
            let predicate = ExactHostMatch::new("API.GreenBite.example");

            assert!(predicate.eval(&get("https://api.greenbite.example/food/logs/")));
            assert!(predicate.eval(&get("https://api.greenbite.example:8443/food/logs/")));
            assert_eq!(
                reported(predicate.find_case(true, &get("https://cdn.greenbite.example/a.png"))),
                vec![("host".to_owned(), "cdn.greenbite.example".to_owned())]
            );
        }

        #[test]
        fn exact_host_from_base_url() {
            let base = url::Url::parse("http://127.0.0.1:8000/").unwrap();
            let predicate = ExactHostMatch::for_url(&base).unwrap();

            assert!(predicate.eval(&get("http://127.0.0.1:8000/auth/users/me/")));
            assert!(!predicate.eval(&get("http://localhost:8000/auth/users/me/")));
            assert_eq!(predicate.to_string(), "request host is 127.0.0.1");
        }

        #[test]
        fn exact_host_needs_a_host() {
            let url = url::Url::parse("data:text/plain,hello").unwrap();
            assert!(ExactHostMatch::for_url(&url).is_none());
        }

        #[test]
        fn composed_predicates_require_both() {
            let predicate = HttpsOnly.and(ExactHostMatch::new("api.greenbite.example"));

            assert!(predicate.eval(&get("https://api.greenbite.example/meal-plans/")));
            assert!(!predicate.eval(&get("http://api.greenbite.example/meal-plans/")));
            assert!(!predicate.eval(&get("https://elsewhere.example/meal-plans/")));
        }
    }

    mod token_attached {
        use super::*;

        #[derive(Default)]
        struct AttachedRecorder {
            seen: std::sync::Mutex<Option<String>>,
        }

        #[async_trait::async_trait]
        impl Middleware for AttachedRecorder {
            async fn handle(
                &self,
                _: Request,
                extensions: &mut http::Extensions,
                _: Next<'_>,
            ) -> Result<Response> {
                *self.seen.lock().unwrap() = extensions
                    .get::<TokenAttached>()
                    .map(|TokenAttached(token)| token.as_str().to_owned());
                Ok(http::Response::<&[u8]>::default().into())
            }
        }

        #[tokio::test]
        async fn records_the_token_that_was_sent() {
            let recorder = Arc::new(AttachedRecorder::default());
            let client = ClientBuilder::new(Client::default())
                .with(prepare_middleware())
                .with_arc(recorder.clone())
                .build();

            client.get("https://example.com").send().await.unwrap();

            assert_eq!(recorder.seen.lock().unwrap().as_deref(), Some(TEST_TOKEN));
        }
    }
}
