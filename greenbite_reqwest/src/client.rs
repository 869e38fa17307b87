//! A ready-made authenticated client for the GreenBite backend

use std::{fmt, sync::Arc, time::Duration};

use greenbite_tokens::{
    sources::{
        jwt::dto::{LoginCredentials, TokenPairResponse},
        JwtRefreshInvoker, RefreshInvoker,
    },
    CoordinatorConfig, CredentialPair, CredentialStore, Email, EndReason, RefreshCoordinator,
    SessionEvent, SessionTerminator,
};
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{AccessTokenMiddleware, AuthError, ExactHostMatch, NoAuth, RefreshMiddleware};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/";
const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 30_000;

/// Where the backend lives and how long to wait on a refresh
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    base_url: Url,
    login_path: String,
    refresh_path: String,
    current_user_path: String,
    refresh_timeout_ms: u64,
}

impl Default for AuthConfig {
    /// Default configuration
    ///
    /// Targets a backend on `http://127.0.0.1:8000/` using the standard JWT
    /// endpoints, and gives up on a refresh after 30 seconds.
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            login_path: "auth/jwt/create/".to_owned(),
            refresh_path: "auth/jwt/refresh/".to_owned(),
            current_user_path: "auth/users/me/".to_owned(),
            refresh_timeout_ms: DEFAULT_REFRESH_TIMEOUT_MS,
        }
    }
}

impl AuthConfig {
    /// Constructs a configuration for the backend at `base_url`
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            ..Self::default()
        }
    }

    /// Overrides the path of the login endpoint
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Overrides the path of the refresh endpoint
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Overrides the path of the current user endpoint
    pub fn with_current_user_path(mut self, path: impl Into<String>) -> Self {
        self.current_user_path = path.into();
        self
    }

    /// Overrides how long a refresh may take
    ///
    /// The timeout is kept at millisecond precision, rounding up, so any
    /// non-zero timeout stays non-zero. A zero timeout disables the limit.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        let mut millis = timeout.as_millis();
        if timeout.subsec_nanos() % 1_000_000 != 0 {
            millis += 1;
        }
        self.refresh_timeout_ms = u64::try_from(millis).unwrap_or(u64::MAX);
        self
    }

    /// The backend's base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// How long a refresh may take before the session is ended
    ///
    /// [`Duration::ZERO`] means refreshes are never cut short.
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    /// Resolves `path` against the base URL
    pub fn url(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }

    /// The login endpoint
    pub fn login_url(&self) -> Result<Url, url::ParseError> {
        self.url(&self.login_path)
    }

    /// The refresh endpoint
    pub fn refresh_url(&self) -> Result<Url, url::ParseError> {
        self.url(&self.refresh_path)
    }

    /// The current user endpoint
    pub fn current_user_url(&self) -> Result<Url, url::ParseError> {
        self.url(&self.current_user_path)
    }
}

/// Community membership details of a user
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Community {
    /// Whether the user may sell on the marketplace, e.g. `ACTIVE` or `SUSPENDED`
    #[serde(default)]
    pub seller_status: Option<String>,
    /// Any other profile fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The signed-in user, as reported by the backend
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CurrentUser {
    /// The user's identifier
    #[serde(default)]
    pub id: Option<u64>,
    /// The email address the user signs in with
    #[serde(default)]
    pub email: Option<Email>,
    /// The user's display name
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, rename = "is_staff")]
    staff: bool,
    #[serde(default, rename = "is_subscribed")]
    subscribed: bool,
    /// Community membership, if the user has joined
    #[serde(default)]
    pub community: Option<Community>,
    /// Any other fields returned by the backend
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CurrentUser {
    /// Whether the user has administrative access
    pub fn is_admin(&self) -> bool {
        self.staff
    }

    /// Whether the user holds a subscription and is an active seller
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
            && self
                .community
                .as_ref()
                .and_then(|c| c.seller_status.as_deref())
                == Some("ACTIVE")
    }
}

/// Builds an [`AuthClient`]
pub struct AuthClientBuilder {
    config: AuthConfig,
    client: Option<reqwest::Client>,
    store: Option<CredentialStore>,
    invoker: Option<Arc<dyn RefreshInvoker>>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for AuthClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthClientBuilder")
            .field("config", &self.config)
            .field("client", &self.client)
            .field("store", &self.store)
            .field("custom_invoker", &self.invoker.is_some())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

impl AuthClientBuilder {
    /// Uses `client` for all requests instead of a default client
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Shares an existing credential store, e.g. one restored at start-up
    pub fn store(mut self, store: CredentialStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the default JWT refresh source
    pub fn invoker(mut self, invoker: impl RefreshInvoker + 'static) -> Self {
        self.invoker = Some(Arc::new(invoker));
        self
    }

    /// Appends middleware that runs after the token has been attached
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Appends shared middleware that runs after the token has been attached
    pub fn with_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Assembles the client
    pub fn build(self) -> Result<AuthClient, AuthError> {
        let client = self.client.unwrap_or_default();
        let store = self.store.unwrap_or_default();
        let terminator = SessionTerminator::new(store.clone());

        let invoker = match self.invoker {
            Some(invoker) => invoker,
            None => Arc::new(JwtRefreshInvoker::new(
                client.clone(),
                self.config.refresh_url()?,
            )),
        };

        let coordinator = RefreshCoordinator::with_config(
            invoker,
            terminator,
            CoordinatorConfig::new(self.config.refresh_timeout()),
        );

        let backend = ExactHostMatch::for_url(self.config.base_url())
            .ok_or(url::ParseError::EmptyHost)?;

        let mut builder = ClientBuilder::new(client)
            .with(RefreshMiddleware::new(coordinator.clone()))
            .with(AccessTokenMiddleware::new(store).with_predicate(backend));
        for middleware in self.middleware {
            builder = builder.with_arc(middleware);
        }

        Ok(AuthClient {
            http: builder.build(),
            login_url: self.config.login_url()?,
            current_user_url: self.config.current_user_url()?,
            config: self.config,
            coordinator,
        })
    }
}

/// An HTTP client that signs requests in as the current user
///
/// Requests made through [`http()`][Self::http()] carry the stored access
/// token. When it expires, the token is refreshed once and every affected
/// request is replayed; if the refresh fails, the session ends and
/// [`SessionEvent::Ended`] is broadcast to everyone who called
/// [`subscribe()`][Self::subscribe()].
#[derive(Clone, Debug)]
pub struct AuthClient {
    http: ClientWithMiddleware,
    login_url: Url,
    current_user_url: Url,
    config: AuthConfig,
    coordinator: RefreshCoordinator,
}

impl AuthClient {
    /// Constructs a client with default components
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        Self::builder(config).build()
    }

    /// Starts building a client with custom components
    pub fn builder(config: AuthConfig) -> AuthClientBuilder {
        AuthClientBuilder {
            config,
            client: None,
            store: None,
            invoker: None,
            middleware: Vec::new(),
        }
    }

    /// The authenticated client, for calling domain endpoints
    pub fn http(&self) -> &ClientWithMiddleware {
        &self.http
    }

    /// The client configuration
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Resolves `path` against the backend's base URL
    pub fn url(&self, path: &str) -> Result<Url, AuthError> {
        Ok(self.config.url(path)?)
    }

    /// The store holding the current credentials
    pub fn store(&self) -> &CredentialStore {
        self.coordinator.store()
    }

    /// The coordinator refreshing the current credentials
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Subscribes to session start and end notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.coordinator.terminator().subscribe()
    }

    /// Signs in and stores the issued credentials
    pub async fn login(
        &self,
        credentials: &LoginCredentials,
    ) -> Result<Arc<CredentialPair>, AuthError> {
        tracing::debug!(email = %credentials.email, "signing in");

        let resp = self
            .http
            .post(self.login_url.clone())
            .with_extension(NoAuth)
            .json(credentials)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.map_err(AuthError::BodyRead)?;
            return Err(AuthError::LoginRejected { status, body });
        }

        let body = resp.bytes().await.map_err(AuthError::BodyRead)?;
        let tokens: TokenPairResponse = serde_json::from_slice(&body)?;
        self.store().set(tokens.into_credentials());
        self.coordinator.terminator().started();

        tracing::info!(email = %credentials.email, "signed in");
        Ok(self.store().get())
    }

    /// Fetches the signed-in user's profile
    pub async fn current_user(&self) -> Result<CurrentUser, AuthError> {
        let resp = self.http.get(self.current_user_url.clone()).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.map_err(AuthError::BodyRead)?;
            return Err(AuthError::UnexpectedStatus { status, body });
        }

        let body = resp.bytes().await.map_err(AuthError::BodyRead)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Signs out locally by discarding the stored credentials
    ///
    /// Returns `true` if a session was active.
    pub fn logout(&self) -> bool {
        self.coordinator.terminator().terminate(EndReason::Logout)
    }
}
