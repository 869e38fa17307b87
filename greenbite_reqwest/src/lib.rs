//! Middleware to keep outgoing requests signed in to the GreenBite backend
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AccessTokenMiddleware`] in the middleware stack to attach
//! the access token held in a [`CredentialStore`] to each outbound request.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required.
//!
//! Placing a [`RefreshMiddleware`] ahead of it recovers from expired access
//! tokens. Every request rejected with `401 Unauthorized` while a refresh is
//! underway waits on the same refresh and is replayed once with the new
//! access token. If the refresh fails, the stored credentials are discarded
//! and every waiting request fails with the same error.
//!
//! ```
//! use greenbite_reqwest::{AccessTokenMiddleware, RefreshMiddleware};
//! use greenbite_tokens::{
//!     sources::JwtRefreshInvoker, CredentialStore, RefreshCoordinator, SessionTerminator,
//! };
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = CredentialStore::new();
//! let refresh_url = "https://api.greenbite.example/auth/jwt/refresh/".parse()?;
//! let coordinator = RefreshCoordinator::new(
//!     JwtRefreshInvoker::new(Client::default(), refresh_url),
//!     SessionTerminator::new(store.clone()),
//! );
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(RefreshMiddleware::new(coordinator))
//!     .with(AccessTokenMiddleware::new(store))
//!     .build();
//!
//! let req = client.get("https://api.greenbite.example/food/logs/");
//! # let _ = req;
//! # Ok(())
//! # }
//! ```
//!
//! The middleware can also be configured to add an authorization token
//! only conditionally. This can be useful in the event that you want to
//! use a single common middleware stack with multiple potential backends
//! and want to ensure that the token is only sent to its own backend.
//!
//! These predicates can be composed together to evaluate more complex
//! requirements prior to attaching a token to a request.
//!
//! ```
//! use greenbite_reqwest::{AccessTokenMiddleware, ExactHostMatch, HttpsOnly};
//! use greenbite_tokens::CredentialStore;
//! use predicates::prelude::PredicateBooleanExt;
//!
//! AccessTokenMiddleware::new(CredentialStore::new())
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("api.greenbite.example")));
//! ```
//!
//! For the common case, [`AuthClient`] assembles the whole stack from an
//! [`AuthConfig`] and adds login, logout, and current user lookups.
//!
//! [`CredentialStore`]: greenbite_tokens::CredentialStore

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod authenticate;
mod client;
mod error;
mod refresh;
#[cfg(test)]
mod test_support;

pub use authenticate::{AccessTokenMiddleware, AnyRequest, ExactHostMatch, HttpsOnly, NoAuth};
pub use client::{AuthClient, AuthClientBuilder, AuthConfig, Community, CurrentUser};
pub use error::AuthError;
pub use refresh::{AuthRetried, RefreshMiddleware};
