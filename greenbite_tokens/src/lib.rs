//! Credential storage and single-flight refresh for the GreenBite client
//!
//! This library holds the access/refresh token pair for the signed-in user and
//! coordinates renewing it when the backend reports that the access token has
//! expired.
//!
//! Requests are expected to fail with an authentication error in bursts: when an
//! access token expires, every request that is in flight at that moment comes back
//! rejected at roughly the same time. The [`RefreshCoordinator`] makes sure that only
//! the first of those callers actually exchanges the refresh token, while the rest
//! wait for that exchange and then reuse its result. If the exchange fails, every
//! waiter receives the same error and the session is ended through the
//! [`SessionTerminator`], exactly once.
//!
//! # General Flow
//!
//! On start-up, build a store, a terminator for that store, and a coordinator
//! around a refresh source.
//!
//! ```
//! use greenbite_tokens::{
//!     sources::JwtRefreshInvoker, AccessToken, CredentialPair, CredentialStore,
//!     RefreshCoordinator, RefreshToken, SessionTerminator,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let store = CredentialStore::new();
//! let terminator = SessionTerminator::new(store.clone());
//!
//! let invoker = JwtRefreshInvoker::new(
//!     reqwest::Client::new(),
//!     reqwest::Url::parse("http://127.0.0.1:8000/auth/jwt/refresh/").unwrap(),
//! );
//!
//! let coordinator = RefreshCoordinator::new(invoker, terminator);
//!
//! // After signing in
//! store.set(CredentialPair::new(
//!     AccessToken::from("access"),
//!     RefreshToken::from("refresh"),
//! ));
//!
//! // When a request is rejected because its access token expired
//! # /* Commented out due to this trying to interact with the world.
//! let fresh = coordinator.refresh().await?;
//! # */
//! # }
//! ```
//!
//! The `greenbite_reqwest` crate wires these pieces into a `reqwest` middleware
//! stack so that callers never see the refresh at all.
//!
//! # Features
//!
//! * `jwt` (default): Provides [`JwtRefreshInvoker`][sources::JwtRefreshInvoker], which
//!   exchanges refresh tokens against the backend's JWT refresh endpoint.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
mod coordinator;
mod credentials;
pub mod session;
pub mod sources;
mod store;

pub use braids::*;
pub use coordinator::{CoordinatorConfig, RefreshCoordinator, RefreshFailed};
pub use credentials::CredentialPair;
pub use session::{EndReason, SessionEvent, SessionTerminator};
pub use store::{BorrowedCredentials, CredentialStore, CredentialStoreDropped, CredentialWatcher};
