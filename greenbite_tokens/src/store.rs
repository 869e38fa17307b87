use crate::{AccessToken, CredentialPair};
use std::{ops, sync::Arc};
use tokio::sync::watch;

/// The process-wide holder of the current credential pair
///
/// Readers always observe a complete snapshot: a refresh replaces the
/// access and refresh tokens together, so a stale access token is never
/// paired with a new refresh token.
///
/// Cloning a store produces another handle to the same credentials.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    tx: Arc<watch::Sender<Arc<CredentialPair>>>,
}

/// A handle that observes changes to a [`CredentialStore`]
#[derive(Clone, Debug)]
pub struct CredentialWatcher {
    watcher: watch::Receiver<Arc<CredentialPair>>,
}

/// An outstanding borrow of the current credentials
///
/// This borrow should be held for as brief a time as possible, as outstanding
/// borrows will block updates to the store.
#[derive(Debug)]
pub struct BorrowedCredentials<'a> {
    inner: watch::Ref<'a, Arc<CredentialPair>>,
}

impl<'a> ops::Deref for BorrowedCredentials<'a> {
    type Target = CredentialPair;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// The store has been dropped and no further updates will be published
#[derive(Debug, thiserror::Error)]
#[error("the credential store has been dropped")]
pub struct CredentialStoreDropped;

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    /// Constructs an unauthenticated store
    pub fn new() -> Self {
        Self::with_credentials(CredentialPair::empty())
    }

    /// Constructs a store that starts out holding `pair`
    pub fn with_credentials(pair: CredentialPair) -> Self {
        let (tx, _) = watch::channel(Arc::new(pair));
        Self { tx: Arc::new(tx) }
    }

    /// Gets a snapshot of the current credentials
    pub fn get(&self) -> Arc<CredentialPair> {
        Arc::clone(&self.tx.borrow())
    }

    /// Borrows the current credentials without cloning the snapshot handle
    pub fn borrow(&self) -> BorrowedCredentials<'_> {
        BorrowedCredentials {
            inner: self.tx.borrow(),
        }
    }

    /// Gets the current access token, if any
    pub fn access_token(&self) -> Option<AccessToken> {
        self.tx.borrow().access_token().map(ToOwned::to_owned)
    }

    /// Replaces the current credentials
    pub fn set(&self, pair: CredentialPair) {
        self.replace(Arc::new(pair));
    }

    pub(crate) fn replace(&self, pair: Arc<CredentialPair>) {
        tracing::trace!(
            has_access_token = pair.access_token().is_some(),
            has_refresh_token = pair.refresh_token().is_some(),
            "replacing stored credentials"
        );
        self.tx.send_replace(pair);
    }

    /// Removes all credentials
    ///
    /// Returns `true` if the store held any credentials before the call.
    pub fn clear(&self) -> bool {
        let mut cleared = false;
        self.tx.send_if_modified(|current| {
            if current.is_empty() {
                false
            } else {
                *current = Arc::new(CredentialPair::empty());
                cleared = true;
                true
            }
        });
        cleared
    }

    /// Whether the store currently holds an access token
    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().access_token().is_some()
    }

    /// Subscribes to changes of the stored credentials
    pub fn subscribe(&self) -> CredentialWatcher {
        CredentialWatcher {
            watcher: self.tx.subscribe(),
        }
    }
}

impl CredentialWatcher {
    /// Borrows the most recently published credentials
    pub fn credentials(&self) -> BorrowedCredentials<'_> {
        BorrowedCredentials {
            inner: self.watcher.borrow(),
        }
    }

    /// Waits until the store publishes new credentials
    ///
    /// Returns an error once every handle to the store has been dropped.
    pub async fn changed(&mut self) -> Result<Arc<CredentialPair>, CredentialStoreDropped> {
        self.watcher
            .changed()
            .await
            .map_err(|_| CredentialStoreDropped)?;
        Ok(Arc::clone(&self.watcher.borrow_and_update()))
    }
}
