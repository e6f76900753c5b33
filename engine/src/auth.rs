//! Authentication state consumed by collection stores.
//!
//! The engine does not authenticate anyone itself; the host application
//! feeds sign-in/sign-out events into an [`AuthHandle`] and the stores read
//! the current [`Identity`] from it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Owner id attached to every row this user writes
    pub user_id: String,
    /// Bearer token presented to the backend
    pub access_token: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
        }
    }
}

/// Authentication state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Session restoration has not finished yet
    #[default]
    Loading,
    SignedOut,
    SignedIn(Identity),
}

/// Observable authentication state, cheap to clone.
#[derive(Debug, Clone)]
pub struct AuthHandle {
    state: Arc<watch::Sender<AuthState>>,
}

impl Default for AuthHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthHandle {
    /// A handle still restoring its session.
    pub fn new() -> Self {
        Self::with_state(AuthState::Loading)
    }

    /// A handle that is already signed in.
    pub fn signed_in(identity: Identity) -> Self {
        Self::with_state(AuthState::SignedIn(identity))
    }

    /// A handle with no session.
    pub fn signed_out() -> Self {
        Self::with_state(AuthState::SignedOut)
    }

    fn with_state(initial: AuthState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        tracing::info!(user_id = %identity.user_id, "signed in");
        self.state.send_replace(AuthState::SignedIn(identity));
    }

    pub fn sign_out(&self) {
        tracing::info!("signed out");
        self.state.send_replace(AuthState::SignedOut);
    }

    /// Finish session restoration without a session.
    pub fn mark_signed_out(&self) {
        self.state.send_if_modified(|state| {
            if *state == AuthState::Loading {
                *state = AuthState::SignedOut;
                true
            } else {
                false
            }
        });
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        match &*self.state.borrow() {
            AuthState::SignedIn(identity) => Some(identity.clone()),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(*self.state.borrow(), AuthState::SignedIn(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.state.borrow(), AuthState::Loading)
    }

    /// Wait until session restoration has finished.
    pub async fn ready(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| *state != AuthState::Loading).await;
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }
}
