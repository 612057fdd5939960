/// Identity service capability set
///
/// The `Auth` handle only ever talks to the identity service through this
/// trait, so any backend (the in-process service, a hosted SDK binding, a
/// test double) can be substituted without touching callers.
use async_trait::async_trait;

use super::principal::Principal;
use super::provider::FederatedProvider;
use crate::listener::Listener;

/// Observer for sign-in state: `Some` while signed in, `None` otherwise
pub type AuthStateListener = Listener<Option<Principal>>;

/// Cancels an auth-state registration when invoked
pub type Subscription = Box<dyn FnOnce() + Send>;

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Error raised by this service; surfaced to callers unchanged
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run the federated popup flow and establish a session
    async fn sign_in_with_popup(
        &self,
        provider: &FederatedProvider,
    ) -> Result<Principal, Self::Error>;

    /// End the current session, if any
    async fn sign_out(&self) -> Result<(), Self::Error>;

    /// Register `listener` for sign-in state changes.
    ///
    /// The listener is called asynchronously with the current state shortly
    /// after registration, then again on every change, until the returned
    /// subscription is invoked.
    fn on_auth_state_changed(
        &self,
        listener: AuthStateListener,
    ) -> Result<Subscription, Self::Error>;

    /// Synchronous snapshot of the signed-in user
    fn current_user(&self) -> Option<Principal>;
}
