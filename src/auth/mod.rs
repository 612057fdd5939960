// Authentication Module
// Explicit handle over an identity service: popup sign-in, sign-out and
// one-shot session checks

pub mod error;
pub mod memory;
pub mod principal;
pub mod provider;
pub mod service;

pub use error::AuthError;
pub use memory::{InMemoryIdentityService, PopupHandler};
pub use principal::Principal;
pub use provider::{FederatedProvider, GOOGLE_PROVIDER_ID, PopupRequest};
pub use service::{AuthStateListener, IdentityService, Subscription};

use std::sync::Arc;
use tracing::{debug, info};

use crate::app::App;
use crate::listener::first_notification;

/// Authentication handle for one app.
///
/// Build it once and pass clones to the components that need it. Every
/// error comes straight from the underlying service.
pub struct Auth<S: IdentityService> {
    app_name: String,
    service: Arc<S>,
    provider: FederatedProvider,
}

impl<S: IdentityService> Clone for Auth<S> {
    fn clone(&self) -> Self {
        Self {
            app_name: self.app_name.clone(),
            service: Arc::clone(&self.service),
            provider: self.provider.clone(),
        }
    }
}

impl<S: IdentityService> Auth<S> {
    /// Handle signing in with Google
    pub fn new(app: &App, service: Arc<S>) -> Self {
        Self {
            app_name: app.name().to_string(),
            service,
            provider: FederatedProvider::google(),
        }
    }

    pub fn with_provider(mut self, provider: FederatedProvider) -> Self {
        self.provider = provider;
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn provider(&self) -> &FederatedProvider {
        &self.provider
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Sign in through the federated popup flow
    pub async fn sign_in(&self) -> Result<(), S::Error> {
        debug!(app = %self.app_name, provider = self.provider.provider_id(), "Signing in");
        let principal = self.service.sign_in_with_popup(&self.provider).await?;
        info!(app = %self.app_name, uid = %principal.uid, "Sign-in complete");
        Ok(())
    }

    /// End the current session
    pub async fn log_out(&self) -> Result<(), S::Error> {
        debug!(app = %self.app_name, "Signing out");
        self.service.sign_out().await
    }

    /// Resolve once with the current session state.
    ///
    /// Registers a listener, takes the first state it is given and cancels
    /// the registration before returning. There is no timeout: a service
    /// that never reports a state leaves this pending.
    pub async fn check_auth(&self) -> Result<Option<Principal>, S::Error> {
        let first = first_notification(|listener| self.service.on_auth_state_changed(listener))?;
        let state = first.await;
        debug!(app = %self.app_name, signed_in = state.is_some(), "Checked auth state");
        Ok(state)
    }

    /// Long-lived observer; call the returned subscription to stop it
    pub fn on_auth_state_changed(
        &self,
        listener: AuthStateListener,
    ) -> Result<Subscription, S::Error> {
        self.service.on_auth_state_changed(listener)
    }

    /// Synchronous snapshot; may lag a sign-in that is still completing
    pub fn current_user(&self) -> Option<Principal> {
        self.service.current_user()
    }
}
