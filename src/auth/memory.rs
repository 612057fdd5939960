/// In-process identity service
///
/// Keeps the signed-in user in memory and delivers auth-state
/// notifications on the tokio runtime. The consent step of a federated
/// sign-in is delegated to a [`PopupHandler`], which is where a browser
/// window, a desktop webview, or a test stub plugs in.
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::error::AuthError;
use super::principal::Principal;
use super::provider::{FederatedProvider, PopupRequest};
use super::service::{AuthStateListener, IdentityService, Subscription};
use crate::app::App;
use crate::config::AppConfig;

/// Completes a popup sign-in and reports who signed in
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PopupHandler: Send + Sync {
    async fn complete(&self, request: &PopupRequest) -> Result<Principal, AuthError>;
}

struct Registration {
    listener: AuthStateListener,
    /// Set once the initial state has been delivered; change notifications
    /// skip the registration until then
    primed: bool,
}

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    listeners: HashMap<u64, Registration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Invoke `listener` unless its subscription was cancelled meanwhile.
/// The registry lock is not held during the call.
fn deliver(
    registry: &Mutex<ListenerRegistry>,
    id: u64,
    listener: &AuthStateListener,
    state: Option<Principal>,
) {
    let live = lock(registry).listeners.contains_key(&id);
    if live {
        listener(state);
    }
}

/// Deliver the initial state to a fresh registration.
///
/// Must run under the ordering lock so the state read here is still the
/// latest one when the listener sees it.
fn deliver_initial(
    registry: &Mutex<ListenerRegistry>,
    current: &RwLock<Option<Principal>>,
    id: u64,
    listener: &AuthStateListener,
) {
    let live = match lock(registry).listeners.get_mut(&id) {
        Some(registration) => {
            registration.primed = true;
            true
        }
        None => false,
    };
    if live {
        let state = current.read().unwrap_or_else(PoisonError::into_inner).clone();
        listener(state);
    }
}

pub struct InMemoryIdentityService {
    app_name: String,
    config: AppConfig,
    popup: Arc<dyn PopupHandler>,
    current: Arc<RwLock<Option<Principal>>>,
    registry: Arc<Mutex<ListenerRegistry>>,
    /// Held across every state write and its delivery, and across initial
    /// deliveries, so listeners observe states in write order
    order: Arc<Mutex<()>>,
}

impl InMemoryIdentityService {
    pub fn new(app: &App, popup: Arc<dyn PopupHandler>) -> Self {
        Self {
            app_name: app.name().to_string(),
            config: app.config().clone(),
            popup,
            current: Arc::new(RwLock::new(None)),
            registry: Arc::new(Mutex::new(ListenerRegistry::default())),
            order: Arc::new(Mutex::new(())),
        }
    }

    /// Number of live auth-state registrations
    pub fn listener_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }

    fn set_current(&self, state: Option<Principal>) -> Option<Principal> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, state)
    }

    /// Caller holds the ordering lock
    fn notify(&self, state: Option<Principal>) {
        let snapshot: Vec<(u64, AuthStateListener)> = lock(&self.registry)
            .listeners
            .iter()
            .filter(|(_, registration)| registration.primed)
            .map(|(id, registration)| (*id, Arc::clone(&registration.listener)))
            .collect();

        debug!(listeners = snapshot.len(), signed_in = state.is_some(), "Notifying auth state");

        for (id, listener) in snapshot {
            deliver(&self.registry, id, &listener, state.clone());
        }
    }
}

#[async_trait]
impl IdentityService for InMemoryIdentityService {
    type Error = AuthError;

    async fn sign_in_with_popup(
        &self,
        provider: &FederatedProvider,
    ) -> Result<Principal, AuthError> {
        let request = PopupRequest::new(&self.config, provider, &self.app_name)?;

        debug!(
            provider = provider.provider_id(),
            event_id = request.event_id(),
            "Opening sign-in popup"
        );

        let mut principal = match self.popup.complete(&request).await {
            Ok(principal) => principal,
            Err(e) => {
                warn!(provider = provider.provider_id(), "Popup sign-in failed: {}", e);
                return Err(e);
            }
        };
        principal.signed_in_at = Some(Utc::now());

        let _order = lock(&self.order);
        self.set_current(Some(principal.clone()));
        info!(uid = %principal.uid, provider = %principal.provider_id, "Signed in");

        self.notify(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let _order = lock(&self.order);
        match self.set_current(None) {
            Some(previous) => {
                info!(uid = %previous.uid, "Signed out");
                self.notify(None);
            }
            None => debug!("Sign-out requested with no active session"),
        }
        Ok(())
    }

    fn on_auth_state_changed(
        &self,
        listener: AuthStateListener,
    ) -> Result<Subscription, AuthError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            AuthError::Internal(format!("Auth state listeners need a tokio runtime: {}", e))
        })?;

        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.insert(
                id,
                Registration {
                    listener: Arc::clone(&listener),
                    primed: false,
                },
            );
            id
        };
        debug!(listener_id = id, "Registered auth state listener");

        // Initial state is delivered asynchronously, like every later change
        let registry = Arc::clone(&self.registry);
        let current = Arc::clone(&self.current);
        let order = Arc::clone(&self.order);
        runtime.spawn(async move {
            let _order = lock(&order);
            deliver_initial(&registry, &current, id, &listener);
        });

        let registry = Arc::clone(&self.registry);
        Ok(Box::new(move || {
            if lock(&registry).listeners.remove(&id).is_some() {
                debug!(listener_id = id, "Removed auth state listener");
            }
        }))
    }

    fn current_user(&self) -> Option<Principal> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn test_app() -> App {
        App::initialize(test_config()).unwrap()
    }

    fn popup_returning(uid: &'static str) -> Arc<dyn PopupHandler> {
        let mut popup = MockPopupHandler::new();
        popup
            .expect_complete()
            .returning(move |request| Ok(Principal::new(uid, request.provider_id())));
        Arc::new(popup)
    }

    fn channel_listener() -> (AuthStateListener, mpsc::UnboundedReceiver<Option<Principal>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: AuthStateListener = Arc::new(move |state| {
            let _ = tx.send(state);
        });
        (listener, rx)
    }

    #[tokio::test]
    async fn test_initial_state_is_delivered_asynchronously() {
        let service = InMemoryIdentityService::new(&test_app(), popup_returning("uid-1"));
        let (listener, mut rx) = channel_listener();

        let _subscription = service.on_auth_state_changed(listener).unwrap();
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await, Some(None));
    }

    #[tokio::test]
    async fn test_sign_in_updates_state_and_notifies() {
        let service = InMemoryIdentityService::new(&test_app(), popup_returning("uid-1"));
        let (listener, mut rx) = channel_listener();
        let _subscription = service.on_auth_state_changed(listener).unwrap();
        assert_eq!(rx.recv().await, Some(None));

        let principal = service
            .sign_in_with_popup(&FederatedProvider::google())
            .await
            .unwrap();

        assert_eq!(principal.uid, "uid-1");
        assert_eq!(principal.provider_id, "google.com");
        assert!(principal.signed_in_at.is_some());
        assert_eq!(service.current_user(), Some(principal.clone()));
        assert_eq!(rx.recv().await, Some(Some(principal)));
    }

    #[tokio::test]
    async fn test_popup_failure_leaves_state_untouched() {
        let mut popup = MockPopupHandler::new();
        popup
            .expect_complete()
            .times(1)
            .returning(|_| Err(AuthError::PopupClosed));
        let service = InMemoryIdentityService::new(&test_app(), Arc::new(popup));

        let result = service.sign_in_with_popup(&FederatedProvider::google()).await;

        assert_eq!(result, Err(AuthError::PopupClosed));
        assert_eq!(service.current_user(), None);
    }

    #[tokio::test]
    async fn test_sign_out_notifies_only_on_change() {
        let service = InMemoryIdentityService::new(&test_app(), popup_returning("uid-1"));
        service
            .sign_in_with_popup(&FederatedProvider::google())
            .await
            .unwrap();

        let (listener, mut rx) = channel_listener();
        let _subscription = service.on_auth_state_changed(listener).unwrap();
        assert!(matches!(rx.recv().await, Some(Some(_))));

        service.sign_out().await.unwrap();
        assert_eq!(rx.recv().await, Some(None));

        service.sign_out().await.unwrap();
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_listener_is_not_called() {
        let service = InMemoryIdentityService::new(&test_app(), popup_returning("uid-1"));
        let (listener, mut rx) = channel_listener();

        let subscription = service.on_auth_state_changed(listener).unwrap();
        assert_eq!(service.listener_count(), 1);
        subscription();
        assert_eq!(service.listener_count(), 0);

        service
            .sign_in_with_popup(&FederatedProvider::google())
            .await
            .unwrap();
        tokio::task::yield_now().await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_listener_may_cancel_itself_while_notified() {
        let service = InMemoryIdentityService::new(&test_app(), popup_returning("uid-1"));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let listener_slot = Arc::clone(&slot);
        let listener: AuthStateListener = Arc::new(move |state| {
            if let Some(cancel) = listener_slot.lock().unwrap().take() {
                cancel();
            }
            let _ = tx.send(state);
        });
        *slot.lock().unwrap() = Some(service.on_auth_state_changed(listener).unwrap());

        assert_eq!(rx.recv().await, Some(None));
        assert_eq!(service.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_change_before_initial_delivery_is_seen_once() {
        let service = InMemoryIdentityService::new(&test_app(), popup_returning("uid-1"));
        let (listener, mut rx) = channel_listener();
        let _subscription = service.on_auth_state_changed(listener).unwrap();

        // Initial delivery has not run yet on this single-threaded runtime
        let principal = service
            .sign_in_with_popup(&FederatedProvider::google())
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(Some(principal)));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_deliver_in_write_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut popup = MockPopupHandler::new();
        let uids = Arc::clone(&counter);
        popup.expect_complete().returning(move |request| {
            let n = uids.fetch_add(1, Ordering::SeqCst);
            Ok(Principal::new(format!("uid-{n}"), request.provider_id()))
        });
        let service = Arc::new(InMemoryIdentityService::new(&test_app(), Arc::new(popup)));

        let (listener, mut rx) = channel_listener();
        let _subscription = service.on_auth_state_changed(listener).unwrap();
        assert_eq!(rx.recv().await, Some(None));

        let mut tasks = Vec::new();
        for i in 0..64 {
            let service = Arc::clone(&service);
            tasks.push(tokio::spawn(async move {
                service
                    .sign_in_with_popup(&FederatedProvider::google())
                    .await
                    .unwrap();
                if i % 2 == 0 {
                    service.sign_out().await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Deliveries happen inside the writes, so everything has arrived
        let mut last = None;
        let mut seen = 0;
        while let Ok(state) = rx.try_recv() {
            last = Some(state);
            seen += 1;
        }
        assert!(seen >= 64);
        assert_eq!(last, Some(service.current_user()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_initial_state_is_never_stale() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut popup = MockPopupHandler::new();
        let uids = Arc::clone(&counter);
        popup.expect_complete().returning(move |request| {
            let n = uids.fetch_add(1, Ordering::SeqCst);
            Ok(Principal::new(format!("uid-{n}"), request.provider_id()))
        });
        let service = Arc::new(InMemoryIdentityService::new(&test_app(), Arc::new(popup)));

        let writer = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                for _ in 0..200 {
                    service
                        .sign_in_with_popup(&FederatedProvider::google())
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut subscriptions = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..32 {
            let (listener, rx) = channel_listener();
            subscriptions.push(service.on_auth_state_changed(listener).unwrap());
            receivers.push(rx);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        let latest = service.current_user().map(|p| p.uid);
        for mut rx in receivers {
            let mut seen = Vec::new();
            while let Ok(Some(state)) =
                tokio::time::timeout(Duration::from_millis(50), rx.recv()).await
            {
                seen.push(state.map(|p| p.uid));
            }

            // One writer, so uids grow in write order; an older state after a
            // newer one would break the sequence
            let numbers: Vec<usize> = seen
                .iter()
                .flatten()
                .map(|uid| uid.trim_start_matches("uid-").parse().unwrap())
                .collect();
            assert!(numbers.windows(2).all(|pair| pair[0] < pair[1]), "{seen:?}");
            assert_eq!(seen.last(), Some(&latest));
        }
        drop(subscriptions);
    }

    #[test]
    fn test_registration_requires_runtime() {
        let service = InMemoryIdentityService::new(&test_app(), popup_returning("uid-1"));
        let (listener, _rx) = channel_listener();

        let result = service.on_auth_state_changed(listener);
        assert!(matches!(result, Err(AuthError::Internal(_))));
        assert_eq!(service.listener_count(), 0);
    }
}
