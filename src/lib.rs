//! Federated sign-in for the mapped-out web app.
//!
//! Initialize an [`App`] from its [`AppConfig`], wrap an identity service in
//! an [`Auth`] handle and pass that handle to whatever needs to sign users
//! in or out, or to check who is signed in.

pub mod app;
pub mod auth;
pub mod config;
pub mod listener;

pub use app::{App, DEFAULT_APP_NAME};
pub use auth::{
    Auth, AuthError, FederatedProvider, IdentityService, InMemoryIdentityService, PopupHandler,
    Principal,
};
pub use config::{AppConfig, ConfigError};
pub use listener::{FirstValue, Listener, Unsubscribe, first_notification};
