/// Federated identity provider descriptors
///
/// A provider describes *which* third party the user signs in with and
/// what is requested from it. The consent flow itself runs inside the
/// identity service, reached through the popup handler URL built here.
use std::collections::BTreeMap;
use url::Url;
use uuid::Uuid;

use super::error::AuthError;
use crate::config::AppConfig;

pub const GOOGLE_PROVIDER_ID: &str = "google.com";

const HANDLER_PATH: &str = "/__/auth/handler";

/// OAuth parameters owned by the identity service; never forwarded as custom parameters
const RESERVED_PARAMETERS: &[&str] = &["client_id", "response_type", "scope", "redirect_uri", "state"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedProvider {
    provider_id: String,
    scopes: Vec<String>,
    custom_parameters: BTreeMap<String, String>,
}

impl FederatedProvider {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            scopes: Vec::new(),
            custom_parameters: BTreeMap::new(),
        }
    }

    /// Google sign-in with OpenID Connect scopes
    pub fn google() -> Self {
        Self::new(GOOGLE_PROVIDER_ID)
            .with_scope("openid")
            .with_scope("email")
            .with_scope("profile")
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        if !scope.is_empty() && !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    /// Replace the custom OAuth parameters (e.g. `prompt`, `login_hint`).
    pub fn with_custom_parameters<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.custom_parameters = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| !RESERVED_PARAMETERS.contains(&k.as_str()))
            .collect();
        self
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn custom_parameters(&self) -> &BTreeMap<String, String> {
        &self.custom_parameters
    }
}

/// A single popup sign-in attempt against the identity service's handler
#[derive(Debug, Clone)]
pub struct PopupRequest {
    url: Url,
    event_id: String,
    provider_id: String,
}

impl PopupRequest {
    pub fn new(
        config: &AppConfig,
        provider: &FederatedProvider,
        app_name: &str,
    ) -> Result<Self, AuthError> {
        let mut url = Url::parse(&format!("https://{}{}", config.auth_domain, HANDLER_PATH))
            .map_err(|e| AuthError::InvalidRequest(format!("Invalid auth domain: {}", e)))?;

        let event_id = Uuid::new_v4().to_string();

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("apiKey", &config.api_key);
            query.append_pair("appName", app_name);
            query.append_pair("authType", "signInViaPopup");
            query.append_pair("providerId", provider.provider_id());

            if !provider.scopes().is_empty() {
                query.append_pair("scopes", &provider.scopes().join(","));
            }

            if !provider.custom_parameters().is_empty() {
                let encoded = serde_json::to_string(provider.custom_parameters())
                    .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;
                query.append_pair("customParameters", &encoded);
            }

            query.append_pair("eventId", &event_id);
        }

        Ok(Self {
            url,
            event_id,
            provider_id: provider.provider_id().to_string(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Correlates the popup's result with this attempt
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn query(request: &PopupRequest) -> BTreeMap<String, String> {
        request.url().query_pairs().into_owned().collect()
    }

    #[test]
    fn test_google_defaults() {
        let provider = FederatedProvider::google();
        assert_eq!(provider.provider_id(), "google.com");
        assert_eq!(provider.scopes(), ["openid", "email", "profile"]);
        assert!(provider.custom_parameters().is_empty());
    }

    #[test]
    fn test_scopes_are_deduplicated() {
        let provider = FederatedProvider::google()
            .with_scope("email")
            .with_scope("")
            .with_scope("https://www.googleapis.com/auth/calendar.readonly");

        assert_eq!(provider.scopes().len(), 4);
    }

    #[test]
    fn test_reserved_custom_parameters_are_dropped() {
        let provider = FederatedProvider::google().with_custom_parameters([
            ("prompt", "select_account"),
            ("client_id", "spoofed"),
            ("state", "spoofed"),
        ]);

        assert_eq!(provider.custom_parameters().len(), 1);
        assert_eq!(provider.custom_parameters()["prompt"], "select_account");
    }

    #[test]
    fn test_popup_request_url() {
        let provider =
            FederatedProvider::google().with_custom_parameters([("prompt", "select_account")]);
        let request = PopupRequest::new(&test_config(), &provider, "[DEFAULT]").unwrap();

        assert_eq!(request.url().host_str(), Some("mapped-out-test.firebaseapp.com"));
        assert_eq!(request.url().path(), "/__/auth/handler");

        let params = query(&request);
        assert_eq!(params["apiKey"], "test-api-key");
        assert_eq!(params["appName"], "[DEFAULT]");
        assert_eq!(params["authType"], "signInViaPopup");
        assert_eq!(params["providerId"], "google.com");
        assert_eq!(params["scopes"], "openid,email,profile");
        assert_eq!(params["customParameters"], r#"{"prompt":"select_account"}"#);
        assert_eq!(params["eventId"], request.event_id());
    }

    #[test]
    fn test_popup_request_omits_empty_sections() {
        let request =
            PopupRequest::new(&test_config(), &FederatedProvider::new("github.com"), "app").unwrap();

        let params = query(&request);
        assert!(!params.contains_key("scopes"));
        assert!(!params.contains_key("customParameters"));
    }

    #[test]
    fn test_event_ids_are_unique() {
        let provider = FederatedProvider::google();
        let a = PopupRequest::new(&test_config(), &provider, "app").unwrap();
        let b = PopupRequest::new(&test_config(), &provider, "app").unwrap();
        assert_ne!(a.event_id(), b.event_id());
    }

    #[test]
    fn test_invalid_auth_domain() {
        let config = AppConfig {
            auth_domain: "bad domain".to_string(),
            ..test_config()
        };

        let result = PopupRequest::new(&config, &FederatedProvider::google(), "app");
        assert!(matches!(result, Err(AuthError::InvalidRequest(_))));
    }
}
