use crate::application::NowProvider;
use crate::domain::models::{CoachId, OAuthToken};
use crate::infrastructure::calendar_adapter::AccessTokenProvider;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::oauth_client::{
    OAuthCodeExchangeRequest, OAuthHttpClient, OAuthRefreshRequest, OAuthTokenResponse,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use url::Url;

const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8080/oauth2/callback";
const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/calendar";
const TOKEN_LEEWAY_SECONDS: i64 = 60;

pub const GOOGLE_CLIENT_ID_KEYS: &[&str] = &["COACHSCHED_GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_ID"];
pub const GOOGLE_CLIENT_SECRET_KEYS: &[&str] =
    &["COACHSCHED_GOOGLE_CLIENT_SECRET", "GOOGLE_CLIENT_SECRET"];
const GOOGLE_REDIRECT_URI_KEYS: &[&str] =
    &["COACHSCHED_GOOGLE_REDIRECT_URI", "GOOGLE_REDIRECT_URI"];
const GOOGLE_SCOPES_KEYS: &[&str] = &["COACHSCHED_GOOGLE_SCOPES", "GOOGLE_SCOPES"];

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub token_endpoint: String,
    pub authorization_endpoint: String,
}

impl OAuthConfig {
    pub fn google(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
            token_endpoint: GOOGLE_TOKEN_ENDPOINT.to_string(),
            authorization_endpoint: GOOGLE_AUTHORIZATION_ENDPOINT.to_string(),
        }
    }
}

/// Reads Google client settings through `lookup` (normally the process environment).
pub fn load_oauth_config_from_lookup<F>(lookup: F) -> Result<OAuthConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let client_id = required_lookup_value(&lookup, GOOGLE_CLIENT_ID_KEYS, "google client id")?;
    let client_secret =
        required_lookup_value(&lookup, GOOGLE_CLIENT_SECRET_KEYS, "google client secret")?;
    let redirect_uri = optional_lookup_value(&lookup, GOOGLE_REDIRECT_URI_KEYS)
        .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
    let scopes = optional_lookup_value(&lookup, GOOGLE_SCOPES_KEYS)
        .map(|raw| parse_scope_list(&raw))
        .filter(|scopes| !scopes.is_empty())
        .unwrap_or_else(|| vec![DEFAULT_SCOPE.to_string()]);

    Ok(OAuthConfig::google(
        client_id,
        client_secret,
        redirect_uri,
        scopes,
    ))
}

pub(crate) fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {field_name} (set one of: {})",
            keys.join(", ")
        ))
    })
}

/// First non-blank value among `keys`, trimmed.
pub(crate) fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn parse_scope_list(raw: &str) -> Vec<String> {
    raw.split([',', ' ', '\n', '\t'])
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureTokenResult {
    Existing(OAuthToken),
    Refreshed(OAuthToken),
    ReauthenticationRequired,
}

/// Per-coach OAuth tokens for one provider: consent URL, code exchange and refresh.
pub struct OAuthManager<S, C>
where
    S: CredentialStore,
    C: OAuthHttpClient,
{
    config: OAuthConfig,
    credential_store: Arc<S>,
    oauth_client: Arc<C>,
    now_provider: NowProvider,
}

impl<S, C> OAuthManager<S, C>
where
    S: CredentialStore,
    C: OAuthHttpClient,
{
    pub fn new(config: OAuthConfig, credential_store: Arc<S>, oauth_client: Arc<C>) -> Self {
        Self {
            config,
            credential_store,
            oauth_client,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn is_token_valid(&self, token: &OAuthToken) -> bool {
        token.is_valid_at((self.now_provider)(), TOKEN_LEEWAY_SECONDS)
    }

    /// Consent URL; `state` should identify the coach so the callback can be routed.
    pub fn build_authorization_url(&self, state: &str) -> Result<String, InfraError> {
        if state.trim().is_empty() {
            return Err(InfraError::OAuth("state must not be empty".to_string()));
        }
        if self.config.scopes.is_empty() {
            return Err(InfraError::OAuth("at least one scope is required".to_string()));
        }

        let mut url = Url::parse(&self.config.authorization_endpoint)
            .map_err(|error| InfraError::OAuth(format!("invalid authorization endpoint: {error}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);
        Ok(url.to_string())
    }

    pub async fn authenticate_with_code(
        &self,
        coach_id: &CoachId,
        authorization_code: &str,
    ) -> Result<OAuthToken, InfraError> {
        if authorization_code.trim().is_empty() {
            return Err(InfraError::OAuth("authorization code must not be empty".to_string()));
        }

        let response = self
            .oauth_client
            .exchange_authorization_code(OAuthCodeExchangeRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                redirect_uri: self.config.redirect_uri.clone(),
                authorization_code: authorization_code.trim().to_string(),
            })
            .await?;

        let token = self.token_from_response(response, None);
        self.credential_store.save_token(coach_id, &token)?;
        tracing::info!(coach_id = %coach_id, "calendar authorization stored");
        Ok(token)
    }

    pub async fn ensure_access_token(&self, coach_id: &CoachId) -> Result<EnsureTokenResult, InfraError> {
        let Some(stored) = self.credential_store.load_token(coach_id)? else {
            return Ok(EnsureTokenResult::ReauthenticationRequired);
        };
        if self.is_token_valid(&stored) {
            return Ok(EnsureTokenResult::Existing(stored));
        }
        let Some(refresh_token) = stored.refresh_token.clone() else {
            return Ok(EnsureTokenResult::ReauthenticationRequired);
        };

        let refreshed = self
            .oauth_client
            .refresh_access_token(OAuthRefreshRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                refresh_token,
            })
            .await;

        match refreshed {
            Ok(response) => {
                let token = self.token_from_response(response, stored.refresh_token);
                self.credential_store.save_token(coach_id, &token)?;
                Ok(EnsureTokenResult::Refreshed(token))
            }
            // A rejected grant needs the coach; a flaky network does not.
            Err(error @ InfraError::OAuth(_)) if !error.is_transient() => {
                tracing::warn!(coach_id = %coach_id, error = %error, "token refresh rejected");
                Ok(EnsureTokenResult::ReauthenticationRequired)
            }
            Err(error) => Err(error),
        }
    }

    pub fn disconnect(&self, coach_id: &CoachId) -> Result<(), InfraError> {
        self.credential_store.delete_token(coach_id)
    }

    fn token_from_response(
        &self,
        response: OAuthTokenResponse,
        fallback_refresh_token: Option<String>,
    ) -> OAuthToken {
        OAuthToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(fallback_refresh_token),
            expires_at: (self.now_provider)() + Duration::seconds(response.expires_in.max(0)),
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: response.scope,
        }
    }
}

#[async_trait]
impl<S, C> AccessTokenProvider for OAuthManager<S, C>
where
    S: CredentialStore,
    C: OAuthHttpClient,
{
    async fn access_token(&self, coach_id: &CoachId) -> Result<Option<String>, InfraError> {
        match self.ensure_access_token(coach_id).await? {
            EnsureTokenResult::Existing(token) | EnsureTokenResult::Refreshed(token) => {
                Ok(Some(token.access_token))
            }
            EnsureTokenResult::ReauthenticationRequired => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    enum FakeResponse {
        Success(OAuthTokenResponse),
        Rejected(String),
    }

    impl Default for FakeResponse {
        fn default() -> Self {
            Self::Success(OAuthTokenResponse {
                access_token: "fresh-access".to_string(),
                refresh_token: Some("fresh-refresh".to_string()),
                expires_in: 3600,
                token_type: Some("Bearer".to_string()),
                scope: Some("calendar".to_string()),
            })
        }
    }

    #[derive(Debug, Default)]
    struct FakeOAuthHttpClient {
        exchange_response: Mutex<FakeResponse>,
        refresh_response: Mutex<FakeResponse>,
        exchange_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
    }

    impl FakeOAuthHttpClient {
        fn respond_to_refresh(&self, response: FakeResponse) {
            *self.refresh_response.lock().expect("refresh lock") = response;
        }

        fn answer(response: &Mutex<FakeResponse>) -> Result<OAuthTokenResponse, InfraError> {
            match response.lock().expect("response lock").clone() {
                FakeResponse::Success(value) => Ok(value),
                FakeResponse::Rejected(message) => Err(InfraError::OAuth(message)),
            }
        }
    }

    #[async_trait]
    impl OAuthHttpClient for FakeOAuthHttpClient {
        async fn exchange_authorization_code(
            &self,
            _request: OAuthCodeExchangeRequest,
        ) -> Result<OAuthTokenResponse, InfraError> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            Self::answer(&self.exchange_response)
        }

        async fn refresh_access_token(
            &self,
            _request: OAuthRefreshRequest,
        ) -> Result<OAuthTokenResponse, InfraError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Self::answer(&self.refresh_response)
        }
    }

    fn config() -> OAuthConfig {
        OAuthConfig::google(
            "client-id",
            "client-secret",
            "http://localhost/oauth2/callback",
            vec![DEFAULT_SCOPE.to_string(), "openid".to_string()],
        )
    }

    fn coach() -> CoachId {
        CoachId::from("coach-1")
    }

    fn expired_token(refresh_token: Option<&str>) -> OAuthToken {
        OAuthToken {
            access_token: "stale-access".to_string(),
            refresh_token: refresh_token.map(ToOwned::to_owned),
            expires_at: Utc::now() - Duration::seconds(120),
            token_type: "Bearer".to_string(),
            scope: None,
        }
    }

    fn token_text() -> impl Strategy<Value = String> {
        "[A-Za-z0-9._\\-]{1,64}"
    }

    fn arb_live_token() -> impl Strategy<Value = OAuthToken> {
        (
            token_text(),
            prop::option::of(token_text()),
            120i64..604_800i64,
            prop::option::of(token_text()),
        )
            .prop_map(|(access_token, refresh_token, lifetime, scope)| OAuthToken {
                access_token,
                refresh_token,
                expires_at: Utc::now() + Duration::seconds(lifetime),
                token_type: "Bearer".to_string(),
                scope,
            })
    }

    proptest! {
        // A token outside the leeway window is used as is, with no network call.
        #[test]
        fn live_tokens_are_reused_without_refresh(token in arb_live_token()) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let store = Arc::new(InMemoryCredentialStore::default());
                store.save_token(&coach(), &token).expect("save token");
                let client = Arc::new(FakeOAuthHttpClient::default());
                let manager = OAuthManager::new(config(), Arc::clone(&store), Arc::clone(&client));

                let result = manager.ensure_access_token(&coach()).await.expect("ensure token");
                assert_eq!(result, EnsureTokenResult::Existing(token));
                assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
            });
        }

        // Rejected refreshes, or no refresh token at all, send the coach back to consent.
        #[test]
        fn rejected_refresh_requires_reauthentication(
            refresh_token in prop::option::of(token_text())
        ) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let store = Arc::new(InMemoryCredentialStore::default());
                store
                    .save_token(&coach(), &expired_token(refresh_token.as_deref()))
                    .expect("save token");
                let client = Arc::new(FakeOAuthHttpClient::default());
                client.respond_to_refresh(FakeResponse::Rejected(
                    "token endpoint error: invalid_grant".to_string(),
                ));
                let manager = OAuthManager::new(config(), Arc::clone(&store), Arc::clone(&client));

                let result = manager.ensure_access_token(&coach()).await.expect("ensure token");
                assert_eq!(result, EnsureTokenResult::ReauthenticationRequired);
                let expected_calls = usize::from(refresh_token.is_some());
                assert_eq!(client.refresh_calls.load(Ordering::SeqCst), expected_calls);
            });
        }
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_keeps_its_refresh_token() {
        let store = Arc::new(InMemoryCredentialStore::default());
        store
            .save_token(&coach(), &expired_token(Some("refresh-1")))
            .expect("save token");
        let client = Arc::new(FakeOAuthHttpClient::default());
        client.respond_to_refresh(FakeResponse::Success(OAuthTokenResponse {
            access_token: "renewed".to_string(),
            refresh_token: None,
            expires_in: 3600,
            token_type: None,
            scope: None,
        }));
        let manager = OAuthManager::new(config(), Arc::clone(&store), client);

        let access = manager.access_token(&coach()).await.expect("access token");
        assert_eq!(access.as_deref(), Some("renewed"));
        let stored = store.load_token(&coach()).expect("load").expect("stored");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(stored.token_type, "Bearer");
    }

    #[tokio::test]
    async fn transient_refresh_failure_is_an_error_not_a_disconnect() {
        let store = Arc::new(InMemoryCredentialStore::default());
        store
            .save_token(&coach(), &expired_token(Some("refresh-1")))
            .expect("save token");
        let client = Arc::new(FakeOAuthHttpClient::default());
        client.respond_to_refresh(FakeResponse::Rejected(
            "network error: connection reset".to_string(),
        ));
        let manager = OAuthManager::new(config(), Arc::clone(&store), client);

        assert!(manager.ensure_access_token(&coach()).await.is_err());
        assert!(store.load_token(&coach()).expect("load").is_some());
    }

    #[tokio::test]
    async fn tokens_are_kept_per_coach() {
        let store = Arc::new(InMemoryCredentialStore::default());
        let client = Arc::new(FakeOAuthHttpClient::default());
        let manager = OAuthManager::new(config(), Arc::clone(&store), Arc::clone(&client));

        manager
            .authenticate_with_code(&coach(), " code-1 ")
            .await
            .expect("exchange");
        assert_eq!(client.exchange_calls.load(Ordering::SeqCst), 1);
        assert!(manager.access_token(&coach()).await.expect("token").is_some());
        assert!(manager
            .access_token(&CoachId::from("coach-2"))
            .await
            .expect("token")
            .is_none());

        manager.disconnect(&coach()).expect("disconnect");
        assert!(manager.access_token(&coach()).await.expect("token").is_none());
        assert!(manager.authenticate_with_code(&coach(), "  ").await.is_err());
    }

    #[test]
    fn authorization_url_carries_offline_consent_and_state() {
        let manager = OAuthManager::new(
            config(),
            Arc::new(InMemoryCredentialStore::default()),
            Arc::new(FakeOAuthHttpClient::default()),
        );
        let url = Url::parse(&manager.build_authorization_url("coach-1").expect("url")).expect("parse");
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("state").map(String::as_str), Some("coach-1"));
        assert_eq!(pairs.get("access_type").map(String::as_str), Some("offline"));
        assert_eq!(
            pairs.get("scope").map(String::as_str),
            Some("https://www.googleapis.com/auth/calendar openid")
        );
        assert!(manager.build_authorization_url(" ").is_err());
    }

    #[test]
    fn config_lookup_requires_client_credentials() {
        let values: HashMap<&str, &str> = HashMap::from([
            ("COACHSCHED_GOOGLE_CLIENT_ID", "id-1"),
            ("GOOGLE_CLIENT_SECRET", " secret-1 "),
            ("COACHSCHED_GOOGLE_SCOPES", "openid, email"),
        ]);
        let config = load_oauth_config_from_lookup(|key| values.get(key).map(|v| v.to_string()))
            .expect("config");
        assert_eq!(config.client_id, "id-1");
        assert_eq!(config.client_secret, "secret-1");
        assert_eq!(config.redirect_uri, DEFAULT_REDIRECT_URI);
        assert_eq!(config.scopes, vec!["openid".to_string(), "email".to_string()]);

        let missing = load_oauth_config_from_lookup(|_| None);
        assert!(matches!(missing, Err(InfraError::InvalidConfig(_))));
    }
}
