//! OIDC authority client built on the openidconnect crate.

use async_trait::async_trait;
use openidconnect::core::{
    CoreAuthenticationFlow, CoreClient, CoreProviderMetadata, CoreUserInfoClaims,
};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce, OAuth2TokenResponse,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RequestTokenError, Scope, TokenResponse,
    UserInfoError,
};
use serde::{Deserialize, Serialize};

use crate::config::OidcConfig;

/// Correlation state carried between the redirect and the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub csrf_token: String,
    pub pkce_verifier: String,
    pub nonce: String,
}

/// Identity asserted by the authority after a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    pub subject: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    #[error("OIDC configuration error: {0}")]
    Configuration(String),
    #[error("OIDC discovery error: {0}")]
    Discovery(String),
    #[error("OIDC provider unreachable: {0}")]
    Unavailable(String),
    #[error("OIDC token exchange error: {0}")]
    TokenExchange(String),
    #[error("OIDC token validation error: {0}")]
    TokenValidation(String),
    #[error("OIDC userinfo error: {0}")]
    UserInfo(String),
}

/// The external authority, as seen by the federated flow.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authorization redirect URL plus the state to keep for the callback.
    fn authorization_url(&self) -> (String, AuthState);

    async fn exchange_code(
        &self,
        code: &str,
        state: &AuthState,
    ) -> Result<FederatedIdentity, OidcError>;
}

pub struct OidcClient {
    provider_metadata: CoreProviderMetadata,
    client_id: ClientId,
    client_secret: ClientSecret,
    redirect_url: RedirectUrl,
    http: reqwest::Client,
    config: OidcConfig,
}

impl OidcClient {
    /// Creates a client by discovering the provider metadata.
    pub async fn discover(config: OidcConfig) -> Result<Self, OidcError> {
        let issuer_url = IssuerUrl::new(config.issuer_url.clone())
            .map_err(|e| OidcError::Configuration(format!("invalid issuer URL: {e}")))?;

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OidcError::Configuration(format!("failed to create HTTP client: {e}")))?;

        let provider_metadata = CoreProviderMetadata::discover_async(issuer_url, &http)
            .await
            .map_err(|e| OidcError::Discovery(format!("failed to discover provider: {e}")))?;

        let redirect_url = RedirectUrl::new(config.redirect_uri.clone())
            .map_err(|e| OidcError::Configuration(format!("invalid redirect URI: {e}")))?;

        Ok(Self {
            provider_metadata,
            client_id: ClientId::new(config.client_id.clone()),
            client_secret: ClientSecret::new(config.client_secret.clone()),
            redirect_url,
            http,
            config,
        })
    }
}

#[async_trait]
impl IdentityProvider for OidcClient {
    fn authorization_url(&self) -> (String, AuthState) {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());
        let mut auth_request = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .set_pkce_challenge(pkce_challenge);
        for scope in &self.config.scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.clone()));
        }

        let (auth_url, csrf_token, nonce) = auth_request.url();
        let state = AuthState {
            csrf_token: csrf_token.secret().clone(),
            pkce_verifier: pkce_verifier.secret().clone(),
            nonce: nonce.secret().clone(),
        };
        (auth_url.to_string(), state)
    }

    async fn exchange_code(
        &self,
        code: &str,
        state: &AuthState,
    ) -> Result<FederatedIdentity, OidcError> {
        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| OidcError::Configuration(format!("token endpoint: {e}")))?
            .set_pkce_verifier(PkceCodeVerifier::new(state.pkce_verifier.clone()))
            .request_async(&self.http)
            .await
            .map_err(|e| match e {
                RequestTokenError::Request(inner) => OidcError::Unavailable(inner.to_string()),
                other => OidcError::TokenExchange(other.to_string()),
            })?;

        let id_token = token_response
            .id_token()
            .ok_or_else(|| OidcError::TokenExchange("no ID token in response".into()))?;
        let nonce = Nonce::new(state.nonce.clone());
        let id_claims = id_token
            .claims(&client.id_token_verifier(), &nonce)
            .map_err(|e| OidcError::TokenValidation(e.to_string()))?;
        let subject = id_claims.subject().clone();

        let userinfo: CoreUserInfoClaims = client
            .user_info(token_response.access_token().clone(), Some(subject.clone()))
            .map_err(|e| OidcError::Configuration(format!("userinfo endpoint: {e}")))?
            .request_async(&self.http)
            .await
            .map_err(|e| match e {
                UserInfoError::Request(inner) => OidcError::Unavailable(inner.to_string()),
                other => OidcError::UserInfo(other.to_string()),
            })?;

        Ok(FederatedIdentity {
            subject: subject.to_string(),
            email: userinfo
                .email()
                .or_else(|| id_claims.email())
                .map(|e| e.as_str().to_string()),
            email_verified: userinfo.email_verified().or(id_claims.email_verified()),
        })
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Provider stand-in that returns a canned identity.
    pub struct FakeProvider {
        pub identity: Mutex<Result<FederatedIdentity, String>>,
    }

    impl FakeProvider {
        pub fn returning(email: Option<&str>, email_verified: Option<bool>) -> Self {
            Self {
                identity: Mutex::new(Ok(FederatedIdentity {
                    subject: "provider-subject-1".into(),
                    email: email.map(str::to_string),
                    email_verified,
                })),
            }
        }

        pub fn unreachable() -> Self {
            Self {
                identity: Mutex::new(Err("connection reset".into())),
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn authorization_url(&self) -> (String, AuthState) {
            let state = AuthState {
                csrf_token: "csrf-1".into(),
                pkce_verifier: "verifier-1".into(),
                nonce: "nonce-1".into(),
            };
            (
                "https://provider.example/authorize?state=csrf-1".into(),
                state,
            )
        }

        async fn exchange_code(
            &self,
            code: &str,
            state: &AuthState,
        ) -> Result<FederatedIdentity, OidcError> {
            if code.is_empty() || state.pkce_verifier != "verifier-1" {
                return Err(OidcError::TokenExchange("invalid_grant".into()));
            }
            self.identity
                .lock()
                .unwrap()
                .clone()
                .map_err(OidcError::Unavailable)
        }
    }
}
