//! Federated login: the authority proves the email, then the flow converges on
//! the same session token as a password login.

use std::net::SocketAddr;

use tracing::{info, warn};

use crate::{
    auth::{
        oidc::{AuthState, FederatedIdentity, IdentityProvider, OidcError},
        services::{record_login, LoginMethod},
    },
    error::AuthError,
    state::AppState,
};

fn provider(state: &AppState) -> Result<&dyn IdentityProvider, AuthError> {
    state
        .oidc
        .as_deref()
        .ok_or_else(|| AuthError::ServiceUnavailable("federated login is not configured".into()))
}

/// First leg: where to send the browser, and what to remember until it comes back.
pub fn initiate(state: &AppState) -> Result<(String, AuthState), AuthError> {
    Ok(provider(state)?.authorization_url())
}

/// Second leg: validates the callback against the remembered state, exchanges
/// the code and issues a session token.
pub async fn complete(
    state: &AppState,
    pending: Option<AuthState>,
    code: Option<&str>,
    returned_state: Option<&str>,
    provider_error: Option<&str>,
    client: Option<SocketAddr>,
) -> Result<String, AuthError> {
    let idp = provider(state)?;

    if let Some(reason) = provider_error {
        warn!(%reason, "provider denied authorization");
        return Err(AuthError::FederatedAuthFailed);
    }
    let pending = pending.ok_or_else(|| {
        warn!("callback without pending oidc state");
        AuthError::FederatedAuthFailed
    })?;
    if returned_state != Some(pending.csrf_token.as_str()) {
        warn!("oidc state mismatch");
        return Err(AuthError::FederatedAuthFailed);
    }
    let code = code.ok_or(AuthError::FederatedAuthFailed)?;

    let identity = idp.exchange_code(code, &pending).await.map_err(|e| match e {
        OidcError::Unavailable(reason) => AuthError::ServiceUnavailable(reason),
        other => {
            warn!(error = %other, "oidc exchange failed");
            AuthError::FederatedAuthFailed
        }
    })?;

    login_with_identity(state, identity, client).await
}

/// Reconciles the asserted identity with the store and issues a session token.
pub async fn login_with_identity(
    state: &AppState,
    identity: FederatedIdentity,
    client: Option<SocketAddr>,
) -> Result<String, AuthError> {
    let email = identity
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| {
            warn!(subject = %identity.subject, "provider returned no email");
            AuthError::FederatedAuthFailed
        })?;
    if identity.email_verified == Some(false) {
        warn!(subject = %identity.subject, "provider email is not verified");
        return Err(AuthError::FederatedAuthFailed);
    }

    let user = state.users.find_or_create_federated(email).await?;
    if !user.is_active {
        warn!(user_id = %user.id, "federated login for inactive account");
        return Err(AuthError::InactiveAccount);
    }

    let token = state.tokens.issue_session(&user.email)?;
    info!(user_id = %user.id, subject = %identity.subject, "federated login");
    record_login(&user.email, client, LoginMethod::Google);
    Ok(token)
}
