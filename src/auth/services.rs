//! Local-credential flows: register, verify email, login, forgot and reset password,
//! plus the admin user operations. Federated login lives in `federated`.

use std::{fmt, net::SocketAddr};

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    auth::{
        claims::TokenPurpose,
        password::{hash_password, verify_against_dummy, verify_password},
        repo_types::{User, UserUpdate, VerifyOutcome},
    },
    error::AuthError,
    state::AppState,
};

pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If the email is registered, a password reset link has been sent.";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        // No markup characters: addresses are interpolated into mail bodies.
        static ref EMAIL_RE: Regex =
            Regex::new(r#"^[^@\s<>"'&]+@[^@\s<>"'&]+\.[^@\s<>"'&]+$"#).unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trims surrounding whitespace and validates the shape. Case is preserved.
pub(crate) fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim();
    if !is_valid_email(email) {
        return Err(AuthError::BadRequest("Invalid email".into()));
    }
    Ok(email.to_string())
}

fn require_password(password: &str) -> Result<(), AuthError> {
    if password.is_empty() {
        return Err(AuthError::BadRequest("Password must not be empty".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMethod {
    Manual,
    Google,
}

impl fmt::Display for LoginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoginMethod::Manual => "manual",
            LoginMethod::Google => "google",
        })
    }
}

/// Emits the login event on its own target so it can be routed separately.
pub(crate) fn record_login(email: &str, client: Option<SocketAddr>, method: LoginMethod) {
    let ip = client
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into());
    info!(target: "authgate::login", email, %ip, %method, "login");
}

fn link(base: &str, path: &str, token: &str) -> anyhow::Result<String> {
    let mut url = Url::parse(base)
        .and_then(|b| b.join(path))
        .context("build link")?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.to_string())
}

pub async fn register(state: &AppState, email: &str, password: &str) -> Result<(), AuthError> {
    let email = normalize_email(email)?;
    require_password(password)?;

    if state.users.find_by_email(&email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(AuthError::DuplicateEmail);
    }

    let hash = hash_password(password)?;
    let token = state.tokens.issue_verification(&email, &hash)?;
    let verify_url = link(&state.config.public_base_url, "/auth/verify-email", &token)?;

    let html = format!(
        "<h3>Welcome {email}</h3>\
         <p>Please confirm your account by following the link below:</p>\
         <a href=\"{verify_url}\">Verify account</a>"
    );
    state
        .mailer
        .send(&email, "Verify your account", &html)
        .await
        .map_err(|e| {
            error!(error = ?e, %email, "verification email dispatch failed");
            AuthError::NotificationFailed
        })?;

    info!(%email, "verification email dispatched");
    Ok(())
}

pub async fn verify_email(state: &AppState, token: &str) -> Result<VerifyOutcome, AuthError> {
    let claims = state
        .tokens
        .verify(token)
        .map_err(|_| AuthError::InvalidOrExpiredToken)?;
    let TokenPurpose::EmailVerification { password_hash } = claims.purpose else {
        return Err(AuthError::InvalidOrExpiredToken);
    };

    let (user, outcome) = state
        .users
        .verify_or_create(&claims.sub, &password_hash)
        .await?;
    info!(user_id = %user.id, email = %user.email, ?outcome, "email verified");
    Ok(outcome)
}

pub async fn login(
    state: &AppState,
    email: &str,
    password: &str,
    client: Option<SocketAddr>,
) -> Result<String, AuthError> {
    let email = email.trim();

    let user = match state.users.find_by_email(email).await? {
        Some(user) => user,
        None => {
            verify_against_dummy(password);
            warn!(%email, "login unknown email");
            return Err(AuthError::InvalidCredentials);
        }
    };

    if !verify_password(password, &user.password_hash) {
        warn!(%email, user_id = %user.id, "login invalid password");
        return Err(AuthError::InvalidCredentials);
    }

    if !user.is_active {
        warn!(%email, user_id = %user.id, "login inactive account");
        return Err(AuthError::InactiveAccount);
    }

    let token = state.tokens.issue_session(&user.email)?;
    record_login(&user.email, client, LoginMethod::Manual);
    Ok(token)
}

/// Always succeeds for well-formed input so the response never reveals whether
/// the account exists. Federated-only accounts are not sent a reset link.
/// Delivery runs in a background task and never delays the response.
pub async fn forgot_password(state: &AppState, email: &str) -> Result<(), AuthError> {
    let email = normalize_email(email)?;

    let Some(user) = state.users.find_by_email(&email).await? else {
        info!(%email, "password reset requested for unknown email");
        return Ok(());
    };
    if user.is_federated_only() {
        info!(user_id = %user.id, "password reset refused for federated-only account");
        return Ok(());
    }

    let token = state.tokens.issue_password_reset(&user.email)?;
    let reset_url = link(&state.config.public_base_url, "/reset-password", &token)?;
    let minutes = state.tokens.reset_ttl().whole_minutes();
    let html = format!(
        "<h3>Reset your password</h3>\
         <p>Follow the link below to choose a new password (expires in {minutes} minutes):</p>\
         <a href=\"{reset_url}\">{reset_url}</a>"
    );

    let mailer = state.mailer.clone();
    let (user_id, to) = (user.id, user.email);
    tokio::spawn(async move {
        match mailer.send(&to, "Reset your password", &html).await {
            Ok(()) => info!(%user_id, "password reset email dispatched"),
            Err(e) => error!(error = ?e, %user_id, "password reset email dispatch failed"),
        }
    });
    Ok(())
}

pub async fn reset_password(
    state: &AppState,
    token: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    let claims = state
        .tokens
        .verify(token)
        .map_err(|_| AuthError::InvalidOrExpiredToken)?;
    if claims.purpose != TokenPurpose::PasswordReset {
        return Err(AuthError::InvalidOrExpiredToken);
    }
    require_password(new_password)?;

    let hash = hash_password(new_password)?;
    let user = state
        .users
        .set_password_hash(&claims.sub, &hash)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    info!(user_id = %user.id, "password reset");
    Ok(())
}

pub async fn list_users(state: &AppState) -> Result<Vec<User>, AuthError> {
    Ok(state.users.list().await?)
}

pub async fn get_user(state: &AppState, id: Uuid) -> Result<User, AuthError> {
    state
        .users
        .find_by_id(id)
        .await?
        .ok_or(AuthError::UserNotFound)
}

pub async fn update_user(
    state: &AppState,
    id: Uuid,
    email: Option<String>,
    password: Option<String>,
    is_active: Option<bool>,
) -> Result<User, AuthError> {
    let email = email.as_deref().map(normalize_email).transpose()?;
    let password_hash = match password {
        Some(password) => {
            require_password(&password)?;
            Some(hash_password(&password)?)
        }
        None => None,
    };

    let update = UserUpdate {
        email,
        password_hash,
        is_active,
    };
    let user = state
        .users
        .update(id, update)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    info!(user_id = %user.id, "user updated");
    Ok(user)
}
