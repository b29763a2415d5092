use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{debug, warn};

use super::{
    claims::TokenPurpose,
    jwt::TokenCodec,
    repo::UserStore,
    repo_types::{Role, User},
};
use crate::{error::AuthError, state::AppState};

/// Resolves a bearer token to a stored user. Token failures and unknown subjects
/// collapse to `Unauthorized` so callers cannot tell a bad signature from a
/// deleted account. Store failures stay internal errors.
pub async fn authenticate(
    tokens: &TokenCodec,
    users: &dyn UserStore,
    bearer: &str,
) -> Result<User, AuthError> {
    let claims = tokens.verify(bearer).map_err(|e| {
        debug!(error = %e, "bearer token rejected");
        AuthError::Unauthorized
    })?;
    if claims.purpose != TokenPurpose::Session {
        warn!(kind = claims.purpose.kind(), "non-session token used as bearer");
        return Err(AuthError::Unauthorized);
    }

    match users.find_by_email(&claims.sub).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => {
            debug!("bearer subject no longer exists");
            Err(AuthError::Unauthorized)
        }
        Err(e) => {
            warn!(error = %e, "user lookup failed during authentication");
            Err(e.into())
        }
    }
}

pub fn authorize(user: &User, required: Role) -> Result<(), AuthError> {
    if user.role != required {
        warn!(user_id = %user.id, role = %user.role, %required, "role check failed");
        return Err(AuthError::Forbidden);
    }
    Ok(())
}

fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::Unauthorized)?;

    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Unauthorized)
}

/// Any authenticated caller.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let user = authenticate(&state.tokens, state.users.as_ref(), token).await?;
        Ok(CurrentUser(user))
    }
}

/// An authenticated caller holding the admin role.
pub struct RequireAdmin(pub User);

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        authorize(&user, Role::Admin)?;
        Ok(RequireAdmin(user))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::{
        http::{header::WWW_AUTHENTICATE, StatusCode},
        response::IntoResponse,
    };
    use time::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::{
        auth::{
            repo::StoreError,
            repo_types::{UserUpdate, VerifyOutcome},
        },
        config::JwtConfig,
        state::testing::test_config,
    };

    fn foreign_codec() -> TokenCodec {
        TokenCodec::new(&JwtConfig {
            secret: "someone-elses-secret".into(),
            ..test_config().jwt
        })
    }

    #[tokio::test]
    async fn session_token_of_known_user_authenticates() {
        let fake = AppState::fake();
        fake.users.seed("a@x.com", "h", true, Role::User);
        let token = fake.state.tokens.issue_session("a@x.com").unwrap();

        let user = authenticate(&fake.state.tokens, fake.users.as_ref(), &token)
            .await
            .unwrap();
        assert_eq!(user.email, "a@x.com");
    }

    #[tokio::test]
    async fn foreign_or_expired_or_garbage_tokens_are_unauthorized() {
        let fake = AppState::fake();
        fake.users.seed("a@x.com", "h", true, Role::User);
        let tokens = &fake.state.tokens;

        let foreign = foreign_codec().issue_session("a@x.com").unwrap();
        let expired = tokens
            .issue("a@x.com", TokenPurpose::Session, Duration::minutes(-1))
            .unwrap();

        for bad in [foreign.as_str(), expired.as_str(), "not.a.jwt", ""] {
            let err = authenticate(tokens, fake.users.as_ref(), bad).await.unwrap_err();
            assert!(matches!(err, AuthError::Unauthorized), "token {bad:?}");
        }
    }

    #[tokio::test]
    async fn unknown_subject_is_unauthorized() {
        let fake = AppState::fake();
        let token = fake.state.tokens.issue_session("ghost@x.com").unwrap();
        let err = authenticate(&fake.state.tokens, fake.users.as_ref(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
    }

    #[tokio::test]
    async fn single_purpose_tokens_are_not_bearer_credentials() {
        let fake = AppState::fake();
        fake.users.seed("a@x.com", "h", true, Role::User);
        let tokens = &fake.state.tokens;

        let verification = tokens.issue_verification("a@x.com", "h").unwrap();
        let reset = tokens.issue_password_reset("a@x.com").unwrap();
        for token in [verification, reset] {
            let err = authenticate(tokens, fake.users.as_ref(), &token)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::Unauthorized));
        }
    }

    #[tokio::test]
    async fn role_mismatch_is_forbidden() {
        let fake = AppState::fake();
        let user = fake.users.seed("a@x.com", "h", true, Role::User);
        let admin = fake.users.seed("root@x.com", "h", true, Role::Admin);

        assert!(matches!(authorize(&user, Role::Admin), Err(AuthError::Forbidden)));
        assert!(authorize(&admin, Role::Admin).is_ok());
        assert!(authorize(&user, Role::User).is_ok());
    }

    /// Store whose backend is gone.
    struct DownStore;

    fn outage() -> StoreError {
        StoreError::Backend(sqlx::Error::PoolTimedOut)
    }

    #[async_trait]
    impl UserStore for DownStore {
        async fn find_by_email(&self, _: &str) -> Result<Option<User>, StoreError> {
            Err(outage())
        }
        async fn find_by_id(&self, _: Uuid) -> Result<Option<User>, StoreError> {
            Err(outage())
        }
        async fn list(&self) -> Result<Vec<User>, StoreError> {
            Err(outage())
        }
        async fn verify_or_create(
            &self,
            _: &str,
            _: &str,
        ) -> Result<(User, VerifyOutcome), StoreError> {
            Err(outage())
        }
        async fn find_or_create_federated(&self, _: &str) -> Result<User, StoreError> {
            Err(outage())
        }
        async fn set_password_hash(&self, _: &str, _: &str) -> Result<Option<User>, StoreError> {
            Err(outage())
        }
        async fn update(&self, _: Uuid, _: UserUpdate) -> Result<Option<User>, StoreError> {
            Err(outage())
        }
    }

    #[tokio::test]
    async fn store_outage_is_an_internal_error_not_a_bad_token() {
        let fake = AppState::fake();
        let token = fake.state.tokens.issue_session("a@x.com").unwrap();

        let err = authenticate(&fake.state.tokens, &DownStore, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err
            .into_response()
            .headers()
            .get(WWW_AUTHENTICATE)
            .is_none());
    }

    #[test]
    fn bearer_scheme_is_required() {
        let parts = |value: &str| {
            let (parts, _) = axum::http::Request::builder()
                .header(AUTHORIZATION, value)
                .body(())
                .unwrap()
                .into_parts();
            parts
        };

        assert_eq!(bearer_token(&parts("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&parts("bearer abc")).unwrap(), "abc");
        assert!(bearer_token(&parts("Basic abc")).is_err());
        assert!(bearer_token(&parts("Bearer ")).is_err());
    }
}
