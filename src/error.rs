use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::auth::repo::StoreError;

/// Terminal outcomes of the authentication flows, mapped to HTTP by `IntoResponse`.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Email already registered")]
    DuplicateEmail,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("User is inactive")]
    InactiveAccount,
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("User not found")]
    UserNotFound,
    #[error("Could not validate credentials")]
    Unauthorized,
    #[error("Not enough permissions")]
    Forbidden,
    #[error("Federated authentication failed")]
    FederatedAuthFailed,
    #[error("{0}")]
    BadRequest(String),
    #[error("Notification could not be delivered")]
    NotificationFailed,
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::DuplicateEmail => StatusCode::CONFLICT,
            Self::InvalidCredentials | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InactiveAccount | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::InvalidOrExpiredToken | Self::FederatedAuthFailed | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::NotificationFailed => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => Self::DuplicateEmail,
            other => Self::Internal(other.into()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            Self::Internal(e) => {
                error!(error = ?e, "internal error");
                "Internal server error".to_string()
            }
            Self::ServiceUnavailable(reason) => {
                error!(%reason, "upstream unavailable");
                "Service unavailable".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({ "detail": detail }));
        if matches!(self, Self::Unauthorized) {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(AuthError::DuplicateEmail.status(), StatusCode::CONFLICT);
        assert_eq!(AuthError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InactiveAccount.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::InvalidOrExpiredToken.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::UserNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(AuthError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::FederatedAuthFailed.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unauthorized_carries_bearer_challenge() {
        let res = AuthError::Unauthorized.into_response();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(res.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
    }

    #[test]
    fn internal_errors_hide_their_cause() {
        let err = AuthError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let res = err.into_response();
        assert!(res.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn store_duplicate_maps_to_duplicate_email() {
        let err: AuthError = StoreError::DuplicateEmail.into();
        assert!(matches!(err, AuthError::DuplicateEmail));
    }
}
