use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::{
    auth::claims::{Claims, TokenPurpose, CLAIMS_VERSION},
    config::JwtConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token is malformed")]
    Malformed,
}

/// Signs and verifies tokens with the process-wide secret and algorithm.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    header: Header,
    validation: Validation,
    issuer: String,
    audience: String,
    session_ttl: Duration,
    reset_ttl: Duration,
}

impl TokenCodec {
    pub fn new(cfg: &JwtConfig) -> Self {
        let mut validation = Validation::new(cfg.algorithm);
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&cfg.audience));
        validation.set_issuer(std::slice::from_ref(&cfg.issuer));
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            header: Header::new(cfg.algorithm),
            validation,
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            session_ttl: Duration::minutes(cfg.ttl_minutes),
            reset_ttl: Duration::minutes(cfg.reset_ttl_minutes),
        }
    }

    pub fn reset_ttl(&self) -> Duration {
        self.reset_ttl
    }

    /// Signs `purpose` for `subject`, expiring `ttl` from now.
    pub fn issue(&self, subject: &str, purpose: TokenPurpose, ttl: Duration) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            ver: CLAIMS_VERSION,
            sub: subject.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            purpose,
        };
        let token = encode(&self.header, &claims, &self.encoding)?;
        debug!(kind = claims.purpose.kind(), exp = claims.exp, "jwt signed");
        Ok(token)
    }

    pub fn issue_session(&self, email: &str) -> anyhow::Result<String> {
        self.issue(email, TokenPurpose::Session, self.session_ttl)
    }

    pub fn issue_verification(&self, email: &str, password_hash: &str) -> anyhow::Result<String> {
        let purpose = TokenPurpose::EmailVerification {
            password_hash: password_hash.to_string(),
        };
        self.issue(email, purpose, self.session_ttl)
    }

    pub fn issue_password_reset(&self, email: &str) -> anyhow::Result<String> {
        self.issue(email, TokenPurpose::PasswordReset, self.reset_ttl)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::InvalidSignature
                }
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            }
        })?;
        let claims = data.claims;

        if claims.ver != CLAIMS_VERSION || claims.sub.is_empty() {
            return Err(TokenError::Malformed);
        }
        if OffsetDateTime::now_utc().unix_timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        debug!(kind = claims.purpose.kind(), "jwt verified");
        Ok(claims)
    }
}

impl TokenPurpose {
    pub fn kind(&self) -> &'static str {
        match self {
            TokenPurpose::Session => "session",
            TokenPurpose::EmailVerification { .. } => "email_verification",
            TokenPurpose::PasswordReset => "password_reset",
        }
    }
}
