use std::str::FromStr;

use anyhow::Context;
use jsonwebtoken::Algorithm;

/// Minimum length of the session cookie secret, in bytes.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

/// Upper bound for token lifetimes: one week.
pub const MAX_TOKEN_TTL_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub algorithm: Algorithm,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub reset_ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secret: String,
    pub secure_cookies: bool,
}

#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub from: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub public_base_url: String,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub oidc: Option<OidcConfig>,
    pub mail: Option<MailConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| var(key).with_context(|| format!("{key} must be set"));

        let database_url = required("DATABASE_URL")?;
        let public_base_url =
            var("PUBLIC_BASE_URL").unwrap_or_else(|| "http://localhost:8080".into());
        url::Url::parse(&public_base_url).context("PUBLIC_BASE_URL is not a valid URL")?;

        let algorithm = match var("JWT_ALGORITHM") {
            Some(raw) => Algorithm::from_str(&raw)
                .map_err(|_| anyhow::anyhow!("unknown JWT_ALGORITHM {raw}"))?,
            None => Algorithm::HS256,
        };
        if !matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            anyhow::bail!("JWT_ALGORITHM must be one of HS256, HS384, HS512");
        }

        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            algorithm,
            issuer: var("JWT_ISSUER").unwrap_or_else(|| "authgate".into()),
            audience: var("JWT_AUDIENCE").unwrap_or_else(|| "authgate-users".into()),
            ttl_minutes: ttl_minutes(&var, "JWT_TTL_MINUTES", 30)?,
            reset_ttl_minutes: ttl_minutes(&var, "JWT_RESET_TTL_MINUTES", 15)?,
        };

        let session = SessionConfig {
            secret: required("SESSION_SECRET_KEY")?,
            secure_cookies: parse_or(&var, "SESSION_SECURE_COOKIES", false)?,
        };
        if session.secret.len() < MIN_SESSION_SECRET_LEN {
            anyhow::bail!("SESSION_SECRET_KEY must be at least {MIN_SESSION_SECRET_LEN} bytes");
        }

        let oidc = match var("GOOGLE_CLIENT_ID") {
            Some(client_id) => Some(OidcConfig {
                issuer_url: var("OIDC_ISSUER_URL")
                    .unwrap_or_else(|| "https://accounts.google.com".into()),
                client_id,
                client_secret: required("GOOGLE_CLIENT_SECRET")?,
                redirect_uri: required("GOOGLE_REDIRECT_URI")?,
                scopes: vec!["openid".into(), "email".into(), "profile".into()],
            }),
            None => None,
        };

        let mail = match var("MAIL_SERVER") {
            Some(server) => Some(MailConfig {
                server,
                port: parse_or(&var, "MAIL_PORT", 587)?,
                from: required("MAIL_FROM")?,
                password: required("MAIL_PASSWORD")?,
            }),
            None => None,
        };

        Ok(Self {
            database_url,
            public_base_url,
            jwt,
            session,
            oidc,
            mail,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value")),
        None => Ok(default),
    }
}

fn ttl_minutes<F>(var: &F, key: &str, default: i64) -> anyhow::Result<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let minutes = parse_or(var, key, default)?;
    if !(1..=MAX_TOKEN_TTL_MINUTES).contains(&minutes) {
        anyhow::bail!("{key} must be between 1 and {MAX_TOKEN_TTL_MINUTES} minutes");
    }
    Ok(minutes)
}
