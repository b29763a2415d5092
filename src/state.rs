use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::{
    auth::{
        jwt::TokenCodec,
        oidc::{IdentityProvider, OidcClient},
        repo::{PgUserStore, UserStore},
    },
    config::AppConfig,
    mail::{LogMailer, Mailer, SmtpMailer},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub tokens: TokenCodec,
    pub mailer: Arc<dyn Mailer>,
    pub oidc: Option<Arc<dyn IdentityProvider>>,
    pub cookie_key: Key,
}

impl AppState {
    /// Connects to Postgres and the configured collaborators. Returns the pool
    /// too so the caller can run migrations.
    pub async fn init(config: AppConfig) -> anyhow::Result<(Self, PgPool)> {
        let config = Arc::new(config);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let mailer: Arc<dyn Mailer> = match &config.mail {
            Some(mail) => Arc::new(SmtpMailer::new(mail)?),
            None => {
                warn!("MAIL_SERVER not set; outgoing mail is only logged");
                Arc::new(LogMailer)
            }
        };

        let oidc: Option<Arc<dyn IdentityProvider>> = match &config.oidc {
            Some(oidc_config) => match OidcClient::discover(oidc_config.clone()).await {
                Ok(client) => {
                    info!(issuer = %oidc_config.issuer_url, "oidc provider discovered");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    warn!(error = %e, "oidc discovery failed; federated login disabled");
                    None
                }
            },
            None => None,
        };

        let state = Self::from_parts(
            config,
            Arc::new(PgUserStore::new(db.clone())),
            mailer,
            oidc,
        );
        Ok((state, db))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        oidc: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        let tokens = TokenCodec::new(&config.jwt);
        let cookie_key = Key::derive_from(config.session.secret.as_bytes());
        Self {
            config,
            users,
            tokens,
            mailer,
            oidc,
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
