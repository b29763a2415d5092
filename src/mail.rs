//! Outbound email. `Mailer` is fire-and-forget from the caller's point of view:
//! `Ok` means the relay accepted the message, nothing more.

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use crate::config::MailConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()>;
}

/// STARTTLS relay with login credentials.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &MailConfig) -> anyhow::Result<Self> {
        let from: Mailbox = cfg.from.parse().context("MAIL_FROM is not a mailbox")?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.server)
            .context("build smtp transport")?
            .port(cfg.port)
            .credentials(Credentials::new(cfg.from.clone(), cfg.password.clone()))
            .build();
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse().context("recipient is not a mailbox")?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .context("build email")?;
        self.transport.send(message).await.context("smtp send")?;
        debug!(to, subject, "email sent");
        Ok(())
    }
}

/// Local dev mailer that logs instead of sending. The body holds live tokens and is not logged.
#[derive(Clone, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> anyhow::Result<()> {
        info!(to, subject, "mail delivery disabled; message dropped");
        Ok(())
    }
}
