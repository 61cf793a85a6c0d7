//! Out-of-band dispatch channel for access codes.
//!
//! The setup state machine only depends on the [`AccessCodeMailer`] trait;
//! deployments wire in the SMTP implementation, while development and tests
//! use the no-op mailer.

mod smtp;
mod templates;

use async_trait::async_trait;
use thiserror::Error;

pub use smtp::{SmtpAccessCodeMailer, SmtpMailerConfig};
pub use templates::AccessCodeEmailContent;

#[derive(Debug, Error)]
/// Enumerates supported `MailerError` values.
pub enum MailerError {
    #[error("failed to send access code email: {0}")]
    SendFailed(String),
    #[error("invalid mailer configuration: {0}")]
    InvalidConfig(String),
}

/// Trait contract for access-code dispatch behavior.
#[async_trait]
pub trait AccessCodeMailer: Send + Sync {
    async fn send_access_code(&self, to: &str, code: &str) -> Result<(), MailerError>;
}

#[derive(Clone, Default)]
/// Mailer that records the dispatch in the log instead of sending.
pub struct NoopAccessCodeMailer;

#[async_trait]
impl AccessCodeMailer for NoopAccessCodeMailer {
    async fn send_access_code(&self, to: &str, code: &str) -> Result<(), MailerError> {
        tracing::info!(to, code, "access code dispatch skipped (noop mailer)");
        Ok(())
    }
}
