//! SMTP access-code mailer over lettre.

use async_trait::async_trait;
use lettre::message::{header::ContentType, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::templates::AccessCodeEmailContent;
use crate::{AccessCodeMailer, MailerError};

#[derive(Debug, Clone)]
/// SMTP connection and sender settings.
pub struct SmtpMailerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub from_address: String,
    pub from_name: Option<String>,
}

/// Dispatches access codes through an SMTP relay.
pub struct SmtpAccessCodeMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
    from_name: Option<String>,
}

impl SmtpAccessCodeMailer {
    pub fn new(config: SmtpMailerConfig) -> Result<Self, MailerError> {
        if config.host.trim().is_empty() {
            return Err(MailerError::InvalidConfig(
                "smtp host cannot be empty".to_string(),
            ));
        }
        let mut builder = if config.use_tls {
            let tls_params = TlsParameters::new(config.host.clone())
                .map_err(|error| MailerError::InvalidConfig(format!("tls setup failed: {error}")))?;
            // Port 465 speaks implicit TLS; everything else upgrades via STARTTLS.
            if config.port == 465 {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                    .map_err(|error| MailerError::InvalidConfig(format!("smtp relay: {error}")))?
                    .port(config.port)
                    .tls(Tls::Wrapper(tls_params))
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                    .map_err(|error| MailerError::InvalidConfig(format!("smtp relay: {error}")))?
                    .port(config.port)
                    .tls(Tls::Required(tls_params))
            }
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port)
        };

        if let (Some(username), Some(password)) = (config.username, config.password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from_address: config.from_address,
            from_name: config.from_name,
        })
    }

    fn from_header(&self) -> String {
        match self.from_name.as_deref() {
            Some(name) => format!("{} <{}>", name, self.from_address),
            None => self.from_address.clone(),
        }
    }
}

#[async_trait]
impl AccessCodeMailer for SmtpAccessCodeMailer {
    async fn send_access_code(&self, to: &str, code: &str) -> Result<(), MailerError> {
        let content = AccessCodeEmailContent::new(code);
        let message = Message::builder()
            .from(
                self.from_header()
                    .parse()
                    .map_err(|error| MailerError::InvalidConfig(format!("from address: {error}")))?,
            )
            .to(to
                .parse()
                .map_err(|error| MailerError::InvalidConfig(format!("to address: {error}")))?)
            .subject(content.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(content.text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(content.html),
                    ),
            )
            .map_err(|error| MailerError::SendFailed(format!("failed to build email: {error}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|error| MailerError::SendFailed(error.to_string()))?;
        tracing::debug!(to, "access code email dispatched");
        Ok(())
    }
}
