//! SMTP transport over `lettre`.

use std::fmt;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::Error as SmtpError;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::EmailConfig;
use crate::error::{Error, Result};

use super::email::{EmailTransport, OutgoingEmail};

/// Sends mail through an authenticated SMTP relay with implicit TLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    host: String,
}

impl fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("host", &self.host)
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpMailer {
    /// Build a mailer from the `email` configuration section.
    ///
    /// # Errors
    ///
    /// Returns an error if the sender address is invalid or the relay cannot
    /// be set up.
    pub fn from_config(config: &EmailConfig) -> Result<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| Error::email_rejected(format!("invalid sender address: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(classify)?
            .port(config.smtp_port);
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            host: config.smtp_host.clone(),
        })
    }

    fn compose(&self, email: &OutgoingEmail, attachment: Vec<u8>) -> Result<Message> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| Error::email_rejected(format!("invalid recipient address: {e}")))?;
        let pdf = ContentType::parse("application/pdf")
            .map_err(|e| Error::email_rejected(e.to_string()))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(email.body.clone()))
                    .singlepart(
                        Attachment::new(email.attachment_name.clone()).body(attachment, pdf),
                    ),
            )
            .map_err(|e| Error::email_rejected(e.to_string()))
    }
}

/// Permanent SMTP replies are not retried; everything else may clear up.
fn classify(err: SmtpError) -> Error {
    if err.is_permanent() {
        Error::email_rejected(err.to_string())
    } else {
        Error::email(err.to_string())
    }
}

#[async_trait]
impl EmailTransport for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let attachment = tokio::fs::read(&email.attachment).await?;
        let message = self.compose(email, attachment)?;
        self.transport.send(message).await.map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn outgoing() -> OutgoingEmail {
        OutgoingEmail {
            to: "checklist@paranalog.com.br".to_string(),
            subject: "CRT No. S/N | Motorista: Ana".to_string(),
            body: "Checklist de inspeção veicular:".to_string(),
            attachment: PathBuf::from("/tmp/r.pdf"),
            attachment_name: "SemCRT_ANA_A_B_20240101.pdf".to_string(),
        }
    }

    #[tokio::test]
    async fn test_compose_includes_attachment() {
        let mailer = SmtpMailer::from_config(&EmailConfig::default()).unwrap();
        let message = mailer.compose(&outgoing(), b"%PDF-1.4".to_vec()).unwrap();
        let raw = String::from_utf8_lossy(&message.formatted()).to_string();

        assert!(raw.contains("application/pdf"));
        assert!(raw.contains("SemCRT_ANA_A_B_20240101.pdf"));
        assert!(raw.contains("To: checklist@paranalog.com.br"));
    }

    #[tokio::test]
    async fn test_invalid_recipient() {
        let mailer = SmtpMailer::from_config(&EmailConfig::default()).unwrap();
        let mut email = outgoing();
        email.to = "not an address".to_string();
        let err = mailer.compose(&email, Vec::new()).unwrap_err();
        assert!(err.to_string().contains("invalid recipient"));
        assert!(matches!(err, Error::EmailRejected(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_invalid_sender() {
        let config = EmailConfig {
            from: "nobody".to_string(),
            ..EmailConfig::default()
        };
        let err = SmtpMailer::from_config(&config).unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_missing_attachment_is_io_error() {
        let mailer = SmtpMailer::from_config(&EmailConfig::default()).unwrap();
        let mut email = outgoing();
        email.attachment = PathBuf::from("/nonexistent/r.pdf");
        assert!(matches!(mailer.send(&email).await, Err(Error::Io(_))));
    }
}
