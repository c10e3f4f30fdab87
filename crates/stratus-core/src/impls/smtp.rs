//! SMTP mailer built on the `lettre` async transport.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;
use crate::domain::NotificationTask;
use crate::ports::{MailError, Mailer};

impl From<lettre::transport::smtp::Error> for MailError {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        MailError::Transport(e.to_string())
    }
}

impl From<lettre::address::AddressError> for MailError {
    fn from(e: lettre::address::AddressError) -> Self {
        MailError::Address(e.to_string())
    }
}

type Transport = AsyncSmtpTransport<Tokio1Executor>;

/// Port on which the relay expects TLS from the first byte (SMTPS).
const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Security {
    ImplicitTls,
    StartTls,
    Plain,
}

fn security_for(config: &SmtpConfig) -> Security {
    if config.port == IMPLICIT_TLS_PORT {
        Security::ImplicitTls
    } else if config.user.is_some() && config.password.is_some() {
        Security::StartTls
    } else {
        Security::Plain
    }
}

/// Sends each task as a single-part `text/html` message.
pub struct SmtpMailer {
    transport: Transport,
    from_address: String,
}

impl SmtpMailer {
    /// Port 465 gets implicit TLS. Otherwise, with credentials the relay is
    /// reached over STARTTLS; without them the connection is plain, which
    /// suits a local relay.
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let builder = match security_for(config) {
            Security::ImplicitTls => Transport::relay(&config.host)?,
            Security::StartTls => Transport::starttls_relay(&config.host)?,
            Security::Plain => Transport::builder_dangerous(&config.host),
        };
        let builder = builder.port(config.port);
        let transport = match (&config.user, &config.password) {
            (Some(user), Some(pass)) => builder
                .credentials(Credentials::new(user.clone(), pass.clone()))
                .build(),
            _ => builder.build(),
        };

        // Fail at startup rather than on the first delivery.
        config.from_address.parse::<lettre::Address>()?;

        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
        })
    }
}

fn build_message(from: &str, task: &NotificationTask) -> Result<Message, MailError> {
    Message::builder()
        .from(from.parse()?)
        .to(task.recipient.parse()?)
        .subject(task.subject.clone())
        .header(ContentType::TEXT_HTML)
        .body(task.body.clone())
        .map_err(|e| MailError::Build(e.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, task: &NotificationTask) -> Result<(), MailError> {
        let message = build_message(&self.from_address, task)?;
        self.transport.send(message).await?;
        tracing::info!(to = %task.recipient, subject = %task.subject, "email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn builds_html_message() {
        let task = NotificationTask::new("user@example.com", "Hello", "<b>hi</b>");
        let message = build_message("noreply@stratus.local", &task).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("To: user@example.com"));
        assert!(raw.contains("Subject: Hello"));
        assert!(raw.contains("Content-Type: text/html"));
    }

    #[test]
    fn bad_recipient_is_address_error() {
        let task = NotificationTask::new("not-an-email", "Hello", "body");
        let err = build_message("noreply@stratus.local", &task).unwrap_err();
        assert!(matches!(err, MailError::Address(_)));
    }

    fn config(port: u16, credentials: bool) -> SmtpConfig {
        SmtpConfig {
            host: "localhost".into(),
            port,
            user: credentials.then(|| "mailer".to_string()),
            password: credentials.then(|| "secret".to_string()),
            from_address: "noreply@stratus.local".into(),
        }
    }

    #[rstest]
    #[case(465, true, Security::ImplicitTls)]
    #[case(465, false, Security::ImplicitTls)]
    #[case(587, true, Security::StartTls)]
    #[case(1025, false, Security::Plain)]
    fn picks_transport_security(
        #[case] port: u16,
        #[case] credentials: bool,
        #[case] expected: Security,
    ) {
        assert_eq!(security_for(&config(port, credentials)), expected);
    }

    #[test]
    fn rejects_bad_sender_at_construction() {
        let config = SmtpConfig {
            from_address: "nope".into(),
            ..config(1025, false)
        };
        let result = SmtpMailer::new(&config);
        assert!(matches!(result, Err(MailError::Address(_))));
    }
}
