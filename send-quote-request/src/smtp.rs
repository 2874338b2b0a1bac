use crate::delivery::{DeliveryError, EmailDelivery, OutgoingEmail, DELIVERY_TIMEOUT};
use async_trait::async_trait;
use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::warn;

pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
}

/// Sends email through an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(
        smtp_url: &str,
        credentials: Option<SmtpCredentials>,
    ) -> Result<Self, lettre::transport::smtp::Error> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::from_url(smtp_url)?
            .authentication(vec![Mechanism::Plain])
            .timeout(Some(DELIVERY_TIMEOUT));

        // Sending credentials over a non-TLS connection is risky, so we only set the credentials
        // when the connection URL is over TLS. If the relay requires authentication, it will
        // reject the unauthenticated connection instead.
        match credentials {
            Some(credentials) if smtp_url.starts_with("smtps://") => {
                builder =
                    builder.credentials(Credentials::new(credentials.username, credentials.password));
            }
            Some(_) => warn!("Not sending SMTP credentials over a connection without TLS"),
            None => {}
        }

        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl EmailDelivery for SmtpMailer {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        let message = Message::builder()
            .from(email.from.clone())
            .reply_to(email.reply_to.clone())
            .to(email.to.clone())
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())
            .map_err(|error| DeliveryError::Transport(format!("Error building message: {error}")))?;
        match self.transport.send(message).await {
            Ok(_) => Ok(()),
            Err(error) if error.is_permanent() || error.is_transient() => {
                Err(DeliveryError::Provider {
                    name: error
                        .status()
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| "smtp".into()),
                    message: error.to_string(),
                })
            }
            Err(error) => Err(DeliveryError::Transport(format!(
                "Error sending message: {error}"
            ))),
        }
    }
}
