use crate::{resend::ResendClient, smtp::SmtpMailer};
use async_trait::async_trait;
use lettre::message::Mailbox;
use std::time::Duration;

/// Upper bound on a single delivery attempt.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// A fully addressed email, ready for a delivery collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: Mailbox,
    pub to: Mailbox,
    pub reply_to: Mailbox,
    pub subject: String,
    pub html: String,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The collaborator answered and reported a failure of its own.
    #[error("Provider rejected message ({name}): {message}")]
    Provider { name: String, message: String },
    /// The collaborator could not be reached or its answer could not be understood.
    #[error("Could not deliver message: {0}")]
    Transport(String),
}

impl DeliveryError {
    /// Text which may be shown to a client when error details are exposed.
    pub fn details(&self) -> String {
        match self {
            DeliveryError::Provider { message, .. } => message.clone(),
            DeliveryError::Transport(description) => description.clone(),
        }
    }
}

#[async_trait]
pub trait EmailDelivery: Send + Sync {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), DeliveryError>;
}

/// The delivery collaborator selected by configuration.
pub enum Mailer {
    Resend(ResendClient),
    Smtp(SmtpMailer),
}

#[async_trait]
impl EmailDelivery for Mailer {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        match self {
            Mailer::Resend(client) => client.deliver(email).await,
            Mailer::Smtp(mailer) => mailer.deliver(email).await,
        }
    }
}
