use crate::delivery::{DeliveryError, EmailDelivery, OutgoingEmail, DELIVERY_TIMEOUT};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const RESEND_API_URL: &str = "https://api.resend.com";

/// Sends email through the Resend HTTP API.
pub struct ResendClient {
    client: Client,
    api_key: String,
    emails_url: String,
}

impl ResendClient {
    pub fn new(api_key: impl Into<String>, api_url: &str) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(DELIVERY_TIMEOUT).build()?,
            api_key: api_key.into(),
            emails_url: format!("{}/emails", api_url.trim_end_matches('/')),
        })
    }
}

#[derive(Serialize)]
struct SendEmailPayload<'a> {
    from: String,
    to: [String; 1],
    reply_to: String,
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct SendEmailResponse {
    id: Option<String>,
}

#[derive(Deserialize)]
struct ResendErrorResponse {
    name: Option<String>,
    message: String,
}

#[async_trait]
impl EmailDelivery for ResendClient {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        let payload = SendEmailPayload {
            from: email.from.to_string(),
            to: [email.to.to_string()],
            reply_to: email.reply_to.to_string(),
            subject: &email.subject,
            html: &email.html,
        };
        let response = self
            .client
            .post(&self.emails_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| DeliveryError::Transport(format!("Error contacting Resend: {error}")))?;

        let status = response.status();
        if status.is_success() {
            if let Ok(SendEmailResponse { id: Some(id) }) = response.json().await {
                debug!("Resend accepted message {id}");
            }
            return Ok(());
        }
        match response.json::<ResendErrorResponse>().await {
            Ok(error) => Err(DeliveryError::Provider {
                name: error.name.unwrap_or_else(|| status.to_string()),
                message: error.message,
            }),
            Err(_) => Err(DeliveryError::Transport(format!(
                "Resend returned {status} without an error description"
            ))),
        }
    }
}
