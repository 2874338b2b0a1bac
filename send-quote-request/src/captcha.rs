use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

/// Submissions scoring below this are treated as automated.
pub const MINIMUM_SCORE: f64 = 0.4;

pub const VERIFICATION_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<(), CaptchaError>;
}

/// Verifies tokens against a reCAPTCHA-compatible `siteverify` endpoint.
pub struct RecaptchaVerifier {
    client: Client,
    secret: String,
    verify_url: String,
}

impl RecaptchaVerifier {
    pub fn new(
        secret: impl Into<String>,
        verify_url: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(VERIFICATION_TIMEOUT).build()?,
            secret: secret.into(),
            verify_url: verify_url.into(),
        })
    }

    async fn send_token(&self, token: &str) -> Result<Response, CaptchaError> {
        let payload = SiteVerifyPayload {
            secret: &self.secret,
            response: token,
        };
        let response = self
            .client
            .post(&self.verify_url)
            .form(&payload)
            .send()
            .await
            .map_err(|error| {
                CaptchaError::Unavailable(format!("Error contacting verification service: {error}"))
            })?;
        if !response.status().is_success() {
            return Err(CaptchaError::Unavailable(format!(
                "Verification service returned {}",
                response.status()
            )));
        }
        Ok(response)
    }

    async fn process_response(response: Response) -> Result<(), CaptchaError> {
        let body: SiteVerifyResponse = response.json().await.map_err(|error| {
            CaptchaError::Unavailable(format!("Error reading verification response: {error}"))
        })?;
        body.verdict()
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify_token(&self, token: &str) -> Result<(), CaptchaError> {
        let response = self.send_token(token).await?;
        Self::process_response(response).await
    }
}

#[derive(Serialize)]
struct SiteVerifyPayload<'a> {
    secret: &'a str,
    response: &'a str,
}

#[derive(Deserialize, Debug)]
struct SiteVerifyResponse {
    success: bool,
    score: Option<f64>,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

impl SiteVerifyResponse {
    fn verdict(self) -> Result<(), CaptchaError> {
        if !self.success {
            return if self
                .error_codes
                .iter()
                .any(|code| code == "invalid-input-secret" || code == "missing-input-secret")
            {
                Err(CaptchaError::IncorrectSecret)
            } else {
                Err(CaptchaError::Rejected(self.error_codes))
            };
        }
        // Checkbox-style challenges report no score; success alone is the verdict there.
        match self.score {
            Some(score) if score < MINIMUM_SCORE => Err(CaptchaError::LowScore(score)),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CaptchaError {
    #[error("Score {0} is below the minimum score")]
    LowScore(f64),
    #[error("Token rejected: {0:?}")]
    Rejected(Vec<String>),
    #[error("Verification service does not accept the configured secret")]
    IncorrectSecret,
    #[error("{0}")]
    Unavailable(String),
}
