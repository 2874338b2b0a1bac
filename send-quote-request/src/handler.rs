use crate::{
    captcha::{CaptchaError, CaptchaVerifier},
    config::{ConfigurationError, HandlerOptions},
    delivery::{DeliveryError, EmailDelivery, OutgoingEmail},
    notification::render_notification,
    quote::{validate, FieldErrors, QuoteRequest},
};
use chrono::Utc;
use http::{header::CONTENT_TYPE, HeaderValue, Method, Response, StatusCode};
use lettre::message::Mailbox;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

/// Sender and recipient of every notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub from: Mailbox,
    pub to: Mailbox,
}

/// The collaborators a configured handler talks to.
pub struct Services<DeliveryT, VerifierT> {
    pub envelope: Envelope,
    pub delivery: DeliveryT,
    pub captcha_verifier: Option<VerifierT>,
}

/// Turns quote request submissions into notification emails.
///
/// A handler whose services could not be configured still answers CORS preflights and rejects
/// every submission with a generic server error.
pub struct QuoteRequestHandler<DeliveryT, VerifierT> {
    options: HandlerOptions,
    services: Result<Services<DeliveryT, VerifierT>, ConfigurationError>,
}

impl<DeliveryT: EmailDelivery, VerifierT: CaptchaVerifier> QuoteRequestHandler<DeliveryT, VerifierT> {
    pub fn new(
        options: HandlerOptions,
        services: Result<Services<DeliveryT, VerifierT>, ConfigurationError>,
    ) -> Self {
        Self { options, services }
    }

    pub async fn respond(
        &self,
        method: &Method,
        origin: Option<&HeaderValue>,
        body: &[u8],
    ) -> Response<String> {
        let mut response = self.dispatch(method, body).await;
        self.options.cors.apply(origin, response.headers_mut());
        response
    }

    async fn dispatch(&self, method: &Method, body: &[u8]) -> Response<String> {
        if method == Method::OPTIONS {
            let mut response = Response::new(String::new());
            *response.status_mut() = StatusCode::NO_CONTENT;
            return response;
        }
        if method != Method::POST {
            return json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                json!({ "message": "Method Not Allowed" }),
            );
        }
        match self.process_submission(body).await {
            Ok(()) => json_response(StatusCode::OK, json!({ "ok": true })),
            Err(error) => {
                error.log();
                error.into_response(self.options.expose_error_details)
            }
        }
    }

    async fn process_submission(&self, body: &[u8]) -> Result<(), QuoteError> {
        let services = self
            .services
            .as_ref()
            .map_err(|error| QuoteError::Misconfigured(error.to_string()))?;
        let quote = validate(&parse_body(body), self.options.phone_policy)?;
        Self::verify_captcha(services, &quote).await?;
        let email = Self::construct_email(services, &quote)?;
        services.delivery.deliver(&email).await?;
        info!(
            "Sent quote request for {} from {}",
            quote.service, quote.company
        );
        Ok(())
    }

    async fn verify_captcha(
        services: &Services<DeliveryT, VerifierT>,
        quote: &QuoteRequest,
    ) -> Result<(), QuoteError> {
        let (Some(verifier), Some(token)) = (
            services.captcha_verifier.as_ref(),
            quote.captcha_token.as_deref(),
        ) else {
            return Ok(());
        };
        match verifier.verify_token(token).await {
            Ok(()) => Ok(()),
            Err(CaptchaError::Unavailable(reason)) => {
                warn!("Could not verify CAPTCHA token: {reason}");
                warn!("Letting request pass without verification.");
                Ok(())
            }
            Err(CaptchaError::IncorrectSecret) => Err(QuoteError::Misconfigured(
                CaptchaError::IncorrectSecret.to_string(),
            )),
            Err(error) => Err(QuoteError::CaptchaRejected(error)),
        }
    }

    fn construct_email(
        services: &Services<DeliveryT, VerifierT>,
        quote: &QuoteRequest,
    ) -> Result<OutgoingEmail, QuoteError> {
        let notification = render_notification(quote, Utc::now())
            .map_err(|error| QuoteError::Render(error.to_string()))?;
        Ok(OutgoingEmail {
            from: services.envelope.from.clone(),
            to: services.envelope.to.clone(),
            reply_to: Mailbox::new(Some(quote.name.clone()), quote.email.clone()),
            subject: notification.subject,
            html: notification.html,
        })
    }
}

/// Reads the request body as a JSON object. Anything else reads as an empty submission, which
/// then fails validation.
fn parse_body(body: &[u8]) -> Map<String, Value> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => {
            debug!("Request body is not a JSON object");
            Map::new()
        }
        Err(error) => {
            debug!("Request body is not valid JSON: {error}");
            Map::new()
        }
    }
}

fn json_response(status: StatusCode, body: Value) -> Response<String> {
    let mut response = Response::new(body.to_string());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[derive(Debug, thiserror::Error)]
enum QuoteError {
    #[error(transparent)]
    Invalid(#[from] FieldErrors),
    #[error("Server misconfigured: {0}")]
    Misconfigured(String),
    #[error("CAPTCHA verification failed: {0}")]
    CaptchaRejected(CaptchaError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error("Could not render notification: {0}")]
    Render(String),
}

impl QuoteError {
    fn log(&self) {
        match self {
            QuoteError::Invalid(_) => info!("Rejected quote request: {self}"),
            QuoteError::CaptchaRejected(_) => warn!("Rejected quote request: {self}"),
            QuoteError::Misconfigured(_) | QuoteError::Delivery(_) | QuoteError::Render(_) => {
                error!("Internal error sending quote request email: {self}")
            }
        }
    }

    fn into_response(self, expose_details: bool) -> Response<String> {
        match self {
            QuoteError::Invalid(errors) => {
                json_response(StatusCode::UNPROCESSABLE_ENTITY, json!({ "errors": errors }))
            }
            QuoteError::Misconfigured(_) => json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "message": "Server misconfigured" }),
            ),
            QuoteError::CaptchaRejected(_) => json_response(
                StatusCode::FORBIDDEN,
                json!({ "message": "Failed CAPTCHA verification" }),
            ),
            QuoteError::Delivery(error @ DeliveryError::Provider { .. }) => json_response(
                StatusCode::BAD_GATEWAY,
                with_details(
                    "Email provider error",
                    expose_details.then(|| error.details()),
                ),
            ),
            QuoteError::Delivery(error @ DeliveryError::Transport(_)) => json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                with_details(
                    "Could not send quote request email",
                    expose_details.then(|| error.details()),
                ),
            ),
            QuoteError::Render(description) => json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                with_details(
                    "Could not send quote request email",
                    expose_details.then_some(description),
                ),
            ),
        }
    }
}

fn with_details(message: &str, details: Option<String>) -> Value {
    match details {
        Some(details) => json!({ "message": message, "details": details }),
        None => json!({ "message": message }),
    }
}
