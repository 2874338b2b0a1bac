use crate::bind_local;
use axum::{
    extract::{Form, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

const VERIFY_PATH: &str = "/recaptcha/api/siteverify";
const DEFAULT_SCORE: f64 = 0.9;

/// Stands in for the reCAPTCHA `siteverify` endpoint.
#[derive(Clone)]
pub struct FakeRecaptcha {
    required_secret: Cow<'static, str>,
    required_token: Option<String>,
    score: Option<f64>,
    return_invalid_response: bool,
}

#[derive(Deserialize)]
struct VerifyRequestPayload {
    secret: String,
    response: String,
}

#[derive(Serialize)]
struct VerifyResponsePayload {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    #[serde(rename = "error-codes")]
    error_codes: Vec<&'static str>,
}

impl FakeRecaptcha {
    pub fn new(required_secret: impl Into<Cow<'static, str>>) -> Self {
        Self {
            required_secret: required_secret.into(),
            required_token: None,
            score: Some(DEFAULT_SCORE),
            return_invalid_response: false,
        }
    }

    pub fn require_token(self, required_token: impl AsRef<str>) -> Self {
        Self {
            required_token: Some(required_token.as_ref().into()),
            ..self
        }
    }

    pub fn with_score(self, score: f64) -> Self {
        Self {
            score: Some(score),
            ..self
        }
    }

    /// Answers successful verifications without a score, as checkbox challenges do.
    pub fn without_score(self) -> Self {
        Self {
            score: None,
            ..self
        }
    }

    pub fn return_invalid_response(self) -> Self {
        Self {
            return_invalid_response: true,
            ..self
        }
    }

    /// Starts serving in the background and returns the verification URL.
    pub async fn serve(self) -> String {
        let (listener, base_url) = bind_local().await;
        let app = Router::new()
            .route(VERIFY_PATH, post(verify))
            .with_state(self);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("{base_url}{VERIFY_PATH}")
    }
}

fn failure(error_code: &'static str) -> VerifyResponsePayload {
    VerifyResponsePayload {
        success: false,
        score: None,
        error_codes: vec![error_code],
    }
}

async fn verify(
    State(state): State<FakeRecaptcha>,
    Form(payload): Form<VerifyRequestPayload>,
) -> Response {
    if state.return_invalid_response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "Invalid response",
        )
            .into_response()
    } else if payload.secret != state.required_secret {
        Json(failure("invalid-input-secret")).into_response()
    } else if payload.response.is_empty() {
        Json(failure("missing-input-response")).into_response()
    } else if state.required_token.is_some() && Some(payload.response) != state.required_token {
        Json(failure("invalid-input-response")).into_response()
    } else {
        Json(VerifyResponsePayload {
            success: true,
            score: state.score,
            error_codes: vec![],
        })
        .into_response()
    }
}
