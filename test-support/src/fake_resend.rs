use crate::bind_local;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::{
    borrow::Cow,
    sync::{Arc, Mutex},
};

/// Stands in for the Resend email API, recording every accepted payload.
#[derive(Clone)]
pub struct FakeResend {
    api_key: Cow<'static, str>,
    rejection: Option<(StatusCode, &'static str, &'static str)>,
    return_unstructured_error: bool,
    received: Arc<Mutex<Vec<Value>>>,
}

impl FakeResend {
    pub fn new(api_key: impl Into<Cow<'static, str>>) -> Self {
        Self {
            api_key: api_key.into(),
            rejection: None,
            return_unstructured_error: false,
            received: Default::default(),
        }
    }

    /// Answers every authorised request with the given status and error body.
    pub fn reject_with(self, status: u16, name: &'static str, message: &'static str) -> Self {
        Self {
            rejection: Some((StatusCode::from_u16(status).unwrap(), name, message)),
            ..self
        }
    }

    pub fn return_unstructured_error(self) -> Self {
        Self {
            return_unstructured_error: true,
            ..self
        }
    }

    /// Starts serving in the background and returns the base URL of the API.
    pub async fn serve(&self) -> String {
        let (listener, base_url) = bind_local().await;
        let app = Router::new()
            .route("/emails", post(send_email))
            .with_state(self.clone());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        base_url
    }

    pub fn received_emails(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }
}

fn error_response(status: StatusCode, name: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "statusCode": status.as_u16(), "name": name, "message": message })),
    )
        .into_response()
}

async fn send_email(
    State(state): State<FakeResend>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let expected_authorization = format!("Bearer {}", state.api_key);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some(expected_authorization.as_str());
    if !authorized {
        return error_response(StatusCode::FORBIDDEN, "validation_error", "API key is invalid");
    }
    if state.return_unstructured_error {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    }
    if let Some((status, name, message)) = state.rejection {
        return error_response(status, name, message);
    }
    state.received.lock().unwrap().push(payload);
    Json(json!({ "id": "49a3999c-0ce1-4ea6-ab68-afcd6dc2e794" })).into_response()
}
