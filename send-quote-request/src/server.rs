use crate::{captcha::CaptchaVerifier, delivery::EmailDelivery, handler::QuoteRequestHandler};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header::ORIGIN, HeaderMap, Method, Response},
    routing::any,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Routes quote submissions on `/` and `/quote` to `handler`.
pub fn router<DeliveryT, VerifierT>(handler: Arc<QuoteRequestHandler<DeliveryT, VerifierT>>) -> Router
where
    DeliveryT: EmailDelivery + 'static,
    VerifierT: CaptchaVerifier + 'static,
{
    Router::new()
        .route("/", any(submit::<DeliveryT, VerifierT>))
        .route("/quote", any(submit::<DeliveryT, VerifierT>))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

async fn submit<DeliveryT, VerifierT>(
    State(handler): State<Arc<QuoteRequestHandler<DeliveryT, VerifierT>>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body>
where
    DeliveryT: EmailDelivery + 'static,
    VerifierT: CaptchaVerifier + 'static,
{
    handler
        .respond(&method, headers.get(ORIGIN), &body)
        .await
        .map(Body::from)
}
