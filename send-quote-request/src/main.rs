use lambda_http::{http::header::ORIGIN, run, service_fn, Body, Error, Request, Response};
use send_quote_request::{
    captcha::CaptchaVerifier,
    config::{services_from_env, HandlerOptions},
    delivery::EmailDelivery,
    handler::QuoteRequestHandler,
};
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let options = HandlerOptions::from_env()?;
    let services = services_from_env();
    if let Err(error) = &services {
        error!("Quote requests will be rejected until configuration is fixed: {error}");
    }
    let handler = QuoteRequestHandler::new(options, services);
    run(service_fn(|event| handle_event(&handler, event))).await
}

async fn handle_event<DeliveryT: EmailDelivery, VerifierT: CaptchaVerifier>(
    handler: &QuoteRequestHandler<DeliveryT, VerifierT>,
    event: Request,
) -> Result<Response<Body>, Error> {
    let response = handler
        .respond(
            event.method(),
            event.headers().get(ORIGIN),
            event.body().as_ref(),
        )
        .await;
    Ok(response.map(Body::from))
}
