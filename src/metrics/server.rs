use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};
use serde_json::{json, Value};

use crate::utils::CircuitBreaker;

/// Serve `/metrics` and `/health`. Runs on its own actix system; the caller
/// puts it on a dedicated thread. With a gateway breaker, `/health` reports
/// its state so an open circuit is visible without digging through logs.
pub async fn start_metrics_server(
    registry: Registry,
    port: u16,
    gateway_breaker: Option<CircuitBreaker>,
) -> std::io::Result<()> {
    tracing::info!("📊 Starting metrics server on http://0.0.0.0:{}/metrics", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(gateway_breaker.clone()))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(registry: web::Data<Registry>) -> impl Responder {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(gateway_breaker: web::Data<Option<CircuitBreaker>>) -> impl Responder {
    HttpResponse::Ok().json(health_body(gateway_breaker.get_ref().as_ref()).await)
}

async fn health_body(gateway_breaker: Option<&CircuitBreaker>) -> Value {
    let gateway = match gateway_breaker {
        Some(breaker) => breaker.state().await.as_str(),
        None => "disabled",
    };

    json!({
        "status": "healthy",
        "service": "order-tracker",
        "payment_gateway": gateway,
    })
}
