use actix_web::{web, HttpResponse};
use chrono::Utc;

use crate::metrics::REGISTRY;
use crate::scheduler::CycleScheduler;

/// GET /health - Health check endpoint
pub async fn health(scheduler: web::Data<CycleScheduler>) -> HttpResponse {
    match scheduler.store().count() {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "trend-oracle",
            "version": env!("CARGO_PKG_VERSION"),
        })),
        Err(e) => {
            tracing::warn!(error = %e, "Health check: store unreadable");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "degraded",
                "service": "trend-oracle",
                "version": env!("CARGO_PKG_VERSION"),
            }))
        }
    }
}

/// GET /status - Last cycle report and store counts
pub async fn status(scheduler: web::Data<CycleScheduler>) -> HttpResponse {
    let deployed = scheduler.store().count();
    let claims = scheduler.ledger().summary(Utc::now());
    let replicas = scheduler
        .controller()
        .map(|c| c.registry().count())
        .transpose();

    match (deployed, claims, replicas) {
        (Ok(deployed), Ok(claims), Ok(replicas)) => HttpResponse::Ok().json(serde_json::json!({
            "dry_run": scheduler.is_dry_run(),
            "deployed_topics": deployed,
            "claims": claims,
            "replicas": replicas,
            "skipped_ticks": scheduler.skipped_ticks(),
            "last_cycle": scheduler.last_report(),
        })),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            tracing::error!(error = %e, "Status query failed");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "storage_unavailable",
                "message": e.to_string(),
            }))
        }
    }
}

/// GET /metrics - Prometheus metrics endpoint
pub async fn metrics() -> HttpResponse {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().body("Failed to encode metrics");
    }

    let output = String::from_utf8(buffer).unwrap_or_default();
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(output)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/status", web::get().to(status))
        .route("/metrics", web::get().to(metrics));
}
