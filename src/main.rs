use axum::{Router, extract::State, http::StatusCode, middleware, routing::get};
use sentinel_rate_limiter::RateLimiterService;
use sentinel_rate_limiter::config::{LoggingConfig, Settings};
use sentinel_rate_limiter::metrics::PrometheusMetrics;
use sentinel_rate_limiter::middleware::{RateLimitState, rate_limit_middleware};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&settings.logging);

    let metrics = match PrometheusMetrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(e) => {
            error!(error = %e, "Failed to register metrics");
            std::process::exit(1);
        }
    };

    let service = match RateLimiterService::connect(&settings, metrics.clone()).await {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!(error = %e, "Failed to build rate limiter");
            std::process::exit(1);
        }
    };
    let state = RateLimitState::new(service);

    // /metrics sits outside the limiter so scrapes are never throttled
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/api/data", get(api_data_handler))
        .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
        .merge(Router::new().route("/metrics", get(metrics_handler)).with_state(metrics));

    let listener = match tokio::net::TcpListener::bind(&settings.server.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %settings.server.bind, error = %e, "Failed to bind. Is the port already in use?");
            std::process::exit(1);
        }
    };
    info!(bind = %settings.server.bind, "Rate limited API listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Server stopped");
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn root_handler() -> &'static str {
    "Welcome to Rate Limited API!"
}

async fn api_data_handler() -> &'static str {
    r#"{"data": [1,2,3]}"#
}

async fn metrics_handler(State(metrics): State<Arc<PrometheusMetrics>>) -> (StatusCode, String) {
    match metrics.encode() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
