use std::sync::Arc;

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use tracing::info;

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod task;
pub mod transport;
pub mod weather_client;

use auth::{BearerAuth, JwtVerifier};
use config::Config;
use dispatch::{Dispatcher, ServerBuilder};
use domain::{
    resources::{greeting_resource, status_resource},
    tools::{add_tool, calculate_tool, status_tool, weather_tool},
    utils::ServerInfo,
};
use errors::SetupError;
use weather_client::{WeatherApiClient, WeatherProvider};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .route("/mcp", post(http::handlers::mcp_endpoint))
        .layer(from_fn(logging::request_logging_middleware))
        .with_state(state)
}

/// Registers the bundled capabilities behind bearer authentication.
pub fn build_dispatcher(config: &Config) -> Result<Dispatcher, SetupError> {
    let weather = match config.weather_api_key.as_deref() {
        Some(api_key) => {
            let client = WeatherApiClient::new(config.weather_api_base_url.as_str(), api_key)?;
            Some(Arc::new(client) as Arc<dyn WeatherProvider>)
        }
        None => {
            info!("WEATHER_API_KEY not set, get_weather is disabled");
            None
        }
    };

    build_dispatcher_with(config, weather)
}

pub fn build_dispatcher_with(
    config: &Config,
    weather: Option<Arc<dyn WeatherProvider>>,
) -> Result<Dispatcher, SetupError> {
    let info = ServerInfo::default();
    let mut builder = ServerBuilder::new();
    builder
        .call_timeout(config.call_timeout)
        .middleware(BearerAuth::new(JwtVerifier::hs256(config.secret_key.as_bytes())));

    builder.register_tool(add_tool()?)?;
    builder.register_tool(calculate_tool()?)?;
    if let Some(provider) = weather {
        builder.register_tool(weather_tool(provider)?)?;
    }
    builder.register_tool(status_tool(info)?)?;

    builder.register_resource(greeting_resource()?)?;
    builder.register_resource(status_resource(info)?)?;

    Ok(builder.build())
}
