use std::panic;
use std::sync::Arc;

use axum::{http::HeaderValue, Router};
use colabri_relay::{
    config::Config,
    db::dbaccess::DbAccess,
    docs::ApiDoc,
    routes::create_api_routes,
    services::access_resolver::{AccessResolver, CachedAccessResolver, UnavailableAccessResolver},
    ws::{create_relay_routes, registry::spawn_janitor},
    AppState,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main(flavor = "multi_thread")]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration (before tracing, it carries the log level)
    let loaded = Config::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    // Initialize tracing
    let default_filter = format!("colabri_relay={},tower_http=debug,info", config.log_level);
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    if let Err(e) = loaded {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
    }

    info!("Starting relay ({} environment)...", config.environment);

    // Access store, scoped rooms are refused while it is unavailable
    let resolver: Arc<dyn AccessResolver> = match &config.db_url {
        Some(db_url) => match DbAccess::new(db_url).await {
            Ok(db) => {
                info!("Access store initialized successfully");
                Arc::new(CachedAccessResolver::new(Arc::new(db), config.access_cache_ttl()))
            }
            Err(e) => {
                error!("Failed to initialize access store: {}", e);
                warn!("Scoped rooms will not be available");
                Arc::new(UnavailableAccessResolver)
            }
        },
        None => {
            warn!("No database URL configured - scoped rooms will not be available");
            Arc::new(UnavailableAccessResolver)
        }
    };

    let state = AppState::new(config, resolver);
    let config = state.config.clone();

    // Evict rooms nobody uses anymore
    if let Some(_janitor) = spawn_janitor(state.registry.clone(), config.room_janitor_interval(), config.room_idle_ttl()) {
        info!("Room janitor running every {:?}", config.room_janitor_interval());
    }

    // Start the relay
    let relay_addr = config.relay_address();
    let relay_listener = tokio::net::TcpListener::bind(&relay_addr)
        .await
        .unwrap_or_else(|_| panic!("Failed to bind relay to {}", relay_addr));

    info!("📡 Relay starting on ws://{}", relay_addr);

    let relay_routes = create_relay_routes(state.clone()).layer(TraceLayer::new_for_http());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(relay_listener, relay_routes).await {
            error!("Relay server error: {}", e);
        }
    });

    // CORS
    let cors = match config.cors_origin_list() {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
        }
        None => {
            if !config.is_development() {
                warn!("CORS_ORIGINS not set in {} environment, allowing any origin", config.environment);
            }
            CorsLayer::permissive()
        }
    };

    // Combine all routes
    let app_routes = Router::new()
        // Mount API routes
        .nest("/api", create_api_routes(state))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start the HTTP/API server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 Relay available at ws://{}", relay_addr);
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
