// prompt-gateway: configuration-driven HTTP gateway to a chat-completion API
//
// Administrators register named endpoints, each pairing a URL path with a
// system prompt. Requests to an endpoint carry free text, which is sent to the
// completion API under that prompt; the reply is returned as JSON and every
// call is logged to MongoDB.

// Bootstrap configuration loading.
mod config;
// Dynamic endpoint resolution, completion and reply normalization.
mod dispatch;
// Persistent store of endpoint configs.
mod endpoints;
// HTTP request handlers for API endpoints.
mod handlers;
// Client for the chat-completion API.
mod llm;
// Call log sink and its MongoDB backend.
mod logs;
// Atomic JSON file writes.
mod persist;
// Runtime-editable system settings.
mod settings;
// Common type definitions used throughout the application.
mod types;

#[cfg(test)]
mod testing;

use crate::dispatch::Dispatcher;
use crate::endpoints::EndpointStore;
use crate::handlers::{admin, dispatch as dispatch_handlers, logs as log_handlers};
use crate::llm::{LlmClient, LlmError, OpenAiClient};
use crate::logs::{LogSink, MongoConnector};
use crate::settings::{SettingsManager, SystemSettings};

use axum::{
    routing::{get, post},
    Router,
};

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// Shared application state, cloned into each request handler.
#[derive(Clone)]
pub struct AppState {
    endpoints: Arc<EndpointStore>,
    settings: Arc<SettingsManager>,
    llm_client: Arc<dyn LlmClient>,
    log_sink: Arc<LogSink>,
    dispatcher: Dispatcher,
    // First path segment of path-addressed endpoints
    legacy_prefix: String,
}

impl AppState {
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::default()
    }

    // Pushes `settings` into the completion client and reconnects the log
    // sink. Returns whether the sink is connected afterwards.
    pub async fn apply_settings(&self, settings: &SystemSettings) -> Result<bool, LlmError> {
        self.llm_client.configure(settings)?;
        Ok(self.log_sink.reconnect(settings).await)
    }
}

// Builder for AppState; every component is required.
#[derive(Default)]
pub struct AppStateBuilder {
    endpoints: Option<EndpointStore>,
    settings: Option<SettingsManager>,
    llm_client: Option<Arc<dyn LlmClient>>,
    log_sink: Option<LogSink>,
    legacy_prefix: Option<String>,
}

impl AppStateBuilder {
    pub fn with_endpoints(mut self, endpoints: EndpointStore) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn with_settings(mut self, settings: SettingsManager) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm_client = Some(client);
        self
    }

    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn with_legacy_prefix(mut self, prefix: &str) -> Self {
        self.legacy_prefix = Some(prefix.to_string());
        self
    }

    // Builds the AppState from the configured components.
    //
    // # Errors
    //
    // Returns an error if any required component is missing.
    pub fn build(self) -> Result<AppState, &'static str> {
        let endpoints = Arc::new(self.endpoints.ok_or("EndpointStore is required")?);
        let settings = Arc::new(self.settings.ok_or("SettingsManager is required")?);
        let llm_client = self.llm_client.ok_or("LlmClient is required")?;
        let log_sink = Arc::new(self.log_sink.ok_or("LogSink is required")?);
        let legacy_prefix = self.legacy_prefix.ok_or("Legacy prefix is required")?;

        let dispatcher = Dispatcher::new(
            endpoints.clone(),
            settings.clone(),
            llm_client.clone(),
            log_sink.clone(),
        );

        Ok(AppState {
            endpoints,
            settings,
            llm_client,
            log_sink,
            dispatcher,
            legacy_prefix,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let config = config::load_config("config.yaml")?;

    setup_logging(&config.server.debug_level);

    let state = build_app_state(&config).await?;

    let app = build_router(state);

    start_server(app, &config.server).await?;

    Ok(())
}

// Sets up logging with the configured level.
fn setup_logging(debug_level_str: &str) {
    let debug_level = tracing::Level::from_str(debug_level_str).unwrap_or_else(|_| {
        error!(
            "Unknown debug level: {}, defaulting to ERROR",
            debug_level_str
        );
        tracing::Level::ERROR
    });

    tracing_subscriber::fmt().with_max_level(debug_level).init();
    info!(
        "Starting prompt-gateway server with log level: {}",
        debug_level
    );
}

// Opens the stores, creates the clients and connects the log sink.
async fn build_app_state(config: &config::Config) -> Result<AppState, Box<dyn std::error::Error>> {
    let endpoints = EndpointStore::open(&config.storage.endpoints_file)?;
    let settings = SettingsManager::load(&config.storage.settings_file)?;
    let current = settings.current();

    let llm_client: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(&current)?);

    let log_sink = LogSink::new(Arc::new(MongoConnector));
    if !log_sink.reconnect(&current).await {
        warn!("Call logging is inactive until the log store becomes reachable");
    }

    let state = AppState::builder()
        .with_endpoints(endpoints)
        .with_settings(settings)
        .with_llm_client(llm_client)
        .with_log_sink(log_sink)
        .with_legacy_prefix(&config.routing.legacy_prefix)
        .build()?;

    Ok(state)
}

// Builds the router with all API endpoints.
fn build_router(state: AppState) -> Router {
    let legacy_route = format!("/{}/{{*endpoint}}", state.legacy_prefix);

    Router::new()
        // Call logs. POST on the single-segment fixed routes goes to the
        // config of the same name, as `/api/{config_name}` would.
        .route(
            "/api/logs",
            get(log_handlers::handle_list_logs).post(dispatch_handlers::handle_fixed_name),
        )
        .route("/api/logs/stats", get(log_handlers::handle_log_stats))
        .route(
            "/api/test-mongodb",
            get(log_handlers::handle_test_connection).post(dispatch_handlers::handle_fixed_name),
        )
        // Admin reads
        .route(
            "/api/configs",
            get(admin::handle_list_configs).post(dispatch_handlers::handle_fixed_name),
        )
        .route(
            "/api/system-config",
            get(admin::handle_get_settings).post(dispatch_handlers::handle_fixed_name),
        )
        // Configured endpoints
        .route("/api/{config_name}", post(dispatch_handlers::handle_named))
        .route(&legacy_route, post(dispatch_handlers::handle_legacy))
        // Admin writes
        .route("/config/add", post(admin::handle_add_config))
        .route("/config/edit/{name}", post(admin::handle_edit_config))
        .route("/config/delete/{name}", post(admin::handle_delete_config))
        .route("/system-config/update", post(admin::handle_update_settings))
        // Middleware and state
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Starts the HTTP server and runs until Ctrl-C.
async fn start_server(
    app: Router,
    server_config: &config::ServerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::new(IpAddr::from_str(&server_config.host)?, server_config.port);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            // Without a signal handler, serve until the process is killed.
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
