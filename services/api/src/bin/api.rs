//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{FileCache, FileLegacyStorage, GoogleBooksLookup, PgAuthProvider, PgDocumentStore, QueuedStore},
    config::Config,
    error::ApiError,
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        require_user,
        rest::{
            book_picker_handler, calendar_handler, connectivity_handler, create_book_handler,
            create_reading_session_handler, delete_book_handler, genre_options_handler, journal_handler,
            library_view_handler, reorder_handler, search_handler, set_filter_handler, sync_status_handler,
            toggle_favorite_handler, update_book_handler,
        },
        state::AppState,
        ws_handler, ApiDoc,
    },
};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use reading_tracker_core::{
    connectivity::ConnectivityMonitor,
    library::{Library, LibraryServices},
    ports::SystemClock,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let documents = Arc::new(PgDocumentStore::new(db_pool.clone()));
    info!("Running database migrations...");
    documents.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let connectivity = Arc::new(ConnectivityMonitor::new(config.start_online));
    let store = Arc::new(QueuedStore::new(documents, connectivity.clone()));
    let _replay = store.spawn_replay();

    let metadata = Arc::new(GoogleBooksLookup::new(
        config.metadata_endpoint.clone(),
        config.metadata_api_key.clone(),
    )?);
    let auth = Arc::new(PgAuthProvider::new(db_pool));

    // --- 4. Build the Shared AppState ---
    let library = Arc::new(Library::new(LibraryServices {
        store,
        cache: Arc::new(FileCache::new(config.cache_dir.clone())),
        legacy: Arc::new(FileLegacyStorage::new(config.legacy_dir.clone())),
        metadata,
        auth: auth.clone(),
        clock: Arc::new(SystemClock),
        connectivity,
    }));
    let app_state = Arc::new(AppState {
        library,
        auth,
        config: config.clone(),
    });

    // --- 5. Configure CORS ---
    let origin = config
        .allowed_origin
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("Invalid ALLOWED_ORIGIN '{}': {}", config.allowed_origin, e)))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    // Reachable while signed out.
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/connectivity", post(connectivity_handler))
        .route("/sync/status", get(sync_status_handler));

    let protected_routes = Router::new()
        .route("/library", get(library_view_handler))
        .route("/library/filter", put(set_filter_handler))
        .route("/calendar", get(calendar_handler))
        .route("/journal", get(journal_handler))
        .route("/genres", get(genre_options_handler))
        .route("/search", get(search_handler))
        .route("/books", post(create_book_handler))
        .route("/books/picker", get(book_picker_handler))
        .route("/books/reorder", post(reorder_handler))
        .route("/books/{id}", put(update_book_handler).delete(delete_book_handler))
        .route("/books/{id}/favorite", post(toggle_favorite_handler))
        .route("/sessions", post(create_reading_session_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(app_state.clone(), require_user));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!("Swagger UI available at http://{}/swagger-ui", config.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
