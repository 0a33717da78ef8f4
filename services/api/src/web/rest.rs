//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::auth::{AuthResponse, LoginRequest, SignupRequest};
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::NaiveDate;
use reading_tracker_core::derived::{GenreFilter, LibraryFilter, SortMode};
use reading_tracker_core::domain::{BookDraft, SessionDraft};
use reading_tracker_core::mutation::{MutationError, WriteOutcome};
use reading_tracker_core::Gated;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{IntoParams, OpenApi, ToSchema};

const DEFAULT_VIEWPORT_WIDTH: u32 = 1024;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        connectivity_handler,
        sync_status_handler,
        library_view_handler,
        set_filter_handler,
        calendar_handler,
        journal_handler,
        genre_options_handler,
        book_picker_handler,
        create_book_handler,
        update_book_handler,
        delete_book_handler,
        toggle_favorite_handler,
        reorder_handler,
        create_reading_session_handler,
        search_handler,
    ),
    components(
        schemas(
            SignupRequest, LoginRequest, AuthResponse, ConnectivityRequest, FilterRequest, BookRequest,
            SessionRequest, ReorderRequest, WriteResponse, SyncStatusResponse, ViewResponse, CalendarResponse,
            JournalResponse, BooksResponse, GenresResponse, SearchResponse
        )
    ),
    tags(
        (name = "Reading Tracker API", description = "Offline-first library, reading sessions and streaks.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request Payloads and Query Parameters
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct ConnectivityRequest {
    pub online: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct FilterRequest {
    #[serde(default)]
    pub search: String,
    /// A genre, or `all`.
    #[serde(default)]
    pub genre: String,
    /// `custom`, `favorites`, `author` or `title`.
    #[serde(default)]
    pub sort: String,
}

impl From<FilterRequest> for LibraryFilter {
    fn from(req: FilterRequest) -> Self {
        let sort = if req.sort.trim().is_empty() {
            SortMode::default()
        } else {
            SortMode::from_key(&req.sort)
        };
        Self {
            search: req.search,
            genre: GenreFilter::parse(&req.genre),
            sort,
        }
    }
}

/// The book form. Fields left out get their defaults on create and are left
/// untouched on update.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookRequest {
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub rating: Option<u8>,
    pub color: Option<String>,
    pub cover_url: Option<String>,
    pub is_favorite: Option<bool>,
    pub page_count: Option<u32>,
}

impl From<BookRequest> for BookDraft {
    fn from(req: BookRequest) -> Self {
        Self {
            title: req.title,
            author: req.author,
            genre: req.genre,
            rating: req.rating,
            color: req.color.filter(|c| !c.trim().is_empty()),
            cover_url: req.cover_url.filter(|url| !url.trim().is_empty()),
            is_favorite: req.is_favorite,
            page_count: req.page_count,
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub book_id: Option<String>,
    /// Minutes, as typed.
    pub duration: String,
    #[serde(default)]
    pub note: String,
}

impl From<SessionRequest> for SessionDraft {
    fn from(req: SessionRequest) -> Self {
        Self {
            book_id: req.book_id,
            duration: req.duration,
            note: req.note,
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    pub dragged_id: String,
    pub target_id: String,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ViewQuery {
    /// Viewport width in CSS pixels.
    pub width: Option<u32>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CalendarQuery {
    pub year: i32,
    pub month: u32,
    pub selected: Option<NaiveDate>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TextQuery {
    #[serde(default)]
    pub q: String,
}

//=========================================================================================
// API Responses
//=========================================================================================

/// The result of a write: `saved`, or `saved_offline` when it will sync on reconnect.
#[derive(Debug, Serialize, ToSchema)]
pub struct WriteResponse {
    pub status: String,
    #[schema(value_type = Object)]
    pub value: Value,
}

#[derive(Serialize, ToSchema)]
pub struct SyncStatusResponse {
    pub online: bool,
    #[schema(value_type = Object)]
    pub books: Value,
    #[schema(value_type = Object)]
    pub sessions: Value,
}

#[derive(Serialize, ToSchema)]
pub struct ViewResponse {
    #[schema(value_type = Object)]
    pub view: Value,
}

#[derive(Serialize, ToSchema)]
pub struct CalendarResponse {
    #[schema(value_type = Object)]
    pub calendar: Value,
}

#[derive(Serialize, ToSchema)]
pub struct JournalResponse {
    #[schema(value_type = Vec<Object>)]
    pub sessions: Value,
}

#[derive(Serialize, ToSchema)]
pub struct BooksResponse {
    #[schema(value_type = Vec<Object>)]
    pub books: Value,
}

#[derive(Serialize, ToSchema)]
pub struct GenresResponse {
    pub genres: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct SearchResponse {
    #[schema(value_type = Vec<Object>)]
    pub suggestions: Value,
}

type HandlerError = (StatusCode, String);

fn to_json<T: Serialize>(value: &T) -> Result<Value, HandlerError> {
    serde_json::to_value(value).map_err(|e| {
        error!("Failed to serialize response: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to build response".to_string())
    })
}

fn write_response<T: Serialize>(
    outcome: WriteOutcome<T>,
    success: StatusCode,
) -> Result<(StatusCode, Json<WriteResponse>), HandlerError> {
    let (status, value) = match outcome {
        WriteOutcome::Saved(value) => ("saved", to_json(&value)?),
        WriteOutcome::SavedOffline(value) => ("saved_offline", to_json(&value)?),
        WriteOutcome::Skipped => return Err((StatusCode::NOT_FOUND, "Nothing to update".to_string())),
        WriteOutcome::Failed => return Err((StatusCode::BAD_GATEWAY, "The write failed".to_string())),
    };
    Ok((
        success,
        Json(WriteResponse {
            status: status.to_string(),
            value,
        }),
    ))
}

fn mutation_error(e: MutationError) -> HandlerError {
    match e {
        MutationError::Validation(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        MutationError::Write(e) => {
            error!("Write failed: {}", e);
            (StatusCode::BAD_GATEWAY, "The write failed".to_string())
        }
    }
}

//=========================================================================================
// Connectivity and Sync
//=========================================================================================

/// Report an `online`/`offline` transition of the host.
#[utoipa::path(
    post,
    path = "/connectivity",
    request_body = ConnectivityRequest,
    responses((status = 204, description = "Recorded"))
)]
pub async fn connectivity_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<ConnectivityRequest>,
) -> StatusCode {
    app_state.library.set_online(req.online);
    StatusCode::NO_CONTENT
}

/// Where the published collections currently come from.
#[utoipa::path(
    get,
    path = "/sync/status",
    responses((status = 200, description = "Sync status", body = SyncStatusResponse))
)]
pub async fn sync_status_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<SyncStatusResponse>, HandlerError> {
    let library = &app_state.library;
    let books = *library.books_status().borrow();
    let sessions = *library.sessions_status().borrow();
    Ok(Json(SyncStatusResponse {
        online: library.connectivity().is_online(),
        books: to_json(&books)?,
        sessions: to_json(&sessions)?,
    }))
}

//=========================================================================================
// Library Queries
//=========================================================================================

/// The library screen: shelves, genres, streak.
#[utoipa::path(
    get,
    path = "/library",
    params(ViewQuery),
    responses(
        (status = 200, description = "The library view", body = ViewResponse),
        (status = 401, description = "Nobody is signed in")
    )
)]
pub async fn library_view_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ViewQuery>,
) -> Result<Json<ViewResponse>, HandlerError> {
    let view = app_state
        .library
        .view(query.width.unwrap_or(DEFAULT_VIEWPORT_WIDTH));
    Ok(Json(ViewResponse { view: to_json(&view)? }))
}

/// Replace the search, genre and sort of the library and return the new view.
#[utoipa::path(
    put,
    path = "/library/filter",
    params(ViewQuery),
    request_body = FilterRequest,
    responses((status = 200, description = "The filtered view", body = ViewResponse))
)]
pub async fn set_filter_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ViewQuery>,
    Json(req): Json<FilterRequest>,
) -> Result<Json<ViewResponse>, HandlerError> {
    app_state.library.set_filter(req.into());
    let view = app_state
        .library
        .view(query.width.unwrap_or(DEFAULT_VIEWPORT_WIDTH));
    Ok(Json(ViewResponse { view: to_json(&view)? }))
}

/// One month of reading days; `selected` lists the sessions of that day.
#[utoipa::path(
    get,
    path = "/calendar",
    params(CalendarQuery),
    responses(
        (status = 200, description = "The month", body = CalendarResponse),
        (status = 400, description = "Invalid month")
    )
)]
pub async fn calendar_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<CalendarResponse>, HandlerError> {
    let calendar = app_state
        .library
        .calendar(query.year, query.month, query.selected)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("{}-{} is not a month", query.year, query.month)))?;
    Ok(Json(CalendarResponse {
        calendar: to_json(&calendar)?,
    }))
}

/// Every session, newest first.
#[utoipa::path(
    get,
    path = "/journal",
    responses((status = 200, description = "The reading journal", body = JournalResponse))
)]
pub async fn journal_handler(State(app_state): State<Arc<AppState>>) -> Result<Json<JournalResponse>, HandlerError> {
    let journal = app_state.library.journal();
    Ok(Json(JournalResponse {
        sessions: to_json(journal.as_ref())?,
    }))
}

/// Genre options for the book form, narrowed by the typed text.
#[utoipa::path(
    get,
    path = "/genres",
    params(TextQuery),
    responses((status = 200, description = "Matching genres", body = GenresResponse))
)]
pub async fn genre_options_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<TextQuery>,
) -> Json<GenresResponse> {
    Json(GenresResponse {
        genres: app_state.library.genre_options(&query.q),
    })
}

/// Books matching the session form's picker.
#[utoipa::path(
    get,
    path = "/books/picker",
    params(TextQuery),
    responses((status = 200, description = "Matching books", body = BooksResponse))
)]
pub async fn book_picker_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<TextQuery>,
) -> Result<Json<BooksResponse>, HandlerError> {
    let books = app_state.library.book_picker(&query.q);
    Ok(Json(BooksResponse { books: to_json(&books)? }))
}

/// Look up book metadata by title. Skipped while offline.
#[utoipa::path(
    get,
    path = "/search",
    params(TextQuery),
    responses(
        (status = 200, description = "Suggestions", body = SearchResponse),
        (status = 503, description = "Offline")
    )
)]
pub async fn search_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<TextQuery>,
) -> Result<Json<SearchResponse>, HandlerError> {
    match app_state.library.manual_search(&query.q).await {
        Gated::Ready(suggestions) => Ok(Json(SearchResponse {
            suggestions: to_json(&suggestions)?,
        })),
        Gated::Offline => Err((StatusCode::SERVICE_UNAVAILABLE, "Search needs a connection".to_string())),
    }
}

//=========================================================================================
// Mutations
//=========================================================================================

/// Add a book. Missing cover or author is looked up when online.
#[utoipa::path(
    post,
    path = "/books",
    request_body = BookRequest,
    responses(
        (status = 201, description = "Book saved", body = WriteResponse),
        (status = 422, description = "Invalid book"),
        (status = 502, description = "Write failed")
    )
)]
pub async fn create_book_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<BookRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let outcome = app_state
        .library
        .mutations()
        .save_book(None, req.into())
        .await
        .map_err(mutation_error)?;
    write_response(outcome, StatusCode::CREATED)
}

/// Update the fields of a book.
#[utoipa::path(
    put,
    path = "/books/{id}",
    params(("id" = String, Path, description = "Book id")),
    request_body = BookRequest,
    responses(
        (status = 200, description = "Book saved", body = WriteResponse),
        (status = 422, description = "Invalid book"),
        (status = 502, description = "Write failed")
    )
)]
pub async fn update_book_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<BookRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let outcome = app_state
        .library
        .mutations()
        .save_book(Some(&id), req.into())
        .await
        .map_err(mutation_error)?;
    write_response(outcome, StatusCode::OK)
}

/// Delete a book. Its sessions are kept.
#[utoipa::path(
    delete,
    path = "/books/{id}",
    params(("id" = String, Path, description = "Book id")),
    responses(
        (status = 200, description = "Book deleted", body = WriteResponse),
        (status = 502, description = "Write failed")
    )
)]
pub async fn delete_book_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    info!("Deleting book {}", id);
    write_response(app_state.library.mutations().delete_book(&id).await, StatusCode::OK)
}

/// Flip the favorite flag of a book.
#[utoipa::path(
    post,
    path = "/books/{id}/favorite",
    params(("id" = String, Path, description = "Book id")),
    responses(
        (status = 200, description = "New favorite flag", body = WriteResponse),
        (status = 404, description = "Unknown book")
    )
)]
pub async fn toggle_favorite_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    write_response(app_state.library.mutations().toggle_favorite(&id).await, StatusCode::OK)
}

/// Drop a book onto another one; switches the library to the custom order.
#[utoipa::path(
    post,
    path = "/books/reorder",
    request_body = ReorderRequest,
    responses(
        (status = 200, description = "New order of book ids", body = WriteResponse),
        (status = 404, description = "Unknown book")
    )
)]
pub async fn reorder_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<ReorderRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let outcome = app_state.library.reorder(&req.dragged_id, &req.target_id).await;
    write_response(outcome, StatusCode::OK)
}

/// Log a reading session for today.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = SessionRequest,
    responses(
        (status = 201, description = "Session saved", body = WriteResponse),
        (status = 422, description = "Invalid session"),
        (status = 502, description = "Write failed")
    )
)]
pub async fn create_reading_session_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<SessionRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let outcome = app_state
        .library
        .log_session(req.into())
        .await
        .map_err(mutation_error)?;
    write_response(outcome, StatusCode::CREATED)
}
