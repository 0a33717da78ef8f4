//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-connection state of a
//! WebSocket client.

use crate::adapters::PgAuthProvider;
use crate::config::Config;
use reading_tracker_core::library::Library;
use reading_tracker_core::ui_state::DialogState;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub library: Arc<Library>,
    pub auth: Arc<PgAuthProvider>,
    pub config: Arc<Config>,
}

//=========================================================================================
// ConnectionState (Specific to One WebSocket Connection)
//=========================================================================================

/// The state for a single, active WebSocket connection.
pub struct ConnectionState {
    pub dialog: DialogState,
    /// The width reported by the client, used to size the shelves.
    pub viewport_width: u32,
    /// Cancels the connection's pending suggestion lookups when it closes.
    pub cancellation_token: CancellationToken,
}

impl ConnectionState {
    pub fn new(viewport_width: u32) -> Self {
        Self {
            dialog: DialogState::default(),
            viewport_width,
            cancellation_token: CancellationToken::new(),
        }
    }
}
