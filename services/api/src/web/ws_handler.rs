//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! It pushes the library view as the synced collections change, and drives the
//! connection's dialog state and title suggestions.

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    state::{AppState, ConnectionState},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use reading_tracker_core::domain::{BookSuggestion, UserIdentity};
use reading_tracker_core::library::{Library, Notice};
use reading_tracker_core::mutation::{MutationError, WriteOutcome};
use reading_tracker_core::search::SuggestionOutcome;
use reading_tracker_core::ui_state::Dialog;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

const DEFAULT_VIEWPORT_WIDTH: u32 = 1024;

type WsSender = SplitSink<WebSocket, Message>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<UserIdentity>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user: UserIdentity) {
    info!("New WebSocket connection established for user: {}", user.user_id);

    let library = app_state.library.clone();
    let (mut sender, mut receiver) = socket.split();
    let mut connection = ConnectionState::new(DEFAULT_VIEWPORT_WIDTH);

    let mut books = library.books();
    let mut sessions = library.sessions();
    let mut filter = library.watch_filter();
    let mut user_rx = library.watch_user();
    let mut notices = library.notices();
    let (suggestion_tx, mut suggestion_rx) = mpsc::channel::<Vec<BookSuggestion>>(8);

    // --- 1. Initial State ---
    if !send_view(&mut sender, &library, &connection).await
        || !send_journal(&mut sender, &library).await
        || !send(&mut sender, &ServerMessage::Dialog { state: connection.dialog.clone() }).await
    {
        error!("Failed to send the initial library state.");
        return;
    }

    // --- 2. Main Loop ---
    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let keep_going = handle_text_message(
                            text.as_str(),
                            &library,
                            &mut connection,
                            &mut sender,
                            &suggestion_tx,
                        )
                        .await;
                        if !keep_going {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client sent close message.");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                    None => {
                        info!("Client disconnected.");
                        break;
                    }
                }
            }
            alive = books.changed() => {
                if !alive || !send_view(&mut sender, &library, &connection).await {
                    break;
                }
            }
            alive = sessions.changed() => {
                if !alive
                    || !send_view(&mut sender, &library, &connection).await
                    || !send_journal(&mut sender, &library).await
                {
                    break;
                }
            }
            changed = filter.changed() => {
                if changed.is_err() || !send_view(&mut sender, &library, &connection).await {
                    break;
                }
            }
            changed = user_rx.changed() => {
                let signed_in = changed.is_ok() && user_rx.borrow_and_update().is_some();
                if !signed_in {
                    info!("User signed out; closing the connection.");
                    let _ = send(&mut sender, &ServerMessage::Notice { notice: Notice::SignedOut }).await;
                    break;
                }
            }
            notice = notices.recv() => {
                match notice {
                    Ok(notice) => {
                        if !handle_notice(notice, &mut connection, &mut sender).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Connection lagged behind by {} notices", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            Some(suggestions) = suggestion_rx.recv() => {
                if !send(&mut sender, &ServerMessage::Suggestions { suggestions }).await {
                    break;
                }
            }
        }
    }

    // --- 3. Cleanup ---
    connection.cancellation_token.cancel();
    library.suggestions().cancel();
    info!("WebSocket connection closed.");
}

/// Handles one client message. Returns `false` once the socket is unusable.
async fn handle_text_message(
    text: &str,
    library: &Arc<Library>,
    connection: &mut ConnectionState,
    sender: &mut WsSender,
    suggestion_tx: &mpsc::Sender<Vec<BookSuggestion>>,
) -> bool {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            return send_error(sender, "Unrecognized message").await;
        }
    };

    match client_msg {
        ClientMessage::Viewport { width } => {
            connection.viewport_width = width;
            send_view(sender, library, connection).await
        }
        ClientMessage::Keystroke { query } => {
            spawn_suggestion_lookup(library.clone(), query, connection, suggestion_tx.clone());
            true
        }
        ClientMessage::CancelSuggestions => {
            library.suggestions().cancel();
            send(sender, &ServerMessage::Suggestions { suggestions: Vec::new() }).await
        }
        ClientMessage::OpenDialog { dialog } => match connection.dialog.open(dialog) {
            Ok(()) => send_dialog(sender, connection).await,
            Err(e) => send_error(sender, &e.to_string()).await,
        },
        ClientMessage::CloseDialog => {
            library.suggestions().cancel();
            match connection.dialog.close() {
                Ok(()) => send_dialog(sender, connection).await,
                Err(e) => send_error(sender, &e.to_string()).await,
            }
        }
        ClientMessage::SubmitBook { draft } => {
            let editing = match connection.dialog.begin_submit() {
                Ok(Dialog::BookForm { editing }) => Ok(editing.clone()),
                Ok(_) => Err("The open dialog is not a book form".to_string()),
                Err(e) => return send_error(sender, &e.to_string()).await,
            };
            let editing = match editing {
                Ok(editing) => editing,
                Err(message) => {
                    let _ = connection.dialog.finish(false);
                    return send_error(sender, &message).await;
                }
            };
            if !send_dialog(sender, connection).await {
                return false;
            }
            library.suggestions().cancel();
            let result = library.mutations().save_book(editing.as_deref(), draft).await;
            finish_submit(result, connection, sender).await
        }
        ClientMessage::SubmitSession { draft } => {
            let is_session_form = match connection.dialog.begin_submit() {
                Ok(dialog) => matches!(dialog, Dialog::SessionForm { .. }),
                Err(e) => return send_error(sender, &e.to_string()).await,
            };
            if !is_session_form {
                let _ = connection.dialog.finish(false);
                return send_error(sender, "The open dialog is not a session form").await;
            }
            if !send_dialog(sender, connection).await {
                return false;
            }
            let result = library.log_session(draft).await;
            finish_submit(result, connection, sender).await
        }
        ClientMessage::SetFilter { filter } => {
            // The filter watch pushes the new view.
            library.set_filter(filter);
            true
        }
        ClientMessage::Connectivity { online } => {
            library.set_online(online);
            true
        }
    }
}

/// Looks up suggestions after the quiet period. Superseded lookups send nothing.
fn spawn_suggestion_lookup(
    library: Arc<Library>,
    query: String,
    connection: &ConnectionState,
    suggestion_tx: mpsc::Sender<Vec<BookSuggestion>>,
) {
    let token = connection.cancellation_token.clone();
    tokio::spawn(async move {
        let outcome = tokio::select! {
            _ = token.cancelled() => return,
            outcome = library.suggestions().on_keystroke(&query) => outcome,
        };
        let suggestions = match outcome {
            SuggestionOutcome::Suggestions(found) => found,
            SuggestionOutcome::Offline | SuggestionOutcome::TooShort => Vec::new(),
            SuggestionOutcome::Superseded => {
                debug!("Suggestions for '{}' were superseded", query);
                return;
            }
        };
        if suggestion_tx.send(suggestions).await.is_err() {
            debug!("Connection closed before suggestions arrived");
        }
    });
}

/// Closes the submitting dialog on success, reopens it on failure, and reports.
async fn finish_submit<T>(
    result: Result<WriteOutcome<T>, MutationError>,
    connection: &mut ConnectionState,
    sender: &mut WsSender,
) -> bool {
    let (success, reply) = match result {
        Ok(WriteOutcome::Saved(_)) => (true, ServerMessage::Saved { offline: false }),
        Ok(WriteOutcome::SavedOffline(_)) => (true, ServerMessage::Saved { offline: true }),
        Ok(WriteOutcome::Skipped) => (
            false,
            ServerMessage::Error {
                message: "Nothing to update".to_string(),
            },
        ),
        Ok(WriteOutcome::Failed) => (
            false,
            ServerMessage::Error {
                message: "The write failed".to_string(),
            },
        ),
        Err(MutationError::Validation(e)) => (false, ServerMessage::Error { message: e.to_string() }),
        Err(MutationError::Write(e)) => {
            error!("Write failed: {}", e);
            (
                false,
                ServerMessage::Error {
                    message: "The write failed".to_string(),
                },
            )
        }
    };
    if let Err(e) = connection.dialog.finish(success) {
        warn!("Dialog was not submitting: {}", e);
    }
    send_dialog(sender, connection).await && send(sender, &reply).await
}

/// The first session of the day opens the celebration when nothing else is open.
async fn handle_notice(notice: Notice, connection: &mut ConnectionState, sender: &mut WsSender) -> bool {
    let celebrate = notice == Notice::StreakCelebration;
    if !send(sender, &ServerMessage::Notice { notice }).await {
        return false;
    }
    if celebrate && connection.dialog.current().is_none() && connection.dialog.open(Dialog::StreakCelebration).is_ok() {
        return send_dialog(sender, connection).await;
    }
    true
}

async fn send_view(sender: &mut WsSender, library: &Library, connection: &ConnectionState) -> bool {
    let view = library.view(connection.viewport_width);
    send(sender, &ServerMessage::View { view }).await
}

async fn send_journal(sender: &mut WsSender, library: &Library) -> bool {
    let sessions = library.journal().as_ref().clone();
    send(sender, &ServerMessage::Journal { sessions }).await
}

async fn send_dialog(sender: &mut WsSender, connection: &ConnectionState) -> bool {
    send(
        sender,
        &ServerMessage::Dialog {
            state: connection.dialog.clone(),
        },
    )
    .await
}

async fn send_error(sender: &mut WsSender, message: &str) -> bool {
    send(
        sender,
        &ServerMessage::Error {
            message: message.to_string(),
        },
    )
    .await
}

/// Serializes and sends one message. Returns `false` if the socket is closed.
async fn send<T: Serialize>(sender: &mut WsSender, msg: &T) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return true;
        }
    };
    if sender.send(Message::Text(json.into())).await.is_err() {
        error!("Failed to send message to the client.");
        return false;
    }
    true
}
