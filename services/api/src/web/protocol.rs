//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for the live library screen.

use reading_tracker_core::derived::{LibraryFilter, LibraryView};
use reading_tracker_core::domain::{BookDraft, BookSuggestion, ReadingSession, SessionDraft};
use reading_tracker_core::library::Notice;
use reading_tracker_core::ui_state::{Dialog, DialogState};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The client's viewport changed size; the shelves are recomputed.
    Viewport { width: u32 },

    /// The title field of the book form changed.
    Keystroke { query: String },

    /// The suggestion list was dismissed.
    CancelSuggestions,

    OpenDialog { dialog: Dialog },

    CloseDialog,

    /// Submits the open book form. Whether it creates or updates comes from the dialog.
    SubmitBook { draft: BookDraft },

    /// Submits the open session form.
    SubmitSession { draft: SessionDraft },

    SetFilter { filter: LibraryFilter },

    /// The browser's `online`/`offline` event.
    Connectivity { online: bool },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent after every change to the books, the sessions or the filter.
    View { view: LibraryView },

    /// The journal, newest first. Sent whenever the sessions change.
    Journal { sessions: Vec<ReadingSession> },

    Notice { notice: Notice },

    Suggestions { suggestions: Vec<BookSuggestion> },

    Dialog { state: DialogState },

    /// A form was written. `offline` means it will sync on reconnect.
    Saved { offline: bool },

    /// Reports an error to the client, which should display an error message.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_a_type_tag() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "open_dialog", "dialog": {"kind": "book_form", "editing": null}}"#)
                .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::OpenDialog {
                dialog: Dialog::BookForm { editing: None }
            }
        ));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "submit_session", "draft": {"bookId": "b1", "duration": "25"}}"#).unwrap();
        match msg {
            ClientMessage::SubmitSession { draft } => {
                assert_eq!(draft.book_id.as_deref(), Some("b1"));
                assert_eq!(draft.duration, "25");
                assert!(draft.note.is_empty());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn server_messages_carry_their_payload() {
        let json = serde_json::to_value(ServerMessage::Saved { offline: true }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "saved", "offline": true}));

        let json = serde_json::to_value(ServerMessage::Dialog {
            state: DialogState::Open(Dialog::Theme),
        })
        .unwrap();
        assert_eq!(json["type"], "dialog");
        assert_eq!(json["state"]["state"], "open");
        assert_eq!(json["state"]["dialog"]["kind"], "theme");
    }
}
