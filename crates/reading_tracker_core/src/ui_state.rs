//! crates/reading_tracker_core/src/ui_state.rs
//!
//! Per-connection modal dialog state. At most one dialog is open at a time.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dialog {
    /// `editing` is `None` for a new book.
    BookForm { editing: Option<String> },
    SessionForm { preselected_book: Option<String> },
    BookDetail { book_id: String },
    Theme,
    StreakCelebration,
    InstallHelp,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "dialog", rename_all = "snake_case")]
pub enum DialogState {
    #[default]
    Closed,
    Open(Dialog),
    /// The dialog's form is being written; it can be neither closed nor replaced.
    Submitting(Dialog),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("A submission is in progress")]
    Busy,
    #[error("No dialog is open")]
    NothingOpen,
    #[error("No submission is in progress")]
    NotSubmitting,
}

impl DialogState {
    pub fn current(&self) -> Option<&Dialog> {
        match self {
            DialogState::Closed => None,
            DialogState::Open(dialog) | DialogState::Submitting(dialog) => Some(dialog),
        }
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self, DialogState::Submitting(_))
    }

    /// Opens `dialog`, replacing whichever dialog is open.
    pub fn open(&mut self, dialog: Dialog) -> Result<(), TransitionError> {
        if self.is_submitting() {
            return Err(TransitionError::Busy);
        }
        *self = DialogState::Open(dialog);
        Ok(())
    }

    pub fn begin_submit(&mut self) -> Result<&Dialog, TransitionError> {
        match std::mem::take(self) {
            DialogState::Open(dialog) => {
                *self = DialogState::Submitting(dialog);
                self.current().ok_or(TransitionError::NothingOpen)
            }
            DialogState::Submitting(dialog) => {
                *self = DialogState::Submitting(dialog);
                Err(TransitionError::Busy)
            }
            DialogState::Closed => Err(TransitionError::NothingOpen),
        }
    }

    /// Ends a submission: success closes the dialog, failure leaves it open for correction.
    pub fn finish(&mut self, success: bool) -> Result<(), TransitionError> {
        match std::mem::take(self) {
            DialogState::Submitting(dialog) => {
                if !success {
                    *self = DialogState::Open(dialog);
                }
                Ok(())
            }
            other => {
                *self = other;
                Err(TransitionError::NotSubmitting)
            }
        }
    }

    pub fn close(&mut self) -> Result<(), TransitionError> {
        if self.is_submitting() {
            return Err(TransitionError::Busy);
        }
        *self = DialogState::Closed;
        Ok(())
    }
}
