use std::time::Duration;

use crate::attachment::ImageAttachment;
use crate::error::{UploadError, ValidationError};
use crate::gemini::{Query, QueryResult};
use crate::history::{HistoryItem, HistoryStore, QueryKind};

/// Recorded as the question when only an image was sent.
pub const IMAGE_PLACEHOLDER_QUESTION: &str = "Image Analysis";

pub const UNEXPECTED_FAILURE: &str = "Something went wrong. Please check your internet connection.";

/// How long the "copied" confirmation stays up.
pub const COPY_CONFIRMATION: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
}

/// Transient, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionState {
    pub question: String,
    pub image: Option<ImageAttachment>,
    pub loading: bool,
    pub error: Option<String>,
    pub answer: String,
    pub copied: bool,
    pub show_history: bool,
}

/// What was asked, captured when the submission started.
#[derive(Debug)]
struct Pending {
    question: String,
    image: Option<ImageAttachment>,
}

/// Owns the interaction state and drives the submit cycle against the history.
pub struct Controller {
    state: InteractionState,
    history: HistoryStore,
    pending: Option<Pending>,
    copy_generation: u64,
}

impl Controller {
    pub fn new(mut history: HistoryStore) -> Self {
        let loaded = history.load().len();
        tracing::info!("Loaded {} history entries", loaded);

        Controller {
            state: InteractionState::default(),
            history,
            pending: None,
            copy_generation: 0,
        }
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    pub fn history(&self) -> &[HistoryItem] {
        self.history.items()
    }

    pub fn phase(&self) -> Phase {
        if self.pending.is_some() {
            Phase::Submitting
        } else {
            Phase::Idle
        }
    }

    pub fn set_question(&mut self, question: String) {
        self.state.question = question;
    }

    /// Applies the outcome of an image read. A rejected file leaves the current attachment alone.
    pub fn attach_image(&mut self, outcome: Result<ImageAttachment, UploadError>) {
        match outcome {
            Ok(image) => {
                self.state.image = Some(image);
                self.state.error = None;
            }
            Err(e) => {
                tracing::info!("Image rejected: {:?}", e);
                self.state.error = Some(e.to_string());
            }
        }
    }

    pub fn remove_image(&mut self) {
        self.state.image = None;
    }

    /// Validates the current input and enters `Submitting`. The returned query is what the gateway should be asked.
    pub fn begin_submit(&mut self) -> Result<Query, ValidationError> {
        if self.pending.is_some() {
            return Err(ValidationError::InFlight);
        }

        if self.state.question.trim().is_empty() && self.state.image.is_none() {
            let err = ValidationError::EmptySubmission;
            self.state.error = Some(err.to_string());
            return Err(err);
        }

        self.state.loading = true;
        self.state.error = None;
        self.state.answer.clear();

        let pending = Pending {
            question: self.state.question.clone(),
            image: self.state.image.clone(),
        };
        let query = Query::new(&pending.question, pending.image.clone());
        self.pending = Some(pending);
        Ok(query)
    }

    /// Finishes the in-flight submission. `Err` means the gateway call itself died and carries the diagnostic.
    pub fn complete_submit(&mut self, outcome: Result<QueryResult, String>) {
        let Some(pending) = self.pending.take() else {
            tracing::warn!("Ignoring a response with no submission in flight");
            return;
        };
        self.state.loading = false;

        let result = match outcome {
            Ok(result) => result,
            Err(detail) => {
                tracing::error!("Query task failed: {}", detail);
                self.state.error = Some(UNEXPECTED_FAILURE.to_string());
                return;
            }
        };

        if let Some(error) = result.error {
            self.state.error = Some(error.to_string());
            return;
        }

        self.state.answer = result.text.clone();

        let question = if pending.question.trim().is_empty() && pending.image.is_some() {
            IMAGE_PLACEHOLDER_QUESTION.to_string()
        } else {
            pending.question
        };
        let item = HistoryItem {
            id: uuid::Uuid::new_v4().to_string(),
            kind: if pending.image.is_some() { QueryKind::Image } else { QueryKind::Text },
            question,
            answer: result.text,
            timestamp: chrono::Utc::now().timestamp_millis(),
            image: pending.image.map(|image| image.data_url().to_string()),
        };

        if let Err(e) = self.history.append(item) {
            tracing::warn!("Failed to persist history: {}", e);
        }
    }

    /// Resets the input and the answer. History is untouched.
    pub fn clear(&mut self) {
        self.state.question.clear();
        self.state.image = None;
        self.state.answer.clear();
        self.state.error = None;
    }

    /// Loads a past exchange into the current state without asking the gateway.
    pub fn select_history(&mut self, id: &str) -> bool {
        let Some(item) = self.history.select(id) else {
            return false;
        };

        let image = item.image.as_deref().map(ImageAttachment::from_stored);

        self.state.question = item.question.clone();
        self.state.answer = item.answer.clone();
        self.state.image = image;
        self.state.error = None;
        self.state.show_history = false;
        true
    }

    pub fn set_history_visible(&mut self, visible: bool) {
        self.state.show_history = visible;
    }

    pub fn clear_history(&mut self) {
        if let Err(e) = self.history.clear() {
            tracing::warn!("Failed to clear history: {}", e);
        }
    }

    /// Returns the text to put on the clipboard and the token that must be passed to [`Controller::expire_copy`].
    pub fn copy_answer(&mut self) -> Option<(String, u64)> {
        if self.state.answer.is_empty() {
            return None;
        }
        self.copy_generation += 1;
        self.state.copied = true;
        Some((self.state.answer.clone(), self.copy_generation))
    }

    /// Clears the confirmation unless a newer copy has happened since.
    pub fn expire_copy(&mut self, generation: u64) {
        if generation == self.copy_generation {
            self.state.copied = false;
        }
    }
}
