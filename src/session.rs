use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::ConversationConfig;
use crate::diagnostics::{self, Kind};
use crate::history::{ChatMessage, ConversationLog};
use crate::worker::{BridgeError, WorkRequest, WorkerReply};

pub const EMPTY_SUBMISSION_NOTICE: &str = "Please, enter a description or upload an image.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingResponse,
}

/// The generated image currently on display. `revision` changes on every
/// replacement so the display can tell a fresh file from a cached one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSlot {
    pub path: PathBuf,
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("a request is already in flight")]
    Busy,
    #[error("nothing to send")]
    Empty,
}

/// Conversation state for one window: the log, the single-flight gate and
/// the generated-image slot.
#[derive(Debug, Default)]
pub struct Session {
    settings: ConversationConfig,
    log: ConversationLog,
    state: SessionState,
    pending: Option<WorkRequest>,
    generated_image: Option<ImageSlot>,
    revisions: u64,
}

impl Session {
    pub fn new(settings: ConversationConfig) -> Self {
        Session {
            settings,
            ..Default::default()
        }
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pending(&self) -> Option<&WorkRequest> {
        self.pending.as_ref()
    }

    pub fn generated_image(&self) -> Option<&ImageSlot> {
        self.generated_image.as_ref()
    }

    pub fn settings(&self) -> &ConversationConfig {
        &self.settings
    }

    /// Submit button, text input and image picker all follow this.
    pub fn input_enabled(&self) -> bool {
        self.state == SessionState::Idle
    }

    /// Open the gate for a new request. On success the user's entries are
    /// already in the log and the returned request must be handed to the
    /// worker.
    pub fn begin(&mut self, text: &str, image: Option<&Path>) -> Result<WorkRequest, SubmitError> {
        if self.state == SessionState::AwaitingResponse {
            tracing::debug!("submission ignored while awaiting response");
            return Err(SubmitError::Busy);
        }

        let text = text.trim();
        if text.is_empty() && image.is_none() {
            self.log.push(ChatMessage::system(EMPTY_SUBMISSION_NOTICE));
            return Err(SubmitError::Empty);
        }

        if !text.is_empty() {
            self.log.push(ChatMessage::user(format!("**You:** {}", text)));
        }
        let request = match image {
            Some(path) => {
                self.log.push(
                    ChatMessage::user(format!("**You sent an image** {}", path.display()))
                        .with_image(path),
                );
                WorkRequest::image(path, (!text.is_empty()).then(|| text.to_string()))
            }
            None => WorkRequest::text(text),
        };

        tracing::debug!(kind = ?request.kind, "awaiting worker response");
        self.pending = Some(request.clone());
        self.state = SessionState::AwaitingResponse;
        Ok(request)
    }

    /// Apply the terminal outcome of the pending request. Returns the new
    /// image slot when the displayed image changed.
    pub fn finish(&mut self, outcome: Result<WorkerReply, BridgeError>) -> Option<ImageSlot> {
        if self.state != SessionState::AwaitingResponse {
            tracing::warn!("worker outcome arrived with no request pending, dropping it");
            return None;
        }

        match outcome {
            Ok(reply) => {
                self.release();
                let mut message = ChatMessage::system(reply.text);
                if let Some(path) = &reply.image {
                    message = message.with_image(path.clone());
                }
                self.log.push(message);

                match reply.image {
                    Some(path) if self.settings.image_panel => Some(self.replace_image(path)),
                    _ => None,
                }
            }
            Err(err) => {
                let detail = match &err {
                    BridgeError::Exit { stderr, .. } if !stderr.is_empty() => {
                        format!("{}\n{}", err, stderr)
                    }
                    _ => err.to_string(),
                };
                diagnostics::record(Kind::Error, detail);

                if self.settings.reenable_on_error {
                    self.release();
                    if self.settings.surface_errors {
                        self.log
                            .push(ChatMessage::system(format!("**Something went wrong:** {}", err)));
                    }
                }
                None
            }
        }
    }

    fn release(&mut self) {
        self.pending = None;
        self.state = SessionState::Idle;
    }

    fn replace_image(&mut self, path: PathBuf) -> ImageSlot {
        if let Some(previous) = self.generated_image.take() {
            tracing::debug!(path = %previous.path.display(), "removing previous generated image");
        }
        self.revisions += 1;
        let slot = ImageSlot {
            path,
            revision: self.revisions,
        };
        self.generated_image = Some(slot.clone());
        slot
    }
}
