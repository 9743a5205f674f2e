use std::path::Path;
use std::sync::Arc;

use crate::session::{ImageSlot, Session, SubmitError};
use crate::worker::{BoxFuture, BridgeError, ExternalWorker, WorkerReply};

pub type Outcome = Result<WorkerReply, BridgeError>;

/// Drives a [`Session`] against an [`ExternalWorker`].
///
/// `submit` hands back the worker future instead of awaiting it, so the UI
/// loop stays responsive; whoever polls it passes the result to `deliver`.
pub struct Controller {
    session: Session,
    worker: Arc<dyn ExternalWorker>,
}

impl Controller {
    pub fn new(session: Session, worker: Arc<dyn ExternalWorker>) -> Self {
        Controller { session, worker }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn submit(
        &mut self,
        text: &str,
        image: Option<&Path>,
    ) -> Result<BoxFuture<'static, Outcome>, SubmitError> {
        let request = self.session.begin(text, image)?;
        Ok(self.worker.invoke(request))
    }

    pub fn deliver(&mut self, outcome: Outcome) -> Option<ImageSlot> {
        self.session.finish(outcome)
    }

    /// Submit and wait for the worker in one go.
    #[cfg(test)]
    pub async fn round_trip(
        &mut self,
        text: &str,
        image: Option<&Path>,
    ) -> Result<Option<ImageSlot>, SubmitError> {
        let pending = self.submit(text, image)?;
        let outcome = pending.await;
        Ok(self.deliver(outcome))
    }
}
