use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::TransformationError;
use crate::request::TransformationRequest;
use crate::result::TransformationResult;

/// Receives the terminal outcome of a transformation.
///
/// Exactly one of `on_completed` / `on_error` is called per run. Callbacks
/// run on the control task and should return quickly.
pub trait Listener: Send + Sync {
    fn on_completed(&self, result: TransformationResult);

    fn on_error(&self, error: TransformationError);

    /// Called once every track has settled on the parameters it applies,
    /// if those differ from what was requested.
    fn on_fallback_applied(
        &self,
        _original: &TransformationRequest,
        _fallback: &TransformationRequest,
    ) {
    }
}

pub type Outcome = Result<TransformationResult, TransformationError>;

/// Forwards the terminal outcome to a `oneshot` receiver.
pub struct ChannelListener {
    tx: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl ChannelListener {
    pub fn new() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    fn send(&self, outcome: Outcome) {
        match self.tx.lock().take() {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    log::debug!("transformation outcome receiver dropped");
                }
            }
            None => log::warn!("transformation outcome already delivered"),
        }
    }
}

impl Listener for ChannelListener {
    fn on_completed(&self, result: TransformationResult) {
        self.send(Ok(result));
    }

    fn on_error(&self, error: TransformationError) {
        self.send(Err(error));
    }

    fn on_fallback_applied(&self, original: &TransformationRequest, fallback: &TransformationRequest) {
        log::info!("fallback applied: {:?} -> {:?}", original, fallback);
    }
}

/// Logs the outcome. Used when no listener is configured.
#[derive(Debug, Default)]
pub struct LogListener;

impl Listener for LogListener {
    fn on_completed(&self, result: TransformationResult) {
        log::info!("transformation completed: {:?}", result);
    }

    fn on_error(&self, error: TransformationError) {
        log::error!("transformation failed: {}", error);
    }

    fn on_fallback_applied(&self, original: &TransformationRequest, fallback: &TransformationRequest) {
        log::info!("fallback applied: {:?} -> {:?}", original, fallback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn channel_listener_delivers_first_outcome_only() {
        let (listener, rx) = ChannelListener::new();
        listener.on_error(TransformationError::cancelled());
        listener.on_completed(TransformationResult::default());

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap_err().code(), ErrorCode::Cancelled);
    }
}
