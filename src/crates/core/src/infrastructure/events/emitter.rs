use super::types::{DistillEvent, NoticeLevel};
use log::{debug, warn};
use tokio::sync::mpsc;

/// Fire-and-forget event publisher.
///
/// An emitter without a subscriber drops events silently; a closed
/// subscriber is logged once per event and otherwise ignored.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<DistillEvent>>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<DistillEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Emitter with no subscriber.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Create an emitter together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DistillEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: DistillEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.send(event) {
            warn!("Failed to emit distill event: event={:?}", e.0);
        }
    }

    pub fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        debug!("Distill notice: level={:?}, message={}", level, message);
        self.emit(DistillEvent::Notice { level, message });
    }
}
