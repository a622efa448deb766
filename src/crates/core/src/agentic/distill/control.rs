//! Run/pause flags shared between a running session and its handles.

use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct SessionControl {
    running: AtomicBool,
    paused: AtomicBool,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Session ended on its own (complete or budget).
    pub(crate) fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Keep issuing and waiting on requests.
    pub fn should_continue(&self) -> bool {
        self.is_running() && !self.is_paused()
    }
}

/// Cloneable remote for pausing or stopping a running session.
#[derive(Debug, Clone)]
pub struct DistillHandle {
    control: Arc<SessionControl>,
}

impl DistillHandle {
    pub(crate) fn new(control: Arc<SessionControl>) -> Self {
        Self { control }
    }

    pub fn pause(&self) {
        debug!("Distill pause requested");
        self.control.pause();
    }

    /// Clears the pause flag. The orchestrator's `resume` re-enters the loop.
    pub fn resume(&self) {
        self.control.resume();
    }

    /// Returns true when the session is now paused.
    pub fn toggle_pause(&self) -> bool {
        if self.control.is_paused() {
            self.control.resume();
            false
        } else {
            self.control.pause();
            true
        }
    }

    pub fn stop(&self) {
        debug!("Distill stop requested");
        self.control.stop();
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_and_stop_block_continuation() {
        let control = Arc::new(SessionControl::new());
        let handle = DistillHandle::new(control.clone());
        assert!(!control.should_continue());

        control.begin();
        assert!(control.should_continue());
        assert!(handle.toggle_pause());
        assert!(!control.should_continue());
        assert!(!handle.toggle_pause());
        assert!(control.should_continue());

        handle.stop();
        handle.stop();
        assert!(!control.should_continue());
        assert!(!handle.is_running());
    }
}
