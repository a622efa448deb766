//! Event system module
//!
//! Session events replace direct UI bindings: front ends subscribe to a
//! channel and render status, countdowns and notifications however they like.

pub mod emitter;
pub mod types;

pub use emitter::EventEmitter;
pub use types::{DistillEvent, NoticeLevel};
