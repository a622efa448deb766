//! Infrastructure layer
//!
//! Provider clients, settings storage, diagnostics trace and session events.

pub mod ai;
pub mod events;
pub mod storage;
pub mod trace;
