//! Service layer
//!
//! Rendering of a finished (or partial) distillation for export.

pub mod export;
pub mod pdf;

pub use export::{
    export_base_name, render_markdown, render_text, sanitize_filename, title_from_markdown,
    ExportMeta,
};
pub use pdf::render_pdf;
