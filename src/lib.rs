//! PixelForge: the raster engine of a frame-by-frame pixel-art editor.
//!
//! The crate owns the editable document ([`canvas::CanvasState`]), the
//! snapshot undo stack ([`components::history::HistoryManager`]), the
//! pointer-driven tool state machine ([`components::tools::ToolController`])
//! and the floating-region transform engine ([`ops::transform`]). Files,
//! exports and image ingestion live at the edges in [`io`] and
//! [`ops::import`]. [`project::Project`] ties one editing session together.

pub mod canvas;
pub mod cli;
pub mod components;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod settings;
