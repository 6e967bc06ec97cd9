//! Error types for project persistence, export and image ingestion.
//!
//! Editing operations on the canvas never fail with an error: rejected
//! geometry is reported as a `false` return and leaves state untouched.
//! The enums here cover the file and codec boundaries only.

use thiserror::Error;

/// Errors raised while loading or saving a project document.
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Binary codec error: {0}")]
    Binary(#[from] bincode::Error),

    /// Magic tag or version string not recognised.
    #[error("Unsupported project format: {0}")]
    UnsupportedFormat(String),

    /// The document parsed but violates a structural invariant.
    #[error("Invalid project: {0}")]
    InvalidFormat(String),

    #[error("Invalid canvas size {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Errors raised while compositing or encoding an export.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("GIF encoding error: {0}")]
    Gif(#[from] gif::EncodingError),

    #[error("PNG encoding error: {0}")]
    Png(#[from] png::EncodingError),

    #[error("Nothing to export: the project has no frames")]
    NoFrames,

    #[error("Frame index {index} out of range ({count} frames)")]
    FrameOutOfRange { index: usize, count: usize },

    #[error("Exported image too large: {width}x{height}")]
    TooLarge { width: u32, height: u32 },
}

/// Errors raised while turning external images into grids.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Cell size must be at least 1x1 (got {width}x{height})")]
    ZeroCellSize { width: u32, height: u32 },

    #[error("Sheet {sheet_width}x{sheet_height} is smaller than one {cell_width}x{cell_height} cell")]
    SheetTooSmall {
        sheet_width: u32,
        sheet_height: u32,
        cell_width: u32,
        cell_height: u32,
    },
}

pub type ProjectResult<T> = Result<T, ProjectError>;
pub type ExportResult<T> = Result<T, ExportError>;
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_error_display() {
        let err = ProjectError::InvalidDimensions { width: 0, height: 16 };
        assert_eq!(err.to_string(), "Invalid canvas size 0x16");

        let err = ProjectError::UnsupportedFormat("PXF9".to_string());
        assert_eq!(err.to_string(), "Unsupported project format: PXF9");
    }

    #[test]
    fn test_export_error_display() {
        let err = ExportError::FrameOutOfRange { index: 4, count: 2 };
        assert_eq!(err.to_string(), "Frame index 4 out of range (2 frames)");
        assert_eq!(
            ExportError::NoFrames.to_string(),
            "Nothing to export: the project has no frames"
        );
    }

    #[test]
    fn test_import_error_display() {
        let err = ImportError::SheetTooSmall {
            sheet_width: 8,
            sheet_height: 8,
            cell_width: 16,
            cell_height: 16,
        };
        assert_eq!(err.to_string(), "Sheet 8x8 is smaller than one 16x16 cell");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ProjectError = io.into();
        assert!(matches!(err, ProjectError::Io(_)));
    }
}
