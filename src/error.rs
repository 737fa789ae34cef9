//! The error type shared by every part of the engine.

use thiserror::Error;

use crate::layer::LayerId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A buffer or mask was requested with a zero or oversized dimension, or two buffers which
    /// must agree in size don't.
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimension { width: u32, height: u32 },
    /// A pixel access fell outside the buffer
    #[error("pixel ({x}, {y}) is out of bounds")]
    OutOfBounds { x: u32, y: u32 },
    /// An adjustment was missing a required parameter or was given an unusable value
    #[error("invalid parameter {name:?}: {reason}")]
    InvalidParameter { name: String, reason: String },
    /// A file couldn't be read or decoded
    #[error("couldn't load file: {0}")]
    LoadError(String),
    /// A file couldn't be encoded or written
    #[error("couldn't save file: {0}")]
    SaveError(String),
    /// Undo was requested past the oldest state still retained by the history
    #[error("no further undo: older history has been discarded")]
    HistoryTruncated,
    /// No layer with this id is in the document
    #[error("no layer with id {0:?}")]
    UnknownLayer(LayerId),
    /// A structural edit would break the layer tree (e.g. moving a group into itself)
    #[error("invalid layer structure: {0}")]
    InvalidStructure(String),
    /// An edit session was started while another one is still open
    #[error("another edit is still in progress")]
    EditInProgress,

    // Failures from the libraries at the I/O boundary.  Loading and saving map these to
    // `LoadError`/`SaveError` with the path attached; these variants catch the rest.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn param(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }

    /// Errors which come from the file system (or file contents) and should be shown to the user
    /// rather than treated as programming errors.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::LoadError(_)
                | Self::SaveError(_)
                | Self::HistoryTruncated
                | Self::Image(_)
                | Self::Io(_)
                | Self::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_their_details() {
        let err = Error::param("radius", "must be positive");
        assert_eq!(err.to_string(), "invalid parameter \"radius\": must be positive");
        let err = Error::InvalidDimension { width: 0, height: 7 };
        assert!(err.to_string().contains("0x7"));
    }

    #[test]
    fn library_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_user_facing());

        let json = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: Error = json.into();
        assert!(matches!(err, Error::Json(_)));
        assert!(!Error::EditInProgress.is_user_facing());
    }
}
