//! Error types for combine, apply and projection operations.

use thiserror::Error;

use crate::buffer::Encoding;
use crate::item::ItemId;

/// Errors surfaced by the compositing core.
///
/// Zero-area clips are not errors; those operations succeed with nothing to do.
#[derive(Debug, Error)]
pub enum CompositeError {
    /// No combination routine exists for this (destination, source) pairing.
    #[error("illegal combination: cannot combine {src} source onto {dest} destination")]
    IllegalCombination { dest: Encoding, src: Encoding },

    /// The referenced layer or channel is not part of the image.
    #[error("unknown item {0}")]
    UnknownItem(ItemId),

    /// A mask buffer was not one-channel or too small for its region.
    #[error("mask mismatch: {0}")]
    MaskSizeMismatch(String),

    /// A source buffer's encoding doesn't fit the target drawable.
    #[error("encoding mismatch: expected {expected}, got {actual}")]
    EncodingMismatch { expected: Encoding, actual: Encoding },

    /// Invalid settings or CLI input.
    #[error("settings error: {0}")]
    Settings(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, CompositeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_combination_names_both_encodings() {
        let err = CompositeError::IllegalCombination {
            dest: Encoding::GrayA,
            src: Encoding::Indexed,
        };
        let msg = err.to_string();
        assert!(msg.contains("GrayA"), "message was: {msg}");
        assert!(msg.contains("Indexed"), "message was: {msg}");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "layer.png");
        let err: CompositeError = io.into();
        assert!(matches!(err, CompositeError::Io(_)));
    }
}
