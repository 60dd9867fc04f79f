//! Error types for the `convertify` crate.
//!
//! This module defines [`ConvertError`], the unified error type returned by
//! every fallible operation in the crate. Variants carry the path, codec name,
//! or FFmpeg error code needed to render a useful message without re-deriving
//! anything from the engine.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `convertify` operations.
///
/// Setup failures (opening files, codecs, filter graphs) abort a job before
/// any frame is processed. Failures inside the frame loop abort the remainder
/// of the job. In both cases every native resource acquired so far has been
/// released by the time the error reaches the caller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConvertError {
    /// The input container could not be opened or parsed.
    #[error("Failed to open input at {path}: {reason}")]
    OpenInputFailed {
        /// Path that was passed to the prober or pipeline.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The container opened but its stream parameters could not be read.
    #[error("Failed to read stream information from {path}: {reason}")]
    StreamInfoUnavailable {
        /// Path of the input file.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// The input has no audio or video stream the engine can use.
    #[error("No audio or video stream found in {path}")]
    NoStreamsFound {
        /// Path of the input file.
        path: PathBuf,
    },

    /// The job needs a video stream and the input has none.
    #[error("No video stream found in input")]
    NoVideoStream,

    /// The job needs an audio stream and the input has none.
    #[error("No audio stream found in input")]
    NoAudioStream,

    /// No decoder or encoder is available for the named codec.
    #[error("Codec not found: {0}")]
    CodecNotFound(String),

    /// A codec was found but refused to open with the given parameters.
    #[error("Failed to open codec {codec}: {reason}")]
    CodecOpenFailed {
        /// Codec or encoder name.
        codec: String,
        /// Underlying reason.
        reason: String,
    },

    /// The requested output container or image format cannot be produced.
    #[error("Unsupported output format: {0}")]
    OutputFormatUnsupported(String),

    /// The output file could not be created.
    #[error("Failed to open output at {path}: {reason}")]
    OutputOpenFailed {
        /// Path of the output file.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// The muxer rejected the container header.
    #[error("Failed to write container header: {0}")]
    HeaderWriteFailed(String),

    /// A filter chain was malformed, named an unknown filter, or failed at
    /// runtime.
    #[error("Invalid filter graph: {0}")]
    FilterGraphInvalid(String),

    /// Demuxing or decoding failed inside the frame loop.
    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    /// Encoding failed inside the frame loop or while flushing.
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    /// Writing packets or the container trailer failed.
    #[error("Muxing failed: {0}")]
    MuxingFailed(String),

    /// A hardware device could not be created.
    #[error("Hardware acceleration unavailable: {0}")]
    HardwareAccelerationUnavailable(String),

    /// The job description is inconsistent (e.g. start after end).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The job was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// An error originating from the FFmpeg libraries that has no more
    /// specific variant.
    #[error("FFmpeg error {code}: {message}")]
    FfmpegError {
        /// Raw FFmpeg error code (negative `AVERROR` value).
        code: i32,
        /// Human-readable FFmpeg message.
        message: String,
    },

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while writing icon output.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),
}

impl ConvertError {
    /// Returns `true` for [`ConvertError::Cancelled`].
    ///
    /// Front ends use this to avoid presenting a user-initiated cancellation
    /// as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConvertError::Cancelled)
    }
}

impl From<FfmpegError> for ConvertError {
    fn from(error: FfmpegError) -> Self {
        ConvertError::FfmpegError {
            code: i32::from(error),
            message: error.to_string(),
        }
    }
}
