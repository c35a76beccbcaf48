use std::sync::Arc;

/// Kind of failure a transformation ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Uncategorized failure raised by a collaborator.
    Unexpected,
    /// The source could not be loaded or demuxed.
    Source,
    /// Loading completed without producing a single track.
    NoOutputTracks,
    DecoderInitFailed,
    DecodingFailed,
    EncoderInitFailed,
    EncodingFailed,
    /// No encoder can produce the requested output format.
    EncodingFormatUnsupported,
    /// An audio or video effect failed.
    ProcessingFailed,
    /// The container writer rejected a state transition.
    MuxingFailed,
    /// The caller released the transformer before it ended.
    Cancelled,
}

impl ErrorCode {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::Unexpected => "unexpected",
            ErrorCode::Source => "source",
            ErrorCode::NoOutputTracks => "no_output_tracks",
            ErrorCode::DecoderInitFailed => "decoder_init_failed",
            ErrorCode::DecodingFailed => "decoding_failed",
            ErrorCode::EncoderInitFailed => "encoder_init_failed",
            ErrorCode::EncodingFailed => "encoding_failed",
            ErrorCode::EncodingFormatUnsupported => "encoding_format_unsupported",
            ErrorCode::ProcessingFailed => "processing_failed",
            ErrorCode::MuxingFailed => "muxing_failed",
            ErrorCode::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal failure of a transformation.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{code}: {message}")]
pub struct TransformationError {
    code: ErrorCode,
    message: String,
    #[source]
    cause: Option<Cause>,
}

impl TransformationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(code: ErrorCode, message: impl Into<String>, cause: anyhow::Error) -> Self {
        let cause: Box<dyn std::error::Error + Send + Sync + 'static> = cause.into();
        Self {
            code,
            message: message.into(),
            cause: Some(Arc::from(cause)),
        }
    }

    pub fn for_unexpected(cause: anyhow::Error) -> Self {
        Self::with_cause(ErrorCode::Unexpected, format!("{:#}", cause), cause)
    }

    pub fn for_source(cause: SourceError) -> Self {
        let message = cause.to_string();
        Self::with_cause(ErrorCode::Source, message, cause.into())
    }

    pub fn for_muxer(cause: MuxerError) -> Self {
        let message = cause.to_string();
        Self::with_cause(ErrorCode::MuxingFailed, message, cause.into())
    }

    pub fn no_output_tracks() -> Self {
        Self::new(
            ErrorCode::NoOutputTracks,
            "the output does not contain any tracks",
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "transformation released before it ended")
    }

    /// Classifies an error raised by a collaborator.
    ///
    /// A [`TransformationError`] passes through unchanged. A [`SourceError`]
    /// is tagged [`ErrorCode::Source`] and a [`MuxerError`] is tagged
    /// [`ErrorCode::MuxingFailed`]. Anything else becomes
    /// [`ErrorCode::Unexpected`].
    pub fn classify(error: anyhow::Error) -> Self {
        match error.downcast::<TransformationError>() {
            Ok(error) => error,
            Err(error) => match error.downcast::<SourceError>() {
                Ok(error) => Self::for_source(error),
                Err(error) => match error.downcast::<MuxerError>() {
                    Ok(error) => Self::for_muxer(error),
                    Err(error) => Self::for_unexpected(error),
                },
            },
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure of the layer that reads and demuxes the source.
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("failed to open {uri}: {reason}")]
    Open { uri: String, reason: String },

    #[error("failed to read source: {0}")]
    Read(String),

    #[error("failed to seek source to {position_ms}ms: {reason}")]
    Seek { position_ms: u64, reason: String },

    #[error("source track {index} cannot be handled: {reason}")]
    UnsupportedTrack { index: usize, reason: String },
}

/// Failure of the container writer.
#[derive(thiserror::Error, Debug)]
pub enum MuxerError {
    #[error("muxer is in an invalid state: {0}")]
    InvalidState(String),

    #[error("unsupported track format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to write sample: {0}")]
    Write(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn display_prefixes_with_code() {
        let err = TransformationError::new(ErrorCode::EncodingFailed, "boom");
        assert_eq!(err.to_string(), "encoding_failed: boom");
        assert_eq!(
            TransformationError::no_output_tracks().code(),
            ErrorCode::NoOutputTracks
        );
    }

    #[test]
    fn classify_passes_transformation_errors_through() {
        let original = TransformationError::new(ErrorCode::DecodingFailed, "bad frame");
        let classified = TransformationError::classify(anyhow::Error::new(original));
        assert_eq!(classified.code(), ErrorCode::DecodingFailed);
        assert_eq!(classified.message(), "bad frame");
    }

    #[test]
    fn classify_keeps_transformation_error_under_context() {
        let original = TransformationError::new(ErrorCode::EncoderInitFailed, "no encoder");
        let wrapped = anyhow::Error::new(original).context("creating video pipeline");
        let classified = TransformationError::classify(wrapped);
        assert_eq!(classified.code(), ErrorCode::EncoderInitFailed);
    }

    #[test]
    fn classify_tags_source_errors() {
        let classified =
            TransformationError::classify(SourceError::Read("truncated".into()).into());
        assert_eq!(classified.code(), ErrorCode::Source);
        assert!(classified.source().is_some());
    }

    #[test]
    fn classify_tags_muxer_errors() {
        let classified =
            TransformationError::classify(MuxerError::Write("disk full".into()).into());
        assert_eq!(classified.code(), ErrorCode::MuxingFailed);
    }

    #[test]
    fn classify_wraps_anything_else_as_unexpected() {
        let classified = TransformationError::classify(anyhow::anyhow!("surprise"));
        assert_eq!(classified.code(), ErrorCode::Unexpected);
        assert!(classified.message().contains("surprise"));
        assert!(classified.source().is_some());
    }
}
