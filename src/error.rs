use thiserror::Error;

/// Fatal failures. Per-edit problems are not errors; they surface as
/// [`crate::models::SkipReason`] entries in the report.
#[derive(Error, Debug)]
pub enum RedlineError {
    #[error("malformed package: {0}")]
    MalformedPackage(String),

    #[error("missing main document part (word/document.xml)")]
    MissingMainPart,

    #[error("malformed xml in {part}: {detail}")]
    MalformedXml { part: String, detail: String },

    #[error("comments part write failure: {0}")]
    CommentPartWriteFailure(String),

    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    #[error("document structure error: {0}")]
    Structure(String),

    #[error("invalid edit list: {0}")]
    InvalidEdits(String),
}

pub type Result<T> = std::result::Result<T, RedlineError>;
