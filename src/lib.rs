pub mod diff;
pub mod docx;
pub mod error;
pub mod models;
pub mod progress;

use chrono::{DateTime, Utc};

pub use docx::package::Document;
pub use error::RedlineError;
pub use models::{Edit, EditOperation, Report, SkipReason};

/// Opens a word-processing archive for one open -> apply -> save cycle.
pub fn open_document(bytes: &[u8]) -> Result<Document, RedlineError> {
    Document::open(bytes)
}

/// Materializes `edits` as tracked changes attributed to `author` at `now`.
pub fn apply_edits(
    doc: &mut Document,
    edits: &[Edit],
    author: &str,
    now: DateTime<Utc>,
) -> Result<Report, RedlineError> {
    docx::engine::apply_edits(doc, edits, author, now)
}

/// Serializes the document; untouched parts come back byte-for-byte.
pub fn save_document(doc: &Document) -> Result<Vec<u8>, RedlineError> {
    doc.save()
}
