use serde::{Deserialize, Serialize};

use crate::error::RedlineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EditOperation {
    Insert,
    Delete,
    Modify,
}

/// A single semantic edit over the document's flat text.
///
/// For INSERT, `target` is the anchor text immediately preceding the
/// insertion point (empty anchor means position 0). For DELETE and MODIFY it
/// is the exact text to change. `occurrence` selects the 0-based nth literal
/// match when the target repeats.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edit {
    pub operation: EditOperation,
    #[serde(alias = "original", alias = "target_text")]
    pub target: String,
    #[serde(default, alias = "replace", skip_serializing_if = "Option::is_none")]
    pub new_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub occurrence: usize,
}

impl Edit {
    pub fn delete(target: impl Into<String>) -> Self {
        Self {
            operation: EditOperation::Delete,
            target: target.into(),
            new_text: None,
            comment: None,
            occurrence: 0,
        }
    }

    pub fn insert(anchor: impl Into<String>, new_text: impl Into<String>) -> Self {
        Self {
            operation: EditOperation::Insert,
            target: anchor.into(),
            new_text: Some(new_text.into()),
            comment: None,
            occurrence: 0,
        }
    }

    pub fn modify(target: impl Into<String>, new_text: impl Into<String>) -> Self {
        Self {
            operation: EditOperation::Modify,
            target: target.into(),
            new_text: Some(new_text.into()),
            comment: None,
            occurrence: 0,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_occurrence(mut self, occurrence: usize) -> Self {
        self.occurrence = occurrence;
        self
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct LooseEdit {
    operation: Option<EditOperation>,
    #[serde(alias = "original", alias = "target_text")]
    target: Option<String>,
    #[serde(alias = "replace")]
    new_text: Option<String>,
    comment: Option<String>,
    #[serde(default)]
    occurrence: usize,
}

/// Parses a JSON edit list, accepting both the strict wire schema and the
/// loose form: `original`/`replace` key aliases, and operation inference
/// when `operation` is absent (target+new -> MODIFY, target only -> DELETE,
/// new only -> INSERT). Entries with neither target nor new text are dropped.
pub fn parse_edits_json(json: &str) -> Result<Vec<Edit>, RedlineError> {
    let loose: Vec<LooseEdit> = serde_json::from_str(json)
        .map_err(|e| RedlineError::InvalidEdits(e.to_string()))?;

    let mut edits = Vec::with_capacity(loose.len());
    for item in loose {
        let target = item.target.unwrap_or_default();
        let has_target = !target.is_empty();
        let has_new = item.new_text.as_deref().is_some_and(|t| !t.is_empty());
        let operation = match item.operation {
            Some(op) => op,
            None if has_target && has_new => EditOperation::Modify,
            None if has_target => EditOperation::Delete,
            None if has_new => EditOperation::Insert,
            None => continue,
        };
        edits.push(Edit {
            operation,
            target,
            new_text: item.new_text,
            comment: item.comment,
            occurrence: item.occurrence,
        });
    }
    Ok(edits)
}

/// Why an individual edit was not applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TargetNotFound,
    AnchorNotFound,
    EmptyTarget,
    OverlapConflict,
}

#[derive(Clone, Debug, Serialize)]
pub struct SkippedEdit {
    /// Position of the edit in the input list.
    pub index: usize,
    pub operation: EditOperation,
    pub target: String,
    pub reason: SkipReason,
}

/// Outcome of one `apply_edits` batch.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Report {
    /// Edits whose target/anchor resolved against the flat text.
    pub resolved: usize,
    /// Edits materialized as revision markup.
    pub applied: usize,
    pub skipped: Vec<SkippedEdit>,
}
