use dissimilar::Chunk;

use crate::models::{Edit, EditOperation};

const ANCHOR_TAIL_CHARS: usize = 50;

/// Derives structured edits from two plain texts.
///
/// Deletions target the removed text; insertions anchor on the tail of the
/// preceding unchanged chunk; a DELETE directly followed by an INSERT in the
/// produced edit list collapses into one MODIFY, even when unchanged text
/// sits between them in the raw diff. Every edit carries the occurrence
/// index of its target so repeated strings resolve to the right match.
pub fn edits_from_texts(original: &str, modified: &str) -> Vec<Edit> {
    let chunks = dissimilar::diff(original, modified);
    let mut edits = Vec::new();

    // Position of the cursor in `original`; insert chunks do not advance it.
    let mut cursor = 0usize;
    let mut last_equal: &str = "";

    for (i, chunk) in chunks.iter().enumerate() {
        match *chunk {
            Chunk::Equal(text) => {
                last_equal = text;
                cursor += text.len();
            }
            Chunk::Delete(deleted) => {
                let occurrence = occurrence_at(original, deleted, cursor);
                edits.push(Edit::delete(deleted).with_occurrence(occurrence));
                cursor += deleted.len();
            }
            Chunk::Insert(inserted) => {
                if last_equal.is_empty() {
                    if let Some(edit) = start_of_document_insert(&chunks, i, inserted) {
                        edits.push(edit);
                    }
                    // No anchor and no following text: nothing to attach to.
                } else {
                    let anchor = tail_chars(last_equal, ANCHOR_TAIL_CHARS);
                    let anchor_start = cursor - anchor.len();
                    let occurrence = occurrence_at(original, anchor, anchor_start);
                    edits.push(Edit::insert(anchor, inserted).with_occurrence(occurrence));
                }
            }
        }
    }
    merge_adjacent_replacements(edits)
}

/// Collapses DELETE + INSERT pairs that sit next to each other in the edit
/// list into one MODIFY. Equal chunks never enter the list, so a deletion
/// pairs with the next insertion even across unchanged text in the raw
/// diff; the MODIFY keeps the deletion's target and occurrence.
fn merge_adjacent_replacements(edits: Vec<Edit>) -> Vec<Edit> {
    let mut merged = Vec::with_capacity(edits.len());
    let mut iter = edits.into_iter().peekable();
    while let Some(current) = iter.next() {
        if current.operation == EditOperation::Delete
            && iter
                .peek()
                .is_some_and(|next| next.operation == EditOperation::Insert)
        {
            let next = iter.next().expect("peeked insert");
            merged.push(Edit {
                operation: EditOperation::Modify,
                target: current.target,
                new_text: next.new_text,
                comment: None,
                occurrence: current.occurrence,
            });
            continue;
        }
        merged.push(current);
    }
    merged
}

/// An insertion before any unchanged text cannot be anchored; rewrite it as
/// a modification of the first word that follows, so the engine sees a
/// concrete target.
fn start_of_document_insert(chunks: &[Chunk], i: usize, inserted: &str) -> Option<Edit> {
    let Some(Chunk::Equal(next_text)) = chunks.get(i + 1) else {
        return None;
    };
    let target = match next_text.split_once(' ') {
        Some((word, _)) if !word.is_empty() => word,
        _ => head_chars(next_text, 20),
    };
    if target.is_empty() {
        return None;
    }
    Some(Edit::modify(target, format!("{inserted}{target}")))
}

/// 0-based index of the non-overlapping match of `target` starting at
/// `pos`, under the same scan the engine resolves with.
fn occurrence_at(original: &str, target: &str, pos: usize) -> usize {
    original
        .match_indices(target)
        .position(|(start, _)| start == pos)
        .unwrap_or(0)
}

fn tail_chars(s: &str, n: usize) -> &str {
    let mut boundary = s.len();
    for (count, (idx, _)) in s.char_indices().rev().enumerate() {
        if count >= n {
            break;
        }
        boundary = idx;
    }
    &s[boundary..]
}

fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
