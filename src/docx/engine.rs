use chrono::{DateTime, Utc};

use crate::docx::comments::{anchor_comment, append_comment, initials_for, next_comment_id};
use crate::docx::mapper::{isolate_slice, split_for_insert, DocumentMap};
use crate::docx::package::Document;
use crate::docx::xml::{NodeId, XmlTree};
use crate::error::RedlineError;
use crate::models::{Edit, EditOperation, Report, SkipReason, SkippedEdit};

/// Applies a batch of edits to an opened document as tracked changes.
///
/// Every edit is resolved against one flat index built before any mutation;
/// survivors are applied back-to-front (range start descending) so earlier
/// mutations never shift a later edit's precomputed position. Revision and
/// comment ids are allocated in input order regardless of application order.
///
/// Unresolvable and conflicting edits are skipped and reported; any failure
/// after resolution is fatal and the document must be discarded.
pub fn apply_edits(
    doc: &mut Document,
    edits: &[Edit],
    author: &str,
    now: DateTime<Utc>,
) -> Result<Report, RedlineError> {
    let map = DocumentMap::build(doc.main())?;
    let date = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let initials = initials_for(author);

    let mut report = Report::default();
    let mut accepted: Vec<ResolvedEdit> = Vec::new();
    let mut next_rev = max_revision_id(doc.main()) + 1;

    for (index, edit) in edits.iter().enumerate() {
        let skip = |reason| SkippedEdit {
            index,
            operation: edit.operation,
            target: edit.target.clone(),
            reason,
        };
        let range = match resolve(&map, edit) {
            Ok(range) => range,
            Err(reason) => {
                report.skipped.push(skip(reason));
                continue;
            }
        };
        report.resolved += 1;

        if accepted
            .iter()
            .any(|other| range.0 < other.end && other.start < range.1)
        {
            report.skipped.push(skip(SkipReason::OverlapConflict));
            continue;
        }

        let operation = effective_operation(edit);
        accepted.push(ResolvedEdit {
            start: range.0,
            end: range.1,
            operation,
            new_text: edit.new_text.clone().unwrap_or_default(),
            comment: edit.comment.clone(),
            rev_id: next_rev,
            comment_id: None,
        });
        next_rev += 1;
    }

    let wants_comments = accepted.iter().any(|e| e.comment.is_some());
    if wants_comments {
        let mut next_comment = next_comment_id(doc.comments_mut()?);
        for edit in accepted.iter_mut().filter(|e| e.comment.is_some()) {
            edit.comment_id = Some(next_comment);
            next_comment += 1;
        }
    }

    // Back-to-front: start descending, then end descending; stable, so
    // same-position edits keep input order.
    accepted.sort_by(|a, b| b.start.cmp(&a.start).then(b.end.cmp(&a.end)));

    let mut pending_comments: Vec<(u64, String)> = Vec::new();
    for edit in &accepted {
        let emitted = {
            let tree = doc.main_mut();
            match edit.operation {
                EditOperation::Delete => apply_delete(tree, &map, edit, author, &date)?,
                EditOperation::Insert => apply_insert(tree, &map, edit, author, &date)?,
                EditOperation::Modify => apply_modify(tree, &map, edit, author, &date)?,
            }
        };
        if let (Some(comment_id), Some(comment)) = (edit.comment_id, edit.comment.as_deref()) {
            anchor_comment(
                doc.main_mut(),
                comment_id,
                emitted.first,
                emitted.last,
                emitted.last_run,
            )?;
            pending_comments.push((comment_id, comment.to_string()));
        }
        report.applied += 1;
    }

    if wants_comments {
        // Records land in the part in id order, not application order.
        pending_comments.sort_by_key(|(id, _)| *id);
        let comments = doc.comments_mut()?;
        for (id, text) in &pending_comments {
            append_comment(comments, *id, author, &initials, &date, text)?;
        }
        doc.ensure_comments_relationship()?;
    }
    Ok(report)
}

struct ResolvedEdit {
    start: usize,
    end: usize,
    operation: EditOperation,
    new_text: String,
    comment: Option<String>,
    rev_id: u64,
    comment_id: Option<u64>,
}

/// Elements one edit materialized, for comment anchoring: the outermost
/// first/last (parent, element) pairs plus the run whose properties a
/// comment reference inherits.
struct EmittedElements {
    first: (NodeId, NodeId),
    last: (NodeId, NodeId),
    last_run: NodeId,
}

fn resolve(map: &DocumentMap, edit: &Edit) -> Result<(usize, usize), SkipReason> {
    match edit.operation {
        EditOperation::Insert => {
            if edit.new_text.as_deref().unwrap_or("").is_empty() {
                return Err(SkipReason::EmptyTarget);
            }
            let pos = if edit.target.is_empty() {
                // Beginning-of-document insertion; the upstream
                // MODIFY-of-first-character encoding is accepted too.
                0
            } else {
                map.find_occurrence(&edit.target, edit.occurrence)
                    .ok_or(SkipReason::AnchorNotFound)?
                    .1
            };
            // The insertion point must touch a run: inside one, at its end,
            // or at the start of the one that follows a paragraph break. An
            // anchor ending mid-gap has nothing to attach to.
            let anchored = map.entry_ending_at_or_after(pos).is_some()
                || map.entry_starting_at(pos).is_some()
                || (pos == 0 && !map.entries.is_empty());
            if !anchored {
                return Err(SkipReason::AnchorNotFound);
            }
            Ok((pos, pos))
        }
        EditOperation::Delete | EditOperation::Modify => {
            if edit.target.is_empty() {
                return Err(SkipReason::EmptyTarget);
            }
            let (start, end) = map
                .find_occurrence(&edit.target, edit.occurrence)
                .ok_or(SkipReason::TargetNotFound)?;
            // Deleting across a paragraph boundary would have to remove the
            // paragraph break itself; refuse rather than half-apply.
            if map.crosses_gap(start, end) {
                return Err(SkipReason::OverlapConflict);
            }
            Ok((start, end))
        }
    }
}

/// MODIFY without replacement text degrades to DELETE.
fn effective_operation(edit: &Edit) -> EditOperation {
    match edit.operation {
        EditOperation::Modify if edit.new_text.as_deref().unwrap_or("").is_empty() => {
            EditOperation::Delete
        }
        op => op,
    }
}

fn revision_attrs(tree: &mut XmlTree, el: NodeId, rev_id: u64, author: &str, date: &str) {
    tree.set_attr(el, "w:id", &rev_id.to_string());
    tree.set_attr(el, "w:author", author);
    tree.set_attr(el, "w:date", date);
}

fn apply_delete(
    tree: &mut XmlTree,
    map: &DocumentMap,
    edit: &ResolvedEdit,
    author: &str,
    date: &str,
) -> Result<EmittedElements, RedlineError> {
    let slices = map.slices_for(edit.start, edit.end);
    if slices.is_empty() {
        return Err(RedlineError::Structure(
            "resolved delete range covers no runs".to_string(),
        ));
    }

    let mut runs: Vec<(NodeId, NodeId)> = Vec::with_capacity(slices.len());
    for slice in &slices {
        let entry = &map.entries[slice.entry];
        let run = isolate_slice(tree, entry, slice.local_start, slice.local_end)?;
        runs.push((entry.parent, run));
    }

    // Adjacent sibling runs share one wrapper; a gap in sibling positions
    // (bookmarks, tab-only runs) starts a new one so nothing reorders.
    let mut groups: Vec<(NodeId, Vec<NodeId>)> = Vec::new();
    for &(parent, run) in &runs {
        let adjacent = groups.last().is_some_and(|(gp, members)| {
            *gp == parent
                && members.last().copied().and_then(|m| tree.child_pos(parent, m))
                    .zip(tree.child_pos(parent, run))
                    .is_some_and(|(prev, cur)| cur == prev + 1)
        });
        if adjacent {
            groups.last_mut().expect("group exists").1.push(run);
        } else {
            groups.push((parent, vec![run]));
        }
    }

    let mut wrappers: Vec<(NodeId, NodeId)> = Vec::new();
    let mut last_run = runs.last().expect("runs nonempty").1;
    for (parent, members) in groups {
        let del = tree.new_element("w:del");
        revision_attrs(tree, del, edit.rev_id, author, date);
        let pos = tree
            .child_pos(parent, members[0])
            .ok_or_else(|| RedlineError::Structure("run left its parent".to_string()))?;
        for &run in &members {
            tree.remove_child(parent, run);
        }
        tree.insert_child_at(parent, pos, del);
        for &run in &members {
            tree.push_child(del, run);
            retag_deleted_text(tree, run);
        }
        last_run = *members.last().expect("group nonempty");
        wrappers.push((parent, del));
    }

    Ok(EmittedElements {
        first: wrappers[0],
        last: *wrappers.last().expect("wrappers nonempty"),
        last_run,
    })
}

/// Inside a deletion, live text becomes deletion text so consumers never
/// render it as current content.
fn retag_deleted_text(tree: &mut XmlTree, run: NodeId) {
    for child in tree.children(run).to_vec() {
        if tree.elem_name(child) == Some("w:t") {
            if let Some(el) = tree.elem_mut(child) {
                el.name = "w:delText".to_string();
            }
            let text = tree.text_content(child);
            if text != text.trim() {
                tree.set_attr(child, "xml:space", "preserve");
            }
        }
    }
}

fn apply_insert(
    tree: &mut XmlTree,
    map: &DocumentMap,
    edit: &ResolvedEdit,
    author: &str,
    date: &str,
) -> Result<EmittedElements, RedlineError> {
    let pos = edit.start;

    let (anchor, following, parent) = match map.entry_ending_at_or_after(pos) {
        Some(entry_idx) => {
            let local = pos - map.entries[entry_idx].start;
            let (anchor, following) = split_for_insert(tree, map, entry_idx, local)?;
            (Some(anchor), following, map.entries[entry_idx].parent)
        }
        None => {
            // No run contains the point: it sits at the start of a
            // paragraph (or of the document). Place before the next run.
            let idx = map
                .entry_starting_at(pos)
                .or_else(|| (pos == 0 && !map.entries.is_empty()).then_some(0))
                .ok_or_else(|| {
                    RedlineError::Structure("insertion point touches no run".to_string())
                })?;
            let entry = &map.entries[idx];
            (None, Some(entry.run), entry.parent)
        }
    };

    let style_source = pick_style_source(&edit.new_text, anchor, following);
    let (ins, new_run) = build_ins_wrapper(tree, edit, style_source, author, date)?;

    // A previously applied edit may have wrapped the placement run in a
    // revision element; the insertion then goes next to that wrapper.
    let placed = match anchor {
        Some(anchor_run) => {
            let site = sibling_under(tree, parent, anchor_run)?;
            tree.insert_after(parent, site, ins)
        }
        None => {
            let before = following.expect("placement run exists");
            let site = sibling_under(tree, parent, before)?;
            tree.insert_before(parent, site, ins)
        }
    };
    if !placed {
        return Err(RedlineError::Structure(
            "insertion anchor left its parent".to_string(),
        ));
    }
    Ok(EmittedElements {
        first: (parent, ins),
        last: (parent, ins),
        last_run: new_run,
    })
}

fn apply_modify(
    tree: &mut XmlTree,
    map: &DocumentMap,
    edit: &ResolvedEdit,
    author: &str,
    date: &str,
) -> Result<EmittedElements, RedlineError> {
    let deleted = apply_delete(tree, map, edit, author, date)?;

    // The replacement clones the last deleted run's properties.
    let (ins, _) = build_ins_wrapper(tree, edit, Some(deleted.last_run), author, date)?;

    let (parent, del) = deleted.first;
    if !tree.insert_before(parent, del, ins) {
        return Err(RedlineError::Structure(
            "deletion wrapper left its parent".to_string(),
        ));
    }
    Ok(EmittedElements {
        first: (parent, ins),
        last: deleted.last,
        last_run: deleted.last_run,
    })
}

/// The style-inheritance rule: text ending in whitespace reads as the prefix
/// of the next word, so it matches the following run when one exists;
/// everything else matches the run it was anchored after.
fn pick_style_source(
    new_text: &str,
    anchor: Option<NodeId>,
    following: Option<NodeId>,
) -> Option<NodeId> {
    let ends_with_space = new_text.chars().next_back().is_some_and(char::is_whitespace);
    if ends_with_space && following.is_some() {
        return following;
    }
    anchor.or(following)
}

fn build_ins_wrapper(
    tree: &mut XmlTree,
    edit: &ResolvedEdit,
    style_source: Option<NodeId>,
    author: &str,
    date: &str,
) -> Result<(NodeId, NodeId), RedlineError> {
    let ins = tree.new_element("w:ins");
    revision_attrs(tree, ins, edit.rev_id, author, date);

    let run = tree.new_element("w:r");
    if let Some(source) = style_source {
        if let Some(rpr) = tree.first_child_named(source, "w:rPr") {
            let rpr_clone = tree.deep_clone(rpr);
            tree.push_child(run, rpr_clone);
        }
    }
    let t = tree.new_element("w:t");
    tree.set_text_content(t, &edit.new_text);
    if edit.new_text != edit.new_text.trim() {
        tree.set_attr(t, "xml:space", "preserve");
    }
    tree.push_child(run, t);
    tree.push_child(ins, run);
    Ok((ins, run))
}

/// `node` itself when it is a direct child of `parent`, otherwise the child
/// of `parent` whose subtree holds it.
fn sibling_under(tree: &XmlTree, parent: NodeId, node: NodeId) -> Result<NodeId, RedlineError> {
    if tree.child_pos(parent, node).is_some() {
        return Ok(node);
    }
    tree.children(parent)
        .iter()
        .copied()
        .find(|&c| subtree_contains(tree, c, node))
        .ok_or_else(|| RedlineError::Structure("placement run left its parent".to_string()))
}

fn subtree_contains(tree: &XmlTree, root: NodeId, target: NodeId) -> bool {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if id == target {
            return true;
        }
        stack.extend_from_slice(tree.children(id));
    }
    false
}

/// Highest revision id already present on `w:ins`/`w:del` elements; fresh
/// ids continue above it.
fn max_revision_id(tree: &XmlTree) -> u64 {
    let mut max = 0u64;
    let Some(root) = tree.root_element() else {
        return max;
    };
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if matches!(tree.elem_name(id), Some("w:ins") | Some("w:del")) {
            if let Some(n) = tree.get_attr(id, "w:id").and_then(|v| v.parse::<u64>().ok()) {
                max = max.max(n);
            }
        }
        stack.extend_from_slice(tree.children(id));
    }
    max
}
