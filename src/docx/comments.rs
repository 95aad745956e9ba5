use crate::docx::xml::{NodeId, XmlTree};
use crate::error::RedlineError;

/// Initials for the comment record: first letter of each word, at most
/// three, uppercased.
pub fn initials_for(author: &str) -> String {
    let mut out = String::new();
    for word in author.split_whitespace() {
        if let Some(ch) = word.chars().find(|c| c.is_alphanumeric()) {
            out.extend(ch.to_uppercase());
        }
        if out.chars().count() >= 3 {
            break;
        }
    }
    if out.is_empty() {
        out.push('?');
    }
    out
}

/// Next free comment id: one past the maximum `w:id` in the comments part.
pub fn next_comment_id(comments: &XmlTree) -> u64 {
    let Some(root) = comments.root_element() else {
        return 0;
    };
    let mut max: Option<u64> = None;
    for &child in comments.children(root) {
        if comments.elem_name(child) != Some("w:comment") {
            continue;
        }
        if let Some(id) = comments
            .get_attr(child, "w:id")
            .and_then(|v| v.parse::<u64>().ok())
        {
            max = Some(max.map_or(id, |m| m.max(id)));
        }
    }
    max.map_or(0, |m| m + 1)
}

/// Appends a `w:comment` record, one paragraph per line of `body`.
pub fn append_comment(
    comments: &mut XmlTree,
    id: u64,
    author: &str,
    initials: &str,
    date: &str,
    body: &str,
) -> Result<(), RedlineError> {
    let root = comments.root_element().ok_or_else(|| {
        RedlineError::CommentPartWriteFailure("comments part has no root".to_string())
    })?;
    let comment = comments.new_element("w:comment");
    comments.set_attr(comment, "w:id", &id.to_string());
    comments.set_attr(comment, "w:author", author);
    comments.set_attr(comment, "w:initials", initials);
    comments.set_attr(comment, "w:date", date);
    for line in body.split('\n') {
        let p = comments.new_element("w:p");
        let r = comments.new_element("w:r");
        let t = comments.new_element("w:t");
        comments.set_text_content(t, line);
        if line != line.trim() {
            comments.set_attr(t, "xml:space", "preserve");
        }
        comments.push_child(r, t);
        comments.push_child(p, r);
        comments.push_child(comment, p);
    }
    comments.push_child(root, comment);
    Ok(())
}

/// Brackets an applied edit's elements with comment range markers and drops
/// a reference run after the end marker.
///
/// `first`/`last` are the outermost elements the edit emitted (`w:ins` /
/// `w:del` wrappers), each paired with its parent; `last_run` is the run
/// whose properties the reference run inherits.
pub fn anchor_comment(
    tree: &mut XmlTree,
    id: u64,
    first: (NodeId, NodeId),
    last: (NodeId, NodeId),
    last_run: NodeId,
) -> Result<(), RedlineError> {
    let (first_parent, first_el) = first;
    let (last_parent, last_el) = last;

    let start = tree.new_marker("w:commentRangeStart");
    tree.set_attr(start, "w:id", &id.to_string());
    if !tree.insert_before(first_parent, first_el, start) {
        return Err(RedlineError::Structure(
            "comment range start anchor is detached".to_string(),
        ));
    }

    let end = tree.new_marker("w:commentRangeEnd");
    tree.set_attr(end, "w:id", &id.to_string());
    if !tree.insert_after(last_parent, last_el, end) {
        return Err(RedlineError::Structure(
            "comment range end anchor is detached".to_string(),
        ));
    }

    let reference_run = tree.new_element("w:r");
    if let Some(rpr) = tree.first_child_named(last_run, "w:rPr") {
        let rpr_clone = tree.deep_clone(rpr);
        tree.push_child(reference_run, rpr_clone);
    }
    let reference = tree.new_marker("w:commentReference");
    tree.set_attr(reference, "w:id", &id.to_string());
    tree.push_child(reference_run, reference);
    if !tree.insert_after(last_parent, end, reference_run) {
        return Err(RedlineError::Structure(
            "comment reference anchor is detached".to_string(),
        ));
    }
    Ok(())
}
