use crate::docx::package::Document;
use crate::docx::xml::{NodeId, XmlTree};
use crate::error::RedlineError;

/// Synthetic separator between consecutive paragraphs in the flat text. No
/// run owns these characters; the gap is virtual.
pub const PARA_SEP: &str = "\n\n";

/// One text-bearing `w:t` in document order.
#[derive(Clone, Debug)]
pub struct FlatEntry {
    /// The owning `w:r`.
    pub run: NodeId,
    /// The `w:t` the text lives in.
    pub text_node: NodeId,
    /// The run's direct parent (`w:p`, `w:hyperlink`, `w:ins`, ...).
    pub parent: NodeId,
    /// Byte offset of the run's text in the flat string.
    pub start: usize,
    /// Byte length at index-build time. After mutations the tree is
    /// authoritative; split helpers re-read the live text.
    pub len: usize,
}

impl FlatEntry {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// A resolved sub-range of one entry: `local` offsets are relative to the
/// entry's text, `0 <= local_start < local_end <= len`.
#[derive(Clone, Copy, Debug)]
pub struct RunSlice {
    pub entry: usize,
    pub local_start: usize,
    pub local_end: usize,
}

/// Flat-text projection of the main document part.
///
/// Built once per job against the pristine tree. Mutations invalidate the
/// offsets; the engine guarantees validity by resolving every edit up front
/// and applying back-to-front.
pub struct DocumentMap {
    pub flat_text: String,
    pub entries: Vec<FlatEntry>,
}

struct Builder {
    flat_text: String,
    entries: Vec<FlatEntry>,
    seen_paragraph: bool,
}

impl DocumentMap {
    pub fn build(tree: &XmlTree) -> Result<Self, RedlineError> {
        let root = tree
            .root_element()
            .ok_or_else(|| RedlineError::Structure("main part has no root".to_string()))?;
        let mut b = Builder {
            flat_text: String::new(),
            entries: Vec::new(),
            seen_paragraph: false,
        };
        walk(tree, root, false, &mut b);
        Ok(Self {
            flat_text: b.flat_text,
            entries: b.entries,
        })
    }

    /// Byte range of the `occurrence`-th literal match of `target`.
    pub fn find_occurrence(&self, target: &str, occurrence: usize) -> Option<(usize, usize)> {
        self.flat_text
            .match_indices(target)
            .nth(occurrence)
            .map(|(s, _)| (s, s + target.len()))
    }

    /// Maps `[start, end)` to the run slices it covers, skipping virtual
    /// paragraph gaps. Empty for a zero-length range.
    pub fn slices_for(&self, start: usize, end: usize) -> Vec<RunSlice> {
        let mut out = Vec::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.start >= end {
                break;
            }
            if entry.end() <= start {
                continue;
            }
            let local_start = start.saturating_sub(entry.start);
            let local_end = entry.len.min(end - entry.start);
            out.push(RunSlice {
                entry: idx,
                local_start,
                local_end,
            });
        }
        out
    }

    /// True when `[start, end)` includes characters no run owns, i.e. the
    /// range spans a paragraph boundary.
    pub fn crosses_gap(&self, start: usize, end: usize) -> bool {
        let covered: usize = self
            .slices_for(start, end)
            .iter()
            .map(|s| s.local_end - s.local_start)
            .sum();
        covered < end - start
    }

    /// The entry whose text contains position `pos`, counting a run's end
    /// boundary as inside it. This is the anchor-run lookup for insertions.
    pub fn entry_ending_at_or_after(&self, pos: usize) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.start < pos && pos <= e.end())
    }

    /// The entry starting exactly at `pos`, if any (the "following run" of
    /// the style-inheritance rule).
    pub fn entry_starting_at(&self, pos: usize) -> Option<usize> {
        self.entries.iter().position(|e| e.start == pos)
    }
}

fn walk(tree: &XmlTree, id: NodeId, in_paragraph: bool, b: &mut Builder) {
    let Some(name) = tree.elem_name(id) else {
        return;
    };
    let in_paragraph = if name == "w:p" {
        if b.seen_paragraph {
            b.flat_text.push_str(PARA_SEP);
        }
        b.seen_paragraph = true;
        true
    } else {
        in_paragraph
    };
    for &child in tree.children(id) {
        if in_paragraph && tree.elem_name(child) == Some("w:r") {
            visit_run(tree, child, id, b);
        } else {
            walk(tree, child, in_paragraph, b);
        }
    }
}

fn visit_run(tree: &XmlTree, run: NodeId, parent: NodeId, b: &mut Builder) {
    // Only live text counts: w:delText, tabs, breaks and field markers
    // contribute no flat characters.
    for &child in tree.children(run) {
        if tree.elem_name(child) != Some("w:t") {
            continue;
        }
        let text = tree.text_content(child);
        if text.is_empty() {
            continue;
        }
        b.entries.push(FlatEntry {
            run,
            text_node: child,
            parent,
            start: b.flat_text.len(),
            len: text.len(),
        });
        b.flat_text.push_str(&text);
    }
}

/// Splits `entry`'s run at `local` (byte offset into its current text). The
/// original keeps the prefix in place; a deep clone carrying the suffix is
/// inserted as its immediate next sibling. Content children after the text
/// node move to the suffix side so their rendered order is preserved.
///
/// Returns the suffix run, or `None` for a boundary offset (no-op).
pub fn split_run_at(
    tree: &mut XmlTree,
    entry: &FlatEntry,
    local: usize,
) -> Result<Option<NodeId>, RedlineError> {
    let run = run_holding(tree, entry.parent, entry.run, entry.text_node)?;
    split_text_at(tree, entry.parent, run, entry.text_node, local)
}

fn split_text_at(
    tree: &mut XmlTree,
    parent: NodeId,
    run: NodeId,
    text_node: NodeId,
    local: usize,
) -> Result<Option<NodeId>, RedlineError> {
    let text = tree.text_content(text_node);
    if local == 0 || local >= text.len() {
        return Ok(None);
    }
    if !text.is_char_boundary(local) {
        return Err(RedlineError::Structure(format!(
            "split offset {local} is not a character boundary"
        )));
    }
    let prefix = text[..local].to_string();
    let suffix = text[local..].to_string();

    let t_pos = tree
        .child_pos(run, text_node)
        .ok_or_else(|| RedlineError::Structure("text node detached from run".to_string()))?;

    // Content children after the text node move with the suffix so their
    // rendered order survives; the original keeps the prefix in place.
    let sibling = split_children_at(tree, parent, run, t_pos + 1)?;
    let suffix_t = tree.deep_clone(text_node);
    let insert_at = usize::from(tree.first_child_named(sibling, "w:rPr").is_some());
    tree.insert_child_at(sibling, insert_at, suffix_t);

    set_preserved_text(tree, text_node, &prefix);
    set_preserved_text(tree, suffix_t, &suffix);
    Ok(Some(sibling))
}

/// Moves `run`'s children from position `at` onward into a fresh sibling run
/// inserted immediately after it. The sibling copies the run's attributes
/// and gets a deep copy of its properties. Returns the new run.
fn split_children_at(
    tree: &mut XmlTree,
    parent: NodeId,
    run: NodeId,
    at: usize,
) -> Result<NodeId, RedlineError> {
    let name = tree
        .elem_name(run)
        .ok_or_else(|| RedlineError::Structure("run is not an element".to_string()))?
        .to_string();
    let attrs = tree.elem(run).map(|el| el.attrs.clone()).unwrap_or_default();
    let moved: Vec<NodeId> = tree.children(run)[at..].to_vec();

    let sibling = tree.new_element(&name);
    if let Some(el) = tree.elem_mut(sibling) {
        el.attrs = attrs;
    }
    if let Some(rpr) = tree.first_child_named(run, "w:rPr") {
        let rpr_clone = tree.deep_clone(rpr);
        tree.push_child(sibling, rpr_clone);
    }
    for child in moved {
        tree.push_child(sibling, child);
    }
    if let Some(el) = tree.elem_mut(run) {
        el.children.truncate(at);
    }
    if !tree.insert_after(parent, run, sibling) {
        return Err(RedlineError::Structure(
            "run detached from its parent during split".to_string(),
        ));
    }
    Ok(sibling)
}

fn has_live_text(tree: &XmlTree, ids: &[NodeId]) -> bool {
    ids.iter()
        .any(|&c| tree.elem_name(c) == Some("w:t") && !tree.text_content(c).is_empty())
}

/// The run currently holding `text_node`. Splits keep an entry's text node
/// alive but can move its siblings into fresh runs; when the entry's own
/// node migrated (another slice of the same run was isolated first), it is
/// found among the parent's children.
fn run_holding(
    tree: &XmlTree,
    parent: NodeId,
    run_hint: NodeId,
    text_node: NodeId,
) -> Result<NodeId, RedlineError> {
    if tree.child_pos(run_hint, text_node).is_some() {
        return Ok(run_hint);
    }
    tree.children(parent)
        .iter()
        .copied()
        .find(|&r| tree.child_pos(r, text_node).is_some())
        .ok_or_else(|| RedlineError::Structure("text node left its paragraph".to_string()))
}

/// Trims the tree so that exactly `[local_start, local_end)` of the entry's
/// current text is a whole run holding nothing else that renders as live
/// text. Returns that run.
pub fn isolate_slice(
    tree: &mut XmlTree,
    entry: &FlatEntry,
    local_start: usize,
    local_end: usize,
) -> Result<NodeId, RedlineError> {
    let t = entry.text_node;
    let mut run = run_holding(tree, entry.parent, entry.run, t)?;

    // Runs holding several text nodes first shed the neighbors, so wrapping
    // the run later cannot capture text outside the slice.
    let t_pos = tree
        .child_pos(run, t)
        .ok_or_else(|| RedlineError::Structure("text node detached from run".to_string()))?;
    if has_live_text(tree, &tree.children(run)[t_pos + 1..].to_vec()) {
        split_children_at(tree, entry.parent, run, t_pos + 1)?;
    }
    if has_live_text(tree, &tree.children(run)[..t_pos].to_vec()) {
        run = split_children_at(tree, entry.parent, run, t_pos)?;
    }

    split_text_at(tree, entry.parent, run, t, local_end)?;
    match split_text_at(tree, entry.parent, run, t, local_start)? {
        Some(suffix) => Ok(suffix),
        None => Ok(run),
    }
}

/// Prepares an insertion point `local` bytes into the entry's current text:
/// splits when the point is mid-run and returns the run to anchor after plus
/// the run that now starts at the insertion point, if one exists in the same
/// paragraph.
pub fn split_for_insert(
    tree: &mut XmlTree,
    map: &DocumentMap,
    entry_idx: usize,
    local: usize,
) -> Result<(NodeId, Option<NodeId>), RedlineError> {
    let entry = &map.entries[entry_idx];
    let t = entry.text_node;
    let run = run_holding(tree, entry.parent, entry.run, t)?;
    let mut trailing_sibling = None;

    let t_pos = tree
        .child_pos(run, t)
        .ok_or_else(|| RedlineError::Structure("text node detached from run".to_string()))?;
    if has_live_text(tree, &tree.children(run)[t_pos + 1..].to_vec()) {
        trailing_sibling = Some(split_children_at(tree, entry.parent, run, t_pos + 1)?);
    }

    match split_text_at(tree, entry.parent, run, t, local)? {
        Some(suffix) => Ok((run, Some(suffix))),
        None => {
            let following = trailing_sibling.or_else(|| {
                map.entry_starting_at(entry.start + local)
                    .map(|i| map.entries[i].run)
            });
            Ok((run, following))
        }
    }
}

/// Sets a `w:t`/`w:delText` payload, adding `xml:space="preserve"` when the
/// content would otherwise lose boundary whitespace.
pub fn set_preserved_text(tree: &mut XmlTree, text_elem: NodeId, text: &str) {
    tree.set_text_content(text_elem, text);
    if text != text.trim() {
        tree.set_attr(text_elem, "xml:space", "preserve");
    }
}

impl Document {
    /// The flat text downstream consumers diff against; identical to the
    /// string edits are resolved on.
    pub fn flat_text(&self) -> Result<String, RedlineError> {
        Ok(DocumentMap::build(self.main())?.flat_text)
    }
}
