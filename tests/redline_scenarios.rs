mod common;

use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};

use common::{bold_run, docx_with_body, docx_with_extra_parts, flat_text, para, part_string, read_part, run};
use redline::{apply_edits, open_document, save_document, Edit, SkipReason};

fn ts() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).single().expect("timestamp")
}

fn apply(input: &[u8], edits: &[Edit]) -> (Vec<u8>, redline::Report) {
    let mut doc = open_document(input).expect("open");
    let report = apply_edits(&mut doc, edits, "Redline", ts()).expect("apply");
    let out = save_document(&doc).expect("save");
    (out, report)
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[test]
fn simple_replace_emits_del_then_ins() {
    let input = docx_with_body(&para(&run("The term is 30 days.")));
    let (out, report) = apply(&input, &[Edit::modify("30 days", "sixty (60) days")]);

    assert_eq!(report.applied, 1);
    assert!(report.skipped.is_empty());

    let xml = part_string(&out, "word/document.xml");
    assert!(xml.contains("<w:delText>30 days</w:delText>"));
    assert!(xml.contains("<w:t>sixty (60) days</w:t>"));

    // The replacement renders immediately before the deletion.
    let ins_at = xml.find("<w:ins").expect("ins");
    let del_at = xml.find("<w:del ").expect("del");
    assert!(ins_at < del_at);

    assert_eq!(flat_text(&out), "The term is sixty (60) days.");
}

#[test]
fn modify_shares_one_revision_id_between_del_and_ins() {
    let input = docx_with_body(&para(&run("old value here")));
    let (out, _) = apply(&input, &[Edit::modify("old", "new")]);
    let xml = part_string(&out, "word/document.xml");

    let id_of = |tag: &str| {
        let at = xml.find(tag).expect("tag");
        let rest = &xml[at..];
        let key = "w:id=\"";
        let start = rest.find(key).expect("id attr") + key.len();
        rest[start..].split('"').next().expect("id value").to_string()
    };
    assert_eq!(id_of("<w:ins"), id_of("<w:del "));
}

#[test]
fn modify_replacement_inherits_the_last_deleted_runs_style() {
    let input = docx_with_body(&para(&format!(
        "{}{}",
        run("Total "),
        bold_run("Amount Due")
    )));
    let (out, report) = apply(&input, &[Edit::modify("Total Amount", "Net Amount")]);
    assert_eq!(report.applied, 1);

    let xml = part_string(&out, "word/document.xml");
    let ins_at = xml.find("<w:ins").expect("ins");
    let ins_chunk = &xml[ins_at..xml[ins_at..].find("</w:ins>").expect("ins end") + ins_at];
    // Deleted range spans a plain run then a bold one; the replacement
    // takes the last (bold) run's properties.
    assert!(ins_chunk.contains("<w:b/>"));
    assert!(ins_chunk.contains("<w:t>Net Amount</w:t>"));
    assert_eq!(flat_text(&out), "Net Amount Due");
}

#[test]
fn delete_across_adjacent_runs_splits_both() {
    let input = docx_with_body(&para(&format!("{}{}", run("Agree"), run("ment"))));
    let (out, report) = apply(&input, &[Edit::delete("greem")]);

    assert_eq!(report.applied, 1);
    let xml = part_string(&out, "word/document.xml");
    assert!(xml.contains("<w:delText>gree</w:delText>"));
    assert!(xml.contains("<w:delText>m</w:delText>"));
    assert_eq!(flat_text(&out), "Aent");
}

#[test]
fn occurrence_index_picks_the_right_repeat() {
    let input = docx_with_body(&format!("{}{}", para(&run("0")), para(&run("0"))));
    let (out, report) = apply(&input, &[Edit::modify("0", "1").with_occurrence(1)]);

    assert_eq!(report.applied, 1);
    assert_eq!(flat_text(&out), "0\n\n1");
}

#[test]
fn prefix_insertion_inherits_the_following_runs_style() {
    let input = docx_with_body(&para(&bold_run("Important")));
    let (out, report) = apply(&input, &[Edit::insert("", "Very ")]);

    assert_eq!(report.applied, 1);
    let xml = part_string(&out, "word/document.xml");
    let ins_at = xml.find("<w:ins").expect("ins");
    let ins_chunk = &xml[ins_at..xml[ins_at..].find("</w:ins>").expect("ins end") + ins_at];
    assert!(ins_chunk.contains("<w:b/>"));
    assert!(ins_chunk.contains("xml:space=\"preserve\""));
    assert!(ins_at < xml.find(">Important<").expect("existing run"));
    assert_eq!(flat_text(&out), "Very Important");
}

#[test]
fn insertion_lands_between_tight_runs() {
    let input = docx_with_body(&para(&format!(
        "{}{}{}",
        bold_run("ARTICLE"),
        run("3"),
        bold_run("FEES")
    )));
    let (out, _) = apply(&input, &[Edit::insert("3", " ")]);

    let xml = part_string(&out, "word/document.xml");
    let idx_3 = xml.find(">3</w:t>").expect("run 3");
    let idx_ins = xml.find("<w:ins").expect("ins");
    let idx_fees = xml.find(">FEES</w:t>").expect("run FEES");
    assert!(idx_3 < idx_ins, "insertion goes after the anchor");
    assert!(idx_ins < idx_fees, "insertion goes before the next run");
    assert_eq!(flat_text(&out), "ARTICLE3 FEES");
}

#[test]
fn comment_is_recorded_anchored_and_registered() {
    let input = docx_with_body(&para(&run("subject to governing law of the parties")));
    let (out, report) = apply(
        &input,
        &[Edit::modify("governing law", "laws of New York").with_comment("Client prefers NY")],
    );
    assert_eq!(report.applied, 1);

    let xml = part_string(&out, "word/document.xml");
    assert!(xml.contains("<w:commentRangeStart w:id=\"0\"/>"));
    assert!(xml.contains("<w:commentRangeEnd w:id=\"0\"/>"));
    assert!(xml.contains("<w:commentReference w:id=\"0\"/>"));
    let start_at = xml.find("commentRangeStart").expect("start");
    let end_at = xml.find("commentRangeEnd").expect("end");
    assert!(start_at < end_at);

    let comments = part_string(&out, "word/comments.xml");
    assert!(comments.contains("w:id=\"0\""));
    assert!(comments.contains("w:author=\"Redline\""));
    assert!(comments.contains("w:initials=\"R\""));
    assert!(comments.contains("w:date=\"2026-01-15T12:00:00Z\""));
    assert!(comments.contains("<w:t>Client prefers NY</w:t>"));

    let rels = part_string(&out, "word/_rels/document.xml.rels");
    assert_eq!(rels.matches("relationships/comments").count(), 1);
    assert!(rels.contains("Target=\"comments.xml\""));

    let types = part_string(&out, "[Content_Types].xml");
    assert!(types.contains("PartName=\"/word/comments.xml\""));
}

#[test]
fn comment_ids_stay_monotonic_across_a_batch() {
    let input = docx_with_body(&format!(
        "{}{}",
        para(&run("first clause")),
        para(&run("second clause"))
    ));
    let (out, report) = apply(
        &input,
        &[
            Edit::delete("first").with_comment("drop the old intro"),
            Edit::delete("second").with_comment("drop the follow-up"),
        ],
    );
    assert_eq!(report.applied, 2);

    let comments = part_string(&out, "word/comments.xml");
    assert!(comments.contains("w:id=\"0\""));
    assert!(comments.contains("w:id=\"1\""));
    let first = comments.find("drop the old intro").expect("first body");
    let second = comments.find("drop the follow-up").expect("second body");
    assert!(first < second);
}

#[test]
fn batch_application_matches_forward_string_edits() {
    let input = docx_with_body(&para(&run(
        "Payment due in 30 days after notice is delivered to the Seller.",
    )));
    let (out, report) = apply(
        &input,
        &[
            Edit::modify("30 days", "60 days"),
            Edit::modify("Seller", "Vendor"),
        ],
    );
    assert_eq!(report.applied, 2);
    assert_eq!(
        flat_text(&out),
        "Payment due in 60 days after notice is delivered to the Vendor."
    );
}

#[test]
fn revision_ids_continue_above_existing_markup_in_input_order() {
    let body = format!(
        "<w:p><w:ins w:id=\"4\" w:author=\"x\" w:date=\"2020-01-01T00:00:00Z\">{}</w:ins>{}</w:p>",
        run("kept "),
        run("alpha beta gamma")
    );
    let input = docx_with_body(&body);
    let (out, report) = apply(
        &input,
        &[Edit::delete("alpha "), Edit::modify("gamma", "delta")],
    );
    assert_eq!(report.applied, 2);

    let xml = part_string(&out, "word/document.xml");
    // First input edit takes id 5 even though it is applied last.
    let del_alpha = xml.find(">alpha </w:delText>").expect("alpha del");
    let before = &xml[..del_alpha];
    let wrapper_at = before.rfind("<w:del ").expect("alpha wrapper");
    assert!(xml[wrapper_at..].starts_with("<w:del w:id=\"5\""));
    assert!(xml.contains("w:id=\"6\""));
    assert!(!xml.contains("w:id=\"7\""));
}

#[test]
fn untouched_parts_survive_byte_for_byte() {
    let styles = b"<?xml version=\"1.0\"?><w:styles/>".as_slice();
    let blob: Vec<u8> = (0u8..=255).cycle().take(1024).collect();
    let input = docx_with_extra_parts(
        &para(&run("some text to edit")),
        &[("word/styles.xml", styles), ("word/media/image1.bin", &blob)],
    );

    let (out, _) = apply(&input, &[Edit::delete("to edit")]);
    assert_eq!(
        digest(&read_part(&input, "word/styles.xml").expect("styles in")),
        digest(&read_part(&out, "word/styles.xml").expect("styles out")),
    );
    assert_eq!(
        digest(&read_part(&input, "word/media/image1.bin").expect("blob in")),
        digest(&read_part(&out, "word/media/image1.bin").expect("blob out")),
    );
}

#[test]
fn empty_edit_list_reproduces_every_part_exactly() {
    let input = docx_with_body(&para(&run("untouched")));
    let (out, report) = apply(&input, &[]);
    assert_eq!(report.applied, 0);
    for name in [
        "[Content_Types].xml",
        "_rels/.rels",
        "word/document.xml",
    ] {
        assert_eq!(
            digest(&read_part(&input, name).expect("input part")),
            digest(&read_part(&out, name).expect("output part")),
            "part {name} changed on an edit-free save"
        );
    }
    assert!(read_part(&out, "word/comments.xml").is_none());
}

#[test]
fn unresolvable_edits_are_skipped_and_reported() {
    let input = docx_with_body(&para(&run("actual content")));
    let (out, report) = apply(
        &input,
        &[
            Edit::delete("missing text"),
            Edit::delete(""),
            Edit::insert("nowhere to be found", "x"),
            Edit::delete("content"),
        ],
    );
    assert_eq!(report.applied, 1);
    assert_eq!(report.resolved, 1);
    assert_eq!(report.skipped.len(), 3);
    assert_eq!(report.skipped[0].reason, SkipReason::TargetNotFound);
    assert_eq!(report.skipped[1].reason, SkipReason::EmptyTarget);
    assert_eq!(report.skipped[2].reason, SkipReason::AnchorNotFound);
    assert_eq!(flat_text(&out), "actual ");
}

#[test]
fn overlapping_edits_keep_only_the_earliest_listed() {
    let input = docx_with_body(&para(&run("one two three four")));
    let (out, report) = apply(
        &input,
        &[Edit::delete("two three"), Edit::modify("three four", "3 4")],
    );
    assert_eq!(report.applied, 1);
    assert_eq!(report.resolved, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].reason, SkipReason::OverlapConflict);
    assert_eq!(flat_text(&out), "one  four");
}

#[test]
fn deleting_across_a_paragraph_break_is_refused() {
    let input = docx_with_body(&format!(
        "{}{}",
        para(&run("end of first")),
        para(&run("start of second"))
    ));
    let (out, report) = apply(&input, &[Edit::delete("first\n\nstart")]);
    assert_eq!(report.applied, 0);
    assert_eq!(report.skipped[0].reason, SkipReason::OverlapConflict);
    assert_eq!(flat_text(&out), "end of first\n\nstart of second");
}

#[test]
fn insertion_anchored_at_paragraph_end_joins_that_paragraph() {
    let input = docx_with_body(&format!(
        "{}{}",
        para(&run("first line")),
        para(&run("second line"))
    ));
    let (out, _) = apply(&input, &[Edit::insert("first line", " amended")]);
    assert_eq!(flat_text(&out), "first line amended\n\nsecond line");
}

#[test]
fn text_in_table_cells_is_editable() {
    let body = format!(
        "<w:tbl><w:tr><w:tc>{}</w:tc><w:tc>{}</w:tc></w:tr></w:tbl>",
        para(&run("Fee: 100")),
        para(&run("Term: 12 months"))
    );
    let input = docx_with_body(&body);
    let (out, report) = apply(&input, &[Edit::modify("12 months", "24 months")]);
    assert_eq!(report.applied, 1);
    assert_eq!(flat_text(&out), "Fee: 100\n\nTerm: 24 months");
}

#[test]
fn whitespace_heavy_insertion_preserves_spaces() {
    let input = docx_with_body(&para(&format!("{}{}", run("AB"), run("CD"))));
    let (out, _) = apply(&input, &[Edit::insert("AB", " - ")]);
    let xml = part_string(&out, "word/document.xml");
    assert!(xml.contains("<w:t xml:space=\"preserve\"> - </w:t>"));
    assert_eq!(flat_text(&out), "AB - CD");
}

#[test]
fn modify_without_replacement_degrades_to_delete() {
    let input = docx_with_body(&para(&run("drop this part")));
    let mut edit = Edit::modify("this ", "");
    edit.new_text = None;
    let (out, report) = apply(&input, &[edit]);
    assert_eq!(report.applied, 1);
    let xml = part_string(&out, "word/document.xml");
    assert!(xml.contains("<w:delText xml:space=\"preserve\">this </w:delText>"));
    assert!(!xml.contains("<w:ins"));
    assert_eq!(flat_text(&out), "drop part");
}
