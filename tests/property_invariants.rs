mod common;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use common::{docx_with_body, flat_text, para, part_string, run};
use redline::{apply_edits, open_document, save_document, Edit};

fn ts() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0)
        .single()
        .expect("timestamp")
}

fn paragraphs() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(prop::collection::vec("[a-z ]{1,8}", 1..4), 1..4)
}

fn body_for(paras: &[Vec<String>]) -> String {
    paras
        .iter()
        .map(|runs| para(&runs.iter().map(|t| run(t)).collect::<String>()))
        .collect()
}

fn joined(paras: &[Vec<String>]) -> (Vec<String>, String) {
    let texts: Vec<String> = paras.iter().map(|runs| runs.concat()).collect();
    let full = texts.join("\n\n");
    (texts, full)
}

proptest! {
    // The flat text is exactly the text-node concatenation with "\n\n"
    // between paragraphs, however the text is fragmented into runs.
    #[test]
    fn flat_text_matches_concatenation(paras in paragraphs()) {
        let input = docx_with_body(&body_for(&paras));
        let (_, full) = joined(&paras);
        prop_assert_eq!(flat_text(&input), full);
    }

    // Deleting [s, e) and stripping markup leaves the input text minus that
    // substring, regardless of how runs split.
    #[test]
    fn delete_round_trip(
        paras in paragraphs(),
        pi_raw in 0usize..8,
        a in 0usize..64,
        b in 1usize..64,
    ) {
        let (texts, full) = joined(&paras);
        let pi = pi_raw % texts.len();
        let ptext = texts[pi].clone();
        let s = a % ptext.len();
        let e = s + 1 + (b % (ptext.len() - s));
        let target = ptext[s..e].to_string();

        let global_start = texts[..pi].iter().map(|t| t.len() + 2).sum::<usize>() + s;
        let occurrence = full
            .match_indices(target.as_str())
            .position(|(i, _)| i == global_start);
        // The non-overlapping scan can step over the chosen position when an
        // earlier match overlaps it; such ranges are unaddressable by design.
        prop_assume!(occurrence.is_some());

        let input = docx_with_body(&body_for(&paras));
        let mut doc = open_document(&input).expect("open");
        let report = apply_edits(
            &mut doc,
            &[Edit::delete(&target).with_occurrence(occurrence.expect("occurrence"))],
            "Prop",
            ts(),
        )
        .expect("apply");
        prop_assert_eq!(report.applied, 1);

        let out = save_document(&doc).expect("save");
        let expected = format!(
            "{}{}",
            &full[..global_start],
            &full[global_start + target.len()..]
        );
        prop_assert_eq!(flat_text(&out), expected);
    }

    // Inserting x at p and stripping markup yields the input with x spliced
    // in at p.
    #[test]
    fn insert_round_trip(
        paras in paragraphs(),
        pi_raw in 0usize..8,
        pos_raw in 0usize..64,
        new_text in "[a-z]{1,6}",
    ) {
        let (texts, full) = joined(&paras);
        let pi = pi_raw % texts.len();
        let pos = pos_raw % (texts[pi].len() + 1);
        let gpos = texts[..pi].iter().map(|t| t.len() + 2).sum::<usize>() + pos;

        let anchor_len = gpos.min(6);
        let anchor = full[gpos - anchor_len..gpos].to_string();
        let occurrence = if anchor.is_empty() {
            0
        } else {
            let found = full
                .match_indices(anchor.as_str())
                .position(|(i, _)| i == gpos - anchor_len);
            prop_assume!(found.is_some());
            found.expect("occurrence")
        };

        let input = docx_with_body(&body_for(&paras));
        let mut doc = open_document(&input).expect("open");
        let report = apply_edits(
            &mut doc,
            &[Edit::insert(&anchor, &new_text).with_occurrence(occurrence)],
            "Prop",
            ts(),
        )
        .expect("apply");
        prop_assert_eq!(report.applied, 1);

        let out = save_document(&doc).expect("save");
        let expected = format!("{}{}{}", &full[..gpos], new_text, &full[gpos..]);
        prop_assert_eq!(flat_text(&out), expected);
    }

    // One delete per paragraph in one batch: revision ids come out as the
    // strictly increasing sequence 1..=n, and the combined text effect
    // matches applying every deletion to the plain string.
    #[test]
    fn batch_deletes_match_string_edits_and_number_revisions(paras in paragraphs()) {
        let (texts, full) = joined(&paras);

        let mut edits = Vec::new();
        let mut expected = full.clone();
        let mut cursor = 0usize;
        for text in &texts {
            let first = text.chars().next().expect("nonempty paragraph").to_string();
            let occurrence = full
                .match_indices(first.as_str())
                .position(|(i, _)| i == cursor);
            prop_assume!(occurrence.is_some());
            edits.push(Edit::delete(&first).with_occurrence(occurrence.expect("occurrence")));
            cursor += text.len() + 2;
        }
        // Delete each paragraph's first character, back to front on the
        // expectation string so earlier offsets stay valid.
        let mut offset = 0usize;
        let mut starts = Vec::new();
        for text in &texts {
            starts.push(offset);
            offset += text.len() + 2;
        }
        for (&start, text) in starts.iter().zip(&texts).rev() {
            let first_len = text.chars().next().expect("nonempty").len_utf8();
            expected.replace_range(start..start + first_len, "");
        }

        let input = docx_with_body(&body_for(&paras));
        let mut doc = open_document(&input).expect("open");
        let report = apply_edits(&mut doc, &edits, "Prop", ts()).expect("apply");
        prop_assert_eq!(report.applied, edits.len());

        let out = save_document(&doc).expect("save");
        prop_assert_eq!(flat_text(&out), expected);

        let xml = part_string(&out, "word/document.xml");
        for id in 1..=edits.len() {
            let needle = format!("<w:del w:id=\"{id}\"");
            prop_assert!(xml.contains(&needle));
        }
        let absent_needle = format!("<w:del w:id=\"{}\"", edits.len() + 1);
        prop_assert!(!xml.contains(&absent_needle));
    }
}
