#![allow(dead_code)]

use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

const CONTENT_TYPES: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n",
    "<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">",
    "<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>",
    "<Default Extension=\"xml\" ContentType=\"application/xml\"/>",
    "<Override PartName=\"/word/document.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml\"/>",
    "</Types>"
);

const ROOT_RELS: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n",
    "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
    "<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"word/document.xml\"/>",
    "</Relationships>"
);

pub fn document_xml(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n\
         <w:document xmlns:w=\"{W_NS}\"><w:body>{body}</w:body></w:document>"
    )
}

pub fn para(inner: &str) -> String {
    format!("<w:p>{inner}</w:p>")
}

pub fn run(text: &str) -> String {
    format!("<w:r><w:t>{text}</w:t></w:r>")
}

pub fn bold_run(text: &str) -> String {
    format!("<w:r><w:rPr><w:b/></w:rPr><w:t>{text}</w:t></w:r>")
}

pub fn package(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in parts {
        zout.start_file(*name, SimpleFileOptions::default())
            .expect("start zip entry");
        zout.write_all(data).expect("write zip entry");
    }
    zout.finish().expect("finish zip").into_inner()
}

/// A minimal but valid .docx holding `body` inside the main part.
pub fn docx_with_body(body: &str) -> Vec<u8> {
    docx_with_extra_parts(body, &[])
}

pub fn docx_with_extra_parts(body: &str, extra: &[(&str, &[u8])]) -> Vec<u8> {
    let doc = document_xml(body);
    let mut parts: Vec<(&str, &[u8])> = vec![
        ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
        ("_rels/.rels", ROOT_RELS.as_bytes()),
        ("word/document.xml", doc.as_bytes()),
    ];
    parts.extend_from_slice(extra);
    package(&parts)
}

pub fn read_part(archive: &[u8], name: &str) -> Option<Vec<u8>> {
    let mut zip = ZipArchive::new(Cursor::new(archive)).expect("open zip");
    let mut file = zip.by_name(name).ok()?;
    let mut data = Vec::new();
    file.read_to_end(&mut data).expect("read zip entry");
    Some(data)
}

pub fn part_string(archive: &[u8], name: &str) -> String {
    String::from_utf8(read_part(archive, name).unwrap_or_else(|| panic!("missing part {name}")))
        .expect("utf8 part")
}

/// The flat text of a saved document: live `w:t` content only, so revision
/// markup is stripped for free.
pub fn flat_text(archive: &[u8]) -> String {
    redline::open_document(archive)
        .expect("open output")
        .flat_text()
        .expect("flat text")
}
