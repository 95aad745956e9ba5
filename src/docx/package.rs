use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::docx::xml::XmlTree;
use crate::error::RedlineError;

pub const MAIN_PART: &str = "word/document.xml";
pub const COMMENTS_PART: &str = "word/comments.xml";
pub const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

const COMMENTS_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/comments";
const COMMENTS_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.comments+xml";
const RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

pub struct PackageEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

/// The raw archive: an ordered list of entries so the output zip keeps the
/// input's entry order and per-entry metadata.
pub struct Package {
    pub entries: Vec<PackageEntry>,
}

impl Package {
    pub fn read(bytes: &[u8]) -> Result<Self, RedlineError> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| RedlineError::MalformedPackage(e.to_string()))?;
        let mut entries = Vec::new();
        for i in 0..zip.len() {
            let mut file = zip
                .by_index(i)
                .map_err(|e| RedlineError::MalformedPackage(e.to_string()))?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .map_err(|e| RedlineError::MalformedPackage(e.to_string()))?;
            entries.push(PackageEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Writes the archive back out. Entries named in `replacements` get new
    /// payloads; everything else is copied byte-for-byte with its original
    /// compression, timestamp and mode. `additions` are appended as new
    /// deflated entries.
    pub fn write(
        &self,
        replacements: &HashMap<String, Vec<u8>>,
        additions: &[(String, Vec<u8>)],
    ) -> Result<Vec<u8>, RedlineError> {
        let ser = |e: zip::result::ZipError| RedlineError::SerializationFailure(e.to_string());
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        for ent in &self.entries {
            let data = replacements
                .get(&ent.name)
                .map(|d| d.as_slice())
                .unwrap_or(&ent.data);
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(&ent.name, opts).map_err(ser)?;
            } else {
                zout.start_file(&ent.name, opts).map_err(ser)?;
                zout.write_all(data)
                    .map_err(|e| RedlineError::SerializationFailure(e.to_string()))?;
            }
        }
        for (name, data) in additions {
            let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            zout.start_file(name, opts).map_err(ser)?;
            zout.write_all(data)
                .map_err(|e| RedlineError::SerializationFailure(e.to_string()))?;
        }
        let cursor = zout.finish().map_err(ser)?;
        Ok(cursor.into_inner())
    }
}

/// An opened word-processing document: the archive plus the parsed trees of
/// the parts this engine mutates. One `Document` per open -> apply -> save
/// cycle; untouched parts never leave their raw bytes.
pub struct Document {
    package: Package,
    main: XmlTree,
    main_dirty: bool,
    comments: Option<XmlTree>,
    comments_dirty: bool,
    rels: Option<XmlTree>,
    rels_dirty: bool,
    content_types: Option<XmlTree>,
    content_types_dirty: bool,
}

impl Document {
    pub fn open(bytes: &[u8]) -> Result<Self, RedlineError> {
        let package = Package::read(bytes)?;
        let main_bytes = package.part(MAIN_PART).ok_or(RedlineError::MissingMainPart)?;
        let main = XmlTree::parse(MAIN_PART, main_bytes)?;
        Ok(Self {
            package,
            main,
            main_dirty: false,
            comments: None,
            comments_dirty: false,
            rels: None,
            rels_dirty: false,
            content_types: None,
            content_types_dirty: false,
        })
    }

    pub fn main(&self) -> &XmlTree {
        &self.main
    }

    /// Borrow the main tree for mutation and mark it for re-serialization.
    pub fn main_mut(&mut self) -> &mut XmlTree {
        self.main_dirty = true;
        &mut self.main
    }

    /// The comments part, parsed on first use; an empty `w:comments` root is
    /// created if the part does not exist. Idempotent.
    pub fn comments_mut(&mut self) -> Result<&mut XmlTree, RedlineError> {
        if self.comments.is_none() {
            let tree = match self.package.part(COMMENTS_PART) {
                Some(bytes) => XmlTree::parse(COMMENTS_PART, bytes)?,
                None => self.fresh_comments_tree()?,
            };
            self.comments = Some(tree);
        }
        self.comments_dirty = true;
        Ok(self.comments.as_mut().expect("comments tree just created"))
    }

    fn fresh_comments_tree(&self) -> Result<XmlTree, RedlineError> {
        // Carry the main root's namespace declarations over so the comments
        // part uses the same prefixes the document already uses.
        let mut xml = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n<w:comments",
        );
        let root = self
            .main
            .root_element()
            .ok_or_else(|| RedlineError::Structure("main part has no root".to_string()))?;
        let ns_attrs: Vec<(String, String)> = self
            .main
            .elem(root)
            .map(|el| {
                el.attrs
                    .iter()
                    .filter(|(k, _)| k == "xmlns" || k.starts_with("xmlns:"))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if ns_attrs.is_empty() {
            xml.push_str(&format!(" xmlns:w=\"{W_NS}\""));
        } else {
            for (k, v) in ns_attrs {
                xml.push_str(&format!(" {k}=\"{v}\""));
            }
        }
        xml.push_str("/>");
        XmlTree::parse(COMMENTS_PART, xml.as_bytes())
    }

    /// Adds the main-document -> comments relationship and registers the
    /// comments content type, both only if missing.
    pub fn ensure_comments_relationship(&mut self) -> Result<(), RedlineError> {
        self.ensure_relationship()?;
        self.ensure_content_type()
    }

    fn ensure_relationship(&mut self) -> Result<(), RedlineError> {
        if self.rels.is_none() {
            let tree = match self.package.part(DOCUMENT_RELS_PART) {
                Some(bytes) => XmlTree::parse(DOCUMENT_RELS_PART, bytes)?,
                None => {
                    let xml = format!(
                        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n<Relationships xmlns=\"{RELS_NS}\"/>"
                    );
                    XmlTree::parse(DOCUMENT_RELS_PART, xml.as_bytes())?
                }
            };
            self.rels = Some(tree);
        }
        let tree = self.rels.as_mut().expect("rels tree just created");
        let root = tree
            .root_element()
            .ok_or_else(|| RedlineError::Structure("rels part has no root".to_string()))?;

        let mut max_rid = 0u64;
        for &child in tree.children(root).to_vec().iter() {
            if tree.get_attr(child, "Type") == Some(COMMENTS_REL_TYPE) {
                return Ok(());
            }
            if let Some(id) = tree.get_attr(child, "Id") {
                if let Some(n) = id.strip_prefix("rId").and_then(|n| n.parse::<u64>().ok()) {
                    max_rid = max_rid.max(n);
                }
            }
        }

        let rel = tree.new_marker("Relationship");
        tree.set_attr(rel, "Id", &format!("rId{}", max_rid + 1));
        tree.set_attr(rel, "Type", COMMENTS_REL_TYPE);
        tree.set_attr(rel, "Target", "comments.xml");
        tree.push_child(root, rel);
        self.rels_dirty = true;
        Ok(())
    }

    fn ensure_content_type(&mut self) -> Result<(), RedlineError> {
        if self.content_types.is_none() {
            let bytes = self
                .package
                .part(CONTENT_TYPES_PART)
                .ok_or_else(|| RedlineError::MalformedPackage("missing [Content_Types].xml".to_string()))?;
            self.content_types = Some(XmlTree::parse(CONTENT_TYPES_PART, bytes)?);
        }
        let tree = self.content_types.as_mut().expect("content types parsed");
        let root = tree
            .root_element()
            .ok_or_else(|| RedlineError::Structure("content types part has no root".to_string()))?;

        let part_name = format!("/{COMMENTS_PART}");
        for &child in tree.children(root).to_vec().iter() {
            if tree.elem_name(child) == Some("Override")
                && tree.get_attr(child, "PartName") == Some(part_name.as_str())
            {
                return Ok(());
            }
        }

        let over = tree.new_marker("Override");
        tree.set_attr(over, "PartName", &part_name);
        tree.set_attr(over, "ContentType", COMMENTS_CONTENT_TYPE);
        tree.push_child(root, over);
        self.content_types_dirty = true;
        Ok(())
    }

    /// Serializes touched parts and writes the archive. Untouched entries are
    /// copied byte-for-byte, so an edit-free save reproduces the input.
    pub fn save(&self) -> Result<Vec<u8>, RedlineError> {
        let mut replacements: HashMap<String, Vec<u8>> = HashMap::new();
        let mut additions: Vec<(String, Vec<u8>)> = Vec::new();

        if self.main_dirty {
            replacements.insert(MAIN_PART.to_string(), self.main.serialize()?);
        }
        if self.comments_dirty {
            if let Some(tree) = &self.comments {
                let bytes = tree
                    .serialize()
                    .map_err(|e| RedlineError::CommentPartWriteFailure(e.to_string()))?;
                if self.package.has_part(COMMENTS_PART) {
                    replacements.insert(COMMENTS_PART.to_string(), bytes);
                } else {
                    additions.push((COMMENTS_PART.to_string(), bytes));
                }
            }
        }
        if self.rels_dirty {
            if let Some(tree) = &self.rels {
                let bytes = tree.serialize()?;
                if self.package.has_part(DOCUMENT_RELS_PART) {
                    replacements.insert(DOCUMENT_RELS_PART.to_string(), bytes);
                } else {
                    additions.push((DOCUMENT_RELS_PART.to_string(), bytes));
                }
            }
        }
        if self.content_types_dirty {
            if let Some(tree) = &self.content_types {
                replacements.insert(CONTENT_TYPES_PART.to_string(), tree.serialize()?);
            }
        }

        self.package.write(&replacements, &additions)
    }
}
