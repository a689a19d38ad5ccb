//! Minimal WordprocessingML (`.docx`) container handling.
//!
//! A `.docx` file is a ZIP package of XML parts. This crate reads the package
//! into memory, exposes the text of the body paragraphs of the main document
//! part, rewrites individual paragraphs, and synthesizes small new documents.
//!
//! Only body-level paragraphs are visible. Tables, headers, footers, and text
//! boxes are carried through untouched but never read or rewritten.

mod builder;
mod paragraph;

use std::io::{Cursor, Read, Write};
use std::path::Path;

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub use builder::DocumentBuilder;
pub use paragraph::Paragraph;

/// Part name used when the package relationships do not name one.
const DEFAULT_MAIN_PART: &str = "word/document.xml";

/// Package-level relationships part.
const PACKAGE_RELS_PART: &str = "_rels/.rels";

/// Relationship type suffix identifying the main document part.
const OFFICE_DOCUMENT_REL: &str = "/officeDocument";

/// Largest inflated size accepted for a single part.
const MAX_PART_BYTES: u64 = 64 * 1024 * 1024;

/// Largest inflated size accepted for the whole package.
const MAX_PACKAGE_BYTES: u64 = 128 * 1024 * 1024;

/// Errors raised while reading or writing a `.docx` package.
#[derive(Debug, thiserror::Error)]
pub enum DocxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid ZIP package: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("malformed XML in {part}: {message}")]
    Xml { part: String, message: String },

    #[error("part {0} is not UTF-8 encoded")]
    Encoding(String),

    #[error("package has no main document part ({0})")]
    MissingPart(String),

    #[error("{part} inflates past the {limit}-byte limit")]
    TooLarge { part: String, limit: u64 },

    #[error("failed to build document: {0}")]
    Build(String),
}

pub type Result<T> = std::result::Result<T, DocxError>;

/// One named part of the package.
#[derive(Debug, Clone)]
struct Part {
    name: String,
    data: Vec<u8>,
}

/// An in-memory `.docx` package.
#[derive(Debug, Clone)]
pub struct DocxPackage {
    parts: Vec<Part>,
    main_part: String,
}

impl DocxPackage {
    /// Read a package from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Read a package from raw ZIP bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes_within(bytes, MAX_PART_BYTES, MAX_PACKAGE_BYTES)
    }

    fn from_bytes_within(bytes: &[u8], part_limit: u64, package_limit: u64) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut parts = Vec::with_capacity(archive.len());
        let mut total = 0u64;

        for i in 0..archive.len() {
            let file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let remaining = package_limit - total;
            let limit = part_limit.min(remaining);

            // The declared size is untrusted; read one byte past the limit to
            // detect overflow.
            let mut data = Vec::with_capacity(file.size().min(limit) as usize);
            file.take(limit + 1).read_to_end(&mut data)?;
            if data.len() as u64 > limit {
                return Err(if part_limit <= remaining {
                    DocxError::TooLarge {
                        part: name,
                        limit: part_limit,
                    }
                } else {
                    DocxError::TooLarge {
                        part: "package".to_string(),
                        limit: package_limit,
                    }
                });
            }
            total += data.len() as u64;
            parts.push(Part { name, data });
        }

        let main_part = find_main_part(&parts)?;
        if !parts.iter().any(|p| p.name == main_part) {
            return Err(DocxError::MissingPart(main_part));
        }

        debug!(parts = parts.len(), %main_part, bytes = total, "docx package loaded");
        Ok(Self { parts, main_part })
    }

    /// Name of the main document part (usually `word/document.xml`).
    pub fn main_part_name(&self) -> &str {
        &self.main_part
    }

    /// The main document part as UTF-8 XML.
    pub fn document_xml(&self) -> Result<&str> {
        let part = self
            .parts
            .iter()
            .find(|p| p.name == self.main_part)
            .ok_or_else(|| DocxError::MissingPart(self.main_part.clone()))?;
        std::str::from_utf8(&part.data).map_err(|_| DocxError::Encoding(part.name.clone()))
    }

    /// Body paragraphs in document order.
    pub fn paragraphs(&self) -> Result<Vec<Paragraph>> {
        paragraph::scan(self.document_xml()?, &self.main_part)
    }

    /// Text of every body paragraph, in document order.
    pub fn paragraph_texts(&self) -> Result<Vec<String>> {
        Ok(self.paragraphs()?.into_iter().map(|p| p.text).collect())
    }

    /// Rewrite body paragraphs in place.
    ///
    /// `rewrite` receives each paragraph's text and returns `Some(new_text)`
    /// to replace it or `None` to keep it. Kept paragraphs are preserved
    /// byte-for-byte. Returns the number of paragraphs replaced.
    pub fn rewrite_paragraphs<F>(&mut self, mut rewrite: F) -> Result<usize>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let xml = self.document_xml()?;
        let paragraphs = paragraph::scan(xml, &self.main_part)?;

        let mut out = String::with_capacity(xml.len());
        let mut cursor = 0;
        let mut changed = 0;

        for para in &paragraphs {
            let Some(new_text) = rewrite(&para.text) else {
                continue;
            };
            if new_text == para.text {
                continue;
            }
            out.push_str(&xml[cursor..para.span.start]);
            out.push_str(&para.render(&new_text));
            cursor = para.span.end;
            changed += 1;
        }

        if changed == 0 {
            return Ok(0);
        }
        out.push_str(&xml[cursor..]);

        let main_part = self.main_part.clone();
        if let Some(part) = self.parts.iter_mut().find(|p| p.name == main_part) {
            part.data = out.into_bytes();
        }

        debug!(changed, total = paragraphs.len(), "paragraphs rewritten");
        Ok(changed)
    }

    /// Serialize the package to ZIP bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for part in &self.parts {
            writer.start_file(part.name.as_str(), options)?;
            writer.write_all(&part.data)?;
        }

        Ok(writer.finish()?.into_inner())
    }

    /// Write the package to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

/// Resolve the main document part from the package relationships.
fn find_main_part(parts: &[Part]) -> Result<String> {
    let Some(rels) = parts.iter().find(|p| p.name == PACKAGE_RELS_PART) else {
        return Ok(DEFAULT_MAIN_PART.to_string());
    };
    let xml = std::str::from_utf8(&rels.data)
        .map_err(|_| DocxError::Encoding(PACKAGE_RELS_PART.to_string()))?;

    let mut reader = quick_xml::Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Start(e) | quick_xml::events::Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut rel_type = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    let value = attr
                        .unescape_value()
                        .map_err(|err| xml_error(PACKAGE_RELS_PART, err))?
                        .into_owned();
                    match attr.key.as_ref() {
                        b"Type" => rel_type = Some(value),
                        b"Target" => target = Some(value),
                        _ => {}
                    }
                }
                if let (Some(t), Some(target)) = (rel_type, target) {
                    if t.ends_with(OFFICE_DOCUMENT_REL) {
                        return Ok(target.trim_start_matches('/').to_string());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(xml_error(PACKAGE_RELS_PART, err)),
        }
    }

    Ok(DEFAULT_MAIN_PART.to_string())
}

fn xml_error(part: &str, err: impl std::fmt::Display) -> DocxError {
    DocxError::Xml {
        part: part.to_string(),
        message: err.to_string(),
    }
}
