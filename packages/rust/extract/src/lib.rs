//! Plain-text normalization of uploaded documents.
//!
//! Every supported format is reduced to a single string:
//! - DOCX: body paragraphs in order, one per line (empty paragraphs kept as
//!   empty lines). Tables, headers, footers and formatting are dropped.
//! - PDF: text of each page in order, each page followed by a newline.
//!
//! Failures are reported as [`DocfillError::Extraction`]; an unreadable file
//! never turns into empty text.

use std::path::Path;

use tracing::{debug, instrument};

use docfill_docx::DocxPackage;
use docfill_shared::{DocfillError, Result, SourceFormat};

/// Extract text from the document at `path`, dispatching on `format`.
#[instrument(skip_all, fields(path = %path.display(), %format))]
pub fn extract(path: &Path, format: SourceFormat) -> Result<String> {
    let text = match format {
        SourceFormat::Docx => extract_docx(path)?,
        SourceFormat::Pdf => extract_pdf(path)?,
    };
    debug!(chars = text.chars().count(), "text extracted");
    Ok(text)
}

/// Extract text, detecting the format from the file extension.
pub fn extract_file(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let format = SourceFormat::from_file_name(name)?;
    extract(path, format)
}

fn extract_docx(path: &Path) -> Result<String> {
    let package =
        DocxPackage::open(path).map_err(|e| DocfillError::extraction(path, e.to_string()))?;
    let paragraphs = package
        .paragraph_texts()
        .map_err(|e| DocfillError::extraction(path, e.to_string()))?;
    Ok(paragraphs.join("\n"))
}

fn extract_pdf(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| DocfillError::extraction(path, e.to_string()))?;
    extract_pdf_bytes(&bytes).map_err(|message| DocfillError::extraction(path, message))
}

/// Page-ordered PDF text. `pdf-extract` can panic on some malformed
/// streams, so a panic is reported like any other parse failure.
fn extract_pdf_bytes(bytes: &[u8]) -> std::result::Result<String, String> {
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| "PDF parser panicked on malformed input".to_string())?
        .map_err(|e| e.to_string())?;

    let mut text = String::new();
    for page in &pages {
        text.push_str(page);
        text.push('\n');
    }
    debug!(pages = pages.len(), "pdf pages extracted");
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docfill_docx::DocumentBuilder;
    use std::path::PathBuf;

    fn temp_path(ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!("docfill_extract_{}.{ext}", uuid::Uuid::new_v4()))
    }

    /// Generate a PDF with one page per entry using lopdf.
    fn make_test_pdf(pages: &[&str]) -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::{Document, Object, Stream};

        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = format!("BT /F1 12 Tf 100 700 Td ({text}) Tj ET");
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                },
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let path = temp_path("docx");
        DocumentBuilder::new()
            .paragraph("This Agreement is made on [Date]")
            .paragraph("")
            .paragraph("between [Client Name] and the Firm.")
            .build()
            .unwrap()
            .save(&path)
            .unwrap();

        let text = extract(&path, SourceFormat::Docx).expect("extract docx");
        assert_eq!(
            text,
            "This Agreement is made on [Date]\n\nbetween [Client Name] and the Firm."
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn empty_docx_yields_empty_text() {
        let path = temp_path("docx");
        DocumentBuilder::new().build().unwrap().save(&path).unwrap();
        assert_eq!(extract(&path, SourceFormat::Docx).unwrap(), "");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn pdf_pages_in_order_with_trailing_newlines() {
        let path = temp_path("pdf");
        std::fs::write(&path, make_test_pdf(&["First page", "Second page"])).unwrap();

        let text = extract(&path, SourceFormat::Pdf).expect("extract pdf");
        let first = text.find("First").expect("first page text");
        let second = text.find("Second").expect("second page text");
        assert!(first < second);
        assert!(text.ends_with('\n'));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_pdf_is_an_extraction_error() {
        let path = temp_path("pdf");
        std::fs::write(&path, b"%PDF-1.4 this is not really a pdf").unwrap();
        let err = extract(&path, SourceFormat::Pdf).unwrap_err();
        assert!(matches!(err, DocfillError::Extraction { .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_docx_is_an_extraction_error() {
        let path = temp_path("docx");
        std::fs::write(&path, b"not a zip archive").unwrap();
        let err = extract(&path, SourceFormat::Docx).unwrap_err();
        assert!(matches!(err, DocfillError::Extraction { .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_an_extraction_error() {
        let path = temp_path("docx");
        let err = extract(&path, SourceFormat::Docx).unwrap_err();
        assert!(matches!(err, DocfillError::Extraction { .. }));
    }

    #[test]
    fn extract_file_rejects_unknown_extension() {
        let err = extract_file(Path::new("/tmp/notes.txt")).unwrap_err();
        assert!(matches!(err, DocfillError::UnsupportedFormat { .. }));
    }
}
