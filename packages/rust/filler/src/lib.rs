//! Produce a filled `.docx` from a source document and the user's answers.
//!
//! Editable sources (DOCX) are rewritten paragraph by paragraph through a
//! [`SubstitutionStrategy`]. Anything else (PDF) is left untouched and a new
//! summary document listing the answers is produced instead.

mod strategy;

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use docfill_docx::{DocumentBuilder, DocxPackage};
use docfill_shared::{Answers, DocfillError, Result, SourceFormat};

pub use strategy::{BestEffortSubstitution, SubstitutionStrategy};

/// Heading of the synthesized summary document.
pub const SUMMARY_TITLE: &str = "Filled Variables";

/// Fill `source` with `answers` and write the result as DOCX to `output`.
///
/// The output is written to a temporary sibling and renamed into place, so a
/// failure never leaves a partial file at `output`.
#[instrument(skip_all, fields(source = %source.display(), %format, answers = answers.len()))]
pub fn fill(
    source: &Path,
    format: SourceFormat,
    answers: &Answers,
    output: &Path,
    strategy: &dyn SubstitutionStrategy,
) -> Result<()> {
    let package = match format {
        SourceFormat::Docx => substitute(source, answers, strategy)?,
        SourceFormat::Pdf => summary_document(answers)
            .map_err(|e| DocfillError::fill(source, e.to_string()))?,
    };

    let bytes = package
        .to_bytes()
        .map_err(|e| DocfillError::fill(output, e.to_string()))?;
    write_atomically(output, &bytes)?;

    info!(output = %output.display(), "filled document written");
    Ok(())
}

fn substitute(
    source: &Path,
    answers: &Answers,
    strategy: &dyn SubstitutionStrategy,
) -> Result<DocxPackage> {
    let mut package =
        DocxPackage::open(source).map_err(|e| DocfillError::fill(source, e.to_string()))?;

    let changed = package
        .rewrite_paragraphs(|text| Some(strategy.apply_to(text, answers)))
        .map_err(|e| DocfillError::fill(source, e.to_string()))?;

    debug!(changed, "paragraphs substituted");
    Ok(package)
}

/// A new document listing every answer as `name: value`.
fn summary_document(answers: &Answers) -> docfill_docx::Result<DocxPackage> {
    answers
        .iter()
        .fold(
            DocumentBuilder::new().heading(SUMMARY_TITLE, 0),
            |doc, (name, value)| doc.paragraph(&format!("{name}: {value}")),
        )
        .build()
}

fn write_atomically(output: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = temp_sibling(output);
    if let Err(e) = std::fs::write(&tmp, bytes) {
        let _ = std::fs::remove_file(&tmp);
        return Err(DocfillError::fill(output, e.to_string()));
    }
    if let Err(e) = std::fs::rename(&tmp, output) {
        warn!(tmp = %tmp.display(), "rename failed, removing temporary output");
        let _ = std::fs::remove_file(&tmp);
        return Err(DocfillError::fill(output, e.to_string()));
    }
    Ok(())
}

/// `<dir>/.<file>.<uuid>.tmp`
fn temp_sibling(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output");
    output.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}
