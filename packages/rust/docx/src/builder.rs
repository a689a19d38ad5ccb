//! Synthesis of small new `.docx` documents.

use std::io::Cursor;

use docx_rs::{BreakType, Docx, Paragraph, Run, Style, StyleType};

use crate::{DocxError, DocxPackage, Result};

/// One paragraph waiting to be written.
#[derive(Debug, Clone)]
struct Block {
    style: Option<&'static str>,
    text: String,
}

/// Builds a new single-section document from headings and paragraphs.
#[derive(Debug, Clone, Default)]
pub struct DocumentBuilder {
    blocks: Vec<Block>,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a heading. Level 0 is the document title; 1 and 2 are
    /// section headings. Deeper levels fall back to level 2.
    pub fn heading(mut self, text: &str, level: u8) -> Self {
        let style = match level {
            0 => "Title",
            1 => "Heading1",
            _ => "Heading2",
        };
        self.blocks.push(Block {
            style: Some(style),
            text: text.to_string(),
        });
        self
    }

    /// Append a plain paragraph.
    pub fn paragraph(mut self, text: &str) -> Self {
        self.blocks.push(Block {
            style: None,
            text: text.to_string(),
        });
        self
    }

    /// Finish the document and load it back as a package.
    pub fn build(self) -> Result<DocxPackage> {
        let docx = self
            .blocks
            .into_iter()
            .fold(styled_docx(), |docx, block| {
                docx.add_paragraph(block.into_paragraph())
            });

        let mut buf = Cursor::new(Vec::new());
        docx.build()
            .pack(&mut buf)
            .map_err(|e| DocxError::Build(e.to_string()))?;
        DocxPackage::from_bytes(&buf.into_inner())
    }
}

impl Block {
    fn into_paragraph(self) -> Paragraph {
        let paragraph = match self.style {
            Some(style) => Paragraph::new().style(style),
            None => Paragraph::new(),
        };
        if self.text.is_empty() {
            paragraph
        } else {
            paragraph.add_run(text_run(&self.text))
        }
    }
}

/// An empty document carrying the heading styles the builder refers to.
fn styled_docx() -> Docx {
    Docx::new()
        .add_style(Style::new("Title", StyleType::Paragraph).name("Title").size(56))
        .add_style(
            Style::new("Heading1", StyleType::Paragraph)
                .name("heading 1")
                .size(32)
                .bold(),
        )
        .add_style(
            Style::new("Heading2", StyleType::Paragraph)
                .name("heading 2")
                .size(26)
                .bold(),
        )
}

/// Tabs and line breaks become their own run elements.
fn text_run(text: &str) -> Run {
    let mut run = Run::new();
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            run = run.add_break(BreakType::TextWrapping);
        }
        for (j, piece) in line.split('\t').enumerate() {
            if j > 0 {
                run = run.add_tab();
            }
            if !piece.is_empty() {
                run = run.add_text(piece);
            }
        }
    }
    run
}
