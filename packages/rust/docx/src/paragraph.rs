//! Body paragraph scanning and rendering.
//!
//! The scanner walks the main document part once and records, for every
//! paragraph that is a direct child of `w:body`, its byte span in the source
//! XML and the text it displays. Spans let the package splice rewritten
//! paragraphs into the original XML without re-serializing anything else.

use std::ops::Range;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

use crate::{Result, xml_error};

/// A body paragraph of the main document part.
#[derive(Debug, Clone)]
pub struct Paragraph {
    /// Displayed text: `w:t` content, `w:tab` as `\t`, `w:br`/`w:cr` as `\n`.
    pub text: String,
    pub(crate) span: Range<usize>,
    open_tag: String,
    prefix: String,
    properties: Option<String>,
    run_properties: Option<String>,
}

impl Paragraph {
    /// Render this paragraph with its runs replaced by a single run of `text`.
    ///
    /// Paragraph properties and the first run's properties are kept; any
    /// other run formatting is lost.
    pub(crate) fn render(&self, text: &str) -> String {
        let p = &self.prefix;
        let mut out = String::with_capacity(self.open_tag.len() + text.len() + 64);
        out.push_str(&self.open_tag);
        if let Some(props) = &self.properties {
            out.push_str(props);
        }
        if !text.is_empty() {
            out.push_str(&format!("<{p}r>"));
            if let Some(props) = &self.run_properties {
                out.push_str(props);
            }
            write_run_content(&mut out, p, text);
            out.push_str(&format!("</{p}r>"));
        }
        out.push_str(&format!("</{p}p>"));
        out
    }
}

/// Emit `w:t`/`w:tab`/`w:br` children of a run for `text`.
fn write_run_content(out: &mut String, prefix: &str, text: &str) {
    let mut pending = String::new();
    for ch in text.chars() {
        match ch {
            '\t' => {
                flush_text(out, prefix, &mut pending);
                out.push_str(&format!("<{prefix}tab/>"));
            }
            '\n' => {
                flush_text(out, prefix, &mut pending);
                out.push_str(&format!("<{prefix}br/>"));
            }
            _ => pending.push(ch),
        }
    }
    flush_text(out, prefix, &mut pending);
}

fn flush_text(out: &mut String, prefix: &str, pending: &mut String) {
    if pending.is_empty() {
        return;
    }
    out.push_str(&format!(
        r#"<{prefix}t xml:space="preserve">{}</{prefix}t>"#,
        escape(pending.as_str())
    ));
    pending.clear();
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Raw-XML capture of an element (`w:pPr` or the first `w:rPr`).
#[derive(Debug, Default)]
struct Capture {
    start: usize,
    depth: usize,
    active: bool,
    done: Option<String>,
}

impl Capture {
    fn begin(&mut self, start: usize, depth: usize) {
        if self.done.is_none() && !self.active {
            self.start = start;
            self.depth = depth;
            self.active = true;
        }
    }

    fn end(&mut self, xml: &str, end: usize, depth: usize) {
        if self.active && self.depth == depth {
            self.done = Some(xml[self.start..end].to_string());
            self.active = false;
        }
    }
}

/// In-progress body paragraph.
#[derive(Debug)]
struct Open {
    start: usize,
    depth: usize,
    open_tag: String,
    prefix: String,
    text: String,
    nested: usize,
    in_text: bool,
    first_run_depth: Option<usize>,
    properties: Capture,
    run_properties: Capture,
}

impl Open {
    fn finish(self, end: usize) -> Paragraph {
        Paragraph {
            text: self.text,
            span: self.start..end,
            open_tag: self.open_tag,
            prefix: self.prefix,
            properties: self.properties.done,
            run_properties: self.run_properties.done,
        }
    }

    /// Handle an opening (or self-closing) child element at `depth`.
    fn open_child(&mut self, local: &[u8], parent: Option<&[u8]>, start: usize, depth: usize) {
        if local == b"p" {
            self.nested += 1;
            return;
        }
        if self.nested > 0 {
            return;
        }
        match local {
            b"pPr" if depth == self.depth + 1 => self.properties.begin(start, depth),
            b"r" if self.first_run_depth.is_none() => self.first_run_depth = Some(depth),
            b"rPr" if self.first_run_depth.map(|d| d + 1) == Some(depth) => {
                self.run_properties.begin(start, depth)
            }
            b"t" => self.in_text = true,
            b"tab" if parent == Some(b"r".as_slice()) => self.text.push('\t'),
            b"br" | b"cr" if parent == Some(b"r".as_slice()) => self.text.push('\n'),
            _ => {}
        }
    }

    /// Handle a closing child element at `depth`.
    fn close_child(&mut self, xml: &str, local: &[u8], end: usize, depth: usize) {
        if local == b"p" {
            self.nested = self.nested.saturating_sub(1);
            return;
        }
        if self.nested > 0 {
            return;
        }
        match local {
            b"pPr" => self.properties.end(xml, end, depth),
            b"rPr" => self.run_properties.end(xml, end, depth),
            b"t" => self.in_text = false,
            _ => {}
        }
    }
}

/// Byte range of the markup that ends at or just before `position`.
///
/// Attribute values cannot contain a literal `<`, so the nearest `<` before
/// the closing `>` starts the tag.
fn tag_bounds(xml: &str, position: usize) -> Range<usize> {
    let position = position.min(xml.len());
    let end = if xml[..position].ends_with('>') {
        position
    } else {
        xml[position..]
            .find('>')
            .map_or(position, |i| position + i + 1)
    };
    let start = xml[..end].rfind('<').unwrap_or(end);
    start..end
}

/// Scan `xml` (the main document part named `part`) for body paragraphs.
pub(crate) fn scan(xml: &str, part: &str) -> Result<Vec<Paragraph>> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current: Option<Open> = None;

    loop {
        let event = reader.read_event().map_err(|e| xml_error(part, e))?;
        let Range { start, end } = tag_bounds(xml, reader.buffer_position());

        match event {
            Event::Start(e) | Event::Empty(e) if current.is_none() => {
                let self_closing = xml[start..end].ends_with("/>");
                let local = e.local_name().as_ref().to_vec();
                let is_body_paragraph =
                    local == b"p" && stack.last().map(Vec::as_slice) == Some(b"body".as_slice());

                if is_body_paragraph {
                    let name = e.name();
                    let qualified = String::from_utf8_lossy(name.as_ref()).into_owned();
                    let prefix = match qualified.rsplit_once(':') {
                        Some((p, _)) => format!("{p}:"),
                        None => String::new(),
                    };
                    let raw = &xml[start..end];
                    let open_tag = if self_closing {
                        format!("{}>", raw.trim_end_matches("/>").trim_end())
                    } else {
                        raw.to_string()
                    };
                    let open = Open {
                        start,
                        depth: stack.len(),
                        open_tag,
                        prefix,
                        text: String::new(),
                        nested: 0,
                        in_text: false,
                        first_run_depth: None,
                        properties: Capture::default(),
                        run_properties: Capture::default(),
                    };
                    if self_closing {
                        paragraphs.push(open.finish(end));
                    } else {
                        current = Some(open);
                        stack.push(local);
                    }
                } else if !self_closing {
                    stack.push(local);
                }
            }
            Event::Start(e) => {
                let local = e.local_name().as_ref().to_vec();
                let depth = stack.len();
                if let Some(open) = current.as_mut() {
                    open.open_child(&local, stack.last().map(Vec::as_slice), start, depth);
                }
                stack.push(local);
            }
            Event::Empty(e) => {
                let local = e.local_name().as_ref().to_vec();
                let depth = stack.len();
                if let Some(open) = current.as_mut() {
                    open.open_child(&local, stack.last().map(Vec::as_slice), start, depth);
                    open.close_child(xml, &local, end, depth);
                }
            }
            Event::End(_) => {
                let local = stack.pop().unwrap_or_default();
                let depth = stack.len();
                let closes_paragraph = current.as_ref().is_some_and(|open| open.depth == depth);
                if closes_paragraph {
                    if let Some(open) = current.take() {
                        paragraphs.push(open.finish(end));
                    }
                } else if let Some(open) = current.as_mut() {
                    open.close_child(xml, &local, end, depth);
                }
            }
            Event::Text(t) => {
                if let Some(open) = current.as_mut() {
                    if open.in_text && open.nested == 0 {
                        let text = t.unescape().map_err(|e| xml_error(part, e))?;
                        open.text.push_str(&text);
                    }
                }
            }
            Event::CData(c) => {
                if let Some(open) = current.as_mut() {
                    if open.in_text && open.nested == 0 {
                        open.text.push_str(&String::from_utf8_lossy(&c));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}
