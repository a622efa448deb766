//! Paginated A4 PDF export with an optional trace appendix.
//!
//! Layout is computed in points from the top-left corner and converted to
//! PDF coordinates only when the pages are drawn.

use super::export::{ExportMeta, EXPORT_GENERATOR};
use crate::util::errors::{DistillError, DistillResult};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, Pt};
use regex::Regex;
use std::sync::OnceLock;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const PAGE_HEIGHT_PT: f32 = 841.89;
const MARGIN_PT: f32 = 56.0;
/// Lowest baseline allowed on a page, measured from the top.
const BOTTOM_PT: f32 = 812.0;
const LAYER_NAME: &str = "Text";
const PDF_SUBJECT: &str = "Book excerpt";
const EMPTY_BODY: &str = "(empty)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Serif,
    Mono,
}

#[derive(Debug, Clone, Copy)]
struct TextStyle {
    face: Face,
    size: f32,
    leading: f32,
    /// Extra space after each source line.
    gap: f32,
    /// Row width in characters for a 483pt text column.
    wrap_chars: usize,
}

const BODY_STYLE: TextStyle = TextStyle {
    face: Face::Serif,
    size: 12.0,
    leading: 16.0,
    gap: 4.0,
    wrap_chars: 80,
};

const TRACE_STYLE: TextStyle = TextStyle {
    face: Face::Mono,
    size: 11.0,
    leading: 14.0,
    gap: 2.0,
    wrap_chars: 72,
};

#[derive(Debug, Clone, PartialEq)]
struct PlacedLine {
    text: String,
    face: Face,
    size: f32,
    /// Baseline, points from the top of the page.
    y: f32,
}

#[derive(Default)]
struct PageFlow {
    pages: Vec<Vec<PlacedLine>>,
    y: f32,
}

impl PageFlow {
    fn new_page(&mut self) {
        self.pages.push(Vec::new());
        self.y = MARGIN_PT;
    }

    fn place(&mut self, line: &str, style: TextStyle) {
        if self.pages.is_empty() {
            self.new_page();
        }
        let rows = wrap(line, style.wrap_chars);
        let height = rows.len() as f32 * style.leading;
        if self.y + height > BOTTOM_PT && self.y > MARGIN_PT {
            self.new_page();
        }
        for text in rows {
            if self.y + style.leading > BOTTOM_PT {
                self.new_page();
            }
            if !text.is_empty() {
                if let Some(page) = self.pages.last_mut() {
                    page.push(PlacedLine {
                        text,
                        face: style.face,
                        size: style.size,
                        y: self.y,
                    });
                }
            }
            self.y += style.leading;
        }
        self.y += style.gap;
    }
}

/// Render the combined text, plus the trace JSON on its own pages when given.
pub fn render_pdf(meta: &ExportMeta, body: &str, trace_json: Option<&str>) -> DistillResult<Vec<u8>> {
    let pages = layout_pages(body, trace_json);

    let (doc, first_page, first_layer) = PdfDocument::new(
        meta.title.clone(),
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        LAYER_NAME,
    );
    let doc = doc
        .with_subject(PDF_SUBJECT)
        .with_keywords(vec!["Gemini".to_string(), meta.model.clone()])
        .with_creator(EXPORT_GENERATOR)
        .with_producer(EXPORT_GENERATOR);

    let serif = doc.add_builtin_font(BuiltinFont::TimesRoman).map_err(pdf_error)?;
    let mono = doc.add_builtin_font(BuiltinFont::Courier).map_err(pdf_error)?;
    for (index, lines) in pages.iter().enumerate() {
        let layer = if index == 0 {
            doc.get_page(first_page).get_layer(first_layer)
        } else {
            let (page, layer) = doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), LAYER_NAME);
            doc.get_page(page).get_layer(layer)
        };
        for line in lines {
            let font: &IndirectFontRef = match line.face {
                Face::Serif => &serif,
                Face::Mono => &mono,
            };
            layer.use_text(
                line.text.clone(),
                line.size,
                Mm::from(Pt(MARGIN_PT)),
                Mm::from(Pt(PAGE_HEIGHT_PT - line.y)),
                font,
            );
        }
    }

    let bytes = doc.save_to_bytes().map_err(pdf_error)?;
    log::debug!("Rendered PDF: pages={}, bytes={}", pages.len(), bytes.len());
    Ok(bytes)
}

fn pdf_error(err: printpdf::Error) -> DistillError {
    DistillError::Export(err.to_string())
}

fn layout_pages(body: &str, trace_json: Option<&str>) -> Vec<Vec<PlacedLine>> {
    let mut flow = PageFlow::default();

    let stripped = strip_markdown(body);
    let text = if stripped.trim().is_empty() {
        EMPTY_BODY.to_string()
    } else {
        stripped
    };
    for line in text.split('\n') {
        flow.place(&pdf_safe(line), BODY_STYLE);
    }

    if let Some(trace) = trace_json {
        flow.new_page();
        for line in trace.split('\n') {
            flow.place(&pdf_safe(line), TRACE_STYLE);
        }
    }
    flow.pages
}

/// Drop heading, quote, emphasis and rule markup; squeeze runs of blank lines.
fn strip_markdown(markdown: &str) -> String {
    static MARKUP: OnceLock<Regex> = OnceLock::new();
    static BLANKS: OnceLock<Regex> = OnceLock::new();
    let markup = MARKUP.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*-{3,}[ \t]*$|^[ \t]{0,3}(?:#{1,6}[ \t]+|>[ \t]?)|[*_`~]+")
            .expect("valid markup regex")
    });
    let blanks = BLANKS.get_or_init(|| Regex::new(r"\n{3,}").expect("valid blank-line regex"));
    let stripped = markup.replace_all(markdown, "");
    blanks.replace_all(&stripped, "\n\n").into_owned()
}

/// Built-in PDF fonts only cover ASCII reliably.
fn pdf_safe(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.trim_end_matches('\r').chars() {
        match c {
            '\t' => out.push_str("    "),
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2013}' | '\u{2014}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{00A0}' => out.push(' '),
            c if c.is_ascii_control() => {}
            c if c.is_ascii() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

/// Word-wrap to `width` characters, keeping leading indentation and
/// hard-splitting words longer than a row.
fn wrap(line: &str, width: usize) -> Vec<String> {
    let line = line.trim_end();
    if line.chars().count() <= width {
        return vec![line.to_string()];
    }
    let indent_len = line
        .chars()
        .take_while(|c| c.is_whitespace())
        .count()
        .min(width / 2);
    let indent = " ".repeat(indent_len);

    let mut rows = Vec::new();
    let mut row = indent.clone();
    let mut row_len = indent_len;
    for word in line.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        loop {
            let sep = usize::from(row_len > indent_len);
            if row_len + sep + word.len() <= width {
                if sep == 1 {
                    row.push(' ');
                }
                row.extend(word.iter());
                row_len += sep + word.len();
                break;
            }
            if row_len > indent_len {
                rows.push(std::mem::replace(&mut row, indent.clone()));
                row_len = indent_len;
                continue;
            }
            let take = width - indent_len;
            row.extend(word[..take].iter());
            rows.push(std::mem::replace(&mut row, indent.clone()));
            word.drain(..take);
        }
    }
    if row_len > indent_len {
        rows.push(row);
    }
    rows
}
