//! Minimal single-page PDF writer
//!
//! Just enough of PDF 1.4 to lay out text and rules on one A4 page with the
//! two standard Helvetica faces. Standard fonts need no embedding, so the
//! file is a handful of objects plus a cross-reference table.

use std::fmt::Write as _;

/// A4 in points
pub const PAGE_WIDTH: f32 = 595.0;
pub const PAGE_HEIGHT: f32 = 842.0;

/// Average Helvetica glyph advance, in em, used for right alignment
const AVG_GLYPH_WIDTH: f32 = 0.556;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

/// Drawing operations for one page. Coordinates are measured from the top
/// left corner, in points.
#[derive(Debug, Default, Clone)]
pub struct PdfPage {
    content: String,
}

impl PdfPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, x: f32, top: f32, size: f32, font: Font, text: &str) {
        let y = PAGE_HEIGHT - top;
        // Writing into a String cannot fail
        let _ = writeln!(
            self.content,
            "BT /{} {:.1} Tf {:.2} {:.2} Td ({}) Tj ET",
            font.resource(),
            size,
            x,
            y,
            escape_text(text)
        );
    }

    /// Text whose right edge sits at `right`
    pub fn text_right(&mut self, right: f32, top: f32, size: f32, font: Font, text: &str) {
        let width = text.chars().count() as f32 * size * AVG_GLYPH_WIDTH;
        self.text(right - width, top, size, font, text);
    }

    pub fn line(&mut self, x1: f32, top1: f32, x2: f32, top2: f32, width: f32) {
        let _ = writeln!(
            self.content,
            "{:.2} w {:.2} {:.2} m {:.2} {:.2} l S",
            width,
            x1,
            PAGE_HEIGHT - top1,
            x2,
            PAGE_HEIGHT - top2
        );
    }

    /// Filled rectangle in a gray level between 0 (black) and 1 (white)
    pub fn fill_rect(&mut self, x: f32, top: f32, width: f32, height: f32, gray: f32) {
        let _ = writeln!(
            self.content,
            "q {:.2} g {:.2} {:.2} {:.2} {:.2} re f Q",
            gray.clamp(0.0, 1.0),
            x,
            PAGE_HEIGHT - top - height,
            width,
            height
        );
    }

    /// Serialize as a complete PDF document
    pub fn finish(&self) -> Vec<u8> {
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                 /Resources << /Font << /F1 4 0 R /F2 5 0 R >> >> /Contents 6 0 R >>",
                PAGE_WIDTH, PAGE_HEIGHT
            ),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .to_string(),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>"
                .to_string(),
            format!(
                "<< /Length {} >>\nstream\n{}endstream",
                self.content.len(),
                self.content
            ),
        ];

        let mut out = String::from("%PDF-1.4\n");
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            let _ = write!(out, "{} 0 obj\n{}\nendobj\n", i + 1, body);
        }

        let xref_offset = out.len();
        let _ = write!(out, "xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        for offset in &offsets {
            let _ = write!(out, "{:010} 00000 n \n", offset);
        }
        let _ = write!(
            out,
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        );

        out.into_bytes()
    }
}

/// Escape a string literal for a WinAnsi-encoded font. Non-ASCII glyphs the
/// encoding covers are written as `\ddd` octal escapes, keeping the content
/// stream pure ASCII so the xref byte offsets stay exact. Anything else
/// becomes `?`.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            ' '..='~' => out.push(c),
            '\u{2116}' => out.push_str("No."),
            _ => match win_ansi_byte(c) {
                Some(byte) => {
                    let _ = write!(out, "\\{:03o}", byte);
                }
                None => out.push('?'),
            },
        }
    }
    out
}

/// WinAnsiEncoding code for a non-ASCII character
fn win_ansi_byte(c: char) -> Option<u8> {
    let byte = match c {
        // Latin-1 supplement maps one to one
        '\u{A0}'..='\u{FF}' => c as u32 as u8,
        '\u{20AC}' => 0x80,
        '\u{201A}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201E}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02C6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8A,
        '\u{2039}' => 0x8B,
        '\u{0152}' => 0x8C,
        '\u{017D}' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02DC}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9A,
        '\u{203A}' => 0x9B,
        '\u{0153}' => 0x9C,
        '\u{017E}' => 0x9E,
        '\u{0178}' => 0x9F,
        _ => return None,
    };
    Some(byte)
}
