//! Plain text to PDF.
//!
//! Writes a minimal PDF 1.4 document by hand: US Letter pages, the built-in
//! Courier font with WinAnsi encoding, hard-wrapped lines. No layout engine
//! is involved, so the output is predictable and small.

use std::fmt::Write as _;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;

use crate::domain::format::ConversionPair;
use crate::ports::{ByteStream, bytes_stream};

use super::{ConversionInput, ConvertError, Converter, ProgressReporter};

const SOURCES: [&str; 4] = ["txt", "md", "csv", "log"];

const PAGE_WIDTH: u32 = 612;
const PAGE_HEIGHT: u32 = 792;
const MARGIN_LEFT: u32 = 36;
const TOP_BASELINE: u32 = 750;
const FONT_SIZE: u32 = 10;
const LEADING: u32 = 12;
const COLUMNS: usize = 90;
const LINES_PER_PAGE: usize = 58;
const TAB: &str = "    ";

/// Share of the progress bar spent reading the input.
const READ_SHARE: u64 = 30;

#[derive(Debug, Default, Clone, Copy)]
pub struct TextToPdf;

impl TextToPdf {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Converter for TextToPdf {
    fn name(&self) -> &str {
        "text-pdf"
    }

    fn pairs(&self) -> Vec<ConversionPair> {
        SOURCES
            .iter()
            .map(|source| ConversionPair::new(*source, "pdf"))
            .collect()
    }

    async fn convert(
        &self,
        input: ConversionInput,
        progress: ProgressReporter,
    ) -> Result<ByteStream<'static>, ConvertError> {
        let ConversionInput { size, mut body, .. } = input;

        let mut buf = BytesMut::with_capacity(size.min(1 << 20) as usize);
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
            progress.report_fraction(buf.len() as u64 * READ_SHARE, size.max(1) * 100);
        }

        let pdf = tokio::task::spawn_blocking(move || {
            let text = std::str::from_utf8(&buf)
                .map_err(|err| ConvertError::Corrupt(format!("input is not UTF-8 text: {err}")))?;
            let lines = layout(text.strip_prefix('\u{feff}').unwrap_or(text));
            Ok::<_, ConvertError>(render(&lines, &progress))
        })
        .await
        .map_err(|err| ConvertError::Io(std::io::Error::other(err)))??;

        Ok(bytes_stream(pdf))
    }
}

/// Split text into display lines: tabs expanded, control characters
/// dropped, long lines hard-wrapped.
fn layout(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for raw in text.lines() {
        let expanded = raw.replace('\t', TAB);
        let chars: Vec<char> = expanded.chars().filter(|c| !c.is_control()).collect();
        if chars.is_empty() {
            lines.push(String::new());
            continue;
        }
        for piece in chars.chunks(COLUMNS) {
            lines.push(piece.iter().collect());
        }
    }
    lines
}

/// Escape a line for a PDF literal string in WinAnsi encoding.
fn escape(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            '\u{a0}'..='\u{ff}' => {
                let _ = write!(out, "\\{:03o}", c as u32);
            }
            _ => out.push('?'),
        }
    }
    out
}

fn page_content(lines: &[String]) -> String {
    let mut content = format!(
        "BT\n/F1 {FONT_SIZE} Tf\n{LEADING} TL\n{MARGIN_LEFT} {TOP_BASELINE} Td\n"
    );
    for line in lines {
        let _ = writeln!(content, "({}) Tj T*", escape(line));
    }
    content.push_str("ET\n");
    content
}

fn render(lines: &[String], progress: &ProgressReporter) -> Vec<u8> {
    let pages: Vec<&[String]> = if lines.is_empty() {
        vec![lines]
    } else {
        lines.chunks(LINES_PER_PAGE).collect()
    };

    // 1: catalog, 2: page tree, 3: font, then (page, content) per page.
    let page_ids: Vec<usize> = (0..pages.len()).map(|i| 4 + 2 * i).collect();
    let mut objects: Vec<Vec<u8>> = Vec::with_capacity(3 + 2 * pages.len());

    objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
    let kids: Vec<String> = page_ids.iter().map(|id| format!("{id} 0 R")).collect();
    objects.push(
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        )
        .into_bytes(),
    );
    objects.push(
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Courier /Encoding /WinAnsiEncoding >>"
            .to_vec(),
    );

    let total = pages.len() as u64;
    for (index, (page, page_id)) in pages.iter().zip(&page_ids).enumerate() {
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                page_id + 1
            )
            .into_bytes(),
        );
        let content = page_content(page);
        let mut stream = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
        stream.extend_from_slice(content.as_bytes());
        stream.extend_from_slice(b"endstream");
        objects.push(stream);

        let done = index as u64 + 1;
        progress.report_fraction(READ_SHARE * total + done * (99 - READ_SHARE), 100 * total);
    }

    let mut pdf = b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        pdf.extend_from_slice(body);
        pdf.extend_from_slice(b"\nendobj\n");
    }

    let xref_at = pdf.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        let _ = writeln!(xref, "{offset:010} 00000 n ");
    }
    let _ = write!(
        xref,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
        objects.len() + 1
    );
    pdf.extend_from_slice(xref.as_bytes());
    pdf
}
