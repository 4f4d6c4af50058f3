//! Just enough PDF to put a JPEG or a run of plain text on pages.
//!
//! Objects are numbered up front with [`PdfWriter::reserve`] so pages can point
//! at their parent before it is written.

use std::io::Write;

/// A4 in points.
const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 50.0;
const FONT_SIZE: f32 = 10.0;
const LEADING: f32 = 14.0;
const WRAP_COLUMNS: usize = 95;

struct PdfWriter {
    buf: Vec<u8>,
    offsets: Vec<Option<usize>>,
}

impl PdfWriter {
    fn new() -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
        Self {
            buf,
            offsets: Vec::new(),
        }
    }

    fn reserve(&mut self) -> usize {
        self.offsets.push(None);
        self.offsets.len()
    }

    fn object(&mut self, id: usize, body: &[u8]) {
        self.offsets[id - 1] = Some(self.buf.len());
        let _ = write!(self.buf, "{} 0 obj\n", id);
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\nendobj\n");
    }

    fn stream(&mut self, id: usize, dict: &str, data: &[u8]) {
        let mut body = format!("<< {} /Length {} >>\nstream\n", dict, data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.object(id, &body);
    }

    fn finish(mut self, root: usize) -> Vec<u8> {
        let xref = self.buf.len();
        let _ = write!(self.buf, "xref\n0 {}\n0000000000 65535 f \n", self.offsets.len() + 1);
        for offset in &self.offsets {
            let _ = write!(self.buf, "{:010} 00000 n \n", offset.unwrap_or(0));
        }
        let _ = write!(
            self.buf,
            "trailer\n<< /Size {} /Root {} 0 R >>\nstartxref\n{}\n%%EOF\n",
            self.offsets.len() + 1,
            root,
            xref
        );
        self.buf
    }
}

/// A one-page document showing a baseline JPEG at its pixel size.
pub fn jpeg_document(width: u32, height: u32, jpeg: &[u8]) -> Vec<u8> {
    let mut pdf = PdfWriter::new();
    let catalog = pdf.reserve();
    let pages = pdf.reserve();
    let page = pdf.reserve();
    let image = pdf.reserve();
    let content = pdf.reserve();

    pdf.object(
        catalog,
        format!("<< /Type /Catalog /Pages {} 0 R >>", pages).as_bytes(),
    );
    pdf.object(
        pages,
        format!("<< /Type /Pages /Kids [{} 0 R] /Count 1 >>", page).as_bytes(),
    );
    pdf.object(
        page,
        format!(
            "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {} {}] /Resources << /XObject << /Im0 {} 0 R >> >> /Contents {} 0 R >>",
            pages, width, height, image, content
        )
        .as_bytes(),
    );
    pdf.stream(
        image,
        &format!(
            "/Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /DCTDecode",
            width, height
        ),
        jpeg,
    );
    let draw = format!("q {} 0 0 {} 0 0 cm /Im0 Do Q", width, height);
    pdf.stream(content, "", draw.as_bytes());

    pdf.finish(catalog)
}

/// Lays plain text out on as many A4 pages as it needs, in Helvetica.
pub fn text_document(text: &str) -> Vec<u8> {
    let lines = wrap(text);
    let per_page = ((PAGE_HEIGHT - 2.0 * MARGIN) / LEADING) as usize;
    let chunks: Vec<&[String]> = if lines.is_empty() {
        vec![lines.as_slice()]
    } else {
        lines.chunks(per_page).collect()
    };

    let mut pdf = PdfWriter::new();
    let catalog = pdf.reserve();
    let pages = pdf.reserve();
    let font = pdf.reserve();
    let page_ids: Vec<(usize, usize)> = chunks
        .iter()
        .map(|_| (pdf.reserve(), pdf.reserve()))
        .collect();

    pdf.object(
        catalog,
        format!("<< /Type /Catalog /Pages {} 0 R >>", pages).as_bytes(),
    );
    let kids = page_ids
        .iter()
        .map(|(page, _)| format!("{} 0 R", page))
        .collect::<Vec<_>>()
        .join(" ");
    pdf.object(
        pages,
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids,
            page_ids.len()
        )
        .as_bytes(),
    );
    pdf.object(
        font,
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>",
    );

    for ((page, content), chunk) in page_ids.iter().zip(chunks) {
        pdf.object(
            *page,
            format!(
                "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {} {}] /Resources << /Font << /F1 {} 0 R >> >> /Contents {} 0 R >>",
                pages, PAGE_WIDTH, PAGE_HEIGHT, font, content
            )
            .as_bytes(),
        );

        let mut ops = format!(
            "BT /F1 {} Tf {} TL {} {} Td\n",
            FONT_SIZE,
            LEADING,
            MARGIN,
            PAGE_HEIGHT - MARGIN - FONT_SIZE
        )
        .into_bytes();
        for line in chunk {
            ops.push(b'(');
            ops.extend_from_slice(&escape(line));
            ops.extend_from_slice(b") Tj T*\n");
        }
        ops.extend_from_slice(b"ET");
        pdf.stream(*content, "", &ops);
    }

    pdf.finish(catalog)
}

fn wrap(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for raw in text.replace("\r\n", "\n").split('\n') {
        let raw = raw.replace('\t', "    ");
        let raw = raw.trim_end();
        if raw.is_empty() {
            lines.push(String::new());
            continue;
        }
        let mut current = String::new();
        for word in raw.split(' ') {
            let fits = current.chars().count() + word.chars().count() < WRAP_COLUMNS;
            if !current.is_empty() && !fits {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            // hard-break words longer than a line
            while current.chars().count() > WRAP_COLUMNS {
                let split = current
                    .char_indices()
                    .nth(WRAP_COLUMNS)
                    .map(|(i, _)| i)
                    .unwrap_or(current.len());
                let rest = current.split_off(split);
                lines.push(std::mem::replace(&mut current, rest));
            }
        }
        lines.push(current);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Escapes a line for a PDF literal string in WinAnsi. Characters outside
/// Latin-1 become '?'.
fn escape(line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            ' '..='~' => out.push(c as u8),
            '\u{a0}'..='\u{ff}' => out.extend_from_slice(format!("\\{:03o}", c as u32).as_bytes()),
            _ => out.push(b'?'),
        }
    }
    out
}
