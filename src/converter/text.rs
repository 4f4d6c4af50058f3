//! Text extraction and the always-available text renderings used as the last
//! link of document fallback chains.

use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tokio::fs;

use super::error::ConversionError;
use super::pdf;
use super::strategy::{ConversionRequest, Strategy};

lazy_static! {
    static ref HIDDEN_BLOCKS: Regex =
        Regex::new(r"(?is)<(script|style|head)\b[^>]*>.*?</(script|style|head)>").unwrap();
    static ref LINE_BREAKS: Regex = Regex::new(
        r"(?i)</(w:p|text:p|text:h|a:p|p|div|li|tr|h[1-6]|title)>|<(br|w:br|text:line-break)\s*/?>"
    )
    .unwrap();
    static ref TABS: Regex = Regex::new(r"(?i)<(w:tab|text:tab)\s*/?>").unwrap();
    static ref TAGS: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    static ref NUMERIC_ENTITY: Regex = Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").unwrap();
    static ref BLANK_RUNS: Regex = Regex::new(r"\n[ \t]*(\n[ \t]*){2,}").unwrap();
}

/// Reads the text content of a source file, first page or slide only for
/// page-oriented formats.
pub async fn extract(path: &Path, source_ext: &str) -> Result<String, ConversionError> {
    let path = path.to_path_buf();
    let source_ext = source_ext.to_string();
    tokio::task::spawn_blocking(move || extract_blocking(&path, &source_ext))
        .await
        .map_err(|e| ConversionError::failed(format!("text extraction stopped: {}", e)))?
}

fn extract_blocking(path: &Path, source_ext: &str) -> Result<String, ConversionError> {
    match source_ext {
        "txt" | "md" | "csv" | "tsv" | "json" | "yaml" | "toml" => {
            Ok(String::from_utf8_lossy(&std::fs::read(path)?).into_owned())
        }
        "html" => Ok(strip_markup(&String::from_utf8_lossy(&std::fs::read(path)?))),
        "docx" => xml_part(path, "word/document.xml"),
        "pptx" => xml_part(path, "ppt/slides/slide1.xml"),
        "odt" | "odp" => xml_part(path, "content.xml"),
        "pdf" => pdf_first_page(&std::fs::read(path)?),
        other => Err(ConversionError::failed(format!(
            "no text extractor for .{}",
            other
        ))),
    }
}

/// Pulls one XML part out of an OOXML/ODF container and strips it to text.
fn xml_part(path: &Path, part: &str) -> Result<String, ConversionError> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| ConversionError::failed(format!("not a valid office container: {}", e)))?;
    let mut entry = archive
        .by_name(part)
        .map_err(|_| ConversionError::failed(format!("document has no {}", part)))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| ConversionError::failed(format!("cannot read {}: {}", part, e)))?;
    Ok(strip_markup(&xml))
}

fn pdf_first_page(bytes: &[u8]) -> Result<String, ConversionError> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ConversionError::failed(format!("cannot read pdf text: {}", e)))?;
    // pages are separated by form feeds
    Ok(text.split('\x0c').next().unwrap_or_default().to_string())
}

/// Drops tags and decodes the common entities, keeping paragraph breaks.
pub fn strip_markup(markup: &str) -> String {
    let text = HIDDEN_BLOCKS.replace_all(markup, "");
    let text = LINE_BREAKS.replace_all(&text, "\n");
    let text = TABS.replace_all(&text, "\t");
    let text = TAGS.replace_all(&text, "");
    let text = NUMERIC_ENTITY.replace_all(&text, |caps: &regex::Captures| {
        let raw = &caps[1];
        let code = match raw.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => raw.parse().ok(),
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&");
    BLANK_RUNS.replace_all(&text, "\n\n").trim().to_string()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// How a [`TextRendering`] writes the extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOutput {
    Plain,
    Html,
    Pdf,
}

/// Degraded conversion: extract whatever text the source has and write it out
/// as plain text, a `<pre>` page or a Helvetica PDF.
pub struct TextRendering(pub TextOutput);

#[async_trait]
impl Strategy for TextRendering {
    fn name(&self) -> &'static str {
        match self.0 {
            TextOutput::Plain => "plain-text",
            TextOutput::Html => "plain-text-html",
            TextOutput::Pdf => "plain-text-pdf",
        }
    }

    async fn attempt(&self, request: &ConversionRequest) -> Result<(), ConversionError> {
        let text = extract(&request.input, &request.source_ext).await?;
        if text.trim().is_empty() {
            return Err(ConversionError::failed("no text could be extracted"));
        }

        let bytes = match self.0 {
            TextOutput::Plain => text.into_bytes(),
            TextOutput::Html => format!(
                "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n<body>\n<pre>{}</pre>\n</body>\n</html>\n",
                escape_html(&request.source_name),
                escape_html(&text)
            )
            .into_bytes(),
            TextOutput::Pdf => pdf::text_document(&text),
        };
        fs::write(&request.output, bytes).await?;
        Ok(())
    }
}

/// In-process PDF text extraction, for when `pdftotext` is missing.
pub struct PdfText;

#[async_trait]
impl Strategy for PdfText {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    async fn attempt(&self, request: &ConversionRequest) -> Result<(), ConversionError> {
        let input: PathBuf = request.input.clone();
        let bytes = fs::read(&input).await?;
        let text = tokio::task::spawn_blocking(move || pdf_first_page(&bytes))
            .await
            .map_err(|e| ConversionError::failed(format!("pdf reader stopped: {}", e)))??;
        if text.trim().is_empty() {
            return Err(ConversionError::failed("pdf has no extractable text"));
        }
        fs::write(&request.output, text).await?;
        Ok(())
    }
}
