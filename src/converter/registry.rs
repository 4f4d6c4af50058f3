use std::collections::HashMap;
use std::sync::Arc;

use strum::IntoEnumIterator;

use super::archive::{ArchiveRepack, ArchiveWrap};
use super::data::DataTranscode;
use super::format::Category;
use super::image::{ImageReencode, ImageToPdf};
use super::strategy::Strategy;
use super::text::{PdfText, TextOutput, TextRendering};
use super::tool::{ExternalTool, Tool};
use crate::config::Config;

/// Ordered strategy chains keyed by source category and canonical target.
#[derive(Default, Clone)]
pub struct Registry {
    chains: HashMap<Category, HashMap<&'static str, Vec<Arc<dyn Strategy>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pair of the capability table, in priority order.
    pub fn standard(config: &Config) -> Self {
        let tool = |t: Tool| -> Arc<dyn Strategy> { Arc::new(ExternalTool::new(t, config)) };
        let plain: Arc<dyn Strategy> = Arc::new(TextRendering(TextOutput::Plain));
        let html: Arc<dyn Strategy> = Arc::new(TextRendering(TextOutput::Html));
        let text_pdf: Arc<dyn Strategy> = Arc::new(TextRendering(TextOutput::Pdf));

        let mut registry = Self::new();

        for target in ["jpg", "png", "webp", "gif", "bmp", "tiff", "ico"] {
            registry.insert(Category::Image, target, vec![Arc::new(ImageReencode)]);
        }
        registry.insert(Category::Image, "pdf", vec![Arc::new(ImageToPdf)]);

        for target in ["png", "pdf"] {
            registry.insert(
                Category::Vector,
                target,
                vec![tool(Tool::Inkscape), tool(Tool::RsvgConvert)],
            );
        }

        registry.insert(
            Category::Pdf,
            "txt",
            vec![tool(Tool::PdfToText), Arc::new(PdfText)],
        );
        for target in ["png", "jpg"] {
            registry.insert(
                Category::Pdf,
                target,
                vec![tool(Tool::PdfToPpm), tool(Tool::Ghostscript)],
            );
        }
        registry.insert(Category::Pdf, "docx", vec![tool(Tool::LibreOffice)]);

        registry.insert(
            Category::Document,
            "pdf",
            vec![tool(Tool::LibreOffice), tool(Tool::Pandoc), text_pdf.clone()],
        );
        registry.insert(
            Category::Document,
            "txt",
            vec![tool(Tool::Pandoc), tool(Tool::LibreOffice), plain.clone()],
        );
        for target in ["docx", "odt"] {
            registry.insert(
                Category::Document,
                target,
                vec![tool(Tool::LibreOffice), tool(Tool::Pandoc)],
            );
        }
        registry.insert(
            Category::Document,
            "html",
            vec![tool(Tool::LibreOffice), tool(Tool::Pandoc), html.clone()],
        );

        registry.insert(
            Category::Presentation,
            "pdf",
            vec![tool(Tool::LibreOffice), text_pdf.clone()],
        );
        registry.insert(Category::Presentation, "txt", vec![plain.clone()]);

        for target in ["pdf", "csv", "xlsx"] {
            registry.insert(Category::Spreadsheet, target, vec![tool(Tool::LibreOffice)]);
        }

        registry.insert(
            Category::Text,
            "pdf",
            vec![tool(Tool::Pandoc), tool(Tool::Wkhtmltopdf), text_pdf.clone()],
        );
        registry.insert(Category::Text, "html", vec![tool(Tool::Pandoc), html]);
        registry.insert(Category::Text, "txt", vec![tool(Tool::Pandoc), plain.clone()]);
        registry.insert(
            Category::Text,
            "docx",
            vec![tool(Tool::Pandoc), tool(Tool::LibreOffice)],
        );

        registry.insert(
            Category::Ebook,
            "pdf",
            vec![tool(Tool::EbookConvert), tool(Tool::Pandoc)],
        );
        registry.insert(
            Category::Ebook,
            "txt",
            vec![tool(Tool::Pandoc), tool(Tool::EbookConvert)],
        );

        for &target in Category::Data.targets() {
            if target != "zip" {
                registry.insert(Category::Data, target, vec![Arc::new(DataTranscode)]);
            }
        }

        for category in [Category::Audio, Category::Video] {
            for &target in category.targets() {
                if target != "zip" {
                    registry.insert(category, target, vec![tool(Tool::Ffmpeg)]);
                }
            }
        }

        for target in ["zip", "tar.gz"] {
            registry.insert(Category::Archive, target, vec![Arc::new(ArchiveRepack)]);
        }

        for category in Category::iter().filter(|c| *c != Category::Archive) {
            registry.insert(category, "zip", vec![Arc::new(ArchiveWrap)]);
        }

        registry
    }

    /// Replaces the chain for one pair.
    pub fn insert(
        &mut self,
        category: Category,
        target: &'static str,
        chain: Vec<Arc<dyn Strategy>>,
    ) {
        self.chains.entry(category).or_default().insert(target, chain);
    }

    /// Strategies for a pair, best first. Empty when nothing is registered.
    pub fn chain(&self, category: Category, target: &str) -> &[Arc<dyn Strategy>] {
        self.chains
            .get(&category)
            .and_then(|targets| targets.get(target))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
