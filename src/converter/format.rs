use std::collections::HashMap;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

/// Broad family a source extension belongs to. Strategy chains are keyed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Image,
    Vector,
    Pdf,
    Document,
    Presentation,
    Spreadsheet,
    Text,
    Ebook,
    Data,
    Audio,
    Video,
    Archive,
    Other,
}

lazy_static! {
    pub static ref CATEGORIES: HashMap<&'static str, Category> = {
        let mut map = HashMap::new();
        for ext in ["jpg", "png", "gif", "webp", "bmp", "tiff", "ico"] {
            map.insert(ext, Category::Image);
        }
        map.insert("svg", Category::Vector);
        map.insert("pdf", Category::Pdf);
        for ext in ["docx", "doc", "odt", "rtf"] {
            map.insert(ext, Category::Document);
        }
        for ext in ["pptx", "ppt", "odp"] {
            map.insert(ext, Category::Presentation);
        }
        for ext in ["xlsx", "xls", "ods"] {
            map.insert(ext, Category::Spreadsheet);
        }
        for ext in ["txt", "md", "html"] {
            map.insert(ext, Category::Text);
        }
        map.insert("epub", Category::Ebook);
        for ext in ["json", "yaml", "toml", "csv", "tsv"] {
            map.insert(ext, Category::Data);
        }
        for ext in ["mp3", "wav", "ogg", "m4a", "aac", "flac"] {
            map.insert(ext, Category::Audio);
        }
        for ext in ["mp4", "mov", "avi", "mkv", "webm", "wmv"] {
            map.insert(ext, Category::Video);
        }
        for ext in ["zip", "tar", "tar.gz"] {
            map.insert(ext, Category::Archive);
        }
        map
    };
}

/// Spellings that name the same format as their canonical counterpart.
const ALIASES: &[(&str, &str)] = &[
    ("jpeg", "jpg"),
    ("tif", "tiff"),
    ("yml", "yaml"),
    ("htm", "html"),
    ("markdown", "md"),
    ("tgz", "tar.gz"),
];

impl Category {
    /// Targets offered for this family, in display order.
    pub fn targets(self) -> &'static [&'static str] {
        match self {
            Category::Image => &["jpg", "png", "webp", "gif", "bmp", "tiff", "ico", "pdf", "zip"],
            Category::Vector => &["png", "pdf", "zip"],
            Category::Pdf => &["txt", "png", "jpg", "docx", "zip"],
            Category::Document => &["pdf", "txt", "docx", "odt", "html", "zip"],
            Category::Presentation => &["pdf", "txt", "zip"],
            Category::Spreadsheet => &["pdf", "csv", "xlsx", "zip"],
            Category::Text => &["pdf", "html", "txt", "docx", "zip"],
            Category::Ebook => &["pdf", "txt", "zip"],
            Category::Data => &["json", "yaml", "toml", "csv", "tsv", "zip"],
            Category::Audio => &["mp3", "wav", "ogg", "m4a", "aac", "flac", "zip"],
            Category::Video => &["mp4", "webm", "avi", "mkv", "mov", "gif", "mp3", "zip"],
            Category::Archive => &["zip", "tar.gz"],
            Category::Other => &["zip"],
        }
    }
}

/// Lowercases, strips a leading dot and folds aliases, so "JPEG" and ".jpg" compare equal.
pub fn canonical(extension: &str) -> String {
    let ext = extension.trim().trim_start_matches('.').to_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == ext)
        .map(|(_, canon)| canon.to_string())
        .unwrap_or(ext)
}

pub fn categorize(extension: &str) -> Category {
    CATEGORIES
        .get(canonical(extension).as_str())
        .copied()
        .unwrap_or(Category::Other)
}

/// Formats a file with this extension may be converted into. Never empty: unknown
/// extensions can still be wrapped into an archive.
pub fn supported_targets(extension: &str) -> Vec<&'static str> {
    let source = canonical(extension);
    categorize(extension)
        .targets()
        .iter()
        .filter(|target| canonical(target) != source)
        .copied()
        .collect()
}

pub fn is_supported(extension: &str, target: &str) -> bool {
    let target = canonical(target);
    supported_targets(extension)
        .iter()
        .any(|t| canonical(t) == target)
}
