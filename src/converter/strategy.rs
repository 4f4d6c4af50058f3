use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::error::ConversionError;
use super::format::{canonical, categorize, Category};
use super::input::FileDescriptor;

/// Everything a strategy needs to turn one input into one output file.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub input: PathBuf,
    /// Display name of the source, used for naming outputs and archive entries.
    pub source_name: String,
    /// Canonical source extension.
    pub source_ext: String,
    pub category: Category,
    /// Canonical target extension.
    pub target: String,
    pub output: PathBuf,
}

impl ConversionRequest {
    /// Output goes next to the input: `<input dir>/<display stem>.<target>`.
    pub fn new(file: &FileDescriptor, target: &str) -> Self {
        let dir = file
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let target_ext = target.trim().trim_start_matches('.').to_lowercase();
        Self {
            input: file.path.clone(),
            source_name: file.name.clone(),
            source_ext: canonical(&file.extension),
            category: categorize(&file.extension),
            target: canonical(&target_ext),
            output: dir.join(format!("{}.{}", file.stem(), target_ext)),
        }
    }

    pub fn output_dir(&self) -> &Path {
        self.output.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn output_stem(&self) -> String {
        super::input::stem_of(&self.output_name()).to_string()
    }

    pub fn output_name(&self) -> String {
        self.output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// One way of performing a conversion. Strategies only report success or a typed
/// failure; cleanup of partial output is the resolver's job.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Intermediate paths this strategy may leave behind. Removed after every attempt.
    fn scratch_paths(&self, _request: &ConversionRequest) -> Vec<PathBuf> {
        Vec::new()
    }

    async fn attempt(&self, request: &ConversionRequest) -> Result<(), ConversionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_lands_next_to_input() {
        let file = FileDescriptor::new(
            "Quarterly Report.DOCX",
            1,
            "application/octet-stream",
            "/data/s1/0b7e-Quarterly Report.DOCX",
        );
        let request = ConversionRequest::new(&file, "PDF");
        assert_eq!(request.output, PathBuf::from("/data/s1/Quarterly Report.pdf"));
        assert_eq!(request.source_ext, "docx");
        assert_eq!(request.category, Category::Document);
        assert_eq!(request.target, "pdf");
        assert_eq!(request.output_stem(), "Quarterly Report");
    }

    #[test]
    fn requested_spelling_is_kept_for_the_file_name() {
        let file = FileDescriptor::new("a.png", 1, "image/png", "/s/a.png");
        let request = ConversionRequest::new(&file, "jpeg");
        assert_eq!(request.output, PathBuf::from("/s/a.jpeg"));
        assert_eq!(request.target, "jpg");
    }
}
