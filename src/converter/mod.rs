use std::sync::Arc;

use error::ConversionError;
use input::FileDescriptor;
use log::{info, warn};
use output::ConvertedArtifact;
use registry::Registry;
use strategy::ConversionRequest;
use tokio::fs;

use crate::config::Config;

pub mod archive;
pub mod data;
pub mod error;
pub mod fallback;
pub mod format;
pub mod image;
pub mod input;
pub mod media;
pub mod output;
pub mod pdf;
pub mod registry;
pub mod speed;
pub mod strategy;
pub mod text;
pub mod tool;

/// Turns one file into one target format by running the registered chain.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn standard(config: &Config) -> Self {
        Self::new(Registry::standard(config))
    }

    pub async fn convert(
        &self,
        file: &FileDescriptor,
        target: &str,
    ) -> Result<ConvertedArtifact, ConversionError> {
        match fs::metadata(&file.path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(ConversionError::InputMissing(file.path.clone())),
        }

        let request = ConversionRequest::new(file, target);
        if !format::is_supported(&file.extension, &request.target) {
            return Err(ConversionError::Unsupported {
                from: request.source_ext,
                to: request.target,
            });
        }

        let chain = self.registry.chain(request.category, &request.target);
        let resolution = fallback::resolve(chain, &request).await?;
        if !resolution.failed.is_empty() {
            warn!(
                "{} -> {} needed a fallback: {} failed before {}",
                file.name,
                request.target,
                resolution
                    .failed
                    .iter()
                    .map(|a| a.strategy)
                    .collect::<Vec<_>>()
                    .join(", "),
                resolution.strategy
            );
        }

        let size = fs::metadata(&request.output).await?.len();
        info!(
            "converted {} to {} with {} ({} bytes)",
            file.name,
            request.output_name(),
            resolution.strategy,
            size
        );

        Ok(ConvertedArtifact {
            original_name: file.name.clone(),
            converted_name: request.output_name(),
            size,
            path: request.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::error::ErrorKind;

    #[tokio::test]
    async fn missing_input_is_a_storage_error() {
        let dispatcher = Dispatcher::standard(&Config::default());
        let file = FileDescriptor::new("gone.png", 1, "image/png", "/nonexistent/u-gone.png");
        let err = dispatcher.convert(&file, "jpg").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageError);
    }

    #[tokio::test]
    async fn pair_outside_the_table_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u-song.mp3");
        std::fs::write(&path, b"ID3").unwrap();
        let dispatcher = Dispatcher::standard(&Config::default());
        let file = FileDescriptor::new("song.mp3", 3, "audio/mpeg", &path);

        let err = dispatcher.convert(&file, "docx").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedConversion);
        let err = dispatcher.convert(&file, "mp3").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedConversion);
    }

    #[tokio::test]
    async fn unregistered_chain_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u-a.json");
        std::fs::write(&path, b"{}").unwrap();
        let dispatcher = Dispatcher::new(Registry::new());
        let file = FileDescriptor::new("a.json", 2, "application/json", &path);

        let err = dispatcher.convert(&file, "yaml").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedConversion);
    }

    #[tokio::test]
    async fn text_to_pdf_falls_back_when_tools_are_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u-notes.txt");
        std::fs::write(&path, "first line\nsecond line\n").unwrap();
        let missing = dir.path().join("no-such-binary");
        let config = Config::default()
            .with_tool(tool::Tool::Pandoc, &missing)
            .with_tool(tool::Tool::Wkhtmltopdf, &missing);
        let dispatcher = Dispatcher::standard(&config);
        let file = FileDescriptor::new("notes.txt", 23, "text/plain", &path);

        let artifact = dispatcher.convert(&file, "pdf").await.unwrap();

        assert_eq!(artifact.original_name, "notes.txt");
        assert_eq!(artifact.converted_name, "notes.pdf");
        assert!(artifact.size > 0);
        let bytes = std::fs::read(&artifact.path).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }
}
