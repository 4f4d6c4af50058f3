use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

/// An uploaded file as handed over by the collaborator. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Display name as uploaded, e.g. "holiday.jpg".
    pub name: String,
    pub size: u64,
    pub mime: String,
    /// Lowercase, without the leading dot.
    pub extension: String,
    pub path: PathBuf,
}

impl FileDescriptor {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        mime: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        let name = name.into();
        Self {
            extension: extension_of(&name),
            name,
            size,
            mime: mime.into(),
            path: path.into(),
        }
    }

    /// Builds a descriptor for a file already written to storage.
    pub async fn from_upload(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let path = path.into();
        let size = fs::metadata(&path).await?.len();
        let mime = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .to_string();
        Ok(Self::new(name, size, mime, path))
    }

    pub fn stem(&self) -> &str {
        stem_of(&self.name)
    }
}

/// Extension of a file name, lowercase. Knows about `.tar.gz`.
pub fn extension_of(name: &str) -> String {
    let base = base_name(name);
    if has_tar_gz_suffix(base) {
        return "tar.gz".to_string();
    }
    Path::new(base)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// File name without directories and without its extension.
pub fn stem_of(name: &str) -> &str {
    let base = base_name(name);
    if has_tar_gz_suffix(base) {
        return &base[..base.len() - ".tar.gz".len()];
    }
    match base.rfind('.') {
        Some(0) | None => base,
        Some(idx) => &base[..idx],
    }
}

fn has_tar_gz_suffix(name: &str) -> bool {
    name.len() > ".tar.gz".len()
        && name
            .get(name.len() - ".tar.gz".len()..)
            .is_some_and(|suffix| suffix.eq_ignore_ascii_case(".tar.gz"))
}

fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_normalized() {
        assert_eq!(extension_of("Photo.JPG"), "jpg");
        assert_eq!(extension_of("backup.TAR.GZ"), "tar.gz");
        assert_eq!(extension_of("README"), "");
        assert_eq!(extension_of(".env"), "");
    }

    #[test]
    fn stem_strips_directories_and_extension() {
        assert_eq!(stem_of("report.final.docx"), "report.final");
        assert_eq!(stem_of("../../etc/passwd.txt"), "passwd");
        assert_eq!(stem_of("site.tar.gz"), "site");
        assert_eq!(stem_of(".env"), ".env");
    }

    #[test]
    fn descriptor_derives_extension_from_name() {
        let file = FileDescriptor::new("Scan.PNG", 10, "image/png", "/tmp/abc-Scan.PNG");
        assert_eq!(file.extension, "png");
        assert_eq!(file.stem(), "Scan");
    }
}
