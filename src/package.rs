use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use zip::ZipWriter;

use crate::converter::archive::{entry_name, zip_options};
use crate::converter::error::ErrorKind;
use crate::converter::input::stem_of;
use crate::converter::output::ConvertedArtifact;

#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error("none of the converted files could be packed")]
    Empty,
    #[error("failed to write archive: {0}")]
    Io(#[from] io::Error),
    #[error("failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl PackagingError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::PackagingFailed
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PackReport {
    /// Entry names written, in order.
    pub packed: Vec<String>,
    /// Artifacts whose file had already disappeared.
    pub skipped: Vec<PathBuf>,
}

/// Zips every artifact into `output`. The artifacts themselves are left in place.
pub async fn pack(
    artifacts: &[ConvertedArtifact],
    output: &Path,
) -> Result<PackReport, PackagingError> {
    let artifacts = artifacts.to_vec();
    let target = output.to_path_buf();
    let result = tokio::task::spawn_blocking(move || write_archive(&artifacts, &target))
        .await
        .map_err(|e| io::Error::other(format!("packaging worker stopped: {}", e)))
        .map_err(PackagingError::from)
        .and_then(|r| r);

    match &result {
        Ok(report) => {
            for path in &report.skipped {
                warn!("{} vanished before packaging, skipped", path.display());
            }
            info!(
                "packed {} files into {}",
                report.packed.len(),
                output.display()
            );
        }
        Err(_) => {
            if let Err(e) = crate::converter::fallback::clear(output).await {
                warn!("failed to remove partial archive {}: {}", output.display(), e);
            }
        }
    }
    result
}

fn write_archive(
    artifacts: &[ConvertedArtifact],
    output: &Path,
) -> Result<PackReport, PackagingError> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(output)?));
    let mut report = PackReport::default();
    let mut taken = HashSet::new();

    for artifact in artifacts {
        let mut source = match File::open(&artifact.path) {
            Ok(file) => BufReader::new(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                report.skipped.push(artifact.path.clone());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let name = unique_name(&entry_name(&artifact.converted_name, "file"), &mut taken);
        zip.start_file(name.as_str(), zip_options())?;
        io::copy(&mut source, &mut zip)?;
        report.packed.push(name);
    }

    if report.packed.is_empty() {
        return Err(PackagingError::Empty);
    }
    zip.finish()?.flush()?;
    Ok(report)
}

/// `name.ext`, then `name (2).ext`, `name (3).ext` and so on.
fn unique_name(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }
    let stem = stem_of(name);
    let ext = &name[stem.len()..];
    (2..)
        .map(|n| format!("{} ({}){}", stem, n, ext))
        .find(|candidate| taken.insert(candidate.clone()))
        .unwrap_or_else(|| name.to_string())
}
