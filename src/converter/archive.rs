use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::error::ConversionError;
use super::strategy::{ConversionRequest, Strategy};

/// Base name only, so entries can never climb out of the extraction directory.
pub fn entry_name(name: &str, fallback: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(fallback)
        .to_string()
}

pub fn zip_options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

fn archive_error(e: impl std::fmt::Display) -> ConversionError {
    ConversionError::failed(format!("archive error: {}", e))
}

/// Relative path with no `..` or root components, or `None`.
fn safe_relative(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!clean.as_os_str().is_empty()).then_some(clean)
}

enum Sink {
    Zip(ZipWriter<BufWriter<File>>),
    TarGz(tar::Builder<GzEncoder<BufWriter<File>>>),
}

impl Sink {
    fn create(target: &str, output: &Path) -> Result<Self, ConversionError> {
        let file = BufWriter::new(File::create(output)?);
        match target {
            "zip" => Ok(Sink::Zip(ZipWriter::new(file))),
            "tar.gz" => Ok(Sink::TarGz(tar::Builder::new(GzEncoder::new(
                file,
                Compression::default(),
            )))),
            other => Err(ConversionError::failed(format!(
                "no archive writer for .{}",
                other
            ))),
        }
    }

    fn add(&mut self, path: &Path, size: u64, data: &mut dyn Read) -> Result<(), ConversionError> {
        let name = path.to_string_lossy().replace('\\', "/");
        match self {
            Sink::Zip(zip) => {
                zip.start_file(name, zip_options()).map_err(archive_error)?;
                io::copy(data, zip)?;
            }
            Sink::TarGz(tar) => {
                let mut header = tar::Header::new_gnu();
                header.set_size(size);
                header.set_mode(0o644);
                header.set_entry_type(tar::EntryType::Regular);
                header.set_cksum();
                tar.append_data(&mut header, &name, data)?;
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<(), ConversionError> {
        match self {
            Sink::Zip(mut zip) => {
                zip.finish().map_err(archive_error)?.flush()?;
            }
            Sink::TarGz(tar) => {
                tar.into_inner()?.finish()?.flush()?;
            }
        }
        Ok(())
    }
}

fn wrap(input: &Path, entry: &str, output: &Path) -> Result<(), ConversionError> {
    let mut source = BufReader::new(File::open(input)?);
    let size = source.get_ref().metadata()?.len();
    let mut sink = Sink::create("zip", output)?;
    sink.add(Path::new(entry), size, &mut source)?;
    sink.finish()
}

fn repack(input: &Path, source_ext: &str, target: &str, output: &Path) -> Result<(), ConversionError> {
    let mut sink = Sink::create(target, output)?;
    match source_ext {
        "zip" => {
            let mut archive = ZipArchive::new(BufReader::new(File::open(input)?)).map_err(archive_error)?;
            for i in 0..archive.len() {
                let mut entry = archive.by_index(i).map_err(archive_error)?;
                if entry.is_dir() {
                    continue;
                }
                let Some(path) = entry.enclosed_name().and_then(safe_relative) else {
                    continue;
                };
                let size = entry.size();
                sink.add(&path, size, &mut entry)?;
            }
        }
        "tar" | "tar.gz" => {
            let file = BufReader::new(File::open(input)?);
            let reader: Box<dyn Read> = if source_ext == "tar.gz" {
                Box::new(GzDecoder::new(file))
            } else {
                Box::new(file)
            };
            let mut archive = tar::Archive::new(reader);
            for entry in archive.entries()? {
                let mut entry = entry?;
                if !entry.header().entry_type().is_file() {
                    continue;
                }
                let Some(path) = safe_relative(&entry.path()?) else {
                    continue;
                };
                let size = entry.size();
                sink.add(&path, size, &mut entry)?;
            }
        }
        other => {
            return Err(ConversionError::failed(format!(
                "no archive reader for .{}",
                other
            )))
        }
    }
    sink.finish()
}

async fn blocking<F>(work: F) -> Result<(), ConversionError>
where
    F: FnOnce() -> Result<(), ConversionError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ConversionError::failed(format!("archive worker stopped: {}", e)))?
}

/// Puts a single file into a deflated zip under its display name.
pub struct ArchiveWrap;

#[async_trait]
impl Strategy for ArchiveWrap {
    fn name(&self) -> &'static str {
        "zip-wrap"
    }

    async fn attempt(&self, request: &ConversionRequest) -> Result<(), ConversionError> {
        let entry = entry_name(&request.source_name, "file");
        let (input, output) = (request.input.clone(), request.output.clone());
        blocking(move || wrap(&input, &entry, &output)).await
    }
}

/// Moves the entries of one archive format into another.
pub struct ArchiveRepack;

#[async_trait]
impl Strategy for ArchiveRepack {
    fn name(&self) -> &'static str {
        "archive-repack"
    }

    async fn attempt(&self, request: &ConversionRequest) -> Result<(), ConversionError> {
        let (input, output) = (request.input.clone(), request.output.clone());
        let (source_ext, target) = (request.source_ext.clone(), request.target.clone());
        blocking(move || repack(&input, &source_ext, &target, &output)).await
    }
}
