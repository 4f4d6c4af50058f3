use std::ffi::OsString;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use log::info;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, IntoStaticStr};
use tokio::fs;
use tokio::process::Command;

use super::error::ConversionError;
use super::media;
use super::speed::ConversionSpeed;
use super::strategy::{ConversionRequest, Strategy};
use crate::config::Config;

/// External converters the registry knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
pub enum Tool {
    #[strum(serialize = "ffmpeg")]
    Ffmpeg,
    #[strum(serialize = "libreoffice")]
    LibreOffice,
    #[strum(serialize = "pandoc")]
    Pandoc,
    #[strum(serialize = "pdftotext")]
    PdfToText,
    #[strum(serialize = "pdftoppm")]
    PdfToPpm,
    #[strum(serialize = "gs")]
    Ghostscript,
    #[strum(serialize = "inkscape")]
    Inkscape,
    #[strum(serialize = "rsvg-convert")]
    RsvgConvert,
    #[strum(serialize = "wkhtmltopdf")]
    Wkhtmltopdf,
    #[strum(serialize = "ebook-convert")]
    EbookConvert,
}

impl Tool {
    /// Binary name looked up on PATH unless overridden in config.
    pub fn binary(&self) -> &'static str {
        self.into()
    }

    /// Environment variable that overrides the binary path.
    pub fn env_key(&self) -> String {
        format!(
            "CONVERTD_TOOL_{}",
            self.binary().to_uppercase().replace('-', "_")
        )
    }

    fn version_args(&self) -> &'static [&'static str] {
        match self {
            Tool::Ffmpeg => &["-version"],
            Tool::PdfToText | Tool::PdfToPpm => &["-v"],
            _ => &["--version"],
        }
    }
}

/// Asks a tool for its version. Used at startup to log what is installed.
pub async fn tool_version(tool: Tool, program: &Path) -> anyhow::Result<String> {
    let output = tokio::time::timeout(
        Duration::from_secs(10),
        Command::new(program)
            .args(tool.version_args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| anyhow!("{} did not answer in time", tool))??;

    // poppler prints its version on stderr
    let text = if output.stdout.is_empty() {
        String::from_utf8(output.stderr)?
    } else {
        String::from_utf8(output.stdout)?
    };
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("{} printed no version", tool))?;

    // from "ffmpeg version 7.1 .... .. .. . ." get "7.1"
    if tool == Tool::Ffmpeg {
        if let Some(version) = line.split_whitespace().nth(2) {
            return Ok(version.to_string());
        }
    }
    Ok(line.to_string())
}

pub async fn report_versions(config: &Config) -> Vec<(Tool, anyhow::Result<String>)> {
    let mut results = Vec::new();
    for tool in Tool::iter() {
        let result = tool_version(tool, &config.program(tool)).await;
        results.push((tool, result));
    }
    results
}

/// A command line to run plus where the tool leaves its result.
struct Invocation {
    args: Vec<OsString>,
    /// File the tool writes; renamed onto the request output when different.
    produces: PathBuf,
    /// Directory to create before running.
    workdir: Option<PathBuf>,
}

/// Runs an external converter as a subprocess and waits for it to exit.
pub struct ExternalTool {
    tool: Tool,
    program: PathBuf,
    timeout: Duration,
    speed: ConversionSpeed,
}

impl ExternalTool {
    pub fn new(tool: Tool, config: &Config) -> Self {
        Self {
            tool,
            program: config.program(tool),
            timeout: config.tool_timeout,
            speed: config.video_speed,
        }
    }

    fn scratch_dir(request: &ConversionRequest) -> PathBuf {
        request.output_dir().join(format!(
            ".scratch-{}.{}",
            request.output_stem(),
            request.target
        ))
    }

    fn invocation(&self, request: &ConversionRequest) -> Invocation {
        let input: OsString = request.input.clone().into();
        let output: OsString = request.output.clone().into();
        let target = request.target.as_str();
        let mut produces = request.output.clone();
        let mut workdir = None;

        let args: Vec<OsString> = match self.tool {
            Tool::Ffmpeg => {
                let mut args: Vec<OsString> = [
                    "-hide_banner",
                    "-nostdin",
                    "-loglevel",
                    "error",
                    "-y",
                    "-i",
                ]
                .iter()
                .map(OsString::from)
                .collect();
                args.push(input);
                args.extend(media::ffmpeg_args(target, &self.speed).into_iter().map(OsString::from));
                args.push(output);
                args
            }

            Tool::LibreOffice => {
                let scratch = Self::scratch_dir(request);
                let filter = match target {
                    "txt" => "txt:Text",
                    "html" => "html",
                    other => other,
                };
                let profile = format!("-env:UserInstallation=file://{}", scratch.join("profile").display());
                let mut args: Vec<OsString> = vec![
                    profile.into(),
                    "--headless".into(),
                    "--norestore".into(),
                    "--convert-to".into(),
                    filter.into(),
                ];
                if request.source_ext == "pdf" {
                    args.push("--infilter=writer_pdf_import".into());
                }
                args.push("--outdir".into());
                args.push(scratch.clone().into());
                args.push(input);

                let input_stem = request
                    .input
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                produces = scratch.join(format!("{}.{}", input_stem, target));
                workdir = Some(scratch);
                args
            }

            Tool::Pandoc => {
                let mut args: Vec<OsString> = vec![input];
                if request.source_ext == "txt" {
                    args.push("--from=markdown".into());
                }
                if target == "txt" {
                    args.push("--to=plain".into());
                }
                args.push("--output".into());
                args.push(output);
                args
            }

            Tool::PdfToText => vec![
                "-f".into(),
                "1".into(),
                "-l".into(),
                "1".into(),
                "-layout".into(),
                input,
                output,
            ],

            Tool::PdfToPpm => {
                let (flag, ext) = if target == "jpg" {
                    ("-jpeg", "jpg")
                } else {
                    ("-png", "png")
                };
                let stem = request.output_stem();
                let prefix = request.output_dir().join(format!("{}.1", stem));
                produces = request.output_dir().join(format!("{}.1.{}", stem, ext));
                vec![
                    "-f".into(),
                    "1".into(),
                    "-l".into(),
                    "1".into(),
                    "-singlefile".into(),
                    "-r".into(),
                    "150".into(),
                    flag.into(),
                    input,
                    prefix.into(),
                ]
            }

            Tool::Ghostscript => {
                let device = if target == "jpg" { "jpeg" } else { "png16m" };
                let mut out_arg = OsString::from("-sOutputFile=");
                out_arg.push(&output);
                vec![
                    "-dSAFER".into(),
                    "-dBATCH".into(),
                    "-dNOPAUSE".into(),
                    "-dQUIET".into(),
                    "-dFirstPage=1".into(),
                    "-dLastPage=1".into(),
                    "-r150".into(),
                    "-dJPEGQ=85".into(),
                    format!("-sDEVICE={}", device).into(),
                    out_arg,
                    input,
                ]
            }

            Tool::Inkscape => {
                let mut out_arg = OsString::from("--export-filename=");
                out_arg.push(&output);
                vec![input, format!("--export-type={}", target).into(), out_arg]
            }

            Tool::RsvgConvert => vec!["-f".into(), target.into(), "-o".into(), output, input],

            Tool::Wkhtmltopdf => vec!["--quiet".into(), input, output],

            Tool::EbookConvert => vec![input, output],
        };

        Invocation {
            args,
            produces,
            workdir,
        }
    }
}

#[async_trait]
impl Strategy for ExternalTool {
    fn name(&self) -> &'static str {
        self.tool.binary()
    }

    fn scratch_paths(&self, request: &ConversionRequest) -> Vec<PathBuf> {
        let invocation = self.invocation(request);
        let mut paths = Vec::new();
        if let Some(dir) = invocation.workdir {
            paths.push(dir);
        }
        if invocation.produces != request.output {
            paths.push(invocation.produces);
        }
        paths
    }

    async fn attempt(&self, request: &ConversionRequest) -> Result<(), ConversionError> {
        let invocation = self.invocation(request);
        if let Some(dir) = &invocation.workdir {
            fs::create_dir_all(dir).await?;
        }

        info!(
            "running '{} {}'",
            self.program.display(),
            invocation
                .args
                .iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let child = Command::new(&self.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                IoErrorKind::NotFound | IoErrorKind::PermissionDenied => {
                    ConversionError::ToolUnavailable {
                        tool: self.tool.to_string(),
                    }
                }
                _ => ConversionError::failed(format!("failed to spawn {}: {}", self.tool, e)),
            })?;

        // dropping the wait future on timeout kills the child
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ConversionError::failed(format!(
                    "{} timed out after {:?}",
                    self.tool, self.timeout
                ))
            })??;

        if !output.status.success() {
            return Err(ConversionError::failed(format!(
                "{} exited with {}: {}",
                self.tool,
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        if invocation.produces != request.output {
            if !fs::try_exists(&invocation.produces).await.unwrap_or(false) {
                return Err(ConversionError::failed(format!(
                    "{} finished without writing {}",
                    self.tool,
                    invocation.produces.display()
                )));
            }
            fs::rename(&invocation.produces, &request.output).await?;
        }

        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return "no diagnostic output".to_string();
    }
    lines[lines.len().saturating_sub(5)..].join(" | ")
}
