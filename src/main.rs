use std::path::Path;
use std::process::exit;
use std::time::Duration;

use anyhow::{anyhow, Context};
use convertd::converter::input::FileDescriptor;
use convertd::converter::tool::report_versions;
use convertd::job::JobStatus;
use convertd::{Config, ConversionService};
use env_logger::Env;
use log::{info, warn};
use tokio::fs;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn usage() -> ! {
    eprintln!("usage: convertd <format[,format...]> <file>...");
    exit(2);
}

/// Copies a file into the session directory the way an upload would land.
async fn stage(session_dir: &Path, source: &Path) -> anyhow::Result<FileDescriptor> {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", source.display()))?;
    let stored = session_dir.join(format!("{}-{}", Uuid::new_v4().simple(), name));
    fs::copy(source, &stored)
        .await
        .with_context(|| format!("failed to stage {}", source.display()))?;
    Ok(FileDescriptor::from_upload(name, stored).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("convertd=info")).init();

    let mut args = std::env::args().skip(1);
    let Some(formats) = args.next() else { usage() };
    let sources: Vec<String> = args.collect();
    if sources.is_empty() {
        usage();
    }

    let config = Config::from_env()?;
    info!("starting convertd, storage in {}", config.storage_root.display());
    for (tool, version) in report_versions(&config).await {
        match version {
            Ok(version) => info!("found {} {}", tool, version),
            Err(e) => warn!("{} unavailable, its conversions will fall back ({})", tool, e),
        }
    }

    let service = ConversionService::new(config);
    let _sweeper = service.spawn_sweeper();

    let session_id = Uuid::new_v4().simple().to_string();
    let session_dir = service.session_dir(&session_id)?;
    fs::create_dir_all(&session_dir).await?;

    let mut files = Vec::new();
    for source in &sources {
        files.push(stage(&session_dir, Path::new(source)).await?);
    }

    let targets: Vec<String> = formats.split(',').map(str::to_string).collect();
    let id = service.submit_batch(&session_id, files, &targets).await?;

    let view = loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let view = service
            .get_job(&id.to_string())
            .await
            .ok_or_else(|| anyhow!("job {} disappeared", id))?;
        if view.status.is_terminal() {
            break view;
        }
        info!("job {}: {}%", id, view.progress);
    };

    println!("{}", serde_json::to_string_pretty(&view)?);
    if view.status == JobStatus::Failed {
        exit(1);
    }
    Ok(())
}
