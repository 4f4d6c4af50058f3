use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};
use tokio::fs;

use super::error::{ConversionError, FailedAttempt};
use super::strategy::{ConversionRequest, Strategy};

/// Outcome of one strategy attempt, kept so the final error is built from data
/// rather than from log lines.
#[derive(Debug)]
pub struct Attempt {
    pub strategy: &'static str,
    pub outcome: Result<(), ConversionError>,
}

/// Successful resolution: the strategy that produced the output plus every
/// attempt that failed before it.
#[derive(Debug)]
pub struct Resolution {
    pub strategy: &'static str,
    pub failed: Vec<FailedAttempt>,
}

/// Tries each strategy in order until one leaves a non-empty output file.
pub async fn resolve(
    chain: &[Arc<dyn Strategy>],
    request: &ConversionRequest,
) -> Result<Resolution, ConversionError> {
    if chain.is_empty() {
        return Err(ConversionError::Unsupported {
            from: request.source_ext.clone(),
            to: request.target.clone(),
        });
    }

    let mut failed = Vec::new();
    for strategy in chain {
        let attempt = run_attempt(strategy.as_ref(), request).await;
        match attempt.outcome {
            Ok(()) => {
                return Ok(Resolution {
                    strategy: attempt.strategy,
                    failed,
                })
            }
            Err(error) => {
                debug!(
                    "{} could not convert {} to {}: {}",
                    attempt.strategy, request.source_name, request.target, error
                );
                failed.push(FailedAttempt {
                    strategy: attempt.strategy,
                    error,
                });
            }
        }
    }

    if failed.len() == 1 {
        // a single strategy's error is more useful unwrapped
        return Err(failed.remove(0).error);
    }
    Err(ConversionError::Exhausted(failed))
}

async fn run_attempt(strategy: &dyn Strategy, request: &ConversionRequest) -> Attempt {
    let scratch = strategy.scratch_paths(request);

    // stale files from an earlier run must not pass as this attempt's output
    let mut outcome = clear(&request.output).await.map_err(ConversionError::from);
    if outcome.is_ok() {
        for path in &scratch {
            if let Err(e) = clear(path).await {
                outcome = Err(e.into());
                break;
            }
        }
    }

    if outcome.is_ok() {
        outcome = strategy.attempt(request).await;
    }
    if outcome.is_ok() {
        outcome = verify_output(&request.output).await;
    }

    for path in &scratch {
        if let Err(e) = clear(path).await {
            warn!("failed to remove intermediate {}: {}", path.display(), e);
        }
    }
    if outcome.is_err() {
        if let Err(e) = clear(&request.output).await {
            warn!(
                "failed to remove partial output {}: {}",
                request.output.display(),
                e
            );
        }
    }

    Attempt {
        strategy: strategy.name(),
        outcome,
    }
}

async fn verify_output(output: &Path) -> Result<(), ConversionError> {
    match fs::metadata(output).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(_) => Err(ConversionError::failed("conversion produced an empty output")),
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            Err(ConversionError::failed("conversion produced no output"))
        }
        Err(e) => Err(e.into()),
    }
}

/// Removes a file or directory tree. Missing paths are fine.
pub async fn clear(path: &Path) -> std::io::Result<()> {
    let result = match fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
        Ok(_) => fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        other => other,
    }
}
