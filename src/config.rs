use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use strum::IntoEnumIterator;

use crate::converter::speed::ConversionSpeed;
use crate::converter::tool::Tool;

pub const JOB_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const SWEEP_INITIAL_DELAY: Duration = Duration::from_secs(10);
pub const ORPHAN_GRACE: Duration = Duration::from_secs(2 * 60 * 60);
pub const TEMP_GRACE: Duration = Duration::from_secs(30 * 60);
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const MAX_CONCURRENT_JOBS: usize = 4;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got '{value}'")]
    Invalid {
        key: String,
        value: String,
        expected: &'static str,
    },
}

/// Runtime settings. Defaults suit a single host; every field can be
/// overridden through `CONVERTD_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Parent of all session directories.
    pub storage_root: PathBuf,
    /// How long a job and its files are kept after submission.
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub sweep_initial_delay: Duration,
    /// Session directories without a job record are left alone this long.
    pub orphan_grace: Duration,
    /// Age after which stray intermediates are removed.
    pub temp_grace: Duration,
    pub tool_timeout: Duration,
    pub max_concurrent_jobs: usize,
    /// Prefix of download urls, e.g. `/api/download`.
    pub download_base: String,
    pub video_speed: ConversionSpeed,
    /// Explicit binary paths; tools not listed are looked up on PATH.
    pub tools: HashMap<Tool, PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("uploads"),
            ttl: JOB_LIFETIME,
            sweep_interval: SWEEP_INTERVAL,
            sweep_initial_delay: SWEEP_INITIAL_DELAY,
            orphan_grace: ORPHAN_GRACE,
            temp_grace: TEMP_GRACE,
            tool_timeout: TOOL_TIMEOUT,
            max_concurrent_jobs: MAX_CONCURRENT_JOBS,
            download_base: "/api/download".to_string(),
            video_speed: ConversionSpeed::default(),
            tools: HashMap::new(),
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| {
            lookup(&format!("CONVERTD_{}", name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(root) = var("STORAGE_ROOT") {
            config.storage_root = PathBuf::from(root);
        }
        if let Some(base) = var("DOWNLOAD_BASE") {
            config.download_base = base.trim_end_matches('/').to_string();
        }

        let secs = |name: &str, fallback: Duration| -> Result<Duration, ConfigError> {
            match var(name) {
                Some(v) => parse::<u64>(name, &v, "a number of seconds").map(Duration::from_secs),
                None => Ok(fallback),
            }
        };
        config.ttl = secs("TTL_SECS", config.ttl)?;
        config.sweep_interval = secs("SWEEP_INTERVAL_SECS", config.sweep_interval)?;
        config.sweep_initial_delay = secs("SWEEP_INITIAL_DELAY_SECS", config.sweep_initial_delay)?;
        config.orphan_grace = secs("ORPHAN_GRACE_SECS", config.orphan_grace)?;
        config.temp_grace = secs("TEMP_GRACE_SECS", config.temp_grace)?;
        config.tool_timeout = secs("TOOL_TIMEOUT_SECS", config.tool_timeout)?;

        if let Some(v) = var("MAX_CONCURRENT_JOBS") {
            let jobs = parse::<usize>("MAX_CONCURRENT_JOBS", &v, "a positive number")?;
            if jobs == 0 {
                return Err(invalid("MAX_CONCURRENT_JOBS", &v, "a positive number"));
            }
            config.max_concurrent_jobs = jobs;
        }
        if let Some(v) = var("VIDEO_SPEED") {
            config.video_speed = parse("VIDEO_SPEED", &v, "a speed preset such as 'medium'")?;
        }

        for tool in Tool::iter() {
            if let Some(path) = lookup(&tool.env_key()).filter(|p| !p.trim().is_empty()) {
                config.tools.insert(tool, PathBuf::from(path.trim()));
            }
        }

        Ok(config)
    }

    /// Overrides the binary used for one tool.
    pub fn with_tool(mut self, tool: Tool, program: impl Into<PathBuf>) -> Self {
        self.tools.insert(tool, program.into());
        self
    }

    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    /// Program to spawn for a tool: the configured path or the bare binary name.
    pub fn program(&self, tool: Tool) -> PathBuf {
        self.tools
            .get(&tool)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(tool.binary()))
    }

    /// `<storage_root>/<session_id>`. The id must already be validated.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.storage_root.join(session_id)
    }
}

fn invalid(key: &str, value: &str, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        key: format!("CONVERTD_{}", key),
        value: value.to_string(),
        expected,
    }
}

fn parse<T: FromStr>(key: &str, value: &str, expected: &'static str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value, expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.ttl, JOB_LIFETIME);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.download_base, "/api/download");
        assert_eq!(config.program(Tool::Ghostscript), PathBuf::from("gs"));
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("CONVERTD_STORAGE_ROOT", "/var/lib/convertd"),
            ("CONVERTD_TTL_SECS", "60"),
            ("CONVERTD_DOWNLOAD_BASE", "https://files.example.net/dl/"),
            ("CONVERTD_VIDEO_SPEED", "UltraFast"),
            ("CONVERTD_TOOL_RSVG_CONVERT", "/opt/bin/rsvg-convert"),
        ]))
        .unwrap();

        assert_eq!(config.storage_root, PathBuf::from("/var/lib/convertd"));
        assert_eq!(config.ttl, Duration::from_secs(60));
        assert_eq!(config.download_base, "https://files.example.net/dl");
        assert_eq!(config.video_speed, ConversionSpeed::UltraFast);
        assert_eq!(
            config.program(Tool::RsvgConvert),
            PathBuf::from("/opt/bin/rsvg-convert")
        );
        assert_eq!(config.session_dir("abc"), PathBuf::from("/var/lib/convertd/abc"));
    }

    #[test]
    fn rejects_non_numeric_values() {
        let err = Config::from_lookup(lookup(&[("CONVERTD_TTL_SECS", "a day")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "CONVERTD_TTL_SECS".to_string(),
                value: "a day".to_string(),
                expected: "a number of seconds",
            }
        );
        assert!(Config::from_lookup(lookup(&[("CONVERTD_MAX_CONCURRENT_JOBS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("CONVERTD_VIDEO_SPEED", "warp")])).is_err());
    }
}
