//! Runtime configuration, resolved once at startup from the environment.

use anyhow::{Context, Result};
use std::{path::PathBuf, str::FromStr, time::Duration};

/// Default per-IP rate limit window.
const DEFAULT_RATE_WINDOW_MS: u64 = 60_000;

/// Default number of requests allowed per IP per window.
const DEFAULT_RATE_MAX_REQUESTS: u32 = 5;

/// Default cap on pending slice requests.
const DEFAULT_QUEUE_LENGTH: usize = 10;

/// Default budget a pending slice request may wait for a worker.
const DEFAULT_QUEUE_WAIT_MS: u64 = 30_000;

/// Default cap on archive entry count.
const DEFAULT_ZIP_ENTRIES: usize = 1_000;

/// Default cap on cumulative uncompressed archive size (500 MiB).
const DEFAULT_ZIP_UNCOMPRESSED_BYTES: u64 = 500 * 1024 * 1024;

/// Default upload size limit (100 MiB).
const DEFAULT_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Default JSON/form body limit (1 MiB).
const DEFAULT_BODY_LIMIT_BYTES: u64 = 1024 * 1024;

/// Everything the server needs to know, resolved from environment
/// variables. Constructed once in the binary and shared via the server
/// context.
#[derive(Clone, Debug)]
pub struct Config {
    /// Pre-shared admin token, matched against the `x-api-key` header on
    /// pricing mutations. Startup fails if the variable is unset.
    pub admin_api_key: String,

    /// Directory uploads are written to and archives extracted into.
    pub input_dir: PathBuf,

    /// Directory sliced artifacts are written to and served from.
    pub output_dir: PathBuf,

    /// Directory holding slicer profiles and the pricing registry file.
    pub configs_dir: PathBuf,

    /// Directory holding the converter executables.
    pub converters_dir: PathBuf,

    /// Path of the rolling JSON error log.
    pub error_log_path: PathBuf,

    /// Slicer executable, `prusa-slicer` by default.
    pub slicer_bin: PathBuf,

    /// Upper bound on request bodies, uploads included. This is the
    /// server-wide transport cap.
    pub max_upload_bytes: u64,

    /// Upper bound on admin JSON bodies, enforced on the received bytes
    /// before they are deserialized. Transport buffering is still
    /// bounded by [Config::max_upload_bytes]; this limit only bounds
    /// what the pricing endpoints will parse.
    pub json_body_limit: u64,

    /// Fixed rate-limit window per IP.
    pub rate_limit_window: Duration,

    /// Requests allowed per IP within one window.
    pub rate_limit_max_requests: u32,

    /// Worker pool size for slicing; defaults to the host CPU count.
    pub max_concurrent_slices: usize,

    /// Cap on pending (queued, not yet dispatched) slice requests.
    pub max_slice_queue_length: usize,

    /// How long a pending slice request may wait for a worker.
    pub max_slice_queue_wait: Duration,

    /// Cap on archive entry count.
    pub max_zip_entries: usize,

    /// Cap on cumulative uncompressed archive size.
    pub max_zip_uncompressed_bytes: u64,

    /// Echo subprocess command lines at debug level.
    pub debug_command_logs: bool,
}

impl Config {
    /// Resolve the configuration from the process environment, failing
    /// fast when `ADMIN_API_KEY` is missing.
    pub fn from_env() -> Result<Self> {
        let admin_api_key = std::env::var("ADMIN_API_KEY")
            .context("ADMIN_API_KEY must be set before the server can start")?;

        Ok(Self {
            admin_api_key,
            input_dir: env_or("INPUT_DIR", "input").into(),
            output_dir: env_or("OUTPUT_DIR", "output").into(),
            configs_dir: env_or("CONFIGS_DIR", "configs").into(),
            converters_dir: env_or("CONVERTERS_DIR", "converters").into(),
            error_log_path: env_or("ERROR_LOG_PATH", "logs/log.json").into(),
            slicer_bin: env_or("SLICER_BIN", "prusa-slicer").into(),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", DEFAULT_UPLOAD_BYTES)?,
            json_body_limit: env_parse("JSON_BODY_LIMIT", DEFAULT_BODY_LIMIT_BYTES)?,
            rate_limit_window: Duration::from_millis(env_parse(
                "SLICE_RATE_LIMIT_WINDOW_MS",
                DEFAULT_RATE_WINDOW_MS,
            )?),
            rate_limit_max_requests: env_parse(
                "SLICE_RATE_LIMIT_MAX_REQUESTS",
                DEFAULT_RATE_MAX_REQUESTS,
            )?,
            max_concurrent_slices: env_parse("MAX_CONCURRENT_SLICES", num_cpus::get())?,
            max_slice_queue_length: env_parse("MAX_SLICE_QUEUE_LENGTH", DEFAULT_QUEUE_LENGTH)?,
            max_slice_queue_wait: Duration::from_millis(env_parse(
                "MAX_SLICE_QUEUE_WAIT_MS",
                DEFAULT_QUEUE_WAIT_MS,
            )?),
            max_zip_entries: env_parse("MAX_ZIP_ENTRIES", DEFAULT_ZIP_ENTRIES)?,
            max_zip_uncompressed_bytes: env_parse(
                "MAX_ZIP_UNCOMPRESSED_BYTES",
                DEFAULT_ZIP_UNCOMPRESSED_BYTES,
            )?,
            debug_command_logs: env_parse("DEBUG_COMMAND_LOGS", false)?,
        })
    }

    /// Path of the persisted pricing registry.
    pub fn pricing_path(&self) -> PathBuf {
        self.configs_dir.join("pricing.json")
    }

    /// Create the working directories if they do not exist yet.
    pub fn prepare_directories(&self) -> Result<()> {
        for dir in [&self.input_dir, &self.output_dir, &self.configs_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        if let Some(parent) = self.error_log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_defaults() {
        std::env::set_var("ADMIN_API_KEY", "hunter2");
        let config = Config::from_env().unwrap();
        assert_eq!(config.admin_api_key, "hunter2");
        assert_eq!(config.rate_limit_max_requests, 5);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.max_concurrent_slices, num_cpus::get());
        assert_eq!(config.pricing_path(), PathBuf::from("configs/pricing.json"));
    }
}
