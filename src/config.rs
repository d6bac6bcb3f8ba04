use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};

/// Runtime tunables for the summarization pipeline. Every knob can be
/// overridden through the environment; the defaults mirror production.
#[derive(Debug, Clone)]
pub struct Settings {
    pub storage_root: PathBuf,
    pub retention_hours: i64,
    pub sweep_interval: Duration,
    pub direct_summary_threshold: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_chunks: usize,
    pub worker_concurrency: usize,
    pub submit_rate_per_sec: u32,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub chunk_call_delay: Duration,
    pub download_timeout: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            storage_root: PathBuf::from(
                env::var("STORAGE_ROOT").unwrap_or_else(|_| "storage/docdigest".to_string()),
            ),
            retention_hours: env_parse("RETENTION_HOURS", 96)?,
            sweep_interval: Duration::from_secs(env_parse("SWEEP_INTERVAL_HOURS", 6_u64)? * 3600),
            direct_summary_threshold: env_parse("DIRECT_SUMMARY_THRESHOLD", 8000)?,
            chunk_size: env_parse("CHUNK_SIZE", 4000)?,
            chunk_overlap: env_parse("CHUNK_OVERLAP", 200)?,
            max_chunks: env_parse("MAX_CHUNKS", 10)?,
            worker_concurrency: env_parse("WORKER_CONCURRENCY", 5)?,
            submit_rate_per_sec: env_parse("SUBMIT_RATE_PER_SEC", 10)?,
            max_attempts: env_parse("MAX_ATTEMPTS", 3)?,
            retry_base_delay: Duration::from_millis(env_parse("RETRY_BASE_DELAY_MS", 1000)?),
            chunk_call_delay: Duration::from_millis(env_parse("CHUNK_CALL_DELAY_MS", 500)?),
            download_timeout: Duration::from_secs(env_parse("DOWNLOAD_TIMEOUT_SECS", 30)?),
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("storage/docdigest"),
            retention_hours: 96,
            sweep_interval: Duration::from_secs(6 * 3600),
            direct_summary_threshold: 8000,
            chunk_size: 4000,
            chunk_overlap: 200,
            max_chunks: 10,
            worker_concurrency: 5,
            submit_rate_per_sec: 10,
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(1000),
            chunk_call_delay: Duration::from_millis(500),
            download_timeout: Duration::from_secs(30),
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid value for {key}: {err}"))
            .with_context(|| format!("failed to parse {key}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_values() {
        let settings = Settings::default();
        assert_eq!(settings.retention_hours, 96);
        assert_eq!(settings.direct_summary_threshold, 8000);
        assert_eq!(settings.max_chunks, 10);
        assert_eq!(settings.worker_concurrency, 5);
        assert_eq!(settings.sweep_interval, Duration::from_secs(6 * 3600));
    }
}
