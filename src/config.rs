use anyhow::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which adapters get wired at startup: `mock` runs entirely from the
/// in-memory fixture source, `live` registers the real vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Mock,
    Live,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Mode::Mock),
            "live" => Ok(Mode::Live),
            _ => anyhow::bail!("Invalid MODE: {}. Must be 'mock' or 'live'", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub database_url: String,
    /// Primary vendor credential; empty means the primary adapter
    /// reports unavailable and the secondary carries the load.
    pub tushare_token: String,
    pub source_cache_ttl: Duration,
    // Ingestion pacing
    pub collection_lookback_days: i64,
    pub collection_call_delay: Duration,
    pub collection_max_retries: u32,
    pub collection_retry_base_delay: Duration,
    /// A date with at least this many candle rows counts as already
    /// ingested and is skipped unless forced.
    pub collection_complete_threshold: i64,
    // Selection runner
    pub selection_concurrency: usize,
    pub selection_batch_size: usize,
    pub selection_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mode_str = env::var("MODE").unwrap_or_else(|_| "mock".to_string());
        let mode = Mode::from_str(&mode_str)?;

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://data/quantpicker.db".to_string());

        let tushare_token = env::var("TUSHARE_TOKEN").unwrap_or_default();

        let source_cache_ttl =
            Duration::from_secs(parse_env("SOURCE_CACHE_TTL_SECONDS", 300u64));

        let collection_lookback_days = parse_env("COLLECTION_LOOKBACK_DAYS", 7i64).max(1);
        let collection_call_delay =
            Duration::from_millis(parse_env("COLLECTION_CALL_DELAY_MS", 500u64));
        let collection_max_retries = parse_env("COLLECTION_MAX_RETRIES", 3u32);
        let collection_retry_base_delay =
            Duration::from_secs(parse_env("COLLECTION_RETRY_DELAY_SECONDS", 2u64));
        let collection_complete_threshold =
            parse_env("COLLECTION_COMPLETE_THRESHOLD", 1000i64).max(1);

        let selection_concurrency = match env::var("ADVANCED_SELECTION_CONCURRENCY") {
            Ok(raw) => raw.parse::<usize>().unwrap_or_else(|_| default_concurrency()),
            Err(_) => default_concurrency(),
        }
        .max(1);
        let selection_batch_size = parse_env("ADVANCED_SELECTION_BATCH_SIZE", 256usize).max(1);
        let selection_timeout =
            Duration::from_secs(parse_env("ADVANCED_SELECTION_TIMEOUT", 1200u64));

        Ok(Config {
            mode,
            database_url,
            tushare_token,
            source_cache_ttl,
            collection_lookback_days,
            collection_call_delay,
            collection_max_retries,
            collection_retry_base_delay,
            collection_complete_threshold,
            selection_concurrency,
            selection_batch_size,
            selection_timeout,
        })
    }
}

/// Worker pool width: twice the CPU count, clamped to [4, 32].
pub fn default_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (cpus * 2).clamp(4, 32)
}

fn parse_env<T: FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("mock".parse::<Mode>().unwrap(), Mode::Mock);
        assert_eq!("LIVE".parse::<Mode>().unwrap(), Mode::Live);
        assert!("paper".parse::<Mode>().is_err());
    }

    #[test]
    fn test_default_concurrency_bounds() {
        let c = default_concurrency();
        assert!((4..=32).contains(&c));
    }

    #[test]
    fn test_parse_env_falls_back_on_garbage() {
        // Key that certainly isn't set.
        assert_eq!(parse_env("QUANTPICKER_NO_SUCH_KEY_XYZ", 42i64), 42);
    }
}
