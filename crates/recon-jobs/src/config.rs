use std::time::Duration;

use log::warn;

/// Batch sizing and pacing knobs, read once per process from the
/// environment. Correctness never depends on these values; they trade
/// memory and write amplification against throughput.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    /// Rows per promotion batch (`RECON_PROMOTE_BATCH_SIZE`, default 5000).
    pub promote_batch_size: usize,
    /// Rows per formula-evaluation batch (`RECON_FORMULA_BATCH_SIZE`,
    /// default 1000 — smaller than promotion because of evaluation cost).
    pub formula_batch_size: usize,
    /// Rows per raw-ingest insert batch (`RECON_INGEST_BATCH_SIZE`,
    /// default 50000).
    pub ingest_batch_size: usize,
    /// Row count beyond which an input file streams instead of buffering
    /// (`RECON_LARGE_FILE_THRESHOLD`, default 100000).
    pub large_file_threshold: usize,
    /// Cooperative sleep between batches (`RECON_BATCH_DELAY_MS`,
    /// default 10).
    pub batch_delay: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            promote_batch_size: 5000,
            formula_batch_size: 1000,
            ingest_batch_size: 50_000,
            large_file_threshold: 100_000,
            batch_delay: Duration::from_millis(10),
        }
    }
}

impl JobConfig {
    /// Read the knobs from the environment, keeping defaults for unset or
    /// unparsable variables (with a warning).
    pub fn from_env() -> Self {
        let defaults = JobConfig::default();
        JobConfig {
            promote_batch_size: env_usize("RECON_PROMOTE_BATCH_SIZE", defaults.promote_batch_size),
            formula_batch_size: env_usize("RECON_FORMULA_BATCH_SIZE", defaults.formula_batch_size),
            ingest_batch_size: env_usize("RECON_INGEST_BATCH_SIZE", defaults.ingest_batch_size),
            large_file_threshold: env_usize(
                "RECON_LARGE_FILE_THRESHOLD",
                defaults.large_file_threshold,
            ),
            batch_delay: Duration::from_millis(env_u64(
                "RECON_BATCH_DELAY_MS",
                defaults.batch_delay.as_millis() as u64,
            )),
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(v) if v > 0 => v,
            _ => {
                warn!("ignoring invalid {name}={raw:?}, keeping default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(v) => v,
            Err(_) => {
                warn!("ignoring invalid {name}={raw:?}, keeping default {default}");
                default
            }
        },
        Err(_) => default,
    }
}
