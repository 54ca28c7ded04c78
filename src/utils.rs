//! Utility functions and helpers
//!
//! Common utilities used throughout the node.

use crate::config::{LogFormat, LogLevel};
use crate::{Error, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Milliseconds since the Unix epoch
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `level`. When `file` is given, output is also
/// appended to it through a non-blocking writer; keep the returned guard
/// alive until shutdown so buffered lines are flushed.
pub fn init_logging(level: LogLevel, format: LogFormat, file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_string()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_writer, guard) = match file {
        Some(path) => {
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| Error::config(format!("Invalid log file path: {}", path.display())))?;
            std::fs::create_dir_all(directory)?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    let installed = match (format, file_writer) {
        (LogFormat::Json, Some(writer)) => builder
            .json()
            .with_writer(std::io::stdout.and(writer))
            .try_init(),
        (LogFormat::Json, None) => builder.json().try_init(),
        (LogFormat::Plain, Some(writer)) => builder
            .with_writer(std::io::stdout.and(writer))
            .try_init(),
        (LogFormat::Plain, None) => builder.try_init(),
    };
    installed.map_err(|e| Error::config(format!("Failed to install logger: {}", e)))?;

    Ok(guard)
}

/// Format hash rate as a human-readable string
pub fn format_hash_rate(hashes_per_sec: f64) -> String {
    const UNITS: &[&str] = &["H/s", "KH/s", "MH/s", "GH/s", "TH/s", "PH/s"];
    let mut rate = hashes_per_sec;
    let mut unit_index = 0;

    while rate >= 1000.0 && unit_index < UNITS.len() - 1 {
        rate /= 1000.0;
        unit_index += 1;
    }

    format!("{:.2} {}", rate, UNITS[unit_index])
}

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
    current_attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff calculator
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64, multiplier: f64) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
            multiplier,
            current_attempt: 0,
        }
    }

    /// Get the next delay in milliseconds
    pub fn next_delay(&mut self) -> u64 {
        let delay = if self.current_attempt == 0 {
            self.initial_delay_ms
        } else {
            let exponential_delay = (self.initial_delay_ms as f64
                * self.multiplier.powi(self.current_attempt as i32)) as u64;
            std::cmp::min(exponential_delay, self.max_delay_ms)
        };

        self.current_attempt += 1;
        delay
    }

    /// Reset the backoff state
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// Get current attempt number
    pub fn attempt(&self) -> u32 {
        self.current_attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hash_rate() {
        assert_eq!(format_hash_rate(100.0), "100.00 H/s");
        assert_eq!(format_hash_rate(1500.0), "1.50 KH/s");
        assert_eq!(format_hash_rate(1000000.0), "1.00 MH/s");
        assert_eq!(format_hash_rate(1500000000.0), "1.50 GH/s");
    }

    #[test]
    fn test_exponential_backoff() {
        let mut backoff = ExponentialBackoff::new(100, 5000, 2.0);

        assert_eq!(backoff.next_delay(), 100);
        assert_eq!(backoff.next_delay(), 200);
        assert_eq!(backoff.next_delay(), 400);
        assert_eq!(backoff.next_delay(), 800);
        assert_eq!(backoff.next_delay(), 1600);
        assert_eq!(backoff.next_delay(), 3200);
        assert_eq!(backoff.next_delay(), 5000); // Capped at max

        assert_eq!(backoff.attempt(), 7);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), 100); // Back to initial
    }

    #[test]
    fn test_current_timestamp() {
        let ts = current_timestamp_millis();
        assert!(ts > 1_600_000_000_000); // After 2020
        assert!(ts < 4_000_000_000_000);
    }
}
