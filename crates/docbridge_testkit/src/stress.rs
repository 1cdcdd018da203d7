//! Stress helpers for concurrent bulk writes.

use crate::harness::EmulatorClient;
use docbridge_protocol::Record;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total records submitted.
    pub total_ops: usize,
    /// Records that succeeded.
    pub successful_ops: usize,
    /// Records that were rejected.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Records per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total records: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} records/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Records written by each writer thread.
    pub records_per_writer: usize,
    /// Number of writer threads sharing one client.
    pub writers: usize,
    /// Concurrency ceiling of each bulk write.
    pub concurrency: usize,
    /// Size of a filler field in bytes.
    pub payload_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            records_per_writer: 500,
            writers: 4,
            concurrency: 4,
            payload_size: 128,
        }
    }
}

fn stress_record(writer: usize, i: usize, payload_size: usize) -> Record {
    Record::new(format!("w{writer}-{i}"), format!("w{writer}"))
        .with_field("fileName", format!("s_{writer}_{i}.bin"))
        .with_field("blob", "x".repeat(payload_size))
}

/// Runs several bulk writers against one client at the same time.
pub fn concurrent_write_stress(client: &EmulatorClient, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let outcomes: Vec<(usize, usize)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.writers)
            .map(|writer| {
                scope.spawn(move || {
                    let records: Vec<_> = (0..config.records_per_writer)
                        .map(|i| stress_record(writer, i, config.payload_size))
                        .collect();
                    match client.writer().and_then(|w| w.write(records, config.concurrency)) {
                        Ok(result) => (result.succeeded, result.submitted - result.succeeded),
                        Err(_) => (0, config.records_per_writer),
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or((0, config.records_per_writer)))
            .collect()
    });

    let successful = outcomes.iter().map(|(ok, _)| ok).sum();
    let failed = outcomes.iter().map(|(_, failed)| failed).sum();
    StressTestResult::new(successful, failed, start.elapsed())
}
