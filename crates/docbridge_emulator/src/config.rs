//! Emulator configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Endpoint reported by a default emulator.
pub const DEFAULT_ENDPOINT: &str = "https://127.0.0.1:8081/";

/// Configuration for an [`Emulator`](crate::Emulator).
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Endpoint the emulator claims to listen on.
    pub endpoint: String,
    /// Account key requests must be signed with; generated when unset.
    pub account_key: Option<String>,
    /// Number of physical partitions records are spread over.
    pub partition_count: u32,
    /// Maximum records in one upsert.
    pub max_batch_items: usize,
    /// Maximum records returned per query page.
    pub max_page_size: u32,
    /// Maximum request body size in bytes.
    pub max_request_bytes: usize,
    /// Time after start during which connections are refused.
    pub startup_delay: Duration,
    /// Whether the `/gateway` routes are served.
    pub enable_gateway: bool,
    /// Directory for the data snapshot; data is kept in memory only when unset.
    pub data_dir: Option<PathBuf>,
    /// Accepted difference between the request date and the emulator clock.
    pub clock_skew: Duration,
    /// Lifetime of the generated certificate.
    pub certificate_validity: Duration,
}

impl EmulatorConfig {
    /// Creates a configuration for the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            account_key: None,
            partition_count: 2,
            max_batch_items: 100,
            max_page_size: 100,
            max_request_bytes: 2 * 1024 * 1024,
            startup_delay: Duration::ZERO,
            enable_gateway: true,
            data_dir: None,
            clock_skew: Duration::from_secs(15 * 60),
            certificate_validity: Duration::from_secs(365 * 24 * 60 * 60),
        }
    }

    /// Uses a fixed account key.
    pub fn with_account_key(mut self, key: impl Into<String>) -> Self {
        self.account_key = Some(key.into());
        self
    }

    /// Sets the partition count.
    pub fn with_partition_count(mut self, count: u32) -> Self {
        self.partition_count = count;
        self
    }

    /// Sets the maximum records per upsert.
    pub fn with_max_batch_items(mut self, max: usize) -> Self {
        self.max_batch_items = max;
        self
    }

    /// Sets the maximum query page size.
    pub fn with_max_page_size(mut self, max: u32) -> Self {
        self.max_page_size = max;
        self
    }

    /// Sets the maximum request body size.
    pub fn with_max_request_bytes(mut self, max: usize) -> Self {
        self.max_request_bytes = max;
        self
    }

    /// Delays readiness after start.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Enables or disables the gateway routes.
    pub fn with_gateway(mut self, enabled: bool) -> Self {
        self.enable_gateway = enabled;
        self
    }

    /// Persists data under `dir` across restarts.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets the accepted clock skew.
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Sets the certificate lifetime.
    pub fn with_certificate_validity(mut self, validity: Duration) -> Self {
        self.certificate_validity = validity;
        self
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}
