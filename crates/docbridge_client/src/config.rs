//! Configuration for the client.

use crate::error::{ClientError, ClientResult};
use crate::trust::CredentialSpec;
use docbridge_protocol::ConnectionMode;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use zeroize::Zeroizing;

/// Prefix of recognised environment variables.
pub const ENV_PREFIX: &str = "DOCBRIDGE_";

/// Default maximum records per batch.
pub const DEFAULT_BATCH_SIZE_LIMIT: usize = 100;

/// Default maximum encoded bytes per batch, under the store's 2 MiB request cap.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 2 * 1024 * 1024 - 64 * 1024;

/// Retry, health and timeout policy for a session.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts per request, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to delays.
    pub jitter: bool,
    /// Consecutive transient failures before the session is degraded.
    pub degrade_after: u32,
    /// Timeout of a single round trip.
    pub request_timeout: Duration,
    /// Bounded wait for in-flight requests when closing.
    pub close_timeout: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            degrade_after: 3,
            request_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
        }
    }

    /// Creates a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
            ..Self::new(1)
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the degradation threshold.
    pub fn with_degrade_after(mut self, failures: u32) -> Self {
        self.degrade_after = failures.max(1);
        self
    }

    /// Sets the per round trip timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the close drain timeout.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// An account key that never shows up in debug output.
#[derive(Clone)]
pub struct AccountKey(Zeroizing<String>);

impl AccountKey {
    /// Wraps a key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(Zeroizing::new(key.into()))
    }

    /// Returns the key bytes used for signing.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountKey(<redacted>)")
    }
}

/// Configuration for a client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Store endpoint, e.g. `https://127.0.0.1:8081/`.
    pub endpoint: String,
    /// Where trust material comes from.
    pub credential_source: Option<CredentialSpec>,
    /// Account key; falls back to the trust passphrase when unset.
    pub account_key: Option<AccountKey>,
    /// Database name.
    pub database: String,
    /// Container name.
    pub container: String,
    /// Route family used for requests.
    pub connection_mode: ConnectionMode,
    /// Retry policy.
    pub retry: RetryPolicy,
    /// Default ceiling of concurrent batches.
    pub max_concurrency: usize,
    /// Maximum records per batch.
    pub batch_size_limit: usize,
    /// Maximum encoded bytes per batch.
    pub max_batch_bytes: usize,
    /// Records requested per query page.
    pub page_size: u32,
    /// Whether query streams fetch one page ahead.
    pub prefetch: bool,
    /// Deadline for reaching ready at startup.
    pub startup_timeout: Duration,
    /// Bounded wait for in-flight batches at shutdown.
    pub drain_timeout: Duration,
}

impl ClientConfig {
    /// Creates a configuration for the given endpoint and database.
    pub fn new(endpoint: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential_source: None,
            account_key: None,
            database: database.into(),
            container: "items".into(),
            connection_mode: ConnectionMode::Direct,
            retry: RetryPolicy::default(),
            max_concurrency: 4,
            batch_size_limit: DEFAULT_BATCH_SIZE_LIMIT,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            page_size: 100,
            prefetch: false,
            startup_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10),
        }
    }

    /// Reads the configuration from `DOCBRIDGE_*` environment variables.
    pub fn from_env() -> ClientResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Reads the configuration from `DOCBRIDGE_*` key/value pairs.
    ///
    /// Unprefixed keys are ignored; unknown prefixed keys are an error.
    pub fn from_vars<I, K, V>(vars: I) -> ClientResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let option = name.to_ascii_lowercase().replace('_', "-");
            config.apply_option(&option, value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Applies one named option, using the `kebab-case` option names.
    pub fn apply_option(&mut self, option: &str, value: &str) -> ClientResult<()> {
        let value = value.trim();
        match option {
            "endpoint" => self.endpoint = value.to_string(),
            "credential-source" => self.credential_source = Some(parse(option, value)?),
            "account-key" => self.account_key = Some(AccountKey::new(value)),
            "database-name" => self.database = value.to_string(),
            "container-name" => self.container = value.to_string(),
            "connection-mode" => self.connection_mode = parse(option, value)?,
            "max-retry-attempts" => self.retry.max_attempts = parse(option, value)?,
            "max-concurrency" => self.max_concurrency = parse(option, value)?,
            "batch-size-limit" => self.batch_size_limit = parse(option, value)?,
            "max-batch-bytes" => self.max_batch_bytes = parse(option, value)?,
            "page-size" => self.page_size = parse(option, value)?,
            "prefetch" => self.prefetch = parse(option, value)?,
            "request-timeout-ms" => {
                self.retry.request_timeout = Duration::from_millis(parse(option, value)?)
            }
            "startup-timeout-ms" => {
                self.startup_timeout = Duration::from_millis(parse(option, value)?)
            }
            "drain-timeout-ms" => self.drain_timeout = Duration::from_millis(parse(option, value)?),
            other => return Err(ClientError::Config(format!("unknown option: {other}"))),
        }
        Ok(())
    }

    /// Sets the credential source.
    pub fn with_credential_source(mut self, source: CredentialSpec) -> Self {
        self.credential_source = Some(source);
        self
    }

    /// Sets the account key.
    pub fn with_account_key(mut self, key: impl Into<String>) -> Self {
        self.account_key = Some(AccountKey::new(key));
        self
    }

    /// Sets the container name.
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    /// Sets the connection mode.
    pub fn with_connection_mode(mut self, mode: ConnectionMode) -> Self {
        self.connection_mode = mode;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the default concurrency ceiling.
    pub fn with_max_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrency = concurrency;
        self
    }

    /// Sets the maximum records per batch.
    pub fn with_batch_size_limit(mut self, limit: usize) -> Self {
        self.batch_size_limit = limit;
        self
    }

    /// Sets the maximum encoded bytes per batch.
    pub fn with_max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes;
        self
    }

    /// Sets the query page size.
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Enables one-page-ahead prefetch for queries.
    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Sets the startup timeout.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Sets the shutdown drain timeout.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Checks that the values are usable.
    pub fn validate(&self) -> ClientResult<()> {
        if !(self.endpoint.starts_with("https://") || self.endpoint.starts_with("http://")) {
            return Err(ClientError::Config(format!(
                "endpoint must be an http(s) URI: {:?}",
                self.endpoint
            )));
        }
        if self.database.is_empty() || self.container.is_empty() {
            return Err(ClientError::Config(
                "database and container names must not be empty".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ClientError::Config("max-retry-attempts must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(ClientError::Config("max-concurrency must be at least 1".into()));
        }
        if self.batch_size_limit == 0 || self.max_batch_bytes == 0 {
            return Err(ClientError::Config("batch limits must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(ClientError::Config("page-size must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("https://127.0.0.1:8081/", "docbridge")
    }
}

fn parse<T: FromStr>(option: &str, value: &str) -> ClientResult<T>
where
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| ClientError::Config(format!("{option}={value:?}: {e}")))
}
