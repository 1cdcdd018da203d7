//! Emulator harness.
//!
//! Wires an in-process emulator to a client: the emulator certificate and
//! key become the trust material, and the client configuration points at
//! the emulator endpoint with short retry delays.

use crate::fixtures::{ASSETS_CONTAINER, ASSETS_DATABASE};
use docbridge_client::{
    ClientConfig, HttpTransport, LifecycleCoordinator, LoopbackClient, RetryPolicy,
    StaticCredentials,
};
use docbridge_emulator::{Emulator, EmulatorConfig};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Transport that reaches an in-process emulator.
pub type EmulatorTransport = HttpTransport<LoopbackClient<Emulator>>;

/// Client coordinator bound to an in-process emulator.
pub type EmulatorClient = LifecycleCoordinator<EmulatorTransport>;

/// Retry policy suited to tests: few attempts, short fixed delays.
pub fn test_retry_policy() -> RetryPolicy {
    RetryPolicy::new(4)
        .with_initial_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(20))
        .with_jitter(false)
        .with_request_timeout(Duration::from_secs(2))
        .with_close_timeout(Duration::from_millis(500))
}

/// A running emulator and the means to connect to it.
pub struct TestEmulator {
    emulator: Arc<Emulator>,
    data_dir: Option<TempDir>,
}

impl TestEmulator {
    /// Starts an emulator with the default configuration.
    pub fn start() -> Self {
        Self::with_config(EmulatorConfig::default())
    }

    /// Starts an emulator with `config`.
    pub fn with_config(config: EmulatorConfig) -> Self {
        let emulator = Emulator::start(config).expect("Failed to start emulator");
        Self {
            emulator: Arc::new(emulator),
            data_dir: None,
        }
    }

    /// Starts an emulator that persists to a temporary directory.
    ///
    /// The directory is removed when the harness is dropped.
    pub fn persistent() -> Self {
        let dir = TempDir::new().expect("Failed to create data directory");
        let mut harness = Self::with_config(EmulatorConfig::default().with_data_dir(dir.path()));
        harness.data_dir = Some(dir);
        harness
    }

    /// Stops the emulator and starts a fresh one with the same configuration.
    pub fn restart(self) -> Self {
        self.emulator.stop().expect("Failed to stop emulator");
        let emulator =
            Emulator::start(self.emulator.config().clone()).expect("Failed to restart emulator");
        Self {
            emulator: Arc::new(emulator),
            data_dir: self.data_dir,
        }
    }

    /// The emulator.
    pub fn emulator(&self) -> &Arc<Emulator> {
        &self.emulator
    }

    /// Trust material for the emulator certificate, carrying the account key.
    pub fn credentials(&self) -> StaticCredentials {
        StaticCredentials::new(self.emulator.certificate_pem())
            .with_passphrase(self.emulator.key())
    }

    /// Client configuration for the asset container on this emulator.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.emulator.endpoint(), ASSETS_DATABASE)
            .with_container(ASSETS_CONTAINER)
            .with_retry(test_retry_policy())
            .with_startup_timeout(Duration::from_secs(5))
            .with_drain_timeout(Duration::from_secs(5))
    }

    /// A transport configured from `config`.
    pub fn transport(&self, config: &ClientConfig) -> EmulatorTransport {
        HttpTransport::configured(LoopbackClient::new(Arc::clone(&self.emulator)), config)
    }

    /// A started client using the default client configuration.
    pub fn client(&self) -> EmulatorClient {
        self.client_with(self.client_config())
    }

    /// A started client using `config`.
    pub fn client_with(&self, config: ClientConfig) -> EmulatorClient {
        self.try_client_with(config).expect("Failed to start client")
    }

    /// Builds and starts a client, returning startup failures.
    pub fn try_client_with(
        &self,
        config: ClientConfig,
    ) -> docbridge_client::ClientResult<EmulatorClient> {
        let transport = self.transport(&config);
        let client = LifecycleCoordinator::new(config)?;
        client.start_with(transport, &self.credentials())?;
        Ok(client)
    }
}

/// Runs `f` against a started client, then deletes the database and shuts down.
///
/// # Example
///
/// ```rust,ignore
/// with_client(|client| {
///     let writer = client.writer().unwrap();
///     writer.write(asset_records(10), 4).unwrap();
/// });
/// ```
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&EmulatorClient) -> R,
{
    let harness = TestEmulator::start();
    let client = harness.client();
    let result = f(&client);
    if let Err(e) = client.delete_database() {
        tracing::warn!(error = %e, "failed to delete test database");
    }
    client.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{asset_records, file_name_prefix};
    use crate::generators::{prefix_predicate_strategy, record_batch_strategy};
    use docbridge_client::LifecyclePhase;
    use proptest::prelude::*;

    #[test]
    fn harness_client_starts() {
        let harness = TestEmulator::start();
        let client = harness.client();
        assert_eq!(client.phase(), LifecyclePhase::Ready);
        client.shutdown();
        assert_eq!(client.phase(), LifecyclePhase::Stopped);
    }

    #[test]
    fn with_client_cleans_up() {
        let count = with_client(|client| {
            let result = client.writer().unwrap().write(asset_records(10), 2).unwrap();
            assert!(result.is_complete_success());
            client
                .query_executor()
                .unwrap()
                .count(file_name_prefix("a"))
                .unwrap()
        });
        assert_eq!(count, 5);
    }

    #[test]
    fn persistent_emulator_keeps_data_across_restart() {
        let harness = TestEmulator::persistent();
        let client = harness.client();
        client.writer().unwrap().write(asset_records(6), 2).unwrap();
        client.shutdown();

        let harness = harness.restart();
        assert!(harness.emulator().snapshot_path().unwrap().exists());
        let client = harness.client();
        let count = client
            .query_executor()
            .unwrap()
            .count(file_name_prefix("a_"))
            .unwrap();
        assert_eq!(count, 3);
        client.shutdown();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn generated_batches_are_written_and_filtered(
            batch in record_batch_strategy(30),
            predicate in prefix_predicate_strategy(),
            concurrency in 1usize..4,
        ) {
            let expected: Vec<(String, String)> = batch
                .iter()
                .filter(|r| predicate.matches(r))
                .map(|r| (r.partition_key.clone(), r.id.clone()))
                .collect();

            let result = with_client(|client| {
                let written = client.writer().unwrap().write(batch.clone(), concurrency).unwrap();
                let found = client
                    .query_executor()
                    .unwrap()
                    .collect_all(predicate.clone())
                    .unwrap();
                (written, found)
            });
            let (written, found) = result;

            prop_assert_eq!(written.outcomes.len(), batch.len());
            prop_assert!(written.is_complete_success());
            prop_assert!(found.iter().all(|r| predicate.matches(r)));
            let mut found: Vec<(String, String)> = found
                .into_iter()
                .map(|r| (r.partition_key, r.id))
                .collect();
            let mut expected = expected;
            found.sort();
            expected.sort();
            prop_assert_eq!(found, expected);
        }
    }
}
