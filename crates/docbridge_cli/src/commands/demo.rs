//! `demo` command: the asset scenario end to end.

use super::CommandError;
use docbridge_client::{
    ClientConfig, ConnectionMode, HttpTransport, LifecycleCoordinator, LoopbackClient,
    StaticCredentials,
};
use docbridge_emulator::{Emulator, EmulatorConfig};
use docbridge_testkit::{
    asset_records, expected_matches, file_name_prefix, ASSETS_CONTAINER, ASSETS_DATABASE,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Options of the `demo` command.
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Number of assets to save.
    pub records: u32,
    /// File name prefix to query for.
    pub prefix: String,
    /// Maximum concurrent batches.
    pub concurrency: usize,
    /// Route requests through the gateway.
    pub gateway: bool,
    /// Emulator data directory.
    pub data_dir: Option<PathBuf>,
    /// Keep the database after the run.
    pub keep: bool,
}

/// Runs the scenario and returns the number of matching assets.
pub fn run(options: &DemoOptions) -> Result<usize, CommandError> {
    let mut emulator_config = EmulatorConfig::default();
    if let Some(dir) = &options.data_dir {
        emulator_config = emulator_config.with_data_dir(dir);
    }
    let emulator = Arc::new(Emulator::start(emulator_config)?);

    let mode = if options.gateway {
        ConnectionMode::Gateway
    } else {
        ConnectionMode::Direct
    };
    let config = ClientConfig::new(emulator.endpoint(), ASSETS_DATABASE)
        .with_container(ASSETS_CONTAINER)
        .with_connection_mode(mode)
        .with_max_concurrency(options.concurrency.max(1));
    let transport =
        HttpTransport::configured(LoopbackClient::new(Arc::clone(&emulator)), &config);
    let credentials =
        StaticCredentials::new(emulator.certificate_pem()).with_passphrase(emulator.key());

    let started = Instant::now();
    let client = LifecycleCoordinator::new(config)?;
    client.start_with(transport, &credentials)?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, %mode, "connected");

    let outcome = scenario(&client, options);

    if !options.keep {
        client.delete_database()?;
    }
    let report = client.shutdown();
    info!(drained = report.drained, "client shut down");
    emulator.stop()?;
    outcome
}

fn scenario<T>(
    client: &LifecycleCoordinator<T>,
    options: &DemoOptions,
) -> Result<usize, CommandError>
where
    T: docbridge_client::Transport + 'static,
{
    let started = Instant::now();
    let result = client
        .writer()?
        .write(asset_records(options.records), options.concurrency.max(1))?;
    info!(
        submitted = result.submitted,
        succeeded = result.succeeded,
        batches = result.batches,
        max_in_flight = result.max_in_flight,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "assets saved"
    );
    for (position, reason) in result.rejected() {
        info!(position, %reason, "asset rejected");
    }

    let started = Instant::now();
    let found = client
        .query_executor()?
        .count(file_name_prefix(&options.prefix))?;
    info!(
        prefix = %options.prefix,
        found,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "query finished"
    );

    let expected = expected_matches(options.records, &options.prefix);
    if found != expected {
        return Err(CommandError::Mismatch {
            expected,
            actual: found,
        });
    }
    println!("{found} of {} assets match {:?}", options.records, options.prefix);
    Ok(found)
}
