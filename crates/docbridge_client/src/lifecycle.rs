//! Startup and shutdown ordering.
//!
//! The coordinator loads trust material, opens the session and makes sure
//! the configured container exists, all within the startup timeout. On
//! shutdown it stops admitting work, gives in-flight batches a bounded
//! time to finish, and only then closes the session.

use crate::bulk::BulkWriter;
use crate::config::ClientConfig;
use crate::drain::DrainGate;
use crate::error::{ClientError, ClientResult};
use crate::query::QueryExecutor;
use crate::session::Session;
use crate::transport::Transport;
use crate::trust::{CredentialSource, TrustMaterialLoader};
use docbridge_protocol::{Request, Response};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Where the coordinator is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Not started.
    Created,
    /// Startup in progress.
    Starting,
    /// Accepting work.
    Ready,
    /// Waiting for in-flight work before closing.
    Draining,
    /// Closed, or startup failed.
    Stopped,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::Created => "created",
            LifecyclePhase::Starting => "starting",
            LifecyclePhase::Ready => "ready",
            LifecyclePhase::Draining => "draining",
            LifecyclePhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Summary of a shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// True if all in-flight batches finished within the drain timeout.
    pub drained: bool,
    /// Batches still in flight when the drain timeout expired.
    pub forced_batches: usize,
    /// Time shutdown took.
    pub elapsed: Duration,
}

/// Owns the session and orders startup and shutdown.
pub struct LifecycleCoordinator<T: Transport> {
    config: ClientConfig,
    loader: TrustMaterialLoader,
    phase: RwLock<LifecyclePhase>,
    session: RwLock<Option<Session<T>>>,
    gate: DrainGate,
    report: Mutex<Option<ShutdownReport>>,
}

impl<T: Transport + 'static> LifecycleCoordinator<T> {
    /// Creates a coordinator for a validated configuration.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            loader: TrustMaterialLoader::new(),
            phase: RwLock::new(LifecyclePhase::Created),
            session: RwLock::new(None),
            gate: DrainGate::new(),
            report: Mutex::new(None),
        })
    }

    /// Uses `loader` for trust material.
    pub fn with_loader(mut self, loader: TrustMaterialLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Starts using the configured credential source.
    pub fn start(&self, transport: T) -> ClientResult<()> {
        let spec = self
            .config
            .credential_source
            .clone()
            .ok_or_else(|| ClientError::Config("no credential-source configured".into()))?;
        let source = spec.open();
        self.start_with(transport, source.as_ref())
    }

    /// Starts using trust material from `source`.
    ///
    /// Fails with [`ClientError::StartupTimeout`] if the store is not ready
    /// within the startup timeout. A failed start leaves the coordinator
    /// stopped.
    pub fn start_with(&self, transport: T, source: &dyn CredentialSource) -> ClientResult<()> {
        {
            let mut phase = self.phase.write();
            if *phase != LifecyclePhase::Created {
                return Err(ClientError::Config(format!("cannot start while {}", *phase)));
            }
            *phase = LifecyclePhase::Starting;
        }
        let started = Instant::now();
        let deadline = started + self.config.startup_timeout;
        info!(endpoint = %self.config.endpoint, "starting client");

        match self.bring_up(transport, source, deadline) {
            Ok(session) => {
                *self.session.write() = Some(session);
                *self.phase.write() = LifecyclePhase::Ready;
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "client ready"
                );
                Ok(())
            }
            Err(e) => {
                self.gate.close();
                *self.phase.write() = LifecyclePhase::Stopped;
                warn!(error = %e, "client startup failed");
                Err(e)
            }
        }
    }

    fn bring_up(
        &self,
        transport: T,
        source: &dyn CredentialSource,
        deadline: Instant,
    ) -> ClientResult<Session<T>> {
        let trust = self.loader.load(source)?;
        let session = Session::open_until(
            transport,
            self.config.endpoint.clone(),
            trust,
            self.config.retry.clone(),
            deadline,
        )?;

        let ensure = Request::EnsureContainer {
            database: self.config.database.clone(),
            container: self.config.container.clone(),
        };
        let result = session.submit(&ensure);
        if Instant::now() > deadline {
            session.close_within(Duration::ZERO);
            return Err(ClientError::StartupTimeout(self.config.startup_timeout));
        }
        match result.map(|ack| ack.response) {
            Ok(Response::ContainerReady { created }) => {
                info!(
                    database = %self.config.database,
                    container = %self.config.container,
                    created,
                    "container ready"
                );
                Ok(session)
            }
            Ok(other) => {
                session.close_within(Duration::ZERO);
                Err(ClientError::UnexpectedResponse {
                    expected: "container_ready",
                    actual: other.kind(),
                })
            }
            Err(e) => {
                session.close_within(Duration::ZERO);
                Err(e)
            }
        }
    }

    /// Current phase.
    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.read()
    }

    /// The configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The gate shared by writers and query executors.
    pub fn gate(&self) -> &DrainGate {
        &self.gate
    }

    /// The open session.
    pub fn session(&self) -> ClientResult<Session<T>> {
        match self.phase() {
            LifecyclePhase::Ready => self
                .session
                .read()
                .clone()
                .ok_or(ClientError::ShuttingDown),
            LifecyclePhase::Created | LifecyclePhase::Starting => {
                Err(ClientError::Config("client has not started".into()))
            }
            LifecyclePhase::Draining | LifecyclePhase::Stopped => Err(ClientError::ShuttingDown),
        }
    }

    /// A bulk writer bound to the configured container.
    pub fn writer(&self) -> ClientResult<BulkWriter<T>> {
        Ok(
            BulkWriter::new(self.session()?, &self.config.database, &self.config.container)
                .with_batch_size_limit(self.config.batch_size_limit)
                .with_max_batch_bytes(self.config.max_batch_bytes)
                .with_max_concurrency(self.config.max_concurrency)
                .with_gate(self.gate.clone()),
        )
    }

    /// A query executor bound to the configured container.
    pub fn query_executor(&self) -> ClientResult<QueryExecutor<T>> {
        Ok(
            QueryExecutor::new(self.session()?, &self.config.database, &self.config.container)
                .with_page_size(self.config.page_size)
                .with_prefetch(self.config.prefetch)
                .with_gate(self.gate.clone()),
        )
    }

    /// Deletes the configured database. Returns whether it existed.
    pub fn delete_database(&self) -> ClientResult<bool> {
        let request = Request::DeleteDatabase {
            database: self.config.database.clone(),
        };
        match self.session()?.submit(&request)?.response {
            Response::Deleted { existed } => Ok(existed),
            other => Err(ClientError::UnexpectedResponse {
                expected: "deleted",
                actual: other.kind(),
            }),
        }
    }

    /// Stops admissions, drains in-flight batches, then closes the session.
    ///
    /// Batches still running after the drain timeout are abandoned and their
    /// records reported as timed out. Later calls return the first report.
    pub fn shutdown(&self) -> ShutdownReport {
        let mut report = self.report.lock();
        if let Some(report) = report.as_ref() {
            return report.clone();
        }

        let started = Instant::now();
        *self.phase.write() = LifecyclePhase::Draining;
        self.gate.close();
        info!(in_flight = self.gate.in_flight(), "draining");

        let drained = self.gate.wait_idle(self.config.drain_timeout);
        let forced_batches = if drained {
            0
        } else {
            let forced = self.gate.in_flight();
            warn!(forced, timeout = ?self.config.drain_timeout, "drain timed out");
            self.gate.expire();
            forced
        };

        if let Some(session) = self.session.write().take() {
            if drained {
                session.close();
            } else {
                session.close_within(Duration::ZERO);
            }
        }
        *self.phase.write() = LifecyclePhase::Stopped;

        let result = ShutdownReport {
            drained,
            forced_batches,
            elapsed: started.elapsed(),
        };
        info!(
            drained,
            forced_batches,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "client stopped"
        );
        *report = Some(result.clone());
        result
    }
}

impl<T: Transport> fmt::Debug for LifecycleCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("endpoint", &self.config.endpoint)
            .field("phase", &*self.phase.read())
            .finish()
    }
}
