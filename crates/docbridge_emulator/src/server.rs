//! The emulator service.

use crate::auth::{generate_key, RequestAuthenticator};
use crate::certificate::Certificate;
use crate::config::EmulatorConfig;
use crate::error::EmulatorResult;
use crate::faults::{Fault, FaultPlan};
use crate::handler::{error_response, status_response, HandlerContext, RequestHandler};
use crate::store::DocumentStore;
use docbridge_protocol::http::status;
use docbridge_protocol::{HttpRequest, HttpResponse, HttpService, ServiceError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{info, warn};

/// File name of the snapshot inside the data directory.
pub const SNAPSHOT_FILE: &str = "emulator-data.json";

/// Request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmulatorStats {
    /// Requests that reached the emulator while it was ready.
    pub requests: u64,
    /// Requests rejected by authentication.
    pub unauthorized: u64,
    /// Requests answered by an injected fault.
    pub faulted: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    unauthorized: AtomicU64,
    faulted: AtomicU64,
}

/// In-process document store emulator.
///
/// The emulator answers the same routes a remote store would, signs
/// nothing itself but checks every request signature, and presents a
/// self-issued certificate clients must trust explicitly.
///
/// # Example
///
/// ```
/// use docbridge_emulator::{Emulator, EmulatorConfig};
///
/// let emulator = Emulator::start(EmulatorConfig::default()).unwrap();
/// assert!(emulator.is_ready());
/// assert!(emulator.certificate_pem().contains("BEGIN CERTIFICATE"));
/// emulator.stop().unwrap();
/// ```
pub struct Emulator {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    authenticator: RequestAuthenticator,
    certificate: Certificate,
    faults: Arc<FaultPlan>,
    counters: Counters,
    started_at: Instant,
    running: AtomicBool,
}

impl Emulator {
    /// Starts an emulator, loading the snapshot from `data_dir` if present.
    pub fn start(config: EmulatorConfig) -> EmulatorResult<Self> {
        let store = Arc::new(DocumentStore::new(config.partition_count));
        if let Some(dir) = &config.data_dir {
            std::fs::create_dir_all(dir)?;
            if store.load_from(&dir.join(SNAPSHOT_FILE))? {
                info!(dir = %dir.display(), databases = store.databases().len(), "snapshot loaded");
            }
        }

        let key = config.account_key.clone().unwrap_or_else(generate_key);
        let authenticator = RequestAuthenticator::new(key, config.clock_skew);
        let certificate = Certificate::issue("localhost", config.certificate_validity);
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));

        info!(
            endpoint = %context.config.endpoint,
            partitions = context.config.partition_count,
            gateway = context.config.enable_gateway,
            "emulator started"
        );
        Ok(Self {
            handler,
            context,
            authenticator,
            certificate,
            faults: Arc::new(FaultPlan::new()),
            counters: Counters::default(),
            started_at: Instant::now(),
            running: AtomicBool::new(true),
        })
    }

    /// Endpoint clients should connect to.
    pub fn endpoint(&self) -> &str {
        &self.context.config.endpoint
    }

    /// Account key requests must be signed with.
    pub fn key(&self) -> &str {
        self.authenticator.key()
    }

    /// PEM encoding of the emulator certificate.
    pub fn certificate_pem(&self) -> String {
        self.certificate.pem()
    }

    /// DER bytes of the emulator certificate.
    pub fn certificate_der(&self) -> &[u8] {
        self.certificate.der()
    }

    /// End of the certificate validity period.
    pub fn certificate_expiry(&self) -> SystemTime {
        self.certificate.not_after()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EmulatorConfig {
        &self.context.config
    }

    /// Returns the document store.
    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.context.store
    }

    /// Returns the fault plan.
    pub fn faults(&self) -> &Arc<FaultPlan> {
        &self.faults
    }

    /// Returns true once started, past the startup delay and not stopped.
    pub fn is_ready(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.started_at.elapsed() >= self.context.config.startup_delay
    }

    /// Returns request counters.
    pub fn stats(&self) -> EmulatorStats {
        EmulatorStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            unauthorized: self.counters.unauthorized.load(Ordering::Relaxed),
            faulted: self.counters.faulted.load(Ordering::Relaxed),
        }
    }

    /// Path of the snapshot file, if persistence is enabled.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.context
            .config
            .data_dir
            .as_ref()
            .map(|dir| dir.join(SNAPSHOT_FILE))
    }

    /// Stops the emulator and writes the snapshot.
    ///
    /// Later requests are refused. Stopping twice is a no-op.
    pub fn stop(&self) -> EmulatorResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(path) = self.snapshot_path() {
            self.context.store.save_to(&path)?;
            info!(path = %path.display(), "snapshot written");
        }
        info!(endpoint = %self.endpoint(), "emulator stopped");
        Ok(())
    }

    fn serve(&self, request: &HttpRequest) -> Result<HttpResponse, ServiceError> {
        let latency = self.faults.latency();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        match self.faults.next_fault() {
            Some(Fault::Refuse) => {
                self.counters.faulted.fetch_add(1, Ordering::Relaxed);
                return Err(ServiceError::ConnectionRefused);
            }
            Some(Fault::Reset) => {
                self.counters.faulted.fetch_add(1, Ordering::Relaxed);
                return Err(ServiceError::ConnectionReset);
            }
            Some(Fault::Status(code)) => {
                self.counters.faulted.fetch_add(1, Ordering::Relaxed);
                return Ok(status_response(code, "Injected", "injected failure"));
            }
            None => {}
        }

        if self.faults.rejects_auth() {
            self.counters.unauthorized.fetch_add(1, Ordering::Relaxed);
            return Ok(status_response(
                status::UNAUTHORIZED,
                "Unauthorized",
                "authorization rejected",
            ));
        }
        if let Err(e) = self.authenticator.authenticate(request) {
            self.counters.unauthorized.fetch_add(1, Ordering::Relaxed);
            warn!(path = %request.path, error = %e, "rejected request");
            return Ok(error_response(&e));
        }

        Ok(self.handler.handle(request))
    }
}

impl HttpService for Emulator {
    fn call(&self, request: &HttpRequest) -> Result<HttpResponse, ServiceError> {
        if !self.is_ready() {
            return Err(ServiceError::ConnectionRefused);
        }
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        self.serve(request)
    }

    fn server_certificate(&self) -> Result<Vec<u8>, ServiceError> {
        if !self.is_ready() || self.faults.take_refusal() {
            return Err(ServiceError::ConnectionRefused);
        }
        Ok(self.certificate.der().to_vec())
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "failed to stop emulator");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbridge_protocol::http::{AUTHORIZATION, DATE};
    use docbridge_protocol::{auth, decode_body, encode_body, Record, Request, Response};
    use std::time::{Duration, UNIX_EPOCH};

    fn signed(emulator: &Emulator, request: &Request) -> HttpRequest {
        let (method, path) = request.route();
        let date = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        HttpRequest::new(method, path.clone(), encode_body(request).unwrap())
            .with_header(
                AUTHORIZATION,
                auth::sign(emulator.key().as_bytes(), method, &path, date),
            )
            .with_header(DATE, date.to_string())
    }

    fn ensure() -> Request {
        Request::EnsureContainer {
            database: "Assets".into(),
            container: "assets".into(),
        }
    }

    #[test]
    fn emulator_lifecycle() {
        let emulator = Emulator::start(EmulatorConfig::default()).unwrap();
        assert!(emulator.is_ready());
        assert_eq!(emulator.server_certificate().unwrap(), emulator.certificate_der());

        emulator.stop().unwrap();
        emulator.stop().unwrap();
        assert!(!emulator.is_ready());
        assert_eq!(
            emulator.call(&signed(&emulator, &Request::Account)),
            Err(ServiceError::ConnectionRefused)
        );
        assert_eq!(
            emulator.server_certificate(),
            Err(ServiceError::ConnectionRefused)
        );
    }

    #[test]
    fn startup_delay_refuses_connections() {
        let config = EmulatorConfig::default().with_startup_delay(Duration::from_millis(100));
        let emulator = Emulator::start(config).unwrap();
        assert!(!emulator.is_ready());
        assert!(emulator.server_certificate().is_err());

        std::thread::sleep(Duration::from_millis(150));
        assert!(emulator.is_ready());
        assert!(emulator.server_certificate().is_ok());
    }

    #[test]
    fn signed_requests_are_served() {
        let emulator = Emulator::start(EmulatorConfig::default()).unwrap();
        let response = emulator.call(&signed(&emulator, &ensure())).unwrap();
        assert_eq!(response.status, status::CREATED);
        assert_eq!(emulator.stats().requests, 1);
    }

    #[test]
    fn unsigned_requests_are_rejected() {
        let emulator = Emulator::start(EmulatorConfig::default()).unwrap();
        let (method, path) = ensure().route();
        let request = HttpRequest::new(method, path, encode_body(&ensure()).unwrap());
        let response = emulator.call(&request).unwrap();
        assert_eq!(response.status, status::UNAUTHORIZED);
        assert_eq!(emulator.stats().unauthorized, 1);
    }

    #[test]
    fn fixed_key() {
        let emulator =
            Emulator::start(EmulatorConfig::default().with_account_key("fixed")).unwrap();
        assert_eq!(emulator.key(), "fixed");
    }

    #[test]
    fn injected_faults() {
        let emulator = Emulator::start(EmulatorConfig::default()).unwrap();
        emulator.faults().fail_next(1, status::TOO_MANY_REQUESTS);
        emulator.faults().reset_next(1);

        let request = signed(&emulator, &ensure());
        assert_eq!(emulator.call(&request), Err(ServiceError::ConnectionReset));
        assert_eq!(
            emulator.call(&request).unwrap().status,
            status::TOO_MANY_REQUESTS
        );
        assert_eq!(emulator.call(&request).unwrap().status, status::CREATED);
        assert_eq!(emulator.stats().faulted, 2);

        emulator.faults().reject_auth(true);
        assert_eq!(emulator.call(&request).unwrap().status, status::UNAUTHORIZED);
    }

    #[test]
    fn refused_certificate_fetch() {
        let emulator = Emulator::start(EmulatorConfig::default()).unwrap();
        emulator.faults().refuse_next(1);
        assert_eq!(
            emulator.server_certificate(),
            Err(ServiceError::ConnectionRefused)
        );
        assert!(emulator.server_certificate().is_ok());
    }

    #[test]
    fn snapshot_written_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmulatorConfig::default().with_data_dir(dir.path());

        let emulator = Emulator::start(config.clone()).unwrap();
        emulator.call(&signed(&emulator, &ensure())).unwrap();
        let upsert = Request::Upsert {
            database: "Assets".into(),
            container: "assets".into(),
            records: vec![Record::new("1", "a_1").with_field("fileName", "b_1.png")],
        };
        emulator.call(&signed(&emulator, &upsert)).unwrap();
        emulator.stop().unwrap();
        assert!(dir.path().join(SNAPSHOT_FILE).exists());

        let restarted = Emulator::start(config).unwrap();
        let read = Request::Read {
            database: "Assets".into(),
            container: "assets".into(),
            id: "1".into(),
            partition_key: "a_1".into(),
        };
        let response = restarted.call(&signed(&restarted, &read)).unwrap();
        match decode_body::<Response>(&response.body).unwrap() {
            Response::Item(Some(record)) => assert_eq!(record.text("fileName"), Some("b_1.png")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
