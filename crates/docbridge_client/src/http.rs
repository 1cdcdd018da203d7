//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so different
//! implementations can be plugged in. Bodies are CBOR, every request is
//! signed with the account key, and status codes are mapped onto the
//! transient/permanent split the session retries on.

use crate::config::{AccountKey, ClientConfig};
use crate::error::{ConnectionError, RequestError};
use crate::transport::Transport;
use crate::trust::TrustContext;
use docbridge_protocol::http::{self as wire, status};
use docbridge_protocol::{
    auth, decode_body, encode_body, AccountInfo, ConnectionMode, ErrorBody, HttpRequest,
    HttpResponse, HttpService, Request, Response, ServiceError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Failure of a single HTTP exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    /// The connection could not be used.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// No response arrived within the timeout.
    #[error("no response within {0:?}")]
    TimedOut(Duration),
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// DER certificate presented by the peer during the TLS handshake.
    fn peer_certificate(&self, endpoint: &str) -> Result<Vec<u8>, ServiceError>;

    /// Sends a request and waits up to `timeout` for the response.
    fn execute(
        &self,
        endpoint: &str,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpFailure>;
}

/// Connection established by [`HttpTransport`].
#[derive(Debug)]
pub struct HttpConnection {
    endpoint: String,
    key: AccountKey,
    account: AccountInfo,
    open: AtomicBool,
}

impl HttpConnection {
    /// Account metadata returned by the handshake probe.
    pub fn account(&self) -> &AccountInfo {
        &self.account
    }
}

/// HTTP-based transport.
pub struct HttpTransport<C: HttpClient> {
    client: C,
    mode: ConnectionMode,
    key: Option<AccountKey>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport using direct mode.
    ///
    /// Without an explicit key, the trust material's passphrase is used.
    pub fn new(client: C) -> Self {
        Self {
            client,
            mode: ConnectionMode::Direct,
            key: None,
        }
    }

    /// Creates a transport using the mode and key from `config`.
    pub fn configured(client: C, config: &ClientConfig) -> Self {
        Self::new(client)
            .with_connection_mode(config.connection_mode)
            .with_account_key(config.account_key.clone())
    }

    /// Sets the connection mode.
    pub fn with_connection_mode(mut self, mode: ConnectionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the account key.
    pub fn with_account_key(mut self, key: Option<AccountKey>) -> Self {
        self.key = key;
        self
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn build(&self, key: &AccountKey, request: &Request) -> Result<HttpRequest, RequestError> {
        let (method, _) = request.route();
        let path = request.path(self.mode);
        let body = encode_body(request)
            .map_err(|e| RequestError::permanent(format!("failed to encode request: {e}")))?;
        let date = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let signature = auth::sign(key.as_bytes(), method, &path, date);

        Ok(HttpRequest::new(method, path, body)
            .with_header(wire::AUTHORIZATION, signature)
            .with_header(wire::DATE, date.to_string())
            .with_header(wire::ACTIVITY_ID, Uuid::new_v4().to_string()))
    }

    fn exchange(
        &self,
        endpoint: &str,
        key: &AccountKey,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, Exchange> {
        let http = self.build(key, request).map_err(Exchange::Request)?;
        let activity = http.header(wire::ACTIVITY_ID).unwrap_or_default().to_string();
        debug!(kind = request.kind(), path = %http.path, %activity, "sending request");

        let response = self.client.execute(endpoint, http, timeout);
        match response {
            Ok(response) if response.is_success() => decode_body(&response.body).map_err(|e| {
                Exchange::Request(RequestError::permanent(format!(
                    "failed to decode response: {e}"
                )))
            }),
            Ok(response) => Err(Exchange::Status(response.status, error_message(&response))),
            Err(HttpFailure::TimedOut(after)) => Err(Exchange::Request(RequestError::Timeout(after))),
            Err(HttpFailure::Service(ServiceError::ConnectionRefused)) => {
                Err(Exchange::Refused)
            }
            Err(HttpFailure::Service(ServiceError::ConnectionReset)) => Err(Exchange::Reset),
        }
    }
}

enum Exchange {
    Status(u16, String),
    Request(RequestError),
    Refused,
    Reset,
}

fn error_message(response: &HttpResponse) -> String {
    match decode_body::<ErrorBody>(&response.body) {
        Ok(body) => format!("{} {}: {}", response.status, body.code, body.message),
        Err(_) => format!("status {}", response.status),
    }
}

/// Maps a non-success status on an ordinary request.
pub fn classify_status(code: u16, message: String) -> RequestError {
    if status::is_transient(code) {
        RequestError::Transient(message)
    } else {
        RequestError::Permanent(message)
    }
}

impl<C: HttpClient> Transport for HttpTransport<C> {
    type Handle = HttpConnection;

    fn connect(
        &self,
        endpoint: &str,
        trust: &TrustContext,
        timeout: Duration,
    ) -> Result<HttpConnection, ConnectionError> {
        if !trust.is_valid_at(SystemTime::now()) {
            return Err(ConnectionError::fatal("trust material has expired"));
        }
        let certificate = self
            .client
            .peer_certificate(endpoint)
            .map_err(|e| ConnectionError::transient(e.to_string()))?;
        if !trust.trusts(&certificate) {
            warn!(%endpoint, "peer certificate is not trusted");
            return Err(ConnectionError::fatal("peer certificate is not trusted"));
        }

        let key = match (&self.key, trust.passphrase()) {
            (Some(key), _) => key.clone(),
            (None, Some(passphrase)) => AccountKey::new(passphrase),
            (None, None) => return Err(ConnectionError::fatal("no account key configured")),
        };

        let account = match self.exchange(endpoint, &key, &Request::Account, timeout) {
            Ok(Response::Account(account)) => account,
            Ok(other) => {
                return Err(ConnectionError::fatal(format!(
                    "unexpected {} response to the account probe",
                    other.kind()
                )))
            }
            Err(Exchange::Status(code, message)) if status::is_transient(code) => {
                return Err(ConnectionError::transient(message))
            }
            Err(Exchange::Status(_, message)) => return Err(ConnectionError::fatal(message)),
            Err(Exchange::Request(e)) if e.is_retryable() => {
                return Err(ConnectionError::transient(e.to_string()))
            }
            Err(Exchange::Request(e)) => return Err(ConnectionError::fatal(e.to_string())),
            Err(Exchange::Refused) => {
                return Err(ConnectionError::transient("connection refused"))
            }
            Err(Exchange::Reset) => return Err(ConnectionError::transient("connection reset")),
        };

        debug!(
            %endpoint,
            partitions = account.partition_count,
            mode = %self.mode,
            "connected"
        );
        Ok(HttpConnection {
            endpoint: endpoint.to_string(),
            key,
            account,
            open: AtomicBool::new(true),
        })
    }

    fn send(
        &self,
        handle: &HttpConnection,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, RequestError> {
        if !self.is_open(handle) {
            return Err(RequestError::transient("connection is closed"));
        }
        match self.exchange(&handle.endpoint, &handle.key, request, timeout) {
            Ok(response) => Ok(response),
            Err(Exchange::Status(code, message)) => Err(classify_status(code, message)),
            Err(Exchange::Request(e)) => Err(e),
            Err(Exchange::Refused) => Err(RequestError::transient("connection refused")),
            Err(Exchange::Reset) => {
                handle.open.store(false, Ordering::SeqCst);
                Err(RequestError::transient("connection reset"))
            }
        }
    }

    fn close(&self, handle: &HttpConnection) {
        handle.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self, handle: &HttpConnection) -> bool {
        handle.open.load(Ordering::SeqCst)
    }
}

/// An HTTP client that routes requests directly to an in-process service.
///
/// Each call runs on its own thread so the timeout can be honoured even
/// when the service stalls.
pub struct LoopbackClient<S: HttpService> {
    service: Arc<S>,
}

impl<S: HttpService + 'static> LoopbackClient<S> {
    /// Creates a client bound to `service`.
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    /// Returns the service.
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }
}

impl<S: HttpService + 'static> HttpClient for LoopbackClient<S> {
    fn peer_certificate(&self, _endpoint: &str) -> Result<Vec<u8>, ServiceError> {
        self.service.server_certificate()
    }

    fn execute(
        &self,
        _endpoint: &str,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpFailure> {
        let (tx, rx) = mpsc::channel();
        let service = Arc::clone(&self.service);
        std::thread::spawn(move || {
            let _ = tx.send(service.call(&request));
        });
        match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(HttpFailure::from),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(HttpFailure::TimedOut(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(HttpFailure::Service(ServiceError::ConnectionReset))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::{StaticCredentials, TrustMaterialLoader};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const CERT: &[u8] = b"test-certificate";

    struct TestService {
        responses: Mutex<VecDeque<Result<HttpResponse, ServiceError>>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl TestService {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::new()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn push(&self, result: Result<HttpResponse, ServiceError>) {
            self.responses.lock().push_back(result);
        }

        fn push_ok(&self, response: &Response) {
            self.push(Ok(HttpResponse::new(status::OK, encode_body(response).unwrap())));
        }

        fn push_status(&self, code: u16) {
            let body = encode_body(&ErrorBody::new("Failure", "scripted")).unwrap();
            self.push(Ok(HttpResponse::new(code, body)));
        }
    }

    impl HttpService for TestService {
        fn call(&self, request: &HttpRequest) -> Result<HttpResponse, ServiceError> {
            self.seen.lock().push(request.clone());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or(Err(ServiceError::ConnectionRefused))
        }

        fn server_certificate(&self) -> Result<Vec<u8>, ServiceError> {
            Ok(CERT.to_vec())
        }
    }

    fn trust_for(cert: &[u8]) -> TrustContext {
        let pem = format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
            STANDARD.encode(cert)
        );
        TrustMaterialLoader::new()
            .load(&StaticCredentials::new(pem).with_passphrase("account-key"))
            .unwrap()
    }

    fn account() -> Response {
        Response::Account(AccountInfo {
            partition_count: 2,
            gateway_enabled: true,
            databases: Vec::new(),
        })
    }

    fn transport(service: &Arc<TestService>) -> HttpTransport<LoopbackClient<TestService>> {
        HttpTransport::new(LoopbackClient::new(Arc::clone(service)))
    }

    #[test]
    fn connect_signs_the_probe() {
        let service = TestService::new();
        service.push_ok(&account());
        let transport = transport(&service).with_connection_mode(ConnectionMode::Gateway);

        let handle = transport
            .connect("https://127.0.0.1:8081/", &trust_for(CERT), Duration::from_secs(1))
            .unwrap();
        assert_eq!(handle.account().partition_count, 2);

        let seen = service.seen.lock();
        let probe = &seen[0];
        assert_eq!(probe.path, "/gateway/");
        let date: u64 = probe.header(wire::DATE).unwrap().parse().unwrap();
        assert!(auth::verify(
            b"account-key",
            probe.method,
            &probe.path,
            date,
            probe.header(wire::AUTHORIZATION).unwrap()
        ));
        assert!(probe.header(wire::ACTIVITY_ID).is_some());
    }

    #[test]
    fn connect_rejects_untrusted_peer() {
        let service = TestService::new();
        let result = transport(&service).connect(
            "https://127.0.0.1:8081/",
            &trust_for(b"some-other-cert"),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(ConnectionError::Fatal(_))));
        assert!(service.seen.lock().is_empty());
    }

    #[test]
    fn connect_classification() {
        let service = TestService::new();
        let transport = transport(&service);
        let trust = trust_for(CERT);
        let timeout = Duration::from_secs(1);

        service.push_status(status::UNAUTHORIZED);
        assert!(matches!(
            transport.connect("e", &trust, timeout),
            Err(ConnectionError::Fatal(_))
        ));

        service.push_status(status::NOT_FOUND);
        assert!(matches!(
            transport.connect("e", &trust, timeout),
            Err(ConnectionError::Fatal(_))
        ));

        service.push_status(status::SERVICE_UNAVAILABLE);
        assert!(matches!(
            transport.connect("e", &trust, timeout),
            Err(ConnectionError::Transient(_))
        ));

        service.push(Err(ServiceError::ConnectionRefused));
        assert!(matches!(
            transport.connect("e", &trust, timeout),
            Err(ConnectionError::Transient(_))
        ));
    }

    #[test]
    fn send_classification() {
        let service = TestService::new();
        service.push_ok(&account());
        let transport = transport(&service);
        let handle = transport
            .connect("e", &trust_for(CERT), Duration::from_secs(1))
            .unwrap();
        let timeout = Duration::from_secs(1);

        for code in [status::TOO_MANY_REQUESTS, status::RETRY_WITH, status::SERVICE_UNAVAILABLE] {
            service.push_status(code);
            let err = transport.send(&handle, &Request::Account, timeout).unwrap_err();
            assert!(matches!(err, RequestError::Transient(_)), "{code}");
        }
        for code in [status::BAD_REQUEST, status::FORBIDDEN, status::CONFLICT] {
            service.push_status(code);
            let err = transport.send(&handle, &Request::Account, timeout).unwrap_err();
            assert!(matches!(err, RequestError::Permanent(_)), "{code}");
        }

        service.push(Err(ServiceError::ConnectionReset));
        let err = transport.send(&handle, &Request::Account, timeout).unwrap_err();
        assert!(err.is_retryable());
        assert!(!transport.is_open(&handle));
    }

    #[test]
    fn error_body_is_reported() {
        let service = TestService::new();
        service.push_ok(&account());
        let transport = transport(&service);
        let handle = transport
            .connect("e", &trust_for(CERT), Duration::from_secs(1))
            .unwrap();

        service.push_status(status::CONFLICT);
        let err = transport
            .send(&handle, &Request::Account, Duration::from_secs(1))
            .unwrap_err();
        assert!(err.to_string().contains("scripted"));
    }

    struct StalledService;

    impl HttpService for StalledService {
        fn call(&self, _request: &HttpRequest) -> Result<HttpResponse, ServiceError> {
            std::thread::sleep(Duration::from_millis(200));
            Err(ServiceError::ConnectionReset)
        }

        fn server_certificate(&self) -> Result<Vec<u8>, ServiceError> {
            Ok(CERT.to_vec())
        }
    }

    #[test]
    fn loopback_honours_timeout() {
        let client = LoopbackClient::new(Arc::new(StalledService));
        let request = HttpRequest::new(wire::Method::Get, "/", Vec::new());
        assert_eq!(
            client.execute("e", request, Duration::from_millis(20)),
            Err(HttpFailure::TimedOut(Duration::from_millis(20)))
        );
    }
}
