//! Request handlers for the store routes.

use crate::config::EmulatorConfig;
use crate::error::{EmulatorError, EmulatorResult};
use crate::store::DocumentStore;
use docbridge_protocol::http::status;
use docbridge_protocol::{
    decode_body, encode_body, AccountInfo, ConnectionMode, HttpRequest, HttpResponse, Request,
    Response,
};
use std::sync::Arc;
use tracing::debug;

/// Context for request handling.
pub struct HandlerContext {
    /// Emulator configuration.
    pub config: EmulatorConfig,
    /// Document store (shared across all handlers).
    pub store: Arc<DocumentStore>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: EmulatorConfig, store: Arc<DocumentStore>) -> Self {
        Self { config, store }
    }
}

/// Handler for authenticated store requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a request, turning errors into error responses.
    pub fn handle(&self, request: &HttpRequest) -> HttpResponse {
        match self.dispatch(request) {
            Ok((code, response)) => match encode_body(&response) {
                Ok(body) => HttpResponse::new(code, body),
                Err(e) => error_response(&EmulatorError::Internal(e.to_string())),
            },
            Err(e) => {
                debug!(path = %request.path, error = %e, "request failed");
                error_response(&e)
            }
        }
    }

    fn dispatch(&self, http: &HttpRequest) -> EmulatorResult<(u16, Response)> {
        let config = &self.context.config;
        if http.body.len() > config.max_request_bytes {
            return Err(EmulatorError::PayloadTooLarge(format!(
                "body is {} bytes, limit is {}",
                http.body.len(),
                config.max_request_bytes
            )));
        }

        let mode = if http.path.starts_with(ConnectionMode::Gateway.prefix()) {
            if !config.enable_gateway {
                return Err(EmulatorError::NotFound("gateway routes are disabled".into()));
            }
            ConnectionMode::Gateway
        } else {
            ConnectionMode::Direct
        };

        let request: Request = decode_body(&http.body)
            .map_err(|e| EmulatorError::InvalidRequest(e.to_string()))?;
        let (method, _) = request.route();
        if method != http.method || request.path(mode) != http.path {
            return Err(EmulatorError::NotFound(format!(
                "no {} route at {}",
                request.kind(),
                http.path
            )));
        }
        self.handle_request(request)
    }

    /// Handles a decoded request.
    pub fn handle_request(&self, request: Request) -> EmulatorResult<(u16, Response)> {
        let store = &self.context.store;
        let config = &self.context.config;
        match request {
            Request::Account => Ok((
                status::OK,
                Response::Account(AccountInfo {
                    partition_count: store.partition_count(),
                    gateway_enabled: config.enable_gateway,
                    databases: store.databases(),
                }),
            )),
            Request::EnsureContainer {
                database,
                container,
            } => {
                let created = store.ensure_container(&database, &container);
                let code = if created { status::CREATED } else { status::OK };
                Ok((code, Response::ContainerReady { created }))
            }
            Request::DeleteDatabase { database } => Ok((
                status::OK,
                Response::Deleted {
                    existed: store.delete_database(&database),
                },
            )),
            Request::Upsert {
                database,
                container,
                records,
            } => {
                if records.len() > config.max_batch_items {
                    return Err(EmulatorError::PayloadTooLarge(format!(
                        "batch holds {} records, limit is {}",
                        records.len(),
                        config.max_batch_items
                    )));
                }
                let items = store.upsert(&database, &container, records)?;
                Ok((status::OK, Response::Upserted { items }))
            }
            Request::Read {
                database,
                container,
                id,
                partition_key,
            } => {
                let record = store.read(&database, &container, &id, &partition_key)?;
                Ok((status::OK, Response::Item(record)))
            }
            Request::Query {
                database,
                container,
                predicate,
                continuation,
                max_items,
            } => {
                if max_items == 0 {
                    return Err(EmulatorError::InvalidRequest(
                        "max_items must be positive".into(),
                    ));
                }
                let limit = max_items.min(config.max_page_size) as usize;
                let page = store.query(
                    &database,
                    &container,
                    &predicate,
                    continuation.as_ref(),
                    limit,
                )?;
                Ok((
                    status::OK,
                    Response::Page {
                        records: page.records,
                        continuation: page.continuation,
                    },
                ))
            }
        }
    }
}

/// Builds an error response with an encoded error body.
pub(crate) fn error_response(error: &EmulatorError) -> HttpResponse {
    status_response(error.status(), error.code(), &error.to_string())
}

/// Builds a response with the given status and error body.
pub(crate) fn status_response(code: u16, name: &str, message: &str) -> HttpResponse {
    let body = encode_body(&docbridge_protocol::ErrorBody::new(name, message)).unwrap_or_default();
    HttpResponse::new(code, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbridge_protocol::{ErrorBody, Method, Predicate, Record};

    fn handler(config: EmulatorConfig) -> RequestHandler {
        let store = Arc::new(DocumentStore::new(config.partition_count));
        RequestHandler::new(Arc::new(HandlerContext::new(config, store)))
    }

    fn http(request: &Request, mode: ConnectionMode) -> HttpRequest {
        let (method, _) = request.route();
        HttpRequest::new(method, request.path(mode), encode_body(request).unwrap())
    }

    fn ensure() -> Request {
        Request::EnsureContainer {
            database: "Assets".into(),
            container: "assets".into(),
        }
    }

    fn upsert(records: Vec<Record>) -> Request {
        Request::Upsert {
            database: "Assets".into(),
            container: "assets".into(),
            records,
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> T {
        decode_body(&response.body).unwrap()
    }

    #[test]
    fn ensure_container_statuses() {
        let handler = handler(EmulatorConfig::default());
        let first = handler.handle(&http(&ensure(), ConnectionMode::Direct));
        assert_eq!(first.status, status::CREATED);
        let second = handler.handle(&http(&ensure(), ConnectionMode::Direct));
        assert_eq!(second.status, status::OK);
        assert_eq!(
            decode::<Response>(&second),
            Response::ContainerReady { created: false }
        );
    }

    #[test]
    fn account_probe() {
        let handler = handler(EmulatorConfig::default().with_partition_count(4));
        let response = handler.handle(&http(&Request::Account, ConnectionMode::Direct));
        match decode::<Response>(&response) {
            Response::Account(info) => {
                assert_eq!(info.partition_count, 4);
                assert!(info.gateway_enabled);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn gateway_routes() {
        let handler = handler(EmulatorConfig::default());
        let response = handler.handle(&http(&ensure(), ConnectionMode::Gateway));
        assert_eq!(response.status, status::CREATED);

        let handler = self::handler(EmulatorConfig::default().with_gateway(false));
        let response = handler.handle(&http(&ensure(), ConnectionMode::Gateway));
        assert_eq!(response.status, status::NOT_FOUND);
    }

    #[test]
    fn route_must_match_body() {
        let handler = handler(EmulatorConfig::default());
        let mut request = http(&ensure(), ConnectionMode::Direct);
        request.path = "/dbs/Other/colls/assets".into();
        assert_eq!(handler.handle(&request).status, status::NOT_FOUND);

        let mut request = http(&ensure(), ConnectionMode::Direct);
        request.method = Method::Post;
        assert_eq!(handler.handle(&request).status, status::NOT_FOUND);
    }

    #[test]
    fn garbage_body() {
        let handler = handler(EmulatorConfig::default());
        let request = HttpRequest::new(Method::Get, "/", vec![0xff, 0x01]);
        let response = handler.handle(&request);
        assert_eq!(response.status, status::BAD_REQUEST);
        assert_eq!(decode::<ErrorBody>(&response).code, "BadRequest");
    }

    #[test]
    fn upsert_limits() {
        let handler = handler(EmulatorConfig::default().with_max_batch_items(2));
        handler.handle(&http(&ensure(), ConnectionMode::Direct));
        let records = (0..3).map(|i| Record::new(i.to_string(), "p")).collect();
        let response = handler.handle(&http(&upsert(records), ConnectionMode::Direct));
        assert_eq!(response.status, status::PAYLOAD_TOO_LARGE);

        let handler = self::handler(EmulatorConfig::default().with_max_request_bytes(16));
        let records = vec![Record::new("1", "p").with_field("blob", "x".repeat(64))];
        let response = handler.handle(&http(&upsert(records), ConnectionMode::Direct));
        assert_eq!(response.status, status::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn upsert_into_missing_container() {
        let handler = handler(EmulatorConfig::default());
        let response = handler.handle(&http(
            &upsert(vec![Record::new("1", "p")]),
            ConnectionMode::Direct,
        ));
        assert_eq!(response.status, status::NOT_FOUND);
    }

    #[test]
    fn query_pages_are_clamped() {
        let handler = handler(EmulatorConfig::default().with_max_page_size(3));
        handler.handle(&http(&ensure(), ConnectionMode::Direct));
        let records = (0..7).map(|i| Record::new(i.to_string(), "p")).collect();
        handler.handle(&http(&upsert(records), ConnectionMode::Direct));

        let query = Request::Query {
            database: "Assets".into(),
            container: "assets".into(),
            predicate: Predicate::All,
            continuation: None,
            max_items: 50,
        };
        let response = handler.handle(&http(&query, ConnectionMode::Direct));
        match decode::<Response>(&response) {
            Response::Page {
                records,
                continuation,
            } => {
                assert_eq!(records.len(), 3);
                assert!(continuation.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let handler = handler(EmulatorConfig::default());
        let result = handler.handle_request(Request::Query {
            database: "Assets".into(),
            container: "assets".into(),
            predicate: Predicate::All,
            continuation: None,
            max_items: 0,
        });
        assert!(matches!(result, Err(EmulatorError::InvalidRequest(_))));
    }
}
