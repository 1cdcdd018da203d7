//! Streaming queries.
//!
//! A query is pulled page by page: the stream holds at most the page being
//! consumed plus, with prefetch enabled, one page requested ahead of time.
//! Records come out in the order the store returned them.

use crate::cancel::CancellationToken;
use crate::drain::DrainGate;
use crate::error::{ClientError, ClientResult};
use crate::session::Session;
use crate::transport::Transport;
use docbridge_protocol::{ContinuationToken, Predicate, Record, Request, Response};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::sync::mpsc;
use tracing::debug;

type Page = (Vec<Record>, Option<ContinuationToken>);

/// Position of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCursor {
    /// Filter being evaluated.
    pub predicate: Predicate,
    /// Position of the next page; `None` before the first page or at the end.
    pub continuation: Option<ContinuationToken>,
    /// True once the store reported no further pages.
    pub exhausted: bool,
}

struct PageSource<T: Transport> {
    session: Session<T>,
    database: String,
    container: String,
    page_size: u32,
}

impl<T: Transport> Clone for PageSource<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            database: self.database.clone(),
            container: self.container.clone(),
            page_size: self.page_size,
        }
    }
}

impl<T: Transport> PageSource<T> {
    fn fetch(
        &self,
        predicate: &Predicate,
        continuation: Option<ContinuationToken>,
        cancel: &CancellationToken,
    ) -> ClientResult<Page> {
        let request = Request::Query {
            database: self.database.clone(),
            container: self.container.clone(),
            predicate: predicate.clone(),
            continuation,
            max_items: self.page_size,
        };
        match self.session.submit_with(&request, cancel)?.response {
            Response::Page {
                records,
                continuation,
            } => Ok((records, continuation)),
            other => Err(ClientError::UnexpectedResponse {
                expected: "page",
                actual: other.kind(),
            }),
        }
    }
}

/// Runs queries and point reads through a session.
pub struct QueryExecutor<T: Transport> {
    source: PageSource<T>,
    prefetch: bool,
    gate: DrainGate,
}

impl<T: Transport + 'static> QueryExecutor<T> {
    /// Creates an executor with 100-record pages and no prefetch.
    pub fn new(session: Session<T>, database: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            source: PageSource {
                session,
                database: database.into(),
                container: container.into(),
                page_size: 100,
            },
            prefetch: false,
            gate: DrainGate::new(),
        }
    }

    /// Sets the records requested per page.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.source.page_size = page_size.max(1);
        self
    }

    /// Requests the next page as soon as the current one arrives.
    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Refuses new queries once `gate` closes.
    pub fn with_gate(mut self, gate: DrainGate) -> Self {
        self.gate = gate;
        self
    }

    /// Starts a query. Nothing is fetched until the stream is pulled.
    pub fn query(&self, predicate: Predicate) -> ClientResult<QueryStream<T>> {
        if !self.gate.is_open() {
            return Err(ClientError::ShuttingDown);
        }
        Ok(QueryStream {
            source: self.source.clone(),
            cursor: QueryCursor {
                predicate,
                continuation: None,
                exhausted: false,
            },
            buffer: VecDeque::new(),
            outstanding: None,
            prefetch: self.prefetch,
            cancel: CancellationToken::new(),
            pages: 0,
            done: false,
        })
    }

    /// Starts a query whose records are converted to `D`.
    pub fn query_as<D: DeserializeOwned>(
        &self,
        predicate: Predicate,
    ) -> ClientResult<impl Iterator<Item = ClientResult<D>>> {
        Ok(self
            .query(predicate)?
            .map(|record| record.and_then(|r| r.to_document().map_err(ClientError::from))))
    }

    /// Drains a query into memory.
    pub fn collect_all(&self, predicate: Predicate) -> ClientResult<Vec<Record>> {
        self.query(predicate)?.collect()
    }

    /// Counts the records matching `predicate`.
    pub fn count(&self, predicate: Predicate) -> ClientResult<usize> {
        let mut count = 0;
        for record in self.query(predicate)? {
            record?;
            count += 1;
        }
        Ok(count)
    }

    /// Reads one record by identity.
    pub fn read(&self, id: &str, partition_key: &str) -> ClientResult<Option<Record>> {
        if !self.gate.is_open() {
            return Err(ClientError::ShuttingDown);
        }
        let request = Request::Read {
            database: self.source.database.clone(),
            container: self.source.container.clone(),
            id: id.to_string(),
            partition_key: partition_key.to_string(),
        };
        match self.source.session.submit(&request)?.response {
            Response::Item(record) => Ok(record),
            other => Err(ClientError::UnexpectedResponse {
                expected: "item",
                actual: other.kind(),
            }),
        }
    }
}

/// A lazy, forward-only sequence of query results.
///
/// After the last record, or after an error, the stream yields `None`
/// forever. Dropping it cancels any page request still running.
pub struct QueryStream<T: Transport> {
    source: PageSource<T>,
    cursor: QueryCursor,
    buffer: VecDeque<Record>,
    outstanding: Option<mpsc::Receiver<ClientResult<Page>>>,
    prefetch: bool,
    cancel: CancellationToken,
    pages: usize,
    done: bool,
}

impl<T: Transport + 'static> QueryStream<T> {
    /// Current position.
    pub fn cursor(&self) -> &QueryCursor {
        &self.cursor
    }

    /// Pages received so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Records received but not yet yielded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true while a page request runs in the background.
    pub fn has_outstanding_page(&self) -> bool {
        self.outstanding.is_some()
    }

    fn start_prefetch(&mut self) {
        let (tx, rx) = mpsc::channel();
        let source = self.source.clone();
        let predicate = self.cursor.predicate.clone();
        let continuation = self.cursor.continuation.clone();
        let cancel = self.cancel.clone();
        std::thread::spawn(move || {
            let _ = tx.send(source.fetch(&predicate, continuation, &cancel));
        });
        self.outstanding = Some(rx);
    }

    fn next_page(&mut self) -> ClientResult<Page> {
        match self.outstanding.take() {
            Some(rx) => rx.recv().unwrap_or_else(|_| {
                Err(ClientError::Document("prefetch worker stopped".into()))
            }),
            None => self.source.fetch(
                &self.cursor.predicate,
                self.cursor.continuation.clone(),
                &self.cancel,
            ),
        }
    }
}

impl<T: Transport + 'static> Iterator for QueryStream<T> {
    type Item = ClientResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            if self.cursor.exhausted {
                self.done = true;
                return None;
            }

            match self.next_page() {
                Ok((records, continuation)) => {
                    self.pages += 1;
                    debug!(
                        page = self.pages,
                        records = records.len(),
                        more = continuation.is_some(),
                        "received query page"
                    );
                    self.cursor.exhausted = continuation.is_none();
                    self.cursor.continuation = continuation;
                    self.buffer.extend(records);
                    if self.prefetch && !self.cursor.exhausted {
                        self.start_prefetch();
                    }
                }
                Err(e) => {
                    self.done = true;
                    self.buffer.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<T: Transport + 'static> FusedIterator for QueryStream<T> {}

impl<T: Transport> Drop for QueryStream<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
