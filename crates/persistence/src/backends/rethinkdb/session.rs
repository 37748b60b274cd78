//! Multiplexed RethinkDB session.
//!
//! One TCP connection carries any number of concurrent queries. A writer
//! task owns the write half and sends frames in the order they were queued;
//! a reader task owns the read half and routes each response to the query
//! that holds its token. Responses for unknown tokens are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::backend::BACKEND_NAME;
use super::protocol::{self, Response, query_type};
use super::term::Term;
use crate::error::{BackendError, StorageError, StorageResult};

type Routes = Mutex<HashMap<u64, mpsc::UnboundedSender<Response>>>;

struct Shared {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    routes: Routes,
    next_token: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn send(&self, token: u64, query: &Value) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(connection_lost());
        }
        self.outgoing
            .send(protocol::encode_query(token, query))
            .map_err(|_| connection_lost())
    }

    fn shut_down(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the senders ends every pending query.
        self.routes.lock().clear();
    }
}

fn connection_lost() -> StorageError {
    BackendError::Unavailable {
        backend_name: BACKEND_NAME.to_string(),
        message: "connection closed".to_string(),
    }
    .into()
}

/// An authenticated connection shared by all queries.
pub struct RethinkSession {
    shared: Arc<Shared>,
    server_version: String,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl std::fmt::Debug for RethinkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RethinkSession")
            .field("server_version", &self.server_version)
            .field("closed", &self.is_closed())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl RethinkSession {
    /// Authenticates over `stream` and starts the I/O tasks.
    pub(crate) async fn open<S>(mut stream: S, user: &str, password: &str) -> Result<Self, BackendError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let server_version = protocol::handshake(&mut stream, user, password).await?;
        let (read_half, write_half) = tokio::io::split(stream);
        let (outgoing, frames) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            outgoing,
            routes: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let reader = tokio::spawn(read_loop(read_half, shared.clone()));
        let writer = tokio::spawn(write_loop(write_half, frames, shared.clone()));

        Ok(Self {
            shared,
            server_version,
            reader,
            writer,
        })
    }

    /// Version reported by the server during the handshake.
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Returns `true` once the connection is gone.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of queries waiting for responses.
    pub fn in_flight(&self) -> usize {
        self.shared.routes.lock().len()
    }

    /// Starts `term` and returns the open query.
    pub(crate) fn start(&self, term: Term) -> StorageResult<Query> {
        let token = self.shared.next_token.fetch_add(1, Ordering::Relaxed);
        let (route, responses) = mpsc::unbounded_channel();
        self.shared.routes.lock().insert(token, route);

        let query = Query {
            shared: self.shared.clone(),
            token,
            responses,
            state: QueryState::Waiting,
        };
        self.shared
            .send(token, &protocol::start_query(&term.into_value()))?;
        Ok(query)
    }

    /// Runs `term` to completion.
    ///
    /// An atom is returned as it is; a sequence is collected into an array.
    pub(crate) async fn run(&self, term: Term) -> StorageResult<Value> {
        let mut query = self.start(term)?;
        let first = query.next_response().await?;
        if first.kind == protocol::response_type::SUCCESS_ATOM {
            return Ok(first.results.into_iter().next().unwrap_or(Value::Null));
        }

        let mut items = first.results;
        while query.has_more() {
            items.extend(query.next_response().await?.results);
        }
        Ok(Value::Array(items))
    }
}

impl Drop for RethinkSession {
    fn drop(&mut self) {
        self.shared.shut_down();
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match protocol::read_response(&mut reader).await {
            Ok((token, response)) => {
                let route = shared.routes.lock().get(&token).cloned();
                match route {
                    Some(route) => {
                        let _ = route.send(response);
                    }
                    None => {
                        tracing::debug!(backend = BACKEND_NAME, token, "Dropped response for closed query");
                    }
                }
            }
            Err(err) => {
                if !shared.closed.load(Ordering::Acquire) {
                    tracing::warn!(backend = BACKEND_NAME, error = %err, "Connection lost");
                }
                break;
            }
        }
    }
    shared.shut_down();
}

async fn write_loop<W>(mut writer: W, mut frames: mpsc::UnboundedReceiver<Vec<u8>>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(err) = writer.write_all(&frame).await {
            tracing::warn!(backend = BACKEND_NAME, error = %err, "Failed to send query");
            break;
        }
    }
    shared.shut_down();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryState {
    /// A START or CONTINUE is in flight.
    Waiting,
    /// The last batch was partial; more follow after a CONTINUE.
    Partial,
    Done,
}

/// An open query and its stream of responses.
///
/// Dropping a query that still has results pending sends STOP.
pub(crate) struct Query {
    shared: Arc<Shared>,
    token: u64,
    responses: mpsc::UnboundedReceiver<Response>,
    state: QueryState,
}

impl Query {
    /// Returns `true` until the server has sent the final batch.
    pub(crate) fn has_more(&self) -> bool {
        self.state != QueryState::Done
    }

    /// Waits for the next batch, asking for it first when the previous one
    /// was partial.
    ///
    /// Cancel-safe: dropping the future leaves the query ready to wait again.
    pub(crate) async fn next_response(&mut self) -> StorageResult<Response> {
        match self.state {
            QueryState::Done => {
                return Err(BackendError::QueryError {
                    message: "query has no more results".to_string(),
                }
                .into());
            }
            QueryState::Partial => {
                self.shared.send(self.token, &json!([query_type::CONTINUE]))?;
                self.state = QueryState::Waiting;
            }
            QueryState::Waiting => {}
        }

        let response = self.responses.recv().await.ok_or_else(connection_lost)?;
        self.state = if response.is_partial() {
            QueryState::Partial
        } else {
            QueryState::Done
        };
        response.into_result()
    }

    /// Asks the server to stop sending results.
    pub(crate) fn stop(&mut self) {
        if self.state != QueryState::Done {
            let _ = self.shared.send(self.token, &json!([query_type::STOP]));
            self.state = QueryState::Done;
        }
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.stop();
        self.shared.routes.lock().remove(&self.token);
    }
}
