//! # Retry Poller
//!
//! [`RetryPoller::poll`] re-issues a read until the returned model satisfies the requested
//! [`Convergence`] conditions. Each iteration evaluates, in this order:
//!
//! 1. A transient transport failure drops the connection. The next iteration reconnects.
//! 2. A missing model, while waiting for it to be found, is retried on the same connection.
//! 3. Any other failure is returned as is.
//! 4. A model that is not enacted yet, or has no status yet, is read again when requested.
//!
//! Every retry waits [`BACKOFF`] first. Waits, connects and reads all go through the poller's
//! [`Deadline`], whose expiry or cancellation ends the loop.
use super::deadline::Deadline;
use crate::config::SessionContext;
use crate::error::Error;
use crate::grpc::channel::{CallChannel, GrpcConnector};
use crate::grpc::client::GrpcClient;
use crate::model::{FieldVisibility, ModelInstance, ModelResourceClient};
use crate::schema::{SchemaCatalog, SchemaSource};
use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Channel;

/// Wait between two iterations of the loop.
pub const BACKOFF: Duration = Duration::from_millis(100);

/// Opens connections for the poller.
pub trait Connector: Send + Sync {
    type Connection: Send;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Error>> + Send;
}

impl Connector for GrpcConnector {
    type Connection = GrpcClient<Channel>;

    async fn connect(&self) -> Result<Self::Connection, Error> {
        self.dial().await
    }
}

/// The read re-issued by the poller.
pub trait PollOperation<C>: Send {
    fn invoke(
        &mut self,
        connection: &mut C,
    ) -> impl Future<Output = Result<ModelInstance, Error>> + Send;
}

/// Conditions the returned model must satisfy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Convergence {
    /// Keep going while the model does not exist.
    pub until_found: bool,
    /// Keep going while `enacted < updated`.
    pub until_enacted: bool,
    /// Keep going while the model has no status.
    pub until_status: bool,
}

/// Progress notifications of the poller.
pub trait PollObserver: Send {
    fn on_reconnect(&mut self, _cause: &Error) {}
    fn on_not_found(&mut self) {}
    fn on_not_enacted(&mut self, _instance: &ModelInstance) {}
    fn on_no_status(&mut self, _instance: &ModelInstance) {}
}

/// Reports progress as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl PollObserver for TracingObserver {
    fn on_reconnect(&mut self, cause: &Error) {
        tracing::warn!(%cause, "transient failure, reconnecting");
    }

    fn on_not_found(&mut self) {
        tracing::debug!("model not found yet");
    }

    fn on_not_enacted(&mut self, instance: &ModelInstance) {
        tracing::debug!(id = instance.id, "model not enacted yet");
    }

    fn on_no_status(&mut self, instance: &ModelInstance) {
        tracing::debug!(id = instance.id, "model has no status yet");
    }
}

/// Writes one character per retry: `.` reconnect, `x` not found, `o` not enacted, `O` no status.
#[derive(Debug)]
pub struct ProgressMarks<W> {
    out: W,
}

impl<W: Write + Send> ProgressMarks<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn mark(&mut self, mark: &[u8]) {
        // Progress is cosmetic, a failing terminal must not fail the operation.
        let _ = self.out.write_all(mark).and_then(|_| self.out.flush());
    }
}

impl<W: Write + Send> PollObserver for ProgressMarks<W> {
    fn on_reconnect(&mut self, _cause: &Error) {
        self.mark(b".");
    }

    fn on_not_found(&mut self) {
        self.mark(b"x");
    }

    fn on_not_enacted(&mut self, _instance: &ModelInstance) {
        self.mark(b"o");
    }

    fn on_no_status(&mut self, _instance: &ModelInstance) {
        self.mark(b"O");
    }
}

pub struct RetryPoller<K: Connector, O = TracingObserver> {
    connector: K,
    connection: Option<K::Connection>,
    deadline: Deadline,
    observer: O,
}

impl<K: Connector> RetryPoller<K, TracingObserver> {
    pub fn new(connector: K, deadline: Deadline) -> Self {
        Self {
            connector,
            connection: None,
            deadline,
            observer: TracingObserver,
        }
    }
}

impl<K: Connector, O: PollObserver> RetryPoller<K, O> {
    /// Starts from an already open connection.
    pub fn with_connection(mut self, connection: K::Connection) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_observer<P: PollObserver>(self, observer: P) -> RetryPoller<K, P> {
        RetryPoller {
            connector: self.connector,
            connection: self.connection,
            deadline: self.deadline,
            observer,
        }
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn connection_mut(&mut self) -> Option<&mut K::Connection> {
        self.connection.as_mut()
    }

    /// The live connection, if any. Polling may have replaced the one it started with.
    pub fn into_connection(self) -> Option<K::Connection> {
        self.connection
    }

    /// The live connection, opened under the deadline when there is none.
    pub async fn connection(&mut self) -> Result<&mut K::Connection, Error> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => self.deadline.run(self.connector.connect()).await?,
        };
        Ok(self.connection.insert(connection))
    }

    /// Re-issues `operation` until its result satisfies `convergence`.
    ///
    /// # Returns
    ///
    /// * `Ok(instance)` - A model satisfying every requested condition.
    /// * `Err(Error::DeadlineExceeded | Error::Cancelled)` - The deadline ended the loop.
    /// * `Err(Error)` - A failure that is not retried, or a failed reconnect.
    pub async fn poll<P: PollOperation<K::Connection>>(
        &mut self,
        operation: &mut P,
        convergence: Convergence,
    ) -> Result<ModelInstance, Error> {
        let result = self.poll_loop(operation, convergence).await;
        if matches!(result, Err(Error::DeadlineExceeded | Error::Cancelled)) {
            // Don't keep a connection whose call may still be in flight.
            self.connection = None;
        }
        result
    }

    async fn poll_loop<P: PollOperation<K::Connection>>(
        &mut self,
        operation: &mut P,
        convergence: Convergence,
    ) -> Result<ModelInstance, Error> {
        loop {
            let connection = match self.connection.take() {
                Some(connection) => connection,
                None => self.deadline.run(self.connector.connect()).await?,
            };
            let connection = self.connection.insert(connection);
            let outcome = self.deadline.run(operation.invoke(connection)).await;

            match outcome {
                Err(err @ (Error::DeadlineExceeded | Error::Cancelled)) => return Err(err),
                Err(err) if err.is_transient() => {
                    self.observer.on_reconnect(&err);
                    self.connection = None;
                }
                Err(err) if convergence.until_found && err.is_not_found() => {
                    self.observer.on_not_found();
                }
                Err(err) => return Err(err),
                Ok(instance) if convergence.until_enacted && !instance.is_enacted() => {
                    self.observer.on_not_enacted(&instance);
                }
                Ok(instance) if convergence.until_status && !instance.has_status() => {
                    self.observer.on_no_status(&instance);
                }
                Ok(instance) => return Ok(instance),
            }

            self.deadline.sleep(BACKOFF).await?;
        }
    }
}

/// Reads a model by id.
pub struct GetModel<Src> {
    catalog: Arc<SchemaCatalog<Src>>,
    session: Arc<SessionContext>,
    model: String,
    id: i32,
}

impl<Src> GetModel<Src> {
    pub fn new(
        catalog: Arc<SchemaCatalog<Src>>,
        session: Arc<SessionContext>,
        model: impl Into<String>,
        id: i32,
    ) -> Self {
        Self {
            catalog,
            session,
            model: model.into(),
            id,
        }
    }
}

impl<C: CallChannel, Src: SchemaSource> PollOperation<C> for GetModel<Src> {
    async fn invoke(&mut self, connection: &mut C) -> Result<ModelInstance, Error> {
        ModelResourceClient::new(connection, self.catalog.clone(), self.session.clone())
            .get(&self.model, self.id, FieldVisibility::all())
            .await
    }
}

/// Reads the first model matching a query.
pub struct FindModel<Src> {
    catalog: Arc<SchemaCatalog<Src>>,
    session: Arc<SessionContext>,
    model: String,
    queries: BTreeMap<String, String>,
}

impl<Src> FindModel<Src> {
    pub fn new(
        catalog: Arc<SchemaCatalog<Src>>,
        session: Arc<SessionContext>,
        model: impl Into<String>,
        queries: BTreeMap<String, String>,
    ) -> Self {
        Self {
            catalog,
            session,
            model: model.into(),
            queries,
        }
    }
}

impl<C: CallChannel, Src: SchemaSource> PollOperation<C> for FindModel<Src> {
    async fn invoke(&mut self, connection: &mut C) -> Result<ModelInstance, Error> {
        ModelResourceClient::new(connection, self.catalog.clone(), self.session.clone())
            .find(&self.model, &self.queries, FieldVisibility::all())
            .await
    }
}
