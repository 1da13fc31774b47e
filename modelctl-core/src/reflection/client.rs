//! # Reflection Client
//!
//! A client implementation for `grpc.reflection.v1`.
//!
//! The client resolves a symbol into the files that define it. It inspects the imports of every
//! file it receives and keeps requesting the missing ones until the whole dependency tree is
//! known. Files the caller already holds are never requested again, which lets a schema be
//! discovered one symbol at a time.
//!
//! Files are returned in their encoded form. Decoding them through `prost-types` would drop the
//! custom field options the model schema relies on, so that is left to `prost-reflect`.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use crate::BoxError;
use futures_util::stream::once;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::FileDescriptorProto;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Streaming, client::GrpcService};
use tonic_reflection::pb::v1::{
    ServerReflectionRequest, ServerReflectionResponse,
    server_reflection_client::ServerReflectionClient, server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum ReflectionResolveError {
    #[error(
        "Failed to start a stream request with the reflection server, reflection might not be supported: '{0}'"
    )]
    ServerStreamInitFailed(#[source] tonic::Status),

    #[error("The server stream returned an error status: '{0}'")]
    ServerStreamFailure(#[source] tonic::Status),

    #[error("Reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("Internal error: Failed to send request to stream")]
    SendFailed,

    #[error("Server returned reflection error code {code}: {message}")]
    ServerError { code: i32, message: String },

    #[error("Protocol error: Received unexpected response type: {0}")]
    UnexpectedResponseType(String),

    #[error("Failed to decode FileDescriptorProto: {0}")]
    DecodeError(#[from] prost::DecodeError),
}

impl ReflectionResolveError {
    /// Whether the server reported that the requested symbol does not exist.
    pub fn is_not_found(&self) -> bool {
        const NOT_FOUND: i32 = tonic::Code::NotFound as i32;
        match self {
            ReflectionResolveError::ServerStreamFailure(status) => {
                status.code() == tonic::Code::NotFound
            }
            ReflectionResolveError::ServerError { code, .. } => *code == NOT_FOUND,
            _ => false,
        }
    }
}

// The host is not a mandatory field of the reflection requests.
const EMPTY_HOST: &str = "";

/// A file received from the reflection service, still in its encoded form.
#[derive(Debug, Clone)]
pub struct EncodedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// A client for the gRPC Server Reflection Protocol.
#[derive(Debug, Clone)]
pub struct ReflectionClient<T = Channel> {
    client: ServerReflectionClient<T>,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(channel: S) -> Self {
        let client = ServerReflectionClient::new(channel);
        Self { client }
    }

    /// Asks the reflection service for the file containing `symbol` (e.g. `xos.Slice`) and for
    /// all of its transitive imports.
    ///
    /// Files whose names are in `known` are neither requested nor returned.
    ///
    /// # Returns
    ///
    /// * `Ok(files)` - The newly discovered files, in the order they were received.
    /// * `Err(ReflectionResolveError)` - Failed to request file descriptors from the server.
    pub async fn files_by_symbol(
        &mut self,
        symbol: &str,
        known: &HashSet<String>,
    ) -> Result<Vec<EncodedFile>, ReflectionResolveError> {
        let (tx, rx) = mpsc::channel(100);

        let mut response_stream = self
            .client
            .server_reflection_info(ReceiverStream::new(rx))
            .await
            .map_err(ReflectionResolveError::ServerStreamInitFailed)?
            .into_inner();

        let req = ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(MessageRequest::FileContainingSymbol(symbol.to_string())),
        };

        tx.send(req)
            .await
            .map_err(|_| ReflectionResolveError::SendFailed)?;

        let mut resolution = Resolution {
            known: known.clone(),
            requested: HashSet::new(),
            files: Vec::new(),
            tx,
        };
        resolution.run(&mut response_stream).await?;

        tracing::debug!(symbol, files = resolution.files.len(), "resolved symbol");
        Ok(resolution.files)
    }

    /// Lists all services exposed by the server.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionResolveError> {
        let req = ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(MessageRequest::ListServices(String::new())),
        };

        let mut response_stream = self
            .client
            .server_reflection_info(once(async { req }))
            .await
            .map_err(ReflectionResolveError::ServerStreamInitFailed)?
            .into_inner();

        let response = response_stream
            .message()
            .await
            .map_err(ReflectionResolveError::ServerStreamFailure)?
            .ok_or(ReflectionResolveError::StreamClosed)?;

        match response.message_response {
            Some(MessageResponse::ListServicesResponse(resp)) => {
                Ok(resp.service.into_iter().map(|s| s.name).collect())
            }
            other => Err(unexpected_response(other)),
        }
    }
}

/// State of one dependency walk over an open reflection stream.
struct Resolution {
    /// Files held by the caller.
    known: HashSet<String>,
    /// Files asked for by name on this stream.
    requested: HashSet<String>,
    files: Vec<EncodedFile>,
    tx: mpsc::Sender<ServerReflectionRequest>,
}

impl Resolution {
    async fn run(
        &mut self,
        response_stream: &mut Streaming<ServerReflectionResponse>,
    ) -> Result<(), ReflectionResolveError> {
        let mut inflight = 1;

        while inflight > 0 {
            let response = response_stream
                .message()
                .await
                .map_err(ReflectionResolveError::ServerStreamFailure)?
                .ok_or(ReflectionResolveError::StreamClosed)?;

            inflight -= 1;

            match response.message_response {
                Some(MessageResponse::FileDescriptorResponse(res)) => {
                    for raw in res.file_descriptor_proto {
                        inflight += self.accept(raw).await?;
                    }
                }
                other => return Err(unexpected_response(other)),
            }
        }

        Ok(())
    }

    fn has(&self, name: &str) -> bool {
        self.known.contains(name) || self.files.iter().any(|f| f.name == name)
    }

    /// Records a received file and requests its missing imports.
    /// Returns the number of requests sent.
    async fn accept(&mut self, raw: Vec<u8>) -> Result<usize, ReflectionResolveError> {
        let fd = FileDescriptorProto::decode(raw.as_slice())?;
        let name = fd.name.clone().unwrap_or_default();

        if self.has(&name) {
            return Ok(0);
        }
        self.files.push(EncodedFile { name, bytes: raw });

        let mut sent = 0;
        for dep in &fd.dependency {
            if !self.has(dep) && self.requested.insert(dep.clone()) {
                let req = ServerReflectionRequest {
                    host: EMPTY_HOST.to_string(),
                    message_request: Some(MessageRequest::FileByFilename(dep.clone())),
                };
                self.tx
                    .send(req)
                    .await
                    .map_err(|_| ReflectionResolveError::SendFailed)?;
                sent += 1;
            }
        }

        Ok(sent)
    }
}

fn unexpected_response(response: Option<MessageResponse>) -> ReflectionResolveError {
    match response {
        Some(MessageResponse::ErrorResponse(e)) => ReflectionResolveError::ServerError {
            code: e.error_code,
            message: e.error_message,
        },
        Some(other) => ReflectionResolveError::UnexpectedResponseType(format!("{other:?}")),
        None => ReflectionResolveError::UnexpectedResponseType("Empty Message".into()),
    }
}
