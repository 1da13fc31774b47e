//! # Call Channel
//!
//! [`CallChannel`] is the seam between the components of this crate and the wire. Everything
//! above it speaks in `DynamicMessage`s and method descriptors; [`GrpcClient`] implements it
//! over a real `tonic` channel, and tests implement it over an in-memory service.
use super::client::{CallOptions, GrpcClient, GrpcRequestError};
use crate::error::Error;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::future::Future;
use tonic::transport::{Channel, Endpoint};

/// Messages streamed by the server.
pub type ResponseStream = BoxStream<'static, Result<DynamicMessage, tonic::Status>>;

/// Messages streamed by the client.
pub type RequestStream = BoxStream<'static, DynamicMessage>;

/// Outcome of a call: the outer error is client side, the inner one is the server's status.
pub type CallResult<T> = Result<Result<T, tonic::Status>, GrpcRequestError>;

pub trait CallChannel: Send {
    fn unary(
        &mut self,
        method: MethodDescriptor,
        request: DynamicMessage,
        options: CallOptions,
    ) -> impl Future<Output = CallResult<DynamicMessage>> + Send;

    fn server_streaming(
        &mut self,
        method: MethodDescriptor,
        request: DynamicMessage,
        options: CallOptions,
    ) -> impl Future<Output = CallResult<ResponseStream>> + Send;

    fn client_streaming(
        &mut self,
        method: MethodDescriptor,
        requests: RequestStream,
        options: CallOptions,
    ) -> impl Future<Output = CallResult<DynamicMessage>> + Send;
}

impl<C: CallChannel> CallChannel for &mut C {
    fn unary(
        &mut self,
        method: MethodDescriptor,
        request: DynamicMessage,
        options: CallOptions,
    ) -> impl Future<Output = CallResult<DynamicMessage>> + Send {
        (**self).unary(method, request, options)
    }

    fn server_streaming(
        &mut self,
        method: MethodDescriptor,
        request: DynamicMessage,
        options: CallOptions,
    ) -> impl Future<Output = CallResult<ResponseStream>> + Send {
        (**self).server_streaming(method, request, options)
    }

    fn client_streaming(
        &mut self,
        method: MethodDescriptor,
        requests: RequestStream,
        options: CallOptions,
    ) -> impl Future<Output = CallResult<DynamicMessage>> + Send {
        (**self).client_streaming(method, requests, options)
    }
}

impl CallChannel for GrpcClient<Channel> {
    async fn unary(
        &mut self,
        method: MethodDescriptor,
        request: DynamicMessage,
        options: CallOptions,
    ) -> CallResult<DynamicMessage> {
        GrpcClient::unary(self, method, request, options).await
    }

    async fn server_streaming(
        &mut self,
        method: MethodDescriptor,
        request: DynamicMessage,
        options: CallOptions,
    ) -> CallResult<ResponseStream> {
        let result = GrpcClient::server_streaming(self, method, request, options).await?;
        Ok(result.map(|stream| stream.boxed()))
    }

    async fn client_streaming(
        &mut self,
        method: MethodDescriptor,
        requests: RequestStream,
        options: CallOptions,
    ) -> CallResult<DynamicMessage> {
        GrpcClient::client_streaming(self, method, requests, options).await
    }
}

/// Dials a server and hands out fresh [`GrpcClient`]s.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    addr: String,
}

impl GrpcConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Opens a new connection.
    ///
    /// # Returns
    ///
    /// * `Ok(GrpcClient)` - The connected client.
    /// * `Err(Error::Connect)` - If the URL is invalid or the connection cannot be established.
    pub async fn dial(&self) -> Result<GrpcClient<Channel>, Error> {
        let endpoint = Endpoint::new(self.addr.clone())
            .map_err(|e| Error::Connect(self.addr.clone(), e))?;

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Error::Connect(self.addr.clone(), e))?;

        tracing::debug!(addr = %self.addr, "connected");
        Ok(GrpcClient::new(channel))
    }
}
