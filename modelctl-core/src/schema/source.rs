//! # Schema Sources
//!
//! A [`SchemaSource`] answers the three questions the catalog asks: which services exist, which
//! methods a service has, and what a fully qualified symbol describes.
//!
//! * A local [`DescriptorPool`] answers them directly. This is how a protoset file is used.
//! * [`ReflectionSource`] asks the server's reflection service, one symbol at a time, and
//!   accumulates every file it receives into its own pool.
use super::{Descriptor, SchemaError};
use crate::BoxError;
use crate::reflection::client::{EncodedFile, ReflectionClient};
use http_body::Body as HttpBody;
use prost_reflect::DescriptorPool;
use std::collections::HashSet;
use std::future::Future;
use tonic::client::GrpcService;
use tonic::transport::Channel;

pub trait SchemaSource: Send {
    /// Fully qualified names of every service.
    fn list_services(&mut self) -> impl Future<Output = Result<Vec<String>, SchemaError>> + Send;

    /// Fully qualified names (`pkg.Service.Method`) of the methods of `service`.
    fn list_methods(
        &mut self,
        service: &str,
    ) -> impl Future<Output = Result<Vec<String>, SchemaError>> + Send;

    /// Resolves a fully qualified symbol.
    fn find_symbol(
        &mut self,
        symbol: &str,
    ) -> impl Future<Output = Result<Descriptor, SchemaError>> + Send;
}

/// Looks a symbol up in a pool, without any remote resolution.
pub fn lookup(pool: &DescriptorPool, symbol: &str) -> Option<Descriptor> {
    pool.get_service_by_name(symbol)
        .map(Descriptor::ServiceDescriptor)
        .or_else(|| {
            pool.get_message_by_name(symbol)
                .map(Descriptor::MessageDescriptor)
        })
        .or_else(|| pool.get_enum_by_name(symbol).map(Descriptor::EnumDescriptor))
}

fn method_names(service: &Descriptor) -> Result<Vec<String>, SchemaError> {
    let service = service
        .service_descriptor()
        .ok_or_else(|| SchemaError::UnexpectedDescriptor {
            name: service.full_name().to_string(),
            expected: "service",
        })?;

    Ok(service
        .methods()
        .map(|m| m.full_name().to_string())
        .collect())
}

impl SchemaSource for DescriptorPool {
    async fn list_services(&mut self) -> Result<Vec<String>, SchemaError> {
        Ok(self.services().map(|s| s.full_name().to_string()).collect())
    }

    async fn list_methods(&mut self, service: &str) -> Result<Vec<String>, SchemaError> {
        let descriptor = self.find_symbol(service).await?;
        method_names(&descriptor)
    }

    async fn find_symbol(&mut self, symbol: &str) -> Result<Descriptor, SchemaError> {
        lookup(self, symbol).ok_or_else(|| SchemaError::SymbolNotFound(symbol.to_string()))
    }
}

/// A schema source backed by the server's reflection service.
#[derive(Debug, Clone)]
pub struct ReflectionSource<S = Channel> {
    client: ReflectionClient<S>,
    pool: DescriptorPool,
}

impl<S> ReflectionSource<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self {
            client: ReflectionClient::new(service),
            pool: DescriptorPool::new(),
        }
    }

    /// The files resolved so far.
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    async fn resolve(&mut self, symbol: &str) -> Result<Descriptor, SchemaError> {
        if let Some(descriptor) = lookup(&self.pool, symbol) {
            return Ok(descriptor);
        }

        let known: HashSet<String> = self.pool.files().map(|f| f.name().to_string()).collect();

        let files = self
            .client
            .files_by_symbol(symbol, &known)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    SchemaError::SymbolNotFound(symbol.to_string())
                } else {
                    SchemaError::Unavailable(err)
                }
            })?;

        self.pool
            .decode_file_descriptor_set(encode_file_set(&files).as_slice())?;

        lookup(&self.pool, symbol).ok_or_else(|| SchemaError::SymbolNotFound(symbol.to_string()))
    }
}

/// Wraps encoded files into an encoded `FileDescriptorSet`, keeping their options intact.
fn encode_file_set(files: &[EncodedFile]) -> Vec<u8> {
    let mut buf = Vec::new();
    for file in files {
        prost::encoding::bytes::encode(1, &file.bytes, &mut buf);
    }
    buf
}

impl<S> SchemaSource for ReflectionSource<S>
where
    S: GrpcService<tonic::body::Body> + Send,
    S::Error: Into<BoxError>,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn list_services(&mut self) -> Result<Vec<String>, SchemaError> {
        Ok(self.client.list_services().await?)
    }

    async fn list_methods(&mut self, service: &str) -> Result<Vec<String>, SchemaError> {
        let descriptor = self.resolve(service).await?;
        method_names(&descriptor)
    }

    async fn find_symbol(&mut self, symbol: &str) -> Result<Descriptor, SchemaError> {
        self.resolve(symbol).await
    }
}

/// Builds a pool from an encoded `FileDescriptorSet`, e.g. the content of a protoset file.
pub fn pool_from_protoset(bytes: &[u8]) -> Result<DescriptorPool, SchemaError> {
    Ok(DescriptorPool::decode(bytes)?)
}
