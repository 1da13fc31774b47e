//! # Modelctl Core
//!
//! `modelctl-core` is the runtime of a command line client for model-driven servers. The server
//! describes its data model entirely through gRPC reflection: every model type is a protobuf
//! message, and every operation on it is a method of a single model service. This crate
//! discovers that schema at runtime and performs typed operations on models without any
//! compile-time knowledge of it.
//!
//! ## Key Components
//!
//! * **[`schema::SchemaCatalog`]:** Discovers and caches the model types, their fields and the
//!   methods that serve them, from server reflection or from a descriptor set file.
//! * **[`model::ModelResourceClient`]:** Create, get, list, filter, update and delete models,
//!   from textual field values and query strings.
//! * **[`retry::RetryPoller`]:** Waits for the server to converge after a change, reconnecting
//!   on transient failures, under a deadline.
//! * **[`transfer::ChunkedTransfer`]:** Streams files to and from the server with SHA-256
//!   integrity checks, and [`backup::BackupWorkflow`] builds backup and restore on top of it.
//!
//! ## Internal clients
//!
//! The building blocks are public as well:
//!
//! * **[`grpc::client::GrpcClient`]:** A dynamic gRPC client exchanging `DynamicMessage`s.
//! * **[`reflection::client::ReflectionClient`]:** A gRPC Reflection client, only offering the
//!   functionality that we need internally.
//! * **[`bridge`]:** Adapts sources of request messages and sinks of responses to the three
//!   call shapes used here.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod backup;
pub mod bridge;
pub mod coerce;
pub mod config;
pub mod error;
pub mod grpc;
pub mod model;
pub mod prompt;
pub mod query;
pub mod reflection;
pub mod retry;
pub mod schema;
pub mod transfer;
pub mod utility;

#[cfg(test)]
mod test_support;

pub use error::{Error, ErrorCategory};

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
