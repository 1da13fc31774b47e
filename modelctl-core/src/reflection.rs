//! # Server Reflection
//!
//! This module contains the logic necessary to interact with the gRPC Server Reflection Protocol.
//!
//! It enables the client to query a server for its own Protobuf schema at runtime, so that model
//! types, their fields and the service methods can be discovered without pre-compiled descriptors.
pub mod client;
