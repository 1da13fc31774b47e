//! # Generic gRPC Transport
//!
//! This module contains the low-level building blocks for performing gRPC calls using
//! dynamic message types.
//!
//! Unlike standard `tonic` clients which are strongly typed (e.g., `HelloRequest`),
//! the components here work with `prost_reflect::DynamicMessage` values whose shape is
//! only known at runtime, from the descriptors discovered through reflection.
pub mod channel;
pub mod client;
pub mod codec;
