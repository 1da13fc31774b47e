//! # Model Resources
//!
//! Create, read, update and delete operations over the server's models, and the instance type
//! they return.
pub mod client;
pub mod instance;

pub use client::{Created, ModelResourceClient};
pub use instance::{FieldVisibility, ModelInstance, ProjectedField};
