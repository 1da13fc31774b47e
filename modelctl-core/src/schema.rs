//! # Schema Resolution
//!
//! Everything the client knows about the server's models is discovered at runtime. This module
//! turns a raw schema source (a local descriptor set, or the server's reflection service) into
//! resolved [`ModelType`]s whose fields carry an explicit [`FieldKind`].
//!
//! * [`source`]: the [`SchemaSource`] trait and its two implementations.
//! * [`catalog`]: the [`SchemaCatalog`], a shared read-through cache over a source.
//! * [`types`]: descriptors, field kinds and visibility classifiers.
pub mod catalog;
pub mod source;
pub mod types;

pub use catalog::SchemaCatalog;
pub use source::{ReflectionSource, SchemaSource};
pub use types::*;

use crate::reflection::client::ReflectionResolveError;
use prost_reflect::DescriptorError;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Schema source unavailable: {0}")]
    Unavailable(#[from] ReflectionResolveError),

    #[error("Failed to build descriptor pool: '{0}'")]
    Descriptor(#[from] DescriptorError),

    #[error(
        "Model {0} does not exist. Use `models available` to get a list of available models"
    )]
    UnknownModelType(String),

    #[error("Field {field} does not exist in model {model}")]
    FieldNotFound { model: String, field: String },

    #[error("Symbol '{0}' not found")]
    SymbolNotFound(String),

    #[error("'{name}' is not a {expected}")]
    UnexpectedDescriptor { name: String, expected: &'static str },

    #[error("Method '{method}' not found in service '{service}'")]
    MethodNotFound { service: String, method: String },
}

impl SchemaError {
    /// Mistakes in the names the user typed, as opposed to a broken schema or source.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            SchemaError::UnknownModelType(_) | SchemaError::FieldNotFound { .. }
        )
    }
}
