//! # Schema Catalog
//!
//! The [`SchemaCatalog`] resolves model types and their fields through a [`SchemaSource`] and
//! keeps what it resolved. Resolved entries are never modified, so the catalog can be shared by
//! concurrent operations through an `Arc`; only the first resolution of an entry takes the
//! source lock.
use super::{FieldSchema, ModelType, SchemaError, SchemaSource};
use crate::config::ServiceLayout;
use prost_reflect::MethodDescriptor;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Prefix of the model service methods that name every model type.
const GET_PREFIX: &str = "Get";

pub struct SchemaCatalog<Src> {
    source: Mutex<Src>,
    layout: ServiceLayout,
    model_names: RwLock<Option<Arc<BTreeSet<String>>>>,
    model_types: RwLock<HashMap<String, Arc<ModelType>>>,
}

impl<Src: SchemaSource> SchemaCatalog<Src> {
    pub fn new(source: Src, layout: ServiceLayout) -> Self {
        Self {
            source: Mutex::new(source),
            layout,
            model_names: RwLock::new(None),
            model_types: RwLock::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &ServiceLayout {
        &self.layout
    }

    /// Names of all model types, i.e. every `Get<T>` method of the model service.
    ///
    /// # Returns
    ///
    /// * `Ok(names)` - The sorted set of model names.
    /// * `Err(SchemaError)` - If the source could not be reached or the model service is missing.
    pub async fn list_resource_types(&self) -> Result<Arc<BTreeSet<String>>, SchemaError> {
        if let Some(names) = self.model_names.read().await.as_ref() {
            return Ok(names.clone());
        }

        let methods = self
            .source
            .lock()
            .await
            .list_methods(&self.layout.model_service)
            .await?;

        let prefix = format!("{}.{GET_PREFIX}", self.layout.model_service);
        let names: BTreeSet<String> = methods
            .iter()
            .filter_map(|m| m.strip_prefix(&prefix))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        tracing::debug!(count = names.len(), "resolved model types");

        let names = Arc::new(names);
        *self.model_names.write().await = Some(names.clone());
        Ok(names)
    }

    /// Checks that `name` is a known model type.
    pub async fn validate_resource_type(&self, name: &str) -> Result<(), SchemaError> {
        if self.list_resource_types().await?.contains(name) {
            Ok(())
        } else {
            Err(SchemaError::UnknownModelType(name.to_string()))
        }
    }

    /// Resolves a model type and all of its fields.
    pub async fn model_type(&self, name: &str) -> Result<Arc<ModelType>, SchemaError> {
        if let Some(model) = self.model_types.read().await.get(name) {
            return Ok(model.clone());
        }

        self.validate_resource_type(name).await?;

        let full_name = self.layout.model_message(name);
        let descriptor = self.source.lock().await.find_symbol(&full_name).await?;
        let message = descriptor
            .message_descriptor()
            .cloned()
            .ok_or_else(|| SchemaError::UnexpectedDescriptor {
                name: full_name,
                expected: "message",
            })?;

        let model = Arc::new(ModelType::new(name, message));
        self.model_types
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| model.clone());

        Ok(model)
    }

    /// Resolves a field of a model type.
    pub async fn resolve_field(
        &self,
        model: &str,
        field: &str,
    ) -> Result<FieldSchema, SchemaError> {
        let model_type = self.model_type(model).await?;
        model_type
            .field(field)
            .cloned()
            .ok_or_else(|| SchemaError::FieldNotFound {
                model: model.to_string(),
                field: field.to_string(),
            })
    }

    /// Resolves a method of a service, e.g. `("xos.xos", "GetSlice")`.
    pub async fn method(
        &self,
        service: &str,
        method: &str,
    ) -> Result<MethodDescriptor, SchemaError> {
        let descriptor = self.source.lock().await.find_symbol(service).await?;
        let service_descriptor =
            descriptor
                .service_descriptor()
                .ok_or_else(|| SchemaError::UnexpectedDescriptor {
                    name: service.to_string(),
                    expected: "service",
                })?;

        service_descriptor
            .methods()
            .find(|m| m.name() == method)
            .ok_or_else(|| SchemaError::MethodNotFound {
                service: service.to_string(),
                method: method.to_string(),
            })
    }

    /// Resolves the `<verb><Model>` method of the model service.
    pub async fn model_method(
        &self,
        verb: &str,
        model: &str,
    ) -> Result<MethodDescriptor, SchemaError> {
        self.method(&self.layout.model_service, &format!("{verb}{model}"))
            .await
    }

    /// Fully qualified names of every service the source knows about.
    pub async fn list_services(&self) -> Result<Vec<String>, SchemaError> {
        let mut services = self.source.lock().await.list_services().await?;
        services.sort();
        Ok(services)
    }
}
