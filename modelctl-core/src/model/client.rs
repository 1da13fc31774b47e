//! # Model Resource Client
//!
//! [`ModelResourceClient`] implements the model operations on top of the schema catalog, value
//! coercion and the RPC event bridge. Every model type `T` is served by the `Get<T>`,
//! `List<T>`, `Filter<T>`, `Create<T>`, `Update<T>` and `Delete<T>` methods of the model
//! service.
//!
//! Server failures are classified with the model, id or query they concern before they are
//! returned. Nothing is retried here; that is the job of [`crate::retry::RetryPoller`].
use super::instance::{FieldVisibility, ModelInstance};
use crate::bridge::{self, Assignments, FieldParameters, RAW_JSON_FIELD, RpcEventBridge};
use crate::coerce::{PredicateError, build_predicate, coerce_value};
use crate::config::SessionContext;
use crate::error::{Error, ObjectRef};
use crate::grpc::channel::CallChannel;
use crate::grpc::client::CallOptions;
use crate::prompt::Confirm;
use crate::query::{FieldPredicate, FilterValue, parse_query_set};
use crate::schema::{ModelType, SchemaCatalog, SchemaError, SchemaSource};
use crate::transfer::ChunkedTransfer;
use prost_reflect::{DynamicMessage, Kind, MessageDescriptor, ReflectMessage, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifiers of a newly created model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: i32,
    pub uuid: Option<String>,
}

pub struct ModelResourceClient<Ch, Src> {
    channel: Ch,
    catalog: Arc<SchemaCatalog<Src>>,
    session: Arc<SessionContext>,
}

impl<Ch: CallChannel, Src: SchemaSource> ModelResourceClient<Ch, Src> {
    pub fn new(
        channel: Ch,
        catalog: Arc<SchemaCatalog<Src>>,
        session: Arc<SessionContext>,
    ) -> Self {
        Self {
            channel,
            catalog,
            session,
        }
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog<Src>> {
        &self.catalog
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn into_channel(self) -> Ch {
        self.channel
    }

    /// File transfers over the same channel.
    pub fn transfer(&mut self) -> ChunkedTransfer<&mut Ch, Src> {
        ChunkedTransfer::new(&mut self.channel, self.catalog.clone(), self.session.clone())
    }

    fn options(&self) -> CallOptions {
        CallOptions::new(self.session.headers(), self.session.timeout())
    }

    /// Sorted names of every model type.
    pub async fn model_types(&self) -> Result<Vec<String>, Error> {
        Ok(self.catalog.list_resource_types().await?.iter().cloned().collect())
    }

    /// Coerces textual field values into assignments for `model`.
    fn assignments(
        model: &ModelType,
        fields: &BTreeMap<String, String>,
    ) -> Result<Assignments, Error> {
        let mut assignments = Assignments::new();

        for (name, text) in fields {
            if name == RAW_JSON_FIELD {
                assignments.raw_json = Some(text.clone());
                continue;
            }

            let field = model.field(name).ok_or_else(|| SchemaError::FieldNotFound {
                model: model.name.clone(),
                field: name.clone(),
            })?;
            assignments
                .values
                .insert(name.clone(), coerce_value(field, text)?);
        }

        Ok(assignments)
    }

    async fn call(
        &mut self,
        verb: &str,
        model: &str,
        parameters: FieldParameters,
        object: ObjectRef,
    ) -> Result<DynamicMessage, Error> {
        let method = self.catalog.model_method(verb, model).await?;
        let options = self.options();
        let mut bridge = RpcEventBridge::new(parameters);

        bridge::unary(&mut self.channel, method, &mut bridge, options)
            .await
            .map_err(|e| e.with_object(object))
    }

    /// Creates a model from textual field values.
    ///
    /// # Returns
    ///
    /// * `Ok(Created)` - The id assigned by the server, and the uuid when the model has one.
    /// * `Err(Error)` - If the model or a field is unknown, a value doesn't convert, or the
    ///   server rejects the request.
    pub async fn create(
        &mut self,
        model: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<Created, Error> {
        let model_type = self.catalog.model_type(model).await?;
        let assignments = Self::assignments(&model_type, fields)?;
        let parameters = FieldParameters::single(model_type.message.full_name(), assignments);

        let response = self
            .call("Create", model, parameters, ObjectRef::model(model))
            .await?;

        let id = response
            .get_field_by_name("id")
            .and_then(|v| v.as_i32())
            .ok_or_else(|| Error::internal(format!("Create{model} returned no id")))?;
        let uuid = response
            .get_field_by_name("uuid")
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|uuid| !uuid.is_empty());

        tracing::debug!(model, id, ?uuid, "created model");
        Ok(Created { id, uuid })
    }

    /// Fetches a model by id.
    pub async fn get(
        &mut self,
        model: &str,
        id: i32,
        visibility: FieldVisibility,
    ) -> Result<ModelInstance, Error> {
        let model_type = self.catalog.model_type(model).await?;
        let method = self.catalog.model_method("Get", model).await?;
        let parameters = id_parameters(&method.input(), id);

        let response = self
            .call("Get", model, parameters, ObjectRef::with_id(model, id))
            .await?;

        ModelInstance::new(model_type, response, visibility)
    }

    /// Lists every instance of a model when `queries` is empty, filters them otherwise.
    ///
    /// `queries` maps field names to raw predicates such as `">=3"`.
    pub async fn list_or_filter(
        &mut self,
        model: &str,
        queries: &BTreeMap<String, String>,
        visibility: FieldVisibility,
    ) -> Result<Vec<ModelInstance>, Error> {
        let model_type = self.catalog.model_type(model).await?;

        let response = if queries.is_empty() {
            self.call("List", model, FieldParameters::new(), ObjectRef::model(model))
                .await?
        } else {
            let predicates = predicates(&model_type, queries)?;
            let method = self.catalog.model_method("Filter", model).await?;
            let query = query_assignments(&method.input(), &predicates)?;
            let parameters = FieldParameters::single(method.input().full_name(), query);

            self.call(
                "Filter",
                model,
                parameters,
                ObjectRef::with_queries(model, queries),
            )
            .await?
        };

        let items = match response.get_field_by_name("items") {
            Some(items) => items.as_list().map(<[Value]>::to_vec).unwrap_or_default(),
            None => {
                return Err(Error::internal(format!(
                    "{} has no items field",
                    response.descriptor().full_name()
                )));
            }
        };

        items
            .into_iter()
            .filter_map(|item| match item {
                Value::Message(message) => Some(message),
                _ => None,
            })
            .map(|message| ModelInstance::new(model_type.clone(), message, visibility))
            .collect()
    }

    /// Returns the first instance matching `queries`.
    pub async fn find(
        &mut self,
        model: &str,
        queries: &BTreeMap<String, String>,
        visibility: FieldVisibility,
    ) -> Result<ModelInstance, Error> {
        self.list_or_filter(model, queries, visibility)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound {
                object: ObjectRef::with_queries(model, queries),
            })
    }

    /// Applies a partial update. `fields` must include the `id` of the model.
    ///
    /// A `_json` entry is merged into the message before the named fields are applied.
    pub async fn update(
        &mut self,
        model: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let model_type = self.catalog.model_type(model).await?;
        let assignments = Self::assignments(&model_type, fields)?;

        let object = match assignments.values.get("id").and_then(Value::as_i32) {
            Some(id) => ObjectRef::with_id(model, id),
            None => {
                return Err(Error::InvalidInput(format!(
                    "An id is required to update a {model}"
                )));
            }
        };

        let parameters = FieldParameters::single(model_type.message.full_name(), assignments);
        self.call("Update", model, parameters, object).await?;
        Ok(())
    }

    pub async fn delete(&mut self, model: &str, id: i32) -> Result<(), Error> {
        self.catalog.validate_resource_type(model).await?;
        let method = self.catalog.model_method("Delete", model).await?;
        let parameters = id_parameters(&method.input(), id);

        self.call("Delete", model, parameters, ObjectRef::with_id(model, id))
            .await?;
        Ok(())
    }

    /// Turns the selection criteria of a command into model ids.
    ///
    /// Exactly one of `ids`, `filter` and `all` must be given. A filter that matches nothing
    /// fails with [`Error::NoMatch`]; one that matches several models asks `confirm` first,
    /// unless the session assumes yes.
    pub async fn resolve_ids(
        &mut self,
        model: &str,
        ids: &[i32],
        filter: &str,
        all: bool,
        confirm: &mut impl Confirm,
    ) -> Result<Vec<i32>, Error> {
        let selectors = [!ids.is_empty(), !filter.is_empty(), all]
            .into_iter()
            .filter(|selected| *selected)
            .count();
        if selectors != 1 {
            return Err(Error::FilterRequired);
        }

        if !ids.is_empty() {
            self.catalog.validate_resource_type(model).await?;
            return Ok(ids.to_vec());
        }

        let queries = if all {
            BTreeMap::new()
        } else {
            parse_query_set(filter, true)?
        };

        let instances = self
            .list_or_filter(model, &queries, FieldVisibility::default())
            .await?;
        let ids: Vec<i32> = instances.iter().map(|i| i.id).collect();

        if all {
            return Ok(ids);
        }

        match ids.len() {
            0 => Err(Error::NoMatch),
            1 => Ok(ids),
            n => {
                let prompt = format!("Filter matches {n} objects. Continue [y/n] ? ");
                if self.session.assume_yes || confirm.confirm(&prompt)? {
                    Ok(ids)
                } else {
                    Err(Error::Aborted)
                }
            }
        }
    }
}

/// The request of `Get<T>` and `Delete<T>`: a message holding only an id.
fn id_parameters(input: &MessageDescriptor, id: i32) -> FieldParameters {
    FieldParameters::single(
        input.full_name(),
        Assignments::new().set("id", Value::I32(id)),
    )
}

fn predicates(
    model: &ModelType,
    queries: &BTreeMap<String, String>,
) -> Result<Vec<FieldPredicate>, Error> {
    queries
        .iter()
        .map(|(name, raw)| {
            let field = model.field(name).ok_or_else(|| SchemaError::FieldNotFound {
                model: model.name.clone(),
                field: name.clone(),
            })?;
            build_predicate(field, raw).map_err(|e| match e {
                PredicateError::Query(e) => Error::Query(e),
                PredicateError::Coercion(e) => Error::Coercion(e),
            })
        })
        .collect()
}

/// Builds the assignments of a query message: `kind = DEFAULT` and one element per predicate.
fn query_assignments(
    query: &MessageDescriptor,
    predicates: &[FieldPredicate],
) -> Result<Assignments, Error> {
    let malformed = |what: &str| Error::internal(format!("{}: {what}", query.full_name()));

    let kind = query
        .get_field_by_name("kind")
        .and_then(|f| f.kind().as_enum().cloned())
        .and_then(|e| e.get_value_by_name("DEFAULT"))
        .ok_or_else(|| malformed("missing kind DEFAULT"))?;

    let element_type = query
        .get_field_by_name("elements")
        .and_then(|f| f.kind().as_message().cloned())
        .ok_or_else(|| malformed("missing elements"))?;

    let operator_type = element_type
        .get_field_by_name("operator")
        .and_then(|f| f.kind().as_enum().cloned())
        .ok_or_else(|| malformed("element has no operator enum"))?;

    let mut elements = Vec::with_capacity(predicates.len());
    for predicate in predicates {
        let operator = operator_type
            .get_value_by_name(predicate.operator.as_str())
            .ok_or_else(|| malformed(&format!("unknown operator {}", predicate.operator)))?;

        let mut element = DynamicMessage::new(element_type.clone());
        let mut set = |name: &str, value: Value| {
            element
                .try_set_field_by_name(name, value)
                .map_err(|e| malformed(&e.to_string()))
        };

        set("name", Value::String(predicate.name.clone()))?;
        set("operator", Value::EnumNumber(operator.number()))?;
        set("invert", Value::Bool(predicate.invert))?;
        match &predicate.value {
            FilterValue::Integer(v) => {
                let kind = element_type
                    .get_field_by_name("iValue")
                    .map(|f| f.kind())
                    .ok_or_else(|| malformed("element has no iValue"))?;
                let value = integer_value(&kind, *v)
                    .ok_or_else(|| malformed(&format!("{v} does not fit iValue")))?;
                set("iValue", value)?;
            }
            FilterValue::Text(v) => set("sValue", Value::String(v.clone()))?,
        }

        elements.push(Value::Message(element));
    }

    Ok(Assignments::new()
        .set("kind", Value::EnumNumber(kind.number()))
        .set("elements", Value::List(elements)))
}

fn integer_value(kind: &Kind, v: i64) -> Option<Value> {
    match kind {
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => i32::try_from(v).ok().map(Value::I32),
        Kind::Uint32 | Kind::Fixed32 => u32::try_from(v).ok().map(Value::U32),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => Some(Value::I64(v)),
        Kind::Uint64 | Kind::Fixed64 => u64::try_from(v).ok().map(Value::U64),
        _ => None,
    }
}
