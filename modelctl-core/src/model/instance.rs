use crate::coerce::render_value;
use crate::error::Error;
use crate::schema::{FieldKind, ModelType, Visibility};
use prost_reflect::{DynamicMessage, Value};
use std::sync::Arc;

/// Which classes of normally hidden fields are projected into an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldVisibility {
    pub show_hidden: bool,
    pub show_feedback: bool,
    pub show_bookkeeping: bool,
}

impl FieldVisibility {
    /// Shows every field that can be flattened.
    pub fn all() -> Self {
        Self {
            show_hidden: true,
            show_feedback: true,
            show_bookkeeping: true,
        }
    }

    pub fn allows(&self, visibility: &Visibility) -> bool {
        (!visibility.hidden || self.show_hidden)
            && (!visibility.feedback || self.show_feedback)
            && (!visibility.bookkeeping || self.show_bookkeeping)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedField {
    pub name: String,
    pub kind: FieldKind,
    pub value: Value,
}

impl ProjectedField {
    pub fn text(&self) -> String {
        render_value(&self.kind, &self.value)
    }
}

/// An instance of a model as returned by the server.
#[derive(Debug, Clone)]
pub struct ModelInstance {
    pub id: i32,
    /// Stable correlation id, for models that have one.
    pub uuid: Option<String>,
    /// Fields allowed by the visibility toggles, in declaration order. Repeated fields are never
    /// projected.
    pub fields: Vec<ProjectedField>,
    model: Arc<ModelType>,
    message: DynamicMessage,
}

impl ModelInstance {
    pub fn new(
        model: Arc<ModelType>,
        message: DynamicMessage,
        visibility: FieldVisibility,
    ) -> Result<Self, Error> {
        let id = message
            .get_field_by_name("id")
            .and_then(|v| v.as_i32())
            .ok_or_else(|| {
                Error::internal(format!("Model {} has no integer id field", model.name))
            })?;

        let uuid = message
            .get_field_by_name("uuid")
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|uuid| !uuid.is_empty());

        let fields = model
            .fields
            .iter()
            .filter(|f| !f.repeated && visibility.allows(&f.visibility))
            .map(|f| ProjectedField {
                name: f.name.clone(),
                kind: f.kind.clone(),
                value: message.get_field(&f.descriptor).into_owned(),
            })
            .collect();

        Ok(Self {
            id,
            uuid,
            fields,
            model,
            message,
        })
    }

    pub fn model(&self) -> &ModelType {
        &self.model
    }

    /// The full message, including fields that weren't projected.
    pub fn message(&self) -> &DynamicMessage {
        &self.message
    }

    pub fn field(&self, name: &str) -> Option<&ProjectedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Reads a string field of the full message.
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.message
            .get_field_by_name(name)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Reads a 32 bit integer field of the full message.
    pub fn get_i32(&self, name: &str) -> Option<i32> {
        self.message.get_field_by_name(name).and_then(|v| v.as_i32())
    }

    /// Whether the server has caught up with the last change: `enacted >= updated`.
    ///
    /// A missing timestamp counts as zero.
    pub fn is_enacted(&self) -> bool {
        self.timestamp("enacted") >= self.timestamp("updated")
    }

    /// Whether the `status` field has been populated.
    pub fn has_status(&self) -> bool {
        self.message.has_field_by_name("status")
    }

    fn timestamp(&self, name: &str) -> f64 {
        let Some(value) = self.message.get_field_by_name(name) else {
            return 0.0;
        };

        match value.as_ref() {
            Value::F64(v) => *v,
            Value::F32(v) => f64::from(*v),
            Value::I64(v) => *v as f64,
            Value::U64(v) => *v as f64,
            Value::I32(v) => f64::from(*v),
            Value::U32(v) => f64::from(*v),
            _ => 0.0,
        }
    }
}
