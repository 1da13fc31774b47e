use prost::bytes::Buf;
use prost::encoding::{DecodeContext, WireType, decode_key, decode_varint, skip_field};
use prost_reflect::{
    EnumDescriptor, FieldDescriptor, Kind, MessageDescriptor, ServiceDescriptor,
};
use std::fmt;

/// Field option extension marking a field hidden from default listings.
pub const OPTION_HIDDEN: u32 = 1005;
/// Field option extension marking a field as feedback written by the synchronizer.
pub const OPTION_FEEDBACK: u32 = 1006;
/// Field option extension marking a field as bookkeeping state.
pub const OPTION_BOOKKEEPING: u32 = 1007;

/// A generic wrapper for different types of Protobuf descriptors.
///
/// This enum allows a schema source to return a single type when resolving symbols,
/// regardless of whether the symbol points to a Service, a Message, or an Enum.
#[derive(Debug, Clone)]
pub enum Descriptor {
    MessageDescriptor(MessageDescriptor),
    ServiceDescriptor(ServiceDescriptor),
    EnumDescriptor(EnumDescriptor),
}

impl Descriptor {
    /// Returns the name (e.g.,`Slice`) of the inner descriptor
    pub fn name(&self) -> &str {
        match self {
            Descriptor::MessageDescriptor(v) => v.name(),
            Descriptor::ServiceDescriptor(v) => v.name(),
            Descriptor::EnumDescriptor(v) => v.name(),
        }
    }

    /// Returns the full_name (e.g.,`xos.Slice`) of the inner descriptor
    pub fn full_name(&self) -> &str {
        match self {
            Descriptor::MessageDescriptor(v) => v.full_name(),
            Descriptor::ServiceDescriptor(v) => v.full_name(),
            Descriptor::EnumDescriptor(v) => v.full_name(),
        }
    }

    /// Returns the inner [`MessageDescriptor`] if this variant is `MessageDescriptor`.
    pub fn message_descriptor(&self) -> Option<&MessageDescriptor> {
        match self {
            Descriptor::MessageDescriptor(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the inner [`ServiceDescriptor`] if this variant is `ServiceDescriptor`.
    pub fn service_descriptor(&self) -> Option<&ServiceDescriptor> {
        match self {
            Descriptor::ServiceDescriptor(d) => Some(d),
            _ => None,
        }
    }
}

/// The declared kind of a field, resolved once from its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Integer { bits: u8, signed: bool },
    Floating { bits: u8 },
    String,
    Boolean,
    Bytes,
    Enum(EnumDescriptor),
    Message(MessageDescriptor),
}

impl FieldKind {
    pub fn from_kind(kind: Kind) -> Self {
        match kind {
            Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => FieldKind::Integer {
                bits: 32,
                signed: true,
            },
            Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => FieldKind::Integer {
                bits: 64,
                signed: true,
            },
            Kind::Uint32 | Kind::Fixed32 => FieldKind::Integer {
                bits: 32,
                signed: false,
            },
            Kind::Uint64 | Kind::Fixed64 => FieldKind::Integer {
                bits: 64,
                signed: false,
            },
            Kind::Float => FieldKind::Floating { bits: 32 },
            Kind::Double => FieldKind::Floating { bits: 64 },
            Kind::Bool => FieldKind::Boolean,
            Kind::String => FieldKind::String,
            Kind::Bytes => FieldKind::Bytes,
            Kind::Enum(e) => FieldKind::Enum(e),
            Kind::Message(m) => FieldKind::Message(m),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Integer { bits, signed: true } => write!(f, "int{bits}"),
            FieldKind::Integer {
                bits,
                signed: false,
            } => write!(f, "uint{bits}"),
            FieldKind::Floating { bits: 32 } => f.write_str("float"),
            FieldKind::Floating { .. } => f.write_str("double"),
            FieldKind::String => f.write_str("string"),
            FieldKind::Boolean => f.write_str("bool"),
            FieldKind::Bytes => f.write_str("bytes"),
            FieldKind::Enum(e) => write!(f, "enum {}", e.full_name()),
            FieldKind::Message(m) => write!(f, "message {}", m.full_name()),
        }
    }
}

/// Classifiers that decide whether a field is shown by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Visibility {
    pub hidden: bool,
    pub feedback: bool,
    pub bookkeeping: bool,
}

impl Visibility {
    /// Reads the classifiers from the encoded options of a field.
    ///
    /// The extensions are usually unknown to the local pool, so they are looked up by number in
    /// the raw encoding rather than by name.
    pub fn from_encoded_options(mut buf: &[u8]) -> Self {
        let mut visibility = Visibility::default();

        while buf.has_remaining() {
            let Ok((tag, wire_type)) = decode_key(&mut buf) else {
                break;
            };

            let flag = match tag {
                OPTION_HIDDEN => Some(&mut visibility.hidden),
                OPTION_FEEDBACK => Some(&mut visibility.feedback),
                OPTION_BOOKKEEPING => Some(&mut visibility.bookkeeping),
                _ => None,
            };

            match flag {
                Some(flag) if wire_type == WireType::Varint => match decode_varint(&mut buf) {
                    Ok(value) => *flag = value != 0,
                    Err(_) => break,
                },
                _ => {
                    if skip_field(wire_type, tag, &mut buf, DecodeContext::default()).is_err() {
                        break;
                    }
                }
            }
        }

        visibility
    }
}

/// A resolved field of a model.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    /// Lists and maps. These can't be flattened into a single value.
    pub repeated: bool,
    pub visibility: Visibility,
    pub descriptor: FieldDescriptor,
}

impl FieldSchema {
    pub fn from_descriptor(descriptor: FieldDescriptor) -> Self {
        use prost::Message;

        let visibility = Visibility::from_encoded_options(&descriptor.options().encode_to_vec());

        Self {
            name: descriptor.name().to_string(),
            kind: FieldKind::from_kind(descriptor.kind()),
            repeated: descriptor.is_list() || descriptor.is_map(),
            visibility,
            descriptor,
        }
    }
}

/// A model type with its fields resolved. Immutable once built.
#[derive(Debug, Clone)]
pub struct ModelType {
    pub name: String,
    pub message: MessageDescriptor,
    pub fields: Vec<FieldSchema>,
}

impl ModelType {
    pub fn new(name: impl Into<String>, message: MessageDescriptor) -> Self {
        let fields = message.fields().map(FieldSchema::from_descriptor).collect();
        Self {
            name: name.into(),
            message,
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}
