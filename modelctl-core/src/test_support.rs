//! Hand built descriptors for unit tests.
use crate::schema::{ModelType, OPTION_BOOKKEEPING, OPTION_FEEDBACK, OPTION_HIDDEN};
use prost::Message;
use prost::encoding::{WireType, encode_key, encode_varint};
use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto,
};

/// Encodes a field, with the given visibility extensions set to true in its options.
pub(crate) fn encode_field(
    name: &str,
    number: i32,
    ty: Type,
    repeated: bool,
    type_name: Option<&str>,
    flags: &[u32],
) -> Vec<u8> {
    let label = if repeated { Label::Repeated } else { Label::Optional };
    let mut buf = FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        type_name: type_name.map(str::to_string),
        ..Default::default()
    }
    .encode_to_vec();

    if !flags.is_empty() {
        let mut options = Vec::new();
        for flag in flags {
            encode_key(*flag, WireType::Varint, &mut options);
            encode_varint(1, &mut options);
        }
        prost::encoding::bytes::encode(8, &options, &mut buf);
    }
    buf
}

pub(crate) fn encode_message(name: &str, fields: Vec<Vec<u8>>) -> Vec<u8> {
    let mut buf = DescriptorProto {
        name: Some(name.to_string()),
        ..Default::default()
    }
    .encode_to_vec();
    for field in fields {
        prost::encoding::bytes::encode(2, &field, &mut buf);
    }
    buf
}

pub(crate) fn encode_pool(file: FileDescriptorProto, messages: Vec<Vec<u8>>) -> DescriptorPool {
    let mut file_bytes = file.encode_to_vec();
    for message in messages {
        prost::encoding::bytes::encode(4, &message, &mut file_bytes);
    }
    let mut set = Vec::new();
    prost::encoding::bytes::encode(1, &file_bytes, &mut set);

    DescriptorPool::decode(set.as_slice()).unwrap()
}

pub(crate) fn sample_pool() -> DescriptorPool {
    let file = FileDescriptorProto {
        name: Some("sample.proto".to_string()),
        package: Some("test".to_string()),
        syntax: Some("proto3".to_string()),
        enum_type: vec![EnumDescriptorProto {
            name: Some("Status".to_string()),
            value: ["UNKNOWN", "OK", "FAILED"]
                .iter()
                .enumerate()
                .map(|(i, name)| EnumValueDescriptorProto {
                    name: Some(name.to_string()),
                    number: Some(i as i32),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }],
        ..Default::default()
    };

    let sample = encode_message(
        "Sample",
        vec![
            encode_field("id", 1, Type::Int32, false, None, &[]),
            encode_field("count", 2, Type::Uint32, false, None, &[]),
            encode_field("big", 3, Type::Int64, false, None, &[]),
            encode_field("ratio", 4, Type::Float, false, None, &[]),
            encode_field("weight", 5, Type::Double, false, None, &[]),
            encode_field("enabled", 6, Type::Bool, false, None, &[]),
            encode_field("name", 7, Type::String, false, None, &[]),
            encode_field(
                "backend_status",
                8,
                Type::Enum,
                false,
                Some(".test.Status"),
                &[OPTION_FEEDBACK],
            ),
            encode_field("tags", 9, Type::String, true, None, &[]),
            encode_field("secret", 10, Type::String, false, None, &[OPTION_HIDDEN]),
            encode_field("policed", 11, Type::Double, false, None, &[OPTION_BOOKKEEPING]),
        ],
    );

    encode_pool(file, vec![sample])
}

pub(crate) fn sample_model() -> ModelType {
    let message = sample_pool().get_message_by_name("test.Sample").unwrap();
    ModelType::new("Sample", message)
}
