//! A small model schema in the shape served by the real server.
use modelctl_core::prost::Message;
use modelctl_core::prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MethodDescriptorProto, ServiceDescriptorProto,
};

pub const MODELS: [&str; 3] = ["BackupFile", "BackupOperation", "Slice"];

fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        json_name: Some(name.to_string()),
        ..Default::default()
    }
}

fn typed(name: &str, number: i32, ty: Type, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.to_string()),
        ..field(name, number, ty)
    }
}

fn repeated(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        label: Some(Label::Repeated as i32),
        ..typed(name, number, Type::Message, type_name)
    }
}

fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

fn enumeration(name: &str, values: &[&str]) -> EnumDescriptorProto {
    EnumDescriptorProto {
        name: Some(name.to_string()),
        value: values
            .iter()
            .enumerate()
            .map(|(i, value)| EnumValueDescriptorProto {
                name: Some(value.to_string()),
                number: Some(i as i32),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn method(name: &str, input: &str, output: &str) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(format!(".xos.{input}")),
        output_type: Some(format!(".xos.{output}")),
        ..Default::default()
    }
}

/// Fields every model carries: `id`, `uuid`, and the sync timestamps.
fn model(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    let mut all = vec![
        field("id", 1, Type::Int32),
        field("uuid", 2, Type::String),
        field("updated", 3, Type::Double),
        field("enacted", 4, Type::Double),
    ];
    all.extend(fields);
    message(name, all)
}

pub fn xos_file() -> FileDescriptorProto {
    let mut messages = vec![
        message("Empty", vec![]),
        message("ID", vec![field("id", 1, Type::Int32)]),
        message(
            "QueryElement",
            vec![
                typed("operator", 1, Type::Enum, ".xos.QueryElement.QueryOperator"),
                field("name", 2, Type::String),
                field("invert", 3, Type::Bool),
                field("iValue", 4, Type::Int32),
                field("sValue", 5, Type::String),
            ],
        ),
        message(
            "Query",
            vec![
                typed("kind", 1, Type::Enum, ".xos.Query.QueryKind"),
                repeated("elements", 2, ".xos.QueryElement"),
            ],
        ),
        model(
            "Slice",
            vec![
                field("name", 10, Type::String),
                field("max_instances", 11, Type::Int32),
                field("backend_status", 12, Type::String),
                field("description", 13, Type::String),
            ],
        ),
        model(
            "BackupOperation",
            vec![
                field("operation", 10, Type::String),
                field("file_id", 11, Type::Int32),
                field("status", 12, Type::String),
            ],
        ),
        model(
            "BackupFile",
            vec![
                field("name", 10, Type::String),
                field("uri", 11, Type::String),
                field("checksum", 12, Type::String),
            ],
        ),
        message("FileRequest", vec![field("uri", 1, Type::String)]),
        message(
            "FileChunk",
            vec![field("uri", 1, Type::String), field("chunk", 2, Type::String)],
        ),
        message(
            "FileTransferStatus",
            vec![
                typed("status", 1, Type::Enum, ".xos.FileTransferStatus.Status"),
                field("checksum", 2, Type::String),
                field("chunks_received", 3, Type::Int32),
                field("bytes_received", 4, Type::Int32),
            ],
        ),
        message(
            "VersionInfo",
            vec![
                field("version", 1, Type::String),
                field("pythonVersion", 2, Type::String),
                field("gitCommit", 3, Type::String),
                field("buildTime", 4, Type::String),
                field("os", 5, Type::String),
                field("arch", 6, Type::String),
            ],
        ),
        message(
            "DbInfo",
            vec![
                field("name", 1, Type::String),
                field("version", 2, Type::String),
                field("connection", 3, Type::String),
                typed("status", 4, Type::Enum, ".xos.DbInfo.DbStatus"),
            ],
        ),
    ];

    for (name, nested) in [
        ("QueryElement", enumeration("QueryOperator", &[
            "EQUAL",
            "GREATER_THAN",
            "LESS_THAN",
            "GREATER_THAN_OR_EQUAL",
            "LESS_THAN_OR_EQUAL",
        ])),
        ("Query", enumeration("QueryKind", &["DEFAULT", "ALL", "SYNCHRONIZER_DIRTY"])),
        ("FileTransferStatus", enumeration("Status", &["SUCCESS", "ERROR"])),
        ("DbInfo", enumeration("DbStatus", &["UNKNOWN", "OPERATIONAL", "ERROR"])),
    ] {
        if let Some(m) = messages.iter_mut().find(|m| m.name() == name) {
            m.enum_type.push(nested);
        }
    }

    for name in MODELS {
        messages.push(message(
            &format!("{name}s"),
            vec![repeated("items", 1, &format!(".xos.{name}"))],
        ));
    }

    let mut model_methods = Vec::new();
    for name in MODELS {
        model_methods.extend([
            method(&format!("Get{name}"), "ID", name),
            method(&format!("List{name}"), "Empty", &format!("{name}s")),
            method(&format!("Filter{name}"), "Query", &format!("{name}s")),
            method(&format!("Create{name}"), name, name),
            method(&format!("Update{name}"), name, name),
            method(&format!("Delete{name}"), "ID", "Empty"),
        ]);
    }

    FileDescriptorProto {
        name: Some("xos.proto".to_string()),
        package: Some("xos".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: messages,
        service: vec![
            ServiceDescriptorProto {
                name: Some("xos".to_string()),
                method: model_methods,
                ..Default::default()
            },
            ServiceDescriptorProto {
                name: Some("filetransfer".to_string()),
                method: vec![
                    MethodDescriptorProto {
                        server_streaming: Some(true),
                        ..method("Download", "FileRequest", "FileChunk")
                    },
                    MethodDescriptorProto {
                        client_streaming: Some(true),
                        ..method("Upload", "FileChunk", "FileTransferStatus")
                    },
                ],
                ..Default::default()
            },
            ServiceDescriptorProto {
                name: Some("utility".to_string()),
                method: vec![
                    method("GetVersion", "Empty", "VersionInfo"),
                    method("GetDatabaseInfo", "Empty", "DbInfo"),
                ],
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

pub fn xos_pool() -> DescriptorPool {
    DescriptorPool::from_file_descriptor_set(FileDescriptorSet {
        file: vec![xos_file()],
    })
    .expect("valid xos schema")
}

/// The schema as an encoded `FileDescriptorSet`, the content of a protoset file.
pub fn xos_protoset() -> Vec<u8> {
    FileDescriptorSet {
        file: vec![xos_file()],
    }
    .encode_to_vec()
}
