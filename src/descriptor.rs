//! Typed schema source
//!
//! A protobuf descriptor set is parsed once into a closed tree of
//! [`SchemaNode`]s grouped by package. Everything downstream (the
//! introspector in particular) walks this tree instead of poking at
//! reflection handles, and tests can build the tree by hand.

use crate::error::{Error, Result};
use prost_reflect::{DescriptorPool, Kind};
use std::collections::HashMap;
use std::path::Path;

/// Protobuf scalar types plus the well-known types with a dedicated JSON form
///
/// Wrapper types (`google.protobuf.Int32Value` and friends) collapse onto the
/// scalar they wrap. `Struct`, `Value`, `ListValue` and `Any` are free-form
/// JSON and never become definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
    Timestamp,
    Duration,
    FieldMask,
    Struct,
    Value,
    ListValue,
    Any,
}

impl ScalarType {
    /// Name as written in `.proto` files (well-known types by short name)
    pub fn proto_name(self) -> &'static str {
        match self {
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Uint32 => "uint32",
            ScalarType::Uint64 => "uint64",
            ScalarType::Sint32 => "sint32",
            ScalarType::Sint64 => "sint64",
            ScalarType::Fixed32 => "fixed32",
            ScalarType::Fixed64 => "fixed64",
            ScalarType::Sfixed32 => "sfixed32",
            ScalarType::Sfixed64 => "sfixed64",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
            ScalarType::Timestamp => "Timestamp",
            ScalarType::Duration => "Duration",
            ScalarType::FieldMask => "FieldMask",
            ScalarType::Struct => "Struct",
            ScalarType::Value => "Value",
            ScalarType::ListValue => "ListValue",
            ScalarType::Any => "Any",
        }
    }

    fn well_known(full_name: &str) -> Option<Self> {
        match full_name {
            "google.protobuf.Timestamp" => Some(ScalarType::Timestamp),
            "google.protobuf.Duration" => Some(ScalarType::Duration),
            "google.protobuf.FieldMask" => Some(ScalarType::FieldMask),
            "google.protobuf.Struct" => Some(ScalarType::Struct),
            "google.protobuf.Value" => Some(ScalarType::Value),
            "google.protobuf.ListValue" => Some(ScalarType::ListValue),
            "google.protobuf.Any" => Some(ScalarType::Any),
            "google.protobuf.DoubleValue" => Some(ScalarType::Double),
            "google.protobuf.FloatValue" => Some(ScalarType::Float),
            "google.protobuf.Int64Value" => Some(ScalarType::Int64),
            "google.protobuf.UInt64Value" => Some(ScalarType::Uint64),
            "google.protobuf.Int32Value" => Some(ScalarType::Int32),
            "google.protobuf.UInt32Value" => Some(ScalarType::Uint32),
            "google.protobuf.BoolValue" => Some(ScalarType::Bool),
            "google.protobuf.StringValue" => Some(ScalarType::String),
            "google.protobuf.BytesValue" => Some(ScalarType::Bytes),
            _ => None,
        }
    }
}

/// Declared type of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldTypeTag {
    Scalar(ScalarType),
    /// Fully-qualified message name without leading dot
    Message(String),
    /// Fully-qualified enum name without leading dot
    Enum(String),
    /// `map<K, V>`; JSON keys are always strings
    Map {
        key: ScalarType,
        value: Box<FieldTypeTag>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNode {
    pub name: String,
    pub number: u32,
    pub repeated: bool,
    pub type_tag: FieldTypeTag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumNode {
    pub name: String,
    pub full_name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageNode {
    pub name: String,
    pub full_name: String,
    /// Fields, nested messages and nested enums in declaration order
    pub children: Vec<SchemaNode>,
}

impl MessageNode {
    pub fn nested_messages(&self) -> impl Iterator<Item = &MessageNode> {
        self.children.iter().filter_map(|c| match c {
            SchemaNode::Message(m) => Some(m),
            _ => None,
        })
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldNode> {
        self.children.iter().filter_map(|c| match c {
            SchemaNode::Field(f) => Some(f),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodNode {
    pub name: String,
    pub request_type: String,
    pub request_stream: bool,
    pub response_type: String,
    pub response_stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNode {
    pub name: String,
    pub full_name: String,
    pub methods: Vec<MethodNode>,
}

/// One node of the schema tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaNode {
    Service(ServiceNode),
    Message(MessageNode),
    Field(FieldNode),
    Enum(EnumNode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageNode {
    /// Dotted package path, empty for files without a package
    pub name: String,
    pub children: Vec<SchemaNode>,
}

impl PackageNode {
    pub fn services(&self) -> impl Iterator<Item = &ServiceNode> {
        self.children.iter().filter_map(|c| match c {
            SchemaNode::Service(s) => Some(s),
            _ => None,
        })
    }
}

/// Parsed schema source with a full-name index over messages and enums
#[derive(Debug, Clone, Default)]
pub struct SchemaSource {
    packages: Vec<PackageNode>,
    messages: HashMap<String, MessageNode>,
    enums: HashMap<String, EnumNode>,
}

impl SchemaSource {
    /// Build a source from an already constructed tree
    pub fn new(packages: Vec<PackageNode>) -> Self {
        let mut messages = HashMap::new();
        let mut enums = HashMap::new();
        for package in &packages {
            index_nodes(&package.children, &mut messages, &mut enums);
        }
        Self {
            packages,
            messages,
            enums,
        }
    }

    /// Decode an encoded `FileDescriptorSet`
    pub fn from_descriptor_set_bytes(bytes: &[u8]) -> Result<Self> {
        let pool = DescriptorPool::decode(bytes)
            .map_err(|e| Error::Schema(format!("invalid descriptor set: {e}")))?;
        Ok(Self::from_pool(&pool))
    }

    /// Read and decode a descriptor set file (`protoc --descriptor_set_out`)
    pub fn from_descriptor_set_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            Error::Schema(format!(
                "failed to read descriptor set {}: {e}",
                path.display()
            ))
        })?;
        Self::from_descriptor_set_bytes(&bytes)
    }

    /// Parse every file of a descriptor pool into the typed tree
    pub fn from_pool(pool: &DescriptorPool) -> Self {
        let mut by_package: Vec<PackageNode> = Vec::new();

        for file in pool.files() {
            let package_name = file.package_name().to_string();
            let idx = match by_package.iter().position(|p| p.name == package_name) {
                Some(idx) => idx,
                None => {
                    by_package.push(PackageNode {
                        name: package_name,
                        children: Vec::new(),
                    });
                    by_package.len() - 1
                }
            };
            let package = &mut by_package[idx];

            for service in file.services() {
                package.children.push(SchemaNode::Service(ServiceNode {
                    name: service.name().to_string(),
                    full_name: service.full_name().to_string(),
                    methods: service
                        .methods()
                        .map(|m| MethodNode {
                            name: m.name().to_string(),
                            request_type: m.input().full_name().to_string(),
                            request_stream: m.is_client_streaming(),
                            response_type: m.output().full_name().to_string(),
                            response_stream: m.is_server_streaming(),
                        })
                        .collect(),
                }));
            }
            for message in file.messages() {
                package
                    .children
                    .push(SchemaNode::Message(message_node(&message)));
            }
            for enum_desc in file.enums() {
                package
                    .children
                    .push(SchemaNode::Enum(enum_node(&enum_desc)));
            }
        }

        Self::new(by_package)
    }

    pub fn packages(&self) -> &[PackageNode] {
        &self.packages
    }

    pub fn message(&self, full_name: &str) -> Option<&MessageNode> {
        self.messages.get(trim_dot(full_name))
    }

    pub fn enumeration(&self, full_name: &str) -> Option<&EnumNode> {
        self.enums.get(trim_dot(full_name))
    }

    pub fn service_count(&self) -> usize {
        self.packages.iter().map(|p| p.services().count()).sum()
    }
}

fn trim_dot(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}

fn index_nodes(
    nodes: &[SchemaNode],
    messages: &mut HashMap<String, MessageNode>,
    enums: &mut HashMap<String, EnumNode>,
) {
    for node in nodes {
        match node {
            SchemaNode::Message(m) => {
                index_nodes(&m.children, messages, enums);
                messages.insert(m.full_name.clone(), m.clone());
            }
            SchemaNode::Enum(e) => {
                enums.insert(e.full_name.clone(), e.clone());
            }
            SchemaNode::Service(_) | SchemaNode::Field(_) => {}
        }
    }
}

fn message_node(message: &prost_reflect::MessageDescriptor) -> MessageNode {
    let mut children = Vec::new();
    for nested in message.child_messages().filter(|m| !m.is_map_entry()) {
        children.push(SchemaNode::Message(message_node(&nested)));
    }
    for nested in message.child_enums() {
        children.push(SchemaNode::Enum(enum_node(&nested)));
    }
    for field in message.fields() {
        children.push(SchemaNode::Field(field_node(&field)));
    }
    MessageNode {
        name: message.name().to_string(),
        full_name: message.full_name().to_string(),
        children,
    }
}

fn enum_node(enum_desc: &prost_reflect::EnumDescriptor) -> EnumNode {
    EnumNode {
        name: enum_desc.name().to_string(),
        full_name: enum_desc.full_name().to_string(),
        values: enum_desc.values().map(|v| v.name().to_string()).collect(),
    }
}

fn field_node(field: &prost_reflect::FieldDescriptor) -> FieldNode {
    let type_tag = match field.kind() {
        Kind::Message(entry) if field.is_map() => {
            let key = match type_tag(entry.map_entry_key_field().kind()) {
                FieldTypeTag::Scalar(scalar) => scalar,
                _ => ScalarType::String,
            };
            FieldTypeTag::Map {
                key,
                value: Box::new(type_tag(entry.map_entry_value_field().kind())),
            }
        }
        kind => type_tag(kind),
    };
    FieldNode {
        name: field.name().to_string(),
        number: field.number(),
        repeated: field.is_list(),
        type_tag,
    }
}

fn type_tag(kind: Kind) -> FieldTypeTag {
    match kind {
        Kind::Double => FieldTypeTag::Scalar(ScalarType::Double),
        Kind::Float => FieldTypeTag::Scalar(ScalarType::Float),
        Kind::Int32 => FieldTypeTag::Scalar(ScalarType::Int32),
        Kind::Int64 => FieldTypeTag::Scalar(ScalarType::Int64),
        Kind::Uint32 => FieldTypeTag::Scalar(ScalarType::Uint32),
        Kind::Uint64 => FieldTypeTag::Scalar(ScalarType::Uint64),
        Kind::Sint32 => FieldTypeTag::Scalar(ScalarType::Sint32),
        Kind::Sint64 => FieldTypeTag::Scalar(ScalarType::Sint64),
        Kind::Fixed32 => FieldTypeTag::Scalar(ScalarType::Fixed32),
        Kind::Fixed64 => FieldTypeTag::Scalar(ScalarType::Fixed64),
        Kind::Sfixed32 => FieldTypeTag::Scalar(ScalarType::Sfixed32),
        Kind::Sfixed64 => FieldTypeTag::Scalar(ScalarType::Sfixed64),
        Kind::Bool => FieldTypeTag::Scalar(ScalarType::Bool),
        Kind::String => FieldTypeTag::Scalar(ScalarType::String),
        Kind::Bytes => FieldTypeTag::Scalar(ScalarType::Bytes),
        Kind::Message(m) => match ScalarType::well_known(m.full_name()) {
            Some(scalar) => FieldTypeTag::Scalar(scalar),
            None => FieldTypeTag::Message(m.full_name().to_string()),
        },
        Kind::Enum(e) => FieldTypeTag::Enum(e.full_name().to_string()),
    }
}
