//! Type definitions shared by the introspection pipeline and the runtime

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// JSON-schema kind of a message field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Number,
    String,
    Boolean,
    Enum,
    Object,
    /// Free-form JSON (`Struct`, `Value`, `ListValue`, `Any`, or a message
    /// left out at the expansion ceiling)
    Json,
}

impl FieldKind {
    /// Primitive kinds carry their own schema type, the rest need a reference or enum list
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            FieldKind::Integer | FieldKind::Number | FieldKind::String | FieldKind::Boolean
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::String => "string",
            FieldKind::Boolean => "boolean",
            FieldKind::Enum => "enum",
            FieldKind::Object => "object",
            FieldKind::Json => "json",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message field after introspection
///
/// `concrete_type` is the protobuf scalar name (`int64`, `bytes`,
/// `Timestamp`), the enum name, or the qualified name of the referenced
/// message. Map fields carry the descriptor of their values in `map_value`
/// and a `map<K, V>` concrete type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub concrete_type: String,
    pub is_repeated: bool,
    /// Enum literal names in declaration order, present iff `kind == Enum`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub enum_values: Option<Vec<String>>,
    pub field_number: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub map_value: Option<Box<FieldDescriptor>>,
}

impl FieldDescriptor {
    pub fn is_map(&self) -> bool {
        self.map_value.is_some()
    }

    /// The same field with `is_repeated` cleared, used for array items
    pub fn item(&self) -> FieldDescriptor {
        FieldDescriptor {
            is_repeated: false,
            ..self.clone()
        }
    }
}

/// A flattened message: qualified name plus ordered fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDescriptor {
    pub qualified_name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl MessageDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Message table keyed by qualified name
///
/// Ordered so generated definitions are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageTable {
    messages: BTreeMap<String, MessageDescriptor>,
}

impl MessageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.messages.contains_key(qualified_name)
    }

    pub fn get(&self, qualified_name: &str) -> Option<&MessageDescriptor> {
        self.messages.get(qualified_name)
    }

    /// Insert a message, returning the previous entry if the name was taken
    pub fn insert(&mut self, message: MessageDescriptor) -> Option<MessageDescriptor> {
        self.messages.insert(message.qualified_name.clone(), message)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageDescriptor> {
        self.messages.values()
    }
}

/// Which sides of an operation are streamed; drives the generated sub-paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamClass {
    None,
    RequestStreamed,
    ResponseStreamed,
    Bidirectional,
}

impl StreamClass {
    pub fn from_flags(request_is_stream: bool, response_is_stream: bool) -> Self {
        match (request_is_stream, response_is_stream) {
            (false, false) => StreamClass::None,
            (true, false) => StreamClass::RequestStreamed,
            (false, true) => StreamClass::ResponseStreamed,
            (true, true) => StreamClass::Bidirectional,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamClass::None => "unary",
            StreamClass::RequestStreamed => "client_stream",
            StreamClass::ResponseStreamed => "server_stream",
            StreamClass::Bidirectional => "bidi_stream",
        }
    }
}

/// One RPC method as seen by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub name: String,
    /// Fully-qualified service name, e.g. `webshop.WebShop`
    pub service: String,
    pub request_type: String,
    pub request_is_stream: bool,
    pub response_type: String,
    pub response_is_stream: bool,
}

impl OperationDescriptor {
    pub fn stream_class(&self) -> StreamClass {
        StreamClass::from_flags(self.request_is_stream, self.response_is_stream)
    }

    /// gRPC request path, e.g. `/webshop.WebShop/GetOrderDetails`
    pub fn grpc_path(&self) -> String {
        format!("/{}/{}", self.service, self.name)
    }
}

/// Introspection result for one service
#[derive(Debug, Clone)]
pub struct ServiceModel {
    /// Dotted package path; empty when the schema declares no package
    pub package: String,
    pub service_name: String,
    pub operations: Vec<OperationDescriptor>,
    pub messages: MessageTable,
}

impl ServiceModel {
    pub fn full_name(&self) -> String {
        if self.package.is_empty() {
            self.service_name.clone()
        } else {
            format!("{}.{}", self.package, self.service_name)
        }
    }
}

/// Introspection result for a whole schema source
#[derive(Debug, Clone, Default)]
pub struct IntrospectedSchema {
    pub services: Vec<ServiceModel>,
}

impl IntrospectedSchema {
    pub fn operation_count(&self) -> usize {
        self.services.iter().map(|s| s.operations.len()).sum()
    }
}
