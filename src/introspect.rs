//! Schema introspection
//!
//! Walks a [`SchemaSource`] and produces one [`ServiceModel`] per service:
//! the operation list plus a flat message table holding every message
//! reachable from the operations' request and response types.
//!
//! Messages are keyed by qualified name. Top-level messages of the service's
//! own package use their package-relative name (`Order`), nested ones append
//! to their parent (`Order.Item`) and messages from other packages keep their
//! full name (`google.protobuf.Struct`). A name is claimed in the table when
//! its expansion starts, so every message is expanded at most once and
//! self-referential schemas terminate.

use crate::descriptor::{FieldNode, FieldTypeTag, MessageNode, PackageNode, SchemaSource, ServiceNode};
use crate::error::{Error, Result};
use crate::type_mapper::scalar_kind;
use crate::types::{
    FieldDescriptor, FieldKind, IntrospectedSchema, MessageDescriptor, MessageTable,
    OperationDescriptor, ServiceModel,
};
use std::collections::{HashMap, HashSet};

/// Expansion depth at which message traversal stops
pub const DEFAULT_MAX_EXPANSION_DEPTH: usize = 10;

/// Smallest ceiling at which request and response messages are still expanded
pub const MIN_EXPANSION_DEPTH: usize = 2;

/// Walks schema sources into service models
#[derive(Debug, Clone)]
pub struct SchemaIntrospector {
    max_depth: usize,
}

impl Default for SchemaIntrospector {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_EXPANSION_DEPTH,
        }
    }
}

impl SchemaIntrospector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the expansion depth ceiling
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Introspect every service of every package
    pub fn introspect(&self, source: &SchemaSource) -> Result<IntrospectedSchema> {
        let mut services = Vec::new();
        for package in source.packages() {
            for service in package.services() {
                services.push(self.introspect_service(source, package, service)?);
            }
        }

        tracing::debug!(
            services = services.len(),
            operations = services.iter().map(|s| s.operations.len()).sum::<usize>(),
            "Schema introspected"
        );
        Ok(IntrospectedSchema { services })
    }

    fn introspect_service(
        &self,
        source: &SchemaSource,
        package: &PackageNode,
        service: &ServiceNode,
    ) -> Result<ServiceModel> {
        if service.methods.is_empty() {
            return Err(Error::Schema(format!(
                "service {} declares no methods",
                service.full_name
            )));
        }

        let mut walk = Expansion {
            source,
            package: &package.name,
            max_depth: self.max_depth,
            table: MessageTable::new(),
            claimed: HashSet::new(),
        };
        let mut operations = Vec::with_capacity(service.methods.len());

        for method in &service.methods {
            let request = source.message(&method.request_type).ok_or_else(|| {
                Error::Schema(format!(
                    "operation {}: unresolved request type {}",
                    method.name, method.request_type
                ))
            })?;
            let response = source.message(&method.response_type).ok_or_else(|| {
                Error::Schema(format!(
                    "operation {}: unresolved response type {}",
                    method.name, method.response_type
                ))
            })?;

            let request_name = walk.relative_name(&request.full_name);
            let response_name = walk.relative_name(&response.full_name);
            walk.expand(request, &request_name, 1)?;
            walk.expand(response, &response_name, 1)?;

            operations.push(OperationDescriptor {
                name: method.name.clone(),
                service: service.full_name.clone(),
                request_type: request_name,
                request_is_stream: method.request_stream,
                response_type: response_name,
                response_is_stream: method.response_stream,
            });
        }

        Ok(ServiceModel {
            package: package.name.clone(),
            service_name: service.name.clone(),
            operations,
            messages: walk.table,
        })
    }
}

/// State of one service's traversal
struct Expansion<'a> {
    source: &'a SchemaSource,
    package: &'a str,
    max_depth: usize,
    table: MessageTable,
    claimed: HashSet<String>,
}

impl Expansion<'_> {
    fn relative_name(&self, full_name: &str) -> String {
        if self.package.is_empty() {
            return full_name.to_string();
        }
        full_name
            .strip_prefix(self.package)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(full_name)
            .to_string()
    }

    fn expand(&mut self, message: &MessageNode, qualified_name: &str, depth: usize) -> Result<()> {
        if depth >= self.max_depth {
            tracing::warn!(
                definition = %qualified_name,
                depth,
                "Expansion depth ceiling reached, definition omitted"
            );
            return Ok(());
        }
        if !self.claimed.insert(qualified_name.to_string()) {
            return Ok(());
        }

        // nested messages, keyed by their full name
        let mut local: HashMap<&str, String> = HashMap::new();
        for nested in message.nested_messages() {
            let nested_name = format!("{}.{}", qualified_name, nested.name);
            self.expand(nested, &nested_name, depth + 1)?;
            local.insert(nested.full_name.as_str(), nested_name);
        }

        let mut fields = Vec::new();
        for field in message.fields() {
            fields.push(self.classify(message, field, &local, depth)?);
        }

        self.table.insert(MessageDescriptor {
            qualified_name: qualified_name.to_string(),
            fields,
        });
        Ok(())
    }

    fn classify(
        &mut self,
        owner: &MessageNode,
        field: &FieldNode,
        local: &HashMap<&str, String>,
        depth: usize,
    ) -> Result<FieldDescriptor> {
        let (kind, concrete_type, enum_values) =
            self.resolve(owner, &field.name, &field.type_tag, local, depth)?;
        let mut descriptor = FieldDescriptor {
            name: field.name.clone(),
            kind,
            concrete_type,
            is_repeated: field.repeated,
            enum_values,
            field_number: field.number,
            map_value: None,
        };

        if let FieldTypeTag::Map { key, value } = &field.type_tag {
            let (kind, concrete_type, enum_values) =
                self.resolve(owner, &field.name, value, local, depth)?;
            descriptor.concrete_type = format!("map<{}, {}>", key.proto_name(), concrete_type);
            descriptor.map_value = Some(Box::new(FieldDescriptor {
                name: field.name.clone(),
                kind,
                concrete_type,
                is_repeated: false,
                enum_values,
                field_number: 2,
                map_value: None,
            }));
        }
        Ok(descriptor)
    }

    fn resolve(
        &mut self,
        owner: &MessageNode,
        field_name: &str,
        type_tag: &FieldTypeTag,
        local: &HashMap<&str, String>,
        depth: usize,
    ) -> Result<(FieldKind, String, Option<Vec<String>>)> {
        let source = self.source;
        match type_tag {
            FieldTypeTag::Scalar(scalar) => {
                Ok((scalar_kind(*scalar), scalar.proto_name().to_string(), None))
            }
            FieldTypeTag::Enum(full_name) => {
                let enumeration = source.enumeration(full_name).ok_or_else(|| {
                    Error::Schema(format!(
                        "message {}: field {} has unresolved enum type {}",
                        owner.full_name, field_name, full_name
                    ))
                })?;
                Ok((
                    FieldKind::Enum,
                    self.relative_name(&enumeration.full_name),
                    Some(enumeration.values.clone()),
                ))
            }
            FieldTypeTag::Message(full_name) => {
                let name = match local.get(full_name.as_str()) {
                    Some(nested_name) => nested_name.clone(),
                    None => {
                        let referenced = source.message(full_name).ok_or_else(|| {
                            Error::Schema(format!(
                                "message {}: field {} has unresolved message type {}",
                                owner.full_name, field_name, full_name
                            ))
                        })?;
                        let name = self.relative_name(&referenced.full_name);
                        if !self.table.contains(&name) {
                            self.expand(referenced, &name, depth + 1)?;
                        }
                        name
                    }
                };
                // left out at the ceiling: no definition to point at
                if !self.claimed.contains(&name) {
                    tracing::debug!(
                        definition = %name,
                        field = %field_name,
                        "Field of an omitted definition typed as free-form object"
                    );
                    return Ok((FieldKind::Json, name, None));
                }
                Ok((FieldKind::Object, name, None))
            }
            FieldTypeTag::Map { .. } => Err(Error::Schema(format!(
                "message {}: field {} has a map as map value",
                owner.full_name, field_name
            ))),
        }
    }
}
