//! Route synthesis
//!
//! Turns introspected services into the REST resource model: a Swagger 2.0
//! document and a route table whose entries carry everything a handler
//! needs (operation, field, stream class) so nothing is re-derived at
//! request time.
//!
//! Per operation, with `base` being `/package/Service` (or `/package` when
//! services are not segmented):
//!
//! | Method | Path | Present when |
//! |--------|------|--------------|
//! | POST | `{base}/{op}` | always |
//! | GET, PATCH, DELETE | `{base}/{op}/instances/{id}` | always |
//! | PUT | `.../instances/{id}/in/fields/{field}` | request not streamed |
//! | GET | `.../instances/{id}/out/fields/{field}`, `.../out` | response not streamed |
//! | POST | `.../instances/{id}/in/stream` | request streamed |
//! | GET | `.../instances/{id}/out/stream` | response streamed |
//! | POST, GET | `.../instances/{id}/bi/stream` | both streamed |

use crate::error::{Error, Result};
use crate::openapi::{
    Header, HttpMethod, Info, Operation, Parameter, Response, SchemaObject, SwaggerDocument,
};
use crate::type_mapper::{map_field, map_message};
use crate::types::{
    FieldDescriptor, IntrospectedSchema, MessageDescriptor, OperationDescriptor, ServiceModel,
    StreamClass,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const JSON: &str = "application/json";
const NDJSON: &str = "application/x-ndjson";
const STREAM_SUMMARY: &str = "newline-delimited JSON, see http://jsonlines.org";

/// Options for path layout and document metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    /// Include the service name in every path
    pub segment_services: bool,
    pub title: String,
    pub description: String,
    pub version: String,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            segment_services: true,
            title: "REST API".to_string(),
            description: "Generated from gRPC API".to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

/// What a route does with the instance it addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    CreateInstance,
    GetInstance,
    PatchInstance,
    DeleteInstance,
    PutInputField,
    GetOutputField,
    GetOutput,
    PostInputStream,
    GetOutputStream,
    PostBiStream,
    GetBiStream,
}

/// An operation together with its resolved request and response messages
#[derive(Debug, Clone)]
pub struct BoundOperation {
    pub descriptor: OperationDescriptor,
    pub request: MessageDescriptor,
    pub response: MessageDescriptor,
    /// Short service name, used for tags
    pub service: String,
    pub package: String,
    /// `{base}/{op}`
    pub path: String,
}

impl BoundOperation {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn stream_class(&self) -> StreamClass {
        self.descriptor.stream_class()
    }

    /// Concrete path of one instance, used for `Content-Location`
    pub fn instance_path(&self, id: &str) -> String {
        format!("{}/instances/{}", self.path, id)
    }
}

/// Handler metadata attached to a route
#[derive(Debug, Clone)]
pub struct RouteBinding {
    pub operation: Arc<BoundOperation>,
    pub kind: RouteKind,
    pub field: Option<FieldDescriptor>,
    pub stream_class: StreamClass,
}

#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub method: HttpMethod,
    /// Path template with `{id}` placeholders
    pub path: String,
    pub binding: RouteBinding,
}

/// Ordered list of generated routes
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, method: HttpMethod, path: &str) -> Option<&RouteEntry> {
        self.entries
            .iter()
            .find(|e| e.method == method && e.path == path)
    }

    /// Every bound operation once, in route order
    pub fn operations(&self) -> Vec<Arc<BoundOperation>> {
        self.entries
            .iter()
            .filter(|e| e.binding.kind == RouteKind::CreateInstance)
            .map(|e| e.binding.operation.clone())
            .collect()
    }

    /// Route entries grouped by path template, in path order
    pub fn by_path(&self) -> BTreeMap<&str, Vec<&RouteEntry>> {
        let mut grouped: BTreeMap<&str, Vec<&RouteEntry>> = BTreeMap::new();
        for entry in &self.entries {
            grouped.entry(entry.path.as_str()).or_default().push(entry);
        }
        grouped
    }
}

/// Output of route synthesis
#[derive(Debug, Clone)]
pub struct RestModel {
    pub document: SwaggerDocument,
    pub routes: RouteTable,
}

/// Builds the REST model from introspected services
#[derive(Debug, Clone, Default)]
pub struct RouteSynthesizer {
    config: RouteConfig,
}

/// Convenience wrapper around [`RouteSynthesizer::synthesize`]
pub fn synthesize(schema: &IntrospectedSchema, config: &RouteConfig) -> Result<RestModel> {
    RouteSynthesizer::new(config.clone()).synthesize(schema)
}

impl RouteSynthesizer {
    pub fn new(config: RouteConfig) -> Self {
        Self { config }
    }

    pub fn synthesize(&self, schema: &IntrospectedSchema) -> Result<RestModel> {
        let mut document = SwaggerDocument::new(Info {
            title: self.config.title.clone(),
            version: self.config.version.clone(),
            description: Some(self.config.description.clone()),
        });
        document.base_path = Some("/".to_string());
        document.definitions = fixed_definitions();

        let mut builder = TableBuilder {
            document,
            entries: Vec::new(),
        };

        for service in &schema.services {
            self.add_definitions(&mut builder.document, service)?;
            let base = self.base_path(service);
            for op in &service.operations {
                let bound = Arc::new(bind_operation(service, op, &base)?);
                builder.add_operation(bound)?;
            }
        }

        tracing::debug!(
            paths = builder.document.paths.len(),
            routes = builder.entries.len(),
            definitions = builder.document.definitions.len(),
            "Routes synthesized"
        );

        Ok(RestModel {
            document: builder.document,
            routes: RouteTable {
                entries: builder.entries,
            },
        })
    }

    fn base_path(&self, service: &ServiceModel) -> String {
        let mut base = String::new();
        if !service.package.is_empty() {
            base.push('/');
            base.push_str(&service.package);
        }
        if self.config.segment_services || service.package.is_empty() {
            base.push('/');
            base.push_str(&service.service_name);
        }
        base
    }

    fn add_definitions(&self, document: &mut SwaggerDocument, service: &ServiceModel) -> Result<()> {
        for message in service.messages.iter() {
            let schema = map_message(&message.fields);
            match document.definitions.get(&message.qualified_name) {
                Some(existing) if *existing != schema => {
                    return Err(Error::Schema(format!(
                        "message {} is defined differently by more than one service",
                        message.qualified_name
                    )));
                }
                Some(_) => {}
                None => {
                    document
                        .definitions
                        .insert(message.qualified_name.clone(), schema);
                }
            }
        }
        Ok(())
    }
}

fn bind_operation(service: &ServiceModel, op: &OperationDescriptor, base: &str) -> Result<BoundOperation> {
    let lookup = |name: &str, role: &str| {
        service.messages.get(name).cloned().ok_or_else(|| {
            Error::Schema(format!(
                "operation {}: {} type {} was not expanded",
                op.name, role, name
            ))
        })
    };
    Ok(BoundOperation {
        descriptor: op.clone(),
        request: lookup(&op.request_type, "request")?,
        response: lookup(&op.response_type, "response")?,
        service: service.service_name.clone(),
        package: service.package.clone(),
        path: format!("{}/{}", base, op.name),
    })
}

fn fixed_definitions() -> BTreeMap<String, SchemaObject> {
    let string = || SchemaObject::of_type("string");
    let boolean = || SchemaObject::of_type("boolean");

    let instance = SchemaObject::of_type("object")
        .with_property(
            "id",
            string().with_description("Unique identifier of instance"),
        )
        .with_property("started", boolean())
        .with_property("done", boolean())
        .with_property("createdAt", string().with_format("date-time"))
        .with_property("startedAt", string().with_format("date-time"))
        .with_property("doneAt", string().with_format("date-time"))
        .with_property(
            "error",
            string().with_description("Error message if instance failed"),
        )
        .with_property(
            "linkedMessageId",
            string().with_description("Identifier of the request and response payloads"),
        );
    let writable = SchemaObject::of_type("object").with_property("started", boolean());

    let mut definitions = BTreeMap::new();
    definitions.insert("Instance".to_string(), instance);
    definitions.insert("InstanceWritable".to_string(), writable);
    definitions
}

struct TableBuilder {
    document: SwaggerDocument,
    entries: Vec<RouteEntry>,
}

impl TableBuilder {
    fn push(
        &mut self,
        bound: &Arc<BoundOperation>,
        method: HttpMethod,
        path: String,
        kind: RouteKind,
        field: Option<FieldDescriptor>,
        operation: Operation,
    ) -> Result<()> {
        self.document.add_operation(&path, method, operation)?;
        self.entries.push(RouteEntry {
            method,
            path,
            binding: RouteBinding {
                operation: bound.clone(),
                kind,
                field,
                stream_class: bound.stream_class(),
            },
        });
        Ok(())
    }

    fn add_operation(&mut self, bound: Arc<BoundOperation>) -> Result<()> {
        let svc = bound.service.clone();
        let request_ref = SchemaObject::reference_to(&bound.request.qualified_name);
        let response_ref = SchemaObject::reference_to(&bound.response.qualified_name);
        let instance_ref = SchemaObject::reference_to("Instance");
        let class = bound.stream_class();
        let response_streamed = bound.descriptor.response_is_stream;
        let request_streamed = bound.descriptor.request_is_stream;

        // POST {base}/{op}
        let mut create_params = vec![Parameter::query_flag(
            "start",
            "Start the operation immediately",
            true,
        )];
        create_params.push(if request_streamed {
            Parameter {
                description: Some("Initial input stream messages".to_string()),
                required: false,
                ..Parameter::body(SchemaObject::array_of(request_ref.clone()))
            }
        } else {
            Parameter {
                description: Some("Initial request message".to_string()),
                required: false,
                ..Parameter::body(request_ref.clone())
            }
        });
        self.push(
            &bound,
            HttpMethod::POST,
            bound.path.clone(),
            RouteKind::CreateInstance,
            None,
            Operation {
                operation_id: Some(operation_id(&bound, "create")),
                summary: Some(bound.name().to_string()),
                tags: vec![svc.clone()],
                consumes: vec![JSON.to_string()],
                parameters: create_params,
                responses: responses([
                    (
                        "202",
                        Response::new("Instance resource")
                            .with_schema(instance_ref.clone())
                            .with_header(
                                "Content-Location",
                                Header {
                                    header_type: "string".to_string(),
                                    description: Some(
                                        "Path to created instance resource".to_string(),
                                    ),
                                },
                            ),
                    ),
                    ("400", Response::new("Malformed request message")),
                ]),
                ..Default::default()
            },
        )?;

        // GET|PATCH|DELETE {base}/{op}/instances/{id}
        let instance_path = format!("{}/instances/{{id}}", bound.path);
        let instance_tags = vec!["Instances".to_string(), svc.clone()];

        let mut get_params = vec![id_param()];
        let get_schema = if response_streamed {
            instance_ref.clone()
        } else {
            get_params.push(Parameter::query_flag(
                "excludeOutput",
                "Omit instance output in response",
                false,
            ));
            SchemaObject {
                schema_type: Some("object".to_string()),
                all_of: Some(vec![
                    instance_ref.clone(),
                    SchemaObject::default().with_property("out", response_ref.clone()),
                ]),
                ..Default::default()
            }
        };
        self.push(
            &bound,
            HttpMethod::GET,
            instance_path.clone(),
            RouteKind::GetInstance,
            None,
            Operation {
                operation_id: Some(operation_id(&bound, "get")),
                summary: Some("Get instance resource".to_string()),
                tags: instance_tags.clone(),
                produces: vec![JSON.to_string()],
                parameters: get_params,
                responses: responses([
                    ("200", Response::new("Instance resource").with_schema(get_schema)),
                    ("404", not_found()),
                ]),
                ..Default::default()
            },
        )?;

        self.push(
            &bound,
            HttpMethod::PATCH,
            instance_path.clone(),
            RouteKind::PatchInstance,
            None,
            Operation {
                operation_id: Some(operation_id(&bound, "patch")),
                summary: Some("Update instance resource".to_string()),
                tags: instance_tags.clone(),
                consumes: vec![JSON.to_string()],
                parameters: vec![
                    id_param(),
                    Parameter {
                        name: "instance".to_string(),
                        description: Some("Updated parts of instance resource".to_string()),
                        ..Parameter::body(SchemaObject::reference_to("InstanceWritable"))
                    },
                ],
                responses: responses([
                    ("200", Response::new("Empty body")),
                    ("404", not_found()),
                    ("412", precondition_failed()),
                ]),
                ..Default::default()
            },
        )?;

        self.push(
            &bound,
            HttpMethod::DELETE,
            instance_path.clone(),
            RouteKind::DeleteInstance,
            None,
            Operation {
                operation_id: Some(operation_id(&bound, "delete")),
                summary: Some("Delete a finished instance and its messages".to_string()),
                tags: instance_tags,
                produces: vec![JSON.to_string()],
                parameters: vec![id_param()],
                responses: responses([
                    (
                        "200",
                        Response::new("Deleted instance resource").with_schema(instance_ref),
                    ),
                    ("404", not_found()),
                    ("412", precondition_failed()),
                ]),
                ..Default::default()
            },
        )?;

        let field_tags = vec!["Instances".to_string(), "Fields".to_string(), svc.clone()];
        let stream_tags = vec!["Instances".to_string(), "Streams".to_string(), svc];

        if !request_streamed {
            for field in &bound.request.fields {
                self.push(
                    &bound,
                    HttpMethod::PUT,
                    format!("{}/in/fields/{}", instance_path, field.name),
                    RouteKind::PutInputField,
                    Some(field.clone()),
                    Operation {
                        summary: Some("Set input field".to_string()),
                        tags: field_tags.clone(),
                        consumes: vec![JSON.to_string()],
                        parameters: vec![
                            id_param(),
                            Parameter {
                                name: "value".to_string(),
                                description: Some("Field value".to_string()),
                                ..Parameter::body(map_field(field))
                            },
                        ],
                        responses: responses([
                            ("200", Response::new("Empty body")),
                            ("400", Response::new("Value does not match the field type")),
                            ("404", not_found()),
                            ("412", precondition_failed()),
                        ]),
                        ..Default::default()
                    },
                )?;
            }
        }

        if !response_streamed {
            for field in &bound.response.fields {
                self.push(
                    &bound,
                    HttpMethod::GET,
                    format!("{}/out/fields/{}", instance_path, field.name),
                    RouteKind::GetOutputField,
                    Some(field.clone()),
                    Operation {
                        summary: Some("Get output field".to_string()),
                        tags: field_tags.clone(),
                        produces: vec![JSON.to_string()],
                        parameters: vec![id_param()],
                        responses: responses([
                            ("200", Response::new("Field value").with_schema(map_field(field))),
                            ("404", not_found()),
                            ("412", precondition_failed()),
                        ]),
                        ..Default::default()
                    },
                )?;
            }

            self.push(
                &bound,
                HttpMethod::GET,
                format!("{}/out", instance_path),
                RouteKind::GetOutput,
                None,
                Operation {
                    summary: Some("Get output message".to_string()),
                    tags: field_tags,
                    produces: vec![JSON.to_string()],
                    parameters: vec![id_param()],
                    responses: responses([
                        ("200", Response::new("Output message").with_schema(response_ref.clone())),
                        ("404", not_found()),
                        ("412", precondition_failed()),
                    ]),
                    ..Default::default()
                },
            )?;
        }

        if request_streamed {
            self.push(
                &bound,
                HttpMethod::POST,
                format!("{}/in/stream", instance_path),
                RouteKind::PostInputStream,
                None,
                Operation {
                    summary: Some(format!("Stream of input messages as {}", STREAM_SUMMARY)),
                    tags: stream_tags.clone(),
                    consumes: vec![NDJSON.to_string()],
                    parameters: vec![
                        id_param(),
                        Parameter {
                            name: "stream".to_string(),
                            description: Some("Input stream".to_string()),
                            ..Parameter::body(request_ref.clone())
                        },
                        Parameter::query_flag(
                            "end",
                            "Close the input stream and start the operation",
                            false,
                        ),
                    ],
                    responses: responses([
                        ("200", Response::new("Empty body")),
                        ("400", Response::new("Malformed input line")),
                        ("404", not_found()),
                        ("412", precondition_failed()),
                    ]),
                    ..Default::default()
                },
            )?;
        }

        if response_streamed {
            self.push(
                &bound,
                HttpMethod::GET,
                format!("{}/out/stream", instance_path),
                RouteKind::GetOutputStream,
                None,
                Operation {
                    summary: Some(format!("Stream of output messages as {}", STREAM_SUMMARY)),
                    tags: stream_tags.clone(),
                    produces: vec![NDJSON.to_string()],
                    parameters: vec![id_param()],
                    responses: responses([
                        ("200", Response::new("Output stream").with_schema(response_ref.clone())),
                        ("404", not_found()),
                    ]),
                    ..Default::default()
                },
            )?;
        }

        if class == StreamClass::Bidirectional {
            let bi_path = format!("{}/bi/stream", instance_path);
            self.push(
                &bound,
                HttpMethod::POST,
                bi_path.clone(),
                RouteKind::PostBiStream,
                None,
                Operation {
                    summary: Some(format!(
                        "Send input messages and receive output messages as {}",
                        STREAM_SUMMARY
                    )),
                    tags: stream_tags.clone(),
                    consumes: vec![NDJSON.to_string()],
                    produces: vec![NDJSON.to_string()],
                    parameters: vec![
                        id_param(),
                        Parameter {
                            name: "stream".to_string(),
                            description: Some("Input stream".to_string()),
                            ..Parameter::body(request_ref)
                        },
                    ],
                    responses: responses([
                        ("200", Response::new("Output stream").with_schema(response_ref.clone())),
                        ("400", Response::new("Malformed input line")),
                        ("404", not_found()),
                    ]),
                    ..Default::default()
                },
            )?;
            self.push(
                &bound,
                HttpMethod::GET,
                bi_path,
                RouteKind::GetBiStream,
                None,
                Operation {
                    summary: Some(format!("Stream of output messages as {}", STREAM_SUMMARY)),
                    tags: stream_tags,
                    produces: vec![NDJSON.to_string()],
                    parameters: vec![id_param()],
                    responses: responses([
                        ("200", Response::new("Output stream").with_schema(response_ref)),
                        ("404", not_found()),
                    ]),
                    ..Default::default()
                },
            )?;
        }

        Ok(())
    }
}

fn operation_id(bound: &BoundOperation, action: &str) -> String {
    format!("{}.{}.{}", bound.service, bound.name(), action)
}

fn id_param() -> Parameter {
    Parameter::path("id", "Unique identifier of instance")
}

fn not_found() -> Response {
    Response::new("Instance not found")
}

fn precondition_failed() -> Response {
    Response::new("Instance is not in a state that allows this request")
}

fn responses<const N: usize>(entries: [(&str, Response); N]) -> BTreeMap<String, Response> {
    entries
        .into_iter()
        .map(|(code, response)| (code.to_string(), response))
        .collect()
}
