//! Shared fixtures: a webshop descriptor set and a scripted backend.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use futures::stream::{self, StreamExt};
use grpc_rest_gateway::{Gateway, OperationDescriptor, ResponseStream, RpcBackend};
use parking_lot::Mutex;
use prost::Message;
use prost_types::{
    field_descriptor_proto::{Label, Type},
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MessageOptions, MethodDescriptorProto,
    ServiceDescriptorProto,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tonic::Status;
use tower::ServiceExt;

fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        json_name: None,
        ..Default::default()
    }
}

fn typed_field(name: &str, number: i32, ty: Type, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.to_string()),
        ..field(name, number, ty)
    }
}

fn repeated(mut f: FieldDescriptorProto) -> FieldDescriptorProto {
    f.label = Some(Label::Repeated as i32);
    f
}

fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

fn method(name: &str, input: &str, output: &str, client: bool, server: bool) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(format!(".webshop.{input}")),
        output_type: Some(format!(".webshop.{output}")),
        client_streaming: Some(client),
        server_streaming: Some(server),
        ..Default::default()
    }
}

/// `webshop.Shop` with one operation per streaming shape plus a
/// self-referential category tree
pub fn webshop_descriptor_set() -> FileDescriptorSet {
    let timestamp = FileDescriptorProto {
        name: Some("google/protobuf/timestamp.proto".to_string()),
        package: Some("google.protobuf".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![message(
            "Timestamp",
            vec![field("seconds", 1, Type::Int64), field("nanos", 2, Type::Int32)],
        )],
        ..Default::default()
    };

    let product = DescriptorProto {
        nested_type: vec![message(
            "Variant",
            vec![field("sku", 1, Type::String), field("stock", 2, Type::Uint32)],
        )],
        ..message(
            "Product",
            vec![
                field("id", 1, Type::String),
                field("name", 2, Type::String),
                field("price", 3, Type::Double),
                repeated(field("tags", 4, Type::String)),
                typed_field("availability", 5, Type::Enum, ".webshop.Availability"),
                typed_field("created_at", 6, Type::Message, ".google.protobuf.Timestamp"),
                repeated(typed_field("variants", 7, Type::Message, ".webshop.Product.Variant")),
            ],
        )
    };

    let webshop = FileDescriptorProto {
        name: Some("webshop.proto".to_string()),
        package: Some("webshop".to_string()),
        dependency: vec!["google/protobuf/timestamp.proto".to_string()],
        syntax: Some("proto3".to_string()),
        enum_type: vec![EnumDescriptorProto {
            name: Some("Availability".to_string()),
            value: ["IN_STOCK", "BACKORDER", "DISCONTINUED"]
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
        message_type: vec![
            message(
                "PriceFilter",
                vec![field("min", 1, Type::Double), field("max", 2, Type::Double)],
            ),
            DescriptorProto {
                // map<string, int32> min_stock = 4;
                nested_type: vec![DescriptorProto {
                    options: Some(MessageOptions {
                        map_entry: Some(true),
                        ..Default::default()
                    }),
                    ..message(
                        "MinStockEntry",
                        vec![field("key", 1, Type::String), field("value", 2, Type::Int32)],
                    )
                }],
                ..message(
                    "ListProductsRequest",
                    vec![
                        field("category", 1, Type::String),
                        field("page_size", 2, Type::Int32),
                        typed_field("price", 3, Type::Message, ".webshop.PriceFilter"),
                        repeated(typed_field(
                            "min_stock",
                            4,
                            Type::Message,
                            ".webshop.ListProductsRequest.MinStockEntry",
                        )),
                    ],
                )
            },
            product,
            message(
                "ListProductsResponse",
                vec![
                    repeated(typed_field("products", 1, Type::Message, ".webshop.Product")),
                    field("total", 2, Type::Int32),
                ],
            ),
            message("OrderRequest", vec![field("order_id", 1, Type::String)]),
            message(
                "OrderEvent",
                vec![
                    field("order_id", 1, Type::String),
                    field("state", 2, Type::String),
                    field("seq", 3, Type::Int64),
                ],
            ),
            message("CancelResult", vec![field("cancelled", 1, Type::Bool)]),
            message("ImportSummary", vec![field("imported", 1, Type::Int32)]),
            message(
                "ChatMessage",
                vec![field("from", 1, Type::String), field("text", 2, Type::String)],
            ),
            message("CategoryRequest", vec![field("root", 1, Type::String)]),
            message(
                "Category",
                vec![
                    field("name", 1, Type::String),
                    repeated(typed_field("children", 2, Type::Message, ".webshop.Category")),
                ],
            ),
        ],
        service: vec![ServiceDescriptorProto {
            name: Some("Shop".to_string()),
            method: vec![
                method("ListProducts", "ListProductsRequest", "ListProductsResponse", false, false),
                method("WatchOrder", "OrderRequest", "OrderEvent", false, true),
                method("CancelOrder", "OrderRequest", "CancelResult", false, false),
                method("ImportProducts", "Product", "ImportSummary", true, false),
                method("Chat", "ChatMessage", "ChatMessage", true, true),
                method("CategoryTree", "CategoryRequest", "Category", false, false),
            ],
            ..Default::default()
        }],
        ..Default::default()
    };

    FileDescriptorSet {
        file: vec![timestamp, webshop],
    }
}

pub fn webshop_descriptor_bytes() -> Vec<u8> {
    webshop_descriptor_set().encode_to_vec()
}

/// What the backend answers for one operation
#[derive(Clone)]
pub enum Script {
    Reply(Value),
    Fail(Status),
    /// Stream these items, then end or fail
    Stream(Vec<Value>, Option<Status>),
}

/// In-memory backend answering from per-operation scripts
///
/// Unscripted unary operations echo the request back; client-streamed
/// calls answer `{"imported": n}`; bidi calls echo every request.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: HashMap<String, Script>,
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, operation: &str, script: Script) -> Self {
        self.scripts.insert(operation.to_string(), script);
        self
    }

    fn record(&self, operation: &OperationDescriptor, payload: Value) -> Option<Script> {
        self.calls.lock().push((operation.name.clone(), payload));
        self.scripts.get(&operation.name).cloned()
    }
}

#[async_trait]
impl RpcBackend for ScriptedBackend {
    async fn invoke_unary(
        &self,
        operation: &OperationDescriptor,
        request: Value,
    ) -> Result<Value, Status> {
        match self.record(operation, request.clone()) {
            Some(Script::Reply(value)) => Ok(value),
            Some(Script::Fail(status)) => Err(status),
            _ => Ok(request),
        }
    }

    async fn invoke_server_stream(
        &self,
        operation: &OperationDescriptor,
        request: Value,
    ) -> Result<ResponseStream, Status> {
        match self.record(operation, request) {
            Some(Script::Stream(items, failure)) => {
                let mut results: Vec<Result<Value, Status>> = items.into_iter().map(Ok).collect();
                results.extend(failure.map(Err));
                Ok(stream::iter(results).boxed())
            }
            Some(Script::Fail(status)) => Err(status),
            _ => Ok(stream::empty().boxed()),
        }
    }

    async fn invoke_client_stream(
        &self,
        operation: &OperationDescriptor,
        requests: Vec<Value>,
    ) -> Result<Value, Status> {
        let count = requests.len();
        match self.record(operation, Value::Array(requests)) {
            Some(Script::Reply(value)) => Ok(value),
            Some(Script::Fail(status)) => Err(status),
            _ => Ok(json!({ "imported": count })),
        }
    }

    async fn invoke_bidi_stream(
        &self,
        operation: &OperationDescriptor,
        requests: Vec<Value>,
    ) -> Result<ResponseStream, Status> {
        self.record(operation, Value::Array(requests.clone()));
        Ok(stream::iter(requests.into_iter().map(Ok)).boxed())
    }
}

pub fn gateway(backend: ScriptedBackend) -> Gateway {
    Gateway::builder()
        .with_descriptor_set_bytes(webshop_descriptor_bytes())
        .with_backend(Arc::new(backend))
        .enable_health_checks()
        .build()
        .expect("webshop gateway builds")
}

pub fn app(backend: ScriptedBackend) -> Router {
    gateway(backend).into_router()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("JSON body")
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).expect("UTF-8 body")
    }
}

pub async fn send(app: &Router, method: &str, uri: &str, body: impl Into<String>) -> TestResponse {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.into()))
                .expect("build request"),
        )
        .await
        .expect("receive response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), 4 * 1024 * 1024)
        .await
        .expect("read body")
        .to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}

/// Create an instance and return its id
pub async fn create(app: &Router, path: &str, start: bool, body: &str) -> String {
    let response = send(app, "POST", &format!("{path}?start={start}"), body).await;
    assert_eq!(response.status, StatusCode::ACCEPTED, "{}", response.text());
    response.json()["id"]
        .as_str()
        .expect("instance id")
        .to_string()
}

/// Poll an instance until it is done
pub async fn poll_done(app: &Router, instance_path: &str) -> Value {
    for _ in 0..200 {
        let instance = send(app, "GET", instance_path, "").await.json();
        if instance["done"] == true {
            return instance;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{instance_path} never finished");
}
