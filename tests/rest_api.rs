mod common;

use axum::http::{header, StatusCode};
use common::{app, create, poll_done, send, Script, ScriptedBackend};
use grpc_rest_gateway::NDJSON_CONTENT_TYPE;
use serde_json::{json, Value};
use tonic::Status;

const LIST_PRODUCTS: &str = "/webshop/Shop/ListProducts";
const WATCH_ORDER: &str = "/webshop/Shop/WatchOrder";
const CANCEL_ORDER: &str = "/webshop/Shop/CancelOrder";
const IMPORT_PRODUCTS: &str = "/webshop/Shop/ImportProducts";
const CHAT: &str = "/webshop/Shop/Chat";

fn ndjson_lines(text: &str) -> Vec<Value> {
    text.lines()
        .map(|line| serde_json::from_str(line).expect("NDJSON line"))
        .collect()
}

#[tokio::test]
async fn unary_instance_edited_started_and_read() {
    let listing = json!({
        "products": [{"id": "p-1", "name": "Desk lamp", "price": 19.5}],
        "total": 1
    });
    let backend = ScriptedBackend::new().script("ListProducts", Script::Reply(listing.clone()));
    let app = app(backend);

    let id = create(&app, LIST_PRODUCTS, false, "").await;
    let instance_path = format!("{LIST_PRODUCTS}/instances/{id}");

    let instance = send(&app, "GET", &instance_path, "").await.json();
    assert_eq!(instance["started"], false);
    assert_eq!(instance["done"], false);

    let put = send(&app, "PUT", &format!("{instance_path}/in/fields/category"), r#""lamps""#).await;
    assert_eq!(put.status, StatusCode::OK);
    let put = send(&app, "PUT", &format!("{instance_path}/in/fields/page_size"), r#""20""#).await;
    assert_eq!(put.status, StatusCode::OK);

    let patch = send(&app, "PATCH", &instance_path, r#"{"started": true}"#).await;
    assert_eq!(patch.status, StatusCode::OK);

    let done = poll_done(&app, &instance_path).await;
    assert_eq!(done["error"], "");
    assert_eq!(done["out"], listing);
    assert!(!done["doneAt"].as_str().unwrap().is_empty());

    let out = send(&app, "GET", &format!("{instance_path}/out"), "").await;
    assert_eq!(out.status, StatusCode::OK);
    assert_eq!(out.json(), listing);

    let total = send(&app, "GET", &format!("{instance_path}/out/fields/total"), "").await;
    assert_eq!(total.json(), json!(1));
}

#[tokio::test]
async fn request_fields_are_coerced_before_the_call() {
    let backend = std::sync::Arc::new(ScriptedBackend::new());
    let gateway = grpc_rest_gateway::Gateway::builder()
        .with_descriptor_set_bytes(common::webshop_descriptor_bytes())
        .with_backend(backend.clone())
        .build()
        .expect("gateway builds");
    let app = gateway.into_router();

    let id = create(&app, LIST_PRODUCTS, false, r#"{"category": "lamps"}"#).await;
    let instance_path = format!("{LIST_PRODUCTS}/instances/{id}");
    send(&app, "PUT", &format!("{instance_path}/in/fields/page_size"), r#""20""#).await;
    send(
        &app,
        "PUT",
        &format!("{instance_path}/in/fields/price"),
        r#"{"min": 5, "max": 50}"#,
    )
    .await;
    send(&app, "PATCH", &instance_path, r#"{"started": true}"#).await;
    poll_done(&app, &instance_path).await;

    let calls = backend.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "ListProducts");
    assert_eq!(
        calls[0].1,
        json!({"category": "lamps", "page_size": 20, "price": {"min": 5, "max": 50}})
    );
}

#[tokio::test]
async fn map_field_set_as_json_object() {
    let backend = std::sync::Arc::new(ScriptedBackend::new());
    let gateway = grpc_rest_gateway::Gateway::builder()
        .with_descriptor_set_bytes(common::webshop_descriptor_bytes())
        .with_backend(backend.clone())
        .build()
        .expect("gateway builds");

    let put = gateway
        .document()
        .operation(
            &format!("{LIST_PRODUCTS}/instances/{{id}}/in/fields/min_stock"),
            grpc_rest_gateway::HttpMethod::PUT,
        )
        .expect("map field has a PUT route");
    let body = serde_json::to_value(&put.parameters[1]).unwrap();
    assert_eq!(
        body["schema"],
        json!({"type": "object", "additionalProperties": {"type": "integer", "format": "int32"}})
    );

    let app = gateway.into_router();
    let id = create(&app, LIST_PRODUCTS, false, "").await;
    let instance_path = format!("{LIST_PRODUCTS}/instances/{id}");

    let entries = send(
        &app,
        "PUT",
        &format!("{instance_path}/in/fields/min_stock"),
        r#"[{"key": "lamp", "value": 2}]"#,
    )
    .await;
    assert_eq!(entries.status, StatusCode::BAD_REQUEST);

    let put = send(
        &app,
        "PUT",
        &format!("{instance_path}/in/fields/min_stock"),
        r#"{"lamp": "2", "desk": 1}"#,
    )
    .await;
    assert_eq!(put.status, StatusCode::OK);

    send(&app, "PATCH", &instance_path, r#"{"started": true}"#).await;
    poll_done(&app, &instance_path).await;

    let request = backend.calls.lock()[0].1.clone();
    assert_eq!(request["min_stock"], json!({"lamp": 2, "desk": 1}));

    // the recorded request is valid proto3 JSON for the backing service
    let pool = prost_reflect::DescriptorPool::decode(common::webshop_descriptor_bytes().as_slice())
        .unwrap();
    let descriptor = pool
        .get_message_by_name("webshop.ListProductsRequest")
        .unwrap();
    assert!(grpc_rest_gateway::backend::json_to_message(&descriptor, request).is_ok());
}

#[tokio::test]
async fn response_stream_delivered_in_order() {
    let events = vec![
        json!({"order_id": "o-1", "state": "PLACED", "seq": 1}),
        json!({"order_id": "o-1", "state": "PACKED", "seq": 2}),
        json!({"order_id": "o-1", "state": "SHIPPED", "seq": 3}),
    ];
    let backend =
        ScriptedBackend::new().script("WatchOrder", Script::Stream(events.clone(), None));
    let app = app(backend);

    let id = create(&app, WATCH_ORDER, true, r#"{"order_id": "o-1"}"#).await;
    let instance_path = format!("{WATCH_ORDER}/instances/{id}");

    let stream = send(&app, "GET", &format!("{instance_path}/out/stream"), "").await;
    assert_eq!(stream.status, StatusCode::OK);
    assert_eq!(
        stream.headers.get(header::CONTENT_TYPE).unwrap(),
        NDJSON_CONTENT_TYPE
    );
    assert_eq!(ndjson_lines(&stream.text()), events);

    let done = poll_done(&app, &instance_path).await;
    assert_eq!(done["error"], "");
    assert!(done.get("out").is_none());

    // replay after completion yields the same sequence
    let replay = send(&app, "GET", &format!("{instance_path}/out/stream"), "").await;
    assert_eq!(ndjson_lines(&replay.text()), events);
}

#[tokio::test]
async fn backing_failure_recorded_on_instance() {
    let backend = ScriptedBackend::new().script(
        "CancelOrder",
        Script::Fail(Status::not_found("Order not found")),
    );
    let app = app(backend);

    let id = create(&app, CANCEL_ORDER, true, r#"{"order_id": "missing"}"#).await;
    let instance_path = format!("{CANCEL_ORDER}/instances/{id}");

    let done = poll_done(&app, &instance_path).await;
    assert_eq!(done["done"], true);
    assert_eq!(done["error"], "Order not found");
    assert!(done.get("out").is_none());

    let out = send(&app, "GET", &format!("{instance_path}/out"), "").await;
    assert_eq!(out.status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(out.json()["code"], "INVALID_STATE");
}

#[tokio::test]
async fn stream_failure_keeps_delivered_items() {
    let backend = ScriptedBackend::new().script(
        "WatchOrder",
        Script::Stream(
            vec![json!({"seq": 1})],
            Some(Status::unavailable("backend restarted")),
        ),
    );
    let app = app(backend);

    let id = create(&app, WATCH_ORDER, true, "{}").await;
    let instance_path = format!("{WATCH_ORDER}/instances/{id}");

    let stream = send(&app, "GET", &format!("{instance_path}/out/stream"), "").await;
    assert_eq!(ndjson_lines(&stream.text()), vec![json!({"seq": 1})]);

    let done = poll_done(&app, &instance_path).await;
    assert_eq!(done["error"], "backend restarted");
}

#[tokio::test]
async fn request_stream_collected_then_sent() {
    let app = app(ScriptedBackend::new());

    let id = create(&app, IMPORT_PRODUCTS, false, "").await;
    let instance_path = format!("{IMPORT_PRODUCTS}/instances/{id}");
    let input_path = format!("{instance_path}/in/stream");

    let first = send(
        &app,
        "POST",
        &input_path,
        "{\"id\":\"p-1\"}\n{\"id\":\"p-2\"}\n",
    )
    .await;
    assert_eq!(first.status, StatusCode::OK);

    let last = send(&app, "POST", &format!("{input_path}?end=true"), "{\"id\":\"p-3\"}\n").await;
    assert_eq!(last.status, StatusCode::OK);

    let done = poll_done(&app, &instance_path).await;
    assert_eq!(done["out"], json!({"imported": 3}));

    let late = send(&app, "POST", &input_path, "{\"id\":\"p-4\"}\n").await;
    assert_eq!(late.status, StatusCode::PRECONDITION_FAILED);

    let malformed = send(&app, "POST", &input_path, "{\"id\":\n").await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bidirectional_stream_round_trip() {
    let app = app(ScriptedBackend::new());

    let id = create(&app, CHAT, false, "").await;
    let bi_path = format!("{CHAT}/instances/{id}/bi/stream");

    let messages = "{\"from\":\"ada\",\"text\":\"hi\"}\n{\"from\":\"ada\",\"text\":\"bye\"}\n";
    let response = send(&app, "POST", &bi_path, messages).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        ndjson_lines(&response.text()),
        vec![
            json!({"from": "ada", "text": "hi"}),
            json!({"from": "ada", "text": "bye"})
        ]
    );

    let replay = send(&app, "GET", &bi_path, "").await;
    assert_eq!(ndjson_lines(&replay.text()).len(), 2);
}

#[tokio::test]
async fn instance_ids_are_scoped_to_their_operation() {
    let app = app(ScriptedBackend::new());
    let id = create(&app, LIST_PRODUCTS, false, "").await;

    let wrong = send(&app, "GET", &format!("{CANCEL_ORDER}/instances/{id}"), "").await;
    assert_eq!(wrong.status, StatusCode::NOT_FOUND);

    let unknown = send(&app, "GET", &format!("{LIST_PRODUCTS}/instances/nope"), "").await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn lifecycle_rules_over_http() {
    let app = app(ScriptedBackend::new());
    let id = create(&app, LIST_PRODUCTS, false, "").await;
    let instance_path = format!("{LIST_PRODUCTS}/instances/{id}");

    // not terminal yet
    let delete = send(&app, "DELETE", &instance_path, "").await;
    assert_eq!(delete.status, StatusCode::PRECONDITION_FAILED);

    let bad_value = send(&app, "PUT", &format!("{instance_path}/in/fields/page_size"), r#""lots""#).await;
    assert_eq!(bad_value.status, StatusCode::BAD_REQUEST);

    send(&app, "PATCH", &instance_path, r#"{"started": true}"#).await;
    poll_done(&app, &instance_path).await;

    let unstart = send(&app, "PATCH", &instance_path, r#"{"started": false}"#).await;
    assert_eq!(unstart.status, StatusCode::PRECONDITION_FAILED);

    let late_put = send(&app, "PUT", &format!("{instance_path}/in/fields/category"), r#""x""#).await;
    assert_eq!(late_put.status, StatusCode::PRECONDITION_FAILED);

    let delete = send(&app, "DELETE", &instance_path, "").await;
    assert_eq!(delete.status, StatusCode::OK);
    assert_eq!(delete.json()["id"], id.as_str());

    let gone = send(&app, "GET", &instance_path, "").await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_returns_location_of_instance() {
    let app = app(ScriptedBackend::new());
    let response = send(&app, "POST", &format!("{LIST_PRODUCTS}?start=false"), "").await;
    assert_eq!(response.status, StatusCode::ACCEPTED);

    let instance = response.json();
    let location = response
        .headers
        .get(header::CONTENT_LOCATION)
        .expect("Content-Location header")
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(
        location,
        format!("{LIST_PRODUCTS}/instances/{}", instance["id"].as_str().unwrap())
    );
    assert_eq!(instance["linkedMessageId"], instance["id"]);

    let fetched = send(&app, "GET", &location, "").await;
    assert_eq!(fetched.status, StatusCode::OK);
}

#[tokio::test]
async fn health_endpoints_report_operations() {
    let app = app(ScriptedBackend::new());
    let ready = send(&app, "GET", "/ready", "").await;
    assert_eq!(ready.status, StatusCode::OK);
    let checks = ready.json()["checks"].clone();
    assert!(checks
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c["name"] == "operations" && c["message"] == "6 operations exposed"));
}
