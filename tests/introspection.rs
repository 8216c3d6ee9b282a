mod common;

use grpc_rest_gateway::descriptor::{
    FieldNode, FieldTypeTag, MessageNode, MethodNode, PackageNode, ScalarType, SchemaNode,
    ServiceNode,
};
use grpc_rest_gateway::{
    synthesize, FieldKind, HttpMethod, RouteConfig, SchemaIntrospector, SchemaSource,
};
use proptest::prelude::*;
use prost::Message;
use serde_json::json;

fn webshop_source() -> SchemaSource {
    let bytes = common::webshop_descriptor_set().encode_to_vec();
    SchemaSource::from_descriptor_set_bytes(&bytes).expect("descriptor set decodes")
}

#[test]
fn webshop_messages_expanded_once_with_relative_names() {
    let schema = SchemaIntrospector::new()
        .introspect(&webshop_source())
        .expect("introspection succeeds");
    assert_eq!(schema.services.len(), 1);

    let shop = &schema.services[0];
    assert_eq!(shop.package, "webshop");
    assert_eq!(shop.service_name, "Shop");
    assert_eq!(shop.operations.len(), 6);

    let names: Vec<&str> = shop.messages.names().collect();
    for expected in [
        "ListProductsRequest",
        "ListProductsResponse",
        "PriceFilter",
        "Product",
        "Product.Variant",
        "Category",
        "ChatMessage",
    ] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }
    // well-known types are scalars, not definitions
    assert!(!names.iter().any(|n| n.contains("Timestamp")));

    let product = shop.messages.get("Product").unwrap();
    let created_at = product.field("created_at").unwrap();
    assert_eq!(created_at.kind, FieldKind::String);
    assert_eq!(created_at.concrete_type, "Timestamp");

    let availability = product.field("availability").unwrap();
    assert_eq!(availability.kind, FieldKind::Enum);
    assert_eq!(
        availability.enum_values.as_deref(),
        Some(&["IN_STOCK".to_string(), "BACKORDER".to_string(), "DISCONTINUED".to_string()][..])
    );

    let variants = product.field("variants").unwrap();
    assert!(variants.is_repeated);
    assert_eq!(variants.concrete_type, "Product.Variant");

    let category = shop.messages.get("Category").unwrap();
    assert_eq!(category.field("children").unwrap().concrete_type, "Category");
}

#[test]
fn webshop_swagger_document() {
    let schema = SchemaIntrospector::new().introspect(&webshop_source()).unwrap();
    let model = synthesize(&schema, &RouteConfig::default()).unwrap();
    let doc = model.document.to_value().unwrap();

    assert_eq!(doc["swagger"], "2.0");
    assert_eq!(
        doc["definitions"]["Product"]["properties"]["created_at"],
        json!({"type": "string", "format": "date-time"})
    );
    assert_eq!(
        doc["definitions"]["Product"]["properties"]["variants"]["items"]["$ref"],
        "#/definitions/Product.Variant"
    );
    assert_eq!(
        doc["definitions"]["Category"]["properties"]["children"]["items"]["$ref"],
        "#/definitions/Category"
    );
    assert_eq!(
        doc["definitions"]["Product.Variant"]["properties"]["stock"],
        json!({"type": "integer", "format": "uint32"})
    );

    let base = "/webshop/Shop";
    let doc_model = &model.document;
    assert!(doc_model
        .operation(&format!("{base}/ListProducts/instances/{{id}}/in/fields/page_size"), HttpMethod::PUT)
        .is_some());
    assert!(doc_model
        .operation(&format!("{base}/WatchOrder/instances/{{id}}/out/stream"), HttpMethod::GET)
        .is_some());
    assert!(doc_model
        .operation(&format!("{base}/WatchOrder/instances/{{id}}/out"), HttpMethod::GET)
        .is_none());
    assert!(doc_model
        .operation(&format!("{base}/ImportProducts/instances/{{id}}/in/stream"), HttpMethod::POST)
        .is_some());
    assert!(doc_model
        .operation(&format!("{base}/ImportProducts/instances/{{id}}/in/fields/id"), HttpMethod::PUT)
        .is_none());
    assert!(doc_model
        .operation(&format!("{base}/Chat/instances/{{id}}/bi/stream"), HttpMethod::POST)
        .is_some());
    assert!(doc_model
        .operation(&format!("{base}/Chat/instances/{{id}}/bi/stream"), HttpMethod::GET)
        .is_some());

    // every document operation has exactly one route
    let documented: usize = doc_model.paths.values().map(|p| p.methods().len()).sum();
    assert_eq!(documented, model.routes.len());
}

#[test]
fn document_is_deterministic() {
    let render = || {
        let schema = SchemaIntrospector::new().introspect(&webshop_source()).unwrap();
        synthesize(&schema, &RouteConfig::default())
            .unwrap()
            .document
            .to_json_pretty()
            .unwrap()
    };
    assert_eq!(render(), render());
}

fn chain_source(len: usize, branching: bool) -> SchemaSource {
    // M0 -> M1 -> ... -> M{len-1}; with branching every message also points
    // at the last one, so it is reachable along many paths
    let last = format!("chain.M{}", len - 1);
    let mut children: Vec<SchemaNode> = (0..len)
        .map(|i| {
            let mut fields = vec![SchemaNode::Field(FieldNode {
                name: "value".to_string(),
                number: 1,
                repeated: false,
                type_tag: FieldTypeTag::Scalar(ScalarType::Int64),
            })];
            if i + 1 < len {
                fields.push(SchemaNode::Field(FieldNode {
                    name: "next".to_string(),
                    number: 2,
                    repeated: false,
                    type_tag: FieldTypeTag::Message(format!("chain.M{}", i + 1)),
                }));
                if branching {
                    fields.push(SchemaNode::Field(FieldNode {
                        name: "tail".to_string(),
                        number: 3,
                        repeated: true,
                        type_tag: FieldTypeTag::Message(last.clone()),
                    }));
                }
            }
            SchemaNode::Message(MessageNode {
                name: format!("M{i}"),
                full_name: format!("chain.M{i}"),
                children: fields,
            })
        })
        .collect();
    children.push(SchemaNode::Service(ServiceNode {
        name: "Chain".to_string(),
        full_name: "chain.Chain".to_string(),
        methods: vec![MethodNode {
            name: "Walk".to_string(),
            request_type: "chain.M0".to_string(),
            request_stream: false,
            response_type: "chain.M0".to_string(),
            response_stream: false,
        }],
    }));
    SchemaSource::new(vec![PackageNode {
        name: "chain".to_string(),
        children,
    }])
}

proptest! {
    #[test]
    fn acyclic_schemas_expand_each_message_once(len in 1usize..9, branching in any::<bool>()) {
        let schema = SchemaIntrospector::new()
            .introspect(&chain_source(len, branching))
            .unwrap();
        let table = &schema.services[0].messages;

        prop_assert_eq!(table.len(), len);
        for i in 0..len {
            let name = format!("M{}", i);
            prop_assert!(table.contains(&name));
        }
    }

    #[test]
    fn depth_ceiling_bounds_the_table(len in 1usize..20, max_depth in 1usize..12) {
        let schema = SchemaIntrospector::new()
            .with_max_depth(max_depth)
            .introspect(&chain_source(len, false))
            .unwrap();
        let table = &schema.services[0].messages;
        // depth starts at 1 and expansion stops at the ceiling
        prop_assert_eq!(table.len(), len.min(max_depth.saturating_sub(1)));
    }
}
